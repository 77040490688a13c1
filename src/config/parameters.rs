//! Resolved, typed parameter values.

use crate::error::{ErrorCode, Result, TomoflowError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A single typed parameter value after coercion
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Path(PathBuf),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "{}", s),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Validated parameters with defaults applied
///
/// Built once by [`ParameterRegistry::resolve`](super::ParameterRegistry::resolve)
/// and shared read-only by the executor, the dispatcher and every step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Parameters {
    values: BTreeMap<String, ParamValue>,
}

impl Parameters {
    pub(crate) fn from_values(values: BTreeMap<String, ParamValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParamValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ParamValue::Float(v)) => Some(*v),
            Some(ParamValue::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    /// Absent booleans read as false
    pub fn get_bool(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ParamValue::Bool(true)))
    }

    pub fn get_path(&self, name: &str) -> Option<&Path> {
        match self.values.get(name) {
            Some(ParamValue::Path(p)) => Some(p.as_path()),
            _ => None,
        }
    }

    /// Duration from a parameter expressed in minutes
    pub fn get_minutes(&self, name: &str) -> Option<Duration> {
        self.get_float(name)
            .filter(|m| *m > 0.0)
            .map(|m| Duration::from_secs_f64(m * 60.0))
    }

    /// Duration from a parameter expressed in seconds
    pub fn get_seconds(&self, name: &str) -> Option<Duration> {
        self.get_float(name)
            .filter(|s| *s > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.get_str(name).ok_or_else(|| missing(name))
    }

    pub fn require_int(&self, name: &str) -> Result<i64> {
        self.get_int(name).ok_or_else(|| missing(name))
    }

    pub fn require_path(&self, name: &str) -> Result<&Path> {
        self.get_path(name).ok_or_else(|| missing(name))
    }

    /// Positive integer parameter used as a count
    pub fn require_count(&self, name: &str) -> Result<usize> {
        let value = self.require_int(name)?;
        usize::try_from(value)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| {
                TomoflowError::configuration_with_code(
                    ErrorCode::CONFIG_INVALID_VALUE,
                    format!("{} must be a positive integer, got {}", name, value),
                    Some(name.to_string()),
                )
            })
    }
}

fn missing(name: &str) -> TomoflowError {
    TomoflowError::configuration_with_code(
        ErrorCode::CONFIG_MISSING_REQUIRED,
        format!("parameter {} is not set", name),
        Some(name.to_string()),
    )
}
