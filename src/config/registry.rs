//! Declarative parameter/path registry with type coercion and validation.

use super::loader::RawParameters;
use super::parameters::{ParamValue, Parameters};
use crate::error::{ErrorCode, Result, TomoflowError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Int,
    Float,
    Bool,
    Path,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Str => "string",
            ParamType::Int => "integer",
            ParamType::Float => "float",
            ParamType::Bool => "boolean",
            ParamType::Path => "path",
        };
        f.write_str(name)
    }
}

/// Whether an entry is a plain parameter or a filesystem path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Par,
    Path,
}

/// One declared configuration entry
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<ParamValue>,
    pub docstr: String,
}

impl ParamSpec {
    /// Declare a parameter of the given type
    pub fn par(name: &str, param_type: ParamType) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Par,
            param_type,
            required: false,
            default: None,
            docstr: String::new(),
        }
    }

    /// Declare a path; relative values resolve against WORKDIR
    pub fn path(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Path,
            param_type: ParamType::Path,
            required: false,
            default: None,
            docstr: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Default for a path entry, relative to WORKDIR
    pub fn default_path(mut self, value: impl Into<PathBuf>) -> Self {
        self.default = Some(ParamValue::Path(value.into()));
        self
    }

    pub fn doc(mut self, docstr: &str) -> Self {
        self.docstr = docstr.to_string();
        self
    }
}

type Check = Arc<dyn Fn(&Parameters) -> Vec<String> + Send + Sync>;

/// Accumulated declarations for one workflow variant
///
/// Variants compose registries: the shared base registration runs first and
/// variant registrations follow. Re-declaring a name replaces the earlier
/// declaration in place; nothing is ever removed.
#[derive(Clone, Default)]
pub struct ParameterRegistry {
    specs: Vec<ParamSpec>,
    checks: Vec<Check>,
}

impl fmt::Debug for ParameterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterRegistry")
            .field("specs", &self.specs)
            .field("checks", &self.checks.len())
            .finish()
    }
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, spec: ParamSpec) -> &mut Self {
        match self.specs.iter_mut().find(|s| s.name == spec.name) {
            Some(existing) => {
                debug!("Redeclaring parameter {}", spec.name);
                *existing = spec;
            }
            None => self.specs.push(spec),
        }
        self
    }

    /// Register a cross-field check run after every entry type-checks
    pub fn add_check<F>(&mut self, check: F) -> &mut Self
    where
        F: Fn(&Parameters) -> Vec<String> + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(check));
        self
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Check presence and types, reporting every problem at once
    pub fn validate(&self, raw: &RawParameters, base_dir: &Path) -> Result<()> {
        self.resolve(raw, base_dir).map(|_| ())
    }

    /// Validate and produce typed parameters with defaults applied
    pub fn resolve(&self, raw: &RawParameters, base_dir: &Path) -> Result<Parameters> {
        let mut issues = Vec::new();
        let mut values = BTreeMap::new();

        for key in raw.keys() {
            if self.get(key).is_none() {
                warn!("Ignoring unknown parameter {}", key);
            }
        }

        let workdir = self.resolve_workdir(raw, base_dir);

        for spec in &self.specs {
            let coerced = match raw.get(&spec.name) {
                Some(value) => match coerce(spec, value) {
                    Ok(v) => Some(v),
                    Err(problem) => {
                        issues.push(format!("{}: {}", spec.name, problem));
                        continue;
                    }
                },
                None => spec.default.clone(),
            };

            match coerced {
                Some(ParamValue::Path(p)) => {
                    let resolved = if spec.name == "WORKDIR" {
                        workdir.clone()
                    } else {
                        absolutize(&workdir, &p)
                    };
                    values.insert(spec.name.clone(), ParamValue::Path(resolved));
                }
                Some(v) => {
                    values.insert(spec.name.clone(), v);
                }
                None if spec.required => {
                    issues.push(format!(
                        "{}: required {} is not set ({})",
                        spec.name,
                        describe_kind(spec),
                        spec.docstr
                    ));
                }
                None => {}
            }
        }

        let parameters = Parameters::from_values(values);

        if issues.is_empty() {
            for check in &self.checks {
                issues.extend(check(&parameters));
            }
        }

        if issues.is_empty() {
            Ok(parameters)
        } else {
            Err(validation_error(issues))
        }
    }

    /// WORKDIR anchors every relative path; a malformed value is reported
    /// by the regular coercion pass and falls back to `base_dir` here.
    fn resolve_workdir(&self, raw: &RawParameters, base_dir: &Path) -> PathBuf {
        match raw.get("WORKDIR").and_then(|v| v.as_str()) {
            Some(dir) if !dir.trim().is_empty() => absolutize(base_dir, Path::new(dir)),
            _ => base_dir.to_path_buf(),
        }
    }
}

fn describe_kind(spec: &ParamSpec) -> &'static str {
    match spec.kind {
        ParamKind::Par => "parameter",
        ParamKind::Path => "path",
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn validation_error(issues: Vec<String>) -> TomoflowError {
    let mut message = format!("{} parameter problem(s) found", issues.len());
    for issue in &issues {
        message.push_str("\n  - ");
        message.push_str(issue);
    }
    TomoflowError::configuration_with_code(ErrorCode::CONFIG_VALIDATION_FAILED, message, None)
}

/// Coerce a raw file/env value into the declared type
fn coerce(spec: &ParamSpec, value: &Value) -> std::result::Result<ParamValue, String> {
    let mismatch = || format!("expected {}, got {}", spec.param_type, value);

    match spec.param_type {
        ParamType::Str => match value {
            Value::String(s) => Ok(ParamValue::Str(s.clone())),
            Value::Number(n) => Ok(ParamValue::Str(n.to_string())),
            Value::Bool(b) => Ok(ParamValue::Str(b.to_string())),
            _ => Err(mismatch()),
        },
        ParamType::Int => match value {
            Value::Number(n) => n.as_i64().map(ParamValue::Int).ok_or_else(mismatch),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamType::Float => match value {
            Value::Number(n) => n.as_f64().map(ParamValue::Float).ok_or_else(mismatch),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamType::Bool => match value {
            Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(ParamValue::Bool(false)),
                Some(1) => Ok(ParamValue::Bool(true)),
                _ => Err(mismatch()),
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(ParamValue::Bool(true)),
                "false" | "no" | "0" => Ok(ParamValue::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        ParamType::Path => match value {
            Value::String(s) if !s.trim().is_empty() => Ok(ParamValue::Path(PathBuf::from(s))),
            _ => Err(mismatch()),
        },
    }
}
