use crate::error::{ErrorCode, Result, TomoflowError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Prefix for environment variables overriding parameter-file entries
pub const ENV_PREFIX: &str = "TOMOFLOW_PAR_";

/// Untyped parameter values as read from the parameter file and environment
///
/// Keys are normalized to upper case. Null values (an empty YAML entry) are
/// treated as unset so that declared defaults apply.
#[derive(Debug, Clone, Default)]
pub struct RawParameters {
    values: BTreeMap<String, Value>,
}

impl RawParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML parameter file, or TOML when the extension is `.toml`
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_NOT_FOUND,
                format!("parameter file {} does not exist", path.display()),
                None,
            ));
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_NOT_FOUND,
                format!("failed to read parameter file {}", path.display()),
                None,
            )
            .with_source(e)
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let raw = if is_toml {
            Self::parse_toml(&content)
        } else {
            Self::parse_yaml(&content)
        }
        .map_err(|e| e.with_context(path.display()))?;

        debug!(
            "Loaded {} parameter entries from {}",
            raw.values.len(),
            path.display()
        );
        Ok(raw)
    }

    pub fn parse_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::new());
        }
        let map: BTreeMap<String, Value> = serde_yaml::from_str(content).map_err(|e| {
            TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_PARSE_ERROR,
                "invalid YAML parameter file",
                None,
            )
            .with_source(e)
        })?;
        Ok(Self::from_map(map))
    }

    pub fn parse_toml(content: &str) -> Result<Self> {
        let map: BTreeMap<String, Value> = toml::from_str(content).map_err(|e| {
            TomoflowError::configuration_with_code(
                ErrorCode::CONFIG_PARSE_ERROR,
                "invalid TOML parameter file",
                None,
            )
            .with_source(e)
        })?;
        Ok(Self::from_map(map))
    }

    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        let mut raw = Self::new();
        for (key, value) in map {
            raw.set(&key, value);
        }
        raw
    }

    /// Set a value; a null clears the entry
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let key = key.trim().to_ascii_uppercase();
        match value.into() {
            Value::Null => {
                self.values.remove(&key);
            }
            value => {
                self.values.insert(key, value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Apply `TOMOFLOW_PAR_<NAME>` overrides from the process environment
    pub fn merge_env_vars(&mut self) {
        self.merge_env_from(std::env::vars());
    }

    /// Apply overrides from an explicit variable list
    pub fn merge_env_from<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(ENV_PREFIX) {
                if name.is_empty() {
                    continue;
                }
                debug!("Parameter {} overridden from environment", name);
                self.set(name, Value::String(value));
            }
        }
    }
}
