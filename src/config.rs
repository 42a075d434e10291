//! Immutable configuration with dot-path access.
//!
//! A [`Config`] wraps a JSON document. `get("executor.max_depth")` walks the
//! dot-separated segments; a missing segment or a non-object intermediate
//! (including `null`) yields `None`, so callers always fall back to their
//! defaults instead of erroring.

use std::path::Path;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// Errors raised when loading configuration from disk.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    #[diagnostic(code(apcore::config::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {path}")]
    #[diagnostic(code(apcore::config::parse))]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Immutable nested configuration mapping.
///
/// # Examples
///
/// ```rust
/// use apcore::config::Config;
/// use serde_json::json;
///
/// let config = Config::from_value(json!({
///     "executor": { "max_depth": 8, "frequency": { "window_ms": 1000 } },
/// }));
///
/// assert_eq!(config.get_u64("executor.max_depth"), Some(8));
/// assert_eq!(config.get_u64("executor.frequency.window_ms"), Some(1000));
/// assert_eq!(config.get_u64("executor.missing"), None);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Config {
    root: Value,
}

impl Config {
    /// Wrap an already-parsed JSON document.
    #[must_use]
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let root = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Resolve a config file path from the `APCORE_CONFIG` environment
    /// variable (loading `.env` first) and parse it; an empty config when the
    /// variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        match std::env::var("APCORE_CONFIG") {
            Ok(path) => Self::from_file(path),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Walk `dot_path` through the document.
    #[must_use]
    pub fn get(&self, dot_path: &str) -> Option<&Value> {
        if dot_path.is_empty() {
            return Some(&self.root);
        }
        let mut current = &self.root;
        for segment in dot_path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Walk `dot_path`, falling back to `default` on any miss.
    #[must_use]
    pub fn get_or<'a>(&'a self, dot_path: &str, default: &'a Value) -> &'a Value {
        self.get(dot_path).unwrap_or(default)
    }

    #[must_use]
    pub fn get_u64(&self, dot_path: &str) -> Option<u64> {
        self.get(dot_path).and_then(Value::as_u64)
    }

    #[must_use]
    pub fn get_f64(&self, dot_path: &str) -> Option<f64> {
        self.get(dot_path).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn get_bool(&self, dot_path: &str) -> Option<bool> {
        self.get(dot_path).and_then(Value::as_bool)
    }

    #[must_use]
    pub fn get_str(&self, dot_path: &str) -> Option<&str> {
        self.get(dot_path).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get_array(&self, dot_path: &str) -> Option<&Vec<Value>> {
        self.get(dot_path).and_then(Value::as_array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn traversal_stops_at_non_objects() {
        let config = Config::from_value(json!({
            "a": { "b": null, "c": 5, "d": { "e": "x" } },
        }));
        assert_eq!(config.get("a.d.e"), Some(&json!("x")));
        // null and scalar intermediates both miss
        assert_eq!(config.get("a.b.deeper"), None);
        assert_eq!(config.get("a.c.deeper"), None);
        assert_eq!(config.get("missing"), None);
    }

    #[test]
    fn typed_getters_fall_back() {
        let config = Config::from_value(json!({ "logging": { "level": "debug" } }));
        assert_eq!(config.get_str("logging.level"), Some("debug"));
        assert_eq!(config.get_u64("logging.level"), None);
        assert_eq!(
            config.get_or("logging.format", &json!("text")),
            &json!("text")
        );
    }
}
