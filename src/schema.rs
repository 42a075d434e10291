//! Schema validation seam.
//!
//! The executor validates module inputs and outputs through the
//! [`SchemaValidator`] trait; the subsystem behind it is pluggable. The
//! bundled [`StructuralValidator`] performs a structural check against
//! JSON-Schema-shaped documents (`type` / `properties` / `required` /
//! `items`) with an optional coercion pass, which is enough for the pipeline
//! and its tests to stand on their own.

use std::fmt;

use serde::Serialize;
use serde_json::{Number, Value};

use crate::config::Config;
use crate::types::JsonMap;

/// Which side of a call failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaSide {
    Input,
    Output,
}

impl fmt::Display for SchemaSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaSide::Input => write!(f, "inputs"),
            SchemaSide::Output => write!(f, "outputs"),
        }
    }
}

/// One per-path validation finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchemaIssue {
    /// Dot path of the offending value, relative to the data root.
    pub path: String,
    /// Human-readable description of the mismatch.
    pub message: String,
}

impl SchemaIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Structural check/coerce of a data mapping against a schema document.
///
/// Implementations return the validated (possibly coerced) mapping, or the
/// full list of per-path issues. They must not mutate the input.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema: &Value, data: &JsonMap) -> Result<JsonMap, Vec<SchemaIssue>>;
}

/// How the [`StructuralValidator`] treats recoverable type mismatches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValidationStrategy {
    /// Reject any type mismatch.
    Strict,
    /// Coerce where lossless (string↔number, `"true"`/`"false"`→bool,
    /// whole floats→integers); reject otherwise.
    #[default]
    Coerce,
}

impl ValidationStrategy {
    /// Read `schema.strategy` from config (`"strict"` or `"coerce"`).
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        match config.get_str("schema.strategy") {
            Some("strict") => ValidationStrategy::Strict,
            _ => ValidationStrategy::default(),
        }
    }
}

/// The bundled structural validator.
#[derive(Clone, Debug, Default)]
pub struct StructuralValidator {
    strategy: ValidationStrategy,
}

impl StructuralValidator {
    #[must_use]
    pub fn new(strategy: ValidationStrategy) -> Self {
        Self { strategy }
    }

    fn join(path: &str, key: &str) -> String {
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{path}.{key}")
        }
    }

    fn check_object(
        &self,
        schema: &Value,
        data: &JsonMap,
        path: &str,
        issues: &mut Vec<SchemaIssue>,
    ) -> JsonMap {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !data.contains_key(key) {
                    issues.push(SchemaIssue::new(
                        Self::join(path, key),
                        "required property is missing",
                    ));
                }
            }
        }
        let properties = schema.get("properties").and_then(Value::as_object);
        data.iter()
            .map(|(key, value)| {
                let checked = match properties.and_then(|props| props.get(key)) {
                    Some(prop_schema) => {
                        self.check_value(prop_schema, value, &Self::join(path, key), issues)
                    }
                    // unknown properties pass through untouched
                    None => value.clone(),
                };
                (key.clone(), checked)
            })
            .collect()
    }

    fn check_value(
        &self,
        schema: &Value,
        value: &Value,
        path: &str,
        issues: &mut Vec<SchemaIssue>,
    ) -> Value {
        let Some(expected) = schema.get("type").and_then(Value::as_str) else {
            return value.clone();
        };
        match expected {
            "object" => match value.as_object() {
                Some(map) => Value::Object(self.check_object(schema, map, path, issues)),
                None => {
                    issues.push(SchemaIssue::new(path, "expected object"));
                    value.clone()
                }
            },
            "array" => match value.as_array() {
                Some(items) => {
                    let item_schema = schema.get("items");
                    Value::Array(
                        items
                            .iter()
                            .enumerate()
                            .map(|(index, item)| match item_schema {
                                Some(inner) => self.check_value(
                                    inner,
                                    item,
                                    &Self::join(path, &index.to_string()),
                                    issues,
                                ),
                                None => item.clone(),
                            })
                            .collect(),
                    )
                }
                None => {
                    issues.push(SchemaIssue::new(path, "expected array"));
                    value.clone()
                }
            },
            "string" => self.check_scalar(value, path, issues, "string", coerce_string),
            "number" => self.check_scalar(value, path, issues, "number", coerce_number),
            "integer" => self.check_scalar(value, path, issues, "integer", coerce_integer),
            "boolean" => self.check_scalar(value, path, issues, "boolean", coerce_boolean),
            "null" => {
                if value.is_null() {
                    Value::Null
                } else {
                    issues.push(SchemaIssue::new(path, "expected null"));
                    value.clone()
                }
            }
            other => {
                issues.push(SchemaIssue::new(path, format!("unknown schema type: {other}")));
                value.clone()
            }
        }
    }

    fn check_scalar(
        &self,
        value: &Value,
        path: &str,
        issues: &mut Vec<SchemaIssue>,
        expected: &str,
        coerce: fn(&Value) -> Option<Value>,
    ) -> Value {
        if scalar_matches(value, expected) {
            return value.clone();
        }
        if self.strategy == ValidationStrategy::Coerce
            && let Some(coerced) = coerce(value)
        {
            return coerced;
        }
        issues.push(SchemaIssue::new(path, format!("expected {expected}")));
        value.clone()
    }
}

fn scalar_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        _ => false,
    }
}

fn coerce_string(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => s.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number),
        _ => None,
    }
}

fn coerce_integer(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => s.parse::<i64>().ok().map(|n| Value::Number(n.into())),
        Value::Number(n) => {
            let f = n.as_f64()?;
            (f.fract() == 0.0).then(|| Value::Number((f as i64).into()))
        }
        _ => None,
    }
}

fn coerce_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) if s == "true" => Some(Value::Bool(true)),
        Value::String(s) if s == "false" => Some(Value::Bool(false)),
        _ => None,
    }
}

impl SchemaValidator for StructuralValidator {
    fn validate(&self, schema: &Value, data: &JsonMap) -> Result<JsonMap, Vec<SchemaIssue>> {
        let mut issues = Vec::new();
        let validated = self.check_object(schema, data, "", &mut issues);
        if issues.is_empty() {
            Ok(validated)
        } else {
            Err(issues)
        }
    }
}
