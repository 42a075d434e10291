//! Sensitive-field masking for observability surfaces.
//!
//! The pipeline caches a redacted copy of each call's validated inputs on the
//! context so logs and spans can reference inputs without leaking secrets.
//! Redaction never mutates its input and is idempotent.

use serde_json::Value;

use crate::types::JsonMap;

/// Replacement for masked values.
pub const MASK: &str = "***";

/// Key prefix that is always masked, schema or not.
pub const SECRET_PREFIX: &str = "_secret_";

fn schema_marks_sensitive(schema: &Value) -> bool {
    schema
        .get("x-sensitive")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn property_schema<'a>(schema: &'a Value, key: &str) -> &'a Value {
    schema
        .get("properties")
        .and_then(|props| props.get(key))
        .unwrap_or(&Value::Null)
}

fn redact_value(value: &Value, schema: &Value) -> Value {
    if schema_marks_sensitive(schema) {
        return Value::String(MASK.to_string());
    }
    match value {
        Value::Object(map) => Value::Object(redact_object(map, schema)),
        Value::Array(items) => {
            let item_schema = schema.get("items").unwrap_or(&Value::Null);
            Value::Array(
                items
                    .iter()
                    .map(|item| redact_value(item, item_schema))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

fn redact_object(map: &JsonMap, schema: &Value) -> JsonMap {
    map.iter()
        .map(|(key, value)| {
            if key.starts_with(SECRET_PREFIX) {
                return (key.clone(), Value::String(MASK.to_string()));
            }
            (key.clone(), redact_value(value, property_schema(schema, key)))
        })
        .collect()
}

/// Produce a deep copy of `data` with sensitive fields masked.
///
/// A field is masked when its schema property carries `x-sensitive: true`, or
/// when its key starts with `_secret_` regardless of schema. Nested object
/// properties and array item schemas are walked recursively.
///
/// # Examples
///
/// ```rust
/// use apcore::redact::redact_sensitive;
/// use serde_json::json;
///
/// let schema = json!({
///     "type": "object",
///     "properties": { "password": { "type": "string", "x-sensitive": true } },
/// });
/// let inputs = json!({ "user": "u", "password": "p", "_secret_key": "k" });
/// let redacted = redact_sensitive(inputs.as_object().unwrap(), &schema);
///
/// assert_eq!(redacted["user"], json!("u"));
/// assert_eq!(redacted["password"], json!("***"));
/// assert_eq!(redacted["_secret_key"], json!("***"));
/// ```
#[must_use]
pub fn redact_sensitive(data: &JsonMap, schema: &Value) -> JsonMap {
    redact_object(data, schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_and_array_redaction() {
        let schema = json!({
            "properties": {
                "account": {
                    "properties": { "token": { "x-sensitive": true } },
                },
                "keys": { "items": { "x-sensitive": true } },
            },
        });
        let data = json!({
            "account": { "token": "t0", "name": "n" },
            "keys": ["k1", "k2"],
        });
        let redacted = redact_sensitive(data.as_object().unwrap(), &schema);
        assert_eq!(redacted["account"]["token"], json!("***"));
        assert_eq!(redacted["account"]["name"], json!("n"));
        assert_eq!(redacted["keys"], json!(["***", "***"]));
    }

    #[test]
    fn original_is_untouched_and_redaction_is_idempotent() {
        let schema = json!({
            "properties": { "password": { "x-sensitive": true } },
        });
        let data = json!({ "password": "p", "_secret_x": 1, "plain": true });
        let map = data.as_object().unwrap();
        let once = redact_sensitive(map, &schema);
        assert_eq!(map["password"], json!("p"));
        let twice = redact_sensitive(&once, &schema);
        assert_eq!(once, twice);
    }
}
