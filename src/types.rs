//! Core type aliases for the apcore pipeline.
//!
//! Module inputs, outputs, and schemas all travel as `serde_json` values; the
//! aliases here name the two shapes that appear on nearly every seam.

use serde_json::Value;

/// JSON object mapping: the shape of module inputs, outputs, error details,
/// and middleware replacement values.
pub type JsonMap = serde_json::Map<String, Value>;

/// Boxed error carried by module bodies, middleware hooks, and approval
/// handlers before the pipeline types them.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
