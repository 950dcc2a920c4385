//! Shared aliases used across the runtime.

pub use serde_json::Value as JsonValue;

/// JSON object as stored in contexts, configs and mod variables
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// Coerce a value to a boolean the way mod authors expect from template output.
///
/// Strings are truthy only when they spell an affirmative (`"true"`, `"yes"`,
/// `"on"`, `"1"`, ...), so a rendered `"false"` is falsy. Numbers are truthy
/// when non-zero. Everything else (null, arrays, objects) is falsy.
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        JsonValue::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "yes" | "y" | "on" | "1"
        ),
        _ => false,
    }
}
