//! Value serialization helpers
#![allow(clippy::must_use_candidate)]

use serde_json::Value;

/// Render a value as text.
///
/// Strings are emitted raw; every other value is emitted as compact JSON.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a value as bytes, following the same rules as [`to_text`].
pub fn to_bytes(value: &Value) -> Vec<u8> {
    to_text(value).into_bytes()
}

/// Short type name used in error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strings_are_raw() {
        assert_eq!(to_text(&json!("bar")), "bar");
        assert_eq!(to_bytes(&json!("bar")), b"bar");
    }

    #[test]
    fn test_structured_values_are_json() {
        assert_eq!(to_text(&json!({"a": [1, true]})), r#"{"a":[1,true]}"#);
        assert_eq!(to_text(&json!(null)), "null");
        assert_eq!(to_text(&json!(2.5)), "2.5");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(&json!({})), "object");
        assert_eq!(type_name(&json!([])), "array");
        assert_eq!(type_name(&json!(1)), "number");
    }
}
