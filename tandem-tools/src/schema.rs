//! Argument validation against the JSON-schema subset tools declare.
//!
//! Only the shapes tools actually use are checked: required fields and
//! primitive types. Anything richer in an MCP server's schema is passed
//! through untouched.

use serde_json::Value;

use crate::error::{ToolError, ToolResult};

pub fn validate_arguments(schema: &Value, arguments: &Value) -> ToolResult<()> {
    let Some(args) = arguments.as_object() else {
        return Err(ToolError::InvalidArguments(
            "arguments must be an object".to_string(),
        ));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(ToolError::InvalidArguments(format!(
                    "missing required field '{field}'"
                )));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, value) in args {
            let Some(expected) = properties
                .get(name)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(ToolError::InvalidArguments(format!(
                    "field '{name}' should be of type {expected}"
                )));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "limit": {"type": "integer"},
                "ratio": {"type": "number"},
                "all": {"type": "boolean"},
            },
            "required": ["path"],
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({"path": "a.txt", "limit": 10, "ratio": 0.5, "all": true});
        assert!(validate_arguments(&schema(), &args).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate_arguments(&schema(), &json!({"limit": 10})).unwrap_err();
        assert!(err.to_string().contains("path"));
    }

    #[test]
    fn rejects_type_mismatches() {
        for args in [
            json!({"path": 42}),
            json!({"path": "x", "limit": "ten"}),
            json!({"path": "x", "all": "yes"}),
            json!({"path": "x", "limit": 1.5}),
        ] {
            assert!(validate_arguments(&schema(), &args).is_err(), "{args}");
        }
    }

    #[test]
    fn rejects_non_object_arguments() {
        assert!(validate_arguments(&schema(), &json!("just a string")).is_err());
    }

    #[test]
    fn unknown_fields_pass_through() {
        let args = json!({"path": "a", "extra": [1, 2]});
        assert!(validate_arguments(&schema(), &args).is_ok());
    }
}
