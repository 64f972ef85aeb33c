//! JSON-Schema-like parameter validation for tool arguments (§4.4).
//!
//! Only the subset of JSON Schema the spec names is implemented: `required`,
//! `type`, `enum`, `minLength`/`maxLength`, and `additionalProperties: false`.
//! This mirrors the original's hand-rolled `validate_tool_params` rather than
//! pulling in a full JSON Schema validator crate — the registry only ever
//! validates against schemas it authored itself.

use serde_json::Value;

/// Validate `arguments` against `schema`. Returns a human-readable error
/// listing every violation found, or `Ok(())` if none.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };
    let Some(args_obj) = arguments.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    let mut errors = Vec::new();

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for req in required {
            if let Some(name) = req.as_str() {
                if !args_obj.contains_key(name) {
                    errors.push(format!("missing required parameter: {name}"));
                }
            }
        }
    }

    let properties = schema_obj
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if schema_obj.get("additionalProperties") == Some(&Value::Bool(false)) {
        for key in args_obj.keys() {
            if !properties.contains_key(key) {
                errors.push(format!("unknown parameter: {key}"));
            }
        }
    }

    for (name, value) in args_obj {
        let Some(prop_schema) = properties.get(name).and_then(Value::as_object) else {
            continue;
        };

        if let Some(expected_type) = prop_schema.get("type").and_then(Value::as_str) {
            if !matches_type(expected_type, value) {
                errors.push(format!(
                    "parameter '{name}' must be of type {expected_type}, got {}",
                    type_name(value)
                ));
                continue;
            }
        }

        if let Some(enum_values) = prop_schema.get("enum").and_then(Value::as_array) {
            if !enum_values.contains(value) {
                errors.push(format!("parameter '{name}' must be one of: {enum_values:?}"));
            }
        }

        if let Some(s) = value.as_str() {
            if let Some(min) = prop_schema.get("minLength").and_then(Value::as_u64) {
                if (s.chars().count() as u64) < min {
                    errors.push(format!("parameter '{name}' must be at least {min} characters"));
                }
            }
            if let Some(max) = prop_schema.get("maxLength").and_then(Value::as_u64) {
                if (s.chars().count() as u64) > max {
                    errors.push(format!("parameter '{name}' must be at most {max} characters"));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
