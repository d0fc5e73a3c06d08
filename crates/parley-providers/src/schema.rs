//! Structural argument checks against a capability's cached input schema.
//!
//! Only the subset of JSON Schema providers commonly advertise is checked:
//! the top-level object shape, `required` keys, and primitive `type`s of
//! declared properties. Anything else is passed through to the provider.

use serde_json::Value;

/// Validate invocation arguments, returning a human-readable reason on mismatch.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };
    if let Some(expected) = schema.get("type")
        && !type_matches(expected, arguments)
    {
        return Err(format!(
            "expected {} arguments, got {}",
            describe_type(expected),
            value_type(arguments)
        ));
    }
    let Some(arguments) = arguments.as_object() else {
        return Ok(());
    };

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for key in required {
        if !arguments.contains_key(key) {
            return Err(format!("missing required argument '{key}'"));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in arguments {
        let Some(expected) = properties.get(key).and_then(|property| property.get("type")) else {
            continue;
        };
        if !type_matches(expected, value) {
            return Err(format!(
                "argument '{key}' should be {}, got {}",
                describe_type(expected),
                value_type(value)
            ));
        }
    }
    Ok(())
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => primitive_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| primitive_matches(name, value)),
        _ => true,
    }
}

fn primitive_matches(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|number| number.fract() == 0.0)
        }
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
