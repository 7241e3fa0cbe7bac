//! Structural argument validation against a tool's JSON schema.
//!
//! Only the subset tools actually declare is checked: top-level `type: object`,
//! `required`, per-property `type` and `enum`, and `additionalProperties`.
//! Unknown arguments are rejected unless the schema sets
//! `additionalProperties: true`.

use serde_json::Value;

/// Validate `args` against `schema`, returning a human-readable reason on
/// failure. The reason is what the model sees, so it names the field.
pub fn validate(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Err(format!(
            "arguments must be a JSON object, got {}",
            type_name(args)
        ));
    };

    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|field| obj.get(*field).is_none_or(Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required argument(s): {}", missing.join(", ")));
        }
    }

    let allow_additional = schema
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    for (key, value) in obj {
        let Some(prop) = properties.and_then(|p| p.get(key)) else {
            if allow_additional {
                continue;
            }
            return Err(format!("unknown argument '{key}'"));
        };

        // Optional fields may be sent as explicit null.
        if value.is_null() {
            continue;
        }

        if let Some(expected) = prop.get("type")
            && !matches_type(expected, value)
        {
            return Err(format!(
                "argument '{key}' must be of type {}, got {}",
                describe_type(expected),
                type_name(value)
            ));
        }

        if let Some(allowed) = prop.get("enum").and_then(Value::as_array)
            && !allowed.contains(value)
        {
            return Err(format!("argument '{key}' must be one of {}", Value::Array(allowed.clone())));
        }
    }

    Ok(())
}

fn matches_type(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(t) => matches_named(t, value),
        Value::Array(options) => options
            .iter()
            .filter_map(Value::as_str)
            .any(|t| matches_named(t, value)),
        // Unrecognised type declarations are not enforced.
        _ => true,
    }
}

fn matches_named(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        Value::Array(options) => options
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
