//! Minimal JSON-schema checker for declarative `json_schema` tests.
//!
//! Supports the keywords acceptance suites actually use: `type`,
//! `properties`, `required`, `items`, `enum`, `pattern`, `minimum`,
//! `maximum`, `minItems`, `maxItems`, `minLength`, `maxLength` and boolean
//! `additionalProperties`. Unknown keywords are ignored, matching the
//! permissive end of schema validation.

use regex::Regex;
use serde_json::Value;

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(expected: &str, v: &Value) -> bool {
    match expected {
        // Every integer is a number.
        "number" => matches!(v, Value::Number(_)),
        other => type_name(v) == other,
    }
}

/// Validate `instance` against `schema`, returning the first violation as a
/// path-prefixed message.
pub fn validate(schema: &Value, instance: &Value) -> Result<(), String> {
    validate_at(schema, instance, "$")
}

fn validate_at(schema: &Value, instance: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        // A non-object schema accepts everything (boolean schemas degenerate
        // to permissive here).
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let accepted: Vec<&str> = match expected {
            Value::String(s) => vec![s.as_str()],
            Value::Array(options) => options.iter().filter_map(|v| v.as_str()).collect(),
            _ => vec![],
        };
        if !accepted.is_empty() && !accepted.iter().any(|t| type_matches(t, instance)) {
            return Err(format!(
                "{path}: expected type {}, got {}",
                accepted.join(" | "),
                type_name(instance)
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(instance) {
            return Err(format!("{path}: value not in enum"));
        }
    }

    if let Some(n) = instance.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{path}: {n} below minimum {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{path}: {n} above maximum {max}"));
            }
        }
    }

    if let Value::String(s) = instance {
        let len = s.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if len < min {
                return Err(format!("{path}: string shorter than {min}"));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                return Err(format!("{path}: string longer than {max}"));
            }
        }
        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            let re = Regex::new(pattern).map_err(|e| format!("{path}: bad pattern: {e}"))?;
            if !re.is_match(s) {
                return Err(format!("{path}: string does not match pattern"));
            }
        }
    }

    if let Value::Array(items) = instance {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                return Err(format!("{path}: fewer than {min} items"));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if (items.len() as u64) > max {
                return Err(format!("{path}: more than {max} items"));
            }
        }
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in items.iter().enumerate() {
                validate_at(item_schema, item, &format!("{path}[{i}]"))?;
            }
        }
    }

    if let Value::Object(map) = instance {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(name) {
                    return Err(format!("{path}: missing required property '{name}'"));
                }
            }
        }
        let properties = schema.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (name, prop_schema) in properties {
                if let Some(value) = map.get(name) {
                    validate_at(prop_schema, value, &format!("{path}.{name}"))?;
                }
            }
        }
        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            for key in map.keys() {
                if properties.map(|p| !p.contains_key(key)).unwrap_or(true) {
                    return Err(format!("{path}: unexpected property '{key}'"));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_and_required() {
        let schema = json!({
            "type": "object",
            "required": ["records"],
            "properties": {"records": {"type": "array", "items": {"type": "object"}}}
        });
        assert!(validate(&schema, &json!({"records": [{}, {}]})).is_ok());
        assert!(validate(&schema, &json!({"records": "nope"})).is_err());
        assert!(validate(&schema, &json!({})).is_err());
    }

    #[test]
    fn integer_is_a_number() {
        assert!(validate(&json!({"type": "number"}), &json!(3)).is_ok());
        assert!(validate(&json!({"type": "integer"}), &json!(3.5)).is_err());
    }

    #[test]
    fn bounds_and_pattern() {
        assert!(validate(&json!({"minimum": 1, "maximum": 5}), &json!(3)).is_ok());
        assert!(validate(&json!({"minimum": 1}), &json!(0)).is_err());
        assert!(validate(&json!({"pattern": "^[a-z]+$"}), &json!("abc")).is_ok());
        assert!(validate(&json!({"pattern": "^[a-z]+$"}), &json!("Abc")).is_err());
        assert!(validate(&json!({"minItems": 2}), &json!([1])).is_err());
    }

    #[test]
    fn additional_properties_false() {
        let schema = json!({"properties": {"a": {}}, "additionalProperties": false});
        assert!(validate(&schema, &json!({"a": 1})).is_ok());
        assert!(validate(&schema, &json!({"a": 1, "b": 2})).is_err());
    }

    #[test]
    fn error_paths_name_the_location() {
        let schema = json!({"properties": {"rows": {"items": {"type": "integer"}}}});
        let err = validate(&schema, &json!({"rows": [1, "x"]})).unwrap_err();
        assert!(err.contains("$.rows[1]"), "{err}");
    }
}
