// ---------------------------------------------------------------------------
// Endpoint validation schemas
// ---------------------------------------------------------------------------
// A schema maps field names to rules: type, required, min/max, min/max
// length, pattern, enum, format, nested object schemas and array item rules.
// The first failure wins and reports the JSON path to the offending field.

use serde_json::Value;

/// Validate `body` against an endpoint validation schema. `Ok(())` when the
/// schema is empty or every rule passes; `Err` carries the field path.
pub fn validate_body(schema: &Value, body: &Value) -> Result<(), String> {
    let Some(fields) = schema.as_object() else {
        return Ok(());
    };
    validate_object(fields, body, "")
}

fn validate_object(
    fields: &serde_json::Map<String, Value>,
    body: &Value,
    prefix: &str,
) -> Result<(), String> {
    for (name, rule) in fields {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        let value = body.get(name);
        validate_field(rule, value, &path)?;
    }
    Ok(())
}

fn validate_field(rule: &Value, value: Option<&Value>, path: &str) -> Result<(), String> {
    let required = rule
        .get("required")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let Some(value) = value.filter(|v| !v.is_null()) else {
        if required {
            return Err(format!("{path}: field is required"));
        }
        return Ok(());
    };

    if let Some(expected) = rule.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(format!("{path}: expected type {expected}"));
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = rule.get("min").and_then(Value::as_f64) {
            if number < min {
                return Err(format!("{path}: below minimum {min}"));
            }
        }
        if let Some(max) = rule.get("max").and_then(Value::as_f64) {
            if number > max {
                return Err(format!("{path}: above maximum {max}"));
            }
        }
    }

    if let Some(text) = value.as_str() {
        if let Some(min) = rule.get("min_length").and_then(Value::as_u64) {
            if (text.chars().count() as u64) < min {
                return Err(format!("{path}: shorter than {min}"));
            }
        }
        if let Some(max) = rule.get("max_length").and_then(Value::as_u64) {
            if (text.chars().count() as u64) > max {
                return Err(format!("{path}: longer than {max}"));
            }
        }
        if let Some(pattern) = rule.get("pattern").and_then(Value::as_str) {
            match regex::Regex::new(pattern) {
                Ok(re) if !re.is_match(text) => {
                    return Err(format!("{path}: does not match pattern"));
                }
                _ => {}
            }
        }
        if let Some(format) = rule.get("format").and_then(Value::as_str) {
            if !format_matches(format, text) {
                return Err(format!("{path}: not a valid {format}"));
            }
        }
    }

    if let Some(allowed) = rule.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value not in enum"));
        }
    }

    if let Some(nested) = rule.get("nested").and_then(Value::as_object) {
        if !value.is_object() {
            return Err(format!("{path}: expected object"));
        }
        validate_object(nested, value, path)?;
    }

    if let Some(items) = rule.get("items") {
        let Some(array) = value.as_array() else {
            return Err(format!("{path}: expected array"));
        };
        for (i, item) in array.iter().enumerate() {
            validate_field(items, Some(item), &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn format_matches(format: &str, text: &str) -> bool {
    match format {
        "email" => {
            let Some((local, domain)) = text.split_once('@') else {
                return false;
            };
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        "uuid" => uuid::Uuid::parse_str(text).is_ok(),
        "date" => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
        "datetime" => chrono::DateTime::parse_from_rfc3339(text).is_ok(),
        "url" => url::Url::parse(text).is_ok(),
        _ => true,
    }
}
