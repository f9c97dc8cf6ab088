// Type coercion for service inputs

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot coerce {value} to {target}")]
pub struct CoercionError {
    pub value: Value,
    pub target: &'static str,
}

impl CoercionError {
    fn new(value: &Value, target: &'static str) -> Self {
        Self {
            value: value.clone(),
            target,
        }
    }
}

/// Render any value as a string. `null` becomes the empty string.
pub fn to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Integers pass through, floats truncate and strings are parsed.
pub fn to_int(value: &Value) -> Result<i64, CoercionError> {
    match value {
        Value::Null => Ok(0),
        Value::Bool(flag) => Ok(i64::from(*flag)),
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.trunc() as i64))
            .ok_or_else(|| CoercionError::new(value, "int")),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .or_else(|_| text.parse::<f64>().map(|float| float.trunc() as i64))
                .map_err(|_| CoercionError::new(value, "int"))
        }
        _ => Err(CoercionError::new(value, "int")),
    }
}

pub fn to_float(value: &Value) -> Result<f64, CoercionError> {
    match value {
        Value::Null => Ok(0.0),
        Value::Bool(flag) => Ok(if *flag { 1.0 } else { 0.0 }),
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| CoercionError::new(value, "float")),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| CoercionError::new(value, "float")),
        _ => Err(CoercionError::new(value, "float")),
    }
}

pub fn to_bool(value: &Value) -> Result<bool, CoercionError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => Ok(number.as_f64().map_or(false, |n| n != 0.0)),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" | "" => Ok(false),
            _ => Err(CoercionError::new(value, "bool")),
        },
        _ => Err(CoercionError::new(value, "bool")),
    }
}
