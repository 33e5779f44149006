//! Named field transforms usable from mapping config.

use super::{FieldTransform, TransformContext};
use common::sanitize::clean_float;
use serde_json::Value;
use std::sync::Arc;

pub const BUILTIN_NAMES: &[&str] = &[
    "trim",
    "lowercase",
    "uppercase",
    "to_string",
    "to_int",
    "to_float",
    "to_bool",
    "null_if_empty",
];

pub fn builtin(name: &str) -> Option<FieldTransform> {
    let f: fn(&Value) -> Result<Value, String> = match name {
        "trim" => |v| Ok(map_str(v, |s| s.trim().to_string())),
        "lowercase" => |v| Ok(map_str(v, str::to_lowercase)),
        "uppercase" => |v| Ok(map_str(v, str::to_uppercase)),
        "to_string" => to_string,
        "to_int" => to_int,
        "to_float" => to_float,
        "to_bool" => to_bool,
        "null_if_empty" => |v| {
            Ok(match v {
                Value::String(s) if s.trim().is_empty() => Value::Null,
                other => other.clone(),
            })
        },
        _ => return None,
    };
    Some(Arc::new(move |v: &Value, _: &TransformContext<'_>| f(v)))
}

fn map_str(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}

fn to_string(value: &Value) -> Result<Value, String> {
    Ok(match value {
        Value::Null | Value::String(_) => value.clone(),
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => Value::String(other.to_string()),
    })
}

/// Legacy exports use a decimal comma.
fn parse_decimal(s: &str) -> Option<f64> {
    let s = s.trim();
    s.parse::<f64>()
        .ok()
        .or_else(|| s.replace(',', ".").parse::<f64>().ok())
}

fn to_int(value: &Value) -> Result<Value, String> {
    let as_whole = |f: f64| {
        if f.is_finite() && f.fract() == 0.0 {
            Ok(Value::from(f as i64))
        } else {
            Err(format!("{value} is not a whole number"))
        }
    };
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => as_whole(n.as_f64().unwrap_or(f64::NAN)),
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => Ok(Value::from(n)),
            Err(_) => parse_decimal(s)
                .map(as_whole)
                .unwrap_or_else(|| Err(format!("'{s}' is not an integer"))),
        },
        other => Err(format!("{other} is not an integer")),
    }
}

fn to_float(value: &Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => Ok(clean_float(n.as_f64().unwrap_or(f64::NAN))),
        Value::Bool(b) => Ok(clean_float(if *b { 1.0 } else { 0.0 })),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => parse_decimal(s)
            .map(clean_float)
            .ok_or_else(|| format!("'{s}' is not a number")),
        other => Err(format!("{other} is not a number")),
    }
}

fn to_bool(value: &Value) -> Result<Value, String> {
    match value {
        Value::Null | Value::Bool(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "ja" | "j" | "x" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "n" | "nein" | "" => Ok(Value::Bool(false)),
            other => Err(format!("'{other}' is not a boolean")),
        },
        other => Err(format!("{other} is not a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Record;
    use serde_json::json;

    fn apply(name: &str, value: Value) -> Result<Value, String> {
        let record = Record::new();
        let ctx = TransformContext {
            field: "f",
            entity_type: "product",
            record: &record,
        };
        builtin(name).unwrap()(&value, &ctx)
    }

    #[test]
    fn every_listed_name_resolves() {
        assert!(BUILTIN_NAMES.iter().all(|n| builtin(n).is_some()));
        assert!(builtin("rot13").is_none());
    }

    #[test]
    fn numeric_conversions_accept_legacy_formats() {
        assert_eq!(apply("to_float", json!("12,50")), Ok(json!(12.5)));
        assert_eq!(apply("to_int", json!(" 42 ")), Ok(json!(42)));
        assert_eq!(apply("to_int", json!("3,0")), Ok(json!(3)));
        assert!(apply("to_int", json!(2.5)).is_err());
        assert_eq!(apply("to_float", json!("")), Ok(Value::Null));
    }

    #[test]
    fn string_helpers() {
        assert_eq!(apply("trim", json!("  a ")), Ok(json!("a")));
        assert_eq!(apply("uppercase", json!("ab")), Ok(json!("AB")));
        assert_eq!(apply("null_if_empty", json!(" ")), Ok(Value::Null));
        assert_eq!(apply("to_bool", json!("Ja")), Ok(json!(true)));
        assert_eq!(apply("to_string", json!(7)), Ok(json!("7")));
    }
}
