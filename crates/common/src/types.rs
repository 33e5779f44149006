use serde_json::{Map, Value};

/// A single row as it travels through the pipeline, keyed by field name.
pub type Record = Map<String, Value>;

/// Small conveniences over [`Record`] used by every stage.
pub trait RecordExt {
    /// Field value rendered as a lookup key (`1` and `"1"` both become `"1"`).
    /// Null, missing, arrays and objects yield `None`.
    fn key_string(&self, field: &str) -> Option<String>;

    /// True when the field is absent, null or an empty/blank string.
    fn is_blank(&self, field: &str) -> bool;
}

impl RecordExt for Record {
    fn key_string(&self, field: &str) -> Option<String> {
        self.get(field).and_then(value_key)
    }

    fn is_blank(&self, field: &str) -> bool {
        match self.get(field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// Render a scalar JSON value as a key string.
pub fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Build a [`Record`] from a `serde_json::json!` object literal. Non-object
/// values produce an empty record.
pub fn record_from(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_string_keys_render_the_same() {
        let a = record_from(json!({"legacy_id": 42}));
        let b = record_from(json!({"legacy_id": "42"}));
        assert_eq!(a.key_string("legacy_id"), b.key_string("legacy_id"));
        assert_eq!(a.key_string("missing"), None);
    }

    #[test]
    fn blank_detection() {
        let r = record_from(json!({"a": "  ", "b": null, "c": 0}));
        assert!(r.is_blank("a"));
        assert!(r.is_blank("b"));
        assert!(r.is_blank("zzz"));
        assert!(!r.is_blank("c"));
    }
}
