use crate::config::error::ConfigError;
use serde_json::{Map, Value};

///  ---------------- Helper Traits  ----------------
pub trait ConfigName {
    fn name(&self) -> &str;
}

/// Check a component's config blob for the fields it cannot work without.
pub trait RequireFields {
    fn require_fields(&self, owner: &str, required: &[&str]) -> Result<(), ConfigError>;
}

impl RequireFields for Map<String, Value> {
    fn require_fields(&self, owner: &str, required: &[&str]) -> Result<(), ConfigError> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|field| matches!(self.get(*field), None | Some(Value::Null)))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::missing_fields(owner, &missing))
        }
    }
}

impl RequireFields for Value {
    fn require_fields(&self, owner: &str, required: &[&str]) -> Result<(), ConfigError> {
        match self {
            Value::Object(map) => map.require_fields(owner, required),
            _ => Err(ConfigError::missing_fields(owner, required)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reports_exactly_the_missing_fields() {
        let cfg = json!({"table": "Artikel", "page_size": null});
        let err = cfg
            .require_fields("LegacyApiExtractor", &["table", "key_field", "page_size"])
            .unwrap_err();
        match err {
            ConfigError::MissingFields { context } => assert_eq!(
                context.message(),
                "LegacyApiExtractor is missing required config fields: key_field, page_size"
            ),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn complete_config_passes() {
        let cfg = json!({"table": "Kunden"});
        assert!(cfg.require_fields("x", &["table"]).is_ok());
    }
}
