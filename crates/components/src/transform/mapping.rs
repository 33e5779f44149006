use super::builtins::{builtin, BUILTIN_NAMES};
use super::{
    CustomCheck, FieldMapping, TransformError, TransformedRecord, Transformer, ValidationRule,
};
use common::config::traits::RequireFields;
use common::Record;
use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
struct TransformerSpec {
    field: String,
    transform: String,
}

/// Config-driven transformer.
///
/// Reads from the mapping's config:
///
/// ```yaml
/// field_mappings: { legacy_id: ArtNr, name: ArtBez }
/// custom_transformers:
///   - { field: name, transform: trim }
/// validation_rules:
///   - { field: name, check: required }
/// defaults: { is_active: true }
/// ```
pub struct MappingTransformer {
    entity_type: String,
    mapping: FieldMapping,
    defaults: Map<String, Value>,
}

impl MappingTransformer {
    pub fn new(entity_type: impl Into<String>, mapping: FieldMapping) -> Self {
        Self {
            entity_type: entity_type.into(),
            mapping,
            defaults: Map::new(),
        }
    }

    pub fn from_config(entity_type: &str, config: &Value) -> Result<Self, TransformError> {
        config.require_fields("MappingTransformer", &["field_mappings"])?;

        let mut mapping = FieldMapping::new();
        let pairs = config
            .get("field_mappings")
            .and_then(Value::as_object)
            .ok_or_else(|| TransformError::config("field_mappings must be a map of target: source"))?;
        for (target, source) in pairs {
            let source = source.as_str().ok_or_else(|| {
                TransformError::config(format!("field_mappings.{target} must name a source field"))
            })?;
            mapping = mapping.map(target, source);
        }

        if let Some(specs) = config.get("custom_transformers") {
            let specs: Vec<TransformerSpec> = serde_json::from_value(specs.clone())
                .map_err(|e| TransformError::config(format!("custom_transformers: {e}")))?;
            for spec in specs {
                let f = builtin(&spec.transform).ok_or_else(|| {
                    TransformError::config(format!(
                        "unknown transform '{}' for field '{}', expected one of: {}",
                        spec.transform,
                        spec.field,
                        BUILTIN_NAMES.join(", ")
                    ))
                })?;
                mapping = mapping.with_transformer(spec.field, f);
            }
        }

        if let Some(rules) = config.get("validation_rules") {
            let rules: Vec<ValidationRule> = serde_json::from_value(rules.clone())
                .map_err(|e| TransformError::config(format!("validation_rules: {e}")))?;
            for rule in rules {
                mapping = mapping.with_rule(rule)?;
            }
        }

        let defaults = match config.get("defaults") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(TransformError::config("defaults must be a map")),
        };

        Ok(Self {
            entity_type: entity_type.to_string(),
            mapping,
            defaults,
        })
    }

    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn register_check(&mut self, name: impl Into<String>, check: CustomCheck) {
        self.mapping.register_check(name, check);
    }

    pub fn field_mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn transform_one(&self, source: &Record) -> TransformedRecord {
        let mut target = self.mapping.apply_field_mappings(source);
        for (field, value) in &self.defaults {
            if matches!(target.get(field), None | Some(Value::Null)) {
                target.insert(field.clone(), value.clone());
            }
        }

        let target = match self
            .mapping
            .apply_custom_transformers(target, &self.entity_type)
        {
            Ok(target) => target,
            Err(err) => return TransformedRecord::failed(source.clone(), vec![err.to_string()]),
        };

        let errors: Vec<String> = self
            .mapping
            .validate_record(&target)
            .iter()
            .map(ToString::to_string)
            .collect();
        if errors.is_empty() {
            TransformedRecord::ok(source.clone(), target)
        } else {
            debug!("{} record failed validation: {}", self.entity_type, errors.join("; "));
            TransformedRecord::failed(source.clone(), errors)
        }
    }
}

impl Transformer for MappingTransformer {
    fn transform(&self, batch: &[Record]) -> Result<Vec<TransformedRecord>, TransformError> {
        Ok(batch.iter().map(|r| self.transform_one(r)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::record_from;
    use serde_json::json;

    fn product_config() -> Value {
        json!({
            "field_mappings": {"legacy_id": "ArtNr", "name": "ArtBez", "price": "Preis"},
            "custom_transformers": [
                {"field": "name", "transform": "trim"},
                {"field": "price", "transform": "to_float"}
            ],
            "validation_rules": [
                {"field": "name", "check": "required"},
                {"field": "price", "check": "greater_than", "value": 0, "message": "price must be positive"}
            ],
            "defaults": {"is_active": true}
        })
    }

    #[test]
    fn output_is_paired_with_its_source() {
        let t = MappingTransformer::from_config("product", &product_config()).unwrap();
        let batch = vec![
            record_from(json!({"ArtNr": "A1", "ArtBez": " Widget ", "Preis": "9,90", "Lager": 3})),
            record_from(json!({"ArtNr": "A2", "ArtBez": "Broken", "Preis": "0"})),
            record_from(json!({"ArtNr": "A3", "ArtBez": "Gadget", "Preis": "abc"})),
        ];
        let out = t.transform(&batch).unwrap();
        assert_eq!(out.len(), 3);

        assert_eq!(out[0].source, batch[0]);
        assert_eq!(
            out[0].target.clone().map(Value::Object),
            Some(json!({"legacy_id": "A1", "name": "Widget", "price": 9.9, "is_active": true}))
        );

        assert_eq!(out[1].source, batch[1]);
        assert!(out[1].target.is_none());
        assert_eq!(out[1].errors, vec!["price: price must be positive"]);

        assert!(out[2].target.is_none());
        assert!(out[2].errors[0].contains("not a number"));
    }

    #[test]
    fn config_errors_are_reported() {
        assert!(MappingTransformer::from_config("product", &json!({})).is_err());
        let bad = json!({
            "field_mappings": {"a": "b"},
            "custom_transformers": [{"field": "a", "transform": "shout"}]
        });
        let err = MappingTransformer::from_config("product", &bad).err().unwrap();
        assert!(err.to_string().contains("unknown transform 'shout'"));
    }
}
