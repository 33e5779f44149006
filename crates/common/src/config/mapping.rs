use crate::config::traits::ConfigName;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One `[field, operator, value_template]` triple of an incremental filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition(pub String, pub String, pub String);

impl FilterCondition {
    pub fn field(&self) -> &str {
        &self.0
    }
    pub fn operator(&self) -> &str {
        &self.1
    }
    pub fn value_template(&self) -> &str {
        &self.2
    }
}

/// How the watermark is turned into a source-side filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterFormat {
    /// A single template, e.g. `"modified_date >= '{{ date }}'"`.
    Template(String),
    /// Conditions joined with `AND`.
    Conditions(Vec<FilterCondition>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalConfig {
    pub timestamp_filter_format: FilterFormat,
}

/// The `mapping_config` blob of a sync mapping.
///
/// Only the keys the pipeline itself interprets are typed; everything else
/// (field mappings, validation rules, ...) stays in `extra` and is handed to
/// the component that understands it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub transformer: Option<String>,
    #[serde(default)]
    pub extractor: Option<String>,
    #[serde(default)]
    pub loader: Option<String>,
    #[serde(default)]
    pub incremental: Option<IncrementalConfig>,
    /// Entity types that must be synced before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MappingConfig {
    /// The whole blob as JSON, typed keys included.
    pub fn as_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Map::new()))
    }
}

fn default_true() -> bool {
    true
}

/// A mapping as declared on disk, before it is registered in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDefinition {
    pub name: String,
    pub entity_type: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_config: Value,
    #[serde(default)]
    pub target_config: Value,
    #[serde(default)]
    pub mapping_config: MappingConfig,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl ConfigName for MappingDefinition {
    fn name(&self) -> &str {
        &self.name
    }
}
