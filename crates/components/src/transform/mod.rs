//! Turning raw source rows into target-shaped records.

pub mod builtins;
pub mod mapping;
pub mod rules;

pub use mapping::MappingTransformer;
pub use rules::{CustomCheck, RuleCheck, ValidationError, ValidationRule};

use common::config::ConfigError;
use common::error::diagnostics::DiagnosticMessage;
use common::{Record, RecordExt};
use rules::CompiledRule;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("invalid transformer config: {context}")]
    Config {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("field transform failed: {context}")]
    Field { context: DiagnosticMessage },
    #[error("batch transform failed: {context}")]
    Batch {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TransformError {
    #[track_caller]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }

    #[track_caller]
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        Self::Field {
            context: DiagnosticMessage::new(format!("{field}: {}", message.into())),
        }
    }

    #[track_caller]
    pub fn batch(message: impl Into<String>) -> Self {
        Self::Batch {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }
}

impl From<ConfigError> for TransformError {
    #[track_caller]
    fn from(err: ConfigError) -> Self {
        TransformError::Config {
            context: DiagnosticMessage::new(err.to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<regex::Error> for TransformError {
    #[track_caller]
    fn from(err: regex::Error) -> Self {
        TransformError::Config {
            context: DiagnosticMessage::new(format!("invalid pattern: {err}")),
            source: Some(Box::new(err)),
        }
    }
}

/// One transformer output, always paired with the row it came from.
///
/// `target` is `None` when the row failed to transform or validate; the
/// reasons are in `errors`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedRecord {
    pub source: Record,
    pub target: Option<Record>,
    pub errors: Vec<String>,
}

impl TransformedRecord {
    pub fn ok(source: Record, target: Record) -> Self {
        Self {
            source,
            target: Some(target),
            errors: Vec::new(),
        }
    }

    pub fn failed(source: Record, errors: Vec<String>) -> Self {
        Self {
            source,
            target: None,
            errors,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.target.is_some()
    }
}

pub trait Transformer: Send {
    /// Map a batch. An `Err` fails the whole batch; per-row problems are
    /// reported through [`TransformedRecord::errors`].
    fn transform(&self, batch: &[Record]) -> Result<Vec<TransformedRecord>, TransformError>;

    fn prefilter_records(
        &self,
        records: Vec<Record>,
        existing_keys: &HashSet<String>,
        key_field: &str,
    ) -> (Vec<Record>, Vec<Record>) {
        prefilter_records(records, existing_keys, key_field)
    }
}

/// Split into `(new, existing)` by whether `key_field` is already known.
/// Rows without a usable key count as new.
pub fn prefilter_records(
    records: Vec<Record>,
    existing_keys: &HashSet<String>,
    key_field: &str,
) -> (Vec<Record>, Vec<Record>) {
    records.into_iter().partition(|record| {
        !record
            .key_string(key_field)
            .is_some_and(|key| existing_keys.contains(&key))
    })
}

/// Per-field transform: `(value, context) -> new value`.
pub type FieldTransform =
    Arc<dyn Fn(&Value, &TransformContext<'_>) -> Result<Value, String> + Send + Sync>;

/// What a [`FieldTransform`] can see besides the value itself.
pub struct TransformContext<'a> {
    pub field: &'a str,
    pub entity_type: &'a str,
    /// The mapped record as it stands before this transform runs.
    pub record: &'a Record,
}

/// Mapping, per-field transforms and validation rules for one entity.
#[derive(Clone, Default)]
pub struct FieldMapping {
    mappings: Vec<(String, String)>,
    transformers: Vec<(String, FieldTransform)>,
    rules: Vec<CompiledRule>,
    checks: HashMap<String, CustomCheck>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `source` into `target`.
    pub fn map(mut self, target: impl Into<String>, source: impl Into<String>) -> Self {
        self.mappings.push((target.into(), source.into()));
        self
    }

    pub fn with_transformer(mut self, field: impl Into<String>, transform: FieldTransform) -> Self {
        self.transformers.push((field.into(), transform));
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Result<Self, TransformError> {
        self.rules.push(CompiledRule::compile(rule)?);
        Ok(self)
    }

    pub fn register_check(&mut self, name: impl Into<String>, check: CustomCheck) {
        self.checks.insert(name.into(), check);
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.mappings.iter().map(|(t, _)| t.as_str())
    }

    /// Whitelisting rename: only mapped fields reach the output, and a
    /// source field that is absent stays absent.
    pub fn apply_field_mappings(&self, record: &Record) -> Record {
        self.mappings
            .iter()
            .filter_map(|(target, source)| {
                record.get(source).map(|v| (target.clone(), v.clone()))
            })
            .collect()
    }

    /// Run the per-field transforms in registration order. Fields missing
    /// from `record` are skipped.
    pub fn apply_custom_transformers(
        &self,
        mut record: Record,
        entity_type: &str,
    ) -> Result<Record, TransformError> {
        for (field, transform) in &self.transformers {
            let Some(value) = record.get(field) else {
                continue;
            };
            let ctx = TransformContext {
                field,
                entity_type,
                record: &record,
            };
            let new_value = transform(value, &ctx).map_err(|e| TransformError::field(field, e))?;
            record.insert(field.clone(), new_value);
        }
        Ok(record)
    }

    pub fn validate_record(&self, record: &Record) -> Vec<ValidationError> {
        self.rules
            .iter()
            .filter_map(|rule| rule.check(record, &self.checks))
            .collect()
    }
}
