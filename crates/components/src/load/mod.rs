//! Writing transformed records into the target store.

pub mod store_loader;

pub use store_loader::{LoaderConfig, StoreLoader};

use crate::store::{Entity, StoreError};
use common::config::ConfigError;
use common::error::diagnostics::DiagnosticMessage;
use common::sanitize::clean_for_json;
use common::Record;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid loader config: {context}")]
    Config {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("failed to prepare record: {context}")]
    Preparation { context: DiagnosticMessage },
    #[error("failed to load record: {context}")]
    FailedToLoad {
        context: DiagnosticMessage,
        #[source]
        source: StoreError,
    },
}

impl LoadError {
    #[track_caller]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }

    #[track_caller]
    pub fn preparation(message: impl Into<String>) -> Self {
        Self::Preparation {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LoadError::FailedToLoad { source, .. } if source.is_validation())
    }
}

impl From<StoreError> for LoadError {
    #[track_caller]
    fn from(err: StoreError) -> Self {
        LoadError::FailedToLoad {
            context: DiagnosticMessage::new(err.to_string()),
            source: err,
        }
    }
}

impl From<ConfigError> for LoadError {
    #[track_caller]
    fn from(err: ConfigError) -> Self {
        LoadError::Config {
            context: DiagnosticMessage::new(err.to_string()),
            source: Some(Box::new(err)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    Preparation,
    Load,
    BulkUpdate,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadStage::Preparation => "preparation",
            LoadStage::Load => "load",
            LoadStage::BulkUpdate => "bulk_update",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Only touch rows that already exist.
    Update,
    /// Only insert rows that do not exist yet.
    Create,
    #[default]
    UpdateOrCreate,
}

impl UpdateStrategy {
    pub fn allows_update(self) -> bool {
        !matches!(self, UpdateStrategy::Create)
    }

    pub fn allows_create(self) -> bool {
        !matches!(self, UpdateStrategy::Update)
    }
}

/// What happened to one record, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Created { id: u64 },
    Updated { id: u64 },
    Unchanged { id: u64 },
    Skipped { reason: String },
    Failed { stage: LoadStage, error: String },
}

/// Result of [`Loader::load_record`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoadAction {
    Created(Entity),
    Updated(Entity),
    Unchanged(Entity),
    Skipped(String),
}

impl LoadAction {
    pub fn outcome(&self) -> RecordOutcome {
        match self {
            LoadAction::Created(e) => RecordOutcome::Created { id: e.id },
            LoadAction::Updated(e) => RecordOutcome::Updated { id: e.id },
            LoadAction::Unchanged(e) => RecordOutcome::Unchanged { id: e.id },
            LoadAction::Skipped(reason) => RecordOutcome::Skipped {
                reason: reason.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadErrorDetail {
    pub record: Value,
    pub error: String,
    pub stage: LoadStage,
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadResult {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: usize,
    pub error_details: Vec<LoadErrorDetail>,
    pub outcomes: Vec<RecordOutcome>,
}

impl LoadResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped + self.errors
    }

    pub fn record(&mut self, action: &LoadAction) {
        match action {
            LoadAction::Created(_) => self.created += 1,
            LoadAction::Updated(_) => self.updated += 1,
            LoadAction::Unchanged(_) => self.unchanged += 1,
            LoadAction::Skipped(_) => self.skipped += 1,
        }
        self.outcomes.push(action.outcome());
    }

    /// Count a failure, log it at a level matching its cause and keep the
    /// offending record for the sync log.
    pub fn add_error(
        &mut self,
        record: &Record,
        error: &dyn std::error::Error,
        stage: LoadStage,
        context: Map<String, Value>,
    ) {
        let outcome = self.note_error(record, error, stage, context);
        self.outcomes.push(outcome);
    }

    /// Like [`add_error`](Self::add_error) for a record whose outcome slot
    /// was already pushed.
    pub fn fail_at(
        &mut self,
        index: usize,
        record: &Record,
        error: &dyn std::error::Error,
        stage: LoadStage,
        context: Map<String, Value>,
    ) {
        let outcome = self.note_error(record, error, stage, context);
        match self.outcomes.get_mut(index) {
            Some(slot) => *slot = outcome,
            None => self.outcomes.push(outcome),
        }
    }

    fn note_error(
        &mut self,
        record: &Record,
        error: &dyn std::error::Error,
        stage: LoadStage,
        context: Map<String, Value>,
    ) -> RecordOutcome {
        let validation = context.get("error_type") == Some(&Value::from("validation"));
        if stage == LoadStage::Preparation || validation {
            warn!("Record rejected during {stage}: {error}");
        } else {
            error!("Record failed during {stage}: {error}");
        }
        self.errors += 1;
        self.error_details.push(LoadErrorDetail {
            record: clean_for_json(record),
            error: error.to_string(),
            stage,
            context,
        });
        RecordOutcome::Failed {
            stage,
            error: error.to_string(),
        }
    }

    pub fn merge(&mut self, other: LoadResult) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.error_details.extend(other.error_details);
        self.outcomes.extend(other.outcomes);
    }

    /// Plain counters for the sync log.
    pub fn to_summary(&self) -> Value {
        serde_json::json!({
            "created": self.created,
            "updated": self.updated,
            "unchanged": self.unchanged,
            "skipped": self.skipped,
            "errors": self.errors,
        })
    }
}

/// `{lookup, error_type}` attached to a failed record's detail.
pub fn error_context(lookup: &Record, err: &LoadError) -> Map<String, Value> {
    let error_type = match err {
        LoadError::Config { .. } => "config",
        LoadError::Preparation { .. } => "preparation",
        LoadError::FailedToLoad { source, .. } if source.is_validation() => "validation",
        LoadError::FailedToLoad { .. } => "save",
    };
    Map::from_iter([
        ("lookup".to_string(), Value::Object(lookup.clone())),
        ("error_type".to_string(), Value::from(error_type)),
    ])
}

/// Persists prepared records into the target.
pub trait Loader: Send {
    /// Split a record into `(lookup, writable fields)`.
    fn prepare_record(&self, record: &Record) -> Result<(Record, Record), LoadError>;

    fn find_existing(&self, lookup: &Record) -> Result<Option<Entity>, LoadError>;

    /// Create, update or skip one record. `instance` is the existing row
    /// when the caller already looked it up.
    fn load_record(
        &self,
        lookup: &Record,
        record: Record,
        update_existing: bool,
        create_new: bool,
        instance: Option<Entity>,
    ) -> Result<LoadAction, LoadError>;

    fn update_strategy(&self) -> UpdateStrategy {
        UpdateStrategy::UpdateOrCreate
    }

    /// Record-at-a-time load. A failing record never stops the batch.
    fn load(&self, records: &[Record], update_existing: bool) -> LoadResult {
        let strategy = self.update_strategy();
        let update_existing = update_existing && strategy.allows_update();
        let create_new = strategy.allows_create();

        let mut result = LoadResult::new();
        for record in records {
            let (lookup, prepared) = match self.prepare_record(record) {
                Ok(parts) => parts,
                Err(err) => {
                    result.add_error(record, &err, LoadStage::Preparation, Map::new());
                    continue;
                }
            };
            let action = self.find_existing(&lookup).and_then(|instance| {
                self.load_record(&lookup, prepared, update_existing, create_new, instance)
            });
            match action {
                Ok(action) => result.record(&action),
                Err(err) => {
                    let context = error_context(&lookup, &err);
                    result.add_error(record, &err, LoadStage::Load, context);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_gates() {
        assert!(UpdateStrategy::Update.allows_update());
        assert!(!UpdateStrategy::Update.allows_create());
        assert!(!UpdateStrategy::Create.allows_update());
        assert!(UpdateStrategy::UpdateOrCreate.allows_create());
        let parsed: UpdateStrategy = serde_json::from_str("\"update_or_create\"").unwrap();
        assert_eq!(parsed, UpdateStrategy::UpdateOrCreate);
    }

    #[test]
    fn outcomes_serialize_with_a_tag() {
        let v = serde_json::to_value(RecordOutcome::Failed {
            stage: LoadStage::BulkUpdate,
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(
            v,
            serde_json::json!({"outcome": "failed", "stage": "bulk_update", "error": "boom"})
        );
    }
}
