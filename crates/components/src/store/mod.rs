//! Target-side persistence used by loaders.
//!
//! An [`EntityStore`] holds rows of named models. Each model carries an
//! [`EntitySchema`] describing which fields exist, which of them the store
//! manages itself (primary key, timestamps) and which combinations must stay
//! unique.

pub mod memory;

pub use memory::MemoryEntityStore;

use chrono::{DateTime, Utc};
use common::config::ModelDeclaration;
use common::error::diagnostics::DiagnosticMessage;
use common::types::value_key;
use common::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown model: {context}")]
    UnknownModel { context: DiagnosticMessage },
    #[error("validation failed: {context}")]
    Validation { context: DiagnosticMessage },
    #[error("save failed: {context}")]
    Save { context: DiagnosticMessage },
    #[error("multiple rows found: {context}")]
    MultipleFound { context: DiagnosticMessage },
    #[error("io error: {context}")]
    Io {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    #[track_caller]
    pub fn unknown_model(model: &str) -> Self {
        Self::UnknownModel {
            context: DiagnosticMessage::new(format!("model '{model}' is not registered")),
        }
    }

    #[track_caller]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn save(message: impl Into<String>) -> Self {
        Self::Save {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn multiple_found(message: impl Into<String>) -> Self {
        Self::MultipleFound {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation { .. })
    }
}

impl From<std::io::Error> for StoreError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        StoreError::Io {
            context: DiagnosticMessage::new(err.to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        StoreError::Io {
            context: DiagnosticMessage::new(err.to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Column metadata for one model field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    #[serde(default)]
    pub primary_key: bool,
    /// Maintained by the store (timestamps, reverse relations); never written
    /// by a loader.
    #[serde(default)]
    pub auto_created: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: false,
            auto_created: false,
            required: false,
            unique: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn auto_created(mut self) -> Self {
        self.auto_created = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.auto_created = true;
        self
    }

    /// Whether a loader may write this field.
    pub fn is_writable(&self) -> bool {
        !self.primary_key && !self.auto_created
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    pub fields: Vec<FieldMeta>,
    #[serde(default)]
    pub unique_together: Vec<Vec<String>>,
}

impl EntitySchema {
    /// A schema with the store-managed `id`, `created_at` and `updated_at`
    /// columns already declared.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: vec![
                FieldMeta::new("id").primary_key(),
                FieldMeta::new("created_at").auto_created(),
                FieldMeta::new("updated_at").auto_created(),
            ],
            unique_together: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldMeta) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_unique_together(mut self, group: &[&str]) -> Self {
        self.unique_together
            .push(group.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_writable(&self, name: &str) -> bool {
        self.field(name).is_some_and(FieldMeta::is_writable)
    }

    /// Fields that must be unique on their own.
    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.iter().filter(|f| f.unique)
    }

    /// Full field validation, run before every create or save.
    pub fn validate(&self, fields: &Record) -> Result<(), StoreError> {
        let unknown: Vec<&str> = fields
            .keys()
            .filter(|k| self.field(k).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(StoreError::validation(format!(
                "{}: unknown fields {}",
                self.name,
                unknown.join(", ")
            )));
        }

        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required && f.is_writable())
            .filter(|f| matches!(fields.get(&f.name), None | Some(Value::Null)))
            .map(|f| f.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::validation(format!(
                "{}: required fields missing {}",
                self.name,
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

impl From<&ModelDeclaration> for EntitySchema {
    fn from(decl: &ModelDeclaration) -> Self {
        let mut schema = EntitySchema::new(&decl.name);
        for field in &decl.fields {
            if schema.field(&field.name).is_some() {
                continue;
            }
            let mut meta = FieldMeta::new(&field.name);
            meta.required = field.required;
            meta.unique = field.unique;
            schema.fields.push(meta);
        }
        schema.unique_together = decl.unique_together.clone();
        schema
    }
}

/// A persisted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: u64,
    pub fields: Record,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Rendered lookup key of `field`; `id` reads the primary key.
    pub fn key_of(&self, field: &str) -> Option<String> {
        match field {
            "id" => Some(self.id.to_string()),
            _ => self.get(field).and_then(value_key),
        }
    }
}

/// Storage operations a loader needs from the target system.
pub trait EntityStore: Send + Sync {
    fn schema(&self, model: &str) -> Result<EntitySchema, StoreError>;

    /// Single row matching every field of `lookup`.
    fn get(&self, model: &str, lookup: &Record) -> Result<Option<Entity>, StoreError>;

    /// Rows whose `field` renders to one of `keys` (see
    /// [`common::types::value_key`]).
    fn filter_in(&self, model: &str, field: &str, keys: &[String])
        -> Result<Vec<Entity>, StoreError>;

    fn exists(&self, model: &str, lookup: &Record) -> Result<bool, StoreError> {
        Ok(self.get(model, lookup)?.is_some())
    }

    /// Insert a new row. A non-null `id` in `fields` becomes the primary key
    /// instead of the next generated one.
    fn create(&self, model: &str, fields: Record) -> Result<Entity, StoreError>;

    fn save(&self, model: &str, entity: &Entity) -> Result<Entity, StoreError>;

    /// Persist every entity or none of them.
    fn bulk_update(&self, model: &str, entities: &[Entity]) -> Result<Vec<Entity>, StoreError>;
}
