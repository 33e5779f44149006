use super::{Entity, EntitySchema, EntityStore, StoreError};
use chrono::Utc;
use common::types::value_key;
use common::Record;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Table {
    schema: EntitySchema,
    next_id: u64,
    rows: BTreeMap<u64, Entity>,
}

impl Table {
    fn new(schema: EntitySchema) -> Self {
        Self {
            schema,
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }

    /// Unique and unique-together checks against every other row.
    fn check_constraints(&self, candidate: &Record, id: Option<u64>) -> Result<(), StoreError> {
        let others = || self.rows.values().filter(move |row| Some(row.id) != id);

        for field in self.schema.unique_fields() {
            let Some(value) = candidate.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            if others().any(|row| row.get(&field.name) == Some(value)) {
                return Err(StoreError::save(format!(
                    "{}: duplicate value {} for unique field '{}'",
                    self.schema.name, value, field.name
                )));
            }
        }

        for group in &self.schema.unique_together {
            let values: Option<Vec<_>> = group
                .iter()
                .map(|f| candidate.get(f).filter(|v| !v.is_null()))
                .collect();
            let Some(values) = values else { continue };
            let clash = others().any(|row| {
                group
                    .iter()
                    .zip(&values)
                    .all(|(f, v)| row.get(f) == Some(*v))
            });
            if clash {
                return Err(StoreError::save(format!(
                    "{}: duplicate values for unique together ({})",
                    self.schema.name,
                    group.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn matches(row: &Entity, lookup: &Record) -> bool {
        lookup.iter().all(|(k, v)| match k.as_str() {
            "id" => value_key(v) == Some(row.id.to_string()),
            _ => row.get(k) == Some(v),
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct State {
    tables: HashMap<String, Table>,
}

/// In-process [`EntityStore`] with optional JSON durability.
#[derive(Clone, Default)]
pub struct MemoryEntityStore {
    inner: Arc<RwLock<State>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /* ---------- optional durability ---------- */
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => "{}".into(),
            Err(err) => return Err(err.into()),
        };
        let state: State = serde_json::from_str(&json)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(state)),
        })
    }

    pub fn flush_to(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.inner.read())?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }

    /// Declare a model. Re-registering keeps existing rows and swaps the schema.
    pub fn register_model(&self, schema: EntitySchema) {
        let mut state = self.inner.write();
        match state.tables.get_mut(&schema.name) {
            Some(table) => table.schema = schema,
            None => {
                state.tables.insert(schema.name.clone(), Table::new(schema));
            }
        }
    }

    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self, model: &str) -> usize {
        self.inner
            .read()
            .tables
            .get(model)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub fn all(&self, model: &str) -> Vec<Entity> {
        self.inner
            .read()
            .tables
            .get(model)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl EntityStore for MemoryEntityStore {
    fn schema(&self, model: &str) -> Result<EntitySchema, StoreError> {
        self.inner
            .read()
            .tables
            .get(model)
            .map(|t| t.schema.clone())
            .ok_or_else(|| StoreError::unknown_model(model))
    }

    fn get(&self, model: &str, lookup: &Record) -> Result<Option<Entity>, StoreError> {
        let state = self.inner.read();
        let table = state
            .tables
            .get(model)
            .ok_or_else(|| StoreError::unknown_model(model))?;
        let mut found = table.rows.values().filter(|row| Table::matches(row, lookup));
        let first = found.next().cloned();
        if found.next().is_some() {
            return Err(StoreError::multiple_found(format!(
                "{model}: lookup {} matched more than one row",
                serde_json::Value::Object(lookup.clone())
            )));
        }
        Ok(first)
    }

    fn filter_in(
        &self,
        model: &str,
        field: &str,
        keys: &[String],
    ) -> Result<Vec<Entity>, StoreError> {
        let state = self.inner.read();
        let table = state
            .tables
            .get(model)
            .ok_or_else(|| StoreError::unknown_model(model))?;
        Ok(table
            .rows
            .values()
            .filter(|row| row.key_of(field).is_some_and(|k| keys.contains(&k)))
            .cloned()
            .collect())
    }

    fn create(&self, model: &str, mut fields: Record) -> Result<Entity, StoreError> {
        let mut state = self.inner.write();
        let table = state
            .tables
            .get_mut(model)
            .ok_or_else(|| StoreError::unknown_model(model))?;
        table.schema.validate(&fields)?;

        let id = match fields.remove("id") {
            None | Some(Value::Null) => table.next_id,
            Some(value) => {
                let id = value_key(&value)
                    .and_then(|k| k.parse::<u64>().ok())
                    .filter(|id| *id > 0)
                    .ok_or_else(|| {
                        StoreError::validation(format!("{model}: id {value} is not a positive integer"))
                    })?;
                if table.rows.contains_key(&id) {
                    return Err(StoreError::save(format!(
                        "{model}: duplicate value {id} for primary key 'id'"
                    )));
                }
                id
            }
        };
        table.check_constraints(&fields, None)?;

        let now = Utc::now();
        let entity = Entity {
            id,
            fields,
            created_at: now,
            updated_at: now,
        };
        table.next_id = table.next_id.max(id + 1);
        table.rows.insert(entity.id, entity.clone());
        Ok(entity)
    }

    fn save(&self, model: &str, entity: &Entity) -> Result<Entity, StoreError> {
        let mut state = self.inner.write();
        let table = state
            .tables
            .get_mut(model)
            .ok_or_else(|| StoreError::unknown_model(model))?;
        if !table.rows.contains_key(&entity.id) {
            return Err(StoreError::save(format!(
                "{model}: no row with id {}",
                entity.id
            )));
        }
        table.schema.validate(&entity.fields)?;
        table.check_constraints(&entity.fields, Some(entity.id))?;

        let mut saved = entity.clone();
        saved.updated_at = Utc::now();
        table.rows.insert(saved.id, saved.clone());
        Ok(saved)
    }

    fn bulk_update(&self, model: &str, entities: &[Entity]) -> Result<Vec<Entity>, StoreError> {
        let mut state = self.inner.write();
        let table = state
            .tables
            .get_mut(model)
            .ok_or_else(|| StoreError::unknown_model(model))?;

        // Stage against a copy so a failure leaves the table untouched.
        let mut staged = table.clone();
        let now = Utc::now();
        let mut saved = Vec::with_capacity(entities.len());
        for entity in entities {
            if !staged.rows.contains_key(&entity.id) {
                return Err(StoreError::save(format!(
                    "{model}: no row with id {}",
                    entity.id
                )));
            }
            staged.schema.validate(&entity.fields)?;
            staged.check_constraints(&entity.fields, Some(entity.id))?;
            let mut updated = entity.clone();
            updated.updated_at = now;
            staged.rows.insert(updated.id, updated.clone());
            saved.push(updated);
        }
        *table = staged;
        Ok(saved)
    }
}
