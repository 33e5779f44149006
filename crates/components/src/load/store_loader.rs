use super::{
    error_context, LoadAction, LoadError, LoadResult, LoadStage, Loader, RecordOutcome,
    UpdateStrategy,
};
use crate::store::{Entity, EntitySchema, EntityStore};
use common::types::value_key;
use common::{Record, RecordExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

fn default_unique_field() -> String {
    "legacy_id".to_string()
}

/// Target side of a mapping (`target_config`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Dotted model path, e.g. `products.models.Product`.
    pub model: String,
    #[serde(default)]
    pub app_label: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default = "default_unique_field")]
    pub unique_field: String,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    #[serde(default)]
    pub bulk_update: bool,
}

impl LoaderConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            app_label: None,
            model_name: None,
            unique_field: default_unique_field(),
            update_strategy: UpdateStrategy::default(),
            bulk_update: false,
        }
    }

    /// Name the store knows the model by: `model_name`, else the last
    /// segment of `model`.
    pub fn store_model(&self) -> &str {
        match &self.model_name {
            Some(name) => name,
            None => self.model.rsplit('.').next().unwrap_or(&self.model),
        }
    }
}

enum Step {
    Done(LoadAction),
    /// Update queued for the batch's single `bulk_update` call.
    Deferred(Entity),
}

/// Loads into any [`EntityStore`], one `filter_in` lookup per batch.
pub struct StoreLoader<S: EntityStore + ?Sized> {
    store: Arc<S>,
    config: LoaderConfig,
    schema: EntitySchema,
}

impl<S: EntityStore + ?Sized> StoreLoader<S> {
    pub fn new(store: Arc<S>, config: LoaderConfig) -> Result<Self, LoadError> {
        let schema = store
            .schema(config.store_model())
            .map_err(|e| LoadError::config(format!("{}: {e}", config.model)))?;
        if schema.field(&config.unique_field).is_none() {
            return Err(LoadError::config(format!(
                "{} has no field '{}' to match records on",
                schema.name, config.unique_field
            )));
        }
        Ok(Self {
            store,
            config,
            schema,
        })
    }

    pub fn from_config(store: Arc<S>, config: &Value) -> Result<Self, LoadError> {
        let config: LoaderConfig = serde_json::from_value(config.clone())
            .map_err(|e| LoadError::config(format!("target_config: {e}")))?;
        Self::new(store, config)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn model(&self) -> &str {
        &self.schema.name
    }

    /// Fields of `record` whose value differs from the stored row. Missing
    /// and null compare equal; the unique field compares by rendered key.
    fn changed_fields(&self, entity: &Entity, record: &Record) -> Vec<String> {
        let key_field = self.config.unique_field.as_str();
        record
            .iter()
            .filter(|(k, v)| {
                let stored = entity.get(k).unwrap_or(&Value::Null);
                if k.as_str() == key_field {
                    value_key(stored) != value_key(v)
                } else {
                    stored != *v
                }
            })
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// First `unique_together` group that an existing row already occupies.
    fn unique_together_conflict(&self, record: &Record) -> Result<Option<String>, LoadError> {
        for group in &self.schema.unique_together {
            let lookup: Option<Record> = group
                .iter()
                .map(|f| {
                    record
                        .get(f)
                        .filter(|v| !v.is_null())
                        .map(|v| (f.clone(), v.clone()))
                })
                .collect();
            let Some(lookup) = lookup else { continue };
            if self.store.exists(self.model(), &lookup)? {
                return Ok(Some(group.join(", ")));
            }
        }
        Ok(None)
    }

    /// Apply `record` to `entity`; `None` when nothing changed.
    fn apply_changes(&self, mut entity: Entity, record: &Record) -> Result<Option<Entity>, LoadError> {
        let changed = self.changed_fields(&entity, record);
        if changed.is_empty() {
            return Ok(None);
        }
        debug!("{} #{}: changed fields {}", self.model(), entity.id, changed.join(", "));
        for field in changed {
            if let Some(value) = record.get(&field) {
                entity.fields.insert(field, value.clone());
            }
        }
        self.schema.validate(&entity.fields)?;
        Ok(Some(entity))
    }

    fn create(&self, lookup: &Record, mut record: Record) -> Result<LoadAction, LoadError> {
        // Matching on the primary key: the new row takes the source's id.
        if self
            .schema
            .field(&self.config.unique_field)
            .is_some_and(|f| f.primary_key)
        {
            record.extend(lookup.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(group) = self.unique_together_conflict(&record)? {
            let reason = format!(
                "{} already has a row with the same ({group})",
                self.model()
            );
            warn!("Skipping record {}: {reason}", Value::Object(record));
            return Ok(LoadAction::Skipped(reason));
        }
        self.schema.validate(&record)?;
        Ok(LoadAction::Created(self.store.create(self.model(), record)?))
    }
}

impl<S: EntityStore + ?Sized> Loader for StoreLoader<S> {
    fn prepare_record(&self, record: &Record) -> Result<(Record, Record), LoadError> {
        let key_field = &self.config.unique_field;
        if record.is_blank(key_field) {
            return Err(LoadError::preparation(format!(
                "record has no value for unique field '{key_field}'"
            )));
        }
        let mut lookup = Record::new();
        if let Some(key) = record.get(key_field) {
            lookup.insert(key_field.clone(), key.clone());
        }

        let prepared: Record = record
            .iter()
            .filter(|(k, _)| self.schema.is_writable(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok((lookup, prepared))
    }

    fn find_existing(&self, lookup: &Record) -> Result<Option<Entity>, LoadError> {
        Ok(self.store.get(self.model(), lookup)?)
    }

    fn load_record(
        &self,
        lookup: &Record,
        record: Record,
        update_existing: bool,
        create_new: bool,
        instance: Option<Entity>,
    ) -> Result<LoadAction, LoadError> {
        match instance {
            Some(entity) if !update_existing => Ok(LoadAction::Skipped(format!(
                "{} #{} exists and updates are disabled",
                self.model(),
                entity.id
            ))),
            Some(entity) => match self.apply_changes(entity.clone(), &record)? {
                None => Ok(LoadAction::Unchanged(entity)),
                Some(changed) => Ok(LoadAction::Updated(
                    self.store.save(self.model(), &changed)?,
                )),
            },
            None if !create_new => Ok(LoadAction::Skipped(format!(
                "no existing {} and creation is disabled",
                self.model()
            ))),
            None => self.create(lookup, record),
        }
    }

    fn update_strategy(&self) -> UpdateStrategy {
        self.config.update_strategy
    }

    fn load(&self, records: &[Record], update_existing: bool) -> LoadResult {
        let strategy = self.update_strategy();
        let update_existing = update_existing && strategy.allows_update();
        let create_new = strategy.allows_create();
        let key_field = self.config.unique_field.as_str();

        let prepared: Vec<Result<(Record, Record), LoadError>> =
            records.iter().map(|r| self.prepare_record(r)).collect();

        let mut keys: Vec<String> = prepared
            .iter()
            .filter_map(|p| p.as_ref().ok())
            .filter_map(|(lookup, _)| lookup.key_string(key_field))
            .collect();
        keys.sort();
        keys.dedup();

        let mut existing: Option<HashMap<String, Entity>> =
            match self.store.filter_in(self.model(), key_field, &keys) {
                Ok(rows) => Some(
                    rows.into_iter()
                        .filter_map(|e| e.key_of(key_field).map(|k| (k, e)))
                        .collect(),
                ),
                Err(err) => {
                    warn!(
                        "Bulk lookup on {} failed, falling back to per-record lookups: {err}",
                        self.model()
                    );
                    None
                }
            };

        let mut result = LoadResult::new();
        let mut pending: Vec<(usize, Entity)> = Vec::new();

        for (index, (record, prepared)) in records.iter().zip(prepared).enumerate() {
            let (lookup, fields) = match prepared {
                Ok(parts) => parts,
                Err(err) => {
                    result.add_error(record, &err, LoadStage::Preparation, Map::new());
                    continue;
                }
            };
            let key = lookup.key_string(key_field).unwrap_or_default();

            let instance = match &existing {
                Some(known) => Ok(known.get(&key).cloned()),
                None => self.find_existing(&lookup),
            };

            let step = instance.and_then(|instance| match instance {
                Some(entity) if self.config.bulk_update && update_existing => {
                    Ok(match self.apply_changes(entity.clone(), &fields)? {
                        None => Step::Done(LoadAction::Unchanged(entity)),
                        Some(changed) => Step::Deferred(changed),
                    })
                }
                instance => self
                    .load_record(&lookup, fields, update_existing, create_new, instance)
                    .map(Step::Done),
            });

            match step {
                Ok(Step::Deferred(changed)) => {
                    // Settled once the bulk update has run.
                    result.outcomes.push(RecordOutcome::Updated { id: changed.id });
                    if let Some(known) = existing.as_mut() {
                        known.insert(key, changed.clone());
                    }
                    pending.push((index, changed));
                }
                Ok(Step::Done(action)) => {
                    if let (LoadAction::Created(e) | LoadAction::Updated(e), Some(known)) =
                        (&action, existing.as_mut())
                    {
                        known.insert(key, e.clone());
                    }
                    result.record(&action);
                }
                Err(err) => {
                    let context = error_context(&lookup, &err);
                    result.add_error(record, &err, LoadStage::Load, context);
                }
            }
        }

        if !pending.is_empty() {
            // A key repeated in the batch queues its row again; the last
            // queued version already carries every earlier change.
            let mut latest: Vec<Entity> = Vec::new();
            for (_, entity) in &pending {
                match latest.iter_mut().find(|e| e.id == entity.id) {
                    Some(slot) => *slot = entity.clone(),
                    None => latest.push(entity.clone()),
                }
            }
            match self.store.bulk_update(self.model(), &latest) {
                Ok(saved) => {
                    info!(
                        "Bulk updated {} {} rows from {} records",
                        saved.len(),
                        self.model(),
                        pending.len()
                    );
                    result.updated += pending.len();
                }
                Err(err) => {
                    let err = LoadError::from(err);
                    for (index, entity) in &pending {
                        let context = Map::from_iter([
                            ("entity_id".to_string(), Value::from(entity.id)),
                            ("batch_size".to_string(), Value::from(latest.len())),
                        ]);
                        result.fail_at(*index, &records[*index], &err, LoadStage::BulkUpdate, context);
                    }
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FieldMeta, MemoryEntityStore};
    use common::types::record_from;
    use serde_json::json;

    fn store() -> Arc<MemoryEntityStore> {
        let store = MemoryEntityStore::new();
        store.register_model(
            EntitySchema::new("Product")
                .with_field(FieldMeta::new("legacy_id").required().unique())
                .with_field(FieldMeta::new("name").required())
                .with_field(FieldMeta::new("sku"))
                .with_field(FieldMeta::new("variant"))
                .with_unique_together(&["sku", "variant"]),
        );
        Arc::new(store)
    }

    fn loader(store: &Arc<MemoryEntityStore>, config: Value) -> StoreLoader<MemoryEntityStore> {
        StoreLoader::from_config(Arc::clone(store), &config).unwrap()
    }

    fn rows(values: Value) -> Vec<Record> {
        values
            .as_array()
            .unwrap()
            .iter()
            .cloned()
            .map(record_from)
            .collect()
    }

    #[test]
    fn prepare_keeps_only_writable_model_fields() {
        let store = store();
        let l = loader(&store, json!({"model": "products.models.Product"}));
        let (lookup, prepared) = l
            .prepare_record(&record_from(json!({
                "legacy_id": "A1", "name": "W", "id": 99, "created_at": "x", "Lager": 3
            })))
            .unwrap();
        assert_eq!(Value::Object(lookup), json!({"legacy_id": "A1"}));
        assert_eq!(Value::Object(prepared), json!({"legacy_id": "A1", "name": "W"}));
        assert!(l.prepare_record(&record_from(json!({"name": "no key"}))).is_err());
    }

    #[test]
    fn reloading_identical_records_changes_nothing() {
        let store = store();
        let l = loader(&store, json!({"model": "Product"}));
        let batch = rows(json!([{"legacy_id": "A1", "name": "Widget"}]));

        let first = l.load(&batch, true);
        assert_eq!(first.created, 1);
        let before = store.all("Product");

        let second = l.load(&batch, true);
        assert_eq!((second.created, second.updated, second.unchanged), (0, 0, 1));
        assert_eq!((second.skipped, second.errors), (0, 0));
        assert_eq!(store.all("Product"), before);
    }

    #[test]
    fn repeated_key_in_one_batch_creates_once() {
        let store = store();
        let l = loader(&store, json!({"model": "Product"}));
        let result = l.load(
            &rows(json!([
                {"legacy_id": "A1", "name": "first"},
                {"legacy_id": "A1", "name": "second"}
            ])),
            true,
        );
        assert_eq!((result.created, result.updated), (1, 1));
        assert_eq!(store.count("Product"), 1);
        assert_eq!(store.all("Product")[0].get("name"), Some(&json!("second")));
    }

    #[test]
    fn a_bad_record_does_not_stop_the_batch() {
        let store = store();
        let l = loader(&store, json!({"model": "Product"}));
        let result = l.load(
            &rows(json!([
                {"legacy_id": "A1", "name": "ok"},
                {"legacy_id": "A2"},
                {"name": "no key"},
                {"legacy_id": "A3", "name": "ok too"}
            ])),
            true,
        );
        assert_eq!(result.created, 2);
        assert_eq!(result.errors, 2);
        assert_eq!(result.error_details[0].stage, LoadStage::Load);
        assert_eq!(
            result.error_details[0].context.get("error_type"),
            Some(&json!("validation"))
        );
        assert_eq!(result.error_details[1].stage, LoadStage::Preparation);
        assert!(matches!(result.outcomes[3], RecordOutcome::Created { .. }));
    }

    #[test]
    fn strategies_gate_creates_and_updates() {
        let store = store();
        let seed = loader(&store, json!({"model": "Product"}));
        seed.load(&rows(json!([{"legacy_id": "A1", "name": "old"}])), true);

        let update_only = loader(&store, json!({"model": "Product", "update_strategy": "update"}));
        let r = update_only.load(
            &rows(json!([{"legacy_id": "A1", "name": "new"}, {"legacy_id": "B1", "name": "x"}])),
            true,
        );
        assert_eq!((r.updated, r.created, r.skipped), (1, 0, 1));

        let create_only = loader(&store, json!({"model": "Product", "update_strategy": "create"}));
        let r = create_only.load(&rows(json!([{"legacy_id": "A1", "name": "newer"}])), true);
        assert_eq!((r.updated, r.skipped), (0, 1));

        let r = seed.load(&rows(json!([{"legacy_id": "A1", "name": "newest"}])), false);
        assert_eq!((r.updated, r.skipped), (0, 1));
    }

    #[test]
    fn composite_uniqueness_conflict_is_skipped() {
        let store = store();
        let l = loader(&store, json!({"model": "Product"}));
        let r = l.load(
            &rows(json!([
                {"legacy_id": "A1", "name": "a", "sku": "S", "variant": "v"},
                {"legacy_id": "A2", "name": "b", "sku": "S", "variant": "v"}
            ])),
            true,
        );
        assert_eq!((r.created, r.skipped, r.errors), (1, 1, 0));
    }

    #[test]
    fn bulk_update_failure_marks_every_pending_record() {
        let store = store();
        let l = loader(&store, json!({"model": "Product", "bulk_update": true}));
        l.load(
            &rows(json!([
                {"legacy_id": "A1", "name": "a", "sku": "S1", "variant": "v"},
                {"legacy_id": "A2", "name": "b", "sku": "S2", "variant": "v"}
            ])),
            true,
        );

        let ok = l.load(&rows(json!([{"legacy_id": "A1", "name": "renamed"}])), true);
        assert_eq!(ok.updated, 1);
        assert!(matches!(ok.outcomes[0], RecordOutcome::Updated { .. }));

        let clash = l.load(
            &rows(json!([
                {"legacy_id": "A1", "name": "renamed again"},
                {"legacy_id": "A2", "name": "b", "sku": "S1", "variant": "v"}
            ])),
            true,
        );
        assert_eq!((clash.updated, clash.errors), (0, 2));
        assert!(clash
            .error_details
            .iter()
            .all(|d| d.stage == LoadStage::BulkUpdate));
        assert_eq!(store.all("Product")[0].get("name"), Some(&json!("renamed")));
    }

    #[test]
    fn unknown_model_is_a_config_error() {
        let store = store();
        assert!(matches!(
            StoreLoader::from_config(store, &json!({"model": "sales.models.Order"})),
            Err(LoadError::Config { .. })
        ));
    }

    #[test]
    fn matching_on_the_primary_key_keeps_source_ids() {
        let store = store();
        let l = loader(&store, json!({"model": "Product", "unique_field": "id"}));
        let batch = rows(json!([
            {"id": 10, "legacy_id": "A1", "name": "A"},
            {"id": 20, "legacy_id": "A2", "name": "B"}
        ]));

        let first = l.load(&batch, true);
        assert_eq!(first.created, 2);
        let ids: Vec<u64> = store.all("Product").iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![10, 20]);

        let second = l.load(&batch, true);
        assert_eq!((second.created, second.updated, second.unchanged), (0, 0, 2));
        assert_eq!(store.count("Product"), 2);
    }

    #[test]
    fn key_rendered_the_same_is_not_a_change() {
        let store = store();
        let l = loader(&store, json!({"model": "Product"}));
        l.load(&rows(json!([{"legacy_id": 7, "name": "W"}])), true);

        let r = l.load(&rows(json!([{"legacy_id": "7", "name": "W"}])), true);
        assert_eq!((r.created, r.updated, r.unchanged), (0, 0, 1));
        assert_eq!(store.all("Product")[0].get("legacy_id"), Some(&json!(7)));
    }

    #[test]
    fn repeated_key_is_bulk_updated_once() {
        let store = store();
        let l = loader(&store, json!({"model": "Product", "bulk_update": true}));
        l.load(&rows(json!([{"legacy_id": "A1", "name": "a"}])), true);

        let r = l.load(
            &rows(json!([
                {"legacy_id": "A1", "name": "b", "sku": "S"},
                {"legacy_id": "A1", "name": "c", "sku": "S"}
            ])),
            true,
        );
        assert_eq!((r.updated, r.errors), (2, 0));
        assert_eq!(r.processed(), 2);
        let row = &store.all("Product")[0];
        assert_eq!(row.get("name"), Some(&json!("c")));
        assert_eq!(row.get("sku"), Some(&json!("S")));
    }
}
