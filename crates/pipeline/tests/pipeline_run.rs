use catalog::{
    Bookkeeping, DetailStatus, Getter, MemoryCatalog, Register, SyncCatalog, SyncMapping,
    SyncStatus,
};
use chrono::{Duration, Utc};
use common::config::{FilterCondition, FilterFormat, IncrementalConfig, MappingConfig, MappingDefinition};
use common::types::record_from;
use common::Record;
use components::load::{LoaderConfig, StoreLoader};
use components::store::{EntitySchema, FieldMeta};
use components::transform::{FieldMapping, MappingTransformer};
use components::extract::StaticExtractor;
use components::{MemoryEntityStore, TransformError, TransformedRecord, Transformer};
use logging::RunContext;
use pipeline::{Pipeline, PipelineError, RunOptions};
use serde_json::{json, Value};
use std::sync::Arc;

struct Harness {
    catalog: Arc<MemoryCatalog>,
    store: Arc<MemoryEntityStore>,
    mapping: SyncMapping,
}

impl Harness {
    fn new() -> Self {
        let store = MemoryEntityStore::new();
        store.register_model(
            EntitySchema::new("Item")
                .with_field(FieldMeta::new("code").required().unique())
                .with_field(FieldMeta::new("name")),
        );
        let catalog = MemoryCatalog::new();
        let mapping = catalog
            .register_mapping(MappingDefinition {
                name: "items".into(),
                entity_type: "item".into(),
                source: "legacy_erp".into(),
                target: "pyerp".into(),
                source_config: json!({"key_field": "id"}),
                target_config: json!({"model": "inventory.models.Item", "unique_field": "code"}),
                mapping_config: MappingConfig {
                    incremental: Some(IncrementalConfig {
                        timestamp_filter_format: FilterFormat::Conditions(vec![FilterCondition(
                            "modified_date".into(),
                            ">".into(),
                            "{{ datetime }}".into(),
                        )]),
                    }),
                    ..Default::default()
                },
                active: true,
            })
            .unwrap();
        Self {
            catalog: Arc::new(catalog),
            store: Arc::new(store),
            mapping,
        }
    }

    fn pipeline_with(
        &self,
        extractor: StaticExtractor,
        transformer: impl Transformer + 'static,
    ) -> Pipeline {
        let mut config = LoaderConfig::new("inventory.models.Item");
        config.unique_field = "code".into();
        let loader = StoreLoader::new(self.store.clone(), config).unwrap();
        let catalog: Arc<dyn SyncCatalog> = self.catalog.clone();
        Pipeline::new(
            self.mapping.clone(),
            Box::new(extractor),
            Box::new(transformer),
            Box::new(loader),
            catalog,
        )
    }

    fn pipeline(&self, extractor: StaticExtractor) -> Pipeline {
        self.pipeline_with(extractor, item_transformer())
    }

    fn ctx(&self) -> RunContext {
        RunContext::new(&self.mapping.name, &self.mapping.entity_type)
    }
}

fn item_transformer() -> MappingTransformer {
    MappingTransformer::new("item", FieldMapping::new().map("code", "id").map("name", "name"))
}

fn rows(values: Value) -> Vec<Record> {
    match values {
        Value::Array(items) => items.into_iter().map(record_from).collect(),
        _ => panic!("expected an array"),
    }
}

fn two_items() -> Vec<Record> {
    rows(json!([{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]))
}

fn opts(batch_size: usize) -> RunOptions {
    RunOptions::new(batch_size).unwrap()
}

#[test]
fn zero_batch_size_is_rejected() {
    assert!(matches!(
        RunOptions::new(0),
        Err(PipelineError::InvalidBatchSize { .. })
    ));
}

#[test]
fn second_identical_run_changes_nothing() {
    let h = Harness::new();

    let log = h.pipeline(StaticExtractor::new(two_items())).run(&opts(10).full(), &h.ctx());
    assert_eq!(log.status, SyncStatus::Completed);
    assert_eq!(log.records_created, 2);
    assert!(log.is_full_sync);
    assert_eq!(h.store.count("Item"), 2);
    let before = h.store.all("Item");

    let log = h.pipeline(StaticExtractor::new(two_items())).run(&opts(10).full(), &h.ctx());
    assert_eq!(log.status, SyncStatus::Completed);
    assert_eq!(log.records_created, 0);
    assert_eq!(log.records_updated, 0);
    assert_eq!(log.records_skipped, 0);
    assert_eq!(log.records_failed, 0);
    assert_eq!(log.records_succeeded, 2);
    assert_eq!(log.records_processed, 2);

    let mut after = h.store.all("Item");
    let mut before = before;
    before.sort_by_key(|e| e.id);
    after.sort_by_key(|e| e.id);
    assert_eq!(before, after);

    let details = h.catalog.details_for(log.id);
    assert_eq!(details.len(), 2);
    assert!(details.iter().all(|d| d.status == DetailStatus::Success));
    assert_eq!(details[0].result_data["outcome"], "unchanged");
    assert_eq!(details[0].record_id.as_deref(), Some("1"));
}

#[test]
fn failing_record_does_not_stop_the_batch_or_advance_the_watermark() {
    let h = Harness::new();
    let records = rows(json!([
        {"id": 1, "name": "A"},
        {"id": null, "name": "no key"},
        {"id": 3, "name": "C"}
    ]));

    let log = h.pipeline(StaticExtractor::new(records)).run(&opts(10), &h.ctx());
    assert_eq!(log.status, SyncStatus::CompletedWithErrors);
    assert_eq!(log.records_created, 2);
    assert_eq!(log.records_failed, 1);
    assert_eq!(log.records_processed, 3);

    let details = h.catalog.details_for(log.id);
    let failed: Vec<_> = details
        .iter()
        .filter(|d| d.status == DetailStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0]
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("preparation"));

    let state = h.catalog.get_state(h.mapping.id).unwrap();
    assert_eq!(state.last_successful_sync_time, None);
    assert_eq!(state.last_sync_status, Some(SyncStatus::CompletedWithErrors));
    assert!(!state.sync_in_progress);
}

#[test]
fn connection_failure_returns_a_failed_log() {
    let h = Harness::new();
    let extractor = StaticExtractor::new(two_items()).fail_on_connect();
    let probe = extractor.probe();

    let log = h.pipeline(extractor).run(&opts(10), &h.ctx());
    assert_eq!(log.status, SyncStatus::Failed);
    assert!(log
        .error_message
        .as_deref()
        .unwrap()
        .contains("static source is unavailable"));
    assert!(log.trace.as_deref().unwrap().contains("caused by"));
    assert!(log.completed_at.is_some());
    assert_eq!(probe.closes(), 1);

    let stored = h.catalog.get_log(log.id).unwrap();
    assert_eq!(stored.status, SyncStatus::Failed);
    let state = h.catalog.get_state(h.mapping.id).unwrap();
    assert_eq!(state.last_sync_status, Some(SyncStatus::Failed));
    assert!(state.last_error.is_some());
    assert!(!state.sync_in_progress);
    assert_eq!(h.store.count("Item"), 0);
}

#[test]
fn incremental_run_filters_on_the_watermark() {
    let h = Harness::new();

    let first = StaticExtractor::new(two_items());
    let first_probe = first.probe();
    let log = h.pipeline(first).run(&opts(10), &h.ctx());
    assert_eq!(log.status, SyncStatus::Completed);
    assert_eq!(first_probe.queries()[0].filter, None);
    let watermark = h
        .catalog
        .get_state(h.mapping.id)
        .unwrap()
        .last_successful_sync_time
        .unwrap();

    let second = StaticExtractor::new(two_items());
    let second_probe = second.probe();
    let log = h.pipeline(second).run(&opts(10), &h.ctx());
    let expected = format!(
        "modified_date > '{}'",
        watermark.format("%Y-%m-%d %H:%M:%S")
    );
    assert_eq!(second_probe.queries()[0].filter.as_deref(), Some(expected.as_str()));
    assert_eq!(log.sync_params["query"]["filter"], expected.as_str());
    assert!(!log.is_full_sync);

    let advanced = h
        .catalog
        .get_state(h.mapping.id)
        .unwrap()
        .last_successful_sync_time
        .unwrap();
    assert!(advanced >= watermark);

    // a full run ignores the watermark
    let third = StaticExtractor::new(two_items());
    let third_probe = third.probe();
    h.pipeline(third).run(&opts(10).full(), &h.ctx());
    assert_eq!(third_probe.queries()[0].filter, None);
}

#[test]
fn rejected_filter_is_dropped_unless_strict() {
    let h = Harness::new();
    let earlier = Utc::now() - Duration::hours(2);
    h.catalog.try_begin_sync(h.mapping.id, earlier).unwrap();
    h.catalog
        .update_sync_completed(h.mapping.id, true, earlier, None)
        .unwrap();

    let lenient = h
        .pipeline(StaticExtractor::new(two_items()).without_filter_support())
        .run(&opts(10), &h.ctx());
    assert_eq!(lenient.status, SyncStatus::Completed);
    assert_eq!(lenient.records_created, 2);

    let strict = h
        .pipeline(StaticExtractor::new(two_items()).without_filter_support())
        .run(&opts(10).fail_on_filter_error(true), &h.ctx());
    assert_eq!(strict.status, SyncStatus::Failed);
    assert!(strict.error_message.as_deref().unwrap().contains("filter"));
}

#[test]
fn overlapping_run_is_refused_without_touching_state() {
    let h = Harness::new();
    let held = h.catalog.try_begin_sync(h.mapping.id, Utc::now()).unwrap();

    let extractor = StaticExtractor::new(two_items());
    let probe = extractor.probe();
    let log = h.pipeline(extractor).run(&opts(10), &h.ctx());

    assert_eq!(log.status, SyncStatus::Failed);
    assert!(log
        .error_message
        .as_deref()
        .unwrap()
        .contains("already being synced"));
    assert_eq!(probe.connects(), 0);
    assert_eq!(h.catalog.get_state(h.mapping.id).unwrap(), held);

    h.catalog.release_sync(h.mapping.id).unwrap();
    let log = h.pipeline(StaticExtractor::new(two_items())).run(&opts(10), &h.ctx());
    assert_eq!(log.status, SyncStatus::Completed);
}

/// Fails any batch holding an item named "boom", returns nothing for
/// batches holding "void".
struct PickyTransformer(MappingTransformer);

impl Transformer for PickyTransformer {
    fn transform(&self, batch: &[Record]) -> Result<Vec<TransformedRecord>, TransformError> {
        let named = |name: &str| batch.iter().any(|r| r.get("name") == Some(&json!(name)));
        if named("boom") {
            return Err(TransformError::batch("upstream schema changed"));
        }
        if named("void") {
            return Ok(vec![]);
        }
        self.0.transform(batch)
    }
}

#[test]
fn transformation_failures_are_batch_scoped() {
    let h = Harness::new();
    let records = rows(json!([
        {"id": 1, "name": "A"},
        {"id": 2, "name": "boom"},
        {"id": 3, "name": "void"},
        {"id": 4, "name": "D"},
        {"id": 5, "name": "E"},
        {"id": 6, "name": "F"}
    ]));

    let log = h
        .pipeline_with(StaticExtractor::new(records), PickyTransformer(item_transformer()))
        .run(&opts(2), &h.ctx());

    assert_eq!(log.status, SyncStatus::CompletedWithErrors);
    assert_eq!(log.records_failed, 4);
    assert_eq!(log.records_created, 2);
    assert_eq!(log.records_processed, 6);

    let messages: Vec<String> = h
        .catalog
        .details_for(log.id)
        .into_iter()
        .filter_map(|d| d.error_message)
        .collect();
    assert_eq!(
        messages
            .iter()
            .filter(|m| m.starts_with("batch transformation failed: "))
            .count(),
        2
    );
    assert_eq!(
        messages
            .iter()
            .filter(|m| *m == "transformation produced no data")
            .count(),
        2
    );
}

#[test]
fn verbose_context_does_not_change_results() {
    let h = Harness::new();
    let ctx = h.ctx().verbose(true);
    let log = h.pipeline(StaticExtractor::new(two_items())).run(&opts(1), &ctx);
    assert_eq!(log.status, SyncStatus::Completed);
    assert_eq!(h.catalog.logs_for(h.mapping.id).len(), 1);
}

#[test]
fn rerun_keyed_on_primary_key_creates_nothing_new() {
    let h = Harness::new();
    h.store
        .register_model(EntitySchema::new("Thing").with_field(FieldMeta::new("name")));
    let run = || {
        let mut config = LoaderConfig::new("inventory.models.Thing");
        config.unique_field = "id".into();
        let loader = StoreLoader::new(h.store.clone(), config).unwrap();
        let transformer =
            MappingTransformer::new("thing", FieldMapping::new().map("id", "id").map("name", "name"));
        let catalog: Arc<dyn SyncCatalog> = h.catalog.clone();
        Pipeline::new(
            h.mapping.clone(),
            Box::new(StaticExtractor::new(two_items())),
            Box::new(transformer),
            Box::new(loader),
            catalog,
        )
        .run(&opts(10).full(), &h.ctx())
    };

    let first = run();
    assert_eq!(first.status, SyncStatus::Completed);
    assert_eq!(first.records_created, 2);
    assert_eq!(h.store.count("Thing"), 2);

    let second = run();
    assert_eq!(second.status, SyncStatus::Completed);
    assert_eq!((second.records_created, second.records_updated), (0, 0));
    assert_eq!((second.records_skipped, second.records_failed), (0, 0));
    assert_eq!(h.store.count("Thing"), 2);
}

/// Drops every row named "drop".
struct DroppingTransformer(MappingTransformer);

impl Transformer for DroppingTransformer {
    fn transform(&self, batch: &[Record]) -> Result<Vec<TransformedRecord>, TransformError> {
        let mut out = self.0.transform(batch)?;
        out.retain(|rec| rec.source.get("name") != Some(&json!("drop")));
        Ok(out)
    }
}

#[test]
fn rows_a_transformer_drops_are_failed() {
    let h = Harness::new();
    let records = rows(json!([
        {"id": 1, "name": "A"},
        {"id": 2, "name": "drop"},
        {"id": 3, "name": "C"}
    ]));

    let log = h
        .pipeline_with(StaticExtractor::new(records), DroppingTransformer(item_transformer()))
        .run(&opts(10), &h.ctx());

    assert_eq!(log.status, SyncStatus::CompletedWithErrors);
    assert_eq!((log.records_created, log.records_failed), (2, 1));
    assert_eq!(log.records_processed, 3);

    let details = h.catalog.details_for(log.id);
    assert_eq!(details.len(), 3);
    let failed: Vec<_> = details
        .iter()
        .filter(|d| d.status == DetailStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].record_id.as_deref(), Some("2"));
    assert_eq!(
        failed[0].error_message.as_deref(),
        Some("transformer returned no output for record")
    );
    let state = h.catalog.get_state(h.mapping.id).unwrap();
    assert_eq!(state.last_successful_sync_time, None);
}
