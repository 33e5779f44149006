use catalog::{Getter, MemoryCatalog, Register, SyncCatalog, SyncStatus};
use common::config::loader::{read_mappings, read_project_config};
use components::store::EntitySchema;
use components::{EntityStore, MemoryEntityStore};
use logging::RunContext;
use pipeline::{ComponentOverrides, ComponentRegistry, PipelineFactory, RunOptions};
use serde_json::json;
use std::sync::Arc;
use test_utils::TestProject;

#[test]
fn project_mapping_runs_through_the_default_registry() {
    let project = TestProject::new().unwrap();
    let config = read_project_config(Some(project.root().to_path_buf())).unwrap();

    let store = MemoryEntityStore::new();
    for model in &config.models {
        store.register_model(EntitySchema::from(model));
    }
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.register_mappings(read_mappings(&config).unwrap()).unwrap();

    let store = Arc::new(store);
    let entity_store: Arc<dyn EntityStore> = store.clone();
    let sync_catalog: Arc<dyn SyncCatalog> = catalog.clone();
    let factory = PipelineFactory::new(
        ComponentRegistry::with_defaults(entity_store, &config),
        sync_catalog,
    );

    let mapping = catalog.find_mapping("product").unwrap();
    let mut pipeline = factory
        .create_pipeline(&mapping, ComponentOverrides::none())
        .unwrap();
    let opts = RunOptions::new(config.defaults.batch_size).unwrap();
    let log = pipeline.run(&opts, &RunContext::new(&mapping.name, &mapping.entity_type));

    assert_eq!(log.status, SyncStatus::Completed, "{:?}", log.error_message);
    assert_eq!(log.records_created, 3);

    let mut products = store.all("Product");
    products.sort_by_key(|p| p.id);
    assert_eq!(products[0].get("name"), Some(&json!("Schraube M4")));
    assert_eq!(products[0].get("price"), Some(&json!(0.15)));
    assert!(products[0].get("Lager").is_none());

    let state_path = config.state_path.clone();
    catalog.flush_to(&state_path).unwrap();
    let reloaded = MemoryCatalog::load_from(&state_path).unwrap();
    assert_eq!(
        reloaded.get_log(log.id).unwrap().status,
        SyncStatus::Completed
    );
}

#[test]
fn absolute_export_path_is_used_as_is() {
    let project = TestProject::new().unwrap();
    let config = read_project_config(Some(project.root().to_path_buf())).unwrap();
    let export = project
        .write_data("products_export.json", &test_utils::legacy_products()[..1])
        .unwrap();

    let store = MemoryEntityStore::new();
    for model in &config.models {
        store.register_model(EntitySchema::from(model));
    }
    let catalog = Arc::new(MemoryCatalog::new());
    let mapping = catalog
        .register_mapping(test_utils::product_mapping(&export))
        .unwrap();

    let store = Arc::new(store);
    let entity_store: Arc<dyn EntityStore> = store.clone();
    let sync_catalog: Arc<dyn SyncCatalog> = catalog.clone();
    let factory = PipelineFactory::new(
        ComponentRegistry::with_defaults(entity_store, &config),
        sync_catalog,
    );
    let mut pipeline = factory
        .create_pipeline(&mapping, ComponentOverrides::none())
        .unwrap();
    let log = pipeline.run(
        &RunOptions::new(10).unwrap().full(),
        &RunContext::new(&mapping.name, &mapping.entity_type),
    );

    assert_eq!(log.status, SyncStatus::Completed, "{:?}", log.error_message);
    assert_eq!(store.count("Product"), 1);
    let details = catalog.details_for(log.id);
    assert_eq!(details[0].record_id.as_deref(), Some("10001"));
}
