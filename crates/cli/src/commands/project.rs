use catalog::{MemoryCatalog, Register, SyncCatalog};
use common::config::loader::{read_mappings, read_project_config};
use common::config::ProjectConfig;
use common::error::SyncError;
use components::store::EntitySchema;
use components::{EntityStore, MemoryEntityStore};
use log::debug;
use pipeline::{ComponentRegistry, PipelineFactory};
use std::path::PathBuf;
use std::sync::Arc;

/// A project on disk with its catalog and target store loaded.
pub struct SyncProject {
    pub config: ProjectConfig,
    pub catalog: Arc<MemoryCatalog>,
    pub store: Arc<MemoryEntityStore>,
}

impl SyncProject {
    /// Read `sync-project.yml`, restore persisted state and (re-)register
    /// every mapping file so edits on disk take effect.
    pub fn open(config_path: Option<PathBuf>) -> Result<Self, SyncError> {
        let config = read_project_config(config_path).map_err(SyncError::config)?;

        let catalog = MemoryCatalog::load_from(&config.state_path).map_err(SyncError::config)?;
        let mappings = read_mappings(&config).map_err(SyncError::config)?;
        debug!("registering {} mapping(s)", mappings.len());
        catalog.register_mappings(mappings).map_err(SyncError::config)?;

        let store = match &config.store_path {
            Some(path) => MemoryEntityStore::load_from(path).map_err(SyncError::config)?,
            None => MemoryEntityStore::new(),
        };
        for model in &config.models {
            store.register_model(EntitySchema::from(model));
        }

        Ok(Self {
            config,
            catalog: Arc::new(catalog),
            store: Arc::new(store),
        })
    }

    pub fn factory(&self) -> PipelineFactory {
        let store: Arc<dyn EntityStore> = self.store.clone();
        let catalog: Arc<dyn SyncCatalog> = self.catalog.clone();
        PipelineFactory::new(ComponentRegistry::with_defaults(store, &self.config), catalog)
    }

    /// Persist the catalog and, when configured, the target store.
    pub fn flush(&self) -> Result<(), SyncError> {
        self.catalog
            .flush_to(&self.config.state_path)
            .map_err(SyncError::run)?;
        if let Some(path) = &self.config.store_path {
            self.store.flush_to(path).map_err(SyncError::run)?;
        }
        Ok(())
    }
}
