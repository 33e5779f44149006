use crate::error::PipelineError;
use crate::runner::Pipeline;
use catalog::{SyncCatalog, SyncMapping};
use common::config::{ProjectConfig, SourceConnection};
use common::utils::resolve_path;
use components::extract::{LegacyApiExtractor, StaticExtractor};
use components::load::StoreLoader;
use components::transform::MappingTransformer;
use components::{EntityStore, Extractor, Loader, Transformer};
use log::debug;
use serde_json::{Map, Value};
use shared_clients::LegacyApiClient;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_EXTRACTOR: &str = "legacy_api";
pub const DEFAULT_TRANSFORMER: &str = "field_mapping";
pub const DEFAULT_LOADER: &str = "store";

/// Builds a component from the mapping and the config blob meant for it.
pub type ExtractorCtor =
    Arc<dyn Fn(&SyncMapping, &Value) -> Result<Box<dyn Extractor>, PipelineError> + Send + Sync>;
pub type TransformerCtor =
    Arc<dyn Fn(&SyncMapping, &Value) -> Result<Box<dyn Transformer>, PipelineError> + Send + Sync>;
pub type LoaderCtor =
    Arc<dyn Fn(&SyncMapping, &Value) -> Result<Box<dyn Loader>, PipelineError> + Send + Sync>;

/// Named component constructors, filled once at start-up.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    extractors: BTreeMap<String, ExtractorCtor>,
    transformers: BTreeMap<String, TransformerCtor>,
    loaders: BTreeMap<String, LoaderCtor>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in components:
    ///
    /// * extractors `static` (JSON export, paths relative to the project root)
    ///   and `legacy_api` (the project's `sources` entry named by the mapping)
    /// * transformer `field_mapping`
    /// * loader `store`, writing into `store`
    pub fn with_defaults(store: Arc<dyn EntityStore>, project: &ProjectConfig) -> Self {
        let mut registry = Self::new();

        let root = project.root.clone();
        registry.register_extractor("static", move |_, config| {
            let config = with_resolved_path(config, &root);
            let extractor = StaticExtractor::from_config(&config)
                .map_err(|e| PipelineError::setup_from("static extractor", e))?;
            Ok(Box::new(extractor) as Box<dyn Extractor>)
        });

        let sources: HashMap<String, SourceConnection> = project.sources.clone();
        registry.register_extractor(DEFAULT_EXTRACTOR, move |mapping, config| {
            let conn = sources.get(&mapping.source).ok_or_else(|| {
                PipelineError::setup(format!(
                    "mapping '{}' reads from source '{}' which has no connection settings",
                    mapping.name, mapping.source
                ))
            })?;
            let client = Arc::new(LegacyApiClient::new(conn)?);
            let extractor = LegacyApiExtractor::from_config(client, config)
                .map_err(|e| PipelineError::setup_from("legacy_api extractor", e))?;
            Ok(Box::new(extractor) as Box<dyn Extractor>)
        });

        registry.register_transformer(DEFAULT_TRANSFORMER, |mapping, config| {
            Ok(Box::new(MappingTransformer::from_config(&mapping.entity_type, config)?)
                as Box<dyn Transformer>)
        });

        registry.register_loader(DEFAULT_LOADER, move |_, config| {
            Ok(Box::new(StoreLoader::from_config(store.clone(), config)?) as Box<dyn Loader>)
        });

        registry
    }

    pub fn register_extractor<F>(&mut self, key: impl Into<String>, ctor: F) -> &mut Self
    where
        F: Fn(&SyncMapping, &Value) -> Result<Box<dyn Extractor>, PipelineError>
            + Send
            + Sync
            + 'static,
    {
        self.extractors.insert(key.into(), Arc::new(ctor));
        self
    }

    pub fn register_transformer<F>(&mut self, key: impl Into<String>, ctor: F) -> &mut Self
    where
        F: Fn(&SyncMapping, &Value) -> Result<Box<dyn Transformer>, PipelineError>
            + Send
            + Sync
            + 'static,
    {
        self.transformers.insert(key.into(), Arc::new(ctor));
        self
    }

    pub fn register_loader<F>(&mut self, key: impl Into<String>, ctor: F) -> &mut Self
    where
        F: Fn(&SyncMapping, &Value) -> Result<Box<dyn Loader>, PipelineError>
            + Send
            + Sync
            + 'static,
    {
        self.loaders.insert(key.into(), Arc::new(ctor));
        self
    }

    pub fn extractor(&self, key: &str) -> Result<&ExtractorCtor, PipelineError> {
        lookup(&self.extractors, "extractor", key)
    }

    pub fn transformer(&self, key: &str) -> Result<&TransformerCtor, PipelineError> {
        lookup(&self.transformers, "transformer", key)
    }

    pub fn loader(&self, key: &str) -> Result<&LoaderCtor, PipelineError> {
        lookup(&self.loaders, "loader", key)
    }
}

fn lookup<'a, T>(
    table: &'a BTreeMap<String, T>,
    kind: &str,
    key: &str,
) -> Result<&'a T, PipelineError> {
    table.get(key).ok_or_else(|| {
        let known: Vec<String> = table.keys().cloned().collect();
        PipelineError::unknown_component(kind, key, &known)
    })
}

fn with_resolved_path(config: &Value, root: &Path) -> Value {
    let mut config = config.clone();
    if let Some(path) = config.get("path").and_then(Value::as_str) {
        let resolved = resolve_path(root, &PathBuf::from(path));
        config["path"] = Value::from(resolved.to_string_lossy().into_owned());
    }
    config
}

/// Explicit component instances that win over the registry.
#[derive(Default)]
pub struct ComponentOverrides {
    pub extractor: Option<Box<dyn Extractor>>,
    pub transformer: Option<Box<dyn Transformer>>,
    pub loader: Option<Box<dyn Loader>>,
}

impl ComponentOverrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.extractor = Some(Box::new(extractor));
        self
    }

    pub fn transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformer = Some(Box::new(transformer));
        self
    }

    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }
}

/// Assembles [`Pipeline`]s from registered mappings.
pub struct PipelineFactory {
    registry: ComponentRegistry,
    catalog: Arc<dyn SyncCatalog>,
}

impl PipelineFactory {
    pub fn new(registry: ComponentRegistry, catalog: Arc<dyn SyncCatalog>) -> Self {
        Self { registry, catalog }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Resolve and build every component, failing before any I/O when a key
    /// is unknown or a config is incomplete.
    pub fn create_pipeline(
        &self,
        mapping: &SyncMapping,
        overrides: ComponentOverrides,
    ) -> Result<Pipeline, PipelineError> {
        let loader_config = normalize_loader_config(&mapping.target_config)?;
        let mut mapping = mapping.clone();
        mapping.target_config = loader_config.clone();

        let extractor = match overrides.extractor {
            Some(extractor) => extractor,
            None => {
                let key = extractor_key(&mapping);
                debug!("{}: extractor '{key}'", mapping.name);
                let ctor = self.registry.extractor(key)?;
                ctor(&mapping, &mapping.source_config)?
            }
        };
        let transformer = match overrides.transformer {
            Some(transformer) => transformer,
            None => {
                let key = mapping
                    .mapping_config
                    .transformer
                    .as_deref()
                    .unwrap_or(DEFAULT_TRANSFORMER);
                debug!("{}: transformer '{key}'", mapping.name);
                let ctor = self.registry.transformer(key)?;
                ctor(&mapping, &mapping.mapping_config.as_value())?
            }
        };
        let loader = match overrides.loader {
            Some(loader) => loader,
            None => {
                let key = loader_key(&mapping);
                debug!("{}: loader '{key}'", mapping.name);
                let ctor = self.registry.loader(key)?;
                ctor(&mapping, &loader_config)?
            }
        };

        Ok(Pipeline::new(
            mapping,
            extractor,
            transformer,
            loader,
            self.catalog.clone(),
        ))
    }
}

/// `mapping_config.extractor`, then `source_config.extractor`.
fn extractor_key(mapping: &SyncMapping) -> &str {
    mapping
        .mapping_config
        .extractor
        .as_deref()
        .or_else(|| mapping.source_config.get("extractor").and_then(Value::as_str))
        .unwrap_or(DEFAULT_EXTRACTOR)
}

/// `mapping_config.loader`, then `target_config.loader`.
fn loader_key(mapping: &SyncMapping) -> &str {
    mapping
        .mapping_config
        .loader
        .as_deref()
        .or_else(|| mapping.target_config.get("loader").and_then(Value::as_str))
        .unwrap_or(DEFAULT_LOADER)
}

/// Fill `app_label`/`model_name` from a dotted `model` path and default
/// `unique_field` to `key_field`, then `legacy_id`.
///
/// `app.models.Model` and `app.Model` both give (`app`, `Model`); longer
/// paths take the segment before `models`, or else the first and last
/// segments.
pub fn normalize_loader_config(target_config: &Value) -> Result<Value, PipelineError> {
    let mut config: Map<String, Value> = match target_config {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(PipelineError::setup(format!(
                "target_config must be a map, got {other}"
            )))
        }
    };

    if let Some(model) = config.get("model").and_then(Value::as_str).map(str::to_string) {
        let (app_label, model_name) = split_model_path(&model);
        if !config.contains_key("app_label") {
            if let Some(app) = app_label {
                config.insert("app_label".into(), Value::from(app));
            }
        }
        if !config.contains_key("model_name") {
            config.insert("model_name".into(), Value::from(model_name));
        }
    }

    if !config.contains_key("unique_field") {
        let unique = config
            .get("key_field")
            .and_then(Value::as_str)
            .unwrap_or("legacy_id")
            .to_string();
        config.insert("unique_field".into(), Value::from(unique));
    }

    Ok(Value::Object(config))
}

fn split_model_path(model: &str) -> (Option<String>, String) {
    let parts: Vec<&str> = model.split('.').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [] => (None, model.to_string()),
        [only] => (None, only.to_string()),
        [.., app, "models", name] => (Some(app.to_string()), name.to_string()),
        [first, .., last] => (Some(first.to_string()), last.to_string()),
    }
}
