pub mod error;
pub mod models;

pub use error::CatalogError;
pub use models::*;

use chrono::{DateTime, Utc};
use common::config::MappingDefinition;
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// internal flat state (easy to serde)
#[derive(Default, Serialize, Deserialize)]
#[serde(default)]
struct State {
    mappings: HashMap<Uuid, SyncMapping>,
    mapping_name_to_id: HashMap<String, Uuid>,
    states: HashMap<Uuid, SyncState>,
    logs: HashMap<Uuid, SyncLog>,
    details: HashMap<Uuid, Vec<SyncLogDetail>>,
}

impl State {
    fn mapping_name(&self, id: &Uuid) -> String {
        self.mappings
            .get(id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn state_mut(&mut self, mapping_id: Uuid) -> Result<&mut SyncState, CatalogError> {
        if !self.mappings.contains_key(&mapping_id) {
            return Err(CatalogError::not_found(format!(
                "No sync mapping with id {mapping_id}"
            )));
        }
        Ok(self
            .states
            .entry(mapping_id)
            .or_insert_with(|| SyncState::new(mapping_id)))
    }
}

#[derive(Clone, Default)]
pub struct MemoryCatalog {
    inner: Arc<RwLock<State>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(State::default())),
        }
    }

    /* ---------- optional durability ---------- */
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => "{}".into(),
            Err(err) => {
                return Err(CatalogError::io(format!("reading {}", path.display()), err))
            }
        };
        let state: State = serde_json::from_str(&json)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(state)),
        })
    }

    pub fn flush_to(&self, path: impl AsRef<Path>) -> Result<(), CatalogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CatalogError::io(format!("creating {}", parent.display()), e))?;
        }
        let json = serde_json::to_string_pretty(&*self.inner.read())?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

pub trait Register: Send + Sync + 'static {
    /// Insert or refresh a mapping. A mapping keeps its id across
    /// re-registrations with the same name.
    fn register_mapping(&self, def: MappingDefinition) -> Result<SyncMapping, CatalogError>;

    fn register_mappings(
        &self,
        defs: Vec<MappingDefinition>,
    ) -> Result<Vec<SyncMapping>, CatalogError> {
        defs.into_iter()
            .map(|def| self.register_mapping(def))
            .collect()
    }
}

impl Register for MemoryCatalog {
    fn register_mapping(&self, def: MappingDefinition) -> Result<SyncMapping, CatalogError> {
        let mut state = self.inner.write();
        let mut mapping = SyncMapping::new(def);
        if let Some(existing) = state
            .mapping_name_to_id
            .get(&mapping.name)
            .and_then(|id| state.mappings.get(id))
        {
            mapping.id = existing.id;
            mapping.created = existing.created;
            debug!("Refreshing sync mapping '{}'", mapping.name);
        } else {
            info!(
                "Registered sync mapping '{}' ({} -> {}, {})",
                mapping.name, mapping.source, mapping.target, mapping.entity_type
            );
        }
        state
            .mapping_name_to_id
            .insert(mapping.name.clone(), mapping.id);
        state.mappings.insert(mapping.id, mapping.clone());
        Ok(mapping)
    }
}

pub trait Getter: Send + Sync + 'static {
    fn get_mapping(&self, name: &str) -> Result<SyncMapping, CatalogError>;
    fn get_mapping_by_id(&self, id: Uuid) -> Result<SyncMapping, CatalogError>;
    /// Look a mapping up by name, falling back to its entity type.
    fn find_mapping(&self, key: &str) -> Result<SyncMapping, CatalogError>;
    /// Every mapping, sorted by name.
    fn list_mappings(&self) -> Vec<SyncMapping>;
    fn get_state(&self, mapping_id: Uuid) -> Option<SyncState>;
    fn get_log(&self, id: Uuid) -> Result<SyncLog, CatalogError>;
    /// Logs of one mapping, oldest first.
    fn logs_for(&self, mapping_id: Uuid) -> Vec<SyncLog>;
    fn details_for(&self, log_id: Uuid) -> Vec<SyncLogDetail>;
}

impl Getter for MemoryCatalog {
    fn get_mapping(&self, name: &str) -> Result<SyncMapping, CatalogError> {
        let state = self.inner.read();
        state
            .mapping_name_to_id
            .get(name)
            .and_then(|id| state.mappings.get(id))
            .cloned()
            .ok_or_else(|| CatalogError::not_found(format!("No sync mapping named '{name}'")))
    }

    fn get_mapping_by_id(&self, id: Uuid) -> Result<SyncMapping, CatalogError> {
        self.inner
            .read()
            .mappings
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found(format!("No sync mapping with id {id}")))
    }

    fn find_mapping(&self, key: &str) -> Result<SyncMapping, CatalogError> {
        if let Ok(mapping) = self.get_mapping(key) {
            return Ok(mapping);
        }
        let matches: Vec<SyncMapping> = self
            .list_mappings()
            .into_iter()
            .filter(|m| m.entity_type == key)
            .collect();
        match matches.as_slice() {
            [one] => Ok(one.clone()),
            [] => Err(CatalogError::not_found(format!(
                "No sync mapping named '{key}' or syncing entity type '{key}'"
            ))),
            many => Err(CatalogError::not_found(format!(
                "Entity type '{key}' is synced by several mappings ({}), pick one by name",
                many.iter()
                    .map(|m| m.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    fn list_mappings(&self) -> Vec<SyncMapping> {
        let mut mappings: Vec<SyncMapping> =
            self.inner.read().mappings.values().cloned().collect();
        mappings.sort_by(|a, b| a.name.cmp(&b.name));
        mappings
    }

    fn get_state(&self, mapping_id: Uuid) -> Option<SyncState> {
        self.inner.read().states.get(&mapping_id).cloned()
    }

    fn get_log(&self, id: Uuid) -> Result<SyncLog, CatalogError> {
        self.inner
            .read()
            .logs
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found(format!("No sync log with id {id}")))
    }

    fn logs_for(&self, mapping_id: Uuid) -> Vec<SyncLog> {
        let mut logs: Vec<SyncLog> = self
            .inner
            .read()
            .logs
            .values()
            .filter(|l| l.mapping_id == mapping_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.started_at);
        logs
    }

    fn details_for(&self, log_id: Uuid) -> Vec<SyncLogDetail> {
        self.inner
            .read()
            .details
            .get(&log_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// State and audit-trail writes made by a running pipeline.
pub trait Bookkeeping: Send + Sync + 'static {
    fn get_or_create_state(&self, mapping_id: Uuid) -> Result<SyncState, CatalogError>;

    /// Check-and-set of the mapping's in-progress flag. Fails with
    /// [`CatalogError::SyncInProgress`] when another run holds it.
    fn try_begin_sync(
        &self,
        mapping_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SyncState, CatalogError>;

    fn update_sync_completed(
        &self,
        mapping_id: Uuid,
        success: bool,
        at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<SyncState, CatalogError>;

    /// Clear an in-progress flag left behind by a run that never finished.
    fn release_sync(&self, mapping_id: Uuid) -> Result<SyncState, CatalogError>;

    fn create_log(&self, log: &SyncLog) -> Result<(), CatalogError>;
    fn update_log(&self, log: &SyncLog) -> Result<(), CatalogError>;
    fn add_detail(&self, detail: SyncLogDetail) -> Result<(), CatalogError>;

    fn add_details(&self, details: Vec<SyncLogDetail>) -> Result<(), CatalogError> {
        details.into_iter().try_for_each(|d| self.add_detail(d))
    }
}

impl Bookkeeping for MemoryCatalog {
    fn get_or_create_state(&self, mapping_id: Uuid) -> Result<SyncState, CatalogError> {
        let mut state = self.inner.write();
        Ok(state.state_mut(mapping_id)?.clone())
    }

    fn try_begin_sync(
        &self,
        mapping_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SyncState, CatalogError> {
        let mut state = self.inner.write();
        let name = state.mapping_name(&mapping_id);
        let sync_state = state.state_mut(mapping_id)?;
        if sync_state.sync_in_progress {
            return Err(CatalogError::sync_in_progress(name));
        }
        sync_state.update_sync_started(now);
        Ok(sync_state.clone())
    }

    fn update_sync_completed(
        &self,
        mapping_id: Uuid,
        success: bool,
        at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<SyncState, CatalogError> {
        let mut state = self.inner.write();
        let sync_state = state.state_mut(mapping_id)?;
        sync_state.update_sync_completed(success, at, error);
        Ok(sync_state.clone())
    }

    fn release_sync(&self, mapping_id: Uuid) -> Result<SyncState, CatalogError> {
        let mut state = self.inner.write();
        let sync_state = state.state_mut(mapping_id)?;
        sync_state.sync_in_progress = false;
        Ok(sync_state.clone())
    }

    fn create_log(&self, log: &SyncLog) -> Result<(), CatalogError> {
        let mut state = self.inner.write();
        if state.logs.contains_key(&log.id) {
            return Err(CatalogError::duplicate(log.id.to_string()));
        }
        state.logs.insert(log.id, log.clone());
        Ok(())
    }

    fn update_log(&self, log: &SyncLog) -> Result<(), CatalogError> {
        let mut state = self.inner.write();
        match state.logs.get_mut(&log.id) {
            Some(slot) => {
                *slot = log.clone();
                Ok(())
            }
            None => Err(CatalogError::not_found(format!(
                "No sync log with id {}",
                log.id
            ))),
        }
    }

    fn add_detail(&self, detail: SyncLogDetail) -> Result<(), CatalogError> {
        let mut state = self.inner.write();
        if !state.logs.contains_key(&detail.sync_log_id) {
            return Err(CatalogError::not_found(format!(
                "No sync log with id {}",
                detail.sync_log_id
            )));
        }
        state
            .details
            .entry(detail.sync_log_id)
            .or_default()
            .push(detail);
        Ok(())
    }
}

/// Everything a pipeline needs from the bookkeeping store.
pub trait SyncCatalog: Register + Getter + Bookkeeping {}

impl<T: Register + Getter + Bookkeeping> SyncCatalog for T {}
