use chrono::{DateTime, Utc};
use common::config::{MappingConfig, MappingDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// A registered source → target mapping. Read-only while a run is going.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMapping {
    pub id: Uuid,
    pub name: String,
    pub source: String,
    pub target: String,
    pub entity_type: String,
    pub source_config: Value,
    pub target_config: Value,
    pub mapping_config: MappingConfig,
    pub active: bool,
    pub created: DateTime<Utc>,
}

impl SyncMapping {
    pub fn new(def: MappingDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: def.name,
            source: def.source,
            target: def.target,
            entity_type: def.entity_type,
            source_config: def.source_config,
            target_config: def.target_config,
            mapping_config: def.mapping_config,
            active: def.active,
            created: Utc::now(),
        }
    }

    /// True when `key` is this mapping's name or entity type.
    pub fn answers_to(&self, key: &str) -> bool {
        self.name == key || self.entity_type == key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Started,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl SyncStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, SyncStatus::Started)
    }
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SyncStatus::Started => "started",
            SyncStatus::Completed => "completed",
            SyncStatus::CompletedWithErrors => "completed_with_errors",
            SyncStatus::Failed => "failed",
        })
    }
}

/// Per-mapping watermark and run flag. Exactly one per mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub mapping_id: Uuid,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_successful_sync_time: Option<DateTime<Utc>>,
    pub sync_in_progress: bool,
    pub last_sync_status: Option<SyncStatus>,
    pub last_error: Option<String>,
}

impl SyncState {
    pub fn new(mapping_id: Uuid) -> Self {
        Self {
            mapping_id,
            last_sync_time: None,
            last_successful_sync_time: None,
            sync_in_progress: false,
            last_sync_status: None,
            last_error: None,
        }
    }

    pub fn update_sync_started(&mut self, now: DateTime<Utc>) {
        self.sync_in_progress = true;
        self.last_sync_time = Some(now);
        self.last_sync_status = Some(SyncStatus::Started);
    }

    /// Close the run. The watermark moves to `at` only on success and never
    /// moves backwards.
    pub fn update_sync_completed(
        &mut self,
        success: bool,
        at: DateTime<Utc>,
        error: Option<String>,
    ) {
        self.sync_in_progress = false;
        if success {
            self.last_successful_sync_time = match self.last_successful_sync_time {
                Some(prev) if prev > at => Some(prev),
                _ => Some(at),
            };
            self.last_sync_status = Some(SyncStatus::Completed);
            self.last_error = None;
        } else {
            self.last_sync_status = Some(if error.is_some() {
                SyncStatus::Failed
            } else {
                SyncStatus::CompletedWithErrors
            });
            self.last_error = error;
        }
    }
}

/// Audit record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: Uuid,
    pub mapping_id: Uuid,
    pub status: SyncStatus,
    pub is_full_sync: bool,
    pub sync_params: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: usize,
    pub records_succeeded: usize,
    pub records_created: usize,
    pub records_updated: usize,
    pub records_skipped: usize,
    pub records_failed: usize,
    pub error_message: Option<String>,
    pub trace: Option<String>,
}

impl SyncLog {
    pub fn started(mapping_id: Uuid, is_full_sync: bool, sync_params: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            mapping_id,
            status: SyncStatus::Started,
            is_full_sync,
            sync_params,
            started_at: Utc::now(),
            completed_at: None,
            records_processed: 0,
            records_succeeded: 0,
            records_created: 0,
            records_updated: 0,
            records_skipped: 0,
            records_failed: 0,
            error_message: None,
            trace: None,
        }
    }

    pub fn mark_completed(&mut self, success_count: usize, failure_count: usize) {
        self.records_succeeded = success_count;
        self.records_failed = failure_count;
        self.status = if failure_count == 0 {
            SyncStatus::Completed
        } else {
            SyncStatus::CompletedWithErrors
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, trace: Option<String>) {
        self.status = SyncStatus::Failed;
        self.error_message = Some(message.into());
        self.trace = trace;
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailStatus {
    Success,
    Failed,
    Skipped,
}

/// Outcome of one source record within a run. Written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogDetail {
    pub id: Uuid,
    pub sync_log_id: Uuid,
    pub record_id: Option<String>,
    pub status: DetailStatus,
    pub source_data: Value,
    pub transformed_data: Value,
    pub result_data: Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SyncLogDetail {
    pub fn new(sync_log_id: Uuid, record_id: Option<String>, status: DetailStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            sync_log_id,
            record_id,
            status,
            source_data: Value::Null,
            transformed_data: Value::Null,
            result_data: Value::Null,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}
