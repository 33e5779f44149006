use crate::config::models::ModelDeclaration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

fn default_page_size() -> usize {
    1000
}

fn default_login_retries() -> u32 {
    3
}

/// Connection details for one legacy source system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConnection {
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_login_retries")]
    pub max_login_retries: u32,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_batch_size() -> usize {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDefaults {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub fail_on_filter_error: bool,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            fail_on_filter_error: false,
        }
    }
}

/// `sync-project.yml` after path resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Directory holding `sync-project.yml`.
    #[serde(skip)]
    pub root: PathBuf,
    /// Where sync mappings, states and logs are persisted.
    pub state_path: PathBuf,
    /// Where the built-in target store is persisted, if it is used.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    pub mappings_dir: PathBuf,
    #[serde(default)]
    pub sources: HashMap<String, SourceConnection>,
    #[serde(default)]
    pub defaults: RunDefaults,
    /// Target models served by the built-in store.
    #[serde(default)]
    pub models: Vec<ModelDeclaration>,
}

impl ProjectConfig {
    pub fn source(&self, name: &str) -> Option<&SourceConnection> {
        self.sources.get(name)
    }
}
