use crate::config::error::ConfigError;
use crate::config::mapping::MappingDefinition;
use crate::config::project::ProjectConfig;
use crate::config::traits::ConfigName;
use crate::utils::{paths_with_ext, resolve_path};
use log::{debug, info};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROJECT_FILE: &str = "sync-project.yml";

/// Load every `*.yml` below `path` as a `V`, rejecting duplicate names.
pub fn load_config<V>(path: &Path) -> Result<Vec<V>, ConfigError>
where
    V: DeserializeOwned + ConfigName,
{
    if !path.exists() {
        return Err(ConfigError::incorrect_path(path));
    }
    let mut seen = HashSet::new();
    let mut configs = Vec::new();
    for entry in paths_with_ext(path, "yml") {
        debug!("loading config from {}", entry.display());
        let file = fs::File::open(&entry)?;
        let config: V = serde_yaml::from_reader(file)?;
        if !seen.insert(config.name().to_string()) {
            return Err(ConfigError::duplicate_mapping(config.name()));
        }
        configs.push(config);
    }
    Ok(configs)
}

/// Read `sync-project.yml` from `project_dir` (or the working directory) and
/// resolve its relative paths against the file's location.
pub fn read_project_config(project_dir: Option<PathBuf>) -> Result<ProjectConfig, ConfigError> {
    let project_file = match project_dir {
        Some(dir) => dir.join(PROJECT_FILE),
        None => PathBuf::from(PROJECT_FILE),
    };
    if !project_file.exists() {
        return Err(ConfigError::incorrect_path(&project_file));
    }

    let file = fs::File::open(&project_file)?;
    let mut config: ProjectConfig = serde_yaml::from_reader(file)?;

    let root = project_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    config.state_path = resolve_path(&root, &config.state_path);
    config.mappings_dir = resolve_path(&root, &config.mappings_dir);
    config.store_path = config.store_path.map(|p| resolve_path(&root, &p));
    config.root = root;

    if config.defaults.batch_size == 0 {
        return Err(ConfigError::parse_error(
            "defaults.batch_size must be greater than zero",
        ));
    }

    info!(
        "loaded sync project '{}' ({} source connection(s))",
        config.name,
        config.sources.len()
    );
    Ok(config)
}

pub fn read_mappings(config: &ProjectConfig) -> Result<Vec<MappingDefinition>, ConfigError> {
    load_config::<MappingDefinition>(&config.mappings_dir)
}
