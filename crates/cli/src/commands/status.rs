use crate::commands::project::SyncProject;
use catalog::{Bookkeeping, Getter, SyncMapping, SyncState};
use clap::Args;
use common::error::SyncError;
use log::info;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct UnlockArgs {
    /// Mapping name or entity type
    pub mapping: String,
}

pub fn handle_status(config_path: Option<PathBuf>) -> Result<(), SyncError> {
    let project = SyncProject::open(config_path)?;
    for mapping in project.catalog.list_mappings() {
        let state = project.catalog.get_state(mapping.id);
        println!("{}", status_line(&mapping, state.as_ref()));
    }
    Ok(())
}

pub fn handle_mappings(config_path: Option<PathBuf>) -> Result<(), SyncError> {
    let project = SyncProject::open(config_path)?;
    for m in project.catalog.list_mappings() {
        let cfg = &m.mapping_config;
        println!(
            "{:<24} {:<20} {} -> {}  transformer={} deps=[{}]{}",
            m.name,
            m.entity_type,
            m.source,
            m.target,
            cfg.transformer.as_deref().unwrap_or("field_mapping"),
            cfg.dependencies.join(", "),
            if m.active { "" } else { "  (inactive)" }
        );
    }
    Ok(())
}

/// Clear the in-progress flag of a run that died without closing its state.
pub fn handle_unlock(args: &UnlockArgs, config_path: Option<PathBuf>) -> Result<(), SyncError> {
    let project = SyncProject::open(config_path)?;
    let mapping = project
        .catalog
        .find_mapping(&args.mapping)
        .map_err(SyncError::config)?;
    let state = project
        .catalog
        .release_sync(mapping.id)
        .map_err(SyncError::run)?;
    project.flush()?;
    info!("Released {}", mapping.name);
    println!("{}", status_line(&mapping, Some(&state)));
    Ok(())
}

fn status_line(mapping: &SyncMapping, state: Option<&SyncState>) -> String {
    let Some(state) = state else {
        return format!("{:<24} never synced", mapping.name);
    };
    let watermark = state
        .last_successful_sync_time
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let status = state
        .last_sync_status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{:<24} last_success={watermark} status={status}",
        mapping.name
    );
    if state.sync_in_progress {
        line.push_str(" (in progress)");
    }
    if let Some(err) = &state.last_error {
        line.push_str(&format!(" error={err}"));
    }
    line
}
