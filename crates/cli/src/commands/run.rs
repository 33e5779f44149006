use crate::commands::project::SyncProject;
use catalog::{Getter, SyncLog, SyncMapping, SyncStatus};
use clap::Args;
use common::error::SyncError;
use dag::MappingDag;
use log::{info, warn};
use logging::RunContext;
use pipeline::{ComponentOverrides, RunOptions};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Mapping name or entity type. Runs every mapping when omitted.
    pub target: Option<String>,
    /// Ignore the watermark and pull everything.
    #[arg(long)]
    pub full: bool,
    #[arg(long = "batch-size", value_name = "N")]
    pub batch_size: Option<usize>,
    /// Abort instead of retrying without the filter when the source rejects it.
    #[arg(long = "fail-on-filter-error")]
    pub fail_on_filter_error: bool,
    /// Sync the target's dependencies first.
    #[arg(long = "with-dependencies", short = 'd')]
    pub with_dependencies: bool,
    /// Log every record, not only batch summaries.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Run the selected mappings. `Ok(false)` when any run ended `failed`.
pub fn handle_run(args: &RunArgs, config_path: Option<PathBuf>) -> Result<bool, SyncError> {
    let project = SyncProject::open(config_path)?;
    let mappings = select_mappings(&project, args.target.as_deref(), args.with_dependencies)?;

    let batch_size = args
        .batch_size
        .unwrap_or(project.config.defaults.batch_size);
    let mut opts = RunOptions::new(batch_size)
        .map_err(SyncError::config)?
        .fail_on_filter_error(
            args.fail_on_filter_error || project.config.defaults.fail_on_filter_error,
        );
    if args.full {
        opts = opts.full();
    }

    // Every pipeline is built before the first run touches any state.
    let factory = project.factory();
    let mut pipelines = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        if !mapping.active {
            warn!("Skipping inactive mapping {}", mapping.name);
            continue;
        }
        let pipeline = factory
            .create_pipeline(&mapping, ComponentOverrides::none())
            .map_err(SyncError::setup)?;
        pipelines.push((mapping, pipeline));
    }

    let mut all_ok = true;
    for (mapping, mut pipeline) in pipelines {
        let ctx = RunContext::new(&mapping.name, &mapping.entity_type).verbose(args.verbose);
        let log = pipeline.run(&opts, &ctx);
        println!("{}", summary_line(&mapping, &log));

        if log.status == SyncStatus::Failed {
            all_ok = false;
            if args.with_dependencies {
                warn!("Stopping: {} failed, its dependents are not synced", mapping.name);
                break;
            }
        }
    }

    project.flush()?;
    Ok(all_ok)
}

/// Mappings to run, dependencies first.
fn select_mappings(
    project: &SyncProject,
    target: Option<&str>,
    with_dependencies: bool,
) -> Result<Vec<SyncMapping>, SyncError> {
    let catalog = &project.catalog;
    match target {
        Some(key) if !with_dependencies => {
            Ok(vec![catalog.find_mapping(key).map_err(SyncError::config)?])
        }
        _ => {
            let dag = MappingDag::build(&catalog.list_mappings()).map_err(SyncError::config)?;
            let nodes = match target {
                Some(key) => dag.order_for(key),
                None => dag.execution_order(),
            }
            .map_err(SyncError::config)?;
            info!(
                "Sync order: {}",
                nodes
                    .iter()
                    .map(|n| n.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            );
            nodes
                .iter()
                .map(|n| catalog.get_mapping(&n.name).map_err(SyncError::config))
                .collect()
        }
    }
}

/// Counts-only summary of one run.
pub fn summary_line(mapping: &SyncMapping, log: &SyncLog) -> String {
    let mut line = format!(
        "{} [{}] processed={} created={} updated={} skipped={} failed={}",
        mapping.name,
        log.status,
        log.records_processed,
        log.records_created,
        log.records_updated,
        log.records_skipped,
        log.records_failed
    );
    if let Some(message) = &log.error_message {
        line.push_str(&format!(" error={message}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::Bookkeeping;
    use chrono::Utc;
    use test_utils::TestProject;

    fn args(target: Option<&str>) -> RunArgs {
        RunArgs {
            target: target.map(str::to_string),
            full: false,
            batch_size: None,
            fail_on_filter_error: false,
            with_dependencies: false,
            verbose: false,
        }
    }

    #[test]
    fn run_persists_entities_and_bookkeeping() {
        let project = TestProject::new().unwrap();
        let root = Some(project.root().to_path_buf());

        assert!(handle_run(&args(Some("products")), root.clone()).unwrap());

        let reopened = SyncProject::open(root.clone()).unwrap();
        assert_eq!(reopened.store.count("Product"), 3);
        let mapping = reopened.catalog.get_mapping("products").unwrap();
        let logs = reopened.catalog.logs_for(mapping.id);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, SyncStatus::Completed);
        let state = reopened.catalog.get_state(mapping.id).unwrap();
        assert!(state.last_successful_sync_time.is_some());

        // the second run is incremental and leaves the rows alone
        assert!(handle_run(&args(None), root.clone()).unwrap());
        let reopened = SyncProject::open(root).unwrap();
        assert_eq!(reopened.store.count("Product"), 3);
        let logs = reopened.catalog.logs_for(mapping.id);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs.iter().map(|l| l.records_created).sum::<usize>(), 3);
        assert!(logs.iter().all(|l| l.records_succeeded == 3));
    }

    #[test]
    fn held_lock_makes_the_run_fail() {
        let project = TestProject::new().unwrap();
        let root = Some(project.root().to_path_buf());

        let opened = SyncProject::open(root.clone()).unwrap();
        let mapping = opened.catalog.get_mapping("products").unwrap();
        opened
            .catalog
            .try_begin_sync(mapping.id, Utc::now())
            .unwrap();
        opened.flush().unwrap();

        assert!(!handle_run(&args(Some("product")), root).unwrap());
    }

    #[test]
    fn zero_batch_size_is_a_config_error() {
        let project = TestProject::new().unwrap();
        let mut a = args(Some("products"));
        a.batch_size = Some(0);
        let err = handle_run(&a, Some(project.root().to_path_buf())).unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
    }

    #[test]
    fn broken_mapping_stops_the_run_before_any_sync() {
        let project = TestProject::new().unwrap();
        project
            .write_mapping(
                "widgets.yml",
                r#"
name: widgets
entity_type: widget
source: legacy_erp
target: pyerp
source_config:
  extractor: static
  path: data/products.json
target_config:
  model: products.models.Product
mapping_config:
  transformer: no_such_transformer
"#,
            )
            .unwrap();
        let root = Some(project.root().to_path_buf());

        let err = handle_run(&args(None), root.clone()).unwrap_err();
        assert!(matches!(err, SyncError::Setup { .. }));

        let reopened = SyncProject::open(root).unwrap();
        assert_eq!(reopened.store.count("Product"), 0);
        let products = reopened.catalog.get_mapping("products").unwrap();
        assert!(reopened.catalog.logs_for(products.id).is_empty());
    }
}
