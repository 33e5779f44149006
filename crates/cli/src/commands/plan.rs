use crate::commands::project::SyncProject;
use catalog::Getter;
use clap::Args;
use common::error::SyncError;
use dag::MappingDag;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Print the graph in DOT format instead of the ordered list
    #[arg(long)]
    pub dot: bool,
}

pub fn handle_plan(args: &PlanArgs, config_path: Option<PathBuf>) -> Result<(), SyncError> {
    let project = SyncProject::open(config_path)?;
    let dag = MappingDag::build(&project.catalog.list_mappings()).map_err(SyncError::config)?;
    if args.dot {
        print!("{}", dag.to_dot_string());
        return Ok(());
    }
    for line in plan_lines(&dag)? {
        println!("{line}");
    }
    Ok(())
}

fn plan_lines(dag: &MappingDag) -> Result<Vec<String>, SyncError> {
    let order = dag.execution_order().map_err(SyncError::config)?;
    Ok(order
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let deps = if node.dependencies.is_empty() {
                String::new()
            } else {
                format!(
                    " (after {})",
                    node.dependencies.iter().cloned().collect::<Vec<_>>().join(", ")
                )
            };
            let inactive = if node.active { "" } else { " [inactive]" };
            format!("{:>3}. {} <{}>{deps}{inactive}", i + 1, node.name, node.entity_type)
        })
        .collect())
}
