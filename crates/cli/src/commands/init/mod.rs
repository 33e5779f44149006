use clap::Args;
use common::config::loader::PROJECT_FILE;
use common::error::SyncError;
use log::info;
use minijinja::{context, Environment};
use std::fs;
use std::path::{Path, PathBuf};

const PROJECT_TEMPLATE: &str = include_str!("templates/sync-project.yml.j2");
const MAPPING_TEMPLATE: &str = include_str!("templates/mapping.yml.j2");

const DEFAULT_MAPPINGS_DIR: &str = "mappings";

#[derive(Debug, Args)]
pub struct InitArgs {
    #[arg(
        long = "dir",
        short = 'd',
        default_value = ".",
        help = "Target path for project"
    )]
    pub(crate) path: PathBuf,
    #[arg(
        long = "project-name",
        short = 'n',
        default_value = "erp-sync",
        help = "project name"
    )]
    pub(crate) project_name: String,
    #[arg(
        long = "source-url",
        default_value = "http://localhost:8080",
        help = "base URL of the legacy ERP API"
    )]
    pub(crate) source_url: String,
}

/// Scaffold `sync-project.yml` and an example products mapping.
pub fn handle_init(args: &InitArgs) -> Result<(), SyncError> {
    let root = &args.path;
    let project_file = root.join(PROJECT_FILE);
    if project_file.exists() {
        return Err(SyncError::config_msg(format!(
            "{} already exists",
            project_file.display()
        )));
    }

    let env = Environment::new();
    let mappings_dir = root.join(DEFAULT_MAPPINGS_DIR);
    fs::create_dir_all(&mappings_dir).map_err(SyncError::config)?;

    let project = env
        .render_str(
            PROJECT_TEMPLATE,
            context! {
                project_name => &args.project_name,
                mappings_dir => DEFAULT_MAPPINGS_DIR,
                source_url => &args.source_url,
            },
        )
        .map_err(SyncError::config)?;
    write_file(&project_file, &project)?;

    let mapping = env
        .render_str(
            MAPPING_TEMPLATE,
            context! {
                name => "products",
                entity_type => "product",
                table => "Artikel_Stamm",
                key_field => "Nummer",
            },
        )
        .map_err(SyncError::config)?;
    write_file(&mappings_dir.join("products.yml"), &mapping)?;

    info!("Created sync project '{}' in {}", args.project_name, root.display());
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<(), SyncError> {
    fs::write(path, contents).map_err(SyncError::config)?;
    info!("  wrote {}", path.display());
    Ok(())
}
