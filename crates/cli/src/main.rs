mod commands;

use crate::commands::init::InitArgs;
use crate::commands::plan::PlanArgs;
use crate::commands::run::RunArgs;
use crate::commands::status::UnlockArgs;
use crate::commands::{
    handle_init, handle_mappings, handle_plan, handle_run, handle_status, handle_unlock,
};
use clap::{Parser, Subcommand};
use common::error::{error_chain, SyncError};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "erp-sync", about = "Sync legacy ERP tables into the ERP target store")]
pub struct Cli {
    #[arg(
        long = "config-path",
        short = 'c',
        help = "directory holding sync-project.yml",
        global = true
    )]
    pub config_path: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Cmd,
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Create a new sync project scaffold
    Init(InitArgs),
    /// Sync one mapping, an entity type, or everything
    Run(RunArgs),
    /// Print the order mappings would be synced in
    Plan(PlanArgs),
    /// Show each mapping's watermark and last status
    Status,
    /// List registered mappings
    Mappings,
    /// Clear a stale in-progress flag
    Unlock(UnlockArgs),
}

fn run_cmd(func: Result<(), SyncError>) {
    if let Err(e) = func {
        eprintln!("Error: {}", error_chain(&e));
        std::process::exit(1);
    }
}

fn main() {
    logging::init_logger(None);
    let cli = Cli::parse();

    match cli.command {
        Cmd::Init(args) => run_cmd(handle_init(&args)),
        Cmd::Run(args) => match handle_run(&args, cli.config_path) {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => run_cmd(Err(e)),
        },
        Cmd::Plan(args) => run_cmd(handle_plan(&args, cli.config_path)),
        Cmd::Status => run_cmd(handle_status(cli.config_path)),
        Cmd::Mappings => run_cmd(handle_mappings(cli.config_path)),
        Cmd::Unlock(args) => run_cmd(handle_unlock(&args, cli.config_path)),
    }
}
