// src/lib.rs
use time::macros::format_description;
use tracing::Span;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Install the process subscriber. `RUST_LOG` wins over `default_level`,
/// which itself falls back to `info`. Safe to call more than once.
pub fn init_logger(default_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.unwrap_or("info")));
    let time_format =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:2]");

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_timer(fmt::time::LocalTime::new(time_format))
                .with_target(false)
                .with_level(true)
                .with_thread_names(false)
                .with_line_number(false)
                .with_file(false)
                .compact(),
        )
        .with(filter)
        .try_init();
}

/// Logging context handed to a single pipeline run.
///
/// Everything the run logs happens inside [`RunContext::span`], so the
/// mapping name and run id show up on every line without touching global
/// logger state.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub mapping: String,
    pub entity_type: String,
    pub run_id: Uuid,
    verbose: bool,
}

impl RunContext {
    pub fn new(mapping: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            mapping: mapping.into(),
            entity_type: entity_type.into(),
            run_id: Uuid::new_v4(),
            verbose: false,
        }
    }

    /// Log one line per record in addition to the per-batch summaries.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "sync",
            mapping = %self.mapping,
            entity = %self.entity_type,
            run = %self.run_id
        )
    }
}
