pub mod diagnostics;
pub use crate::config::error::ConfigError;
pub use diagnostics::DiagnosticMessage;

use std::error::Error as StdError;
use thiserror::Error;

/// Top-level error surfaced by the command line front-end.
///
/// Library crates keep their own error enums; the CLI folds them into one of
/// these three phases so a user can tell whether the project could not be
/// read, the pipeline could not be assembled, or a run blew up.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration failed: {context}")]
    Config {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    #[error("pipeline setup failed: {context}")]
    Setup {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    #[error("sync run failed: {context}")]
    Run {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl SyncError {
    #[track_caller]
    pub fn config<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        SyncError::Config {
            context: DiagnosticMessage::new(err.to_string()),
            source: Some(Box::new(err)),
        }
    }

    #[track_caller]
    pub fn config_msg(message: impl Into<String>) -> Self {
        SyncError::Config {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }

    #[track_caller]
    pub fn setup<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        SyncError::Setup {
            context: DiagnosticMessage::new(err.to_string()),
            source: Some(Box::new(err)),
        }
    }

    #[track_caller]
    pub fn setup_msg(message: impl Into<String>) -> Self {
        SyncError::Setup {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }

    #[track_caller]
    pub fn run<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        SyncError::Run {
            context: DiagnosticMessage::new(err.to_string()),
            source: Some(Box::new(err)),
        }
    }

    #[track_caller]
    pub fn run_msg(message: impl Into<String>) -> Self {
        SyncError::Run {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }
}

/// Render an error and its `source()` chain, one cause per line.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut current = err.source();
    while let Some(cause) = current {
        lines.push(format!("caused by: {cause}"));
        current = cause.source();
    }
    lines.join("\n")
}
