use catalog::CatalogError;
use common::error::diagnostics::DiagnosticMessage;
use components::{ExtractError, LoadError, TransformError};
use shared_clients::ClientError;
use std::error::Error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid batch size: {context}")]
    InvalidBatchSize { context: DiagnosticMessage },
    #[error("unknown component: {context}")]
    UnknownComponent { context: DiagnosticMessage },
    #[error("pipeline setup failed: {context}")]
    Setup {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },
    #[error("incremental filter failed: {context}")]
    Filter {
        context: DiagnosticMessage,
        #[source]
        source: Option<minijinja::Error>,
    },
    #[error("extraction failed: {context}")]
    Extract {
        context: DiagnosticMessage,
        #[source]
        source: ExtractError,
    },
    #[error("sync bookkeeping failed: {context}")]
    Catalog {
        context: DiagnosticMessage,
        #[source]
        source: CatalogError,
    },
}

impl PipelineError {
    #[track_caller]
    pub fn invalid_batch_size(size: usize) -> Self {
        Self::InvalidBatchSize {
            context: DiagnosticMessage::new(format!(
                "batch size must be at least 1, got {size}"
            )),
        }
    }

    #[track_caller]
    pub fn unknown_component(kind: &str, key: &str, known: &[String]) -> Self {
        Self::UnknownComponent {
            context: DiagnosticMessage::new(format!(
                "no {kind} registered under '{key}' (known: {})",
                known.join(", ")
            )),
        }
    }

    #[track_caller]
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }

    #[track_caller]
    pub fn setup_from<E>(component: &str, err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Setup {
            context: DiagnosticMessage::new(format!("{component}: {err}")),
            source: Some(Box::new(err)),
        }
    }

    #[track_caller]
    pub fn filter(message: impl Into<String>) -> Self {
        Self::Filter {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }
}

impl From<ExtractError> for PipelineError {
    #[track_caller]
    fn from(err: ExtractError) -> Self {
        PipelineError::Extract {
            context: DiagnosticMessage::new(err.to_string()),
            source: err,
        }
    }
}

impl From<CatalogError> for PipelineError {
    #[track_caller]
    fn from(err: CatalogError) -> Self {
        PipelineError::Catalog {
            context: DiagnosticMessage::new(err.to_string()),
            source: err,
        }
    }
}

impl From<minijinja::Error> for PipelineError {
    #[track_caller]
    fn from(err: minijinja::Error) -> Self {
        PipelineError::Filter {
            context: DiagnosticMessage::new(err.to_string()),
            source: Some(err),
        }
    }
}

impl From<TransformError> for PipelineError {
    #[track_caller]
    fn from(err: TransformError) -> Self {
        PipelineError::setup_from("transformer", err)
    }
}

impl From<LoadError> for PipelineError {
    #[track_caller]
    fn from(err: LoadError) -> Self {
        PipelineError::setup_from("loader", err)
    }
}

impl From<ClientError> for PipelineError {
    #[track_caller]
    fn from(err: ClientError) -> Self {
        PipelineError::setup_from("source client", err)
    }
}
