use common::error::diagnostics::DiagnosticMessage;
use std::io;
use std::io::Error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog entry already exists: {context}")]
    Duplicate { context: DiagnosticMessage },
    #[error("catalog lookup failed: {context}")]
    NotFound { context: DiagnosticMessage },
    #[error("sync already in progress: {context}")]
    SyncInProgress { context: DiagnosticMessage },
    #[error("serde json error: {context}")]
    SerdeJson {
        context: DiagnosticMessage,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error: {context}")]
    Io {
        context: DiagnosticMessage,
        #[source]
        source: io::Error,
    },
}

impl CatalogError {
    #[track_caller]
    pub fn duplicate(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::Duplicate {
            context: DiagnosticMessage::new(format!("Entry '{name}' already exists")),
        }
    }

    #[track_caller]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn sync_in_progress(mapping: impl Into<String>) -> Self {
        let mapping = mapping.into();
        Self::SyncInProgress {
            context: DiagnosticMessage::new(format!(
                "mapping '{mapping}' is already being synced"
            )),
        }
    }

    #[track_caller]
    pub fn io(message: impl Into<String>, source: Error) -> Self {
        Self::Io {
            context: DiagnosticMessage::new(message.into()),
            source,
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        CatalogError::SerdeJson {
            context: DiagnosticMessage::new(err.to_string()),
            source: err,
        }
    }
}

impl From<io::Error> for CatalogError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        CatalogError::Io {
            context: DiagnosticMessage::new(err.to_string()),
            source: err,
        }
    }
}
