//! Source-side contract: connect, pull records, close.

pub mod legacy_api;
pub mod static_source;

pub use legacy_api::LegacyApiExtractor;
pub use static_source::{ExtractorProbe, StaticExtractor};

use common::config::traits::RequireFields;
use common::config::ConfigError;
use common::error::diagnostics::DiagnosticMessage;
use common::Record;
use serde::Serialize;
use serde_json::{Map, Value};
use shared_clients::ClientError;
use std::ops::{Deref, DerefMut};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid extractor config: {context}")]
    Config {
        context: DiagnosticMessage,
        #[source]
        source: Option<ConfigError>,
    },
    #[error("failed to connect to source: {context}")]
    FailedToConnect {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("source rejected filter: {context}")]
    FilterRejected { context: DiagnosticMessage },
    #[error("extraction failed: {context}")]
    FailedToExtract {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ExtractError {
    #[track_caller]
    pub fn failed_to_connect(message: impl Into<String>) -> Self {
        Self::FailedToConnect {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }

    #[track_caller]
    pub fn filter_rejected(message: impl Into<String>) -> Self {
        Self::FilterRejected {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn failed_to_extract(message: impl Into<String>) -> Self {
        Self::FailedToExtract {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }
}

impl From<ConfigError> for ExtractError {
    #[track_caller]
    fn from(err: ConfigError) -> Self {
        ExtractError::Config {
            context: DiagnosticMessage::new(err.to_string()),
            source: Some(err),
        }
    }
}

impl From<ClientError> for ExtractError {
    #[track_caller]
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::FailedToConnect { .. }
            | ClientError::LoginFailed { .. }
            | ClientError::SessionLimit { .. } => ExtractError::FailedToConnect {
                context: DiagnosticMessage::new(err.to_string()),
                source: Some(Box::new(err)),
            },
            ClientError::FilterRejected { context } => ExtractError::FilterRejected { context },
            other => ExtractError::FailedToExtract {
                context: DiagnosticMessage::new(other.to_string()),
                source: Some(Box::new(other)),
            },
        }
    }
}

/// Query options handed to [`Extractor::extract`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl QueryParams {
    /// Combine `filter` with any filter already present (`(a) AND (b)`).
    pub fn merge_filter(&mut self, filter: impl Into<String>) {
        let filter = filter.into();
        self.filter = Some(match self.filter.take() {
            Some(existing) if !existing.trim().is_empty() => {
                format!("({existing}) AND ({filter})")
            }
            _ => filter,
        });
    }

    pub fn without_filter(&self) -> Self {
        Self {
            filter: None,
            ..self.clone()
        }
    }
}

/// Reads raw records from a source system.
///
/// Call [`connect`](Extractor::connect) before extracting and
/// [`close`](Extractor::close) afterwards; [`ScopedExtractor`] does both.
pub trait Extractor: Send {
    /// Config keys the extractor cannot run without.
    fn required_config_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn connect(&mut self) -> Result<(), ExtractError>;

    /// Pull records. A rejected filter either aborts
    /// (`fail_on_filter_error`) or is retried without the filter.
    fn extract(
        &mut self,
        query: &QueryParams,
        fail_on_filter_error: bool,
    ) -> Result<Vec<Record>, ExtractError>;

    /// Release the connection. Safe to call more than once.
    fn close(&mut self);
}

/// Fails with every missing required field named in the message.
pub fn validate_config(
    owner: &str,
    config: &Value,
    required: &[&str],
) -> Result<(), ExtractError> {
    config.require_fields(owner, required)?;
    Ok(())
}

/// Connects on creation and closes on drop.
pub struct ScopedExtractor<'a> {
    inner: &'a mut dyn Extractor,
}

impl<'a> ScopedExtractor<'a> {
    pub fn open(inner: &'a mut dyn Extractor) -> Result<Self, ExtractError> {
        if let Err(err) = inner.connect() {
            inner.close();
            return Err(err);
        }
        Ok(Self { inner })
    }
}

impl<'a> Deref for ScopedExtractor<'a> {
    type Target = dyn Extractor + 'a;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl<'a> DerefMut for ScopedExtractor<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner
    }
}

impl Drop for ScopedExtractor<'_> {
    fn drop(&mut self) {
        self.inner.close();
    }
}
