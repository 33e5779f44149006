pub mod config;
pub mod error;
pub mod sanitize;
pub mod types;
pub mod utils;

pub use error::{DiagnosticMessage, SyncError};
pub use types::{Record, RecordExt};
