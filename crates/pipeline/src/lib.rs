//! Sync pipeline: extract from a legacy source, transform, load into the
//! target store and keep the sync bookkeeping up to date.

mod error;
pub mod factory;
pub mod filter;
mod runner;

pub use error::PipelineError;
pub use factory::{ComponentOverrides, ComponentRegistry, PipelineFactory};
pub use filter::build_incremental_filter;
pub use runner::{Pipeline, RunOptions};
