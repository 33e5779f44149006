pub mod error;
pub mod loader;
pub mod mapping;
pub mod models;
pub mod project;
pub mod traits;

pub use error::ConfigError;
pub use mapping::{FilterCondition, FilterFormat, IncrementalConfig, MappingConfig, MappingDefinition};
pub use models::{ModelDeclaration, ModelField};
pub use project::{ProjectConfig, RunDefaults, SourceConnection};
