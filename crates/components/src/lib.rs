//! Extract, transform and load building blocks for sync pipelines.

pub mod extract;
pub mod load;
pub mod store;
pub mod transform;

pub use extract::{ExtractError, Extractor, QueryParams, ScopedExtractor};
pub use load::{LoadError, LoadResult, LoadStage, Loader, RecordOutcome, UpdateStrategy};
pub use store::{EntityStore, MemoryEntityStore, StoreError};
pub use transform::{TransformError, TransformedRecord, Transformer};
