pub mod legacy;

pub use legacy::{ClientError, FetchParams, LegacyApiClient, TableFetch};
