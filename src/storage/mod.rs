pub mod duckdb;
pub mod traits;

pub use traits::{CheckpointStore, StorageError, StoredCheckpoint};
