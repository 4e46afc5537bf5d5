use crate::transport::CheckpointHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable read position of one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    pub handle: CheckpointHandle,
    pub owner: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    async fn load_checkpoint(
        &self,
        partition_id: &str,
    ) -> Result<Option<StoredCheckpoint>, StorageError>;

    /// Persist `handle` as the partition's read position.
    ///
    /// Idempotent: storing the same handle again, or one older than the stored
    /// position, leaves the stored position unchanged.
    async fn save_checkpoint(&self, handle: &CheckpointHandle) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}
