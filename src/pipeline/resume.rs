use crate::storage::duckdb::DuckDbStorage;
use crate::storage::StorageError;
use crate::transport::{CheckpointHandle, FilePartitionSource};

/// Open the partition log and settle which checkpoint processing resumes from.
///
/// `source` must already carry `stored` via `resume_from`. When the log no
/// longer reaches the stored position the stored checkpoint is cleared, so the
/// coordinator and the store both start over with the rotated log. If the log
/// cannot be opened yet the stored checkpoint is kept and the runner retries.
pub async fn resume_checkpoint(
    source: &mut FilePartitionSource,
    storage: &DuckDbStorage,
    stored: Option<CheckpointHandle>,
) -> Result<Option<CheckpointHandle>, StorageError> {
    match source.open() {
        Ok(Some(handle)) => Ok(Some(handle)),
        Ok(None) => {
            if let Some(stale) = stored {
                tracing::warn!(
                    checkpoint = %stale,
                    "Clearing stored checkpoint that lies beyond the partition log"
                );
                storage.clear_checkpoint(&stale.partition_id).await?;
            }
            Ok(None)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Partition log not readable at start-up, keeping stored checkpoint"
            );
            Ok(stored)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{PartitionConfig, ReadStart};
    use crate::storage::CheckpointStore;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn config(path: PathBuf) -> PartitionConfig {
        PartitionConfig {
            id: "0".to_string(),
            path,
            start: ReadStart::Beginning,
            follow: false,
            max_batch_size: 10,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn handle(sequence_number: u64, offset: u64) -> CheckpointHandle {
        CheckpointHandle {
            partition_id: "0".to_string(),
            sequence_number,
            offset,
        }
    }

    async fn storage_with(checkpoint: &CheckpointHandle) -> DuckDbStorage {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_schema().await.unwrap();
        storage.save_checkpoint(checkpoint).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_stale_checkpoint_is_cleared() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"properties":{{}},"body":null}}"#).unwrap();
        file.flush().unwrap();

        let stale = handle(100, 100_000);
        let storage = storage_with(&stale).await;
        let mut source = FilePartitionSource::new(&config(file.path().to_path_buf()))
            .resume_from(Some(stale.clone()));

        let resume = resume_checkpoint(&mut source, &storage, Some(stale)).await.unwrap();

        assert_eq!(resume, None);
        assert!(storage.load_checkpoint("0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_valid_checkpoint_is_kept() {
        let line = r#"{"properties":{},"body":null}"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", line).unwrap();
        file.flush().unwrap();

        let checkpoint = handle(0, line.len() as u64 + 1);
        let storage = storage_with(&checkpoint).await;
        let mut source = FilePartitionSource::new(&config(file.path().to_path_buf()))
            .resume_from(Some(checkpoint.clone()));

        let resume = resume_checkpoint(&mut source, &storage, Some(checkpoint.clone()))
            .await
            .unwrap();

        assert_eq!(resume, Some(checkpoint.clone()));
        assert_eq!(
            storage.load_checkpoint("0").await.unwrap().unwrap().handle,
            checkpoint
        );
    }

    #[tokio::test]
    async fn test_missing_log_keeps_checkpoint() {
        let checkpoint = handle(4, 500);
        let storage = storage_with(&checkpoint).await;
        let mut source = FilePartitionSource::new(&config(PathBuf::from(
            "/nonexistent/partition-0.jsonl",
        )))
        .resume_from(Some(checkpoint.clone()));

        let resume = resume_checkpoint(&mut source, &storage, Some(checkpoint.clone()))
            .await
            .unwrap();

        assert_eq!(resume, Some(checkpoint));
        assert!(storage.load_checkpoint("0").await.unwrap().is_some());
    }
}
