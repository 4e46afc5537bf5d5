use super::traits::{CheckpointStore, StorageError, StoredCheckpoint};
use crate::event::CompletedScan;
use crate::sink::{ScanSink, SinkError};
use crate::transport::CheckpointHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// DuckDB-backed checkpoint store and completed-scan log
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
    owner: String,
}

impl DuckDbStorage {
    /// Open (or create) the database file
    pub fn new<P: AsRef<Path>>(path: P, owner: impl Into<String>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Database(format!(
                        "failed to create database directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            owner: owner.into(),
        })
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            owner: "in-memory".to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Forget the stored read position of a partition
    pub async fn clear_checkpoint(&self, partition_id: &str) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let partition_id = partition_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "DELETE FROM partition_checkpoints WHERE partition_id = ?",
                duckdb::params![partition_id],
            )?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    /// Completed scans recorded by the storage sink, oldest first
    pub async fn completed_scans(&self) -> Result<Vec<CompletedScan>, StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT scan_data FROM completed_scans ORDER BY recorded_at, agent_id, scan_timestamp",
            )?;
            let mut rows = stmt.query([])?;

            let mut scans: Vec<CompletedScan> = Vec::new();
            while let Some(row) = rows.next()? {
                let data: String = row.get(0)?;
                scans.push(serde_json::from_str(&data)?);
            }
            Ok::<_, StorageError>(scans)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
}

fn timestamp_from_micros(index: usize, micros: i64) -> Result<DateTime<Utc>, duckdb::Error> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        duckdb::Error::FromSqlConversionFailure(
            index,
            duckdb::types::Type::BigInt,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid timestamp",
            )),
        )
    })
}

#[async_trait]
impl CheckpointStore for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS partition_checkpoints (
                    partition_id VARCHAR PRIMARY KEY,
                    sequence_number UBIGINT NOT NULL,
                    read_offset UBIGINT NOT NULL,
                    owner VARCHAR NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS completed_scans (
                    agent_id VARCHAR NOT NULL,
                    scan_timestamp TIMESTAMPTZ NOT NULL,
                    endpoint_count UBIGINT NOT NULL,
                    scan_data VARCHAR NOT NULL,
                    recorded_at TIMESTAMPTZ NOT NULL,
                    PRIMARY KEY (agent_id, scan_timestamp)
                )",
                [],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn load_checkpoint(
        &self,
        partition_id: &str,
    ) -> Result<Option<StoredCheckpoint>, StorageError> {
        let conn = self.conn.clone();
        let partition_id = partition_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT sequence_number, read_offset, owner, epoch_us(updated_at)
                 FROM partition_checkpoints WHERE partition_id = ?",
            )?;

            let mut rows = stmt.query(duckdb::params![partition_id])?;

            let checkpoint = match rows.next()? {
                Some(row) => Some(StoredCheckpoint {
                    handle: CheckpointHandle {
                        partition_id: partition_id.clone(),
                        sequence_number: row.get(0)?,
                        offset: row.get(1)?,
                    },
                    owner: row.get(2)?,
                    updated_at: timestamp_from_micros(3, row.get::<_, i64>(3)?)?,
                }),
                None => None,
            };
            Ok::<_, StorageError>(checkpoint)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn save_checkpoint(&self, handle: &CheckpointHandle) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let handle = handle.clone();
        let owner = self.owner.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            let stored_sequence: Option<u64> = {
                let mut stmt = conn.prepare(
                    "SELECT sequence_number FROM partition_checkpoints WHERE partition_id = ?",
                )?;
                let mut rows = stmt.query(duckdb::params![handle.partition_id])?;
                match rows.next()? {
                    Some(row) => Some(row.get(0)?),
                    None => None,
                }
            };

            if let Some(stored) = stored_sequence {
                if stored > handle.sequence_number {
                    tracing::debug!(
                        checkpoint = %handle,
                        stored_sequence = stored,
                        "Ignoring checkpoint older than stored position"
                    );
                    return Ok(());
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO partition_checkpoints
                    (partition_id, sequence_number, read_offset, owner, updated_at)
                 VALUES (?, ?, ?, ?, to_timestamp(? / 1000000.0))",
                duckdb::params![
                    handle.partition_id,
                    handle.sequence_number,
                    handle.offset,
                    owner,
                    Utc::now().timestamp_micros(),
                ],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl ScanSink for DuckDbStorage {
    async fn process_completed_scan(&self, scan: &CompletedScan) -> Result<(), SinkError> {
        let conn = self.conn.clone();
        let scan_data = serde_json::to_string(scan).map_err(StorageError::from)?;
        let agent_id = scan.agent_id.clone();
        let scan_timestamp = scan.scan_timestamp.timestamp_micros();
        let endpoint_count = scan.endpoints.len() as u64;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            // A re-ingested scan replaces the earlier record
            conn.execute(
                "INSERT OR REPLACE INTO completed_scans
                    (agent_id, scan_timestamp, endpoint_count, scan_data, recorded_at)
                 VALUES (?, to_timestamp(? / 1000000.0), ?, ?, to_timestamp(? / 1000000.0))",
                duckdb::params![
                    agent_id,
                    scan_timestamp,
                    endpoint_count,
                    scan_data,
                    Utc::now().timestamp_micros(),
                ],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EndpointDescriptor;
    use chrono::TimeZone;

    async fn setup_storage() -> DuckDbStorage {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_schema().await.unwrap();
        storage
    }

    fn handle(sequence_number: u64) -> CheckpointHandle {
        CheckpointHandle {
            partition_id: "0".to_string(),
            sequence_number,
            offset: sequence_number * 120,
        }
    }

    #[tokio::test]
    async fn test_schema_initialization_is_repeatable() {
        let storage = setup_storage().await;
        assert!(storage.init_schema().await.is_ok());
    }

    #[tokio::test]
    async fn test_no_checkpoint() {
        let storage = setup_storage().await;
        assert!(storage.load_checkpoint("0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_save_load() {
        let storage = setup_storage().await;
        storage.save_checkpoint(&handle(7)).await.unwrap();

        let loaded = storage.load_checkpoint("0").await.unwrap().unwrap();
        assert_eq!(loaded.handle, handle(7));
        assert_eq!(loaded.owner, "in-memory");
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_backwards() {
        let storage = setup_storage().await;
        storage.save_checkpoint(&handle(9)).await.unwrap();
        storage.save_checkpoint(&handle(4)).await.unwrap();
        // Same handle again is harmless
        storage.save_checkpoint(&handle(9)).await.unwrap();

        let loaded = storage.load_checkpoint("0").await.unwrap().unwrap();
        assert_eq!(loaded.handle.sequence_number, 9);
    }

    #[tokio::test]
    async fn test_cleared_checkpoint_accepts_lower_sequence() {
        let storage = setup_storage().await;
        storage.save_checkpoint(&handle(9)).await.unwrap();
        storage.clear_checkpoint("0").await.unwrap();
        assert!(storage.load_checkpoint("0").await.unwrap().is_none());

        storage.save_checkpoint(&handle(2)).await.unwrap();
        let loaded = storage.load_checkpoint("0").await.unwrap().unwrap();
        assert_eq!(loaded.handle.sequence_number, 2);
    }

    #[tokio::test]
    async fn test_checkpoints_are_per_partition() {
        let storage = setup_storage().await;
        storage.save_checkpoint(&handle(3)).await.unwrap();
        storage
            .save_checkpoint(&CheckpointHandle {
                partition_id: "1".to_string(),
                sequence_number: 1,
                offset: 10,
            })
            .await
            .unwrap();

        assert_eq!(
            storage.load_checkpoint("0").await.unwrap().unwrap().handle.sequence_number,
            3
        );
        assert_eq!(
            storage.load_checkpoint("1").await.unwrap().unwrap().handle.sequence_number,
            1
        );
    }

    #[tokio::test]
    async fn test_storage_sink_records_scans() {
        let storage = setup_storage().await;
        let scan = CompletedScan {
            agent_id: "sup1".to_string(),
            scan_timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
            endpoints: vec![
                EndpointDescriptor::new("opc.tcp://a:4840"),
                EndpointDescriptor::new("opc.tcp://b:4840"),
            ],
            result: None,
        };

        storage.process_completed_scan(&scan).await.unwrap();
        // Re-ingested scan replaces the first record
        storage.process_completed_scan(&scan).await.unwrap();

        let scans = storage.completed_scans().await.unwrap();
        assert_eq!(scans, vec![scan]);
    }
}
