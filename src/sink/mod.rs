pub mod http;

use crate::config::types::SinkConfig;
use crate::event::CompletedScan;
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::StorageError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use http::HttpSink;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry rejected scan with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Downstream consumer of completed scans (registry reconciliation).
#[async_trait]
pub trait ScanSink: Send + Sync {
    async fn process_completed_scan(&self, scan: &CompletedScan) -> Result<(), SinkError>;
}

/// Logs completed scans and drops them
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl ScanSink for LogSink {
    async fn process_completed_scan(&self, scan: &CompletedScan) -> Result<(), SinkError> {
        tracing::info!(
            agent_id = %scan.agent_id,
            scan_timestamp = %scan.scan_timestamp,
            endpoints = scan.endpoints.len(),
            request_id = scan.result.as_ref().and_then(|r| r.id.as_deref()).unwrap_or("-"),
            "Completed scan"
        );
        for endpoint in &scan.endpoints {
            tracing::debug!(agent_id = %scan.agent_id, url = %endpoint.endpoint_url, "Discovered endpoint");
        }
        Ok(())
    }
}

/// Build the sink selected in config
pub fn build_sink(
    config: &SinkConfig,
    storage: Arc<DuckDbStorage>,
) -> Result<Arc<dyn ScanSink>, SinkError> {
    let sink: Arc<dyn ScanSink> = match config {
        SinkConfig::Log => Arc::new(LogSink),
        SinkConfig::Http(http) => Arc::new(HttpSink::new(http)?),
        SinkConfig::Storage => storage,
    };
    Ok(sink)
}
