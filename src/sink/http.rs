use super::{ScanSink, SinkError};
use crate::config::types::HttpSinkConfig;
use crate::event::CompletedScan;
use async_trait::async_trait;

/// Forwards completed scans to the registry as JSON
#[derive(Debug)]
pub struct HttpSink {
    url: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(config: &HttpSinkConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            url: config.url.clone(),
            client,
        })
    }
}

#[async_trait]
impl ScanSink for HttpSink {
    async fn process_completed_scan(&self, scan: &CompletedScan) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(scan).send().await?;

        if !response.status().is_success() {
            return Err(SinkError::Rejected {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        tracing::debug!(
            agent_id = %scan.agent_id,
            scan_timestamp = %scan.scan_timestamp,
            url = %self.url,
            "Forwarded completed scan"
        );
        Ok(())
    }
}
