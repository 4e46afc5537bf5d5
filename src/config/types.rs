use crate::event::DISCOVERY_EVENT_CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub partition: PartitionConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    pub sink: SinkConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub web: Option<WebConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub id: String,
    /// JSON-lines partition log
    pub path: PathBuf,
    /// Where to start when no checkpoint has been stored yet
    #[serde(default = "default_read_start")]
    pub start: ReadStart,
    #[serde(default)]
    pub follow: bool,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_read_start() -> ReadStart {
    ReadStart::Beginning
}

fn default_max_batch_size() -> usize {
    100
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStart {
    Beginning,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Messages whose content type differs are not discovery events
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_content_type_property")]
    pub content_type_property: String,
    /// Property naming the device the supervisor runs on
    #[serde(default = "default_identity_property")]
    pub identity_property: String,
    /// Optional module property; combined with the device id into the agent id
    #[serde(default = "default_module_property")]
    pub module_property: Option<String>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            content_type: default_content_type(),
            content_type_property: default_content_type_property(),
            identity_property: default_identity_property(),
            module_property: default_module_property(),
        }
    }
}

fn default_content_type() -> String {
    DISCOVERY_EVENT_CONTENT_TYPE.to_string()
}

fn default_content_type_property() -> String {
    "content-type".to_string()
}

fn default_identity_property() -> String {
    "iothub-connection-device-id".to_string()
}

fn default_module_property() -> Option<String> {
    Some("iothub-connection-module-id".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Drop redelivered endpoint events by index instead of appending them
    #[serde(default = "default_deduplicate")]
    pub deduplicate: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            deduplicate: default_deduplicate(),
        }
    }
}

fn default_deduplicate() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Batches created longer ago than this are abandoned
    #[serde(default = "default_inactivity_threshold", with = "humantime_serde")]
    pub inactivity_threshold: Duration,
    /// Reaper pass while no deliveries arrive
    #[serde(default = "default_idle_interval", with = "humantime_serde")]
    pub idle_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold: default_inactivity_threshold(),
            idle_interval: default_idle_interval(),
        }
    }
}

fn default_inactivity_threshold() -> Duration {
    Duration::from_secs(3600)
}

fn default_idle_interval() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Log completed scans only
    Log,
    /// Forward completed scans to the registry over HTTP
    Http(HttpSinkConfig),
    /// Record completed scans in the local database
    Storage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSinkConfig {
    pub url: String,
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    /// Owner recorded with checkpoints; defaults to the hostname
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub listen: String,
}
