pub mod file;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub use file::FilePartitionSource;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("partition '{0}' is not available")]
    Unavailable(String),
}

/// Position in a partition log, taken from one delivered message.
///
/// Persisting a handle means "everything up to and including this message has
/// been handled": `offset` is the read position right after the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointHandle {
    pub partition_id: String,
    pub sequence_number: u64,
    pub offset: u64,
}

impl CheckpointHandle {
    /// True if `self` lies strictly after `other` in the same partition
    pub fn is_after(&self, other: &CheckpointHandle) -> bool {
        self.partition_id == other.partition_id && self.sequence_number > other.sequence_number
    }
}

impl fmt::Display for CheckpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} (offset {})",
            self.partition_id, self.sequence_number, self.offset
        )
    }
}

/// Raw message as delivered by the transport
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub properties: HashMap<String, String>,
    pub body: Vec<u8>,
    pub handle: CheckpointHandle,
}

impl TransportMessage {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Identity of the partition a processor instance owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionContext {
    pub partition_id: String,
    pub owner: String,
}

/// Why a partition stopped being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Shutdown,
    EndOfStream,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::Shutdown => "shutdown",
            CloseReason::EndOfStream => "end of stream",
        };
        f.write_str(reason)
    }
}

/// A single partition of the event log.
///
/// `next_delivery` returns `Ok(None)` once the partition is exhausted and
/// `Ok(Some(vec![]))` when nothing is available yet. Implementations must be
/// cancel-safe: dropping the future must not lose messages that were already
/// read.
#[async_trait]
pub trait PartitionSource: Send {
    fn partition_id(&self) -> &str;

    async fn next_delivery(
        &mut self,
        max_messages: usize,
    ) -> Result<Option<Vec<TransportMessage>>, TransportError>;
}
