use crate::event::{CompletedScan, DiscoveryEvent, DiscoveryResult, EndpointDescriptor};
use crate::transport::CheckpointHandle;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Partial result for one (agent, scan) pair
#[derive(Debug, Clone)]
pub struct Batch {
    pub agent_id: String,
    pub scan_timestamp: DateTime<Utc>,
    /// When the first event for this scan was seen
    pub created_at: DateTime<Utc>,
    /// Handle of the first event seen for this scan
    pub checkpoint_handle: CheckpointHandle,
    /// Endpoints in arrival order, tagged with their producer index
    pub endpoints: Vec<(u32, EndpointDescriptor)>,
    pub max_index_seen: u32,
    pub saw_sentinel: bool,
    pub result: Option<DiscoveryResult>,
    pub duplicates: u64,
    seen_indices: HashSet<u32>,
}

/// Effect of applying one event to a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Accepted,
    /// Redelivered endpoint index or repeated sentinel; the batch is unchanged
    Duplicate,
}

impl Batch {
    pub fn new(
        agent_id: impl Into<String>,
        scan_timestamp: DateTime<Utc>,
        created_at: DateTime<Utc>,
        checkpoint_handle: CheckpointHandle,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            scan_timestamp,
            created_at,
            checkpoint_handle,
            endpoints: Vec::new(),
            max_index_seen: 0,
            saw_sentinel: false,
            result: None,
            duplicates: 0,
            seen_indices: HashSet::new(),
        }
    }

    /// Fold one event into the batch.
    ///
    /// With `deduplicate` off every endpoint event is appended, so a
    /// redelivered endpoint inflates the endpoint count.
    pub fn apply(&mut self, event: DiscoveryEvent, deduplicate: bool) -> Applied {
        self.max_index_seen = self.max_index_seen.max(event.index);

        match event.endpoint {
            Some(endpoint) => {
                if deduplicate && !self.seen_indices.insert(event.index) {
                    self.duplicates += 1;
                    return Applied::Duplicate;
                }
                self.endpoints.push((event.index, endpoint));
            }
            None => {
                if deduplicate && self.saw_sentinel {
                    self.duplicates += 1;
                    return Applied::Duplicate;
                }
                self.saw_sentinel = true;
                if self.result.is_none() {
                    self.result = event.result;
                }
            }
        }

        Applied::Accepted
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Consume the batch, ordering endpoints by producer index.
    /// Equal indices keep their arrival order.
    pub fn into_completed_scan(self) -> CompletedScan {
        let mut endpoints = self.endpoints;
        endpoints.sort_by_key(|(index, _)| *index);

        CompletedScan {
            agent_id: self.agent_id,
            scan_timestamp: self.scan_timestamp,
            endpoints: endpoints.into_iter().map(|(_, endpoint)| endpoint).collect(),
            result: self.result,
        }
    }
}
