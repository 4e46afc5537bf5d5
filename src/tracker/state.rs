use super::batch::Batch;
use crate::transport::CheckpointHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-flight batches of one partition, keyed agent -> scan timestamp
#[derive(Debug, Default)]
pub struct PartitionState {
    agents: HashMap<String, BTreeMap<DateTime<Utc>, Batch>>,
}

pub type SharedPartitionState = Arc<Mutex<PartitionState>>;

/// Lock the partition state, recovering from a poisoned lock.
///
/// Every mutation completes before the guard is released, so the map is
/// consistent even if a holder panicked.
pub fn lock_state(state: &Mutex<PartitionState>) -> MutexGuard<'_, PartitionState> {
    state.lock().unwrap_or_else(|poisoned| {
        tracing::error!("Partition state lock was poisoned, recovering");
        PoisonError::into_inner(poisoned)
    })
}

/// Read-only view of one in-flight batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub agent_id: String,
    pub scan_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub endpoint_count: usize,
    pub max_index_seen: u32,
    pub saw_sentinel: bool,
    pub duplicates: u64,
    pub checkpoint: CheckpointHandle,
}

impl PartitionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedPartitionState {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Find the batch for (agent, scan), creating it with `create` if absent
    pub fn get_or_insert_with(
        &mut self,
        agent_id: &str,
        scan_timestamp: DateTime<Utc>,
        create: impl FnOnce() -> Batch,
    ) -> &mut Batch {
        self.agents
            .entry(agent_id.to_string())
            .or_default()
            .entry(scan_timestamp)
            .or_insert_with(create)
    }

    pub fn get(&self, agent_id: &str, scan_timestamp: DateTime<Utc>) -> Option<&Batch> {
        self.agents.get(agent_id)?.get(&scan_timestamp)
    }

    /// Remove one batch, dropping the agent entry once it has no scans left
    pub fn remove(&mut self, agent_id: &str, scan_timestamp: DateTime<Utc>) -> Option<Batch> {
        let scans = self.agents.get_mut(agent_id)?;
        let batch = scans.remove(&scan_timestamp);
        if scans.is_empty() {
            self.agents.remove(agent_id);
        }
        batch
    }

    /// Earliest `created_at` across all agents
    pub fn oldest_created_at(&self) -> Option<DateTime<Utc>> {
        self.batches().map(|b| b.created_at).min()
    }

    /// Remove and return every batch created strictly before `cutoff`
    pub fn evict_created_before(&mut self, cutoff: DateTime<Utc>) -> Vec<Batch> {
        let mut evicted = Vec::new();

        self.agents.retain(|_, scans| {
            let stale: Vec<DateTime<Utc>> = scans
                .iter()
                .filter(|(_, batch)| batch.created_at < cutoff)
                .map(|(ts, _)| *ts)
                .collect();

            for ts in stale {
                if let Some(batch) = scans.remove(&ts) {
                    evicted.push(batch);
                }
            }

            !scans.is_empty()
        });

        evicted
    }

    pub fn len(&self) -> usize {
        self.agents.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Summaries ordered by creation time
    pub fn summaries(&self) -> Vec<BatchSummary> {
        let mut summaries: Vec<BatchSummary> = self
            .batches()
            .map(|batch| BatchSummary {
                agent_id: batch.agent_id.clone(),
                scan_timestamp: batch.scan_timestamp,
                created_at: batch.created_at,
                endpoint_count: batch.endpoint_count(),
                max_index_seen: batch.max_index_seen,
                saw_sentinel: batch.saw_sentinel,
                duplicates: batch.duplicates,
                checkpoint: batch.checkpoint_handle.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
                .then_with(|| a.scan_timestamp.cmp(&b.scan_timestamp))
        });
        summaries
    }

    fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.agents.values().flat_map(BTreeMap::values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    fn batch(agent: &str, scan: DateTime<Utc>, created_at: DateTime<Utc>, seq: u64) -> Batch {
        Batch::new(
            agent,
            scan,
            created_at,
            CheckpointHandle {
                partition_id: "0".to_string(),
                sequence_number: seq,
                offset: seq * 10,
            },
        )
    }

    fn insert(state: &mut PartitionState, b: Batch) {
        let (agent, scan) = (b.agent_id.clone(), b.scan_timestamp);
        state.get_or_insert_with(&agent, scan, || b);
    }

    #[test]
    fn test_get_or_insert_keeps_first_batch() {
        let mut state = PartitionState::new();
        insert(&mut state, batch("sup1", base(), base(), 1));
        insert(&mut state, batch("sup1", base(), base() + Duration::seconds(5), 2));

        let stored = state.get("sup1", base()).unwrap();
        assert_eq!(stored.checkpoint_handle.sequence_number, 1);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_remove_prunes_empty_agent() {
        let mut state = PartitionState::new();
        insert(&mut state, batch("sup1", base(), base(), 1));
        insert(&mut state, batch("sup1", base() + Duration::hours(1), base(), 2));
        insert(&mut state, batch("sup2", base(), base(), 3));
        assert_eq!(state.agent_count(), 2);

        assert!(state.remove("sup2", base()).is_some());
        assert_eq!(state.agent_count(), 1);

        assert!(state.remove("sup1", base()).is_some());
        assert_eq!(state.agent_count(), 1);
        assert!(state.remove("sup1", base() + Duration::hours(1)).is_some());
        assert!(state.is_empty());
        assert!(state.remove("sup1", base()).is_none());
    }

    #[test]
    fn test_oldest_created_at_spans_agents() {
        let mut state = PartitionState::new();
        assert!(state.oldest_created_at().is_none());

        insert(&mut state, batch("sup1", base(), base() + Duration::minutes(3), 1));
        insert(&mut state, batch("sup2", base(), base() + Duration::minutes(1), 2));
        assert_eq!(state.oldest_created_at(), Some(base() + Duration::minutes(1)));
    }

    #[test]
    fn test_evict_created_before_cutoff() {
        let mut state = PartitionState::new();
        insert(&mut state, batch("sup1", base(), base(), 1));
        insert(&mut state, batch("sup1", base() + Duration::hours(1), base() + Duration::minutes(30), 2));
        insert(&mut state, batch("sup2", base(), base() + Duration::minutes(10), 3));

        let evicted = state.evict_created_before(base() + Duration::minutes(10));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].checkpoint_handle.sequence_number, 1);
        assert_eq!(state.len(), 2);

        // Boundary is exclusive
        assert!(state.get("sup2", base()).is_some());

        let evicted = state.evict_created_before(base() + Duration::hours(2));
        assert_eq!(evicted.len(), 2);
        assert!(state.is_empty());
        assert_eq!(state.agent_count(), 0);
    }

    #[test]
    fn test_summaries_ordered_by_creation() {
        let mut state = PartitionState::new();
        insert(&mut state, batch("sup2", base(), base() + Duration::minutes(2), 2));
        insert(&mut state, batch("sup1", base(), base() + Duration::minutes(1), 1));

        let summaries = state.summaries();
        let agents: Vec<_> = summaries.iter().map(|s| s.agent_id.as_str()).collect();
        assert_eq!(agents, vec!["sup1", "sup2"]);
        assert_eq!(summaries[0].endpoint_count, 0);
        assert!(!summaries[0].saw_sentinel);
    }
}
