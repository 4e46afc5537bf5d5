use crate::config::types::IntakeConfig;
use crate::event::decode_event;
use crate::tracker::counters::{bump, PipelineCounters};
use crate::tracker::{BatchTracker, EventOutcome, StaleBatchReaper};
use crate::transport::{CloseReason, PartitionContext, TransportMessage};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

/// Tally of one delivery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub received: usize,
    pub applied: usize,
    pub foreign: usize,
    pub missing_identity: usize,
    pub poison: usize,
    pub duplicates: usize,
    pub completed: usize,
    /// Shutdown stopped the delivery part-way
    pub cancelled: bool,
}

/// Entry point for transport deliveries: filters and decodes messages,
/// feeds the tracker, then runs the reaper once per delivery.
pub struct EventIntake {
    config: IntakeConfig,
    tracker: Arc<BatchTracker>,
    reaper: Arc<StaleBatchReaper>,
    counters: Arc<PipelineCounters>,
}

impl EventIntake {
    pub fn new(
        config: IntakeConfig,
        tracker: Arc<BatchTracker>,
        reaper: Arc<StaleBatchReaper>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            config,
            tracker,
            reaper,
            counters,
        }
    }

    pub fn reaper(&self) -> &StaleBatchReaper {
        &self.reaper
    }

    /// Process one delivery. Bad messages are logged and skipped; nothing
    /// here fails the delivery.
    pub async fn process_events(
        &self,
        messages: &[TransportMessage],
        cancel: &CancellationToken,
    ) -> IntakeReport {
        let mut report = IntakeReport::default();
        if messages.is_empty() {
            return report;
        }

        for message in messages {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            report.received += 1;
            bump(&self.counters.received);

            let content_type = message.property(&self.config.content_type_property);
            if content_type != Some(self.config.content_type.as_str()) {
                report.foreign += 1;
                bump(&self.counters.foreign);
                trace!(
                    content_type = content_type.unwrap_or("-"),
                    checkpoint = %message.handle,
                    "Skipping message that is not a discovery event"
                );
                continue;
            }

            let Some(agent_id) = self.agent_id(message) else {
                report.missing_identity += 1;
                bump(&self.counters.missing_identity);
                warn!(
                    property = %self.config.identity_property,
                    checkpoint = %message.handle,
                    "Discovery event without agent identity, skipping"
                );
                continue;
            };

            let event = match decode_event(&message.body) {
                Ok(event) => event,
                Err(e) => {
                    report.poison += 1;
                    bump(&self.counters.poison);
                    error!(
                        agent_id = %agent_id,
                        checkpoint = %message.handle,
                        payload = %String::from_utf8_lossy(&message.body),
                        error = %e,
                        "Failed to decode discovery event, skipping"
                    );
                    continue;
                }
            };

            report.applied += 1;
            bump(&self.counters.applied);

            match self
                .tracker
                .add_event(&agent_id, event, message.handle.clone(), cancel)
                .await
            {
                EventOutcome::Buffered => {}
                EventOutcome::Duplicate => report.duplicates += 1,
                EventOutcome::Completed => report.completed += 1,
                EventOutcome::Cancelled => {
                    report.cancelled = true;
                    break;
                }
            }
        }

        if !report.cancelled {
            self.reaper.run_once().await;
        }

        report
    }

    /// Device id, or `{device}_module_{module}` when the message also names
    /// a module
    fn agent_id(&self, message: &TransportMessage) -> Option<String> {
        let device = message
            .property(&self.config.identity_property)
            .filter(|d| !d.is_empty())?;

        let module = self
            .config
            .module_property
            .as_deref()
            .and_then(|key| message.property(key))
            .filter(|m| !m.is_empty());

        Some(match module {
            Some(module) => format!("{}_module_{}", device, module),
            None => device.to_string(),
        })
    }

    pub fn on_open(&self, context: &PartitionContext) {
        info!(
            partition_id = %context.partition_id,
            owner = %context.owner,
            "Partition opened"
        );
    }

    pub fn on_close(&self, context: &PartitionContext, reason: CloseReason) {
        let in_flight = crate::tracker::lock_state(self.tracker.state()).len();
        info!(
            partition_id = %context.partition_id,
            owner = %context.owner,
            reason = %reason,
            in_flight,
            "Partition closed"
        );
    }

    pub fn on_error(&self, context: &PartitionContext, err: &dyn std::error::Error) {
        error!(
            partition_id = %context.partition_id,
            owner = %context.owner,
            error = %err,
            "Partition processing error"
        );
    }
}
