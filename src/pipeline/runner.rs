use crate::config::types::{PartitionConfig, ReaperConfig};
use crate::intake::EventIntake;
use crate::transport::{CloseReason, PartitionContext, PartitionSource};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Drive one partition until shutdown or end of stream.
///
/// Deliveries are processed one at a time. The idle tick runs the reaper
/// between deliveries so a quiet partition still drops abandoned scans.
pub async fn run_partition<S: PartitionSource>(
    source: &mut S,
    intake: &EventIntake,
    context: &PartitionContext,
    partition: &PartitionConfig,
    reaper: &ReaperConfig,
    shutdown: CancellationToken,
) -> CloseReason {
    intake.on_open(context);
    debug!(
        partition_id = %source.partition_id(),
        max_batch_size = partition.max_batch_size,
        "Polling partition"
    );

    let mut idle_tick = tokio::time::interval(reaper.idle_interval);
    idle_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    idle_tick.tick().await;

    let reason = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break CloseReason::Shutdown,

            _ = idle_tick.tick() => {
                let report = intake.reaper().run_once().await;
                if report.evicted > 0 {
                    debug!(evicted = report.evicted, "Idle reaper pass");
                }
            }

            delivery = source.next_delivery(partition.max_batch_size) => {
                match delivery {
                    Ok(Some(messages)) => {
                        let report = intake.process_events(&messages, &shutdown).await;
                        if report.received > 0 {
                            debug!(
                                received = report.received,
                                applied = report.applied,
                                completed = report.completed,
                                "Delivery processed"
                            );
                        }
                        if report.cancelled {
                            break CloseReason::Shutdown;
                        }
                    }
                    Ok(None) => break CloseReason::EndOfStream,
                    Err(e) => {
                        intake.on_error(context, &e);
                        tokio::select! {
                            _ = shutdown.cancelled() => break CloseReason::Shutdown,
                            _ = tokio::time::sleep(partition.poll_interval) => {}
                        }
                    }
                }
            }
        }
    };

    intake.on_close(context, reason);
    reason
}
