use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::controller::ControllerQueue;

/// Submit a dead-node sweep to the queue every `period` until cancelled.
///
/// The sweep itself runs on the queue, never on this task, so it is atomic
/// with respect to registrations and heartbeats.
pub fn spawn_sweeper(
    queue: ControllerQueue,
    period: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;

        tracing::debug!(
            period_ms = period.as_millis() as u64,
            timeout_ms = timeout.as_millis() as u64,
            "Dead node sweeper started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let submitted = queue.submit("sweep_dead_nodes", move |state, _| {
                        state.sweep_dead_nodes(Instant::now(), timeout);
                    });
                    if submitted.is_err() {
                        tracing::debug!("Work queue closed, sweeper exiting");
                        break;
                    }
                }
            }
        }

        tracing::debug!("Dead node sweeper stopped");
    })
}
