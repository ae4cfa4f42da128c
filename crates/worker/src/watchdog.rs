//! Periodic re-dispatch of stalled jobs.
//!
//! A job whose dispatch was lost (crashed worker, dropped task) would
//! otherwise sit in a non-terminal status forever.

use std::sync::Arc;
use std::time::Duration;

use fitline_pipeline::Orchestrator;
use tokio_util::sync::CancellationToken;

pub async fn run(
    orchestrator: Arc<Orchestrator>,
    stall_threshold: Duration,
    interval: Duration,
    batch_size: usize,
    cancel: CancellationToken,
) {
    tracing::info!(
        stall_threshold_secs = stall_threshold.as_secs(),
        interval_secs = interval.as_secs(),
        "Stall watchdog started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stall watchdog stopping");
                break;
            }
            _ = ticker.tick() => {
                match orchestrator.recover_stalled(stall_threshold, batch_size).await {
                    Ok(0) => tracing::debug!("Stall watchdog: no stalled jobs"),
                    Ok(recovered) => tracing::info!(recovered, "Stall watchdog: jobs re-dispatched"),
                    Err(e) => tracing::error!(error = %e, "Stall watchdog: sweep failed"),
                }
            }
        }
    }
}
