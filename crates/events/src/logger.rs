//! Structured logging of job events.
//!
//! [`EventLogger`] subscribes to the bus and writes one `tracing` record per
//! event. It stops when the bus is dropped or the cancellation token fires.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::{JobEvent, JOB_FAILED};

/// Background service that logs every job event.
pub struct EventLogger;

impl EventLogger {
    pub async fn run(mut receiver: broadcast::Receiver<JobEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Event logger stopping");
                    break;
                }
                received = receiver.recv() => match received {
                    Ok(event) => Self::log(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, event logger shutting down");
                        break;
                    }
                },
            }
        }
    }

    fn log(event: &JobEvent) {
        let status = event.status.as_deref().unwrap_or("-");
        if event.event_type == JOB_FAILED {
            tracing::warn!(
                job_id = event.job_id,
                kind = %event.kind,
                status,
                payload = %event.payload,
                "{}",
                event.event_type,
            );
        } else {
            tracing::info!(
                job_id = event.job_id,
                kind = %event.kind,
                status,
                payload = %event.payload,
                "{}",
                event.event_type,
            );
        }
    }
}
