//! Fire-and-forget invocation of pipeline workers.
//!
//! Stage handlers never loop in-process: they persist their result and hand
//! the next step to a [`Dispatcher`]. [`QueueDispatcher`] writes to the
//! durable `tasks` table (at-least-once, deduplicated by idempotency key);
//! [`ChannelDispatcher`] feeds an in-process channel for tests and embedded
//! use.

use async_trait::async_trait;
use fitline_core::types::DbId;
use fitline_db::models::task::NewTask;
use fitline_db::repositories::TaskRepo;
use fitline_db::DbPool;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::PipelineError;

pub const TARGET_ADVANCE: &str = "advance";
pub const TARGET_SEGMENTATION_WORKER: &str = "segmentation_worker";

/// A unit of work addressed to a named worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkItem {
    /// Run the current stage of a job.
    Advance { job_id: DbId },
    /// Run one segmentation slot of a mask consensus job.
    SegmentationWorker { job_id: DbId, slot: usize },
}

#[derive(Deserialize)]
struct AdvanceBody {
    job_id: DbId,
}

#[derive(Deserialize)]
struct SegmentationBody {
    job_id: DbId,
    slot: usize,
}

impl WorkItem {
    pub fn target(&self) -> &'static str {
        match self {
            WorkItem::Advance { .. } => TARGET_ADVANCE,
            WorkItem::SegmentationWorker { .. } => TARGET_SEGMENTATION_WORKER,
        }
    }

    pub fn job_id(&self) -> DbId {
        match self {
            WorkItem::Advance { job_id } | WorkItem::SegmentationWorker { job_id, .. } => *job_id,
        }
    }

    pub fn body(&self) -> serde_json::Value {
        match self {
            WorkItem::Advance { job_id } => serde_json::json!({ "job_id": job_id }),
            WorkItem::SegmentationWorker { job_id, slot } => {
                serde_json::json!({ "job_id": job_id, "slot": slot })
            }
        }
    }

    /// Rebuild a work item from a stored task.
    pub fn from_parts(target: &str, body: &serde_json::Value) -> Result<Self, PipelineError> {
        let malformed =
            |e: serde_json::Error| PipelineError::Dispatch(format!("Malformed {target} body: {e}"));
        match target {
            TARGET_ADVANCE => {
                let b: AdvanceBody = serde_json::from_value(body.clone()).map_err(malformed)?;
                Ok(WorkItem::Advance { job_id: b.job_id })
            }
            TARGET_SEGMENTATION_WORKER => {
                let b: SegmentationBody = serde_json::from_value(body.clone()).map_err(malformed)?;
                Ok(WorkItem::SegmentationWorker {
                    job_id: b.job_id,
                    slot: b.slot,
                })
            }
            other => Err(PipelineError::Dispatch(format!("Unknown task target '{other}'"))),
        }
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, item: WorkItem) -> Result<(), PipelineError>;
}

// ---------------------------------------------------------------------------
// Durable queue
// ---------------------------------------------------------------------------

/// [`Dispatcher`] backed by the `tasks` table.
#[derive(Clone)]
pub struct QueueDispatcher {
    pool: DbPool,
}

impl QueueDispatcher {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Dispatcher for QueueDispatcher {
    async fn dispatch(&self, item: WorkItem) -> Result<(), PipelineError> {
        let task = NewTask::keyed(item.target(), item.body());
        let queued = TaskRepo::enqueue(&self.pool, &task)
            .await
            .map_err(|e| PipelineError::Dispatch(e.to_string()))?;
        match queued {
            Some(row) => tracing::debug!(
                task_id = row.id,
                task_target = item.target(),
                job_id = item.job_id(),
                "Task queued",
            ),
            None => tracing::debug!(
                task_target = item.target(),
                job_id = item.job_id(),
                "Identical task already waiting",
            ),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process channel
// ---------------------------------------------------------------------------

/// [`Dispatcher`] that sends work items over an unbounded channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    async fn dispatch(&self, item: WorkItem) -> Result<(), PipelineError> {
        self.tx
            .send(item)
            .map_err(|e| PipelineError::Dispatch(format!("Work channel closed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn work_items_survive_storage() {
        let items = [
            WorkItem::Advance { job_id: 3 },
            WorkItem::SegmentationWorker { job_id: 3, slot: 4 },
        ];
        for item in items {
            let back = WorkItem::from_parts(item.target(), &item.body()).unwrap();
            assert_eq!(back, item);
        }
    }

    #[test]
    fn unknown_target_rejected() {
        assert_matches!(
            WorkItem::from_parts("render", &serde_json::json!({})),
            Err(PipelineError::Dispatch(_))
        );
        assert_matches!(
            WorkItem::from_parts(TARGET_ADVANCE, &serde_json::json!({"id": 1})),
            Err(PipelineError::Dispatch(_))
        );
    }

    #[tokio::test]
    async fn channel_dispatcher_delivers_in_order() {
        let (dispatcher, mut rx) = ChannelDispatcher::channel();
        dispatcher.dispatch(WorkItem::Advance { job_id: 1 }).await.unwrap();
        dispatcher.dispatch(WorkItem::Advance { job_id: 2 }).await.unwrap();
        assert_eq!(rx.recv().await, Some(WorkItem::Advance { job_id: 1 }));
        assert_eq!(rx.recv().await, Some(WorkItem::Advance { job_id: 2 }));
    }
}
