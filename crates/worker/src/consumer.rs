//! Durable task consumer.
//!
//! Each loop claims one task at a time from the `tasks` table with
//! `FOR UPDATE SKIP LOCKED`, hands it to the orchestrator and then either
//! deletes it or releases it for a delayed retry.

use std::sync::Arc;
use std::time::Duration;

use fitline_db::models::task::Task;
use fitline_db::repositories::TaskRepo;
use fitline_db::DbPool;
use fitline_pipeline::{Orchestrator, WorkItem};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

/// Upper bound on the retry delay of a failing task.
const MAX_RETRY_DELAY_SECS: i64 = 300;

pub struct TaskConsumer {
    pool: DbPool,
    orchestrator: Arc<Orchestrator>,
    config: WorkerConfig,
}

impl TaskConsumer {
    pub fn new(pool: DbPool, orchestrator: Arc<Orchestrator>, config: WorkerConfig) -> Self {
        Self {
            pool,
            orchestrator,
            config,
        }
    }

    /// Poll until `cancel` fires. Work already claimed finishes first.
    pub async fn run(self: Arc<Self>, slot: usize, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        tracing::info!(
            worker_id = %self.config.worker_id,
            slot,
            poll_interval_ms = self.config.poll_interval_ms,
            "Task consumer started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(slot, "Task consumer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    // Drain everything available before waiting for the next tick.
                    while !cancel.is_cancelled() {
                        match self.process_next().await {
                            Ok(true) => continue,
                            Ok(false) => break,
                            Err(e) => {
                                tracing::error!(slot, error = %e, "Task poll failed");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Claim and run one task. `false` when the queue is empty.
    async fn process_next(&self) -> Result<bool, sqlx::Error> {
        let Some(task) = TaskRepo::claim_next(
            &self.pool,
            &self.config.worker_id,
            self.config.lock_timeout_secs,
        )
        .await?
        else {
            return Ok(false);
        };

        let item = match WorkItem::from_parts(&task.target, &task.body) {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(task_id = task.id, error = %e, "Dropping undecodable task");
                TaskRepo::delete(&self.pool, task.id).await?;
                return Ok(true);
            }
        };

        match self.orchestrator.handle(item.clone()).await {
            Ok(()) => TaskRepo::delete(&self.pool, task.id).await?,
            Err(e) => self.retry_or_drop(&task, &item, &e.to_string()).await?,
        }
        Ok(true)
    }

    async fn retry_or_drop(&self, task: &Task, item: &WorkItem, error: &str) -> Result<(), sqlx::Error> {
        if task.attempts >= self.config.max_task_attempts {
            tracing::error!(
                task_id = task.id,
                job_id = item.job_id(),
                attempts = task.attempts,
                error,
                "Task abandoned after repeated failures; the watchdog will re-dispatch the job",
            );
            return TaskRepo::delete(&self.pool, task.id).await;
        }

        let delay_secs = retry_delay_secs(self.config.retry_base_delay_secs, task.attempts);
        tracing::warn!(
            task_id = task.id,
            job_id = item.job_id(),
            attempts = task.attempts,
            delay_secs,
            error,
            "Task failed, scheduling retry",
        );
        TaskRepo::release(&self.pool, task.id, error, delay_secs).await
    }
}

/// Exponential backoff: `base * 2^(attempts - 1)`, capped.
pub fn retry_delay_secs(base: i64, attempts: i32) -> i64 {
    let exponent = (attempts.max(1) - 1).min(16) as u32;
    base.saturating_mul(1_i64 << exponent).min(MAX_RETRY_DELAY_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(retry_delay_secs(5, 1), 5);
        assert_eq!(retry_delay_secs(5, 2), 10);
        assert_eq!(retry_delay_secs(5, 4), 40);
        assert_eq!(retry_delay_secs(5, 20), MAX_RETRY_DELAY_SECS);
    }

    #[test]
    fn zero_attempts_treated_as_first() {
        assert_eq!(retry_delay_secs(3, 0), 3);
    }
}
