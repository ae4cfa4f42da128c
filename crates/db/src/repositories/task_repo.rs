//! Repository for the `tasks` dispatch queue.
//!
//! Producers enqueue with an idempotency key; a duplicate of a task that is
//! still waiting collapses onto the existing row. Consumers claim with
//! `SELECT ... FOR UPDATE SKIP LOCKED` so concurrent workers never take the
//! same row, and delete the row once the handler succeeds.

use fitline_core::types::DbId;
use sqlx::PgPool;

use crate::models::task::{NewTask, Task};

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, target, body, idempotency_key, attempts, available_at, \
    locked_at, locked_by, last_error, created_at";

/// Provides queue operations for dispatched tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Queue a task. Returns `None` when an unclaimed task with the same
    /// idempotency key is already waiting.
    pub async fn enqueue(pool: &PgPool, input: &NewTask) -> Result<Option<Task>, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (target, body, idempotency_key) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (idempotency_key) WHERE locked_at IS NULL DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(&input.target)
            .bind(&input.body)
            .bind(&input.idempotency_key)
            .fetch_optional(pool)
            .await
    }

    /// Atomically lock the oldest available task for `worker`.
    ///
    /// Tasks locked longer than `lock_timeout_secs` ago are considered
    /// abandoned and may be claimed again.
    pub async fn claim_next(
        pool: &PgPool,
        worker: &str,
        lock_timeout_secs: i64,
    ) -> Result<Option<Task>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks \
             SET locked_at = NOW(), locked_by = $1, attempts = attempts + 1 \
             WHERE id = ( \
                 SELECT id FROM tasks \
                 WHERE available_at <= NOW() \
                   AND (locked_at IS NULL \
                        OR locked_at < NOW() - make_interval(secs => $2::double precision)) \
                 ORDER BY available_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(worker)
            .bind(lock_timeout_secs)
            .fetch_optional(pool)
            .await
    }

    /// Remove a task after it was handled (or given up on).
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Unlock a failed task so it is retried after `delay_secs`.
    ///
    /// If an identical task is already waiting, the failed copy is dropped
    /// instead: the waiting copy covers the retry. The check and the unlock
    /// run as one statement; a copy queued concurrently surfaces as a unique
    /// violation on `uq_tasks_pending_key` and is handled the same way.
    pub async fn release(
        pool: &PgPool,
        id: DbId,
        error: &str,
        delay_secs: i64,
    ) -> Result<(), sqlx::Error> {
        let unlocked = sqlx::query(
            "UPDATE tasks t \
             SET locked_at = NULL, locked_by = NULL, last_error = $2, \
                 available_at = NOW() + make_interval(secs => $3::double precision) \
             WHERE t.id = $1 AND NOT EXISTS ( \
                 SELECT 1 FROM tasks o \
                 WHERE o.idempotency_key = t.idempotency_key \
                   AND o.locked_at IS NULL AND o.id <> t.id)",
        )
        .bind(id)
        .bind(error)
        .bind(delay_secs)
        .execute(pool)
        .await;

        match unlocked {
            Ok(done) if done.rows_affected() > 0 => Ok(()),
            Ok(_) => Self::delete(pool, id).await,
            // PostgreSQL unique constraint violation: error code 23505
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Self::delete(pool, id).await
            }
            Err(e) => Err(e),
        }
    }
}
