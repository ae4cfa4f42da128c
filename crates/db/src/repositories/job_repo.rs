//! Repository for the `jobs` table.
//!
//! Status changes go through [`JobRepo::transition_if`], a compare-and-set on
//! the current status, so two workers racing on the same job cannot both
//! move it. Every write also bumps `last_activity_at` for the watchdog.

use fitline_core::job_status::{STATUS_COMPLETE, STATUS_FAILED};
use fitline_core::types::DbId;
use sqlx::PgPool;

use crate::models::job::{CreateJob, Job};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, kind, status, payload, results, attempt_count, error_message, \
    claimed_stage, created_at, updated_at, last_activity_at";

/// Provides persistence operations for pipeline jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a job and return the stored row.
    pub async fn create(pool: &PgPool, input: &CreateJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (kind, status, payload) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(&input.kind)
            .bind(&input.status)
            .bind(&input.payload)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Move a job from `expected` to `next` if it is still in `expected`.
    ///
    /// `results_patch` is shallow-merged into `results`, `attempt_delta` is
    /// added to `attempt_count`, and any stage claim is released. Returns
    /// `None` when another worker already moved the job.
    pub async fn transition_if(
        pool: &PgPool,
        id: DbId,
        expected: &str,
        next: &str,
        results_patch: &serde_json::Value,
        attempt_delta: i32,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $3, results = results || $4, \
                 attempt_count = attempt_count + $5, claimed_stage = NULL, \
                 updated_at = NOW(), last_activity_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(expected)
            .bind(next)
            .bind(results_patch)
            .bind(attempt_delta)
            .fetch_optional(pool)
            .await
    }

    /// Shallow-merge `patch` into `payload`. Used to record references to
    /// child jobs.
    pub async fn merge_payload(
        pool: &PgPool,
        id: DbId,
        patch: &serde_json::Value,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET payload = payload || $2, updated_at = NOW(), last_activity_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(patch)
            .fetch_optional(pool)
            .await
    }

    /// Atomically store one worker's outcome under
    /// `results.worker_results[slot]` and return the updated row, so the
    /// caller sees every slot settled so far.
    pub async fn record_worker_result(
        pool: &PgPool,
        id: DbId,
        slot: &str,
        outcome: &serde_json::Value,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET results = jsonb_set( \
                     jsonb_set(results, '{{worker_results}}', \
                               COALESCE(results->'worker_results', '{{}}'::jsonb)), \
                     ARRAY['worker_results', $2], $3, true), \
                 updated_at = NOW(), last_activity_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(slot)
            .bind(outcome)
            .fetch_optional(pool)
            .await
    }

    /// Take the exclusive claim on `stage` while the job sits in `status`.
    ///
    /// Returns `true` for exactly one caller; the claim is released by the
    /// next status transition.
    pub async fn claim_stage(
        pool: &PgPool,
        id: DbId,
        status: &str,
        stage: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET claimed_stage = $3, updated_at = NOW(), last_activity_at = NOW() \
             WHERE id = $1 AND status = $2 AND claimed_stage IS NULL",
        )
        .bind(id)
        .bind(status)
        .bind(stage)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a non-terminal job as failed.
    ///
    /// Returns `false` if the job was already complete or failed.
    pub async fn fail(pool: &PgPool, id: DbId, message: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, error_message = $3, claimed_stage = NULL, \
                 updated_at = NOW(), last_activity_at = NOW() \
             WHERE id = $1 AND status NOT IN ($4, $2)",
        )
        .bind(id)
        .bind(STATUS_FAILED)
        .bind(message)
        .bind(STATUS_COMPLETE)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Jobs whose payload has `key` set to `referenced_id`.
    pub async fn find_by_payload_ref(
        pool: &PgPool,
        key: &str,
        referenced_id: DbId,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE payload @> jsonb_build_object($1::text, $2::bigint) \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(key)
            .bind(referenced_id)
            .fetch_all(pool)
            .await
    }

    /// Non-terminal jobs with no activity for at least `idle_secs`.
    pub async fn find_stalled(
        pool: &PgPool,
        idle_secs: i64,
        limit: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status NOT IN ($1, $2) \
               AND last_activity_at < NOW() - make_interval(secs => $3::double precision) \
             ORDER BY last_activity_at ASC \
             LIMIT $4"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(STATUS_COMPLETE)
            .bind(STATUS_FAILED)
            .bind(idle_secs)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Bump `last_activity_at` on a stalled job and release its stage
    /// claim so the next advance can retake it.
    pub async fn touch(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs SET last_activity_at = NOW(), claimed_stage = NULL \
             WHERE id = $1 AND status NOT IN ($2, $3)",
        )
        .bind(id)
        .bind(STATUS_COMPLETE)
        .bind(STATUS_FAILED)
        .execute(pool)
        .await?;
        Ok(())
    }
}
