//! Durable job records.
//!
//! [`JobStore`] is the only way stage handlers read or write jobs. Its two
//! atomic primitives, [`transition_if`](JobStore::transition_if) and
//! [`claim_stage`](JobStore::claim_stage), are what make duplicate
//! invocations safe. [`PgJobStore`] backs it with PostgreSQL and
//! [`MemoryJobStore`] keeps everything in process for tests and embedded
//! use.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fitline_core::types::DbId;
use fitline_db::models::job::{CreateJob, Job};
use fitline_db::repositories::JobRepo;
use fitline_db::DbPool;
use tokio::sync::Mutex;

use crate::error::PipelineError;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, input: CreateJob) -> Result<Job, PipelineError>;

    async fn get(&self, id: DbId) -> Result<Option<Job>, PipelineError>;

    /// Compare-and-set on status. Merges `results_patch` into `results`,
    /// adds `attempt_delta` to `attempt_count` and releases any stage claim.
    /// `None` means the job was no longer in `expected`.
    async fn transition_if(
        &self,
        id: DbId,
        expected: &str,
        next: &str,
        results_patch: serde_json::Value,
        attempt_delta: i32,
    ) -> Result<Option<Job>, PipelineError>;

    async fn merge_payload(
        &self,
        id: DbId,
        patch: serde_json::Value,
    ) -> Result<Option<Job>, PipelineError>;

    /// Store one worker's outcome under `results.worker_results[slot]` and
    /// return the updated job.
    async fn record_worker_result(
        &self,
        id: DbId,
        slot: &str,
        outcome: serde_json::Value,
    ) -> Result<Option<Job>, PipelineError>;

    /// Exclusive claim of `stage` while the job is in `status`.
    async fn claim_stage(&self, id: DbId, status: &str, stage: &str)
        -> Result<bool, PipelineError>;

    /// Move a non-terminal job to `failed`. `false` if it was already terminal.
    async fn fail(&self, id: DbId, message: &str) -> Result<bool, PipelineError>;

    /// Jobs whose payload has `key` equal to `referenced_id`.
    async fn find_by_payload_ref(
        &self,
        key: &str,
        referenced_id: DbId,
    ) -> Result<Vec<Job>, PipelineError>;

    /// Non-terminal jobs idle for at least `idle`.
    async fn find_stalled(&self, idle: Duration, limit: usize) -> Result<Vec<Job>, PipelineError>;

    /// Bump activity on a stalled job and release any stage claim it holds.
    async fn touch(&self, id: DbId) -> Result<(), PipelineError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`JobStore`] over the `jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: CreateJob) -> Result<Job, PipelineError> {
        Ok(JobRepo::create(&self.pool, &input).await?)
    }

    async fn get(&self, id: DbId) -> Result<Option<Job>, PipelineError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn transition_if(
        &self,
        id: DbId,
        expected: &str,
        next: &str,
        results_patch: serde_json::Value,
        attempt_delta: i32,
    ) -> Result<Option<Job>, PipelineError> {
        Ok(JobRepo::transition_if(&self.pool, id, expected, next, &results_patch, attempt_delta).await?)
    }

    async fn merge_payload(
        &self,
        id: DbId,
        patch: serde_json::Value,
    ) -> Result<Option<Job>, PipelineError> {
        Ok(JobRepo::merge_payload(&self.pool, id, &patch).await?)
    }

    async fn record_worker_result(
        &self,
        id: DbId,
        slot: &str,
        outcome: serde_json::Value,
    ) -> Result<Option<Job>, PipelineError> {
        Ok(JobRepo::record_worker_result(&self.pool, id, slot, &outcome).await?)
    }

    async fn claim_stage(
        &self,
        id: DbId,
        status: &str,
        stage: &str,
    ) -> Result<bool, PipelineError> {
        Ok(JobRepo::claim_stage(&self.pool, id, status, stage).await?)
    }

    async fn fail(&self, id: DbId, message: &str) -> Result<bool, PipelineError> {
        Ok(JobRepo::fail(&self.pool, id, message).await?)
    }

    async fn find_by_payload_ref(
        &self,
        key: &str,
        referenced_id: DbId,
    ) -> Result<Vec<Job>, PipelineError> {
        Ok(JobRepo::find_by_payload_ref(&self.pool, key, referenced_id).await?)
    }

    async fn find_stalled(&self, idle: Duration, limit: usize) -> Result<Vec<Job>, PipelineError> {
        Ok(JobRepo::find_stalled(&self.pool, idle.as_secs() as i64, limit as i64).await?)
    }

    async fn touch(&self, id: DbId) -> Result<(), PipelineError> {
        Ok(JobRepo::touch(&self.pool, id).await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// [`JobStore`] held in process. Every operation takes one lock, so the
/// conditional updates are atomic just like their SQL counterparts.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    jobs: BTreeMap<DbId, Job>,
    last_id: DbId,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job, ordered by id.
    pub async fn all(&self) -> Vec<Job> {
        self.inner.lock().await.jobs.values().cloned().collect()
    }

    /// Rewind a job's activity clock; lets tests exercise stall detection.
    pub async fn backdate_activity(&self, id: DbId, by: Duration) {
        if let Some(job) = self.inner.lock().await.jobs.get_mut(&id) {
            if let Ok(by) = chrono::Duration::from_std(by) {
                job.last_activity_at -= by;
            }
        }
    }
}

/// Shallow object merge with the semantics of PostgreSQL `jsonb || jsonb`.
fn merge_object(target: &mut serde_json::Value, patch: serde_json::Value) {
    if let serde_json::Value::Object(patch) = patch {
        if !target.is_object() {
            *target = serde_json::Value::Object(Default::default());
        }
        if let Some(obj) = target.as_object_mut() {
            obj.extend(patch);
        }
    }
}

fn touch_job(job: &mut Job) {
    let now = Utc::now();
    job.updated_at = now;
    job.last_activity_at = now;
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: CreateJob) -> Result<Job, PipelineError> {
        let mut state = self.inner.lock().await;
        state.last_id += 1;
        let now = Utc::now();
        let job = Job {
            id: state.last_id,
            kind: input.kind,
            status: input.status,
            payload: input.payload,
            results: serde_json::json!({}),
            attempt_count: 0,
            error_message: None,
            claimed_stage: None,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: DbId) -> Result<Option<Job>, PipelineError> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn transition_if(
        &self,
        id: DbId,
        expected: &str,
        next: &str,
        results_patch: serde_json::Value,
        attempt_delta: i32,
    ) -> Result<Option<Job>, PipelineError> {
        let mut state = self.inner.lock().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != expected {
            return Ok(None);
        }
        job.status = next.to_string();
        merge_object(&mut job.results, results_patch);
        job.attempt_count += attempt_delta;
        job.claimed_stage = None;
        touch_job(job);
        Ok(Some(job.clone()))
    }

    async fn merge_payload(
        &self,
        id: DbId,
        patch: serde_json::Value,
    ) -> Result<Option<Job>, PipelineError> {
        let mut state = self.inner.lock().await;
        Ok(state.jobs.get_mut(&id).map(|job| {
            merge_object(&mut job.payload, patch);
            touch_job(job);
            job.clone()
        }))
    }

    async fn record_worker_result(
        &self,
        id: DbId,
        slot: &str,
        outcome: serde_json::Value,
    ) -> Result<Option<Job>, PipelineError> {
        let mut state = self.inner.lock().await;
        Ok(state.jobs.get_mut(&id).map(|job| {
            let mut slots = job
                .results
                .get("worker_results")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            merge_object(&mut slots, serde_json::json!({ slot: outcome }));
            merge_object(&mut job.results, serde_json::json!({ "worker_results": slots }));
            touch_job(job);
            job.clone()
        }))
    }

    async fn claim_stage(
        &self,
        id: DbId,
        status: &str,
        stage: &str,
    ) -> Result<bool, PipelineError> {
        let mut state = self.inner.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == status && job.claimed_stage.is_none() => {
                job.claimed_stage = Some(stage.to_string());
                touch_job(job);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, id: DbId, message: &str) -> Result<bool, PipelineError> {
        let mut state = self.inner.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) if !job.is_terminal() => {
                job.status = fitline_core::job_status::STATUS_FAILED.to_string();
                job.error_message = Some(message.to_string());
                job.claimed_stage = None;
                touch_job(job);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_payload_ref(
        &self,
        key: &str,
        referenced_id: DbId,
    ) -> Result<Vec<Job>, PipelineError> {
        let state = self.inner.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| job.payload_id(key) == Some(referenced_id))
            .cloned()
            .collect())
    }

    async fn find_stalled(&self, idle: Duration, limit: usize) -> Result<Vec<Job>, PipelineError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(idle)
                .map_err(|e| PipelineError::Store(format!("Invalid idle duration: {e}")))?;
        let state = self.inner.lock().await;
        let mut stalled: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| !job.is_terminal() && job.last_activity_at < cutoff)
            .cloned()
            .collect();
        stalled.sort_by_key(|job| job.last_activity_at);
        stalled.truncate(limit);
        Ok(stalled)
    }

    async fn touch(&self, id: DbId) -> Result<(), PipelineError> {
        if let Some(job) = self.inner.lock().await.jobs.get_mut(&id) {
            if !job.is_terminal() {
                job.claimed_stage = None;
                touch_job(job);
            }
        }
        Ok(())
    }
}
