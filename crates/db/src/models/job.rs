//! Job rows for the `jobs` table.

use fitline_core::job_status::{self, JobKind};
use fitline_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub kind: String,
    pub status: String,
    /// Caller-supplied context plus references to related jobs.
    pub payload: serde_json::Value,
    /// Artifacts accumulated by completed stages.
    pub results: serde_json::Value,
    pub attempt_count: i32,
    pub error_message: Option<String>,
    /// Stage currently held by an exclusive claim, if any.
    pub claimed_stage: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl Job {
    pub fn job_kind(&self) -> Result<JobKind, fitline_core::error::CoreError> {
        JobKind::parse(&self.kind)
    }

    pub fn is_terminal(&self) -> bool {
        job_status::is_terminal(&self.status)
    }

    /// Artifact stored under `key` in `results`.
    pub fn result(&self, key: &str) -> Option<&serde_json::Value> {
        self.results.get(key).filter(|v| !v.is_null())
    }

    pub fn result_str(&self, key: &str) -> Option<&str> {
        self.result(key).and_then(|v| v.as_str())
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    pub fn payload_id(&self, key: &str) -> Option<DbId> {
        self.payload.get(key).and_then(|v| v.as_i64())
    }
}

/// DTO for inserting a job.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub kind: String,
    pub status: String,
    pub payload: serde_json::Value,
}

impl CreateJob {
    /// A job of `kind` in its initial status.
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            status: kind.initial_status().to_string(),
            payload,
        }
    }
}
