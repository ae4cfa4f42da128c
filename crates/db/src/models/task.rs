//! Rows for the `tasks` dispatch queue.

use fitline_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: DbId,
    pub target: String,
    pub body: serde_json::Value,
    pub idempotency_key: String,
    pub attempts: i32,
    pub available_at: Timestamp,
    pub locked_at: Option<Timestamp>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
}

/// DTO for enqueuing a task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub target: String,
    pub body: serde_json::Value,
    pub idempotency_key: String,
}

impl NewTask {
    /// Build a task whose idempotency key is derived from target and body.
    pub fn keyed(target: impl Into<String>, body: serde_json::Value) -> Self {
        let target = target.into();
        let idempotency_key = fitline_core::hashing::idempotency_key(&target, &body);
        Self {
            target,
            body,
            idempotency_key,
        }
    }
}
