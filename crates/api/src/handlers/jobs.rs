//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use fitline_core::job_status::JobKind;
use fitline_core::types::DbId;
use fitline_db::models::job::Job;
use fitline_pipeline::AdvanceOutcome;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// `garment_fit`, `mask_consensus` or `generation`.
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: DbId,
    pub kind: String,
    pub status: String,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind.clone(),
            status: job.status.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdvanceResponse {
    #[serde(flatten)]
    pub outcome: AdvanceOutcome,
    pub job: Job,
}

/// POST /api/v1/jobs
///
/// Persists the job and dispatches its first advance; stage work happens
/// asynchronously.
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<JobSummary>>)> {
    let kind = JobKind::parse(&input.kind)?;
    if input.payload.is_null() {
        return Err(AppError::BadRequest("payload is required".to_string()));
    }
    let job = state.orchestrator.create_job(kind, input.payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: JobSummary::from(&job),
        }),
    ))
}

/// GET /api/v1/jobs/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Job>>> {
    let job = state.orchestrator.get_job(id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/advance
///
/// Runs the job's current stage inline. A stage failure is recorded on
/// the job and reported with a 200 and `"outcome": "failed"`.
pub async fn advance(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<AdvanceResponse>>> {
    let outcome = state.orchestrator.advance(id).await?;
    let job = state.orchestrator.get_job(id).await?;
    Ok(Json(DataResponse {
        data: AdvanceResponse { outcome, job },
    }))
}
