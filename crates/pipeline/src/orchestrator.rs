//! Job state machine driver.
//!
//! [`Orchestrator::advance`] loads a job, runs the stage its status names
//! and persists the outcome through a compare-and-set transition. Every
//! stage checks for its own artifact first, so an invocation that repeats
//! work already done simply re-issues the transition. The loser of a race
//! sees `None` from the store and stops without dispatching.

use std::sync::Arc;
use std::time::Duration;

use fitline_core::job_status::{self, JobKind, TransitionKind};
use fitline_core::raster;
use fitline_core::types::DbId;
use fitline_db::models::job::{CreateJob, Job};
use fitline_events::{bus, EventBus, JobEvent};
use fitline_inference::{
    DetectionWorker, GenerationEngine, HttpInferenceClient, ImageStore, InferenceEndpoints,
    InferenceError, PromptWriter, QualityEvaluator, SegmentationWorker,
};
use image::DynamicImage;
use serde::Serialize;
use serde_json::json;

use crate::config::PipelineConfig;
use crate::dispatch::{Dispatcher, WorkItem};
use crate::error::PipelineError;
use crate::payload::{self, GENERATION_JOB_REF, MASK_JOB_REF};
use crate::store::JobStore;
use crate::{garment_fit, generation, mask};

/// External services the stages call.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn DetectionWorker>,
    pub segmenter: Arc<dyn SegmentationWorker>,
    pub prompt_writer: Arc<dyn PromptWriter>,
    pub engine: Arc<dyn GenerationEngine>,
    pub evaluator: Arc<dyn QualityEvaluator>,
    pub images: Arc<dyn ImageStore>,
}

impl Collaborators {
    /// Every collaborator backed by its HTTP service.
    pub fn http(endpoints: InferenceEndpoints) -> Result<Self, InferenceError> {
        let client = HttpInferenceClient::new(endpoints)?;
        let images = Arc::new(client.image_store());
        let client = Arc::new(client);
        Ok(Self {
            detector: client.clone(),
            segmenter: client.clone(),
            prompt_writer: client.clone(),
            engine: client.clone(),
            evaluator: client,
            images,
        })
    }
}

/// What a single `advance` call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// The stage ran and the job moved on.
    Progressed { from: String, to: String },
    /// Waiting on fan-out workers or a child job.
    Suspended { status: String },
    /// Nothing to do: the job is terminal or another invocation won.
    Skipped { status: String },
    /// The stage failed and the job is now `failed`.
    Failed { message: String },
}

/// State of a child job as seen by its parent.
pub(crate) enum ChildState {
    Complete(Job),
    Pending,
}

pub struct Orchestrator {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) collaborators: Collaborators,
    pub(crate) config: PipelineConfig,
    events: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<dyn Dispatcher>,
        collaborators: Collaborators,
        config: PipelineConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            collaborators,
            config,
            events,
        }
    }

    /// Validate the payload, persist a job in its initial status and
    /// dispatch its first advance.
    pub async fn create_job(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<Job, PipelineError> {
        payload::validate(kind, &payload)?;
        let job = self.store.create(CreateJob::new(kind, payload)).await?;

        tracing::info!(job_id = job.id, kind = %kind, status = %job.status, "Job created");
        self.publish(JobEvent::new(bus::JOB_CREATED, job.id, kind).with_status(job.status.clone()));
        self.dispatch_advance(job.id).await?;
        Ok(job)
    }

    pub async fn get_job(&self, id: DbId) -> Result<Job, PipelineError> {
        self.store.get(id).await?.ok_or(PipelineError::NotFound(id))
    }

    /// Run the current stage of `job_id`.
    ///
    /// Job-level failures are recorded on the job and returned as
    /// [`AdvanceOutcome::Failed`]; infrastructure errors propagate so the
    /// invocation is retried.
    pub async fn advance(&self, job_id: DbId) -> Result<AdvanceOutcome, PipelineError> {
        let job = self.get_job(job_id).await?;
        if job.is_terminal() {
            tracing::debug!(job_id, status = %job.status, "Advance on terminal job ignored");
            return Ok(AdvanceOutcome::Skipped { status: job.status });
        }

        match self.run_stage(&job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.fails_job() => {
                let message = e.to_string();
                self.fail_job(&job, &message).await?;
                Ok(AdvanceOutcome::Failed { message })
            }
            Err(e) => Err(e),
        }
    }

    /// Execute one dispatched work item.
    pub async fn handle(&self, item: WorkItem) -> Result<(), PipelineError> {
        match item {
            WorkItem::Advance { job_id } => {
                let outcome = self.advance(job_id).await?;
                tracing::debug!(job_id, ?outcome, "Advance finished");
                Ok(())
            }
            WorkItem::SegmentationWorker { job_id, slot } => {
                mask::run_worker(self, job_id, slot).await
            }
        }
    }

    /// Re-dispatch jobs with no activity for `idle`. Returns how many were
    /// found.
    pub async fn recover_stalled(
        &self,
        idle: Duration,
        limit: usize,
    ) -> Result<usize, PipelineError> {
        let stalled = self.store.find_stalled(idle, limit).await?;
        for job in &stalled {
            tracing::warn!(
                job_id = job.id,
                kind = %job.kind,
                status = %job.status,
                last_activity_at = %job.last_activity_at,
                "Re-dispatching stalled job",
            );
            self.store.touch(job.id).await?;
            self.dispatch_advance(job.id).await?;
        }
        Ok(stalled.len())
    }

    async fn run_stage(&self, job: &Job) -> Result<AdvanceOutcome, PipelineError> {
        match job.job_kind()? {
            JobKind::GarmentFit => garment_fit::advance(self, job).await,
            JobKind::MaskConsensus => mask::advance(self, job).await,
            JobKind::Generation => generation::advance(self, job).await,
        }
    }

    // ---- stage helpers ----

    /// Transition `job` to `to` and hand off the next step.
    ///
    /// Non-terminal targets dispatch another advance of the same job;
    /// terminal ones wake any parent waiting on it.
    pub(crate) async fn progress(
        &self,
        job: &Job,
        to: &str,
        results_patch: serde_json::Value,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let Some(updated) = self.transition(job, to, results_patch).await? else {
            return Ok(AdvanceOutcome::Skipped {
                status: job.status.clone(),
            });
        };
        if updated.is_terminal() {
            self.notify_dependents(&updated).await?;
        } else {
            self.dispatch_advance(updated.id).await?;
        }
        Ok(AdvanceOutcome::Progressed {
            from: job.status.clone(),
            to: to.to_string(),
        })
    }

    /// Compare-and-set transition without any follow-up dispatch.
    pub(crate) async fn transition(
        &self,
        job: &Job,
        to: &str,
        results_patch: serde_json::Value,
    ) -> Result<Option<Job>, PipelineError> {
        let kind = job.job_kind()?;
        let edge = job_status::validate_transition(kind, &job.status, to)?;
        let attempt_delta = if edge == TransitionKind::RetryEdge { 1 } else { 0 };

        let updated = self
            .store
            .transition_if(job.id, &job.status, to, results_patch, attempt_delta)
            .await?;

        match &updated {
            Some(row) => {
                tracing::info!(
                    job_id = job.id,
                    kind = %kind,
                    from = %job.status,
                    to,
                    attempt_count = row.attempt_count,
                    "Job transitioned",
                );
                let event_type = if to == job_status::STATUS_COMPLETE {
                    bus::JOB_COMPLETED
                } else {
                    bus::JOB_TRANSITIONED
                };
                self.publish(
                    JobEvent::new(event_type, job.id, kind)
                        .with_status(to)
                        .with_payload(json!({ "from": job.status })),
                );
            }
            None => tracing::debug!(
                job_id = job.id,
                expected = %job.status,
                to,
                "Transition lost to a concurrent invocation",
            ),
        }
        Ok(updated)
    }

    pub(crate) async fn dispatch_advance(&self, job_id: DbId) -> Result<(), PipelineError> {
        self.dispatcher.dispatch(WorkItem::Advance { job_id }).await
    }

    pub(crate) fn publish(&self, event: JobEvent) {
        self.events.publish(event);
    }

    /// Claim `stage` on `parent`, create the child job and link it through
    /// `ref_key` in the parent's payload. `None` when another invocation
    /// holds the claim.
    pub(crate) async fn spawn_child(
        &self,
        parent: &Job,
        stage: &str,
        ref_key: &str,
        kind: JobKind,
        child_payload: serde_json::Value,
    ) -> Result<Option<DbId>, PipelineError> {
        if !self.store.claim_stage(parent.id, &parent.status, stage).await? {
            tracing::debug!(job_id = parent.id, stage, "Stage already claimed");
            return Ok(None);
        }

        let child = self.store.create(CreateJob::new(kind, child_payload)).await?;
        self.store
            .merge_payload(parent.id, json!({ ref_key: child.id }))
            .await?;

        tracing::info!(
            job_id = parent.id,
            child_job_id = child.id,
            child_kind = %kind,
            "Child job spawned",
        );
        self.publish(
            JobEvent::new(bus::JOB_CREATED, child.id, kind)
                .with_status(child.status.clone())
                .with_payload(json!({ "parent_job_id": parent.id })),
        );
        self.dispatch_advance(child.id).await?;
        Ok(Some(child.id))
    }

    /// Look up a child job. A failed child fails the parent's stage.
    pub(crate) async fn child_state(&self, child_id: DbId) -> Result<ChildState, PipelineError> {
        let child = self.store.get(child_id).await?.ok_or_else(|| {
            PipelineError::Stage(format!("Child job {child_id} no longer exists"))
        })?;
        match child.status.as_str() {
            job_status::STATUS_COMPLETE => Ok(ChildState::Complete(child)),
            job_status::STATUS_FAILED => Err(PipelineError::Stage(format!(
                "{} job {child_id} failed: {}",
                child.kind,
                child.error_message.as_deref().unwrap_or("unknown error")
            ))),
            _ => Ok(ChildState::Pending),
        }
    }

    pub(crate) async fn fetch_image(&self, image_ref: &str) -> Result<DynamicImage, PipelineError> {
        let bytes = self.collaborators.images.fetch(image_ref).await?;
        Ok(raster::decode_image(&bytes)?)
    }

    pub(crate) async fn store_png(&self, image: &DynamicImage) -> Result<String, PipelineError> {
        let bytes = raster::encode_png(image)?;
        Ok(self
            .collaborators
            .images
            .put(bytes, raster::PNG_CONTENT_TYPE)
            .await?)
    }

    async fn fail_job(&self, job: &Job, message: &str) -> Result<(), PipelineError> {
        if !self.store.fail(job.id, message).await? {
            return Ok(());
        }
        tracing::error!(job_id = job.id, kind = %job.kind, status = %job.status, error = message, "Job failed");

        if let Ok(kind) = job.job_kind() {
            self.publish(
                JobEvent::new(bus::JOB_FAILED, job.id, kind)
                    .with_status(job_status::STATUS_FAILED)
                    .with_payload(json!({ "error": message, "failed_in": job.status })),
            );
        }
        self.notify_dependents(job).await
    }

    /// Dispatch an advance for every non-terminal job referencing `job`.
    async fn notify_dependents(&self, job: &Job) -> Result<(), PipelineError> {
        let key = match job.job_kind() {
            Ok(JobKind::MaskConsensus) => MASK_JOB_REF,
            Ok(JobKind::Generation) => GENERATION_JOB_REF,
            _ => return Ok(()),
        };
        for dependent in self.store.find_by_payload_ref(key, job.id).await? {
            if dependent.is_terminal() {
                continue;
            }
            tracing::debug!(job_id = dependent.id, child_job_id = job.id, "Waking parent job");
            self.dispatch_advance(dependent.id).await?;
        }
        Ok(())
    }
}

/// Run blocking raster work off the async runtime.
pub(crate) async fn blocking<T, F>(task: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| PipelineError::Stage(format!("Raster task failed: {e}")))?
}
