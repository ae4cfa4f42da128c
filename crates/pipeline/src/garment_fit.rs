//! End-to-end garment-fit jobs.
//!
//! Stages run in a fixed order and each stores its artifact in `results`
//! before moving on. Segmentation and try-on delegate to child jobs; the
//! parent parks until the child's completion wakes it.

use fitline_core::bbox_consensus::{self, CropMode, CropPolicy};
use fitline_core::compositing;
use fitline_core::geometry::{ImageDimensions, NormalizedBox};
use fitline_core::job_status::{GarmentFitStatus, JobKind, JobStatus};
use fitline_db::models::job::Job;
use image::DynamicImage;
use serde_json::json;

use crate::bbox;
use crate::error::PipelineError;
use crate::orchestrator::{self, AdvanceOutcome, ChildState, Orchestrator};
use crate::payload::{self, GarmentFitPayload, GENERATION_JOB_REF, MASK_JOB_REF};

const STAGE_SPAWN_MASK: &str = "spawn_mask_consensus";
const STAGE_SPAWN_GENERATION: &str = "spawn_generation";
const STAGE_COMPOSITE: &str = "composite";

pub(crate) async fn advance(orch: &Orchestrator, job: &Job) -> Result<AdvanceOutcome, PipelineError> {
    let payload: GarmentFitPayload = payload::parse(&job.payload)?;
    match GarmentFitStatus::parse(&job.status)? {
        GarmentFitStatus::PendingSegmentation => segmentation(orch, job, &payload).await,
        GarmentFitStatus::PendingCrop => crop(orch, job, &payload).await,
        GarmentFitStatus::PendingPromptGeneration => prompt(orch, job, &payload).await,
        GarmentFitStatus::PendingTryon => tryon(orch, job, &payload).await,
        GarmentFitStatus::PendingComposite => composite(orch, job, &payload).await,
        GarmentFitStatus::Complete | GarmentFitStatus::Failed => Ok(AdvanceOutcome::Skipped {
            status: job.status.clone(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

async fn segmentation(
    orch: &Orchestrator,
    job: &Job,
    payload: &GarmentFitPayload,
) -> Result<AdvanceOutcome, PipelineError> {
    let next = GarmentFitStatus::PendingCrop.as_str();
    if job.result("mask_ref").is_some() {
        return orch.progress(job, next, json!({})).await;
    }
    if let Some(mask_ref) = &payload.mask_ref {
        tracing::info!(job_id = job.id, "Using caller-supplied mask");
        return orch
            .progress(job, next, json!({ "mask_ref": mask_ref, "mask_source": "supplied" }))
            .await;
    }

    match payload.mask_job_id {
        Some(child_id) => match orch.child_state(child_id).await? {
            ChildState::Complete(child) => {
                let mask_ref = child.result_str("mask_ref").ok_or_else(|| {
                    PipelineError::Stage(format!("Mask consensus job {child_id} completed without a mask"))
                })?;
                orch.progress(
                    job,
                    next,
                    json!({
                        "mask_ref": mask_ref,
                        "mask_source": "consensus",
                        "mask_votes": child.result("mask_votes"),
                    }),
                )
                .await
            }
            ChildState::Pending => Ok(suspended(job)),
        },
        None => {
            let child_payload = json!({
                "image_ref": payload.person_ref,
                "parent_job_id": job.id,
            });
            let spawned = orch
                .spawn_child(job, STAGE_SPAWN_MASK, MASK_JOB_REF, JobKind::MaskConsensus, child_payload)
                .await?;
            Ok(spawned.map_or_else(|| skipped(job), |_| suspended(job)))
        }
    }
}

async fn crop(
    orch: &Orchestrator,
    job: &Job,
    payload: &GarmentFitPayload,
) -> Result<AdvanceOutcome, PipelineError> {
    let next = GarmentFitStatus::PendingPromptGeneration.as_str();
    if job.result("crop_box").is_some() {
        return orch.progress(job, next, json!({})).await;
    }

    let consensus = bbox::detect_consensus(orch, job.id, &payload.person_ref).await?;
    let policy = payload.crop_policy.unwrap_or(CropPolicy {
        mode: CropMode::Expand,
        expansion_percent: orch.config.crop_expansion_percent,
    });
    let region = bbox_consensus::crop_region(&consensus, &policy)?;
    let rect = region.to_pixels(consensus.dimensions);

    tracing::info!(
        job_id = job.id,
        mode = ?policy.mode,
        expansion_percent = policy.expansion_percent,
        rect = ?rect,
        "Crop region computed",
    );
    orch.progress(
        job,
        next,
        json!({
            "subject_box": consensus.bbox,
            "crop_box": region,
            "crop_rect": rect,
            "image_dimensions": consensus.dimensions,
            "detector_count": consensus.sample_count,
        }),
    )
    .await
}

async fn prompt(
    orch: &Orchestrator,
    job: &Job,
    payload: &GarmentFitPayload,
) -> Result<AdvanceOutcome, PipelineError> {
    let next = GarmentFitStatus::PendingTryon.as_str();
    if job.result("prompt").is_some() {
        return orch.progress(job, next, json!({})).await;
    }

    let context = json!({
        "person_ref": payload.person_ref,
        "garment_ref": payload.garment_ref,
        "crop_box": job.result("crop_box"),
        "mask_ref": job.result("mask_ref"),
        "extra": payload.context,
    });
    let instruction = orch.collaborators.prompt_writer.write_prompt(&context).await?;
    if instruction.trim().is_empty() {
        return Err(PipelineError::Stage("Prompt writer returned an empty prompt".to_string()));
    }
    orch.progress(job, next, json!({ "prompt": instruction })).await
}

async fn tryon(
    orch: &Orchestrator,
    job: &Job,
    payload: &GarmentFitPayload,
) -> Result<AdvanceOutcome, PipelineError> {
    let next = GarmentFitStatus::PendingComposite.as_str();
    if job.result("selected_ref").is_some() {
        return orch.progress(job, next, json!({})).await;
    }

    match payload.generation_job_id {
        Some(child_id) => match orch.child_state(child_id).await? {
            ChildState::Complete(child) => {
                let selected_ref = child.result_str("selected_ref").ok_or_else(|| {
                    PipelineError::Stage(format!("Generation job {child_id} completed without a selection"))
                })?;
                orch.progress(
                    job,
                    next,
                    json!({
                        "selected_ref": selected_ref,
                        "selected_tier": child.result("selected_tier"),
                        "generation_attempts": child.attempt_count + 1,
                    }),
                )
                .await
            }
            ChildState::Pending => Ok(suspended(job)),
        },
        None => {
            let prompt = job
                .result_str("prompt")
                .ok_or_else(|| PipelineError::Stage("Try-on reached without a prompt".to_string()))?;
            let child_payload = json!({
                "reference_ref": payload.garment_ref,
                "parent_job_id": job.id,
                "context": {
                    "prompt": prompt,
                    "person_ref": payload.person_ref,
                    "garment_ref": payload.garment_ref,
                    "mask_ref": job.result("mask_ref"),
                    "crop_box": job.result("crop_box"),
                },
            });
            let spawned = orch
                .spawn_child(job, STAGE_SPAWN_GENERATION, GENERATION_JOB_REF, JobKind::Generation, child_payload)
                .await?;
            Ok(spawned.map_or_else(|| skipped(job), |_| suspended(job)))
        }
    }
}

async fn composite(
    orch: &Orchestrator,
    job: &Job,
    payload: &GarmentFitPayload,
) -> Result<AdvanceOutcome, PipelineError> {
    let complete = GarmentFitStatus::Complete.as_str();
    if job.result("final_ref").is_some() {
        return orch.progress(job, complete, json!({})).await;
    }
    if !orch.store.claim_stage(job.id, &job.status, STAGE_COMPOSITE).await? {
        tracing::debug!(job_id = job.id, "Composite already claimed");
        return Ok(skipped(job));
    }

    let mask_ref = required_str(job, "mask_ref")?;
    let selected_ref = required_str(job, "selected_ref")?;
    let crop_box: NormalizedBox = job
        .result("crop_box")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| PipelineError::Stage(format!("Corrupt crop box: {e}")))?
        .ok_or_else(|| PipelineError::Stage("Composite reached without a crop box".to_string()))?;

    let base = orch.fetch_image(&payload.person_ref).await?;
    let patch = orch.fetch_image(selected_ref).await?;
    let mask = orch.fetch_image(mask_ref).await?;

    let composed = orchestrator::blocking(move || {
        let base = base.to_rgba8();
        let dims = ImageDimensions::new(base.width(), base.height());
        let region = crop_box.to_pixels(dims);
        let out = compositing::composite(&base, &patch.to_rgba8(), region, &mask.to_luma8())?;
        Ok(DynamicImage::ImageRgba8(out))
    })
    .await?;

    let final_ref = orch.store_png(&composed).await?;
    tracing::info!(job_id = job.id, final_ref = %final_ref, "Composite stored");
    orch.progress(job, complete, json!({ "final_ref": final_ref })).await
}

// ---- helpers ----

fn required_str<'a>(job: &'a Job, key: &str) -> Result<&'a str, PipelineError> {
    job.result_str(key).ok_or_else(|| {
        PipelineError::Stage(format!("{} reached without {key}", job.status))
    })
}

fn suspended(job: &Job) -> AdvanceOutcome {
    AdvanceOutcome::Suspended {
        status: job.status.clone(),
    }
}

fn skipped(job: &Job) -> AdvanceOutcome {
    AdvanceOutcome::Skipped {
        status: job.status.clone(),
    }
}
