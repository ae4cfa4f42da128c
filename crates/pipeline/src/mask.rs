//! Mask consensus jobs.
//!
//! `pending_segmentation` fans out one task per worker slot and parks the
//! job in `awaiting_workers`. Each worker task records its own outcome
//! under `results.worker_results[slot]`; the task that observes every slot
//! settled claims the job for aggregation by moving it to
//! `pending_aggregation`. Only one claimant can win that transition.

use fitline_core::geometry::{ImageDimensions, NormalizedBox};
use fitline_core::job_status::{JobStatus, MaskConsensusStatus};
use fitline_core::mask_consensus::{CandidateMask, VoteAccumulator};
use fitline_core::raster;
use fitline_core::types::DbId;
use fitline_db::models::job::Job;
use fitline_events::{bus, JobEvent};
use image::DynamicImage;
use serde::Deserialize;
use serde_json::json;

use crate::dispatch::WorkItem;
use crate::error::PipelineError;
use crate::orchestrator::{self, AdvanceOutcome, Orchestrator};
use crate::payload::{self, MaskConsensusPayload};

const WORKER_OK: &str = "ok";
const WORKER_FAILED: &str = "failed";

/// A recorded worker outcome.
#[derive(Debug, Deserialize)]
struct SlotOutcome {
    status: String,
    #[serde(default)]
    box_2d: Option<NormalizedBox>,
    #[serde(default)]
    mask_ref: Option<String>,
}

pub(crate) async fn advance(orch: &Orchestrator, job: &Job) -> Result<AdvanceOutcome, PipelineError> {
    match MaskConsensusStatus::parse(&job.status)? {
        MaskConsensusStatus::PendingSegmentation => dispatch_workers(orch, job).await,
        MaskConsensusStatus::AwaitingWorkers => check_workers(orch, job).await,
        MaskConsensusStatus::PendingAggregation => aggregate(orch, job).await,
        MaskConsensusStatus::Complete | MaskConsensusStatus::Failed => {
            Ok(AdvanceOutcome::Skipped {
                status: job.status.clone(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

async fn dispatch_workers(orch: &Orchestrator, job: &Job) -> Result<AdvanceOutcome, PipelineError> {
    payload::parse::<MaskConsensusPayload>(&job.payload)?;
    let worker_count = orch.config.segmentation_fanout;
    let to = MaskConsensusStatus::AwaitingWorkers.as_str();

    let patch = json!({ "worker_count": worker_count, "worker_results": {} });
    let Some(updated) = orch.transition(job, to, patch).await? else {
        return Ok(AdvanceOutcome::Skipped {
            status: job.status.clone(),
        });
    };

    for slot in 0..worker_count {
        orch.dispatcher
            .dispatch(WorkItem::SegmentationWorker {
                job_id: updated.id,
                slot,
            })
            .await?;
    }
    tracing::info!(job_id = job.id, worker_count, "Segmentation workers dispatched");

    Ok(AdvanceOutcome::Progressed {
        from: job.status.clone(),
        to: to.to_string(),
    })
}

/// Advance while workers are out: claim aggregation if everything has
/// settled, otherwise re-dispatch the slots still missing.
async fn check_workers(orch: &Orchestrator, job: &Job) -> Result<AdvanceOutcome, PipelineError> {
    let worker_count = worker_count(job)?;
    if settled_count(job) >= worker_count {
        return claim_aggregation(orch, job).await;
    }

    let missing: Vec<usize> = (0..worker_count).filter(|slot| !is_settled(job, *slot)).collect();
    tracing::info!(job_id = job.id, missing = ?missing, "Re-dispatching unsettled segmentation slots");
    for slot in missing {
        orch.dispatcher
            .dispatch(WorkItem::SegmentationWorker { job_id: job.id, slot })
            .await?;
    }
    Ok(AdvanceOutcome::Suspended {
        status: job.status.clone(),
    })
}

async fn claim_aggregation(orch: &Orchestrator, job: &Job) -> Result<AdvanceOutcome, PipelineError> {
    orch.progress(job, MaskConsensusStatus::PendingAggregation.as_str(), json!({}))
        .await
}

// ---------------------------------------------------------------------------
// Worker slot
// ---------------------------------------------------------------------------

/// Run segmentation slot `slot` of `job_id` and record its outcome.
///
/// A failed segmentation is recorded, not raised: the slot still counts as
/// settled so aggregation is never blocked by one bad worker.
pub(crate) async fn run_worker(
    orch: &Orchestrator,
    job_id: DbId,
    slot: usize,
) -> Result<(), PipelineError> {
    let job = orch.get_job(job_id).await?;
    if job.status != MaskConsensusStatus::AwaitingWorkers.as_str() {
        tracing::debug!(job_id, slot, status = %job.status, "Job not awaiting workers; slot dropped");
        return Ok(());
    }
    if is_settled(&job, slot) {
        tracing::debug!(job_id, slot, "Slot already settled");
        return Ok(());
    }

    let outcome = match segment_slot(orch, &job).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(job_id, worker_index = slot, error = %e, "Segmentation worker failed");
            json!({ "status": WORKER_FAILED, "error": e.to_string() })
        }
    };

    let updated = orch
        .store
        .record_worker_result(job_id, &slot.to_string(), outcome.clone())
        .await?
        .ok_or(PipelineError::NotFound(job_id))?;

    if let Ok(kind) = updated.job_kind() {
        orch.publish(
            JobEvent::new(bus::WORKER_SETTLED, job_id, kind)
                .with_status(updated.status.clone())
                .with_payload(json!({ "slot": slot, "outcome": outcome["status"] })),
        );
    }

    let worker_count = worker_count(&updated)?;
    let settled = settled_count(&updated);
    tracing::debug!(job_id, slot, settled, worker_count, "Segmentation slot settled");

    if settled >= worker_count && updated.status == MaskConsensusStatus::AwaitingWorkers.as_str() {
        claim_aggregation(orch, &updated).await?;
    }
    Ok(())
}

async fn segment_slot(orch: &Orchestrator, job: &Job) -> Result<serde_json::Value, PipelineError> {
    let payload: MaskConsensusPayload = payload::parse(&job.payload)?;
    let result = orch.collaborators.segmenter.segment(&payload.image_ref).await?;
    result.box_2d.validate()?;

    // Workers may answer in any supported format; masks are stored as PNG.
    let bytes = result.mask_bytes()?;
    let mask = raster::decode_image(&bytes)?;
    let mask_ref = orch.store_png(&mask).await?;

    Ok(json!({
        "status": WORKER_OK,
        "box_2d": result.box_2d,
        "mask_ref": mask_ref,
        "label": result.label,
    }))
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

async fn aggregate(orch: &Orchestrator, job: &Job) -> Result<AdvanceOutcome, PipelineError> {
    let complete = MaskConsensusStatus::Complete.as_str();
    if job.result("mask_ref").is_some() {
        return orch.progress(job, complete, json!({})).await;
    }

    let payload: MaskConsensusPayload = payload::parse(&job.payload)?;
    let worker_count = worker_count(job)?;

    let source = orch.fetch_image(&payload.image_ref).await?;
    let dims = ImageDimensions::new(source.width(), source.height());
    drop(source);

    let mut candidates = Vec::with_capacity(worker_count);
    for (slot, outcome) in slot_outcomes(job) {
        let (Some(bbox), Some(mask_ref)) = (outcome.box_2d, outcome.mask_ref) else {
            continue;
        };
        match orch.fetch_image(&mask_ref).await {
            Ok(raster) => candidates.push(CandidateMask {
                worker: format!("segmenter-{slot}"),
                bbox,
                raster,
            }),
            Err(e) => {
                tracing::warn!(job_id = job.id, worker_index = slot, error = %e, "Worker mask unreadable; skipped");
            }
        }
    }

    let params = orch.config.mask_params(worker_count);
    let job_id = job.id;
    let consensus = orchestrator::blocking(move || {
        let mut votes = VoteAccumulator::new(dims)?;
        for candidate in &candidates {
            if let Err(e) = votes.add(candidate) {
                tracing::warn!(job_id, worker = %candidate.worker, error = %e, "Worker mask rejected");
            }
        }
        Ok(votes.finalize(&params)?)
    })
    .await?;

    tracing::info!(
        job_id,
        contributors = consensus.contributors,
        worker_count,
        threshold = consensus.threshold,
        covered_pixels = consensus.covered_pixels,
        "Mask consensus aggregated",
    );

    let mask_ref = orch
        .store_png(&DynamicImage::ImageLuma8(consensus.mask))
        .await?;
    orch.progress(
        job,
        complete,
        json!({
            "mask_ref": mask_ref,
            "mask_votes": {
                "threshold": consensus.threshold,
                "contributors": consensus.contributors,
                "worker_count": worker_count,
                "covered_pixels": consensus.covered_pixels,
            },
        }),
    )
    .await
}

// ---- helpers ----

fn worker_count(job: &Job) -> Result<usize, PipelineError> {
    job.result("worker_count")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .ok_or_else(|| PipelineError::Stage(format!("Job {} has no worker_count", job.id)))
}

fn worker_results(job: &Job) -> Option<&serde_json::Map<String, serde_json::Value>> {
    job.result("worker_results").and_then(|v| v.as_object())
}

fn is_settled(job: &Job, slot: usize) -> bool {
    worker_results(job).is_some_and(|m| m.contains_key(&slot.to_string()))
}

fn settled_count(job: &Job) -> usize {
    worker_results(job).map_or(0, |m| m.len())
}

/// Successful slot outcomes in slot order.
fn slot_outcomes(job: &Job) -> Vec<(usize, SlotOutcome)> {
    let Some(results) = worker_results(job) else {
        return Vec::new();
    };
    let mut outcomes: Vec<(usize, SlotOutcome)> = results
        .iter()
        .filter_map(|(slot, value)| {
            let slot = slot.parse::<usize>().ok()?;
            let outcome: SlotOutcome = serde_json::from_value(value.clone()).ok()?;
            (outcome.status == WORKER_OK).then_some((slot, outcome))
        })
        .collect();
    outcomes.sort_by_key(|(slot, _)| *slot);
    outcomes
}
