//! Quality-gated generation with tier escalation.
//!
//! Each attempt generates a batch on the ladder's current tier and parks
//! it in `results.batch`; the quality check judges that batch and either
//! completes the job or takes the retry back-edge with an updated ladder.

use fitline_core::job_status::{GenerationStatus, JobStatus};
use fitline_core::quality_gate::{self, GateFlags, QualityAction, QualityVerdict};
use fitline_core::retry_policy::{LadderState, RetryStep};
use fitline_db::models::job::Job;
use fitline_events::{bus, JobEvent};
use fitline_inference::types::GenerationCandidate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::PipelineError;
use crate::orchestrator::{AdvanceOutcome, Orchestrator};
use crate::payload::{self, GenerationPayload};

/// Candidates produced by one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Batch {
    attempt: u32,
    tier: String,
    candidates: Vec<GenerationCandidate>,
}

pub(crate) async fn advance(orch: &Orchestrator, job: &Job) -> Result<AdvanceOutcome, PipelineError> {
    let payload: GenerationPayload = payload::parse(&job.payload)?;
    match GenerationStatus::parse(&job.status)? {
        GenerationStatus::PendingGeneration => generate(orch, job, &payload).await,
        GenerationStatus::PendingQualityCheck => quality_check(orch, job, &payload).await,
        GenerationStatus::Complete | GenerationStatus::Failed => Ok(AdvanceOutcome::Skipped {
            status: job.status.clone(),
        }),
    }
}

async fn generate(
    orch: &Orchestrator,
    job: &Job,
    payload: &GenerationPayload,
) -> Result<AdvanceOutcome, PipelineError> {
    let to = GenerationStatus::PendingQualityCheck.as_str();
    let ladder = ladder_state(orch, job)?;

    if batch(job)?.is_some_and(|b| b.attempt == ladder.attempt_count) {
        return orch.progress(job, to, json!({})).await;
    }

    let policy = &orch.config.retry;
    let tier = policy.current_tier(&ladder).to_string();
    let count = orch.config.candidates_per_attempt;

    let candidates = orch
        .collaborators
        .engine
        .generate(&payload.context, count, &tier)
        .await?;
    if candidates.is_empty() {
        return Err(PipelineError::Stage(format!(
            "Engine tier '{tier}' returned no candidates"
        )));
    }

    tracing::info!(
        job_id = job.id,
        attempt = ladder.attempt_count,
        tier = %tier,
        candidates = candidates.len(),
        "Generation attempt produced candidates",
    );

    let batch = Batch {
        attempt: ladder.attempt_count,
        tier,
        candidates,
    };
    orch.progress(job, to, json!({ "ladder": ladder, "batch": batch }))
        .await
}

async fn quality_check(
    orch: &Orchestrator,
    job: &Job,
    payload: &GenerationPayload,
) -> Result<AdvanceOutcome, PipelineError> {
    let policy = &orch.config.retry;
    let ladder = ladder_state(orch, job)?;
    let batch = batch(job)?.ok_or_else(|| {
        PipelineError::Stage(format!("Job {} reached quality check without a batch", job.id))
    })?;

    let flags = policy.gate_flags(&ladder);
    let refs: Vec<String> = batch.candidates.iter().map(|c| c.image_ref.clone()).collect();
    let verdict = judge(orch, job, &payload.reference_ref, &refs, flags).await;

    let mut history = job
        .result("verdicts")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    history.push(json!({
        "attempt": batch.attempt,
        "tier": batch.tier,
        "verdict": verdict,
    }));

    match verdict.action {
        QualityAction::Select => {
            let chosen = batch
                .candidates
                .get(verdict.chosen_index)
                .or_else(|| batch.candidates.first())
                .ok_or_else(|| PipelineError::Stage("Batch has no candidates".to_string()))?;
            tracing::info!(
                job_id = job.id,
                attempt = batch.attempt,
                tier = %chosen.tier,
                chosen_index = verdict.chosen_index,
                "Candidate selected",
            );
            orch.progress(
                job,
                GenerationStatus::Complete.as_str(),
                json!({
                    "selected_ref": chosen.image_ref,
                    "selected_tier": chosen.tier,
                    "selected_index": verdict.chosen_index,
                    "verdict": verdict,
                    "verdicts": history,
                }),
            )
            .await
        }
        QualityAction::Retry => retry(orch, job, &ladder, history, &verdict).await,
    }
}

async fn retry(
    orch: &Orchestrator,
    job: &Job,
    ladder: &LadderState,
    history: Vec<serde_json::Value>,
    verdict: &QualityVerdict,
) -> Result<AdvanceOutcome, PipelineError> {
    let to = GenerationStatus::PendingGeneration.as_str();
    let (next, event) = match orch.config.retry.record_retry(ladder) {
        RetryStep::SameTier(next) => {
            tracing::info!(
                job_id = job.id,
                attempt = next.attempt_count,
                reason = %verdict.reasoning,
                "Retrying on the same tier",
            );
            (next, json!({ "attempt": next.attempt_count }))
        }
        RetryStep::Escalated { from, to: tier, state } => {
            tracing::info!(
                job_id = job.id,
                attempt = state.attempt_count,
                from = %from,
                to = %tier,
                "Escalating to a higher engine tier",
            );
            (
                state,
                json!({ "attempt": state.attempt_count, "from_tier": from, "to_tier": tier }),
            )
        }
        RetryStep::Exhausted => {
            return Err(PipelineError::Stage(format!(
                "Retry ladder exhausted after {} attempts",
                ladder.attempt_count + 1
            )));
        }
    };
    let escalated = next.tier_index != ladder.tier_index;

    let outcome = orch
        .progress(job, to, json!({ "ladder": next, "verdicts": history }))
        .await?;
    if matches!(outcome, AdvanceOutcome::Progressed { .. }) {
        let event_type = if escalated { bus::JOB_ESCALATED } else { bus::JOB_RETRIED };
        if let Ok(kind) = job.job_kind() {
            orch.publish(
                JobEvent::new(event_type, job.id, kind)
                    .with_status(to)
                    .with_payload(event),
            );
        }
    }
    Ok(outcome)
}

/// Ask the evaluator for a verdict. Evaluator errors and unusable output
/// become the fallback verdict, never a job failure.
async fn judge(
    orch: &Orchestrator,
    job: &Job,
    reference_ref: &str,
    candidate_refs: &[String],
    flags: GateFlags,
) -> QualityVerdict {
    let raw = match orch
        .collaborators
        .evaluator
        .evaluate(reference_ref, candidate_refs, flags)
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(job_id = job.id, error = %e, "Evaluator call failed; using fallback verdict");
            return quality_gate::fallback_verdict(flags, &e.to_string());
        }
    };

    match quality_gate::parse_report(&raw)
        .and_then(|report| quality_gate::decide(report, flags, candidate_refs.len()))
    {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::warn!(job_id = job.id, error = %e, "Evaluator output unusable; using fallback verdict");
            quality_gate::fallback_verdict(flags, &e.to_string())
        }
    }
}

// ---- helpers ----

fn ladder_state(orch: &Orchestrator, job: &Job) -> Result<LadderState, PipelineError> {
    match job.result("ladder") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| PipelineError::Stage(format!("Corrupt ladder state: {e}"))),
        None => Ok(orch.config.retry.initial_state()),
    }
}

fn batch(job: &Job) -> Result<Option<Batch>, PipelineError> {
    job.result("batch")
        .map(|value| {
            serde_json::from_value(value.clone())
                .map_err(|e| PipelineError::Stage(format!("Corrupt candidate batch: {e}")))
        })
        .transpose()
}
