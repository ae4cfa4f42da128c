//! Parallel detection fan-out for the crop stage.

use fitline_core::bbox_consensus::{self, CandidateBox, ConsensusBox};
use fitline_core::types::DbId;
use futures::future::join_all;

use crate::error::PipelineError;
use crate::orchestrator::Orchestrator;

/// Run the configured number of detectors against `image_ref` and reduce
/// the successful results to one box.
///
/// Individual detector failures are logged and dropped. The stage fails
/// only when no detector succeeds.
pub(crate) async fn detect_consensus(
    orch: &Orchestrator,
    job_id: DbId,
    image_ref: &str,
) -> Result<ConsensusBox, PipelineError> {
    let fanout = orch.config.detection_fanout;
    let detector = &orch.collaborators.detector;

    let calls = (0..fanout).map(|worker_index| async move {
        (worker_index, detector.detect(image_ref).await)
    });
    let settled = join_all(calls).await;

    let mut candidates = Vec::with_capacity(fanout);
    for (worker_index, result) in settled {
        match result {
            Ok(detection) => {
                if let Err(e) = detection.normalized_box.validate() {
                    tracing::warn!(job_id, worker_index, error = %e, "Detector returned an invalid box");
                    continue;
                }
                candidates.push(CandidateBox {
                    detector: format!("detector-{worker_index}"),
                    bbox: detection.normalized_box,
                    dimensions: detection.original_dimensions,
                });
            }
            Err(e) => {
                tracing::warn!(job_id, worker_index, error = %e, "Detector failed");
            }
        }
    }

    if candidates.is_empty() {
        return Err(PipelineError::Stage(format!(
            "All {fanout} detectors failed for {image_ref}"
        )));
    }

    if let Some((first, rest)) = candidates.split_first() {
        for other in rest.iter().filter(|c| c.dimensions != first.dimensions) {
            tracing::warn!(
                job_id,
                detector = %other.detector,
                expected = ?first.dimensions,
                reported = ?other.dimensions,
                "Detectors disagree on source resolution",
            );
        }
    }

    let consensus = bbox_consensus::aggregate(&candidates)?;
    tracing::info!(
        job_id,
        detectors = consensus.sample_count,
        of = fanout,
        bbox = ?consensus.bbox,
        "Bounding-box consensus reached",
    );
    Ok(consensus)
}
