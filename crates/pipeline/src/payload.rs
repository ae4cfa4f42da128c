//! Typed views of job payloads.
//!
//! Payloads are stored as free-form JSON so related jobs can be discovered
//! by key; these structs are the shapes each kind must carry. Unknown keys
//! are ignored.

use fitline_core::bbox_consensus::CropPolicy;
use fitline_core::job_status::JobKind;
use fitline_core::types::DbId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Payload key linking a garment-fit job to its mask consensus job.
pub const MASK_JOB_REF: &str = "mask_job_id";
/// Payload key linking a garment-fit job to its generation job.
pub const GENERATION_JOB_REF: &str = "generation_job_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GarmentFitPayload {
    /// Photo of the person wearing the target region.
    pub person_ref: String,
    /// Product image of the garment to apply.
    pub garment_ref: String,
    #[serde(default)]
    pub crop_policy: Option<CropPolicy>,
    /// Caller-supplied mask (e.g. hand-painted); skips segmentation.
    #[serde(default)]
    pub mask_ref: Option<String>,
    /// Extra context forwarded to the prompt writer.
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub mask_job_id: Option<DbId>,
    #[serde(default)]
    pub generation_job_id: Option<DbId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskConsensusPayload {
    pub image_ref: String,
    #[serde(default)]
    pub parent_job_id: Option<DbId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPayload {
    /// Image the evaluator compares candidates against.
    pub reference_ref: String,
    /// Opaque context handed to the engine.
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub parent_job_id: Option<DbId>,
}

/// Deserialize `payload` into `T`, reporting shape errors as input errors.
pub fn parse<T: DeserializeOwned>(payload: &serde_json::Value) -> Result<T, PipelineError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| PipelineError::Input(format!("Malformed job payload: {e}")))
}

fn require_non_blank(field: &str, value: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::Input(format!("{field} must not be blank")));
    }
    Ok(())
}

/// Check that `payload` has the shape `kind` requires.
pub fn validate(kind: JobKind, payload: &serde_json::Value) -> Result<(), PipelineError> {
    if !payload.is_object() {
        return Err(PipelineError::Input("Job payload must be a JSON object".to_string()));
    }
    match kind {
        JobKind::GarmentFit => {
            let p: GarmentFitPayload = parse(payload)?;
            require_non_blank("person_ref", &p.person_ref)?;
            require_non_blank("garment_ref", &p.garment_ref)?;
            if let Some(policy) = p.crop_policy {
                policy
                    .validate()
                    .map_err(|e| PipelineError::Input(e.to_string()))?;
            }
            if let Some(mask_ref) = &p.mask_ref {
                require_non_blank("mask_ref", mask_ref)?;
            }
        }
        JobKind::MaskConsensus => {
            let p: MaskConsensusPayload = parse(payload)?;
            require_non_blank("image_ref", &p.image_ref)?;
        }
        JobKind::Generation => {
            let p: GenerationPayload = parse(payload)?;
            require_non_blank("reference_ref", &p.reference_ref)?;
        }
    }
    Ok(())
}
