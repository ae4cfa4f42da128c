//! Request and response shapes exchanged with collaborators.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fitline_core::geometry::{ImageDimensions, NormalizedBox};
use fitline_core::quality_gate::GateFlags;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// One detector's answer: the subject's box and the resolution it saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub normalized_box: NormalizedBox,
    pub original_dimensions: ImageDimensions,
}

/// One segmenter's answer: a local raster and the box it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub box_2d: NormalizedBox,
    /// Base64-encoded PNG, optionally as a `data:` URL.
    pub mask: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl SegmentationResult {
    /// Decode the inline raster to encoded image bytes.
    pub fn mask_bytes(&self) -> Result<Vec<u8>, InferenceError> {
        let encoded = match self.mask.split_once(";base64,") {
            Some((_, data)) => data,
            None => self.mask.as_str(),
        };
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| InferenceError::Decode(format!("segmentation mask: {e}")))
    }
}

/// One produced image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationCandidate {
    /// Position within the batch.
    pub index: usize,
    pub image_ref: String,
    pub tier: String,
}

/// Input to a quality evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRequest<'a> {
    pub reference_ref: &'a str,
    pub candidate_refs: Vec<&'a str>,
    #[serde(flatten)]
    pub flags: GateFlags,
}
