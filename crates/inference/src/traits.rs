//! Collaborator traits.
//!
//! Implementations must be cheap to share (`Send + Sync`, usually behind an
//! `Arc`) and must not retry internally: the pipeline decides how failures
//! are tolerated.

use async_trait::async_trait;
use fitline_core::quality_gate::GateFlags;

use crate::error::InferenceError;
use crate::types::{DetectionResult, GenerationCandidate, SegmentationResult};

/// Locates the subject in an image.
#[async_trait]
pub trait DetectionWorker: Send + Sync {
    async fn detect(&self, image_ref: &str) -> Result<DetectionResult, InferenceError>;
}

/// Segments the garment region of an image.
#[async_trait]
pub trait SegmentationWorker: Send + Sync {
    async fn segment(&self, image_ref: &str) -> Result<SegmentationResult, InferenceError>;
}

/// Turns job context into a generation instruction.
#[async_trait]
pub trait PromptWriter: Send + Sync {
    async fn write_prompt(&self, context: &serde_json::Value) -> Result<String, InferenceError>;
}

/// Produces `count` candidate images on an engine tier.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(
        &self,
        context: &serde_json::Value,
        count: usize,
        tier: &str,
    ) -> Result<Vec<GenerationCandidate>, InferenceError>;
}

/// Judges candidates against a reference. Returns the evaluator's raw text;
/// parsing and the gate rules live in `fitline_core::quality_gate`.
#[async_trait]
pub trait QualityEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        reference_ref: &str,
        candidate_refs: &[String],
        flags: GateFlags,
    ) -> Result<String, InferenceError>;
}

/// Blob storage for input and produced images.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn fetch(&self, image_ref: &str) -> Result<Vec<u8>, InferenceError>;
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, InferenceError>;
}
