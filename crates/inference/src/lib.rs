//! Collaborator contracts for the try-on pipeline.
//!
//! Every external model the pipeline talks to sits behind an async trait so
//! the orchestrator can be driven by HTTP services in production and by
//! deterministic fakes in tests:
//!
//! - [`DetectionWorker`] and [`SegmentationWorker`] for the consensus fan-outs.
//! - [`PromptWriter`], [`GenerationEngine`] and [`QualityEvaluator`] for the
//!   generation ladder.
//! - [`ImageStore`] for reading inputs and persisting produced rasters.

pub mod config;
pub mod error;
pub mod http;
pub mod store;
pub mod traits;
pub mod types;

pub use config::InferenceEndpoints;
pub use error::InferenceError;
pub use http::HttpInferenceClient;
pub use store::{HttpImageStore, MemoryImageStore};
pub use traits::{
    DetectionWorker, GenerationEngine, ImageStore, PromptWriter, QualityEvaluator,
    SegmentationWorker,
};
