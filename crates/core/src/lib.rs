//! Fitline domain logic.
//!
//! Synchronous building blocks for the try-on pipeline: box and mask
//! consensus, compositing, the quality gate, the retry ladder and the job
//! status graphs. Nothing here touches the network or the database; the
//! `fitline-pipeline` crate wires it to storage and inference.

pub mod bbox_consensus;
pub mod compositing;
pub mod env_config;
pub mod error;
pub mod geometry;
pub mod hashing;
pub mod job_status;
pub mod mask_consensus;
pub mod quality_gate;
pub mod raster;
pub mod retry_policy;
pub mod robust_stats;
pub mod types;
