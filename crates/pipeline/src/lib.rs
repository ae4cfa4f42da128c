//! Fitline job orchestration.
//!
//! [`Orchestrator`] drives three job kinds through their status graphs:
//! garment-fit jobs (segment, crop, prompt, try-on, composite), mask
//! consensus jobs (segmentation fan-out with pixel voting) and generation
//! jobs (quality-gated attempts with tier escalation). Stage work is handed
//! between invocations through a [`Dispatcher`] and persisted through a
//! [`JobStore`], so any number of processes can advance jobs concurrently.

mod bbox;
pub mod config;
pub mod dispatch;
pub mod error;
mod garment_fit;
mod generation;
mod mask;
pub mod orchestrator;
pub mod payload;
pub mod store;

pub use config::PipelineConfig;
pub use dispatch::{ChannelDispatcher, Dispatcher, QueueDispatcher, WorkItem};
pub use error::PipelineError;
pub use orchestrator::{AdvanceOutcome, Collaborators, Orchestrator};
pub use store::{JobStore, MemoryJobStore, PgJobStore};
