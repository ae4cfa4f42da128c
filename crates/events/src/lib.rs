//! Fitline job lifecycle events.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: the event envelope emitted on every job transition.
//! - [`EventLogger`]: background subscriber that writes events to the log.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, JobEvent};
pub use logger::EventLogger;
