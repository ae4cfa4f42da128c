//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods
//! that accept `&PgPool` as the first argument.

pub mod job_repo;
pub mod task_repo;

pub use job_repo::JobRepo;
pub use task_repo::TaskRepo;
