use fitline_core::error::CoreError;
use fitline_core::types::DbId;
use fitline_inference::InferenceError;

/// Errors raised while advancing a job.
///
/// `Input` and `Stage` are job-level failures: the orchestrator records them
/// on the job and reports success to the caller. `Store`, `Dispatch` and
/// `NotFound` are infrastructure errors and propagate so the task is
/// redelivered.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Stage failed: {0}")]
    Stage(String),

    #[error("Job {0} not found")]
    NotFound(DbId),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),
}

impl PipelineError {
    /// Whether this error should mark the job as failed.
    pub fn fails_job(&self) -> bool {
        matches!(self, PipelineError::Input(_) | PipelineError::Stage(_))
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { id, .. } => PipelineError::NotFound(id),
            other => PipelineError::Stage(other.to_string()),
        }
    }
}

impl From<InferenceError> for PipelineError {
    fn from(err: InferenceError) -> Self {
        PipelineError::Stage(err.to_string())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_job_level_errors_fail_the_job() {
        assert!(PipelineError::Input("x".into()).fails_job());
        assert!(PipelineError::Stage("x".into()).fails_job());
        assert!(!PipelineError::Store("x".into()).fails_job());
        assert!(!PipelineError::Dispatch("x".into()).fails_job());
        assert!(!PipelineError::NotFound(1).fails_job());
    }

    #[test]
    fn core_validation_becomes_stage_failure() {
        let err: PipelineError = CoreError::Validation("bad box".into()).into();
        assert!(matches!(err, PipelineError::Stage(ref m) if m.contains("bad box")));
    }
}
