use std::time::Duration;

use fitline_core::env_config;
use fitline_core::error::CoreError;

/// Base URLs of the collaborator services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceEndpoints {
    pub detection_url: String,
    pub segmentation_url: String,
    pub prompt_writer_url: String,
    pub generation_url: String,
    pub evaluator_url: String,
    pub image_store_url: String,
    /// Upper bound on any single collaborator request.
    pub timeout_secs: u64,
}

impl Default for InferenceEndpoints {
    fn default() -> Self {
        Self {
            detection_url: "http://localhost:8301".into(),
            segmentation_url: "http://localhost:8302".into(),
            prompt_writer_url: "http://localhost:8303".into(),
            generation_url: "http://localhost:8304".into(),
            evaluator_url: "http://localhost:8305".into(),
            image_store_url: "http://localhost:8306".into(),
            timeout_secs: 120,
        }
    }
}

impl InferenceEndpoints {
    /// Load endpoints from environment variables with defaults.
    ///
    /// | Env Var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `DETECTION_URL`          | `http://localhost:8301` |
    /// | `SEGMENTATION_URL`       | `http://localhost:8302` |
    /// | `PROMPT_WRITER_URL`      | `http://localhost:8303` |
    /// | `GENERATION_URL`         | `http://localhost:8304` |
    /// | `EVALUATOR_URL`          | `http://localhost:8305` |
    /// | `IMAGE_STORE_URL`        | `http://localhost:8306` |
    /// | `INFERENCE_TIMEOUT_SECS` | `120`                   |
    pub fn from_env() -> Result<Self, CoreError> {
        let d = Self::default();
        let url = |name: &str, default: String| {
            env_config::optional(name)
                .unwrap_or(default)
                .trim_end_matches('/')
                .to_string()
        };
        let timeout_secs = env_config::var_or("INFERENCE_TIMEOUT_SECS", d.timeout_secs)?;
        if timeout_secs == 0 {
            return Err(CoreError::Validation(
                "INFERENCE_TIMEOUT_SECS must be positive".to_string(),
            ));
        }
        Ok(Self {
            detection_url: url("DETECTION_URL", d.detection_url),
            segmentation_url: url("SEGMENTATION_URL", d.segmentation_url),
            prompt_writer_url: url("PROMPT_WRITER_URL", d.prompt_writer_url),
            generation_url: url("GENERATION_URL", d.generation_url),
            evaluator_url: url("EVALUATOR_URL", d.evaluator_url),
            image_store_url: url("IMAGE_STORE_URL", d.image_store_url),
            timeout_secs,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
