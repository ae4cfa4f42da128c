use fitline_core::bbox_consensus::{self, DEFAULT_DETECTOR_FANOUT, DEFAULT_EXPANSION_PERCENT};
use fitline_core::env_config;
use fitline_core::error::CoreError;
use fitline_core::mask_consensus::{
    MaskConsensusParams, DEFAULT_FEATHER_PERCENT, DEFAULT_SEGMENTATION_FANOUT,
    DEFAULT_VOTE_DIVISOR,
};
use fitline_core::retry_policy::{
    RetryPolicy, DEFAULT_CANDIDATES_PER_ATTEMPT, DEFAULT_ENGINE_TIERS,
    DEFAULT_ESCALATION_THRESHOLD, DEFAULT_MAX_ATTEMPTS,
};

/// Tunables for every pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Parallel detectors per crop stage.
    pub detection_fanout: usize,
    /// Segmentation worker tasks per mask consensus job.
    pub segmentation_fanout: usize,
    pub vote_divisor: f64,
    pub feather_percent: f64,
    /// Default crop padding when the job does not specify one.
    pub crop_expansion_percent: f64,
    /// Candidates generated per attempt.
    pub candidates_per_attempt: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detection_fanout: DEFAULT_DETECTOR_FANOUT,
            segmentation_fanout: DEFAULT_SEGMENTATION_FANOUT,
            vote_divisor: DEFAULT_VOTE_DIVISOR,
            feather_percent: DEFAULT_FEATHER_PERCENT,
            crop_expansion_percent: DEFAULT_EXPANSION_PERCENT,
            candidates_per_attempt: DEFAULT_CANDIDATES_PER_ATTEMPT,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default          |
    /// |--------------------------|------------------|
    /// | `DETECTION_FANOUT`       | `5`              |
    /// | `SEGMENTATION_FANOUT`    | `5`              |
    /// | `MASK_VOTE_DIVISOR`      | `2.5`            |
    /// | `MASK_FEATHER_PERCENT`   | `3.0`            |
    /// | `CROP_EXPANSION_PERCENT` | `10.0`           |
    /// | `CANDIDATES_PER_ATTEMPT` | `2`              |
    /// | `ESCALATION_THRESHOLD`   | `2`              |
    /// | `MAX_ATTEMPTS`           | `4`              |
    /// | `ENGINE_TIERS`           | `standard,pro`   |
    pub fn from_env() -> Result<Self, CoreError> {
        let config = Self {
            detection_fanout: env_config::var_or("DETECTION_FANOUT", DEFAULT_DETECTOR_FANOUT)?,
            segmentation_fanout: env_config::var_or(
                "SEGMENTATION_FANOUT",
                DEFAULT_SEGMENTATION_FANOUT,
            )?,
            vote_divisor: env_config::var_or("MASK_VOTE_DIVISOR", DEFAULT_VOTE_DIVISOR)?,
            feather_percent: env_config::var_or("MASK_FEATHER_PERCENT", DEFAULT_FEATHER_PERCENT)?,
            crop_expansion_percent: env_config::var_or(
                "CROP_EXPANSION_PERCENT",
                DEFAULT_EXPANSION_PERCENT,
            )?,
            candidates_per_attempt: env_config::var_or(
                "CANDIDATES_PER_ATTEMPT",
                DEFAULT_CANDIDATES_PER_ATTEMPT,
            )?,
            retry: RetryPolicy {
                escalation_threshold: env_config::var_or(
                    "ESCALATION_THRESHOLD",
                    DEFAULT_ESCALATION_THRESHOLD,
                )?,
                max_attempts: env_config::var_or("MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
                tiers: env_config::list_or("ENGINE_TIERS", DEFAULT_ENGINE_TIERS),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.detection_fanout == 0 {
            return Err(CoreError::Validation(
                "DETECTION_FANOUT must be at least 1".to_string(),
            ));
        }
        if self.candidates_per_attempt == 0 {
            return Err(CoreError::Validation(
                "CANDIDATES_PER_ATTEMPT must be at least 1".to_string(),
            ));
        }
        self.mask_params(self.segmentation_fanout).validate()?;
        bbox_consensus::validate_expansion_percent(self.crop_expansion_percent)?;
        self.retry.validate()
    }

    /// Mask parameters for a job that dispatched `worker_count` workers.
    pub fn mask_params(&self, worker_count: usize) -> MaskConsensusParams {
        MaskConsensusParams {
            worker_count,
            vote_divisor: self.vote_divisor,
            feather_percent: self.feather_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.detection_fanout, 5);
        assert_eq!(config.retry.tiers, vec!["standard", "pro"]);
    }

    #[test]
    fn zero_fanout_rejected() {
        let config = PipelineConfig {
            segmentation_fanout: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn mask_params_carry_worker_count() {
        let params = PipelineConfig::default().mask_params(7);
        assert_eq!(params.worker_count, 7);
        assert_eq!(params.vote_divisor, 2.5);
    }
}
