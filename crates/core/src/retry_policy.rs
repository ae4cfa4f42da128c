//! Attempt counting and engine-tier escalation for generation jobs.
//!
//! A generation job walks an ordered list of engine tiers. Each tier gets
//! `escalation_threshold` attempts before the job moves to the next one, and
//! the whole ladder is capped at `max_attempts`. The last permitted attempt is
//! flagged final so the quality gate must select, which guarantees
//! termination.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::quality_gate::GateFlags;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_ESCALATION_THRESHOLD: u32 = 2;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_CANDIDATES_PER_ATTEMPT: usize = 2;
pub const DEFAULT_ENGINE_TIERS: &[&str] = &["standard", "pro"];

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub escalation_threshold: u32,
    pub max_attempts: u32,
    /// Engine tiers, weakest first.
    pub tiers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            tiers: DEFAULT_ENGINE_TIERS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Per-job position on the ladder. Persisted with the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderState {
    /// Attempts already judged and rejected.
    pub attempt_count: u32,
    pub tier_index: usize,
    /// Rejected attempts on the current tier.
    pub tier_attempts: u32,
}

/// Outcome of recording a rejected attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStep {
    SameTier(LadderState),
    Escalated {
        from: String,
        to: String,
        state: LadderState,
    },
    /// No attempts left. Unreachable while the gate honors the final flag.
    Exhausted,
}

impl RetryPolicy {
    pub fn new(
        escalation_threshold: u32,
        max_attempts: u32,
        tiers: Vec<String>,
    ) -> Result<Self, CoreError> {
        let policy = Self {
            escalation_threshold,
            max_attempts,
            tiers,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.escalation_threshold == 0 {
            return Err(CoreError::Validation(
                "escalation_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.tiers.is_empty() || self.tiers.iter().any(|t| t.trim().is_empty()) {
            return Err(CoreError::Validation(
                "Engine tier list must be non-empty and contain no blank names".to_string(),
            ));
        }
        Ok(())
    }

    pub fn initial_state(&self) -> LadderState {
        LadderState::default()
    }

    /// Tier the next attempt runs on.
    pub fn current_tier(&self, state: &LadderState) -> &str {
        let idx = state.tier_index.min(self.tiers.len().saturating_sub(1));
        self.tiers.get(idx).map(String::as_str).unwrap_or_default()
    }

    fn has_next_tier(&self, state: &LadderState) -> bool {
        state.tier_index + 1 < self.tiers.len()
    }

    /// Gate flags for the attempt described by `state`.
    pub fn gate_flags(&self, state: &LadderState) -> GateFlags {
        GateFlags {
            is_escalation_check: state.tier_attempts + 1 == self.escalation_threshold
                && self.has_next_tier(state),
            is_absolute_final_attempt: state.attempt_count + 1 >= self.max_attempts,
        }
    }

    /// Advance the ladder after the gate rejected the current attempt.
    pub fn record_retry(&self, state: &LadderState) -> RetryStep {
        if state.attempt_count + 1 >= self.max_attempts {
            return RetryStep::Exhausted;
        }
        let tier_attempts = state.tier_attempts + 1;
        if tier_attempts >= self.escalation_threshold && self.has_next_tier(state) {
            let next = LadderState {
                attempt_count: state.attempt_count + 1,
                tier_index: state.tier_index + 1,
                tier_attempts: 0,
            };
            return RetryStep::Escalated {
                from: self.current_tier(state).to_string(),
                to: self.current_tier(&next).to_string(),
                state: next,
            };
        }
        RetryStep::SameTier(LadderState {
            attempt_count: state.attempt_count + 1,
            tier_index: state.tier_index,
            tier_attempts,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
