//! Job kinds and their status graphs.
//!
//! Statuses are persisted as snake_case strings. Every kind moves forward
//! through a fixed sequence of stages, may drop to `failed` from any
//! non-terminal stage, and only generation jobs have a back-edge
//! (`pending_quality_check -> pending_generation`) for retries.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const STATUS_COMPLETE: &str = "complete";
pub const STATUS_FAILED: &str = "failed";

// ---------------------------------------------------------------------------
// Job kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// End-to-end try-on: segment, crop, prompt, generate, composite.
    GarmentFit,
    /// Distributed segmentation with pixel-vote aggregation.
    MaskConsensus,
    /// Quality-gated generation with tier escalation.
    Generation,
}

impl JobKind {
    pub const ALL: &'static [JobKind] = &[
        JobKind::GarmentFit,
        JobKind::MaskConsensus,
        JobKind::Generation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::GarmentFit => "garment_fit",
            JobKind::MaskConsensus => "mask_consensus",
            JobKind::Generation => "generation",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job kind '{s}'")))
    }

    /// Status a freshly created job of this kind starts in.
    pub fn initial_status(self) -> &'static str {
        match self {
            JobKind::GarmentFit => GarmentFitStatus::INITIAL.as_str(),
            JobKind::MaskConsensus => MaskConsensusStatus::INITIAL.as_str(),
            JobKind::Generation => GenerationStatus::INITIAL.as_str(),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Behaviour shared by every per-kind status enum.
pub trait JobStatus: Copy + Eq + std::fmt::Debug + 'static {
    const INITIAL: Self;

    fn as_str(self) -> &'static str;
    fn parse(s: &str) -> Result<Self, CoreError>;
    /// Next status on the forward path, `None` for terminal statuses.
    fn successor(self) -> Option<Self>;
    fn is_terminal(self) -> bool;

    /// Whether `self -> to` is an explicit retry back-edge.
    fn is_retry_edge(self, _to: Self) -> bool {
        false
    }
}

macro_rules! define_job_status {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every status in forward order; terminal statuses last.
            pub const ORDER: &'static [$name] = &[$($name::$variant),+];

            fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }

            fn from_name(s: &str) -> Result<Self, CoreError> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        "Unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

define_job_status! {
    /// Garment-fit pipeline stages.
    GarmentFitStatus {
        PendingSegmentation = "pending_segmentation",
        PendingCrop = "pending_crop",
        PendingPromptGeneration = "pending_prompt_generation",
        PendingTryon = "pending_tryon",
        PendingComposite = "pending_composite",
        Complete = "complete",
        Failed = "failed",
    }
}

define_job_status! {
    /// Mask consensus stages.
    MaskConsensusStatus {
        PendingSegmentation = "pending_segmentation",
        /// Worker tasks are out; waiting for every slot to settle.
        AwaitingWorkers = "awaiting_workers",
        PendingAggregation = "pending_aggregation",
        Complete = "complete",
        Failed = "failed",
    }
}

define_job_status! {
    /// Generation ladder stages.
    GenerationStatus {
        PendingGeneration = "pending_generation",
        PendingQualityCheck = "pending_quality_check",
        Complete = "complete",
        Failed = "failed",
    }
}

/// Next entry of `order` after a non-terminal `current`.
fn forward<S: JobStatus>(order: &[S], current: S) -> Option<S> {
    if current.is_terminal() {
        return None;
    }
    let pos = order.iter().position(|s| *s == current)?;
    order.get(pos + 1).copied()
}

impl JobStatus for GarmentFitStatus {
    const INITIAL: Self = GarmentFitStatus::PendingSegmentation;

    fn as_str(self) -> &'static str {
        self.name()
    }
    fn parse(s: &str) -> Result<Self, CoreError> {
        Self::from_name(s)
    }
    fn successor(self) -> Option<Self> {
        forward(Self::ORDER, self)
    }
    fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl JobStatus for MaskConsensusStatus {
    const INITIAL: Self = MaskConsensusStatus::PendingSegmentation;

    fn as_str(self) -> &'static str {
        self.name()
    }
    fn parse(s: &str) -> Result<Self, CoreError> {
        Self::from_name(s)
    }
    fn successor(self) -> Option<Self> {
        forward(Self::ORDER, self)
    }
    fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl JobStatus for GenerationStatus {
    const INITIAL: Self = GenerationStatus::PendingGeneration;

    fn as_str(self) -> &'static str {
        self.name()
    }
    fn parse(s: &str) -> Result<Self, CoreError> {
        Self::from_name(s)
    }
    fn successor(self) -> Option<Self> {
        forward(Self::ORDER, self)
    }
    fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
    fn is_retry_edge(self, to: Self) -> bool {
        self == Self::PendingQualityCheck && to == Self::PendingGeneration
    }
}

// ---------------------------------------------------------------------------
// Transition validation
// ---------------------------------------------------------------------------

/// Classification of a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Forward,
    /// The generation back-edge; the caller must bump `attempt_count`.
    RetryEdge,
    Fail,
}

/// `complete` and `failed` are terminal for every kind.
pub fn is_terminal(status: &str) -> bool {
    status == STATUS_COMPLETE || status == STATUS_FAILED
}

fn check<S: JobStatus>(from: &str, to: &str) -> Result<TransitionKind, CoreError> {
    let from_s = S::parse(from)?;
    let to_s = S::parse(to)?;
    if from_s.is_terminal() {
        return Err(CoreError::Conflict(format!(
            "Job is already terminal ({from}); cannot move to {to}"
        )));
    }
    if to == STATUS_FAILED {
        return Ok(TransitionKind::Fail);
    }
    if from_s.successor() == Some(to_s) {
        return Ok(TransitionKind::Forward);
    }
    if from_s.is_retry_edge(to_s) {
        return Ok(TransitionKind::RetryEdge);
    }
    Err(CoreError::Validation(format!(
        "Illegal status transition {from} -> {to}"
    )))
}

/// Validate `from -> to` against the graph of `kind`.
pub fn validate_transition(
    kind: JobKind,
    from: &str,
    to: &str,
) -> Result<TransitionKind, CoreError> {
    match kind {
        JobKind::GarmentFit => check::<GarmentFitStatus>(from, to),
        JobKind::MaskConsensus => check::<MaskConsensusStatus>(from, to),
        JobKind::Generation => check::<GenerationStatus>(from, to),
    }
}

/// Check that `status` is a known status of `kind`.
pub fn validate_status(kind: JobKind, status: &str) -> Result<(), CoreError> {
    match kind {
        JobKind::GarmentFit => GarmentFitStatus::parse(status).map(|_| ()),
        JobKind::MaskConsensus => MaskConsensusStatus::parse(status).map(|_| ()),
        JobKind::Generation => GenerationStatus::parse(status).map(|_| ()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
