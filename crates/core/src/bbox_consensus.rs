//! Bounding-box consensus and crop-region derivation.
//!
//! Several independent detectors each report a box for the same subject.
//! [`aggregate`] combines whichever of them succeeded into one
//! [`ConsensusBox`] by robust-averaging each edge separately, and
//! [`crop_region`] turns that box into the region handed to generation,
//! either padded in place ([`CropMode::Expand`]) or fitted to the source
//! aspect ratio ([`CropMode::Frame`]).

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geometry::{ImageDimensions, NormalizedBox, NORMALIZED_EXTENT};
use crate::robust_stats::robust_mean;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of parallel detection requests issued per consensus run.
pub const DEFAULT_DETECTOR_FANOUT: usize = 5;

/// Default padding, as a percentage of the image dimension per side.
pub const DEFAULT_EXPANSION_PERCENT: f64 = 10.0;

/// Largest padding accepted for either crop mode.
pub const MAX_EXPANSION_PERCENT: f64 = 100.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One detector's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateBox {
    /// Identity of the detector that produced this box (e.g. `"detector-3"`).
    pub detector: String,
    pub bbox: NormalizedBox,
    /// Resolution of the image the detector looked at.
    pub dimensions: ImageDimensions,
}

/// Aggregate of all successful candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusBox {
    pub bbox: NormalizedBox,
    /// Resolution fixed for the rest of the job.
    pub dimensions: ImageDimensions,
    /// How many candidates contributed.
    pub sample_count: usize,
}

/// How the consensus box becomes a crop region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropMode {
    /// Pad the subject box by the expansion percentage on every side.
    Expand,
    /// Fit a container with the source aspect ratio around the subject.
    Frame,
}

/// Crop policy supplied with the job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropPolicy {
    pub mode: CropMode,
    pub expansion_percent: f64,
}

impl Default for CropPolicy {
    fn default() -> Self {
        Self {
            mode: CropMode::Expand,
            expansion_percent: DEFAULT_EXPANSION_PERCENT,
        }
    }
}

impl CropPolicy {
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_expansion_percent(self.expansion_percent)
    }
}

/// Reject expansion percentages outside `0..=100`.
pub fn validate_expansion_percent(percent: f64) -> Result<(), CoreError> {
    if !percent.is_finite() || !(0.0..=MAX_EXPANSION_PERCENT).contains(&percent) {
        return Err(CoreError::Validation(format!(
            "expansion_percent must be between 0 and {MAX_EXPANSION_PERCENT}, got {percent}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Combine successful detector outputs into one box.
///
/// Each of the four edges is robust-averaged independently. The resolution
/// of the first candidate becomes the consensus resolution. Fails when there
/// are no candidates or the averaged box has no area.
pub fn aggregate(candidates: &[CandidateBox]) -> Result<ConsensusBox, CoreError> {
    let first = candidates.first().ok_or_else(|| {
        CoreError::Validation("No successful detections to aggregate".to_string())
    })?;
    first.dimensions.validate()?;

    let edge = |pick: fn(&NormalizedBox) -> f64| -> Result<f64, CoreError> {
        let values: Vec<f64> = candidates.iter().map(|c| pick(&c.bbox)).collect();
        robust_mean(&values)
            .ok_or_else(|| CoreError::Internal("Robust mean of non-empty set was empty".into()))
    };

    let bbox = NormalizedBox::new(
        edge(|b| b.y_min)?,
        edge(|b| b.x_min)?,
        edge(|b| b.y_max)?,
        edge(|b| b.x_max)?,
    );

    if bbox.area() <= 0.0 {
        return Err(CoreError::Validation(format!(
            "Consensus box has non-positive area: {:?}",
            <[f64; 4]>::from(bbox)
        )));
    }

    Ok(ConsensusBox {
        bbox,
        dimensions: first.dimensions,
        sample_count: candidates.len(),
    })
}

// ---------------------------------------------------------------------------
// Crop policies
// ---------------------------------------------------------------------------

/// Derive the crop region for `consensus` under `policy`.
pub fn crop_region(consensus: &ConsensusBox, policy: &CropPolicy) -> Result<NormalizedBox, CoreError> {
    policy.validate()?;

    let region = match policy.mode {
        CropMode::Expand => expand_box(&consensus.bbox, policy.expansion_percent),
        CropMode::Frame => frame_box(
            &consensus.bbox,
            consensus.dimensions,
            policy.expansion_percent,
        ),
    };

    if region.area() <= 0.0 {
        return Err(CoreError::Validation(format!(
            "Crop region has non-positive area: {:?}",
            <[f64; 4]>::from(region)
        )));
    }
    Ok(region)
}

/// Pad `bbox` by `percent` of the image dimension on each side, clipped to
/// the image.
pub fn expand_box(bbox: &NormalizedBox, percent: f64) -> NormalizedBox {
    let pad = percent / 100.0 * NORMALIZED_EXTENT;
    NormalizedBox::new(
        bbox.y_min - pad,
        bbox.x_min - pad,
        bbox.y_max + pad,
        bbox.x_max + pad,
    )
    .clamped()
}

/// Smallest rectangle with the image's aspect ratio that encloses `bbox`,
/// centered on it and padded by `percent` of the image dimension per side.
///
/// When the container crosses an image edge it is shifted back inside, so
/// the area cut off one edge reappears on the opposite edge. A container
/// larger than the image along an axis covers that whole axis.
pub fn frame_box(bbox: &NormalizedBox, dims: ImageDimensions, percent: f64) -> NormalizedBox {
    let w = dims.width as f64;
    let h = dims.height as f64;

    let sx0 = bbox.x_min * w / NORMALIZED_EXTENT;
    let sx1 = bbox.x_max * w / NORMALIZED_EXTENT;
    let sy0 = bbox.y_min * h / NORMALIZED_EXTENT;
    let sy1 = bbox.y_max * h / NORMALIZED_EXTENT;
    let sw = sx1 - sx0;
    let sh = sy1 - sy0;

    let aspect = dims.aspect_ratio();
    let (mut cw, mut ch) = if sw / sh > aspect {
        (sw, sw / aspect)
    } else {
        (sh * aspect, sh)
    };

    let pad = percent / 100.0;
    cw += 2.0 * pad * w;
    ch += 2.0 * pad * h;

    let cx = (sx0 + sx1) / 2.0;
    let cy = (sy0 + sy1) / 2.0;
    let (x0, x1) = fit_span(cx - cw / 2.0, cw, w);
    let (y0, y1) = fit_span(cy - ch / 2.0, ch, h);

    NormalizedBox::from_pixel_edges(x0, y0, x1, y1, dims)
}

/// Place a span of `len` starting at `start` inside `0..limit`, shifting it
/// rather than shrinking it whenever it fits.
fn fit_span(start: f64, len: f64, limit: f64) -> (f64, f64) {
    if len >= limit {
        (0.0, limit)
    } else if start < 0.0 {
        (0.0, len)
    } else if start + len > limit {
        (limit - len, limit)
    } else {
        (start, start + len)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
