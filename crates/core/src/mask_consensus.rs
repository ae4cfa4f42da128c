//! Pixel-vote mask consensus and feathering.
//!
//! Each segmentation worker returns a small raster together with the box it
//! covers. [`VoteAccumulator`] paints every raster onto a full-size canvas and
//! counts, per pixel, how many workers claimed it. [`VoteAccumulator::finalize`]
//! keeps pixels that enough workers agree on and softens the edge with a
//! separable box blur so the composite has no hard seam.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geometry::{ImageDimensions, NormalizedBox};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of parallel segmentation workers per consensus job.
pub const DEFAULT_SEGMENTATION_FANOUT: usize = 5;

/// Painted coverage must exceed this (out of 255) to count as a vote.
pub const COVERAGE_THRESHOLD: u8 = 128;

/// Worker count is divided by this to get the vote threshold.
pub const DEFAULT_VOTE_DIVISOR: f64 = 2.5;

/// Feather radius as a percentage of the shorter image side.
pub const DEFAULT_FEATHER_PERCENT: f64 = 3.0;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Tunables for one consensus run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskConsensusParams {
    /// Number of workers dispatched, successful or not.
    pub worker_count: usize,
    pub vote_divisor: f64,
    pub feather_percent: f64,
}

impl Default for MaskConsensusParams {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_SEGMENTATION_FANOUT,
            vote_divisor: DEFAULT_VOTE_DIVISOR,
            feather_percent: DEFAULT_FEATHER_PERCENT,
        }
    }
}

impl MaskConsensusParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.worker_count == 0 {
            return Err(CoreError::Validation(
                "Mask consensus needs at least one worker".to_string(),
            ));
        }
        // At 1.0 the threshold would exceed the worker count.
        if !self.vote_divisor.is_finite() || self.vote_divisor <= 1.0 {
            return Err(CoreError::Validation(format!(
                "vote_divisor must be > 1.0, got {}",
                self.vote_divisor
            )));
        }
        if !self.feather_percent.is_finite() || !(0.0..=50.0).contains(&self.feather_percent) {
            return Err(CoreError::Validation(format!(
                "feather_percent must be between 0 and 50, got {}",
                self.feather_percent
            )));
        }
        Ok(())
    }
}

/// Minimum number of votes for a pixel to be part of the mask.
///
/// A pixel needs strictly more than `worker_count / divisor` votes, i.e.
/// `floor(worker_count / divisor) + 1`. This differs from
/// `ceil(worker_count / divisor)` when the quotient is whole: five workers
/// at the default divisor need three votes, not two.
pub fn vote_threshold(worker_count: usize, divisor: f64) -> u16 {
    (worker_count as f64 / divisor).floor() as u16 + 1
}

/// Blur radius in pixels for an image of `dims`.
pub fn feather_radius(dims: ImageDimensions, percent: f64) -> u32 {
    (dims.shorter_side() as f64 * percent / 100.0).round() as u32
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// One worker's segmentation: a local raster placed at its own box.
#[derive(Debug, Clone)]
pub struct CandidateMask {
    pub worker: String,
    pub bbox: NormalizedBox,
    pub raster: DynamicImage,
}

/// Per-pixel coverage of a worker raster: alpha when present, luminance
/// otherwise.
fn coverage(raster: &DynamicImage) -> GrayImage {
    if raster.color().has_alpha() {
        let la = raster.to_luma_alpha8();
        GrayImage::from_fn(la.width(), la.height(), |x, y| Luma([la.get_pixel(x, y)[1]]))
    } else {
        raster.to_luma8()
    }
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Result of a finished consensus run.
#[derive(Debug, Clone)]
pub struct ConsensusMask {
    /// Feathered full-size mask; 255 is fully inside.
    pub mask: GrayImage,
    pub threshold: u16,
    pub contributors: usize,
    /// Pixels inside the binarized mask before feathering.
    pub covered_pixels: usize,
}

/// Full-image vote counter.
#[derive(Debug, Clone)]
pub struct VoteAccumulator {
    dims: ImageDimensions,
    votes: Vec<u16>,
    contributors: usize,
}

impl VoteAccumulator {
    pub fn new(dims: ImageDimensions) -> Result<Self, CoreError> {
        dims.validate()?;
        Ok(Self {
            dims,
            votes: vec![0; dims.pixel_count()],
            contributors: 0,
        })
    }

    pub fn votes_at(&self, x: u32, y: u32) -> u16 {
        self.votes[(y * self.dims.width + x) as usize]
    }

    /// Resample `candidate` onto its box and add one vote wherever its
    /// coverage exceeds [`COVERAGE_THRESHOLD`].
    ///
    /// A candidate with an invalid or zero-sized box is rejected and leaves
    /// the accumulator untouched.
    pub fn add(&mut self, candidate: &CandidateMask) -> Result<(), CoreError> {
        candidate.bbox.validate()?;
        let rect = candidate.bbox.to_pixels(self.dims);
        if rect.is_empty() {
            return Err(CoreError::Validation(format!(
                "Mask from {} covers no pixels at {}x{}",
                candidate.worker, self.dims.width, self.dims.height
            )));
        }

        let cov = coverage(&candidate.raster);
        if cov.width() == 0 || cov.height() == 0 {
            return Err(CoreError::Validation(format!(
                "Mask from {} has an empty raster",
                candidate.worker
            )));
        }

        let painted = if cov.dimensions() == (rect.width, rect.height) {
            cov
        } else {
            imageops::resize(&cov, rect.width, rect.height, FilterType::Triangle)
        };

        let stride = self.dims.width as usize;
        for (px, py, pixel) in painted.enumerate_pixels() {
            if pixel[0] > COVERAGE_THRESHOLD {
                let idx = (rect.y + py) as usize * stride + (rect.x + px) as usize;
                self.votes[idx] = self.votes[idx].saturating_add(1);
            }
        }

        self.contributors += 1;
        Ok(())
    }

    /// Binary mask: 255 where `votes >= threshold`, 0 elsewhere.
    pub fn binarize(&self, threshold: u16) -> GrayImage {
        let w = self.dims.width;
        GrayImage::from_fn(w, self.dims.height, |x, y| {
            let v = self.votes[(y * w + x) as usize];
            Luma([if v >= threshold { 255 } else { 0 }])
        })
    }

    /// Binarize and feather. Fails when nothing was painted or when no pixel
    /// reached the threshold.
    pub fn finalize(&self, params: &MaskConsensusParams) -> Result<ConsensusMask, CoreError> {
        params.validate()?;
        if self.contributors == 0 {
            return Err(CoreError::Validation(
                "No valid segmentation results to aggregate".to_string(),
            ));
        }

        let threshold = vote_threshold(params.worker_count, params.vote_divisor);
        let binary = self.binarize(threshold);
        let covered_pixels = binary.pixels().filter(|p| p[0] == 255).count();
        if covered_pixels == 0 {
            return Err(CoreError::Validation(format!(
                "Consensus mask is empty: no pixel reached {threshold} of {} votes",
                params.worker_count
            )));
        }

        let radius = feather_radius(self.dims, params.feather_percent);
        Ok(ConsensusMask {
            mask: feather(&binary, radius),
            threshold,
            contributors: self.contributors,
            covered_pixels,
        })
    }
}

// ---------------------------------------------------------------------------
// Feathering
// ---------------------------------------------------------------------------

/// Separable box blur with edge clamping.
pub fn feather(mask: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    let radius = radius as usize;
    let src = mask.as_raw();

    let mut horizontal = vec![0u8; w * h];
    for y in 0..h {
        blur_line(&src[y * w..(y + 1) * w], radius, &mut horizontal[y * w..(y + 1) * w]);
    }

    let mut out = vec![0u8; w * h];
    let mut column = vec![0u8; h];
    let mut blurred = vec![0u8; h];
    for x in 0..w {
        for y in 0..h {
            column[y] = horizontal[y * w + x];
        }
        blur_line(&column, radius, &mut blurred);
        for y in 0..h {
            out[y * w + x] = blurred[y];
        }
    }

    GrayImage::from_raw(w as u32, h as u32, out).unwrap_or_else(|| mask.clone())
}

/// Running-sum box average of one row or column.
fn blur_line(line: &[u8], radius: usize, out: &mut [u8]) {
    let n = line.len() as isize;
    let r = radius as isize;
    let window = (2 * radius + 1) as u32;
    let at = |i: isize| line[i.clamp(0, n - 1) as usize] as u32;

    let mut sum: u32 = (-r..=r).map(at).sum();
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = ((sum + window / 2) / window) as u8;
        let i = i as isize;
        sum += at(i + r + 1);
        sum -= at(i - r);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use image::{GrayAlphaImage, LumaA};

    fn solid(worker: usize, bbox: [f64; 4]) -> CandidateMask {
        CandidateMask {
            worker: format!("segmenter-{worker}"),
            bbox: bbox.into(),
            raster: DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([255]))),
        }
    }

    #[test]
    fn threshold_at_five_workers_needs_three_votes() {
        assert_eq!(vote_threshold(5, DEFAULT_VOTE_DIVISOR), 3);
        assert_eq!(vote_threshold(4, DEFAULT_VOTE_DIVISOR), 2);
        assert_eq!(vote_threshold(1, DEFAULT_VOTE_DIVISOR), 1);
    }

    #[test]
    fn whole_quotient_requires_one_more_vote() {
        // 10 / 2.5 = 4 exactly: four votes is not a strict majority of the quotient.
        assert_eq!(vote_threshold(10, DEFAULT_VOTE_DIVISOR), 5);
        assert_eq!(vote_threshold(6, 2.0), 4);
        assert_eq!(vote_threshold(7, 2.0), 4);
    }

    #[test]
    fn divisor_of_one_is_rejected() {
        let params = MaskConsensusParams {
            vote_divisor: 1.0,
            ..Default::default()
        };
        assert_matches!(params.validate(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn two_votes_out_three_votes_in() {
        let dims = ImageDimensions::new(100, 100);
        let mut acc = VoteAccumulator::new(dims).unwrap();
        // Left half gets three votes, right half gets two.
        for i in 0..3 {
            acc.add(&solid(i, [0.0, 0.0, 1000.0, 500.0])).unwrap();
        }
        for i in 3..5 {
            acc.add(&solid(i, [0.0, 500.0, 1000.0, 1000.0])).unwrap();
        }
        assert_eq!(acc.votes_at(10, 10), 3);
        assert_eq!(acc.votes_at(90, 10), 2);

        let binary = acc.binarize(vote_threshold(5, DEFAULT_VOTE_DIVISOR));
        assert_eq!(binary.get_pixel(10, 10)[0], 255);
        assert_eq!(binary.get_pixel(90, 10)[0], 0);
    }

    #[test]
    fn majority_region_survives_finalize() {
        let dims = ImageDimensions::new(200, 200);
        let mut acc = VoteAccumulator::new(dims).unwrap();
        for i in 0..3 {
            acc.add(&solid(i, [100.0, 100.0, 600.0, 600.0])).unwrap();
        }
        for i in 3..5 {
            acc.add(&solid(i, [700.0, 700.0, 1000.0, 1000.0])).unwrap();
        }

        let result = acc.finalize(&MaskConsensusParams::default()).unwrap();
        assert_eq!(result.contributors, 5);
        assert_eq!(result.threshold, 3);
        // Well inside the agreed region the mask is solid.
        assert_eq!(result.mask.get_pixel(70, 70)[0], 255);
        // The minority region is absent.
        assert_eq!(result.mask.get_pixel(180, 180)[0], 0);
    }

    #[test]
    fn alpha_channel_drives_coverage() {
        let dims = ImageDimensions::new(10, 10);
        let mut acc = VoteAccumulator::new(dims).unwrap();
        // White pixels everywhere, but only the left column is opaque.
        let raster = GrayAlphaImage::from_fn(10, 10, |x, _| {
            LumaA([255, if x == 0 { 255 } else { 100 }])
        });
        acc.add(&CandidateMask {
            worker: "segmenter-0".into(),
            bbox: NormalizedBox::full(),
            raster: DynamicImage::ImageLumaA8(raster),
        })
        .unwrap();
        assert_eq!(acc.votes_at(0, 5), 1);
        assert_eq!(acc.votes_at(5, 5), 0);
    }

    #[test]
    fn finalize_without_contributors_fails() {
        let acc = VoteAccumulator::new(ImageDimensions::new(10, 10)).unwrap();
        assert_matches!(
            acc.finalize(&MaskConsensusParams::default()),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn invalid_candidate_box_is_rejected() {
        let mut acc = VoteAccumulator::new(ImageDimensions::new(10, 10)).unwrap();
        assert!(acc.add(&solid(0, [500.0, 500.0, 400.0, 600.0])).is_err());
        assert_eq!(acc.votes_at(5, 5), 0);
        assert!(acc.finalize(&MaskConsensusParams::default()).is_err());
    }

    #[test]
    fn feather_softens_edges_only() {
        let mask = GrayImage::from_fn(40, 1, |x, _| Luma([if x < 20 { 255 } else { 0 }]));
        let soft = feather(&mask, 3);
        assert_eq!(soft.get_pixel(0, 0)[0], 255);
        assert_eq!(soft.get_pixel(39, 0)[0], 0);
        let edge = soft.get_pixel(19, 0)[0];
        assert!(edge > 0 && edge < 255, "edge pixel should be partial, got {edge}");
    }

    #[test]
    fn feather_radius_scales_with_shorter_side() {
        assert_eq!(feather_radius(ImageDimensions::new(1000, 2000), 3.0), 30);
        assert_eq!(feather_radius(ImageDimensions::new(10, 10), 3.0), 0);
    }

    #[test]
    fn params_validation() {
        assert!(MaskConsensusParams::default().validate().is_ok());
        let bad = MaskConsensusParams {
            vote_divisor: 0.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
