//! Normalized bounding boxes and pixel rectangles.
//!
//! Detectors and segmentation workers report boxes as
//! `[y_min, x_min, y_max, x_max]` in a `0..=1000` space independent of the
//! source resolution. [`NormalizedBox`] carries that representation and
//! converts to [`PixelRect`] once the image dimensions are known.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Upper bound of the normalized coordinate space.
pub const NORMALIZED_EXTENT: f64 = 1000.0;

/// Width and height of a source image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Reject zero-sized images.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::Validation(format!(
                "Image dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// The shorter of the two sides.
    pub fn shorter_side(&self) -> u32 {
        self.width.min(self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A box in normalized `0..=1000` coordinates.
///
/// Serialized as the four-element array `[y_min, x_min, y_max, x_max]`,
/// which is the wire shape used by every detection and segmentation worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct NormalizedBox {
    pub y_min: f64,
    pub x_min: f64,
    pub y_max: f64,
    pub x_max: f64,
}

impl From<[f64; 4]> for NormalizedBox {
    fn from(v: [f64; 4]) -> Self {
        Self {
            y_min: v[0],
            x_min: v[1],
            y_max: v[2],
            x_max: v[3],
        }
    }
}

impl From<NormalizedBox> for [f64; 4] {
    fn from(b: NormalizedBox) -> Self {
        [b.y_min, b.x_min, b.y_max, b.x_max]
    }
}

impl NormalizedBox {
    pub fn new(y_min: f64, x_min: f64, y_max: f64, x_max: f64) -> Self {
        Self {
            y_min,
            x_min,
            y_max,
            x_max,
        }
    }

    /// The whole image.
    pub fn full() -> Self {
        Self::new(0.0, 0.0, NORMALIZED_EXTENT, NORMALIZED_EXTENT)
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Check that all coordinates are finite, inside the normalized space,
    /// and describe a box of positive area.
    pub fn validate(&self) -> Result<(), CoreError> {
        let coords: [f64; 4] = (*self).into();
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(CoreError::Validation(format!(
                "Box has non-finite coordinates: {coords:?}"
            )));
        }
        if coords.iter().any(|c| *c < 0.0 || *c > NORMALIZED_EXTENT) {
            return Err(CoreError::Validation(format!(
                "Box coordinates must lie within 0..={NORMALIZED_EXTENT}, got {coords:?}"
            )));
        }
        if self.width() <= 0.0 || self.height() <= 0.0 {
            return Err(CoreError::Validation(format!(
                "Box must have positive area, got {coords:?}"
            )));
        }
        Ok(())
    }

    /// Clamp every coordinate into `0..=1000`.
    pub fn clamped(&self) -> Self {
        let c = |v: f64| v.clamp(0.0, NORMALIZED_EXTENT);
        Self::new(c(self.y_min), c(self.x_min), c(self.y_max), c(self.x_max))
    }

    /// Convert to a pixel rectangle for an image of `dims`.
    ///
    /// Edges are rounded outward so the rectangle always covers the box; the
    /// result is clipped to the image and may have zero size for degenerate
    /// boxes.
    pub fn to_pixels(&self, dims: ImageDimensions) -> PixelRect {
        let w = dims.width as f64;
        let h = dims.height as f64;
        let b = self.clamped();

        let x0 = (b.x_min * w / NORMALIZED_EXTENT).floor().max(0.0) as u32;
        let y0 = (b.y_min * h / NORMALIZED_EXTENT).floor().max(0.0) as u32;
        let x1 = ((b.x_max * w / NORMALIZED_EXTENT).ceil() as u32).min(dims.width);
        let y1 = ((b.y_max * h / NORMALIZED_EXTENT).ceil() as u32).min(dims.height);

        PixelRect {
            x: x0.min(dims.width),
            y: y0.min(dims.height),
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }

    /// Inverse of [`to_pixels`](Self::to_pixels) for fractional pixel edges.
    pub fn from_pixel_edges(
        x_min: f64,
        y_min: f64,
        x_max: f64,
        y_max: f64,
        dims: ImageDimensions,
    ) -> Self {
        let w = dims.width as f64;
        let h = dims.height as f64;
        Self::new(
            y_min * NORMALIZED_EXTENT / h,
            x_min * NORMALIZED_EXTENT / w,
            y_max * NORMALIZED_EXTENT / h,
            x_max * NORMALIZED_EXTENT / w,
        )
        .clamped()
    }
}

/// An axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_serializes_as_array() {
        let b = NormalizedBox::new(100.0, 200.0, 300.0, 400.0);
        let json = serde_json::to_value(b).unwrap();
        assert_eq!(json, serde_json::json!([100.0, 200.0, 300.0, 400.0]));

        let back: NormalizedBox = serde_json::from_value(json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn validate_rejects_inverted_and_out_of_range() {
        assert!(NormalizedBox::new(100.0, 100.0, 400.0, 400.0).validate().is_ok());
        assert!(NormalizedBox::new(400.0, 100.0, 100.0, 400.0).validate().is_err());
        assert!(NormalizedBox::new(0.0, 0.0, 1200.0, 400.0).validate().is_err());
        assert!(NormalizedBox::new(f64::NAN, 0.0, 10.0, 10.0).validate().is_err());
    }

    #[test]
    fn to_pixels_scales_and_rounds_outward() {
        let dims = ImageDimensions::new(200, 100);
        let rect = NormalizedBox::new(100.0, 250.0, 505.0, 500.0).to_pixels(dims);
        assert_eq!(
            rect,
            PixelRect {
                x: 50,
                y: 10,
                width: 50,
                height: 41,
            }
        );
    }

    #[test]
    fn full_box_covers_image() {
        let dims = ImageDimensions::new(640, 480);
        let rect = NormalizedBox::full().to_pixels(dims);
        assert_eq!(rect.width, 640);
        assert_eq!(rect.height, 480);
    }

    #[test]
    fn zero_dimensions_rejected() {
        assert!(ImageDimensions::new(0, 10).validate().is_err());
        assert!(ImageDimensions::new(10, 10).validate().is_ok());
    }
}
