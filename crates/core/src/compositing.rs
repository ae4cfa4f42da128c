//! Mask-weighted paste of a generated crop back into the source image.

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgba, RgbaImage};

use crate::error::CoreError;
use crate::geometry::PixelRect;

/// Blend `patch` into `base` over `region`, weighted by `mask`.
///
/// `mask` is a full-image matte (255 = take the patch, 0 = keep the base)
/// and is resized to the base dimensions when it does not match. `patch` is
/// resized to the region size. Pixels outside `region` are never touched.
pub fn composite(
    base: &RgbaImage,
    patch: &RgbaImage,
    region: PixelRect,
    mask: &GrayImage,
) -> Result<RgbaImage, CoreError> {
    if region.is_empty() {
        return Err(CoreError::Validation("Composite region is empty".to_string()));
    }
    if region.x + region.width > base.width() || region.y + region.height > base.height() {
        return Err(CoreError::Validation(format!(
            "Composite region {region:?} exceeds base image {}x{}",
            base.width(),
            base.height()
        )));
    }
    if patch.width() == 0 || patch.height() == 0 {
        return Err(CoreError::Validation("Generated patch is empty".to_string()));
    }

    let resized_mask;
    let mask = if mask.dimensions() == base.dimensions() {
        mask
    } else {
        resized_mask = imageops::resize(mask, base.width(), base.height(), FilterType::Triangle);
        &resized_mask
    };

    let resized_patch;
    let patch = if patch.dimensions() == (region.width, region.height) {
        patch
    } else {
        resized_patch = imageops::resize(patch, region.width, region.height, FilterType::CatmullRom);
        &resized_patch
    };

    let mut out = base.clone();
    for py in 0..region.height {
        for px in 0..region.width {
            let (x, y) = (region.x + px, region.y + py);
            let weight = mask.get_pixel(x, y)[0] as u32;
            if weight == 0 {
                continue;
            }
            let under = base.get_pixel(x, y);
            let over = patch.get_pixel(px, py);
            out.put_pixel(x, y, blend(under, over, weight));
        }
    }
    Ok(out)
}

fn blend(under: &Rgba<u8>, over: &Rgba<u8>, weight: u32) -> Rgba<u8> {
    let inv = 255 - weight;
    let mix = |a: u8, b: u8| ((a as u32 * inv + b as u32 * weight + 127) / 255) as u8;
    Rgba([
        mix(under[0], over[0]),
        mix(under[1], over[1]),
        mix(under[2], over[2]),
        mix(under[3], over[3]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn rect(x: u32, y: u32, width: u32, height: u32) -> PixelRect {
        PixelRect {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn full_mask_replaces_region_only() {
        let base = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        let patch = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let mask = GrayImage::from_pixel(10, 10, Luma([255]));

        let out = composite(&base, &patch, rect(2, 2, 4, 4), &mask).unwrap();
        assert_eq!(out.get_pixel(3, 3), &Rgba([255, 255, 255, 255]));
        assert_eq!(out.get_pixel(8, 8), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn zero_mask_keeps_base() {
        let base = RgbaImage::from_pixel(10, 10, Rgba([10, 20, 30, 255]));
        let patch = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        let mask = GrayImage::new(10, 10);

        let out = composite(&base, &patch, rect(0, 0, 10, 10), &mask).unwrap();
        assert_eq!(out, base);
    }

    #[test]
    fn partial_mask_blends() {
        let base = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let patch = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        let mask = GrayImage::from_pixel(2, 2, Luma([128]));

        let out = composite(&base, &patch, rect(0, 0, 2, 2), &mask).unwrap();
        let v = out.get_pixel(0, 0)[0];
        assert!((127..=129).contains(&v), "expected mid-gray, got {v}");
    }

    #[test]
    fn patch_is_resized_to_region() {
        let base = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]));
        let patch = RgbaImage::from_pixel(5, 5, Rgba([200, 200, 200, 255]));
        let mask = GrayImage::from_pixel(20, 20, Luma([255]));

        let out = composite(&base, &patch, rect(0, 0, 10, 10), &mask).unwrap();
        let v = out.get_pixel(5, 5)[0];
        assert!((198..=202).contains(&v), "expected resampled patch, got {v}");
        assert_eq!(out.get_pixel(15, 15)[0], 0);
    }

    #[test]
    fn out_of_bounds_region_rejected() {
        let base = RgbaImage::new(10, 10);
        let patch = RgbaImage::new(4, 4);
        let mask = GrayImage::new(10, 10);
        assert!(composite(&base, &patch, rect(8, 8, 4, 4), &mask).is_err());
        assert!(composite(&base, &patch, rect(0, 0, 0, 4), &mask).is_err());
    }
}
