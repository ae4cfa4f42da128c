//! PNG/JPEG/WebP decoding and PNG encoding helpers.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::error::CoreError;

/// Content type of every raster this crate encodes.
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Decode an image of any enabled format, guessing the format from its header.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, CoreError> {
    image::load_from_memory(bytes)
        .map_err(|e| CoreError::Validation(format!("Undecodable image ({} bytes): {e}", bytes.len())))
}

/// Encode an image as PNG.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, CoreError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| CoreError::Internal(format!("PNG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}
