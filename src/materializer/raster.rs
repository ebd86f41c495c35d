//! Local raster re-encoding for secondary artifacts

use std::io::Cursor;

use image::{DynamicImage, ImageResult};

use crate::types::RasterFormat;

/// Decode `bytes` and re-encode them as `target`
///
/// JPEG has no alpha channel, so transparent pixels are flattened by
/// dropping alpha. Every other target is written as 8-bit RGBA.
pub fn convert(bytes: &[u8], target: RasterFormat) -> ImageResult<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)?;
    let normalized = match target {
        RasterFormat::Jpeg => DynamicImage::ImageRgb8(decoded.to_rgb8()),
        _ => DynamicImage::ImageRgba8(decoded.to_rgba8()),
    };

    let mut out = Cursor::new(Vec::new());
    normalized.write_to(&mut out, target.image_format())?;
    Ok(out.into_inner())
}
