//! Image decoding and the square normalisation the pipeline requires.
//!
//! The inference collaborator only accepts a square RGB image at
//! [`CANONICAL_RESOLUTION`]. Inputs are centre-cropped to their shorter side
//! and resized; nothing is padded or stretched.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::CoreError;

/// Side length of the conditioning image fed to the pipeline.
pub const CANONICAL_RESOLUTION: u32 = 512;

/// Read only the header to get `(width, height)`.
///
/// Used to reject unreadable uploads before a job is created.
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), CoreError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CoreError::Validation(format!("Unreadable image: {e}")))?;
    if reader.format().is_none() {
        return Err(CoreError::Validation("Unrecognised image format".into()));
    }
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| CoreError::Validation(format!("Invalid image: {e}")))?;
    if width == 0 || height == 0 {
        return Err(CoreError::Validation(format!(
            "Image has empty dimensions {width}x{height}"
        )));
    }
    Ok((width, height))
}

/// Fully decode an image and convert it to RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<DynamicImage, CoreError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| CoreError::Validation(format!("Invalid image: {e}")))?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// Crop the largest centred square out of `image`.
pub fn center_square_crop(image: &DynamicImage) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    image.crop_imm(x, y, side, side)
}

/// Centre-crop to a square, then resize to `size` x `size`.
pub fn normalize_square(image: &DynamicImage, size: u32) -> DynamicImage {
    let square = center_square_crop(image);
    if square.width() == size {
        return square;
    }
    square.resize_exact(size, size, FilterType::Lanczos3)
}

/// Encode `image` as PNG.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| CoreError::Internal(format!("Failed to encode PNG: {e}")))?;
    Ok(buf)
}
