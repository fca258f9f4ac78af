//! Image encoding utilities
//!
//! Converts `ImageBuffer` instances into PNG or JPEG bytes. PNG keeps the
//! alpha channel and is lossless, which keeps frame checksums stable; JPEG
//! drops alpha and takes a 1-100 quality.
//!
//! # Examples
//!
//! ```
//! use auto_snap_mcp::{capture::ImageBuffer, model::ImageFormat, util::encode::encode_image};
//!
//! let img = ImageBuffer::from_page_pattern(1, 320, 240);
//! let png = encode_image(&img, ImageFormat::Png, 95).unwrap();
//! assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
//! ```

use std::io::Cursor;

use image::{
    ImageEncoder, RgbImage,
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
    },
};

use crate::{
    capture::ImageBuffer,
    error::{CaptureError, CaptureResult},
    model::ImageFormat,
};

/// Encodes an image in the requested format
pub fn encode_image(buffer: &ImageBuffer, format: ImageFormat, quality: u8) -> CaptureResult<Vec<u8>> {
    match format {
        ImageFormat::Png => encode_png(buffer),
        ImageFormat::Jpeg => encode_jpeg(buffer, quality),
    }
}

/// Encodes an image as PNG with default compression and adaptive filtering
pub fn encode_png(buffer: &ImageBuffer) -> CaptureResult<Vec<u8>> {
    let mut output = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut output),
        CompressionType::Default,
        FilterType::Adaptive,
    );

    let rgba = buffer.to_rgba8();
    let (width, height) = rgba.dimensions();

    encoder
        .write_image(rgba.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| CaptureError::EncodingFailed {
            format: "png".to_string(),
            reason: e.to_string(),
        })?;

    Ok(output)
}

/// Encodes an image as JPEG with the given quality
///
/// JPEG has no alpha channel, so the image is converted to RGB first.
pub fn encode_jpeg(buffer: &ImageBuffer, quality: u8) -> CaptureResult<Vec<u8>> {
    let rgb = buffer.inner().to_rgb8();
    encode_jpeg_rgb(&rgb, quality).map_err(|e| CaptureError::EncodingFailed {
        format: "jpeg".to_string(),
        reason: e.to_string(),
    })
}

/// Encodes raw RGB pixels as baseline JPEG
///
/// Quality is clamped to 1-100.
pub fn encode_jpeg_rgb(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let quality = quality.clamp(1, 100);
    let (width, height) = rgb.dimensions();

    let mut output = Vec::new();
    JpegEncoder::new_with_quality(Cursor::new(&mut output), quality).write_image(
        rgb.as_raw(),
        width,
        height,
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(output)
}
