//! Image buffer wrapper for captured pixels
//!
//! This module provides an `ImageBuffer` wrapper around `image::DynamicImage`
//! with the conversions the pipeline needs: building images from raw
//! window-system pixel data, downscaling for inline previews, and synthetic
//! page patterns for tests and the mock backend.
//!
//! # Examples
//!
//! ```
//! use auto_snap_mcp::capture::ImageBuffer;
//!
//! let page = ImageBuffer::from_page_pattern(1, 800, 600);
//! assert_eq!(page.dimensions(), (800, 600));
//!
//! let preview = page.fit_width(400);
//! assert_eq!(preview.dimensions(), (400, 300));
//! ```

use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

/// Wrapper around `image::DynamicImage`
///
/// All transformation methods return new `ImageBuffer` instances, leaving
/// the original unchanged.
#[derive(Clone, Debug)]
pub struct ImageBuffer {
    inner: DynamicImage,
}

impl ImageBuffer {
    /// Creates a new ImageBuffer from a DynamicImage
    pub fn new(image: DynamicImage) -> Self {
        Self { inner: image }
    }

    /// Builds an image from tightly packed RGBA bytes
    ///
    /// Returns `None` if the buffer length does not match the dimensions.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        RgbaImage::from_raw(width, height, data).map(|img| Self::new(DynamicImage::ImageRgba8(img)))
    }

    /// Builds an image from 32-bit BGRX pixels as delivered by X11 ZPixmap
    /// on little-endian 24/32-bit visuals
    ///
    /// Returns `None` if the buffer is too short for the dimensions.
    pub fn from_bgrx(width: u32, height: u32, data: &[u8]) -> Option<Self> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        if data.len() < pixels.checked_mul(4)? {
            return None;
        }

        let mut rgba = Vec::with_capacity(pixels * 4);
        for px in data.chunks_exact(4).take(pixels) {
            rgba.extend_from_slice(&[px[2], px[1], px[0], 255]);
        }
        Self::from_rgba(width, height, rgba)
    }

    /// Downscales so the width does not exceed `max_width`
    ///
    /// Images already narrow enough are returned unchanged. The aspect ratio
    /// is preserved.
    pub fn fit_width(&self, max_width: u32) -> Self {
        let (width, height) = self.dimensions();
        if width <= max_width || max_width == 0 {
            return self.clone();
        }

        let new_height = ((height as u64 * max_width as u64) / width as u64).max(1) as u32;
        let scaled = self.inner.resize_exact(
            max_width,
            new_height,
            image::imageops::FilterType::Triangle,
        );
        Self::new(scaled)
    }

    /// Returns the dimensions (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.inner.dimensions()
    }

    /// Returns the width in pixels
    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    /// Returns the height in pixels
    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    /// Converts the image to RGBA8 format
    pub fn to_rgba8(&self) -> RgbaImage {
        self.inner.to_rgba8()
    }

    /// Synthetic document page used by the mock backend and tests
    ///
    /// A white page with a dark vertical band and a dark horizontal rule whose
    /// positions depend on `page`, so different pages have clearly different
    /// perceptual hashes while the same page always renders identically.
    pub fn from_page_pattern(page: u32, width: u32, height: u32) -> Self {
        let slot = (page % 8) as f32;
        let row = ((page / 8) % 4) as f32;

        let band_start = (width as f32 * (0.05 + slot * 0.11)) as u32;
        let band_end = band_start + (width as f32 * 0.08).max(1.0) as u32;
        let rule_start = (height as f32 * (0.1 + row * 0.2)) as u32;
        let rule_end = rule_start + (height as f32 * 0.06).max(1.0) as u32;

        let img = RgbaImage::from_fn(width, height, |x, y| {
            let in_band = (band_start..band_end).contains(&x);
            let in_rule = (rule_start..rule_end).contains(&y);
            if in_band || in_rule {
                Rgba([20, 20, 20, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });

        Self::new(DynamicImage::ImageRgba8(img))
    }

    /// Returns a reference to the inner DynamicImage
    pub fn inner(&self) -> &DynamicImage {
        &self.inner
    }

    /// Consumes self and returns the inner DynamicImage
    pub fn into_inner(self) -> DynamicImage {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba_validates_length() {
        assert!(ImageBuffer::from_rgba(2, 2, vec![0; 16]).is_some());
        assert!(ImageBuffer::from_rgba(2, 2, vec![0; 15]).is_none());
    }

    #[test]
    fn test_from_bgrx_swaps_channels() {
        let data = vec![10, 20, 30, 0, 40, 50, 60, 0];
        let img = ImageBuffer::from_bgrx(2, 1, &data).unwrap();
        let rgba = img.to_rgba8();

        assert_eq!(rgba.get_pixel(0, 0).0, [30, 20, 10, 255]);
        assert_eq!(rgba.get_pixel(1, 0).0, [60, 50, 40, 255]);
    }

    #[test]
    fn test_from_bgrx_rejects_short_buffer() {
        assert!(ImageBuffer::from_bgrx(4, 4, &[0; 8]).is_none());
    }

    #[test]
    fn test_fit_width_downscales() {
        let img = ImageBuffer::from_page_pattern(0, 1920, 1080);
        let scaled = img.fit_width(960);
        assert_eq!(scaled.dimensions(), (960, 540));
    }

    #[test]
    fn test_fit_width_keeps_small_images() {
        let img = ImageBuffer::from_page_pattern(0, 300, 200);
        assert_eq!(img.fit_width(960).dimensions(), (300, 200));
    }

    #[test]
    fn test_page_pattern_is_deterministic() {
        let a = ImageBuffer::from_page_pattern(3, 200, 100);
        let b = ImageBuffer::from_page_pattern(3, 200, 100);
        assert_eq!(a.to_rgba8().as_raw(), b.to_rgba8().as_raw());
    }

    #[test]
    fn test_page_patterns_differ() {
        let a = ImageBuffer::from_page_pattern(1, 200, 100);
        let b = ImageBuffer::from_page_pattern(2, 200, 100);
        assert_ne!(a.to_rgba8().as_raw(), b.to_rgba8().as_raw());
    }
}
