//! Frame fingerprints for duplicate gating
//!
//! A fingerprint pairs an exact SHA-256 checksum of the decoded pixels with a
//! 16x16 gradient perceptual hash. Identical checksums always mean "same
//! page"; otherwise the perceptual hashes are compared and frames whose
//! similarity reaches the configured threshold are treated as the same page
//! (cursor blinks, anti-aliasing jitter).

use image_hasher::{HashAlg, HasherConfig, ImageHash};
use sha2::{Digest, Sha256};

use super::ImageBuffer;
use crate::model::Fingerprint;

const HASH_SIZE: u32 = 16;

/// Computes the fingerprint of an image
pub fn compute(image: &ImageBuffer) -> Fingerprint {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut hasher = Sha256::new();
    hasher.update(width.to_le_bytes());
    hasher.update(height.to_le_bytes());
    hasher.update(rgba.as_raw());
    let checksum = format!("{:x}", hasher.finalize());

    let perceptual = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(HASH_SIZE, HASH_SIZE)
        .to_hasher()
        .hash_image(image.inner())
        .to_base64();

    Fingerprint {
        checksum,
        perceptual,
    }
}

/// Similarity in `[0.0, 1.0]`; 1.0 means identical
///
/// Unparseable perceptual hashes compare as completely different.
pub fn similarity(lhs: &Fingerprint, rhs: &Fingerprint) -> f32 {
    if lhs.checksum == rhs.checksum {
        return 1.0;
    }

    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(&lhs.perceptual) else {
        return 0.0;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(&rhs.perceptual) else {
        return 0.0;
    };

    let bits = h1.as_bytes().len().max(h2.as_bytes().len()) * 8;
    if bits == 0 || h1.as_bytes().len() != h2.as_bytes().len() {
        return 0.0;
    }
    1.0 - h1.dist(&h2) as f32 / bits as f32
}

/// Whether two frames show the same page under `threshold`
pub fn is_near_duplicate(lhs: &Fingerprint, rhs: &Fingerprint, threshold: f32) -> bool {
    similarity(lhs, rhs) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_images_match_exactly() {
        let a = compute(&ImageBuffer::from_page_pattern(1, 320, 240));
        let b = compute(&ImageBuffer::from_page_pattern(1, 320, 240));

        assert_eq!(a, b);
        assert_eq!(similarity(&a, &b), 1.0);
        assert!(is_near_duplicate(&a, &b, 1.0));
    }

    #[test]
    fn test_different_pages_are_distinct() {
        let a = compute(&ImageBuffer::from_page_pattern(1, 320, 240));
        let b = compute(&ImageBuffer::from_page_pattern(2, 320, 240));

        assert_ne!(a.checksum, b.checksum);
        assert!(similarity(&a, &b) < 0.98);
        assert!(!is_near_duplicate(&a, &b, 0.98));
    }

    #[test]
    fn test_single_pixel_change_is_near_duplicate() {
        let base = ImageBuffer::from_page_pattern(3, 320, 240);
        let mut rgba = base.to_rgba8();
        rgba.put_pixel(300, 230, image::Rgba([250, 250, 250, 255]));
        let tweaked = ImageBuffer::new(image::DynamicImage::ImageRgba8(rgba));

        let a = compute(&base);
        let b = compute(&tweaked);
        assert_ne!(a.checksum, b.checksum);
        assert!(is_near_duplicate(&a, &b, 0.98));
    }

    #[test]
    fn test_checksum_covers_dimensions() {
        let a = compute(&ImageBuffer::from_rgba(2, 1, vec![0; 8]).unwrap());
        let b = compute(&ImageBuffer::from_rgba(1, 2, vec![0; 8]).unwrap());
        assert_ne!(a.checksum, b.checksum);
    }

    #[test]
    fn test_garbage_hash_compares_as_different() {
        let a = compute(&ImageBuffer::from_page_pattern(1, 64, 64));
        let b = Fingerprint {
            checksum:   "other".to_string(),
            perceptual: "!!not base64!!".to_string(),
        };
        assert_eq!(similarity(&a, &b), 0.0);
    }
}
