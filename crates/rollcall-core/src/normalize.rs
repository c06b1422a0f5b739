//! Face normalization shared by training and prediction.
//!
//! Enrollment images and probe frames go through the same function:
//! decode, convert to 8-bit grayscale, resize to a fixed square. A model
//! trained at one size cannot score probes normalized at another.

use crate::types::FaceImage;
use image::imageops::FilterType;
use thiserror::Error;

/// Default side length of a normalized face.
pub const FACE_SIZE: u32 = 200;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("face size must be positive")]
    ZeroSize,
}

/// Decode `bytes` and normalize to a `size`×`size` grayscale face.
pub fn normalize_face(bytes: &[u8], size: u32) -> Result<FaceImage, NormalizeError> {
    if size == 0 {
        return Err(NormalizeError::ZeroSize);
    }

    let decoded = image::load_from_memory(bytes)?;
    let gray = decoded.to_luma8();
    let resized = image::imageops::resize(&gray, size, size, FilterType::Triangle);

    FaceImage::from_pixels(size, resized.into_raw()).ok_or(NormalizeError::ZeroSize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode(img: DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_normalize_output_size() {
        let img = GrayImage::from_fn(64, 48, |x, y| Luma([(x + y) as u8]));
        let face = normalize_face(&encode(DynamicImage::ImageLuma8(img)), FACE_SIZE).unwrap();
        assert_eq!(face.size(), FACE_SIZE);
        assert_eq!(face.as_slice().len(), (FACE_SIZE * FACE_SIZE) as usize);
    }

    #[test]
    fn test_normalize_uniform_stays_uniform() {
        let img = GrayImage::from_pixel(30, 30, Luma([128]));
        let face = normalize_face(&encode(DynamicImage::ImageLuma8(img)), 16).unwrap();
        assert!(face.as_slice().iter().all(|&p| p == 128));
    }

    #[test]
    fn test_normalize_color_to_grayscale() {
        let img = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let face = normalize_face(&encode(DynamicImage::ImageRgb8(img)), 8).unwrap();
        assert!(face.as_slice().iter().all(|&p| p == 255));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let img = GrayImage::from_fn(40, 40, |x, y| Luma([(x * 7 + y * 3) as u8]));
        let bytes = encode(DynamicImage::ImageLuma8(img));
        let a = normalize_face(&bytes, FACE_SIZE).unwrap();
        let b = normalize_face(&bytes, FACE_SIZE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        let result = normalize_face(b"definitely not an image", FACE_SIZE);
        assert!(matches!(result, Err(NormalizeError::Decode(_))));
    }

    #[test]
    fn test_normalize_rejects_zero_size() {
        let img = GrayImage::from_pixel(4, 4, Luma([1]));
        let result = normalize_face(&encode(DynamicImage::ImageLuma8(img)), 0);
        assert!(matches!(result, Err(NormalizeError::ZeroSize)));
    }
}
