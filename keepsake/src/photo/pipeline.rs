//! Photo normalization: bound the size of user captures before upload.

use image::{DynamicImage, GenericImageView, ImageReader};
use sha2::{Digest, Sha256};

use crate::config::PhotoConfig;
use crate::error::{KeepsakeError, Result};

/// MIME type of every pipeline output.
pub const PHOTO_CONTENT_TYPE: &str = "image/jpeg";

/// An encoded, bounded-size photo ready for blob upload.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPhoto {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
    /// Lowercase hex SHA-256 of `bytes`, usable as a content address.
    pub digest: String,
}

/// Normalizes arbitrary raster captures into bounded JPEG payloads.
///
/// Pure pixel work: decode, downscale when wider than the configured bound,
/// re-encode at a fixed quality. No disk writes, so a failed upload can
/// safely re-run the pipeline on the same input.
#[derive(Debug, Clone)]
pub struct PhotoPipeline {
    max_width: u32,
    jpeg_quality: u8,
}

impl PhotoPipeline {
    pub fn new(config: &PhotoConfig) -> Self {
        Self {
            max_width: config.max_width,
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    /// Decode `bytes`, downscale to at most `max_width` (aspect preserved,
    /// never upscaling), and re-encode as JPEG.
    pub fn normalize(&self, bytes: &[u8]) -> Result<NormalizedPhoto> {
        let reader = ImageReader::new(std::io::Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| KeepsakeError::Decode(format!("Failed to read image: {e}")))?;

        let img = reader
            .decode()
            .map_err(|e| KeepsakeError::Decode(format!("Failed to decode image: {e}")))?;

        let img = downscale_if_needed(img, self.max_width);

        // JPEG has no alpha channel; flatten before encoding.
        let img = if img.color().has_alpha() {
            DynamicImage::ImageRgb8(img.to_rgb8())
        } else {
            img
        };

        let (width, height) = img.dimensions();

        let mut output = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut output);
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, self.jpeg_quality);
        img.write_with_encoder(encoder)
            .map_err(|e| KeepsakeError::Decode(format!("Failed to encode image: {e}")))?;

        let mut hasher = Sha256::new();
        hasher.update(&output);
        let digest = hasher.finalize();

        Ok(NormalizedPhoto {
            bytes: output,
            content_type: PHOTO_CONTENT_TYPE,
            width,
            height,
            digest: format!("{digest:x}"),
        })
    }
}

/// Downscale to `max_width` with Lanczos3 when the image is wider, keeping
/// the aspect ratio via a rounded integer height. Narrow images pass through.
fn downscale_if_needed(img: DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_width {
        return img;
    }

    let scaled = (height as f64 * max_width as f64 / width as f64).round() as u32;
    let new_height = scaled.max(1);

    img.resize_exact(max_width, new_height, image::imageops::FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn test_pipeline() -> PhotoPipeline {
        PhotoPipeline::new(&PhotoConfig {
            max_width: 1200,
            jpeg_quality: 80,
        })
    }

    fn create_test_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut output = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut output), ImageFormat::Png)
            .unwrap();
        output
    }

    fn create_test_rgba_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgba8(width, height);
        let mut output = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut output), ImageFormat::Png)
            .unwrap();
        output
    }

    #[test]
    fn test_small_image_keeps_dimensions() {
        let pipeline = test_pipeline();
        let photo = pipeline.normalize(&create_test_png(800, 600)).unwrap();

        assert_eq!(photo.width, 800);
        assert_eq!(photo.height, 600);
        assert_eq!(photo.content_type, "image/jpeg");
        assert!(!photo.bytes.is_empty());

        let decoded = image::load_from_memory(&photo.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (800, 600));
    }

    #[test]
    fn test_wide_image_downscaled_with_aspect() {
        let pipeline = test_pipeline();
        let photo = pipeline.normalize(&create_test_png(3000, 2000)).unwrap();

        assert_eq!(photo.width, 1200);
        assert_eq!(photo.height, 800, "height should follow the aspect ratio");

        let decoded = image::load_from_memory(&photo.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (1200, 800));
    }

    #[test]
    fn test_height_rounds_from_aspect() {
        let pipeline = test_pipeline();
        let photo = pipeline.normalize(&create_test_png(2000, 500)).unwrap();
        assert_eq!(photo.width, 1200);
        assert_eq!(photo.height, 300);
    }

    #[test]
    fn test_never_upscales() {
        let pipeline = test_pipeline();
        let photo = pipeline.normalize(&create_test_png(640, 480)).unwrap();
        assert_eq!(photo.width, 640);
        assert_eq!(photo.height, 480);
    }

    #[test]
    fn test_extreme_aspect_keeps_one_pixel_height() {
        let pipeline = test_pipeline();
        let photo = pipeline.normalize(&create_test_png(3000, 1)).unwrap();
        assert_eq!(photo.width, 1200);
        assert_eq!(photo.height, 1);
    }

    #[test]
    fn test_rgba_flattened_for_jpeg() {
        let pipeline = test_pipeline();
        let photo = pipeline.normalize(&create_test_rgba_png(100, 100)).unwrap();

        let decoded = image::load_from_memory(&photo.bytes).unwrap();
        assert!(!decoded.color().has_alpha());
        assert_eq!(decoded.dimensions(), (100, 100));
    }

    #[test]
    fn test_invalid_bytes_fail_with_decode() {
        let pipeline = test_pipeline();
        let result = pipeline.normalize(&[0u8, 1, 2, 3, 4, 5]);

        match result {
            Err(KeepsakeError::Decode(_)) => (),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let pipeline = test_pipeline();
        let input = create_test_png(300, 200);

        let first = pipeline.normalize(&input).unwrap();
        let second = pipeline.normalize(&input).unwrap();

        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.digest, second.digest);
    }

    #[test]
    fn test_digest_matches_payload() {
        let pipeline = test_pipeline();
        let photo = pipeline.normalize(&create_test_png(120, 80)).unwrap();

        let mut hasher = Sha256::new();
        hasher.update(&photo.bytes);
        let expected = hasher.finalize();
        assert_eq!(photo.digest, format!("{expected:x}"));
        assert_eq!(photo.digest.len(), 64);
    }

    #[test]
    fn test_quality_is_clamped() {
        let pipeline = PhotoPipeline::new(&PhotoConfig {
            max_width: 1200,
            jpeg_quality: 0,
        });
        assert!(pipeline.normalize(&create_test_png(50, 50)).is_ok());
    }
}
