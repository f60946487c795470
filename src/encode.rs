//! Frame encode pipeline.
//!
//! Every accepted frame is resized to a fixed output resolution and
//! re-encoded at a fixed JPEG quality, bounding per-frame memory and
//! serving bandwidth no matter what the camera delivers.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, RgbImage};

use crate::ingest::RawImage;

/// Fixed output resolution served to consumers.
pub const OUTPUT_WIDTH: u32 = 640;
pub const OUTPUT_HEIGHT: u32 = 360;

/// Fixed JPEG quality for the serving path.
pub const JPEG_QUALITY: u8 = 70;

/// Resize a decoded frame to `width`x`height` and encode it as JPEG.
pub fn encode_frame(raw: &RawImage, width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let source = RgbImage::from_raw(raw.width, raw.height, raw.pixels.clone()).ok_or_else(|| {
        anyhow!(
            "pixel buffer of {} bytes does not match {}x{} rgb frame",
            raw.pixels.len(),
            raw.width,
            raw.height
        )
    })?;

    let resized = if raw.width == width && raw.height == height {
        source
    } else {
        image::imageops::resize(&source, width, height, FilterType::Triangle)
    };

    encode_rgb(&resized, quality)
}

/// Encode an RGB image as JPEG at the given quality.
pub fn encode_rgb(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(image.as_raw(), width, height, ExtendedColorType::Rgb8)
        .context("encode jpeg")?;
    Ok(out)
}

/// Decode a JPEG payload back to RGB, used by the overlay renderer.
pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(width: u32, height: u32) -> RawImage {
        let mut pixels = vec![0u8; (width * height * 3) as usize];
        for (i, p) in pixels.iter_mut().enumerate() {
            *p = (i % 251) as u8;
        }
        RawImage {
            pixels,
            width,
            height,
        }
    }

    #[test]
    fn encodes_at_fixed_output_resolution() {
        let jpeg = encode_frame(&raw(1280, 720), OUTPUT_WIDTH, OUTPUT_HEIGHT, JPEG_QUALITY)
            .expect("encode");
        let decoded = decode_jpeg(&jpeg).expect("decode");
        assert_eq!(decoded.dimensions(), (OUTPUT_WIDTH, OUTPUT_HEIGHT));
    }

    #[test]
    fn skips_resize_when_already_at_output_size() {
        let jpeg = encode_frame(
            &raw(OUTPUT_WIDTH, OUTPUT_HEIGHT),
            OUTPUT_WIDTH,
            OUTPUT_HEIGHT,
            JPEG_QUALITY,
        )
        .expect("encode");
        assert!(jpeg.starts_with(&[0xFF, 0xD8]));
    }

    #[test]
    fn mismatched_pixel_buffer_is_rejected() {
        let bad = RawImage {
            pixels: vec![0u8; 10],
            width: 640,
            height: 480,
        };
        assert!(encode_frame(&bad, OUTPUT_WIDTH, OUTPUT_HEIGHT, JPEG_QUALITY).is_err());
    }
}
