//! Bounding-box overlay rendering.
//!
//! Draws cached detections onto a served frame: decode the JPEG, draw a
//! 2px rectangle per detection, re-encode at the serving quality. Applied
//! only in the serving path and only while the detection cache is fresh,
//! so the capture loop never pays for it.

use anyhow::Result;
use image::RgbImage;

use super::Detection;
use crate::encode;

const BOX_THICKNESS: u32 = 2;

/// Fixed colors for common labels; anything else gets a stable color
/// derived from the label bytes.
fn color_for(label: &str) -> [u8; 3] {
    match label {
        "person" => [0, 255, 0],
        "car" => [255, 0, 0],
        "truck" => [0, 0, 255],
        "dog" => [255, 255, 0],
        "cat" => [255, 0, 255],
        other => {
            let seed = other.bytes().fold(0u32, |acc, b| {
                acc.wrapping_mul(31).wrapping_add(b as u32)
            });
            [
                (seed & 0xFF) as u8 | 0x40,
                ((seed >> 8) & 0xFF) as u8 | 0x40,
                ((seed >> 16) & 0xFF) as u8 | 0x40,
            ]
        }
    }
}

/// Decode `jpeg`, draw every detection box, re-encode at `quality`.
pub fn render(jpeg: &[u8], detections: &[Detection], quality: u8) -> Result<Vec<u8>> {
    let mut image = encode::decode_jpeg(jpeg)?;
    for detection in detections {
        draw_box(&mut image, detection);
    }
    encode::encode_rgb(&image, quality)
}

fn draw_box(image: &mut RgbImage, detection: &Detection) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let clamp_x = |v: f32| (v.max(0.0) as u32).min(width - 1);
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(height - 1);
    let [bx1, by1, bx2, by2] = detection.bbox;
    let x1 = clamp_x(bx1.min(bx2));
    let x2 = clamp_x(bx1.max(bx2));
    let y1 = clamp_y(by1.min(by2));
    let y2 = clamp_y(by1.max(by2));
    let color = image::Rgb(color_for(&detection.label));

    for t in 0..BOX_THICKNESS {
        let top = (y1 + t).min(height - 1);
        let bottom = y2.saturating_sub(t);
        for x in x1..=x2 {
            image.put_pixel(x, top, color);
            image.put_pixel(x, bottom, color);
        }
        let left = (x1 + t).min(width - 1);
        let right = x2.saturating_sub(t);
        for y in y1..=y2 {
            image.put_pixel(left, y, color);
            image.put_pixel(right, y, color);
        }
    }
}
