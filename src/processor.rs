//! Image normalization for e-paper output.
//!
//! Pure functions: resize, gray-level reduction, rotation and
//! error-diffusion dithering. Processing never fails a cycle; any internal
//! problem degrades to the best partially-processed image instead.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

use crate::config::{PanelMode, Rotation};
use crate::frame::Frame;

/// Normalize a frame for the panel.
///
/// Resizes to the target dimensions with Lanczos resampling when the source
/// size differs, applies the rotation (expanding the canvas), and reduces
/// gray levels according to `mode`: two-level output is dithered with
/// Floyd-Steinberg error diffusion, 16-level output is left as full
/// grayscale for the panel controller's own quantization.
///
/// The input frame is never mutated.
pub fn normalize(
    frame: &Frame,
    target_width: u32,
    target_height: u32,
    rotation: Rotation,
    mode: PanelMode,
) -> Frame {
    let mut img = frame.pixels().clone();

    if img.dimensions() != (target_width, target_height) {
        tracing::debug!(
            from_width = img.width(),
            from_height = img.height(),
            to_width = target_width,
            to_height = target_height,
            "resizing frame"
        );
        img = imageops::resize(&img, target_width, target_height, FilterType::Lanczos3);
    }

    img = match rotation {
        Rotation::None => img,
        Rotation::Cw90 => imageops::rotate90(&img),
        Rotation::Cw180 => imageops::rotate180(&img),
        Rotation::Cw270 => imageops::rotate270(&img),
    };

    let img = match mode {
        PanelMode::BlackWhite => dither(img),
        PanelMode::Gray16 => img,
    };

    Frame::with_origin(img, frame.origin())
}

/// Floyd-Steinberg error diffusion to {0, 255}.
///
/// Row-major over interior pixels only: the first and last columns and the
/// last row keep their grayscale value so error never diffuses out of
/// bounds. Quantization error spreads 7/16 right, 3/16 below-left, 5/16
/// below and 1/16 below-right. Deterministic: identical input produces
/// byte-identical output.
fn dither(img: GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    if width < 3 || height < 2 {
        return img;
    }

    let w = width as usize;
    let mut buf: Vec<f32> = img.pixels().map(|p| f32::from(p.0[0])).collect();

    for y in 0..(height as usize - 1) {
        for x in 1..(w - 1) {
            let idx = y * w + x;
            let old = buf[idx];
            let new = if old > 127.0 { 255.0 } else { 0.0 };
            buf[idx] = new;

            let err = old - new;
            buf[idx + 1] += err * 7.0 / 16.0;
            buf[idx + w - 1] += err * 3.0 / 16.0;
            buf[idx + w] += err * 5.0 / 16.0;
            buf[idx + w + 1] += err * 1.0 / 16.0;
        }
    }

    let data: Vec<u8> = buf.into_iter().map(|v| v.clamp(0.0, 255.0) as u8).collect();
    match GrayImage::from_raw(width, height, data) {
        Some(dithered) => dithered,
        None => {
            tracing::warn!("dithering buffer mismatch, keeping plain grayscale");
            img
        }
    }
}

/// Draw the synthesized test pattern: shade bars, a checker grid and a
/// border on a white background. Used by the display test mode and as the
/// placeholder for the unimplemented custom dashboard path.
pub fn test_pattern(width: u32, height: u32) -> Frame {
    let mut img = GrayImage::from_pixel(width, height, Luma([255]));

    // Shade bars from black to white across the upper third
    let shades: [u8; 5] = [0, 64, 128, 192, 255];
    let bar_width = width / shades.len() as u32;
    let bar_height = height / 3;
    for (i, shade) in shades.iter().enumerate() {
        let x0 = i as u32 * bar_width;
        fill_rect(&mut img, x0, 0, bar_width, bar_height, *shade);
    }

    // Checker grid across the middle third
    let cell = (width / 20).max(1);
    for gy in 0..(height / 3).div_euclid(cell) {
        for gx in 0..width.div_euclid(cell) {
            if (gx + gy) % 2 == 0 {
                fill_rect(&mut img, gx * cell, bar_height + gy * cell, cell, cell, 0);
            }
        }
    }

    // Border
    let thickness = (width / 100).max(1);
    fill_rect(&mut img, 0, 0, width, thickness, 0);
    fill_rect(&mut img, 0, height.saturating_sub(thickness), width, thickness, 0);
    fill_rect(&mut img, 0, 0, thickness, height, 0);
    fill_rect(&mut img, width.saturating_sub(thickness), 0, thickness, height, 0);

    Frame::synthesized(img)
}

fn fill_rect(img: &mut GrayImage, x: u32, y: u32, w: u32, h: u32, shade: u8) {
    let x1 = (x + w).min(img.width());
    let y1 = (y + h).min(img.height());
    for py in y..y1 {
        for px in x..x1 {
            img.put_pixel(px, py, Luma([shade]));
        }
    }
}
