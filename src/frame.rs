//! Frames: single-channel bitmaps on their way to the panel.

use image::GrayImage;

/// Where a frame's pixels came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Screenshot taken by the render session
    Captured,
    /// Programmatically drawn (test pattern, placeholder)
    Synthesized,
}

/// A single-channel 8-bit bitmap plus its provenance.
///
/// Frames are created once per cycle, normalized by the image processor and
/// discarded after the display commit. The display controller keeps the last
/// committed frame for its partial-refresh bookkeeping.
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: GrayImage,
    origin: FrameOrigin,
}

impl Frame {
    /// Wrap a screenshot taken by the render session.
    pub fn captured(pixels: GrayImage) -> Self {
        Self {
            pixels,
            origin: FrameOrigin::Captured,
        }
    }

    /// Wrap a programmatically drawn bitmap.
    pub fn synthesized(pixels: GrayImage) -> Self {
        Self {
            pixels,
            origin: FrameOrigin::Synthesized,
        }
    }

    /// Build a frame from pixels while keeping an existing provenance.
    pub fn with_origin(pixels: GrayImage, origin: FrameOrigin) -> Self {
        Self { pixels, origin }
    }

    /// Decode PNG screenshot bytes into a grayscale frame.
    pub fn from_png(bytes: &[u8]) -> Result<Self, String> {
        let decoded = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
        Ok(Self::captured(decoded.to_luma8()))
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// True when the frame carries no pixels at all.
    pub fn is_empty(&self) -> bool {
        self.pixels.width() == 0 || self.pixels.height() == 0
    }

    /// Borrow the underlying pixel grid.
    pub fn pixels(&self) -> &GrayImage {
        &self.pixels
    }

    /// Consume the frame, returning the pixel grid.
    pub fn into_pixels(self) -> GrayImage {
        self.pixels
    }

    /// The frame's provenance.
    pub fn origin(&self) -> FrameOrigin {
        self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_origin_tracking() {
        let img = GrayImage::from_pixel(4, 4, Luma([128]));
        assert_eq!(Frame::captured(img.clone()).origin(), FrameOrigin::Captured);
        assert_eq!(
            Frame::synthesized(img).origin(),
            FrameOrigin::Synthesized
        );
    }

    #[test]
    fn test_from_png_round_trip() {
        let img = GrayImage::from_pixel(8, 6, Luma([200]));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();

        let frame = Frame::from_png(&bytes).unwrap();
        assert_eq!(frame.width(), 8);
        assert_eq!(frame.height(), 6);
        assert_eq!(frame.origin(), FrameOrigin::Captured);
        assert_eq!(frame.pixels().get_pixel(0, 0).0[0], 200);
    }

    #[test]
    fn test_from_png_rejects_garbage() {
        assert!(Frame::from_png(&[0, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_is_empty() {
        let img = GrayImage::new(0, 0);
        assert!(Frame::synthesized(img).is_empty());

        let img = GrayImage::from_pixel(1, 1, Luma([0]));
        assert!(!Frame::synthesized(img).is_empty());
    }
}
