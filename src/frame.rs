//! Decoded video frames.
//!
//! - `Frame`: one RGB24 image plus its position in the stream.
//! - `FrameTransform`: per-pipeline preprocessing (mirroring, resizing).
//!
//! Frames are produced by an ingest source, handed to a detector and a policy,
//! and dropped at the end of the loop iteration.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};

/// One decoded frame.
///
/// Pixels are tightly packed RGB24, row-major, with no stride padding.
#[derive(Debug)]
pub struct Frame {
    image: RgbImage,
    /// Zero-based position of this frame in its source.
    pub index: u64,
}

impl Frame {
    /// Build a frame from a packed RGB24 buffer.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;
        Ok(Self { image, index })
    }

    pub fn from_image(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    /// A frame filled with a single colour. Handy for synthetic sources.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], index: u64) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
            index,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Packed RGB24 bytes.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Mirror the frame left-to-right in place.
    pub fn mirror(&mut self) {
        imageops::flip_horizontal_in_place(&mut self.image);
    }

    /// Resize to exactly `width`x`height`. No-op when already that size.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.image.width() == width && self.image.height() == height {
            return;
        }
        self.image = imageops::resize(&self.image, width, height, imageops::FilterType::Triangle);
    }
}

/// Preprocessing applied to every frame before detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameTransform {
    pub mirror: bool,
    pub resize: Option<(u32, u32)>,
}

impl FrameTransform {
    pub fn apply(&self, frame: &mut Frame) {
        if let Some((width, height)) = self.resize {
            frame.resize(width, height);
        }
        if self.mirror {
            frame.mirror();
        }
    }
}
