//! Video frames as handed to the pipeline.
//!
//! A `Frame` owns packed RGB24 pixels plus the sensor orientation the image
//! source reported. Raw sensor layouts are converted once, at construction.

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::ingest::normalize::{normalize_to_rgb, PixelFormat};

#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation (degrees) from sensor to display orientation.
    pub sensor_orientation: u32,
    /// Position in the source's frame sequence.
    pub sequence: u64,
}

impl Frame {
    /// Build a frame from a raw sensor buffer.
    pub fn from_raw(
        raw: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        sensor_orientation: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if sensor_orientation % 90 != 0 {
            return Err(anyhow!(
                "sensor orientation {} is not a multiple of 90",
                sensor_orientation
            ));
        }
        let pixels = normalize_to_rgb(raw, width, height, format)?;
        Ok(Self {
            pixels,
            width,
            height,
            sensor_orientation: sensor_orientation % 360,
            sequence: 0,
        })
    }

    pub fn from_image(image: RgbImage, sensor_orientation: u32) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::from_raw(
            image.as_raw(),
            width,
            height,
            PixelFormat::Rgb24,
            sensor_orientation,
        )
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Packed RGB24 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sensor_orientation", &self.sensor_orientation)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}
