use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::Deserialize;

/// Capabilities a model backend can provide.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelCapability {
    /// Dense grid output: per-cell box plus per-class scores.
    GridDetection,
    /// Single score vector over a label set.
    Classification,
}

/// Input tensor layout expected by a model file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, size, size, 3]`, the layout of models converted from TFLite.
    #[default]
    Nhwc,
    /// `[1, 3, size, size]`.
    Nchw,
}

/// Square RGB model input, HWC order, channels normalized to `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelInput {
    size: u32,
    data: Vec<f32>,
}

impl ModelInput {
    /// Normalize a square RGB image. Each channel is divided by 255.
    pub fn from_rgb(image: &RgbImage) -> Result<Self> {
        if image.width() != image.height() {
            return Err(anyhow!(
                "model input must be square, got {}x{}",
                image.width(),
                image.height()
            ));
        }
        let data = image
            .as_raw()
            .iter()
            .map(|&channel| channel as f32 / 255.0)
            .collect();
        Ok(Self {
            size: image.width(),
            data,
        })
    }

    /// Side length in pixels.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Channel value at `(x, y, channel)`.
    pub fn at(&self, x: u32, y: u32, channel: usize) -> f32 {
        let idx = (y as usize * self.size as usize + x as usize) * 3 + channel;
        self.data[idx]
    }
}

/// Raw output of a grid detector.
///
/// `boxes[i]` is `[center_x, center_y, width, height]` in absolute model-input
/// pixels and `scores` holds `num_classes` values per cell, row-major.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawGrid {
    boxes: Vec<[f32; 4]>,
    scores: Vec<f32>,
    num_classes: usize,
}

impl RawGrid {
    pub fn new(boxes: Vec<[f32; 4]>, scores: Vec<f32>, num_classes: usize) -> Result<Self> {
        let expected = boxes
            .len()
            .checked_mul(num_classes)
            .ok_or_else(|| anyhow!("grid dimensions overflow"))?;
        if scores.len() != expected {
            return Err(anyhow!(
                "grid score tensor length mismatch: expected {} ({} cells x {} classes), got {}",
                expected,
                boxes.len(),
                num_classes,
                scores.len()
            ));
        }
        Ok(Self {
            boxes,
            scores,
            num_classes,
        })
    }

    pub fn cells(&self) -> usize {
        self.boxes.len()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn cell_box(&self, cell: usize) -> [f32; 4] {
        self.boxes[cell]
    }

    pub fn cell_scores(&self, cell: usize) -> &[f32] {
        let start = cell * self.num_classes;
        &self.scores[start..start + self.num_classes]
    }
}

/// First-stage detector backend.
///
/// Backends own their model state; `detect` takes `&mut self` so implementations
/// may reuse scratch buffers between frames.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: ModelCapability) -> bool;

    /// Run the detector on a square, normalized input.
    fn detect(&mut self, input: &ModelInput) -> Result<RawGrid>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Second-stage classifier backend.
pub trait ClassifierBackend: Send {
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: ModelCapability) -> bool;

    /// Score vector for one crop. Index `i` corresponds to label ordinal `i`.
    fn classify(&mut self, input: &ModelInput) -> Result<Vec<f32>>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
