use anyhow::Result;

use crate::detect::backend::{DetectorBackend, ModelCapability, ModelInput, RawGrid};

/// Luma above which a pixel counts as part of the subject.
const DEFAULT_LUMA_THRESHOLD: f32 = 0.8;
/// Fewer bright pixels than this is treated as an empty scene.
const DEFAULT_MIN_PIXELS: usize = 16;

/// CPU detector for bright subjects on a dark background.
///
/// Emits a single-cell grid covering the bounding box of all bright pixels,
/// scored by how much of that box is filled. Pairs with the synthetic
/// `stub://` frame source so the full pipeline runs without model files.
pub struct CpuBlobDetector {
    class_index: usize,
    num_classes: usize,
    luma_threshold: f32,
    min_pixels: usize,
}

impl CpuBlobDetector {
    pub fn new(class_index: usize, num_classes: usize) -> Self {
        Self {
            class_index,
            num_classes: num_classes.max(class_index + 1),
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            min_pixels: DEFAULT_MIN_PIXELS,
        }
    }
}

impl DetectorBackend for CpuBlobDetector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn supports(&self, capability: ModelCapability) -> bool {
        matches!(capability, ModelCapability::GridDetection)
    }

    fn detect(&mut self, input: &ModelInput) -> Result<RawGrid> {
        let size = input.size();
        let mut count = 0usize;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);

        for y in 0..size {
            for x in 0..size {
                let luma = 0.299 * input.at(x, y, 0)
                    + 0.587 * input.at(x, y, 1)
                    + 0.114 * input.at(x, y, 2);
                if luma > self.luma_threshold {
                    count += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        if count < self.min_pixels {
            return RawGrid::new(Vec::new(), Vec::new(), self.num_classes);
        }

        let w = (max_x - min_x + 1) as f32;
        let h = (max_y - min_y + 1) as f32;
        let fill = (count as f32 / (w * h)).clamp(0.0, 1.0);
        let cell = [min_x as f32 + w / 2.0, min_y as f32 + h / 2.0, w, h];
        let mut scores = vec![0.0; self.num_classes];
        scores[self.class_index] = fill;

        RawGrid::new(vec![cell], scores, self.num_classes)
    }
}
