#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{
    ClassifierBackend, DetectorBackend, ModelCapability, ModelInput, RawGrid, TensorLayout,
};

type Plan = TypedRunnableModel<TypedModel>;

/// A loaded ONNX model with a fixed square input.
struct TractModel {
    plan: Plan,
    size: u32,
    layout: TensorLayout,
}

impl TractModel {
    fn load(model_path: &Path, size: u32, layout: TensorLayout) -> Result<Self> {
        let s = size as usize;
        let fact: InferenceFact = match layout {
            TensorLayout::Nhwc => f32::fact([1, s, s, 3]).into(),
            TensorLayout::Nchw => f32::fact([1, 3, s, s]).into(),
        };
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, fact)
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        Ok(Self { plan, size, layout })
    }

    fn build_input(&self, input: &ModelInput) -> Result<Tensor> {
        if input.size() != self.size {
            return Err(anyhow!(
                "input size {} does not match model input {}",
                input.size(),
                self.size
            ));
        }
        let s = self.size as usize;
        let tensor = match self.layout {
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, s, s, 3), |(_, y, x, c)| {
                    input.at(x as u32, y as u32, c)
                })
            }
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, s, s), |(_, c, y, x)| {
                    input.at(x as u32, y as u32, c)
                })
            }
        };
        Ok(tensor.into_tensor())
    }

    fn run(&self, input: &ModelInput) -> Result<TVec<TValue>> {
        let tensor = self.build_input(input)?;
        self.plan
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")
    }
}

fn output_values(outputs: &TVec<TValue>, index: usize) -> Result<(Vec<f32>, Vec<usize>)> {
    let output = outputs
        .get(index)
        .ok_or_else(|| anyhow!("model produced no output #{}", index))?;
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    Ok((view.iter().copied().collect(), view.shape().to_vec()))
}

/// Grid detector over ONNX.
///
/// Output 0 is `[1, cells, 4]` (center x, center y, width, height in input
/// pixels) and output 1 is `[1, cells, classes]`.
pub struct TractDetector {
    model: TractModel,
}

impl TractDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, size: u32, layout: TensorLayout) -> Result<Self> {
        Ok(Self {
            model: TractModel::load(model_path.as_ref(), size, layout)?,
        })
    }
}

impl DetectorBackend for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: ModelCapability) -> bool {
        matches!(capability, ModelCapability::GridDetection)
    }

    fn detect(&mut self, input: &ModelInput) -> Result<RawGrid> {
        let outputs = self.model.run(input)?;
        let (boxes, box_shape) = output_values(&outputs, 0)?;
        let (scores, score_shape) = output_values(&outputs, 1)?;

        if box_shape.last() != Some(&4) {
            return Err(anyhow!("box tensor has shape {:?}, expected [..., 4]", box_shape));
        }
        let num_classes = *score_shape
            .last()
            .ok_or_else(|| anyhow!("score tensor has no dimensions"))?;
        let boxes = boxes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        RawGrid::new(boxes, scores, num_classes)
    }
}

/// Classifier over ONNX; output 0 is the score vector.
pub struct TractClassifier {
    model: TractModel,
}

impl TractClassifier {
    pub fn new<P: AsRef<Path>>(model_path: P, size: u32, layout: TensorLayout) -> Result<Self> {
        Ok(Self {
            model: TractModel::load(model_path.as_ref(), size, layout)?,
        })
    }
}

impl ClassifierBackend for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: ModelCapability) -> bool {
        matches!(capability, ModelCapability::Classification)
    }

    fn classify(&mut self, input: &ModelInput) -> Result<Vec<f32>> {
        let outputs = self.model.run(input)?;
        let (scores, _) = output_values(&outputs, 0)?;
        Ok(scores)
    }
}
