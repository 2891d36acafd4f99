use serde::Serialize;

use crate::geometry::Rect;

/// A single detected object.
///
/// Detections are values: later stages never edit one in place, they derive a
/// new detection with `with_breed_label` or `scaled`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    id: String,
    class_index: usize,
    label: String,
    breed_label: Option<String>,
    confidence: f32,
    bbox: Rect,
}

impl Detection {
    pub fn new(
        id: impl Into<String>,
        class_index: usize,
        label: impl Into<String>,
        confidence: f32,
        bbox: Rect,
    ) -> Self {
        Self {
            id: id.into(),
            class_index,
            label: label.into(),
            breed_label: None,
            confidence,
            bbox,
        }
    }

    /// Identifier unique within one frame only.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn class_index(&self) -> usize {
        self.class_index
    }

    /// Coarse class name.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Fine-grained label assigned by the second stage, if any.
    pub fn breed_label(&self) -> Option<&str> {
        self.breed_label.as_deref()
    }

    /// Detector-stage score.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> Rect {
        self.bbox
    }

    /// Copy of this detection carrying a fine-grained label.
    pub fn with_breed_label(&self, breed: impl Into<String>) -> Self {
        Self {
            breed_label: Some(breed.into()),
            ..self.clone()
        }
    }

    /// Copy of this detection with its box scaled into another image space.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            bbox: self.bbox.scaled(sx, sy),
            ..self.clone()
        }
    }
}
