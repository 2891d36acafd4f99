//! Two-stage recognition: grid detector, class filter, NMS, breed classifier.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};

use crate::classify::BreedClassifier;
use crate::detect::{decode, filter, nms, DetectorBackend, Detection, ModelInput};
use crate::frame::Frame;
use crate::labels::LabelTables;

/// Anything that turns a frame into labelled detections in frame coordinates.
pub trait Recognizer: Send {
    fn name(&self) -> &str;

    fn recognize(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Tunables for `BreedRecognizer`.
#[derive(Clone, Debug, PartialEq)]
pub struct RecognizerSettings {
    /// Detector input side length.
    pub input_size: u32,
    pub score_threshold: f32,
    pub iou_threshold: f32,
    pub breed_threshold: f32,
    pub allowed_classes: BTreeSet<usize>,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            input_size: 416,
            score_threshold: 0.5,
            iou_threshold: nms::DEFAULT_IOU_THRESHOLD,
            breed_threshold: 0.5,
            allowed_classes: filter::default_allowed_classes(),
        }
    }
}

pub struct BreedRecognizer {
    detector: Box<dyn DetectorBackend>,
    classifier: BreedClassifier,
    labels: Arc<LabelTables>,
    settings: RecognizerSettings,
}

impl BreedRecognizer {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        classifier: BreedClassifier,
        labels: Arc<LabelTables>,
        settings: RecognizerSettings,
    ) -> Self {
        Self {
            detector,
            classifier,
            labels,
            settings,
        }
    }

    pub fn settings(&self) -> &RecognizerSettings {
        &self.settings
    }
}

impl Recognizer for BreedRecognizer {
    fn name(&self) -> &str {
        self.detector.name()
    }

    fn recognize(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let size = self.settings.input_size;
        let rgb = frame.to_rgb_image()?;
        let model_image = imageops::resize(&rgb, size, size, FilterType::Nearest);
        let input = ModelInput::from_rgb(&model_image)?;

        let grid = self
            .detector
            .detect(&input)
            .with_context(|| format!("{} detector inference failed", self.detector.name()))?;

        let candidates = decode::decode(
            &grid,
            self.labels.coarse(),
            size,
            size,
            self.settings.score_threshold,
        );
        let decoded = candidates.len();
        let allowed = filter::filter(candidates, &self.settings.allowed_classes);
        let kept = nms::suppress(allowed, self.settings.iou_threshold);
        let labelled = self
            .classifier
            .classify(&model_image, &kept, self.settings.breed_threshold);
        log::debug!(
            "frame {}: {} decoded, {} after nms, {} labelled",
            frame.sequence,
            decoded,
            kept.len(),
            labelled.len()
        );

        let sx = frame.width as f32 / size as f32;
        let sy = frame.height as f32 / size as f32;
        Ok(labelled.iter().map(|det| det.scaled(sx, sy)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawGrid, StubClassifier, StubDetector};
    use crate::geometry::Rect;
    use crate::labels::BreedVocabulary;
    use image::RgbImage;

    fn labels() -> Arc<LabelTables> {
        let mut coarse: Vec<String> = (0..17).map(|i| format!("c{i}")).collect();
        coarse[16] = "dog".to_string();
        Arc::new(LabelTables::new(
            coarse,
            BreedVocabulary::parse("n1\n", "n1\tbeagle\n", "n1\n"),
        ))
    }

    fn recognizer(detector: StubDetector) -> BreedRecognizer {
        let labels = labels();
        let classifier = BreedClassifier::new(
            Box::new(StubClassifier::new(vec![0.0, 0.9])),
            labels.clone(),
            16,
        );
        BreedRecognizer::new(
            Box::new(detector),
            classifier,
            labels,
            RecognizerSettings {
                input_size: 100,
                ..RecognizerSettings::default()
            },
        )
    }

    fn one_hot(class_index: usize, score: f32) -> Vec<f32> {
        let mut scores = vec![0.0; 17];
        scores[class_index] = score;
        scores
    }

    #[test]
    fn maps_labelled_boxes_back_to_frame_space() -> Result<()> {
        let mut detector = StubDetector::default();
        detector.push(RawGrid::new(
            vec![[50.0, 50.0, 20.0, 20.0], [50.0, 50.0, 18.0, 18.0], [10.0, 10.0, 8.0, 8.0]],
            [one_hot(16, 0.9), one_hot(16, 0.8), one_hot(0, 0.99)].concat(),
            17,
        )?);
        let mut recognizer = recognizer(detector);
        let frame = Frame::from_image(RgbImage::new(200, 300), 0)?;

        let out = recognizer.recognize(&frame)?;
        // duplicate dog suppressed, person-class box filtered out
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label(), "dog");
        assert_eq!(out[0].breed_label(), Some("beagle"));
        assert_eq!(out[0].bbox(), Rect::new(80.0, 120.0, 120.0, 180.0));
        Ok(())
    }

    #[test]
    fn detector_failure_is_an_error() -> Result<()> {
        let mut detector = StubDetector::default();
        detector.push_failure("tensor shape mismatch");
        let mut recognizer = recognizer(detector);
        let frame = Frame::from_image(RgbImage::new(50, 50), 0)?;
        let err = recognizer.recognize(&frame).unwrap_err();
        assert!(format!("{err:#}").contains("tensor shape mismatch"));
        Ok(())
    }
}
