//! Second-stage fine-grained classification.
//!
//! Each surviving detection is cropped out of the image that produced it,
//! resized (nearest neighbour) to the classifier input, and scored. Every
//! label scoring above the threshold yields its own copy of the detection, so
//! one box can fan out into several labelled detections.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::detect::{ClassifierBackend, Detection, ModelInput};
use crate::labels::LabelTables;

/// Classifier input side length.
pub const DEFAULT_CLASSIFIER_INPUT_SIZE: u32 = 224;

pub struct BreedClassifier {
    backend: Box<dyn ClassifierBackend>,
    labels: Arc<LabelTables>,
    input_size: u32,
}

impl BreedClassifier {
    pub fn new(
        backend: Box<dyn ClassifierBackend>,
        labels: Arc<LabelTables>,
        input_size: u32,
    ) -> Self {
        Self {
            backend,
            labels,
            input_size,
        }
    }

    /// Label every detection in `detections` against `source`.
    ///
    /// Detections with an empty crop or a failed inference are skipped; the
    /// rest of the batch continues.
    pub fn classify(
        &mut self,
        source: &RgbImage,
        detections: &[Detection],
        confidence_threshold: f32,
    ) -> Vec<Detection> {
        let mut labelled = Vec::new();
        for det in detections {
            let Some(crop) = self.crop(source, det) else {
                log::debug!("classify: detection {} has an empty crop", det.id());
                continue;
            };
            let input = match ModelInput::from_rgb(&crop) {
                Ok(input) => input,
                Err(e) => {
                    log::warn!("classify: detection {}: {:#}", det.id(), e);
                    continue;
                }
            };
            let scores = match self.backend.classify(&input) {
                Ok(scores) => scores,
                Err(e) => {
                    log::warn!(
                        "classify: {} inference failed for detection {}: {:#}",
                        self.backend.name(),
                        det.id(),
                        e
                    );
                    continue;
                }
            };

            for (index, &score) in scores.iter().enumerate() {
                if score <= confidence_threshold {
                    continue;
                }
                match self.labels.breeds().name_for_index(index) {
                    Some(name) => labelled.push(det.with_breed_label(name)),
                    None => log::debug!(
                        "classify: score index {} ({:.2}) has no named label",
                        index,
                        score
                    ),
                }
            }
        }
        labelled
    }

    /// Integer crop of the detection box, resized to the classifier input.
    fn crop(&self, source: &RgbImage, det: &Detection) -> Option<RgbImage> {
        let bbox = det.bbox();
        if !bbox.is_finite() {
            return None;
        }
        let left = bbox.left.max(0.0) as u32;
        let top = bbox.top.max(0.0) as u32;
        let width = bbox.width().max(0.0) as u32;
        let height = bbox.height().max(0.0) as u32;
        let width = width.min(source.width().saturating_sub(left));
        let height = height.min(source.height().saturating_sub(top));
        if width == 0 || height == 0 {
            return None;
        }
        let crop = imageops::crop_imm(source, left, top, width, height).to_image();
        Some(imageops::resize(
            &crop,
            self.input_size,
            self.input_size,
            FilterType::Nearest,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use image::Rgb;

    use crate::detect::{ModelCapability, StubClassifier};
    use crate::geometry::Rect;
    use crate::labels::BreedVocabulary;

    fn tables() -> Arc<LabelTables> {
        Arc::new(LabelTables::new(
            vec!["dog".to_string()],
            BreedVocabulary::parse(
                "n1\nn2\nn3\n",
                "n1\tbeagle\nn2\tpug\nn3\tcorgi\n",
                "n1\nn2\n",
            ),
        ))
    }

    fn det(bbox: Rect) -> Detection {
        Detection::new("0", 16, "dog", 0.9, bbox)
    }

    /// Records inputs and fails on demand.
    struct Recording {
        seen: Arc<Mutex<Vec<ModelInput>>>,
        fail_first: bool,
        scores: Vec<f32>,
    }

    impl ClassifierBackend for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn supports(&self, capability: ModelCapability) -> bool {
            matches!(capability, ModelCapability::Classification)
        }

        fn classify(&mut self, input: &ModelInput) -> Result<Vec<f32>> {
            if self.fail_first {
                self.fail_first = false;
                return Err(anyhow!("delegate crashed"));
            }
            self.seen
                .lock()
                .map_err(|_| anyhow!("recording lock poisoned"))?
                .push(input.clone());
            Ok(self.scores.clone())
        }
    }

    #[test]
    fn fans_out_one_detection_per_label_above_threshold() {
        let backend = StubClassifier::new(vec![0.0, 0.6, 0.7, 0.2]);
        let mut classifier = BreedClassifier::new(Box::new(backend), tables(), 8);
        let source = RgbImage::new(100, 100);

        let out = classifier.classify(&source, &[det(Rect::new(10.0, 10.0, 50.0, 50.0))], 0.5);
        let breeds: Vec<_> = out.iter().map(|d| d.breed_label()).collect();
        assert_eq!(breeds, vec![Some("beagle"), Some("pug")]);
        assert!(out.iter().all(|d| d.id() == "0" && d.label() == "dog"));
    }

    #[test]
    fn unnamed_indices_and_low_scores_produce_nothing() {
        // index 3 maps to a code outside the whitelist
        let backend = StubClassifier::new(vec![0.9, 0.1, 0.0, 0.95]);
        let mut classifier = BreedClassifier::new(Box::new(backend), tables(), 8);
        let out = classifier.classify(
            &RgbImage::new(64, 64),
            &[det(Rect::new(0.0, 0.0, 32.0, 32.0))],
            0.5,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn inference_failure_skips_only_that_detection() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recording = Recording {
            seen: seen.clone(),
            fail_first: true,
            scores: vec![0.0, 0.9],
        };
        let mut classifier = BreedClassifier::new(Box::new(recording), tables(), 4);
        let boxes = [
            det(Rect::new(0.0, 0.0, 20.0, 20.0)),
            det(Rect::new(20.0, 20.0, 40.0, 40.0)),
        ];

        let out = classifier.classify(&RgbImage::new(64, 64), &boxes, 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox(), boxes[1].bbox());
    }

    #[test]
    fn crop_is_nearest_resized_and_normalized() -> Result<()> {
        let mut source = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        // left half of the crop white, right half black
        for y in 4..8 {
            for x in 4..6 {
                source.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recording = Recording {
            seen: seen.clone(),
            fail_first: false,
            scores: vec![],
        };
        let mut classifier = BreedClassifier::new(Box::new(recording), tables(), 8);
        classifier.classify(&source, &[det(Rect::new(4.5, 4.9, 8.9, 8.2))], 0.5);

        let seen = seen.lock().map_err(|_| anyhow!("poisoned"))?;
        assert_eq!(seen.len(), 1);
        let input = &seen[0];
        assert_eq!(input.size(), 8);
        assert_eq!(input.at(0, 0, 0), 1.0);
        assert_eq!(input.at(7, 7, 0), 0.0);
        Ok(())
    }

    #[test]
    fn empty_and_out_of_bounds_crops_are_skipped() {
        let backend = StubClassifier::new(vec![0.0, 0.9]);
        let mut classifier = BreedClassifier::new(Box::new(backend), tables(), 8);
        let out = classifier.classify(
            &RgbImage::new(32, 32),
            &[
                det(Rect::new(5.0, 5.0, 5.5, 20.0)),
                det(Rect::new(40.0, 40.0, 60.0, 60.0)),
            ],
            0.5,
        );
        assert!(out.is_empty());
    }
}
