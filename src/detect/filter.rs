use std::collections::BTreeSet;

use crate::detect::result::Detection;

/// Coarse classes kept by default: the animal classes of the 80-class
/// vocabulary (bird through giraffe) plus teddy bear.
pub const DEFAULT_ALLOWED_CLASSES: [usize; 11] = [14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 77];

pub fn default_allowed_classes() -> BTreeSet<usize> {
    DEFAULT_ALLOWED_CLASSES.into_iter().collect()
}

/// Keep detections whose class is in `allowed`, preserving order.
pub fn filter(detections: Vec<Detection>, allowed: &BTreeSet<usize>) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|det| allowed.contains(&det.class_index()))
        .collect()
}
