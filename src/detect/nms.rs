//! Class-wise greedy non-maximum suppression.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use crate::detect::result::Detection;
use crate::geometry;

/// IoU at or above which a lower-scored box of the same class is dropped.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.25;

/// Heap entry ordered by confidence, earlier insertion first on ties.
struct Ranked {
    seq: usize,
    detection: Detection,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.detection
            .confidence()
            .total_cmp(&other.detection.confidence())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Suppress overlapping detections per class.
///
/// Classes are processed in ascending class index. Within a class the highest
/// confidence box is emitted, every remaining box with IoU >= `iou_threshold`
/// against it is dropped, and the survivors go back on the heap.
pub fn suppress(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut by_class: BTreeMap<usize, BinaryHeap<Ranked>> = BTreeMap::new();
    for (seq, detection) in detections.into_iter().enumerate() {
        by_class
            .entry(detection.class_index())
            .or_default()
            .push(Ranked { seq, detection });
    }

    let mut kept = Vec::new();
    for (class_index, mut heap) in by_class {
        let candidates = heap.len();
        let before = kept.len();
        while let Some(best) = heap.pop() {
            let best_box = best.detection.bbox();
            heap = heap
                .into_iter()
                .filter(|other| geometry::iou(&best_box, &other.detection.bbox()) < iou_threshold)
                .collect();
            kept.push(best.detection);
        }
        log::debug!(
            "nms: class {} kept {} of {}",
            class_index,
            kept.len() - before,
            candidates
        );
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn det(id: &str, class_index: usize, confidence: f32, bbox: Rect) -> Detection {
        Detection::new(id, class_index, "x", confidence, bbox)
    }

    #[test]
    fn keeps_higher_scored_of_overlapping_pair() {
        let a = det("a", 5, 0.9, Rect::new(0.0, 0.0, 10.0, 10.0));
        let b = det("b", 5, 0.7, Rect::new(1.0, 1.0, 11.0, 11.0));
        let out = suppress(vec![b, a], 0.3);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), "a");
    }

    #[test]
    fn different_classes_never_suppress_each_other() {
        let a = det("a", 5, 0.9, Rect::new(0.0, 0.0, 10.0, 10.0));
        let b = det("b", 6, 0.7, Rect::new(0.0, 0.0, 10.0, 10.0));
        let out = suppress(vec![b, a], 0.3);
        let ids: Vec<&str> = out.iter().map(|d| d.id()).collect();
        // ascending class order
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn equal_confidence_prefers_earlier_detection() {
        let a = det("first", 1, 0.8, Rect::new(0.0, 0.0, 10.0, 10.0));
        let b = det("second", 1, 0.8, Rect::new(0.0, 0.0, 10.0, 10.0));
        let out = suppress(vec![a, b], 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), "first");
    }

    #[test]
    fn iou_exactly_at_threshold_is_suppressed() {
        // IoU = 50 / 150 = 1/3
        let a = det("a", 0, 0.9, Rect::new(0.0, 0.0, 10.0, 10.0));
        let b = det("b", 0, 0.8, Rect::new(5.0, 0.0, 15.0, 10.0));
        let iou = geometry::iou(&a.bbox(), &b.bbox());
        assert_eq!(suppress(vec![a.clone(), b.clone()], iou).len(), 1);
        assert_eq!(suppress(vec![a, b], iou + 0.01).len(), 2);
    }

    #[test]
    fn chain_of_boxes_recomputes_against_each_survivor() {
        // a overlaps b heavily, b overlaps c heavily, a and c are disjoint.
        let a = det("a", 0, 0.9, Rect::new(0.0, 0.0, 10.0, 10.0));
        let b = det("b", 0, 0.8, Rect::new(4.0, 0.0, 14.0, 10.0));
        let c = det("c", 0, 0.7, Rect::new(12.0, 0.0, 22.0, 10.0));
        let out = suppress(vec![c, b, a], 0.3);
        let ids: Vec<&str> = out.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn random_inputs_leave_no_overlapping_same_class_pair() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let n = rng.gen_range(0..40);
            let input: Vec<Detection> = (0..n)
                .map(|i| {
                    let x = rng.gen_range(0.0..100.0);
                    let y = rng.gen_range(0.0..100.0);
                    let w = rng.gen_range(1.0..40.0);
                    let h = rng.gen_range(1.0..40.0);
                    det(
                        &i.to_string(),
                        rng.gen_range(0..3),
                        rng.gen_range(0.0..1.0),
                        Rect::new(x, y, x + w, y + h),
                    )
                })
                .collect();
            let threshold = 0.3;
            let out = suppress(input.clone(), threshold);

            assert!(out.len() <= input.len());
            for kept in &out {
                assert!(input.contains(kept));
            }
            for (i, a) in out.iter().enumerate() {
                for b in out.iter().skip(i + 1) {
                    if a.class_index() == b.class_index() {
                        assert!(geometry::iou(&a.bbox(), &b.bbox()) < threshold);
                    }
                }
            }
        }
    }
}
