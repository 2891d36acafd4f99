//! Grid detector output decoding.

use crate::detect::backend::RawGrid;
use crate::detect::result::Detection;
use crate::geometry::Rect;

/// Turn raw per-cell tensors into candidate detections.
///
/// For each cell the class with the highest score wins (strict `>`, so the
/// lowest class index wins ties). Cells whose best score does not exceed
/// `score_threshold` are skipped. Boxes are clamped to
/// `[0, image_width - 1] x [0, image_height - 1]`.
pub fn decode(
    grid: &RawGrid,
    labels: &[String],
    image_width: u32,
    image_height: u32,
    score_threshold: f32,
) -> Vec<Detection> {
    let max_x = image_width.saturating_sub(1) as f32;
    let max_y = image_height.saturating_sub(1) as f32;
    let mut detections = Vec::new();

    for cell in 0..grid.cells() {
        let Some((class_index, score)) = best_class(grid.cell_scores(cell)) else {
            continue;
        };
        if score <= score_threshold {
            continue;
        }

        let [cx, cy, w, h] = grid.cell_box(cell);
        let x1 = cx - w / 2.0;
        let x2 = cx + w / 2.0;
        let y1 = cy - h / 2.0;
        let y2 = cy + h / 2.0;
        let bbox = Rect::new(
            x1.min(x2).clamp(0.0, max_x),
            y1.min(y2).clamp(0.0, max_y),
            x1.max(x2).clamp(0.0, max_x),
            y1.max(y2).clamp(0.0, max_y),
        );
        if !bbox.is_finite() {
            log::debug!("decode: cell {} has non-finite geometry, skipped", cell);
            continue;
        }

        let label = labels
            .get(class_index)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_index}"));
        detections.push(Detection::new(
            cell.to_string(),
            class_index,
            label,
            score,
            bbox,
        ));
    }

    detections
}

fn best_class(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    let mut max_score = 0.0f32;
    for (class_index, &score) in scores.iter().enumerate() {
        if score > max_score {
            max_score = score;
            best = Some((class_index, score));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("label{i}")).collect()
    }

    #[test]
    fn decodes_single_cell_above_threshold() -> Result<()> {
        let grid = RawGrid::new(
            vec![[100.0, 100.0, 40.0, 40.0]],
            vec![0.1, 0.2, 0.9, 0.3],
            4,
        )?;
        let out = decode(&grid, &labels(4), 416, 416, 0.5);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_index(), 2);
        assert_eq!(out[0].label(), "label2");
        assert_eq!(out[0].id(), "0");
        assert!((out[0].confidence() - 0.9).abs() < 1e-6);
        assert_eq!(out[0].bbox(), Rect::new(80.0, 80.0, 120.0, 120.0));
        Ok(())
    }

    #[test]
    fn threshold_is_strict() -> Result<()> {
        let grid = RawGrid::new(vec![[10.0, 10.0, 4.0, 4.0]], vec![0.5, 0.0], 2)?;
        assert!(decode(&grid, &labels(2), 100, 100, 0.5).is_empty());
        Ok(())
    }

    #[test]
    fn ties_go_to_lowest_class_index() -> Result<()> {
        let grid = RawGrid::new(vec![[10.0, 10.0, 4.0, 4.0]], vec![0.2, 0.7, 0.7], 3)?;
        let out = decode(&grid, &labels(3), 100, 100, 0.5);
        assert_eq!(out[0].class_index(), 1);
        Ok(())
    }

    #[test]
    fn boxes_are_clamped_to_image_bounds() -> Result<()> {
        let grid = RawGrid::new(
            vec![[5.0, 95.0, 40.0, 40.0], [-50.0, -50.0, 10.0, 10.0]],
            vec![0.9, 0.9],
            1,
        )?;
        let out = decode(&grid, &labels(1), 100, 100, 0.5);
        assert_eq!(out.len(), 2);
        for det in &out {
            let b = det.bbox();
            assert!(b.left >= 0.0 && b.right <= 99.0);
            assert!(b.top >= 0.0 && b.bottom <= 99.0);
            assert!(b.left <= b.right && b.top <= b.bottom);
        }
        assert_eq!(out[0].bbox(), Rect::new(0.0, 75.0, 25.0, 99.0));
        Ok(())
    }

    #[test]
    fn missing_label_falls_back_to_class_index() -> Result<()> {
        let grid = RawGrid::new(vec![[10.0, 10.0, 4.0, 4.0]], vec![0.0, 0.8], 2)?;
        let out = decode(&grid, &labels(1), 100, 100, 0.5);
        assert_eq!(out[0].label(), "class_1");
        Ok(())
    }

    #[test]
    fn all_zero_scores_emit_nothing() -> Result<()> {
        let grid = RawGrid::new(vec![[10.0, 10.0, 4.0, 4.0]], vec![0.0, 0.0], 2)?;
        assert!(decode(&grid, &labels(2), 100, 100, -1.0).is_empty());
        Ok(())
    }
}
