//! Frame-to-frame object tracking and overlay rendering.
//!
//! Tracking is rebuilt from the previous generation on every call: each new
//! detection either carries forward the first previous object whose center
//! lies within tolerance, or starts a new one. Objects not matched in a frame
//! are gone. There is no occlusion memory.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::detect::Detection;
use crate::geometry::Rect;
use crate::overlay::{self, Canvas, Color, PALETTE};

/// Boxes narrower or shorter than this (pixels) are ignored.
pub const DEFAULT_MIN_SIZE: f32 = 16.0;
/// Maximum center displacement (pixels, per axis) for a match.
pub const DEFAULT_TOLERANCE: f32 = 50.0;

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    pub min_size: f32,
    pub tolerance_x: f32,
    pub tolerance_y: f32,
    /// Mirror overlays horizontally (front-facing sensor).
    pub mirror: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            tolerance_x: DEFAULT_TOLERANCE,
            tolerance_y: DEFAULT_TOLERANCE,
            mirror: false,
        }
    }
}

/// An object carried across frames.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedObject {
    pub track_id: u64,
    pub location: Rect,
    /// Highest detector score seen for this object.
    pub confidence: f32,
    pub title: String,
    #[serde(serialize_with = "overlay::serialize_color")]
    pub color: Color,
}

impl TrackedObject {
    /// Overlay label: `"<title> <confidence %>"`, or just the percentage.
    pub fn label_text(&self) -> String {
        let pct = self.confidence * 100.0;
        if self.title.is_empty() {
            format!("{pct:.2}%")
        } else {
            format!("{} {pct:.2}%", self.title)
        }
    }
}

/// Source frame geometry used to map boxes onto the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub sensor_orientation: u32,
}

#[derive(Debug, Default)]
struct TrackerState {
    frame: Option<FrameGeometry>,
    active: Vec<TrackedObject>,
    next_track_id: u64,
}

/// Centroid tracker shared between the processing thread and the renderer.
pub struct ObjectTracker {
    config: TrackerConfig,
    state: Mutex<TrackerState>,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, TrackerState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("tracker lock poisoned"))
    }

    /// Record the geometry of the frames being tracked.
    pub fn set_frame_configuration(
        &self,
        width: u32,
        height: u32,
        sensor_orientation: u32,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let geometry = FrameGeometry {
            width,
            height,
            sensor_orientation,
        };
        if state.frame != Some(geometry) {
            log::info!(
                "tracker: frame {}x{} orientation {}",
                width,
                height,
                sensor_orientation
            );
            state.frame = Some(geometry);
        }
        Ok(())
    }

    /// Replace tracked state with the matches for this frame's detections.
    pub fn track_results(&self, detections: &[Detection]) -> Result<()> {
        let candidates: Vec<&Detection> = detections
            .iter()
            .filter(|det| self.is_trackable(det))
            .collect();

        let mut state = self.lock()?;
        let previous = std::mem::take(&mut state.active);

        if candidates.is_empty() {
            log::debug!("tracker: nothing to track");
            return Ok(());
        }

        for (i, det) in candidates.iter().enumerate() {
            let location = det.bbox();
            let matched = previous.iter().find(|old| {
                (old.location.center_x() - location.center_x()).abs() < self.config.tolerance_x
                    && (old.location.center_y() - location.center_y()).abs()
                        < self.config.tolerance_y
            });

            let entry = match matched {
                Some(old) => TrackedObject {
                    track_id: old.track_id,
                    location,
                    confidence: old.confidence.max(det.confidence()),
                    title: det
                        .breed_label()
                        .map(str::to_string)
                        .unwrap_or_else(|| old.title.clone()),
                    color: old.color,
                },
                None => {
                    let track_id = state.next_track_id;
                    state.next_track_id += 1;
                    TrackedObject {
                        track_id,
                        location,
                        confidence: det.confidence(),
                        title: det.breed_label().unwrap_or(det.label()).to_string(),
                        color: next_color(&state.active),
                    }
                }
            };
            state.active.push(entry);

            if state.active.len() >= PALETTE.len() {
                let dropped = candidates.len() - i - 1;
                if dropped > 0 {
                    log::debug!("tracker: palette exhausted, dropped {} detections", dropped);
                }
                break;
            }
        }
        Ok(())
    }

    fn is_trackable(&self, det: &Detection) -> bool {
        let bbox = det.bbox();
        if !bbox.is_finite() {
            log::debug!("tracker: detection {} has no usable geometry", det.id());
            return false;
        }
        if bbox.width() < self.config.min_size || bbox.height() < self.config.min_size {
            log::warn!(
                "tracker: degenerate rectangle {:?} for detection {}",
                bbox,
                det.id()
            );
            return false;
        }
        true
    }

    /// Copy of the currently tracked objects.
    pub fn snapshot(&self) -> Result<Vec<TrackedObject>> {
        Ok(self.lock()?.active.clone())
    }

    /// Render every tracked object onto `canvas`.
    pub fn draw(&self, canvas: &mut dyn Canvas) -> Result<()> {
        let state = self.lock()?;
        let Some(frame) = state.frame else {
            log::debug!("tracker: draw before frame configuration");
            return Ok(());
        };
        if frame.width == 0 || frame.height == 0 {
            return Ok(());
        }

        let rotated = frame.sensor_orientation % 180 == 90;
        let (fw, fh) = (frame.width as f32, frame.height as f32);
        let (cw, ch) = (canvas.width() as f32, canvas.height() as f32);
        let (upright_w, upright_h) = if rotated { (fh, fw) } else { (fw, fh) };
        let multiplier = (ch / upright_h).min(cw / upright_w);
        let transform = overlay::frame_to_canvas(
            frame.width,
            frame.height,
            (multiplier * upright_w) as u32,
            (multiplier * upright_h) as u32,
            frame.sensor_orientation as i32,
            self.config.mirror,
        )?;

        for object in &state.active {
            let pos = transform.map_rect(&object.location);
            let corner = pos.width().min(pos.height()) / 8.0;
            canvas.stroke_round_rect(pos, corner, object.color);

            let x = pos.left.max(0.0) + corner;
            let mut y = pos.top.max(0.0);
            if y > ch {
                y = pos.bottom;
            }
            canvas.draw_label(x, y, &object.label_text(), object.color);
        }
        Ok(())
    }
}

impl Default for ObjectTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

/// First palette color not held by an active object, scanning from `active.len()`.
fn next_color(active: &[TrackedObject]) -> Color {
    let start = active.len();
    (0..PALETTE.len())
        .map(|k| PALETTE[(start + k) % PALETTE.len()])
        .find(|color| active.iter().all(|obj| obj.color != *color))
        .unwrap_or(PALETTE[start % PALETTE.len()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{DrawCommand, DrawList};

    fn det(id: &str, label: &str, confidence: f32, bbox: Rect) -> Detection {
        Detection::new(id, 16, label, confidence, bbox)
    }

    fn square(x: f32, y: f32, side: f32) -> Rect {
        Rect::new(x, y, x + side, y + side)
    }

    #[test]
    fn nearby_detection_carries_identity() -> Result<()> {
        let tracker = ObjectTracker::default();
        tracker.track_results(&[det("0", "dog", 0.6, square(100.0, 100.0, 40.0))])?;
        let first = tracker.snapshot()?;

        tracker.track_results(&[det("0", "dog", 0.8, square(110.0, 105.0, 40.0))])?;
        let second = tracker.snapshot()?;

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].track_id, first[0].track_id);
        assert_eq!(second[0].color, first[0].color);
        assert_eq!(second[0].confidence, 0.8);
        assert_eq!(second[0].location, square(110.0, 105.0, 40.0));
        Ok(())
    }

    #[test]
    fn matched_confidence_is_running_max() -> Result<()> {
        let tracker = ObjectTracker::default();
        tracker.track_results(&[det("0", "dog", 0.9, square(100.0, 100.0, 40.0))])?;
        tracker.track_results(&[det("0", "dog", 0.4, square(102.0, 100.0, 40.0))])?;
        assert_eq!(tracker.snapshot()?[0].confidence, 0.9);
        Ok(())
    }

    #[test]
    fn far_detection_replaces_previous_object() -> Result<()> {
        let tracker = ObjectTracker::default();
        tracker.track_results(&[det("0", "dog", 0.6, square(100.0, 100.0, 40.0))])?;
        let first = tracker.snapshot()?;
        tracker.track_results(&[det("0", "dog", 0.6, square(300.0, 300.0, 40.0))])?;
        let second = tracker.snapshot()?;

        assert_eq!(second.len(), 1);
        assert_ne!(second[0].track_id, first[0].track_id);
        Ok(())
    }

    #[test]
    fn breed_label_is_preferred_and_kept() -> Result<()> {
        let tracker = ObjectTracker::default();
        let plain = det("0", "dog", 0.6, square(100.0, 100.0, 40.0));
        tracker.track_results(&[plain.clone()])?;
        assert_eq!(tracker.snapshot()?[0].title, "dog");

        tracker.track_results(&[plain.with_breed_label("beagle")])?;
        assert_eq!(tracker.snapshot()?[0].title, "beagle");

        // a later detection without a breed keeps the fine label
        tracker.track_results(&[plain])?;
        assert_eq!(tracker.snapshot()?[0].title, "beagle");
        Ok(())
    }

    #[test]
    fn degenerate_and_non_finite_boxes_are_ignored() -> Result<()> {
        let tracker = ObjectTracker::default();
        tracker.track_results(&[
            det("0", "dog", 0.9, Rect::new(0.0, 0.0, 10.0, 100.0)),
            det("1", "dog", 0.9, Rect::new(f32::NAN, 0.0, 50.0, 50.0)),
        ])?;
        assert!(tracker.snapshot()?.is_empty());
        Ok(())
    }

    #[test]
    fn empty_frame_clears_state() -> Result<()> {
        let tracker = ObjectTracker::default();
        tracker.track_results(&[det("0", "dog", 0.6, square(100.0, 100.0, 40.0))])?;
        tracker.track_results(&[])?;
        assert!(tracker.snapshot()?.is_empty());

        // no memory of the generation before the empty frame
        tracker.track_results(&[det("0", "dog", 0.1, square(100.0, 100.0, 40.0))])?;
        assert_eq!(tracker.snapshot()?[0].confidence, 0.1);
        Ok(())
    }

    #[test]
    fn active_count_is_capped_by_palette() -> Result<()> {
        let tracker = ObjectTracker::default();
        let detections: Vec<Detection> = (0..20)
            .map(|i| det(&i.to_string(), "dog", 0.7, square(i as f32 * 100.0, 0.0, 40.0)))
            .collect();
        tracker.track_results(&detections)?;
        let active = tracker.snapshot()?;
        assert_eq!(active.len(), PALETTE.len());
        assert_eq!(active.last().map(|o| o.location), Some(square(1400.0, 0.0, 40.0)));
        Ok(())
    }

    #[test]
    fn new_object_skips_colors_already_held() -> Result<()> {
        let tracker = ObjectTracker::default();
        tracker.track_results(&[
            det("0", "dog", 0.7, square(0.0, 0.0, 40.0)),
            det("1", "dog", 0.7, square(200.0, 0.0, 40.0)),
            det("2", "dog", 0.7, square(400.0, 0.0, 40.0)),
        ])?;
        // third and second objects carried, first gone, a new one appears
        tracker.track_results(&[
            det("2", "dog", 0.7, square(405.0, 0.0, 40.0)),
            det("1", "dog", 0.7, square(205.0, 0.0, 40.0)),
            det("3", "dog", 0.7, square(800.0, 0.0, 40.0)),
        ])?;
        let active = tracker.snapshot()?;
        assert_eq!(active.len(), 3);
        assert_eq!(active[0].color, PALETTE[2]);
        assert_eq!(active[1].color, PALETTE[1]);
        // PALETTE[2] is held by a carried object
        assert_eq!(active[2].color, PALETTE[3]);
        for (i, a) in active.iter().enumerate() {
            for b in active.iter().skip(i + 1) {
                assert_ne!(a.color, b.color);
            }
        }
        Ok(())
    }

    #[test]
    fn draw_renders_box_and_label() -> Result<()> {
        let tracker = ObjectTracker::default();
        tracker.set_frame_configuration(640, 480, 0)?;
        tracker.track_results(&[
            det("0", "dog", 0.875, square(100.0, 100.0, 80.0)).with_breed_label("beagle")
        ])?;

        let mut canvas = DrawList::new(640, 480);
        tracker.draw(&mut canvas)?;

        let commands = canvas.commands();
        assert_eq!(commands.len(), 2);
        match &commands[0] {
            DrawCommand::RoundRect { rect, radius, color } => {
                assert_eq!(*rect, square(100.0, 100.0, 80.0));
                assert_eq!(*radius, 10.0);
                assert_eq!(*color, PALETTE[0]);
            }
            other => panic!("unexpected command {other:?}"),
        }
        match &commands[1] {
            DrawCommand::Label { x, y, text, .. } => {
                assert_eq!(text, "beagle 87.50%");
                assert_eq!(*x, 110.0);
                assert_eq!(*y, 100.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn label_for_box_at_top_edge_is_drawn_inside_canvas() -> Result<()> {
        use crate::overlay::ImageCanvas;
        use image::Rgb;

        let tracker = ObjectTracker::default();
        tracker.set_frame_configuration(200, 200, 0)?;
        tracker.track_results(&[det("0", "dog", 0.9, Rect::new(20.0, 0.0, 120.0, 100.0))])?;

        let mut canvas = ImageCanvas::blank(200, 200);
        tracker.draw(&mut canvas)?;
        // label plate sits just below the top edge, inside the box
        assert_eq!(*canvas.image().get_pixel(60, 10), PALETTE[0]);
        assert_eq!(*canvas.image().get_pixel(60, 40), Rgb([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn draw_scales_and_rotates_to_canvas() -> Result<()> {
        let tracker = ObjectTracker::default();
        tracker.set_frame_configuration(640, 480, 90)?;
        tracker.track_results(&[det("0", "dog", 0.5, Rect::new(0.0, 0.0, 64.0, 48.0))])?;

        // portrait canvas at half scale
        let mut canvas = DrawList::new(240, 320);
        tracker.draw(&mut canvas)?;
        match &canvas.commands()[0] {
            DrawCommand::RoundRect { rect, .. } => {
                assert!((rect.left - 216.0).abs() < 1e-3);
                assert!((rect.top - 0.0).abs() < 1e-3);
                assert!((rect.right - 240.0).abs() < 1e-3);
                assert!((rect.bottom - 32.0).abs() < 1e-3);
            }
            other => panic!("unexpected command {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn label_without_title_is_confidence_only() {
        let obj = TrackedObject {
            track_id: 0,
            location: Rect::default(),
            confidence: 0.5,
            title: String::new(),
            color: PALETTE[0],
        };
        assert_eq!(obj.label_text(), "50.00%");
    }

    #[test]
    fn draw_without_frame_configuration_is_a_no_op() -> Result<()> {
        let tracker = ObjectTracker::default();
        tracker.track_results(&[det("0", "dog", 0.5, square(0.0, 0.0, 40.0))])?;
        let mut canvas = DrawList::new(100, 100);
        tracker.draw(&mut canvas)?;
        assert!(canvas.commands().is_empty());
        Ok(())
    }
}
