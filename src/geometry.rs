//! Axis-aligned box math shared by the decoder, NMS and the tracker.
//!
//! Boxes are stored as `(left, top, right, bottom)` in pixel units of whatever
//! image produced them. Overlap is computed per axis from box centers and
//! extents, so a negative overlap on either axis means the boxes are disjoint.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Build a box from a center point and full extent.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(
            cx - width / 2.0,
            cy - height / 2.0,
            cx + width / 2.0,
            cy + height / 2.0,
        )
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center_x(&self) -> f32 {
        (self.left + self.right) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// True when every coordinate is a finite number.
    pub fn is_finite(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.right.is_finite()
            && self.bottom.is_finite()
    }

    /// Scale both axes independently (model space to frame space).
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self::new(
            self.left * sx,
            self.top * sy,
            self.right * sx,
            self.bottom * sy,
        )
    }
}

/// One-dimensional overlap of two segments given as center and extent.
///
/// Negative when the segments do not touch.
pub fn overlap(center_a: f32, extent_a: f32, center_b: f32, extent_b: f32) -> f32 {
    let left = (center_a - extent_a / 2.0).max(center_b - extent_b / 2.0);
    let right = (center_a + extent_a / 2.0).min(center_b + extent_b / 2.0);
    right - left
}

/// Intersection area; zero when either axis overlap is negative.
pub fn intersection(a: &Rect, b: &Rect) -> f32 {
    let w = overlap(a.center_x(), a.width(), b.center_x(), b.width());
    let h = overlap(a.center_y(), a.height(), b.center_y(), b.height());
    if w < 0.0 || h < 0.0 {
        return 0.0;
    }
    w * h
}

pub fn union(a: &Rect, b: &Rect) -> f32 {
    a.area() + b.area() - intersection(a, b)
}

/// Intersection over union. Two empty boxes yield 0.
pub fn iou(a: &Rect, b: &Rect) -> f32 {
    let u = union(a, b);
    if u <= 0.0 {
        return 0.0;
    }
    intersection(a, b) / u
}
