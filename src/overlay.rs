//! Overlay rendering primitives.
//!
//! The tracker draws through the `Canvas` trait. Two canvases ship with the
//! crate: `ImageCanvas` rasterizes onto an RGB image with `imageproc`, and
//! `DrawList` records draw calls so overlays can be serialized or inspected.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::imageops;
use image::{Rgb, RgbImage};
use serde::{Serialize, Serializer};

use crate::frame::Frame;
use crate::geometry::Rect;

pub type Color = Rgb<u8>;

/// Fixed palette for tracked objects. Its length caps how many objects are
/// tracked at once.
pub const PALETTE: [Color; 15] = [
    Rgb([0x00, 0x00, 0xFF]),
    Rgb([0xFF, 0x00, 0x00]),
    Rgb([0x00, 0xFF, 0x00]),
    Rgb([0xFF, 0xFF, 0x00]),
    Rgb([0x00, 0xFF, 0xFF]),
    Rgb([0xFF, 0x00, 0xFF]),
    Rgb([0xFF, 0xFF, 0xFF]),
    Rgb([0x55, 0xFF, 0x55]),
    Rgb([0xFF, 0xA5, 0x00]),
    Rgb([0xFF, 0x88, 0x88]),
    Rgb([0xAA, 0xAA, 0xFF]),
    Rgb([0xFF, 0xFF, 0xAA]),
    Rgb([0x55, 0xAA, 0xAA]),
    Rgb([0xAA, 0x33, 0xAA]),
    Rgb([0x0D, 0x00, 0x68]),
];

const LABEL_TEXT_COLOR: Color = Rgb([0xFF, 0xFF, 0xFF]);
const DEFAULT_STROKE: u32 = 4;
const DEFAULT_TEXT_PX: f32 = 18.0;
const ARC_STEPS: usize = 8;

pub(crate) fn serialize_color<S: Serializer>(
    color: &Color,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!(
        "#{:02X}{:02X}{:02X}",
        color.0[0], color.0[1], color.0[2]
    ))
}

/// Drawing surface for overlays.
pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Stroke a rectangle with rounded corners.
    fn stroke_round_rect(&mut self, rect: Rect, corner_radius: f32, color: Color);

    /// Draw a label whose baseline sits at `y`, on a background of `color`.
    ///
    /// The background plate is never placed above the top edge; a label
    /// anchored near `y = 0` is pushed down to stay visible.
    fn draw_label(&mut self, x: f32, y: f32, text: &str, color: Color);
}

// ----------------------------------------------------------------------------
// Frame-to-canvas transform
// ----------------------------------------------------------------------------

/// 2-D affine transform: `x' = a*x + b*y + tx`, `y' = c*x + d*y + ty`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    tx: f32,
    ty: f32,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self {
            tx,
            ty,
            ..Self::IDENTITY
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    /// Clockwise rotation on a y-down raster. Only quarter turns are exact.
    pub fn rotate_quarter_turns(degrees: i32) -> Result<Self> {
        let (cos, sin) = match degrees.rem_euclid(360) {
            0 => (1.0, 0.0),
            90 => (0.0, 1.0),
            180 => (-1.0, 0.0),
            270 => (0.0, -1.0),
            other => return Err(anyhow!("rotation {} is not a multiple of 90", other)),
        };
        Ok(Self {
            a: cos,
            b: -sin,
            c: sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        })
    }

    /// Apply `self` first, then `next`.
    pub fn then(self, next: Transform) -> Transform {
        Transform {
            a: next.a * self.a + next.b * self.c,
            b: next.a * self.b + next.b * self.d,
            c: next.c * self.a + next.d * self.c,
            d: next.c * self.b + next.d * self.d,
            tx: next.a * self.tx + next.b * self.ty + next.tx,
            ty: next.c * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.b * y + self.tx,
            self.c * x + self.d * y + self.ty,
        )
    }

    /// Bounding box of the four mapped corners.
    pub fn map_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.map_point(rect.left, rect.top),
            self.map_point(rect.right, rect.top),
            self.map_point(rect.right, rect.bottom),
            self.map_point(rect.left, rect.bottom),
        ];
        let mut out = Rect::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for (x, y) in corners {
            out.left = out.left.min(x);
            out.top = out.top.min(y);
            out.right = out.right.max(x);
            out.bottom = out.bottom.max(y);
        }
        out
    }
}

/// Transform from frame pixels to a `dst_width x dst_height` destination,
/// rotating by `rotation` degrees about the frame center and optionally
/// mirroring horizontally (front-facing sensors).
pub fn frame_to_canvas(
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
    rotation: i32,
    mirror: bool,
) -> Result<Transform> {
    let (sw, sh) = (src_width as f32, src_height as f32);
    let (dw, dh) = (dst_width as f32, dst_height as f32);
    let mut m = Transform::IDENTITY;

    if rotation != 0 {
        m = m
            .then(Transform::translate(-sw / 2.0, -sh / 2.0))
            .then(Transform::rotate_quarter_turns(rotation)?);
    }

    let transpose = (rotation.abs() + 90) % 180 == 0;
    let (in_w, in_h) = if transpose { (sh, sw) } else { (sw, sh) };
    if in_w != dw || in_h != dh {
        m = m.then(Transform::scale(dw / in_w, dh / in_h));
    }

    if rotation != 0 {
        m = m.then(Transform::translate(dw / 2.0, dh / 2.0));
    }
    if mirror {
        m = m
            .then(Transform::scale(-1.0, 1.0))
            .then(Transform::translate(dw, 0.0));
    }
    Ok(m)
}

// ----------------------------------------------------------------------------
// Raster canvas
// ----------------------------------------------------------------------------

/// Canvas backed by an RGB image.
pub struct ImageCanvas {
    image: RgbImage,
    font: Option<FontArc>,
    stroke: u32,
    text_px: f32,
}

impl ImageCanvas {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            font: None,
            stroke: DEFAULT_STROKE,
            text_px: DEFAULT_TEXT_PX,
        }
    }

    /// Blank canvas of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(RgbImage::new(width, height))
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_stroke(mut self, stroke: u32) -> Self {
        self.stroke = stroke.max(1);
        self
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.image
            .save(path)
            .with_context(|| format!("failed to write overlay {}", path.display()))
    }

    fn stroke_once(&mut self, rect: Rect, radius: f32, color: Color) {
        let r = radius.min(rect.width() / 2.0).min(rect.height() / 2.0).max(0.0);
        let (l, t, rt, b) = (rect.left, rect.top, rect.right, rect.bottom);
        let segments = [
            ((l + r, t), (rt - r, t)),
            ((rt, t + r), (rt, b - r)),
            ((rt - r, b), (l + r, b)),
            ((l, b - r), (l, t + r)),
        ];
        for (start, end) in segments {
            imageproc::drawing::draw_line_segment_mut(&mut self.image, start, end, color);
        }
        if r <= 0.0 {
            return;
        }
        let arcs = [
            ((l + r, t + r), 180.0f32),
            ((rt - r, t + r), 270.0),
            ((rt - r, b - r), 0.0),
            ((l + r, b - r), 90.0),
        ];
        for ((cx, cy), start_deg) in arcs {
            let mut prev = arc_point(cx, cy, r, start_deg);
            for step in 1..=ARC_STEPS {
                let deg = start_deg + 90.0 * step as f32 / ARC_STEPS as f32;
                let next = arc_point(cx, cy, r, deg);
                imageproc::drawing::draw_line_segment_mut(&mut self.image, prev, next, color);
                prev = next;
            }
        }
    }
}

fn arc_point(cx: f32, cy: f32, r: f32, degrees: f32) -> (f32, f32) {
    let rad = degrees.to_radians();
    (cx + r * rad.cos(), cy + r * rad.sin())
}

/// The frame's pixels turned upright by its sensor orientation.
///
/// Drawing the tracker onto this image lines boxes up with the subject.
pub fn display_image(frame: &Frame) -> Result<RgbImage> {
    let image = frame.to_rgb_image()?;
    Ok(match frame.sensor_orientation % 360 {
        0 => image,
        90 => imageops::rotate90(&image),
        180 => imageops::rotate180(&image),
        270 => imageops::rotate270(&image),
        other => return Err(anyhow!("sensor orientation {} is not a quarter turn", other)),
    })
}

/// Load a TrueType/OpenType font for label text.
pub fn load_font(path: &Path) -> Result<FontArc> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
    FontArc::try_from_vec(bytes).map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))
}

impl Canvas for ImageCanvas {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn stroke_round_rect(&mut self, rect: Rect, corner_radius: f32, color: Color) {
        let half = (self.stroke / 2) as f32;
        for k in 0..self.stroke {
            let grow = k as f32 - half;
            let ring = Rect::new(
                rect.left - grow,
                rect.top - grow,
                rect.right + grow,
                rect.bottom + grow,
            );
            self.stroke_once(ring, (corner_radius + grow).max(0.0), color);
        }
    }

    fn draw_label(&mut self, x: f32, y: f32, text: &str, color: Color) {
        let scale = PxScale::from(self.text_px);
        let (w, h) = match &self.font {
            Some(font) => imageproc::drawing::text_size(scale, font, text),
            None => (
                (text.chars().count() as f32 * self.text_px * 0.5) as u32,
                self.text_px as u32,
            ),
        };
        if w == 0 || h == 0 {
            return;
        }
        let top = (y as i32 - h as i32).max(0);
        let background = imageproc::rect::Rect::at(x as i32, top).of_size(w, h);
        imageproc::drawing::draw_filled_rect_mut(&mut self.image, background, color);
        if let Some(font) = &self.font {
            imageproc::drawing::draw_text_mut(
                &mut self.image,
                LABEL_TEXT_COLOR,
                x as i32,
                top,
                scale,
                font,
                text,
            );
        }
    }
}

// ----------------------------------------------------------------------------
// Recording canvas
// ----------------------------------------------------------------------------

/// One recorded draw call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawCommand {
    RoundRect {
        rect: Rect,
        radius: f32,
        #[serde(serialize_with = "serialize_color")]
        color: Color,
    },
    Label {
        x: f32,
        y: f32,
        text: String,
        #[serde(serialize_with = "serialize_color")]
        color: Color,
    },
}

/// Canvas that records draw calls instead of rasterizing them.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DrawList {
    width: u32,
    height: u32,
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|cmd| match cmd {
            DrawCommand::Label { text, .. } => Some(text.as_str()),
            DrawCommand::RoundRect { .. } => None,
        })
    }
}

impl Canvas for DrawList {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn stroke_round_rect(&mut self, rect: Rect, corner_radius: f32, color: Color) {
        self.commands.push(DrawCommand::RoundRect {
            rect,
            radius: corner_radius,
            color,
        });
    }

    fn draw_label(&mut self, x: f32, y: f32, text: &str, color: Color) {
        self.commands.push(DrawCommand::Label {
            x,
            y,
            text: text.to_string(),
            color,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-3 && (a.1 - b.1).abs() < 1e-3
    }

    #[test]
    fn unrotated_same_size_is_identity() -> Result<()> {
        let m = frame_to_canvas(640, 480, 640, 480, 0, false)?;
        assert_eq!(m, Transform::IDENTITY);
        Ok(())
    }

    #[test]
    fn unrotated_scales_to_destination() -> Result<()> {
        let m = frame_to_canvas(640, 480, 1280, 960, 0, false)?;
        assert!(approx(m.map_point(320.0, 240.0), (640.0, 480.0)));
        Ok(())
    }

    #[test]
    fn quarter_turn_maps_frame_corners() -> Result<()> {
        let m = frame_to_canvas(640, 480, 480, 640, 90, false)?;
        // top-left of the frame lands at the top-right of the canvas
        assert!(approx(m.map_point(0.0, 0.0), (480.0, 0.0)));
        assert!(approx(m.map_point(640.0, 480.0), (0.0, 640.0)));
        Ok(())
    }

    #[test]
    fn half_turn_flips_both_axes() -> Result<()> {
        let m = frame_to_canvas(100, 50, 100, 50, 180, false)?;
        assert!(approx(m.map_point(0.0, 0.0), (100.0, 50.0)));
        assert!(approx(m.map_point(100.0, 50.0), (0.0, 0.0)));
        Ok(())
    }

    #[test]
    fn three_quarter_turn_maps_frame_corners() -> Result<()> {
        let m = frame_to_canvas(640, 480, 480, 640, 270, false)?;
        assert!(approx(m.map_point(0.0, 0.0), (0.0, 640.0)));
        Ok(())
    }

    #[test]
    fn mirror_flips_horizontally() -> Result<()> {
        let m = frame_to_canvas(100, 100, 100, 100, 0, true)?;
        assert!(approx(m.map_point(10.0, 20.0), (90.0, 20.0)));
        let r = m.map_rect(&Rect::new(10.0, 10.0, 30.0, 20.0));
        assert_eq!(r, Rect::new(70.0, 10.0, 90.0, 20.0));
        Ok(())
    }

    #[test]
    fn rejects_non_quarter_rotation() {
        assert!(frame_to_canvas(10, 10, 10, 10, 45, false).is_err());
    }

    #[test]
    fn display_image_turns_portrait_sensor_upright() -> Result<()> {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(0, 0, PALETTE[0]);
        let frame = Frame::from_image(image, 90)?;
        let upright = display_image(&frame)?;
        assert_eq!(upright.dimensions(), (2, 4));
        // frame top-left ends up top-right, matching frame_to_canvas
        assert_eq!(*upright.get_pixel(1, 0), PALETTE[0]);
        Ok(())
    }

    #[test]
    fn image_canvas_strokes_inside_bounds() {
        let mut canvas = ImageCanvas::blank(64, 64).with_stroke(1);
        canvas.stroke_round_rect(Rect::new(10.0, 10.0, 50.0, 40.0), 5.0, PALETTE[1]);
        assert_eq!(*canvas.image().get_pixel(30, 10), PALETTE[1]);
        assert_eq!(*canvas.image().get_pixel(30, 25), Rgb([0, 0, 0]));
        // rounded corner leaves the exact corner untouched
        assert_eq!(*canvas.image().get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn label_at_top_edge_stays_on_canvas() {
        let mut canvas = ImageCanvas::blank(100, 60);
        canvas.draw_label(10.0, 0.0, "dog 90.00%", PALETTE[1]);
        // plate occupies the first text row instead of rows above the canvas
        assert_eq!(*canvas.image().get_pixel(12, 0), PALETTE[1]);
        assert_eq!(*canvas.image().get_pixel(12, 10), PALETTE[1]);
        assert_eq!(*canvas.image().get_pixel(12, 40), Rgb([0, 0, 0]));
    }

    #[test]
    fn draw_list_records_and_serializes() -> Result<()> {
        let mut list = DrawList::new(100, 100);
        list.stroke_round_rect(Rect::new(0.0, 0.0, 10.0, 10.0), 1.25, PALETTE[0]);
        list.draw_label(1.0, 2.0, "dog 90.00%", PALETTE[0]);
        assert_eq!(list.labels().collect::<Vec<_>>(), vec!["dog 90.00%"]);

        let json = serde_json::to_value(&list)?;
        assert_eq!(json["commands"][0]["op"], "round_rect");
        assert_eq!(json["commands"][0]["color"], "#0000FF");
        assert_eq!(json["commands"][1]["text"], "dog 90.00%");
        Ok(())
    }
}
