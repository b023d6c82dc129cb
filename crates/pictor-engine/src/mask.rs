use std::io::Cursor;
use std::str::FromStr;

use image::{ImageFormat, Rgba, RgbaImage};
use tracing::debug;

use crate::error::MaskError;

/// Opacity of one brush coat. A single coat stays under the threshold; a
/// pixel has to be covered at least twice to count as painted.
pub const BRUSH_ALPHA: f32 = 0.7;
pub const ALPHA_THRESHOLD: u8 = 200;
pub const DEFAULT_BRUSH_SIZE: u32 = 20;

const MASK_EDIT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const MASK_KEEP: Rgba<u8> = Rgba([0, 0, 0, 255]);
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Brush,
    Eraser,
}

impl FromStr for Tool {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "brush" => Ok(Tool::Brush),
            "eraser" | "erase" => Ok(Tool::Eraser),
            other => Err(format!("unknown tool '{other}' (expected brush or eraser)")),
        }
    }
}

/// Pointer position in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerPosition {
    pub x: f32,
    pub y: f32,
}

impl PointerPosition {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Where and how large the surface is drawn on screen. The pixel buffer keeps
/// the base image's size regardless.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    Uninitialized,
    Ready,
    Drawing,
}

/// Free-hand mask painting over a base image.
///
/// Paint lives on its own layer; the base image is never modified, so
/// [`MaskEditor::extract_base_image`] always returns the original pixels.
#[derive(Debug, Clone)]
pub struct MaskEditor {
    base: Option<RgbaImage>,
    paint: Option<RgbaImage>,
    tool: Tool,
    brush_size: u32,
    display: Option<DisplayRect>,
    last_point: Option<(f32, f32)>,
}

impl Default for MaskEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl MaskEditor {
    pub fn new() -> Self {
        Self {
            base: None,
            paint: None,
            tool: Tool::Brush,
            brush_size: DEFAULT_BRUSH_SIZE,
            display: None,
            last_point: None,
        }
    }

    pub fn setup_canvas(&mut self, encoded: &[u8]) -> Result<(), MaskError> {
        let decoded =
            image::load_from_memory(encoded).map_err(|err| MaskError::Decode(err.to_string()))?;
        self.setup_canvas_image(decoded.to_rgba8());
        Ok(())
    }

    pub fn setup_canvas_image(&mut self, base: RgbaImage) {
        let (width, height) = base.dimensions();
        self.paint = Some(RgbaImage::from_pixel(width, height, TRANSPARENT));
        self.base = Some(base);
        self.display = None;
        self.last_point = None;
        debug!(width, height, "mask canvas ready");
    }

    pub fn state(&self) -> EditorState {
        match (&self.base, self.last_point) {
            (None, _) => EditorState::Uninitialized,
            (Some(_), None) => EditorState::Ready,
            (Some(_), Some(_)) => EditorState::Drawing,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.base.is_some()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.base.as_ref().map(RgbaImage::dimensions)
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn brush_size(&self) -> u32 {
        self.brush_size
    }

    pub fn set_brush_size(&mut self, px: u32) {
        self.brush_size = px.max(1);
    }

    pub fn set_display_rect(&mut self, rect: Option<DisplayRect>) {
        self.display = rect;
    }

    /// Maps a display-space pointer into pixel-buffer space, scaling each axis
    /// by buffer size over displayed size.
    pub fn to_buffer_coords(&self, point: PointerPosition) -> (f32, f32) {
        let (Some((width, height)), Some(rect)) = (self.dimensions(), self.display) else {
            return (point.x, point.y);
        };
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return (point.x, point.y);
        }
        (
            (point.x - rect.left) * (width as f32 / rect.width),
            (point.y - rect.top) * (height as f32 / rect.height),
        )
    }

    /// Begins a stroke with one dab at the pointer. Ignored until a canvas has
    /// been set up.
    pub fn start_stroke(&mut self, point: PointerPosition) -> bool {
        if self.base.is_none() {
            return false;
        }
        let at = self.to_buffer_coords(point);
        self.apply(at, at);
        self.last_point = Some(at);
        true
    }

    /// Extends the current stroke. Long moves are split into steps no longer
    /// than the brush radius, each painted as a round-capped segment followed
    /// by a dab, the way dense pointer-move events would paint them.
    pub fn continue_stroke(&mut self, point: PointerPosition) {
        let Some(from) = self.last_point else {
            return;
        };
        let to = self.to_buffer_coords(point);
        let step = (self.brush_size as f32 / 2.0).max(0.5);
        let length = ((to.0 - from.0).powi(2) + (to.1 - from.1).powi(2)).sqrt();
        let steps = (length / step).ceil().max(1.0) as u32;

        let mut previous = from;
        for idx in 1..=steps {
            let t = idx as f32 / steps as f32;
            let next = (from.0 + (to.0 - from.0) * t, from.1 + (to.1 - from.1) * t);
            self.apply(previous, next);
            self.apply(next, next);
            previous = next;
        }
        self.last_point = Some(to);
    }

    pub fn end_stroke(&mut self) {
        self.last_point = None;
    }

    /// Drops all paint; the base image shows through unmodified again.
    pub fn clear(&mut self) {
        if let Some(paint) = self.paint.as_mut() {
            for pixel in paint.pixels_mut() {
                *pixel = TRANSPARENT;
            }
        }
        self.last_point = None;
    }

    pub fn paint_layer(&self) -> Option<&RgbaImage> {
        self.paint.as_ref()
    }

    /// Hard binary mask: white where paint alpha exceeds the threshold, black
    /// elsewhere, opaque everywhere.
    pub fn mask_image(&self) -> Result<RgbaImage, MaskError> {
        let paint = self.paint.as_ref().ok_or(MaskError::NotReady)?;
        let (width, height) = paint.dimensions();
        let mut mask = RgbaImage::new(width, height);
        for (src, dst) in paint.pixels().zip(mask.pixels_mut()) {
            *dst = if src[3] > ALPHA_THRESHOLD {
                MASK_EDIT
            } else {
                MASK_KEEP
            };
        }
        Ok(mask)
    }

    pub fn extract_mask(&self) -> Result<Vec<u8>, MaskError> {
        encode_png(&self.mask_image()?)
    }

    pub fn extract_base_image(&self) -> Result<Vec<u8>, MaskError> {
        encode_png(self.base.as_ref().ok_or(MaskError::NotReady)?)
    }

    /// PNG export of [`MaskEditor::preview`].
    pub fn extract_preview(&self) -> Result<Vec<u8>, MaskError> {
        encode_png(&self.preview()?)
    }

    /// Base image with the paint layer composited on top, as shown on screen.
    pub fn preview(&self) -> Result<RgbaImage, MaskError> {
        let (Some(base), Some(paint)) = (self.base.as_ref(), self.paint.as_ref()) else {
            return Err(MaskError::NotReady);
        };
        let mut out = base.clone();
        for (dst, src) in out.pixels_mut().zip(paint.pixels()) {
            let alpha = src[3] as f32 / 255.0;
            if alpha <= 0.0 {
                continue;
            }
            for channel in 0..3 {
                let blended = src[channel] as f32 * alpha + dst[channel] as f32 * (1.0 - alpha);
                dst[channel] = blended.round() as u8;
            }
            let dst_alpha = dst[3] as f32 / 255.0;
            dst[3] = ((alpha + dst_alpha * (1.0 - alpha)) * 255.0).round() as u8;
        }
        Ok(out)
    }

    fn apply(&mut self, from: (f32, f32), to: (f32, f32)) {
        let radius = self.brush_size as f32 / 2.0;
        let tool = self.tool;
        let Some(paint) = self.paint.as_mut() else {
            return;
        };
        let (width, height) = paint.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let min_x = (from.0.min(to.0) - radius).floor().max(0.0) as u32;
        let min_y = (from.1.min(to.1) - radius).floor().max(0.0) as u32;
        let max_x = ((from.0.max(to.0) + radius).ceil().max(0.0) as u32).min(width - 1);
        let max_y = ((from.1.max(to.1) + radius).ceil().max(0.0) as u32).min(height - 1);

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let center = (x as f32 + 0.5, y as f32 + 0.5);
                if distance_to_segment(center, from, to) > radius {
                    continue;
                }
                let pixel = paint.get_pixel_mut(x, y);
                match tool {
                    Tool::Brush => {
                        let existing = pixel[3] as f32 / 255.0;
                        let alpha = BRUSH_ALPHA + existing * (1.0 - BRUSH_ALPHA);
                        *pixel = Rgba([255, 255, 255, (alpha * 255.0).round() as u8]);
                    }
                    Tool::Eraser => *pixel = TRANSPARENT,
                }
            }
        }
    }
}

fn distance_to_segment(point: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f32::EPSILON {
        0.0
    } else {
        (((point.0 - a.0) * dx + (point.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((point.0 - cx).powi(2) + (point.1 - cy).powi(2)).sqrt()
}

pub(crate) fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, MaskError> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|err| MaskError::Encode(err.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_COLOR: Rgba<u8> = Rgba([10, 20, 30, 255]);

    fn editor(size: u32) -> MaskEditor {
        let mut editor = MaskEditor::new();
        editor.setup_canvas_image(RgbaImage::from_pixel(size, size, BASE_COLOR));
        editor
    }

    fn is_white(mask: &RgbaImage, x: u32, y: u32) -> bool {
        *mask.get_pixel(x, y) == MASK_EDIT
    }

    fn stroke(editor: &mut MaskEditor, points: &[(f32, f32)]) {
        let mut iter = points.iter();
        if let Some((x, y)) = iter.next() {
            editor.start_stroke(PointerPosition::new(*x, *y));
        }
        for (x, y) in iter {
            editor.continue_stroke(PointerPosition::new(*x, *y));
        }
        editor.end_stroke();
    }

    #[test]
    fn uninitialized_editor_rejects_work() {
        let mut editor = MaskEditor::new();
        assert_eq!(editor.state(), EditorState::Uninitialized);
        assert!(!editor.start_stroke(PointerPosition::new(1.0, 1.0)));
        assert_eq!(editor.extract_mask(), Err(MaskError::NotReady));
        assert_eq!(editor.extract_base_image(), Err(MaskError::NotReady));
    }

    #[test]
    fn state_machine_follows_stroke_lifecycle() {
        let mut editor = editor(32);
        assert_eq!(editor.state(), EditorState::Ready);
        editor.start_stroke(PointerPosition::new(5.0, 5.0));
        assert_eq!(editor.state(), EditorState::Drawing);
        editor.continue_stroke(PointerPosition::new(8.0, 5.0));
        assert_eq!(editor.state(), EditorState::Drawing);
        editor.end_stroke();
        assert_eq!(editor.state(), EditorState::Ready);
    }

    #[test]
    fn untouched_mask_is_black_and_opaque() -> anyhow::Result<()> {
        let editor = editor(16);
        let first = editor.mask_image()?;
        assert!(first.pixels().all(|pixel| *pixel == MASK_KEEP));
        assert_eq!(editor.extract_mask()?, editor.extract_mask()?);
        Ok(())
    }

    #[test]
    fn stroke_marks_pixels_along_its_path() -> anyhow::Result<()> {
        let mut editor = editor(100);
        editor.set_brush_size(10);
        stroke(&mut editor, &[(10.0, 50.0), (90.0, 50.0)]);

        let mask = editor.mask_image()?;
        for x in [10, 30, 50, 70, 89] {
            assert!(is_white(&mask, x, 50), "x={x}");
        }
        assert!(!is_white(&mask, 50, 10));
        assert!(!is_white(&mask, 50, 90));
        assert!(mask.pixels().all(|pixel| pixel[3] == 255));
        Ok(())
    }

    #[test]
    fn single_coat_stays_below_threshold() -> anyhow::Result<()> {
        let mut editor = editor(40);
        editor.set_brush_size(6);
        editor.start_stroke(PointerPosition::new(20.0, 20.0));
        editor.end_stroke();

        let alpha = editor
            .paint_layer()
            .map(|layer| layer.get_pixel(20, 20)[3])
            .unwrap_or_default();
        assert!(alpha > 0 && alpha <= ALPHA_THRESHOLD, "alpha={alpha}");
        assert!(!is_white(&editor.mask_image()?, 20, 20));
        Ok(())
    }

    #[test]
    fn pointer_coordinates_scale_with_display_size() -> anyhow::Result<()> {
        let mut editor = editor(100);
        editor.set_brush_size(4);
        editor.set_display_rect(Some(DisplayRect {
            left: 10.0,
            top: 20.0,
            width: 50.0,
            height: 50.0,
        }));
        assert_eq!(
            editor.to_buffer_coords(PointerPosition::new(35.0, 45.0)),
            (50.0, 50.0)
        );

        stroke(&mut editor, &[(35.0, 45.0), (36.0, 45.0)]);
        let mask = editor.mask_image()?;
        assert!(is_white(&mask, 50, 50));
        assert!(!is_white(&mask, 25, 25));
        Ok(())
    }

    #[test]
    fn eraser_restores_transparency() -> anyhow::Result<()> {
        let mut editor = editor(60);
        editor.set_brush_size(10);
        stroke(&mut editor, &[(10.0, 30.0), (50.0, 30.0)]);
        assert!(is_white(&editor.mask_image()?, 30, 30));

        editor.set_tool(Tool::Eraser);
        editor.set_brush_size(20);
        stroke(&mut editor, &[(30.0, 30.0), (31.0, 30.0)]);
        let mask = editor.mask_image()?;
        assert!(!is_white(&mask, 30, 30));
        assert!(is_white(&mask, 12, 30));
        assert_eq!(editor.paint_layer().map(|l| l.get_pixel(30, 30)[3]), Some(0));
        Ok(())
    }

    #[test]
    fn tool_and_size_changes_keep_existing_paint() -> anyhow::Result<()> {
        let mut editor = editor(40);
        editor.set_brush_size(8);
        stroke(&mut editor, &[(20.0, 20.0), (22.0, 20.0)]);
        let before = editor.mask_image()?;

        editor.set_tool(Tool::Eraser);
        editor.set_brush_size(30);
        assert_eq!(editor.mask_image()?, before);
        Ok(())
    }

    #[test]
    fn clear_discards_paint_but_keeps_canvas() -> anyhow::Result<()> {
        let mut editor = editor(30);
        stroke(&mut editor, &[(5.0, 5.0), (25.0, 25.0)]);
        editor.clear();
        assert_eq!(editor.state(), EditorState::Ready);
        assert!(editor.mask_image()?.pixels().all(|pixel| *pixel == MASK_KEEP));
        assert_eq!(editor.preview()?, RgbaImage::from_pixel(30, 30, BASE_COLOR));
        Ok(())
    }

    #[test]
    fn base_image_ignores_paint() -> anyhow::Result<()> {
        let mut editor = editor(24);
        stroke(&mut editor, &[(2.0, 2.0), (20.0, 20.0)]);

        let decoded = image::load_from_memory(&editor.extract_base_image()?)?.to_rgba8();
        assert_eq!(decoded, RgbaImage::from_pixel(24, 24, BASE_COLOR));

        let mask = image::load_from_memory(&editor.extract_mask()?)?.to_rgba8();
        assert_eq!(mask.dimensions(), (24, 24));
        Ok(())
    }

    #[test]
    fn preview_export_shows_paint_over_base() -> anyhow::Result<()> {
        let mut editor = editor(24);
        editor.set_brush_size(6);
        stroke(&mut editor, &[(4.0, 12.0), (20.0, 12.0)]);

        let preview = image::load_from_memory(&editor.extract_preview()?)?.to_rgba8();
        assert_eq!(preview.dimensions(), (24, 24));
        assert_ne!(*preview.get_pixel(12, 12), BASE_COLOR);
        assert_eq!(*preview.get_pixel(12, 1), BASE_COLOR);
        assert_eq!(MaskEditor::new().extract_preview(), Err(MaskError::NotReady));
        Ok(())
    }

    #[test]
    fn setup_canvas_decodes_encoded_images() -> anyhow::Result<()> {
        let encoded = encode_png(&RgbaImage::from_pixel(7, 5, BASE_COLOR))?;
        let mut editor = MaskEditor::new();
        editor.setup_canvas(&encoded)?;
        assert_eq!(editor.dimensions(), Some((7, 5)));

        assert!(matches!(
            editor.setup_canvas(b"definitely not an image"),
            Err(MaskError::Decode(_))
        ));
        assert_eq!(editor.dimensions(), Some((7, 5)));
        Ok(())
    }

    #[test]
    fn tool_parses_from_text() {
        assert_eq!("Brush".parse::<Tool>(), Ok(Tool::Brush));
        assert_eq!("erase".parse::<Tool>(), Ok(Tool::Eraser));
        assert!("spray".parse::<Tool>().is_err());
    }
}
