//! Text rasterization: Unicode string + style in, PNG block + exact height
//! out.
//!
//! Every text field in the document goes through this one surface. The
//! block's height is computed from the wrap result before a single pixel
//! exists, because downstream boxes are positioned with it. The transient
//! pixmap lives only inside `rasterize_clamped` and is dropped on every
//! exit path.

use crate::assets::png_data_uri;
use crate::error::ShotPressError;
use crate::font::{FontRegistry, detect_direction};
use crate::types::{Color, Pt};
use rustybuzz::{Face as HbFace, UnicodeBuffer};
use std::sync::Arc;
use tiny_skia::{FillRule, Paint, Path, PathBuilder, Pixmap, Transform};
use ttf_parser::{GlyphId, OutlineBuilder};

/// Vertical padding above the first and below the last line, in points.
fn block_padding() -> Pt {
    Pt::from_f32(1.0)
}

pub(crate) const DEFAULT_SUPERSAMPLE: f32 = 2.0;
pub(crate) const DEFAULT_MAX_RASTER_PIXELS: u64 = 1 << 24;
pub(crate) const MIN_RASTER_PIXELS: u64 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Regular,
    Bold,
}

#[derive(Debug, Clone)]
pub struct TextStyle {
    pub font_name: String,
    pub font_size: Pt,
    pub weight: FontWeight,
    pub color: Color,
    pub align: TextAlign,
}

impl TextStyle {
    pub fn new(font_name: impl Into<String>, font_size: Pt) -> Self {
        Self {
            font_name: font_name.into(),
            font_size,
            weight: FontWeight::Regular,
            color: Color::BLACK,
            align: TextAlign::Left,
        }
    }

    pub fn bold(mut self) -> Self {
        self.weight = FontWeight::Bold;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn centered(mut self) -> Self {
        self.align = TextAlign::Center;
        self
    }
}

/// A pre-rendered text block with a known geometry.
#[derive(Debug, Clone)]
pub struct RasterBlock {
    data: Vec<u8>,
    pub width: Pt,
    pub height: Pt,
    pub line_count: usize,
}

impl RasterBlock {
    pub fn png_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Resource identifier understood by the page-drawing surface.
    pub fn resource_uri(&self) -> String {
        png_data_uri(&self.data)
    }
}

pub struct TextRasterizer {
    registry: Arc<FontRegistry>,
    supersample: f32,
    max_pixels: u64,
}

impl TextRasterizer {
    pub(crate) fn new(registry: Arc<FontRegistry>, supersample: f32, max_pixels: u64) -> Self {
        Self {
            registry,
            supersample,
            max_pixels,
        }
    }

    pub fn rasterize(
        &self,
        text: &str,
        target_width: Pt,
        style: &TextStyle,
    ) -> Result<RasterBlock, ShotPressError> {
        self.rasterize_clamped(text, target_width, style, None)
    }

    /// Like `rasterize`, but caps the surface height: lines past the cap
    /// are clipped away instead of growing the block. The layout engine
    /// uses this for the fixed-row clipping rule.
    pub fn rasterize_clamped(
        &self,
        text: &str,
        target_width: Pt,
        style: &TextStyle,
        max_height: Option<Pt>,
    ) -> Result<RasterBlock, ShotPressError> {
        if target_width <= Pt::ZERO {
            return Err(ShotPressError::InvalidConfiguration(
                "raster target width must be positive".to_string(),
            ));
        }
        if style.font_size <= Pt::ZERO {
            return Err(ShotPressError::InvalidConfiguration(
                "raster font size must be positive".to_string(),
            ));
        }

        let font_name = self.resolve_style_font(style);
        let lines = wrap_lines(text, target_width, |fragment| {
            self.registry
                .measure_text_width(&font_name, style.font_size, fragment)
        });

        // Height is fixed here, before any surface exists.
        let line_height = self.registry.line_height(
            &font_name,
            style.font_size,
            style.font_size.mul_ratio(29, 20),
        );
        let full_height = line_height * (lines.len() as i32) + block_padding() * 2;
        let height = match max_height {
            Some(cap) if cap < full_height => cap.max(Pt::ZERO),
            _ => full_height,
        };

        let width_px = px_len(target_width, self.supersample);
        let height_px = px_len(height, self.supersample);
        let area = width_px as u64 * height_px as u64;
        if area > self.max_pixels {
            return Err(ShotPressError::RasterLimitExceeded {
                requested_px: area,
                cap_px: self.max_pixels,
            });
        }

        let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
            ShotPressError::InvalidConfiguration(format!(
                "invalid raster surface {}x{}",
                width_px, height_px
            ))
        })?;

        if let Some(font) = self.registry.resolve(&font_name) {
            let ascent = self.registry.ascent(
                &font_name,
                style.font_size,
                style.font_size.mul_ratio(4, 5),
            );
            for (line_index, line) in lines.iter().enumerate() {
                if line.is_empty() {
                    continue;
                }
                let x_origin = match style.align {
                    TextAlign::Left => Pt::ZERO,
                    TextAlign::Center => {
                        let line_width = self.registry.measure_text_width(
                            &font_name,
                            style.font_size,
                            line,
                        );
                        (target_width - line_width).max(Pt::ZERO) / 2
                    }
                };
                let baseline =
                    block_padding() + line_height * (line_index as i32) + ascent;
                draw_line(
                    &mut pixmap,
                    &font.data,
                    line,
                    style.font_size.to_f32() * self.supersample,
                    x_origin.to_f32() * self.supersample,
                    baseline.to_f32() * self.supersample,
                    style.color,
                );
            }
        }

        let data = pixmap
            .encode_png()
            .map_err(|e| ShotPressError::SurfacePrimitive(format!("png encode failed: {e}")))?;
        Ok(RasterBlock {
            data,
            width: target_width,
            height,
            line_count: lines.len(),
        })
    }

    fn resolve_style_font(&self, style: &TextStyle) -> String {
        if style.weight == FontWeight::Bold {
            let candidate = format!("{} Bold", style.font_name);
            if self.registry.resolve(&candidate).is_some() {
                return candidate;
            }
        }
        style.font_name.clone()
    }
}

/// Greedy line breaking over whitespace tokens. Words are appended to the
/// current line while the measured tentative width fits; the final buffer
/// always commits, so the result is never empty. A single word wider than
/// the target gets a line of its own rather than being split.
pub(crate) fn wrap_lines(
    text: &str,
    target_width: Pt,
    measure: impl Fn(&str) -> Pt,
) -> Vec<String> {
    let max_width = target_width.max(Pt::from_f32(1.0));
    let space_width = measure(" ");
    let mut lines = Vec::new();

    for segment in text.split('\n') {
        if segment.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        let mut current = String::new();
        let mut current_width = Pt::ZERO;
        for word in segment.split_whitespace() {
            let word_width = measure(word);
            if current.is_empty() {
                current.push_str(word);
                current_width = word_width;
                if word_width > max_width {
                    lines.push(std::mem::take(&mut current));
                    current_width = Pt::ZERO;
                }
            } else {
                let tentative = current_width + space_width + word_width;
                if tentative <= max_width {
                    current.push(' ');
                    current.push_str(word);
                    current_width = tentative;
                } else {
                    lines.push(std::mem::take(&mut current));
                    if word_width > max_width {
                        lines.push(word.to_string());
                        current_width = Pt::ZERO;
                    } else {
                        current.push_str(word);
                        current_width = word_width;
                    }
                }
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn px_len(value: Pt, scale: f32) -> u32 {
    let px = (value.to_f32() * scale).ceil();
    if px < 1.0 { 1 } else { px as u32 }
}

struct GlyphPlacement {
    glyph_id: u16,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

fn draw_line(
    pixmap: &mut Pixmap,
    font_data: &[u8],
    text: &str,
    font_px: f32,
    origin_x_px: f32,
    baseline_px: f32,
    color: Color,
) {
    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return;
    };
    let Ok(outline_face) = ttf_parser::Face::parse(font_data, 0) else {
        return;
    };

    let placements = shape_line(&face, text, font_px, origin_x_px);
    if placements.is_empty() {
        return;
    }

    let mut paint = Paint::default();
    paint.set_color(to_sk_color(color));
    paint.anti_alias = true;
    // Glyph outlines are y-up; flip about the baseline into pixmap space.
    let flip = Transform::from_row(1.0, 0.0, 0.0, -1.0, 0.0, baseline_px);

    for placement in placements {
        let mut builder =
            GlyphPathBuilder::new(placement.origin_x, placement.origin_y, placement.scale);
        if outline_face
            .outline_glyph(GlyphId(placement.glyph_id), &mut builder)
            .is_none()
        {
            continue;
        }
        let Some(path) = builder.finish() else {
            continue;
        };
        pixmap.fill_path(&path, &paint, FillRule::Winding, flip, None);
    }
}

fn shape_line(face: &HbFace, text: &str, font_px: f32, origin_x_px: f32) -> Vec<GlyphPlacement> {
    let units_per_em = face.units_per_em().max(1) as f32;
    let scale = font_px / units_per_em;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    let mut pen_y = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid == 0 {
            pen_x += (pos.x_advance as f32 / units_per_em) * font_px;
            pen_y += (pos.y_advance as f32 / units_per_em) * font_px;
            continue;
        }
        let x_off = (pos.x_offset as f32 / units_per_em) * font_px;
        let y_off = (pos.y_offset as f32 / units_per_em) * font_px;
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: origin_x_px + pen_x + x_off,
            origin_y: pen_y + y_off,
            scale,
        });
        pen_x += (pos.x_advance as f32 / units_per_em) * font_px;
        pen_y += (pos.y_advance as f32 / units_per_em) * font_px;
    }
    out
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(
            self.origin_x + x1 * self.scale,
            self.origin_y + y1 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            self.origin_x + x1 * self.scale,
            self.origin_y + y1 * self.scale,
            self.origin_x + x2 * self.scale,
            self.origin_y + y2 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn to_sk_color(color: Color) -> tiny_skia::Color {
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    tiny_skia::Color::from_rgba8(to_u8(color.r), to_u8(color.g), to_u8(color.b), 255)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rasterizer() -> TextRasterizer {
        TextRasterizer::new(
            Arc::new(FontRegistry::new()),
            DEFAULT_SUPERSAMPLE,
            DEFAULT_MAX_RASTER_PIXELS,
        )
    }

    fn style(size: f32) -> TextStyle {
        TextStyle::new("Inter", Pt::from_f32(size))
    }

    #[test]
    fn empty_text_yields_a_single_minimum_line() {
        let raster = test_rasterizer();
        let block = raster
            .rasterize("", Pt::from_f32(100.0), &style(10.0))
            .expect("rasterize");
        assert_eq!(block.line_count, 1);
        // Fallback line height 1.45 em plus 1 pt padding on each side.
        assert_eq!(block.height.to_milli_i64(), 16_500);
        assert!(!block.png_bytes().is_empty());
    }

    #[test]
    fn wrap_respects_target_width_with_fallback_metrics() {
        // Heuristic metrics: 6 pt per char at 10 pt size.
        let measure = |s: &str| Pt::from_f32(6.0) * (s.chars().count() as i32);
        let wide = wrap_lines("aaaa bbbb", Pt::from_f32(100.0), measure);
        assert_eq!(wide, vec!["aaaa bbbb".to_string()]);
        let narrow = wrap_lines("aaaa bbbb", Pt::from_f32(30.0), measure);
        assert_eq!(narrow, vec!["aaaa".to_string(), "bbbb".to_string()]);
    }

    #[test]
    fn overlong_words_get_their_own_line() {
        let measure = |s: &str| Pt::from_f32(6.0) * (s.chars().count() as i32);
        let lines = wrap_lines("a gigantic-unbreakable-token b", Pt::from_f32(40.0), measure);
        assert_eq!(
            lines,
            vec![
                "a".to_string(),
                "gigantic-unbreakable-token".to_string(),
                "b".to_string(),
            ]
        );
    }

    #[test]
    fn blank_lines_are_preserved() {
        let measure = |s: &str| Pt::from_f32(6.0) * (s.chars().count() as i32);
        let lines = wrap_lines("top\n\nbottom", Pt::from_f32(100.0), measure);
        assert_eq!(
            lines,
            vec!["top".to_string(), String::new(), "bottom".to_string()]
        );
    }

    #[test]
    fn height_grows_monotonically_with_text_length() {
        let raster = test_rasterizer();
        let width = Pt::from_f32(80.0);
        let mut text = String::new();
        let mut last_height = Pt::ZERO;
        for _ in 0..8 {
            text.push_str("từng chữ một ");
            let block = raster
                .rasterize(&text, width, &style(10.0))
                .expect("rasterize");
            assert!(block.height >= last_height);
            last_height = block.height;
        }
    }

    #[test]
    fn alignment_never_changes_geometry() {
        let raster = test_rasterizer();
        let width = Pt::from_f32(90.0);
        let left = raster
            .rasterize("căn giữa hay căn trái", width, &style(11.0))
            .expect("left");
        let centered = raster
            .rasterize(
                "căn giữa hay căn trái",
                width,
                &style(11.0).centered(),
            )
            .expect("center");
        assert_eq!(left.height, centered.height);
        assert_eq!(left.line_count, centered.line_count);
        assert_eq!(left.width, centered.width);
    }

    #[test]
    fn clamped_rasterization_clips_instead_of_growing() {
        let raster = test_rasterizer();
        let cap = Pt::from_f32(20.0);
        let block = raster
            .rasterize_clamped(
                "word word word word word word word word word word",
                Pt::from_f32(40.0),
                &style(10.0),
                Some(cap),
            )
            .expect("rasterize");
        assert_eq!(block.height, cap);
        assert!(block.line_count > 1);
    }

    #[test]
    fn oversized_text_terminates_under_the_default_cap() {
        // 5,000 repeated words at a 50 mm column: bounded surface, no hang.
        let raster = TextRasterizer::new(
            Arc::new(FontRegistry::new()),
            1.0,
            DEFAULT_MAX_RASTER_PIXELS,
        );
        let text = "lorem ".repeat(5_000);
        let block = raster
            .rasterize(&text, Pt::from_mm(50.0), &style(9.0))
            .expect("terminates");
        assert!(block.line_count >= 1_000);
    }

    #[test]
    fn tight_pixel_caps_fail_explicitly() {
        let raster = TextRasterizer::new(Arc::new(FontRegistry::new()), 2.0, 1 << 12);
        let text = "lorem ".repeat(5_000);
        let err = raster
            .rasterize(&text, Pt::from_mm(50.0), &style(9.0))
            .expect_err("must exceed cap");
        match err {
            ShotPressError::RasterLimitExceeded {
                requested_px,
                cap_px,
            } => {
                assert!(requested_px > cap_px);
                assert_eq!(cap_px, 1 << 12);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_inputs_are_rejected_up_front() {
        let raster = test_rasterizer();
        assert!(matches!(
            raster.rasterize("x", Pt::ZERO, &style(10.0)),
            Err(ShotPressError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            raster.rasterize("x", Pt::from_f32(50.0), &style(0.0)),
            Err(ShotPressError::InvalidConfiguration(_))
        ));
    }
}
