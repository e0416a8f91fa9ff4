//! Page and box geometry, and the engine that turns shots into positioned
//! pages.
//!
//! Geometry is pure: every rect is a function of (page constants, slot
//! index), so pagination is testable without touching a pixel. The engine
//! layers rasterization on top and owns the placeholder/warning policy for
//! image payloads.

use crate::assets;
use crate::error::{ExportWarning, ShotPressError};
use crate::rasterizer::{RasterBlock, TextRasterizer, TextStyle};
use crate::story::{AspectRatio, Shot, Storyboard};
use crate::types::{Color, Margins, Pt, Rect, Size};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxKind {
    TitleBlock,
    MetaBlock,
    BodyBlock,
    ImageSlot,
    HeaderBlock,
    FooterBlock,
}

#[derive(Debug, Clone)]
pub enum BoxContent {
    /// A pre-rasterized text block.
    Raster(RasterBlock),
    /// An external image drawn inside `frame` (a sub-rect of the box).
    Image { source: String, frame: Rect },
    /// Flat placeholder fill for a missing or undecodable image.
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct LayoutBox {
    pub kind: BoxKind,
    pub rect: Rect,
    pub content: BoxContent,
    /// Index of the shot this box belongs to; `None` for page furniture
    /// (cover stack, header, footer).
    pub shot: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PageDescriptor {
    /// 0 is the cover; content pages count from 1.
    pub index: usize,
    pub boxes: Vec<LayoutBox>,
}

/// Fixed page constants. All rects derive from these and a slot index.
#[derive(Debug, Clone)]
pub struct PageGeometry {
    pub page_size: Size,
    pub margins: Margins,
    pub capacity: usize,
    pub row_height: Pt,
    pub row_gap: Pt,
    pub image_slot_width: Pt,
    pub column_gap: Pt,
    pub header_height: Pt,
    pub header_gap: Pt,
    pub footer_height: Pt,
}

impl PageGeometry {
    /// A4 portrait storyboard defaults: three rows per page, image slot on
    /// the left, text column on the right.
    pub fn a4_storyboard(capacity: usize) -> Self {
        Self {
            page_size: Size::a4(),
            margins: Margins::all_mm(15.0),
            capacity,
            row_height: Pt::from_mm(72.0),
            row_gap: Pt::from_mm(6.0),
            image_slot_width: Pt::from_mm(70.0),
            column_gap: Pt::from_mm(6.0),
            header_height: Pt::from_f32(22.0),
            header_gap: Pt::from_f32(10.0),
            footer_height: Pt::from_f32(14.0),
        }
    }

    pub fn printable(&self) -> Rect {
        Rect::new(
            self.margins.left,
            self.margins.top,
            self.page_size.width - self.margins.left - self.margins.right,
            self.page_size.height - self.margins.top - self.margins.bottom,
        )
    }

    pub fn header_rect(&self) -> Rect {
        let printable = self.printable();
        Rect::new(printable.x, printable.y, printable.width, self.header_height)
    }

    pub fn footer_rect(&self) -> Rect {
        let printable = self.printable();
        Rect::new(
            printable.x,
            printable.bottom() - self.footer_height,
            printable.width,
            self.footer_height,
        )
    }

    pub fn content_origin_y(&self) -> Pt {
        self.margins.top + self.header_height + self.header_gap
    }

    /// Top edge of the row at `slot` (position within the page).
    pub fn row_top(&self, slot: usize) -> Pt {
        let slot = if self.capacity == 0 {
            0
        } else {
            slot % self.capacity
        };
        self.content_origin_y() + (self.row_height + self.row_gap) * (slot as i32)
    }

    pub fn row_rect(&self, slot: usize) -> Rect {
        let printable = self.printable();
        Rect::new(
            printable.x,
            self.row_top(slot),
            printable.width,
            self.row_height,
        )
    }

    pub fn image_slot_rect(&self, slot: usize) -> Rect {
        let row = self.row_rect(slot);
        Rect::new(row.x, row.y, self.image_slot_width, row.height)
    }

    pub fn text_column_rect(&self, slot: usize) -> Rect {
        let row = self.row_rect(slot);
        let x = row.x + self.image_slot_width + self.column_gap;
        Rect::new(x, row.y, row.right() - x, row.height)
    }

    pub fn content_page_count(&self, shot_count: usize) -> usize {
        if self.capacity == 0 {
            return 0;
        }
        shot_count.div_ceil(self.capacity)
    }

    pub(crate) fn validate(&self) -> Result<(), ShotPressError> {
        if self.capacity == 0 {
            return Err(ShotPressError::InvalidConfiguration(
                "page capacity must be at least 1".to_string(),
            ));
        }
        let printable = self.printable();
        if printable.width <= Pt::ZERO || printable.height <= Pt::ZERO {
            return Err(ShotPressError::InvalidConfiguration(
                "margins leave no printable area".to_string(),
            ));
        }
        if self.image_slot_width + self.column_gap >= printable.width {
            return Err(ShotPressError::InvalidConfiguration(
                "image slot leaves no room for the text column".to_string(),
            ));
        }
        let rows_bottom = self.row_top(self.capacity - 1) + self.row_height;
        if rows_bottom > self.footer_rect().y {
            return Err(ShotPressError::InvalidConfiguration(format!(
                "{} rows of {}pt do not fit the content area",
                self.capacity,
                self.row_height.to_f32()
            )));
        }
        Ok(())
    }
}

/// Letterbox the declared aspect tag inside a slot. The frame depends only
/// on the tag, never on decoded image bytes.
pub fn fit_aspect(slot: Rect, aspect: AspectRatio) -> Rect {
    let (aw, ah) = aspect.ratio();
    let fitted_height = slot.width.mul_ratio(ah, aw);
    if fitted_height <= slot.height {
        let y = slot.y + (slot.height - fitted_height) / 2;
        Rect::new(slot.x, y, slot.width, fitted_height)
    } else {
        let fitted_width = slot.height.mul_ratio(aw, ah);
        let x = slot.x + (slot.width - fitted_width) / 2;
        Rect::new(x, slot.y, fitted_width, slot.height)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Palette {
    pub ink: Color,
    pub body: Color,
    pub muted: Color,
    pub faint: Color,
    pub accent: Color,
    pub slot_fill: Color,
    pub slot_border: Color,
}

pub(crate) fn palette() -> Palette {
    Palette {
        ink: Color::BLACK,
        body: Color::gray(0.2),
        muted: Color::gray(0.4),
        faint: Color::gray(0.66),
        accent: Color::rgb(1.0, 0.42, 0.0),
        slot_fill: Color::gray(0.93),
        slot_border: Color::BLACK,
    }
}

enum SlotImage {
    Image(String),
    Placeholder,
}

struct RowContent {
    shot_index: u32,
    aspect: AspectRatio,
    title: RasterBlock,
    meta: RasterBlock,
    body: Option<RasterBlock>,
    prompt: Option<RasterBlock>,
    image: SlotImage,
    warning: Option<ExportWarning>,
}

pub struct PageLayoutEngine {
    geometry: PageGeometry,
    rasterizer: TextRasterizer,
    font_name: String,
}

impl PageLayoutEngine {
    pub(crate) fn new(
        geometry: PageGeometry,
        rasterizer: TextRasterizer,
        font_name: String,
    ) -> Self {
        Self {
            geometry,
            rasterizer,
            font_name,
        }
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    fn style(&self, size: f32) -> TextStyle {
        TextStyle::new(self.font_name.clone(), Pt::from_f32(size))
    }

    /// Exactly one cover page: fixed vertical stack, centered.
    pub fn layout_cover(&self, board: &Storyboard) -> Result<PageDescriptor, ShotPressError> {
        let colors = palette();
        let printable = self.geometry.printable();
        let width = printable.width;

        let title_top = Pt::from_mm(80.0);
        let subtitle_top = Pt::from_mm(100.0);
        let summary_top = Pt::from_mm(120.0);
        let meta_top = Pt::from_mm(250.0);

        let title = self.rasterizer.rasterize_clamped(
            &board.title,
            width,
            &self.style(26.0).bold().centered().with_color(colors.ink),
            Some(subtitle_top - title_top),
        )?;
        let subtitle = self.rasterizer.rasterize(
            "STORYBOARD",
            width,
            &self.style(11.0).centered().with_color(colors.accent),
        )?;
        let summary = self.rasterizer.rasterize_clamped(
            &board.summary,
            width,
            &self.style(12.0).centered().with_color(colors.body),
            Some(meta_top - summary_top - Pt::from_f32(12.0)),
        )?;
        let meta_line = format!(
            "{} shots · {}s total · {} per page · A4 portrait",
            board.shots.len(),
            board.total_duration_secs(),
            self.geometry.capacity
        );
        let meta = self.rasterizer.rasterize(
            &meta_line,
            width,
            &self.style(9.0).centered().with_color(colors.faint),
        )?;

        let mut boxes = Vec::new();
        for (kind, top, block) in [
            (BoxKind::TitleBlock, title_top, title),
            (BoxKind::MetaBlock, subtitle_top, subtitle),
            (BoxKind::BodyBlock, summary_top, summary),
            (BoxKind::MetaBlock, meta_top, meta),
        ] {
            let rect = Rect::new(printable.x, top, block.width, block.height);
            boxes.push(LayoutBox {
                kind,
                rect,
                content: BoxContent::Raster(block),
                shot: None,
            });
        }
        Ok(PageDescriptor { index: 0, boxes })
    }

    /// Content pages in strict shot order, `capacity` rows per page.
    ///
    /// Rasterization of the rows is independent per shot and fans out on
    /// the rayon pool; results are stitched back in input order before any
    /// box is placed.
    pub fn layout_content_pages(
        &self,
        board: &Storyboard,
    ) -> Result<(Vec<PageDescriptor>, Vec<ExportWarning>), ShotPressError> {
        let rows: Vec<RowContent> = board
            .shots
            .par_iter()
            .map(|shot| self.compose_row(shot))
            .collect::<Result<Vec<_>, _>>()?;

        let mut warnings = Vec::new();
        for row in &rows {
            if let Some(warning) = &row.warning {
                warnings.push(warning.clone());
            }
        }

        let total_pages = 1 + self.geometry.content_page_count(board.shots.len());
        let mut pages = Vec::new();
        for (chunk_index, chunk) in rows.chunks(self.geometry.capacity).enumerate() {
            let page_index = chunk_index + 1;
            let mut boxes = Vec::new();
            boxes.push(self.header_box(&board.title)?);
            for (slot, row) in chunk.iter().enumerate() {
                self.place_row(slot, row, &mut boxes);
            }
            boxes.push(self.footer_box(page_index + 1, total_pages)?);
            pages.push(PageDescriptor {
                index: page_index,
                boxes,
            });
        }
        Ok((pages, warnings))
    }

    fn compose_row(&self, shot: &Shot) -> Result<RowContent, ShotPressError> {
        let colors = palette();
        let column = self.geometry.text_column_rect(0);
        let width = column.width;

        let title_text = match &shot.scene_label {
            Some(label) => format!("Shot {} — {}", shot.index, label),
            None => format!("Shot {}", shot.index),
        };
        let title = self.rasterizer.rasterize_clamped(
            &title_text,
            width,
            &self.style(13.0).bold().with_color(colors.ink),
            Some(self.geometry.row_height),
        )?;

        let meta_text = format!(
            "{} · {} · {}",
            shot.kind.label(),
            format_duration(shot.duration_secs),
            shot.aspect.as_str()
        );
        let meta = self.rasterizer.rasterize_clamped(
            &meta_text,
            width,
            &self.style(9.0).with_color(colors.muted),
            Some((self.geometry.row_height - title.height).max(Pt::ZERO)),
        )?;

        let mut remaining = self.geometry.row_height - title.height - meta.height;
        let body = if remaining > Pt::from_f32(10.0) {
            let block = self.rasterizer.rasterize_clamped(
                &shot.description,
                width,
                &self.style(10.0).with_color(colors.body),
                Some(remaining),
            )?;
            remaining = remaining - block.height;
            Some(block)
        } else {
            None
        };

        let prompt = match &shot.prompt {
            Some(text) if remaining > Pt::from_f32(9.0) => Some(self.rasterizer.rasterize_clamped(
                text,
                width,
                &self.style(8.5).with_color(colors.faint),
                Some(remaining),
            )?),
            _ => None,
        };

        let (image, warning) = match &shot.image {
            None => (SlotImage::Placeholder, None),
            Some(source) => {
                if assets::probe_image_source(source) {
                    (SlotImage::Image(source.clone()), None)
                } else {
                    (
                        SlotImage::Placeholder,
                        Some(ExportWarning {
                            shot_index: shot.index,
                            message: "image payload could not be decoded; slot downgraded to placeholder".to_string(),
                        }),
                    )
                }
            }
        };

        Ok(RowContent {
            shot_index: shot.index,
            aspect: shot.aspect,
            title,
            meta,
            body,
            prompt,
            image,
            warning,
        })
    }

    fn place_row(&self, slot: usize, row: &RowContent, boxes: &mut Vec<LayoutBox>) {
        let slot_rect = self.geometry.image_slot_rect(slot);
        let content = match &row.image {
            SlotImage::Image(source) => BoxContent::Image {
                source: source.clone(),
                frame: fit_aspect(slot_rect, row.aspect),
            },
            SlotImage::Placeholder => BoxContent::Placeholder,
        };
        boxes.push(LayoutBox {
            kind: BoxKind::ImageSlot,
            rect: slot_rect,
            content,
            shot: Some(row.shot_index),
        });

        let column = self.geometry.text_column_rect(slot);
        let mut cursor = column.y;
        let stack = [
            (BoxKind::TitleBlock, Some(&row.title)),
            (BoxKind::MetaBlock, Some(&row.meta)),
            (BoxKind::BodyBlock, row.body.as_ref()),
            (BoxKind::BodyBlock, row.prompt.as_ref()),
        ];
        for (kind, block) in stack {
            let Some(block) = block else {
                continue;
            };
            boxes.push(LayoutBox {
                kind,
                rect: Rect::new(column.x, cursor, block.width, block.height),
                content: BoxContent::Raster(block.clone()),
                shot: Some(row.shot_index),
            });
            cursor += block.height;
        }
    }

    fn header_box(&self, title: &str) -> Result<LayoutBox, ShotPressError> {
        let colors = palette();
        let rect = self.geometry.header_rect();
        let block = self.rasterizer.rasterize_clamped(
            &title.to_uppercase(),
            rect.width,
            &self.style(13.0).bold().with_color(colors.ink),
            Some(rect.height),
        )?;
        Ok(LayoutBox {
            kind: BoxKind::HeaderBlock,
            rect: Rect::new(rect.x, rect.y, block.width, block.height),
            content: BoxContent::Raster(block),
            shot: None,
        })
    }

    fn footer_box(
        &self,
        page_number: usize,
        total_pages: usize,
    ) -> Result<LayoutBox, ShotPressError> {
        let colors = palette();
        let rect = self.geometry.footer_rect();
        let block = self.rasterizer.rasterize_clamped(
            &format!("Page {} / {}", page_number, total_pages),
            rect.width,
            &self.style(8.0).centered().with_color(colors.faint),
            Some(rect.height),
        )?;
        Ok(LayoutBox {
            kind: BoxKind::FooterBlock,
            rect: Rect::new(rect.x, rect.y, block.width, block.height),
            content: BoxContent::Raster(block),
            shot: None,
        })
    }
}

fn format_duration(secs: f32) -> String {
    let secs = secs.max(0.0);
    if (secs - secs.round()).abs() < 0.05 {
        format!("{}s", secs.round() as i64)
    } else {
        format!("{:.1}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontRegistry;
    use crate::rasterizer::{DEFAULT_MAX_RASTER_PIXELS, DEFAULT_SUPERSAMPLE};
    use crate::story::ShotKind;
    use std::sync::Arc;

    fn engine(capacity: usize) -> PageLayoutEngine {
        let registry = Arc::new(FontRegistry::new());
        let rasterizer =
            TextRasterizer::new(registry, DEFAULT_SUPERSAMPLE, DEFAULT_MAX_RASTER_PIXELS);
        PageLayoutEngine::new(
            PageGeometry::a4_storyboard(capacity),
            rasterizer,
            "Inter".to_string(),
        )
    }

    fn board(shot_count: usize) -> Storyboard {
        let mut board = Storyboard::new("Đêm cuối cùng", "Một thành phố không ngủ.");
        for i in 0..shot_count {
            board.push_shot(
                Shot::new(i as u32 + 1, ShotKind::Wide)
                    .with_duration(5.0)
                    .with_description("Toàn cảnh thành phố ban đêm"),
            );
        }
        board
    }

    #[test]
    fn row_top_follows_the_slot_formula() {
        let geometry = PageGeometry::a4_storyboard(3);
        let origin = geometry.content_origin_y();
        let stride = geometry.row_height + geometry.row_gap;
        assert_eq!(geometry.row_top(0), origin);
        assert_eq!(geometry.row_top(1), origin + stride);
        assert_eq!(geometry.row_top(2), origin + stride * 2);
        // Slot index wraps per page.
        assert_eq!(geometry.row_top(3), origin);
    }

    #[test]
    fn content_page_count_is_ceil_of_capacity_division() {
        let geometry = PageGeometry::a4_storyboard(3);
        assert_eq!(geometry.content_page_count(0), 0);
        assert_eq!(geometry.content_page_count(1), 1);
        assert_eq!(geometry.content_page_count(3), 1);
        assert_eq!(geometry.content_page_count(7), 3);
    }

    #[test]
    fn default_geometry_validates() {
        PageGeometry::a4_storyboard(3).validate().expect("valid");
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let geometry = PageGeometry::a4_storyboard(0);
        assert!(matches!(
            geometry.validate(),
            Err(ShotPressError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn oversized_rows_are_rejected() {
        let mut geometry = PageGeometry::a4_storyboard(3);
        geometry.row_height = Pt::from_mm(120.0);
        assert!(matches!(
            geometry.validate(),
            Err(ShotPressError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn fit_aspect_letterboxes_wide_and_tall_tags() {
        let slot = Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(160), Pt::from_i32(160));
        let wide = fit_aspect(slot, AspectRatio::SixteenNine);
        assert_eq!(wide.width, Pt::from_i32(160));
        assert_eq!(wide.height, Pt::from_i32(90));
        assert!(slot.contains_rect(&wide));

        let tall = fit_aspect(slot, AspectRatio::NineSixteen);
        assert_eq!(tall.height, Pt::from_i32(160));
        assert_eq!(tall.width, Pt::from_i32(90));
        assert!(slot.contains_rect(&tall));
    }

    #[test]
    fn cover_is_a_single_centered_stack() {
        let engine = engine(3);
        let cover = engine.layout_cover(&board(2)).expect("cover");
        assert_eq!(cover.index, 0);
        assert_eq!(cover.boxes.len(), 4);
        assert_eq!(cover.boxes[0].kind, BoxKind::TitleBlock);
        let printable = engine.geometry().printable();
        for layout_box in &cover.boxes {
            assert!(printable.contains_rect(&layout_box.rect));
        }
    }

    #[test]
    fn seven_shots_at_capacity_three_make_three_content_pages() {
        let engine = engine(3);
        let (pages, warnings) = engine.layout_content_pages(&board(7)).expect("layout");
        assert_eq!(pages.len(), 3);
        assert!(warnings.is_empty());
        assert_eq!(pages[0].index, 1);
        assert_eq!(pages[2].index, 3);
        // 3 + 3 + 1 shots; each shot contributes an image slot.
        let slots: Vec<usize> = pages
            .iter()
            .map(|p| {
                p.boxes
                    .iter()
                    .filter(|b| b.kind == BoxKind::ImageSlot)
                    .count()
            })
            .collect();
        assert_eq!(slots, vec![3, 3, 1]);
    }

    #[test]
    fn shot_order_is_preserved_across_pages() {
        let engine = engine(3);
        let (pages, _) = engine.layout_content_pages(&board(7)).expect("layout");
        let order: Vec<u32> = pages
            .iter()
            .flat_map(|p| p.boxes.iter())
            .filter(|b| b.kind == BoxKind::ImageSlot)
            .filter_map(|b| b.shot)
            .collect();
        assert_eq!(order, (1..=7).collect::<Vec<u32>>());
    }

    #[test]
    fn boxes_stay_inside_the_printable_area_and_never_overlap() {
        let engine = engine(3);
        let (pages, _) = engine.layout_content_pages(&board(5)).expect("layout");
        let printable = engine.geometry().printable();
        for page in &pages {
            for layout_box in &page.boxes {
                assert!(
                    printable.contains_rect(&layout_box.rect),
                    "box {:?} escapes the printable area on page {}",
                    layout_box.kind,
                    page.index
                );
            }
            for (i, a) in page.boxes.iter().enumerate() {
                for b in page.boxes.iter().skip(i + 1) {
                    assert!(
                        !a.rect.intersects(&b.rect),
                        "{:?} overlaps {:?} on page {}",
                        a.kind,
                        b.kind,
                        page.index
                    );
                }
            }
        }
    }

    #[test]
    fn missing_image_keeps_row_geometry_identical() {
        let engine = engine(3);

        let mut with_image = board(1);
        let png = {
            let mut pixmap = tiny_skia::Pixmap::new(4, 4).expect("pixmap");
            pixmap.fill(tiny_skia::Color::from_rgba8(0, 128, 255, 255));
            pixmap.encode_png().expect("png")
        };
        with_image.shots[0].image = Some(crate::assets::png_data_uri(&png));
        let without_image = board(1);

        let (pages_a, warn_a) = engine.layout_content_pages(&with_image).expect("layout");
        let (pages_b, warn_b) = engine.layout_content_pages(&without_image).expect("layout");
        assert!(warn_a.is_empty());
        assert!(warn_b.is_empty());

        let boxes_a = &pages_a[0].boxes;
        let boxes_b = &pages_b[0].boxes;
        assert_eq!(boxes_a.len(), boxes_b.len());
        for (a, b) in boxes_a.iter().zip(boxes_b.iter()) {
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.rect, b.rect);
        }
        let slot_a = boxes_a.iter().find(|b| b.kind == BoxKind::ImageSlot).unwrap();
        let slot_b = boxes_b.iter().find(|b| b.kind == BoxKind::ImageSlot).unwrap();
        assert!(matches!(slot_a.content, BoxContent::Image { .. }));
        assert!(matches!(slot_b.content, BoxContent::Placeholder));
    }

    #[test]
    fn undecodable_images_degrade_with_a_warning() {
        let engine = engine(3);
        let mut board = board(2);
        board.shots[1].image = Some("data:image/png;base64,AAAA".to_string());
        let (pages, warnings) = engine.layout_content_pages(&board).expect("layout");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].shot_index, 2);
        let slots: Vec<&LayoutBox> = pages[0]
            .boxes
            .iter()
            .filter(|b| b.kind == BoxKind::ImageSlot)
            .collect();
        assert!(matches!(slots[1].content, BoxContent::Placeholder));
    }

    #[test]
    fn empty_description_still_reserves_title_and_meta() {
        let engine = engine(3);
        let mut board = Storyboard::new("T", "S");
        board.push_shot(Shot::new(1, ShotKind::CloseUp).with_description(""));
        let (pages, _) = engine.layout_content_pages(&board).expect("layout");
        let kinds: Vec<BoxKind> = pages[0].boxes.iter().map(|b| b.kind).collect();
        assert!(kinds.contains(&BoxKind::TitleBlock));
        assert!(kinds.contains(&BoxKind::MetaBlock));
        assert!(kinds.contains(&BoxKind::BodyBlock));
    }

    #[test]
    fn duration_formatting_drops_trailing_zero_fractions() {
        assert_eq!(format_duration(5.0), "5s");
        assert_eq!(format_duration(7.5), "7.5s");
        assert_eq!(format_duration(-2.0), "0s");
    }
}
