//! The page-drawing surface: an append-only command stream.
//!
//! The canvas deliberately has no text primitive. Every piece of document
//! text reaches it as a pre-rasterized image, so the output never depends
//! on the viewer's font stack.

use crate::types::{Color, Pt, Size};

#[derive(Debug, Clone)]
pub enum Command {
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    /// Filled rectangle in the current fill color.
    DrawRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    /// Outlined rectangle in the current stroke color and line width.
    StrokeRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    /// Place an image resource (`data:` URI or file path) at the given box.
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: String,
    },
    // Non-rendered metadata used for page-aware reporting and tests.
    Meta {
        key: String,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct Page {
    pub commands: Vec<Command>,
}

impl Page {
    fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub page_size: Size,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone)]
struct DrawState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
}

impl DrawState {
    fn initial() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
        }
    }
}

pub struct Canvas {
    page_size: Size,
    pages: Vec<Page>,
    current: Page,
    state: DrawState,
}

impl Canvas {
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
            current: Page::new(),
            state: DrawState::initial(),
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.state.fill_color == color {
            return;
        }
        self.state.fill_color = color;
        self.current.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.state.stroke_color == color {
            return;
        }
        self.state.stroke_color = color;
        self.current.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Pt) {
        let width = width.max(Pt::ZERO);
        if self.state.line_width == width {
            return;
        }
        self.state.line_width = width;
        self.current.commands.push(Command::SetLineWidth(width));
    }

    pub fn draw_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.current.commands.push(Command::DrawRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn stroke_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.current.commands.push(Command::StrokeRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn draw_image(
        &mut self,
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: impl Into<String>,
    ) {
        self.current.commands.push(Command::DrawImage {
            x,
            y,
            width,
            height,
            resource_id: resource_id.into(),
        });
    }

    pub fn meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.current.commands.push(Command::Meta {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Close the current page and start a fresh one. Draw state resets at
    /// the page boundary, matching the serializer's per-page streams.
    pub fn show_page(&mut self) {
        let current = std::mem::replace(&mut self.current, Page::new());
        self.pages.push(current);
        self.state = DrawState::initial();
    }

    pub fn current_command_count(&self) -> usize {
        self.current.commands.len()
    }

    pub fn is_current_empty(&self) -> bool {
        self.current.commands.is_empty()
    }

    pub fn finish(mut self) -> Document {
        if !self.current.commands.is_empty() || self.pages.is_empty() {
            self.show_page();
        }
        Document {
            page_size: self.page_size,
            pages: self.pages,
        }
    }

    pub fn finish_without_show(self) -> Document {
        Document {
            page_size: self.page_size,
            pages: self.pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundant_state_changes_are_deduplicated() {
        let mut canvas = Canvas::new(Size::a4());
        canvas.set_fill_color(Color::gray(0.5));
        canvas.set_fill_color(Color::gray(0.5));
        canvas.set_line_width(Pt::from_f32(2.0));
        canvas.set_line_width(Pt::from_f32(2.0));
        assert_eq!(canvas.current_command_count(), 2);
    }

    #[test]
    fn state_resets_across_page_boundaries() {
        let mut canvas = Canvas::new(Size::a4());
        canvas.set_fill_color(Color::gray(0.5));
        canvas.show_page();
        // Same color must be re-emitted on the new page.
        canvas.set_fill_color(Color::gray(0.5));
        assert_eq!(canvas.current_command_count(), 1);
    }

    #[test]
    fn finish_always_yields_at_least_one_page() {
        let doc = Canvas::new(Size::a4()).finish();
        assert_eq!(doc.pages.len(), 1);
        assert!(doc.pages[0].commands.is_empty());
    }

    #[test]
    fn finish_flushes_a_trailing_open_page() {
        let mut canvas = Canvas::new(Size::a4());
        canvas.draw_rect(Pt::ZERO, Pt::ZERO, Pt::from_i32(10), Pt::from_i32(10));
        canvas.show_page();
        canvas.draw_rect(Pt::ZERO, Pt::ZERO, Pt::from_i32(20), Pt::from_i32(20));
        let doc = canvas.finish();
        assert_eq!(doc.pages.len(), 2);
    }

    #[test]
    fn negative_line_widths_are_clamped() {
        let mut canvas = Canvas::new(Size::a4());
        canvas.set_line_width(Pt::from_f32(-3.0));
        match canvas.current.commands.first() {
            Some(Command::SetLineWidth(width)) => assert_eq!(*width, Pt::ZERO),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
