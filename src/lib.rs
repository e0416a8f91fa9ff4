//! shotpress: deterministic storyboard-to-PDF composition.
//!
//! The engine takes an ordered [`Storyboard`] of shots and produces a
//! fixed-page-size PDF: one cover page plus `ceil(shots / capacity)`
//! content pages. Every piece of text is pre-rasterized to a PNG block
//! before placement, so the output renders identically no matter which
//! fonts the viewing environment has installed. The original motivation
//! for this engine was a storyboard tool whose Vietnamese text kept
//! degrading in exported documents.
//!
//! ```no_run
//! use shotpress::{Shot, ShotKind, ShotPress, Storyboard};
//!
//! let board = Storyboard::new("Đêm cuối cùng", "Một thành phố không ngủ.")
//!     .with_shots(vec![
//!         Shot::new(1, ShotKind::CloseUp)
//!             .with_duration(5.0)
//!             .with_description("Cận cảnh robot đào bới"),
//!     ]);
//! let engine = ShotPress::builder()
//!     .register_font_file("fonts/Inter-Regular.ttf")
//!     .build()?;
//! let output = engine.export(&board)?;
//! std::fs::write("storyboard.pdf", &output.pdf)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod assembler;
mod assets;
mod canvas;
mod debug;
mod error;
mod font;
mod inspect;
mod layout;
mod metrics;
mod pdf;
mod rasterizer;
mod story;
mod types;

pub use assembler::{CancelToken, ExportOutput};
pub use canvas::{Canvas, Command, Document, Page};
pub use error::{ExportWarning, ShotPressError};
pub use inspect::{
    InspectError, InspectErrorCode, InspectReport, inspect_pdf_bytes, inspect_pdf_path,
};
pub use layout::{
    BoxContent, BoxKind, LayoutBox, PageDescriptor, PageGeometry, PageLayoutEngine, fit_aspect,
};
pub use metrics::{ExportMetrics, PageMetrics};
pub use rasterizer::{FontWeight, RasterBlock, TextAlign, TextRasterizer, TextStyle};
pub use story::{AspectRatio, Shot, ShotKind, Storyboard};
pub use types::{Color, Margins, Pt, Rect, Size};

use assembler::DocumentAssembler;
use debug::DebugLogger;
use font::FontRegistry;
use rasterizer::{DEFAULT_MAX_RASTER_PIXELS, DEFAULT_SUPERSAMPLE, MIN_RASTER_PIXELS};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// The document composition engine. Configure once via [`ShotPress::builder`],
/// then run any number of independent exports.
pub struct ShotPress {
    geometry: PageGeometry,
    font_registry: Arc<FontRegistry>,
    font_name: String,
    supersample: f32,
    max_raster_pixels: u64,
    debug: Option<Arc<DebugLogger>>,
}

#[derive(Clone)]
pub struct ShotPressBuilder {
    geometry: PageGeometry,
    font_name: String,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    font_bytes: Vec<(Vec<u8>, Option<String>)>,
    supersample: f32,
    max_raster_pixels: u64,
    debug_path: Option<PathBuf>,
}

impl ShotPress {
    pub fn builder() -> ShotPressBuilder {
        ShotPressBuilder {
            geometry: PageGeometry::a4_storyboard(3),
            font_name: "Inter".to_string(),
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            font_bytes: Vec::new(),
            supersample: DEFAULT_SUPERSAMPLE,
            max_raster_pixels: DEFAULT_MAX_RASTER_PIXELS,
            debug_path: None,
        }
    }

    pub fn export(&self, board: &Storyboard) -> Result<ExportOutput, ShotPressError> {
        self.export_inner(board, None)
    }

    pub fn export_with_cancel(
        &self,
        board: &Storyboard,
        cancel: &CancelToken,
    ) -> Result<ExportOutput, ShotPressError> {
        self.export_inner(board, Some(cancel))
    }

    pub fn export_to_writer<W: Write>(
        &self,
        board: &Storyboard,
        writer: &mut W,
    ) -> Result<ExportOutput, ShotPressError> {
        let output = self.export(board)?;
        writer.write_all(&output.pdf)?;
        Ok(output)
    }

    pub fn export_to_file(
        &self,
        board: &Storyboard,
        path: impl Into<PathBuf>,
    ) -> Result<ExportOutput, ShotPressError> {
        let output = self.export(board)?;
        std::fs::write(path.into(), &output.pdf)?;
        Ok(output)
    }

    fn export_inner(
        &self,
        board: &Storyboard,
        cancel: Option<&CancelToken>,
    ) -> Result<ExportOutput, ShotPressError> {
        let rasterizer = TextRasterizer::new(
            self.font_registry.clone(),
            self.supersample,
            self.max_raster_pixels,
        );
        let engine = PageLayoutEngine::new(
            self.geometry.clone(),
            rasterizer,
            self.font_name.clone(),
        );
        let assembler =
            DocumentAssembler::new(&engine, board.title.clone(), self.debug.clone());
        assembler.assemble(board, cancel)
    }
}

impl ShotPressBuilder {
    /// Replace the whole page geometry. The builder's other geometry
    /// setters are conveniences over this.
    pub fn geometry(mut self, geometry: PageGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.geometry.page_size = size;
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.geometry.margins = margins;
        self
    }

    /// Shots per content page.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.geometry.capacity = capacity;
        self
    }

    /// Font family used for every text block. Bold blocks look for a
    /// `"<name> Bold"` face and fall back to the base face.
    pub fn font_name(mut self, name: impl Into<String>) -> Self {
        self.font_name = name.into();
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn register_font_bytes(mut self, data: Vec<u8>, source_name: Option<String>) -> Self {
        self.font_bytes.push((data, source_name));
        self
    }

    /// Device pixels per point for text rasterization. 2.0 ≈ 144 dpi.
    pub fn supersample(mut self, factor: f32) -> Self {
        self.supersample = factor;
        self
    }

    /// Pixel-area cap for a single text raster; exceeding it fails the
    /// export with [`ShotPressError::RasterLimitExceeded`].
    pub fn max_raster_pixels(mut self, cap: u64) -> Self {
        self.max_raster_pixels = cap;
        self
    }

    /// Write a JSONL debug log (warnings, counters, export summary).
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ShotPress, ShotPressError> {
        if !self.supersample.is_finite() || !(1.0..=8.0).contains(&self.supersample) {
            return Err(ShotPressError::InvalidConfiguration(format!(
                "supersample must be within 1.0..=8.0, got {}",
                self.supersample
            )));
        }
        if self.max_raster_pixels < MIN_RASTER_PIXELS {
            return Err(ShotPressError::InvalidConfiguration(format!(
                "max_raster_pixels must be at least {}",
                MIN_RASTER_PIXELS
            )));
        }
        self.geometry.validate()?;

        let mut registry = FontRegistry::new();
        for dir in &self.font_dirs {
            registry.register_dir(dir);
        }
        for file in &self.font_files {
            registry.register_file(file);
        }
        for (data, source_name) in self.font_bytes {
            registry.register_bytes(data, source_name.as_deref())?;
        }

        let debug = match &self.debug_path {
            Some(path) => Some(Arc::new(DebugLogger::new(path)?)),
            None => None,
        };
        if let Some(logger) = debug.as_deref() {
            for name in registry.registered_names() {
                logger.log_json(&format!(
                    "{{\"type\":\"font.registered\",\"name\":\"{}\"}}",
                    debug::json_escape(name)
                ));
            }
        }

        Ok(ShotPress {
            geometry: self.geometry,
            font_registry: Arc::new(registry),
            font_name: self.font_name,
            supersample: self.supersample,
            max_raster_pixels: self.max_raster_pixels,
            debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ShotPress {
        ShotPress::builder().build().expect("engine")
    }

    fn valid_png_uri() -> String {
        let mut pixmap = tiny_skia::Pixmap::new(8, 8).expect("pixmap");
        pixmap.fill(tiny_skia::Color::from_rgba8(30, 90, 200, 255));
        format!(
            "data:image/png;base64,{}",
            {
                use base64::Engine as _;
                base64::engine::general_purpose::STANDARD
                    .encode(pixmap.encode_png().expect("png"))
            }
        )
    }

    fn board_with(shot_count: usize) -> Storyboard {
        let mut board = Storyboard::new(
            "Robot giữa thành phố",
            "Một robot nhỏ đào bới giữa thành phố không ngủ.",
        );
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
    fn seven_shots_at_capacity_three_export_four_pages() {
        let output = engine().export(&board_with(7)).expect("export");
        let report = inspect_pdf_bytes(&output.pdf).expect("inspect");
        assert_eq!(report.page_count, 4);
        assert!(!report.encrypted);
        assert_eq!(report.file_size_bytes, output.pdf.len());
    }

    #[test]
    fn empty_storyboard_exports_only_the_cover() {
        let output = engine().export(&board_with(0)).expect("export");
        let report = inspect_pdf_bytes(&output.pdf).expect("inspect");
        assert_eq!(report.page_count, 1);
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn identical_inputs_produce_byte_identical_documents() {
        let engine = engine();
        let board = board_with(4);
        let first = engine.export(&board).expect("first export");
        let second = engine.export(&board).expect("second export");
        assert_eq!(first.pdf, second.pdf);
        assert_eq!(first.sha256, second.sha256);
        assert_eq!(first.sha256.len(), 64);
    }

    #[test]
    fn mixed_placeholder_and_image_scenario() {
        // The concrete scenario from the engine's origin story: two shots,
        // capacity 3, first without an image, second with a decodable PNG.
        let mut board = Storyboard::new("Robot", "Hai cảnh thử nghiệm.");
        board.push_shot(
            Shot::new(1, ShotKind::CloseUp)
                .with_duration(5.0)
                .with_description("Cận cảnh robot đào bới"),
        );
        board.push_shot(
            Shot::new(2, ShotKind::Wide)
                .with_duration(7.0)
                .with_description("Toàn cảnh thành phố ban đêm")
                .with_image(valid_png_uri()),
        );

        let output = engine().export(&board).expect("export");
        assert!(output.warnings.is_empty());
        let report = inspect_pdf_bytes(&output.pdf).expect("inspect");
        assert_eq!(report.page_count, 2);
    }

    #[test]
    fn undecodable_images_warn_but_do_not_abort() {
        let mut board = board_with(2);
        board.shots[0].image = Some("data:image/png;base64,!!!!".to_string());
        let output = engine().export(&board).expect("export");
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].shot_index, 1);
        assert!(inspect_pdf_bytes(&output.pdf).is_ok());
    }

    #[test]
    fn raster_cap_aborts_the_whole_export() {
        let engine = ShotPress::builder()
            .max_raster_pixels(rasterizer::MIN_RASTER_PIXELS)
            .build()
            .expect("engine");
        let err = engine.export(&board_with(1)).expect_err("must abort");
        assert!(matches!(err, ShotPressError::RasterLimitExceeded { .. }));
    }

    #[test]
    fn cancelled_exports_produce_no_output() {
        let token = CancelToken::new();
        token.cancel();
        let err = engine()
            .export_with_cancel(&board_with(3), &token)
            .expect_err("cancelled");
        assert!(matches!(err, ShotPressError::Cancelled));
    }

    #[test]
    fn builder_rejects_invalid_configuration() {
        assert!(matches!(
            ShotPress::builder().capacity(0).build(),
            Err(ShotPressError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ShotPress::builder().supersample(0.0).build(),
            Err(ShotPressError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ShotPress::builder().max_raster_pixels(16).build(),
            Err(ShotPressError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ShotPress::builder().margins(Margins::all_mm(120.0)).build(),
            Err(ShotPressError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn export_to_file_writes_the_same_bytes() {
        let path = std::env::temp_dir().join(format!(
            "shotpress_export_{}.pdf",
            std::process::id()
        ));
        let output = engine()
            .export_to_file(&board_with(1), &path)
            .expect("export to file");
        let written = std::fs::read(&path).expect("read back");
        assert_eq!(written, output.pdf);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn metrics_cover_every_page() {
        let output = engine().export(&board_with(5)).expect("export");
        // Cover + 2 content pages.
        assert_eq!(output.metrics.pages.len(), 3);
        assert_eq!(output.metrics.total_bytes, output.pdf.len());
        assert!(output.metrics.pages.iter().all(|p| p.command_count > 0));
    }

    #[test]
    fn debug_log_records_warnings_and_summary() {
        let path = std::env::temp_dir().join(format!(
            "shotpress_debug_export_{}.jsonl",
            std::process::id()
        ));
        let engine = ShotPress::builder()
            .debug_log(&path)
            .build()
            .expect("engine");
        let mut board = board_with(1);
        board.shots[0].image = Some("data:image/png;base64,!!!!".to_string());
        engine.export(&board).expect("export");
        let log = std::fs::read_to_string(&path).expect("read log");
        assert!(log.contains("export.warning"));
        assert!(log.contains("export.finalized"));
        assert!(log.contains("debug.summary"));
        let _ = std::fs::remove_file(&path);
    }
}
