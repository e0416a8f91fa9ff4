//! Drives composition against the page-drawing surface and serializes the
//! result exactly once.
//!
//! The phase machine is linear (`Idle`, `ComposingCover`, `ComposingPages`,
//! `Finalized`, in that order) and any failure before `Finalized` aborts the
//! whole export, so a partially composed document can never reach the caller.

use crate::canvas::Canvas;
use crate::debug::{DebugLogger, json_escape};
use crate::error::{ExportWarning, ShotPressError};
use crate::layout::{BoxContent, BoxKind, PageDescriptor, PageLayoutEngine, palette};
use crate::metrics::{ExportMetrics, PageMetrics};
use crate::pdf::{self, PdfOptions};
use crate::story::Storyboard;
use crate::types::{Pt, Rect};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Cooperative cancellation handle. Cancelling after `Finalized` has no
/// effect; before it, the export aborts and produces no bytes.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything a finished export hands back to the caller.
#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub pdf: Vec<u8>,
    pub warnings: Vec<ExportWarning>,
    pub metrics: ExportMetrics,
    /// SHA-256 of `pdf`; identical inputs always produce identical digests.
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    ComposingCover,
    ComposingPages,
    Finalized,
}

pub(crate) struct DocumentAssembler<'a> {
    layout: &'a PageLayoutEngine,
    document_title: String,
    debug: Option<Arc<DebugLogger>>,
}

impl<'a> DocumentAssembler<'a> {
    pub(crate) fn new(
        layout: &'a PageLayoutEngine,
        document_title: String,
        debug: Option<Arc<DebugLogger>>,
    ) -> Self {
        Self {
            layout,
            document_title,
            debug,
        }
    }

    pub(crate) fn assemble(
        &self,
        board: &Storyboard,
        cancel: Option<&CancelToken>,
    ) -> Result<ExportOutput, ShotPressError> {
        let mut phase = Phase::Idle;
        let mut canvas = Canvas::new(self.layout.geometry().page_size);
        let mut metrics = ExportMetrics::default();

        check_cancel(cancel)?;
        phase = advance(phase, Phase::ComposingCover)?;
        let cover = self.layout.layout_cover(board)?;
        self.emit_page(&mut canvas, &cover, &mut metrics);

        phase = advance(phase, Phase::ComposingPages)?;
        let (pages, warnings) = self.layout.layout_content_pages(board)?;
        for page in &pages {
            check_cancel(cancel)?;
            self.emit_page(&mut canvas, page, &mut metrics);
        }

        for warning in &warnings {
            if let Some(logger) = self.debug.as_deref() {
                logger.log_json(&format!(
                    "{{\"type\":\"export.warning\",\"shot\":{},\"message\":\"{}\"}}",
                    warning.shot_index,
                    json_escape(&warning.message)
                ));
                logger.increment("export.warning.image_decode", 1);
            }
        }

        check_cancel(cancel)?;
        let document = canvas.finish_without_show();
        let options = PdfOptions {
            document_title: Some(self.document_title.clone()),
        };
        let pdf = pdf::document_to_pdf(&document, &options)
            .map_err(|err| ShotPressError::SurfacePrimitive(err.to_string()))?;
        phase = advance(phase, Phase::Finalized)?;
        debug_assert_eq!(phase, Phase::Finalized);

        metrics.total_bytes = pdf.len();
        let sha256 = sha256_hex(&pdf);

        if let Some(logger) = self.debug.as_deref() {
            logger.increment("export.pages", document.pages.len() as u64);
            logger.log_json(&format!(
                "{{\"type\":\"export.finalized\",\"pages\":{},\"bytes\":{},\"sha256\":\"{}\"}}",
                document.pages.len(),
                pdf.len(),
                sha256
            ));
            logger.emit_summary("export");
            logger.flush();
        }

        Ok(ExportOutput {
            pdf,
            warnings,
            metrics,
            sha256,
        })
    }

    /// Draw one descriptor onto the surface and close the page. Boxes are
    /// emitted strictly in descriptor order; the surface is append-only.
    fn emit_page(&self, canvas: &mut Canvas, page: &PageDescriptor, metrics: &mut ExportMetrics) {
        let started = Instant::now();
        let colors = palette();
        canvas.meta("page_index", page.index.to_string());

        for layout_box in &page.boxes {
            if let Some(shot) = layout_box.shot {
                if layout_box.kind == BoxKind::ImageSlot {
                    canvas.meta("shot", shot.to_string());
                }
            }
            match &layout_box.content {
                BoxContent::Raster(block) => {
                    canvas.draw_image(
                        layout_box.rect.x,
                        layout_box.rect.y,
                        block.width,
                        block.height,
                        block.resource_uri(),
                    );
                    if layout_box.kind == BoxKind::HeaderBlock {
                        self.draw_header_rule(canvas);
                    }
                }
                BoxContent::Image { source, frame } => {
                    self.draw_slot_chrome(canvas, &layout_box.rect);
                    canvas.draw_image(
                        frame.x,
                        frame.y,
                        frame.width,
                        frame.height,
                        source.clone(),
                    );
                }
                BoxContent::Placeholder => {
                    canvas.set_fill_color(colors.slot_fill);
                    canvas.draw_rect(
                        layout_box.rect.x,
                        layout_box.rect.y,
                        layout_box.rect.width,
                        layout_box.rect.height,
                    );
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        metrics.total_render_ms += elapsed;
        metrics.pages.push(PageMetrics {
            page_number: page.index + 1,
            box_count: page.boxes.len(),
            command_count: canvas.current_command_count(),
            render_ms: elapsed,
        });
        canvas.show_page();
    }

    fn draw_slot_chrome(&self, canvas: &mut Canvas, slot: &Rect) {
        let colors = palette();
        canvas.set_fill_color(colors.slot_fill);
        canvas.draw_rect(slot.x, slot.y, slot.width, slot.height);
        canvas.set_stroke_color(colors.slot_border);
        canvas.set_line_width(Pt::from_f32(1.2));
        canvas.stroke_rect(slot.x, slot.y, slot.width, slot.height);
    }

    fn draw_header_rule(&self, canvas: &mut Canvas) {
        let colors = palette();
        let header = self.layout.geometry().header_rect();
        let rule_height = Pt::from_f32(1.5);
        canvas.set_fill_color(colors.ink);
        canvas.draw_rect(
            header.x,
            header.bottom() - rule_height,
            header.width,
            rule_height,
        );
    }
}

fn advance(current: Phase, next: Phase) -> Result<Phase, ShotPressError> {
    let legal = matches!(
        (current, next),
        (Phase::Idle, Phase::ComposingCover)
            | (Phase::ComposingCover, Phase::ComposingPages)
            | (Phase::ComposingPages, Phase::Finalized)
    );
    if !legal {
        return Err(ShotPressError::InvalidConfiguration(format!(
            "assembler phase {:?} cannot advance to {:?}",
            current, next
        )));
    }
    Ok(next)
}

fn check_cancel(cancel: Option<&CancelToken>) -> Result<(), ShotPressError> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(ShotPressError::Cancelled),
        _ => Ok(()),
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_only_advance_forward() {
        assert!(advance(Phase::Idle, Phase::ComposingCover).is_ok());
        assert!(advance(Phase::ComposingCover, Phase::ComposingPages).is_ok());
        assert!(advance(Phase::ComposingPages, Phase::Finalized).is_ok());
        assert!(advance(Phase::Idle, Phase::Finalized).is_err());
        assert!(advance(Phase::Finalized, Phase::ComposingCover).is_err());
    }

    #[test]
    fn cancel_token_trips_exactly_once_set() {
        let token = CancelToken::new();
        assert!(check_cancel(Some(&token)).is_ok());
        assert!(check_cancel(None).is_ok());
        token.cancel();
        assert!(matches!(
            check_cancel(Some(&token)),
            Err(ShotPressError::Cancelled)
        ));
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
