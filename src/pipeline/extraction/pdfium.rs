//! PDF page rasterization via Google PDFium.
//!
//! `PdfiumRasterizer` is stateless (`Send + Sync`). Each operation binds a
//! fresh `Pdfium` instance because the upstream type is `!Send`; the OS caches
//! the dynamic library load so repeat binds are cheap.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::types::PdfPageRenderer;
use super::PipelineError;

/// Maximum dimension (width or height) for rendered page images.
const MAX_DIMENSION_PX: u32 = 4096;

/// Default rendering DPI for OCR.
pub const DEFAULT_RENDER_DPI: u32 = 200;

/// PDF points per inch (standard PDF unit).
const POINTS_PER_INCH: f32 = 72.0;

/// Renders PDF pages to PNG images using PDFium.
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// Create a rasterizer, verifying the PDFium library is loadable.
    ///
    /// With `library_path` set, that file is bound; otherwise the directory of
    /// the running executable and then the system search path are tried.
    pub fn new(library_path: Option<&Path>) -> Result<Self, PipelineError> {
        let rasterizer = Self {
            library_path: library_path.map(Path::to_path_buf),
        };
        let _ = rasterizer.bind()?;
        Ok(rasterizer)
    }

    fn bind(&self) -> Result<Pdfium, PipelineError> {
        if let Some(path) = &self.library_path {
            let bindings = Pdfium::bind_to_library(path).map_err(|e| PipelineError::PdfRendering {
                page: 0,
                reason: format!("Failed to load PDFium from {}: {e}", path.display()),
            })?;
            return Ok(Pdfium::new(bindings));
        }

        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let lib_path =
                Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!(dir = %exe_dir.display(), "Loaded PDFium next to executable");
                return Ok(Pdfium::new(bindings));
            }
        }

        let bindings = Pdfium::bind_to_system_library().map_err(|e| PipelineError::PdfRendering {
            page: 0,
            reason: format!(
                "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
            ),
        })?;
        Ok(Pdfium::new(bindings))
    }
}

/// Encrypted PDFs get their own error so the caller can say so.
fn map_load_error(e: PdfiumError) -> PipelineError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        PipelineError::PdfEncrypted
    } else {
        PipelineError::PdfRendering {
            page: 0,
            reason: format!("Failed to load PDF: {msg}"),
        }
    }
}

/// Pixel dimensions for rendering at `dpi`, both clamped to [1, MAX_DIMENSION_PX].
/// Aspect ratio is preserved when capping.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

impl PdfPageRenderer for PdfiumRasterizer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, PipelineError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, PipelineError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;
        let pages = document.pages();

        let index = u16::try_from(page_index).map_err(|_| PipelineError::PdfRendering {
            page: page_index,
            reason: format!("Page index {page_index} exceeds u16 maximum"),
        })?;
        let page = pages.get(index).map_err(|_| PipelineError::PdfRendering {
            page: page_index,
            reason: format!(
                "Page {page_index} out of range (document has {} pages)",
                pages.len()
            ),
        })?;

        let (target_w, target_h) =
            compute_render_dimensions(page.width().value, page.height().value, dpi);
        if target_w == MAX_DIMENSION_PX || target_h == MAX_DIMENSION_PX {
            warn!(
                page = page_index,
                width = target_w,
                height = target_h,
                "Page dimensions capped to {MAX_DIMENSION_PX}px"
            );
        }

        let config = PdfRenderConfig::new()
            .set_target_width(target_w as i32)
            .set_maximum_height(target_h as i32);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| PipelineError::PdfRendering {
                page: page_index,
                reason: format!("Rendering failed: {e}"),
            })?;

        let mut cursor = Cursor::new(Vec::new());
        bitmap
            .as_image()
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .map_err(|e| PipelineError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
        let png_bytes = cursor.into_inner();

        debug!(
            page = page_index,
            width = target_w,
            height = target_h,
            png_size = png_bytes.len(),
            "Rendered PDF page"
        );

        Ok(png_bytes)
    }
}

// ── Mock for testing ──────────────────────────────────────

const MOCK_PAGE_MAGIC: &[u8] = b"mock-page:";

/// Image bytes the mock renderer produces for `page_index`.
pub fn mock_page_image(page_index: usize) -> Vec<u8> {
    let mut bytes = MOCK_PAGE_MAGIC.to_vec();
    bytes.extend_from_slice(page_index.to_string().as_bytes());
    bytes
}

/// Inverse of `mock_page_image`.
pub fn mock_page_index(bytes: &[u8]) -> Option<usize> {
    let rest = bytes.strip_prefix(MOCK_PAGE_MAGIC)?;
    std::str::from_utf8(rest).ok()?.parse().ok()
}

/// Mock renderer with a fixed page count. Records which pages were rendered.
pub struct MockPdfPageRenderer {
    page_count: usize,
    rendered: std::sync::Mutex<Vec<usize>>,
}

impl MockPdfPageRenderer {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            rendered: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn rendered_pages(&self) -> Vec<usize> {
        self.rendered.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl PdfPageRenderer for MockPdfPageRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, PipelineError> {
        Ok(self.page_count)
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_index: usize,
        _dpi: u32,
    ) -> Result<Vec<u8>, PipelineError> {
        if page_index >= self.page_count {
            return Err(PipelineError::PdfRendering {
                page: page_index,
                reason: format!(
                    "Page {page_index} out of range (mock has {} pages)",
                    self.page_count
                ),
            });
        }
        if let Ok(mut rendered) = self.rendered.lock() {
            rendered.push(page_index);
        }
        Ok(mock_page_image(page_index))
    }
}
