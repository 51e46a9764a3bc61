//! Lazy per-page OCR text.
//!
//! Pages are produced one at a time in ascending order. Each page is
//! rasterized, written to a scratch PNG, OCR'd and the scratch file is
//! dropped before the next page starts. Nothing is done for a page until
//! the consumer asks for it, so a selector that stops early never pays for
//! the remaining pages. A cancelled source yields one `Cancelled` error
//! and then ends.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use super::types::{CancelFlag, OcrEngine, PageText, PdfPageRenderer};
use super::PipelineError;

/// Iterator over the OCR'd pages of one document. Consumed once.
pub struct PageTextSource<'a> {
    pdf_bytes: &'a [u8],
    renderer: &'a dyn PdfPageRenderer,
    ocr: &'a dyn OcrEngine,
    dpi: u32,
    scratch_dir: Option<&'a Path>,
    cancel: Option<&'a CancelFlag>,
    page_count: usize,
    next_page: usize,
}

impl<'a> PageTextSource<'a> {
    /// Open a document. Only the page count is read here.
    pub fn open(
        pdf_bytes: &'a [u8],
        renderer: &'a dyn PdfPageRenderer,
        ocr: &'a dyn OcrEngine,
        dpi: u32,
    ) -> Result<Self, PipelineError> {
        let page_count = renderer.page_count(pdf_bytes)?;
        tracing::debug!(page_count, dpi, "Opened document for page scan");
        Ok(Self {
            pdf_bytes,
            renderer,
            ocr,
            dpi,
            scratch_dir: None,
            cancel: None,
            page_count,
            next_page: 0,
        })
    }

    /// Write scratch page images under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: Option<&'a Path>) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Stop before the next page once `cancel` is set.
    pub fn with_cancel(mut self, cancel: Option<&'a CancelFlag>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    fn read_page(&self, page_index: usize) -> Result<PageText, PipelineError> {
        let image = self.renderer.render_page(self.pdf_bytes, page_index, self.dpi)?;

        // Removed on drop, including when OCR returns an error below.
        let scratch = write_scratch_image(&image, page_index, self.scratch_dir)?;

        let lines = self.ocr.recognize(scratch.path()).map_err(|e| {
            tracing::warn!(page = page_index, error = %e, "OCR failed");
            e
        })?;

        let page = PageText::from_lines(page_index, &lines);
        if lines.is_empty() {
            tracing::debug!(page = page_index, "OCR found no text on page");
        } else {
            tracing::debug!(
                page = page_index,
                lines = lines.len(),
                chars = page.text.len(),
                "OCR'd page"
            );
        }
        tracing::trace!(page = page_index, text = %page.text, "Page text");

        Ok(page)
    }
}

impl Iterator for PageTextSource<'_> {
    type Item = Result<PageText, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_page >= self.page_count {
            return None;
        }
        if self.cancel.is_some_and(CancelFlag::is_cancelled) {
            tracing::debug!(
                next_page = self.next_page,
                page_count = self.page_count,
                "Page scan cancelled"
            );
            self.next_page = self.page_count;
            return Some(Err(PipelineError::Cancelled));
        }
        let page_index = self.next_page;
        self.next_page += 1;
        Some(self.read_page(page_index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.page_count - self.next_page;
        (remaining, Some(remaining))
    }
}

fn write_scratch_image(
    image: &[u8],
    page_index: usize,
    dir: Option<&Path>,
) -> Result<NamedTempFile, PipelineError> {
    let prefix = format!("page-{page_index}-");
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).suffix(".png");

    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    file.write_all(image)?;
    file.flush()?;
    Ok(file)
}
