use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::PipelineError;

/// Bounding box of a recognized line, in page-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        BoundingBox {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }
}

/// One line recognized by the OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub bounding_box: Option<BoundingBox>,
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f32,
}

impl OcrLine {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            bounding_box: None,
            text: text.into(),
            confidence,
        }
    }
}

/// OCR'd text of a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageText {
    pub page_index: usize,
    pub text: String,
}

impl PageText {
    /// Join recognized line texts in engine order with single spaces.
    pub fn from_lines(page_index: usize, lines: &[OcrLine]) -> Self {
        let text = lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self { page_index, text }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Answer span returned by an extractive QA model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaAnswer {
    pub text: String,
    pub score: Option<f32>,
}

impl QaAnswer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: None,
        }
    }
}

/// Shared stop signal for one extraction run. Set by the request handler
/// once the caller has stopped waiting; the pipeline checks it before each
/// page and each QA call.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// OCR engine abstraction (allows mocking for tests).
pub trait OcrEngine: Send + Sync {
    /// Recognize the lines of the page image stored at `image_path`, in
    /// reading order. A blank page yields an empty vector, not an error.
    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrLine>, PipelineError>;

    /// Whether concurrent calls from different requests are safe.
    /// Engines returning `false` are wrapped in a `ModelGate`.
    fn is_reentrant(&self) -> bool {
        true
    }
}

/// PDF page rasterization abstraction.
pub trait PdfPageRenderer: Send + Sync {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, PipelineError>;

    /// Render one page (0-based) to PNG bytes.
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, PipelineError>;
}

/// Extractive question-answering model.
pub trait QaModel: Send + Sync {
    /// Answer `question` from `context`. `Ok(None)` means the model ran and
    /// had no answer.
    fn answer(&self, question: &str, context: &str) -> Result<Option<QaAnswer>, PipelineError>;

    /// Human-readable backend name for logs and the health endpoint.
    fn name(&self) -> &str;

    /// Whether concurrent calls are safe. Models returning `false` are
    /// wrapped in a `ModelGate` and never called from parallel workers.
    fn is_reentrant(&self) -> bool {
        true
    }
}
