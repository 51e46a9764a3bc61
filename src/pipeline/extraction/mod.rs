pub mod types;
pub mod ocr;
pub mod pdfium;
pub mod page_source;
pub mod selector;
pub mod attributes;
pub mod qa;
pub mod orchestrator;

pub use types::*;
pub use attributes::*;
pub use page_source::*;
pub use selector::*;
pub use orchestrator::*;

use std::path::PathBuf;

use thiserror::Error;

/// Faults raised by the collaborators the pipeline drives: rasterizer,
/// OCR engine, QA model and the hospital config store.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF is encrypted or password-protected")]
    PdfEncrypted,

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("OCR engine initialization failed: {0}")]
    OcrInit(String),

    #[error("Tessdata not found at: {0}")]
    TessdataNotFound(PathBuf),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("QA model error: {0}")]
    QaModel(String),

    #[error("Hospital config store error: {0}")]
    ConfigStore(String),

    #[error("Extraction cancelled")]
    Cancelled,
}

/// Request-level outcome of an extraction run.
///
/// Config and page-match failures are distinct variants so callers can
/// report them with their own status; anything unexpected is `Failed`.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Hospital '{0}' is not configured")]
    ConfigNotFound(String),

    #[error("Hospital '{0}' has no keywords configured")]
    NoKeywordsConfigured(String),

    #[error("No page matched the keyword gate ({pages_scanned} pages scanned)")]
    NoMatchingPage { pages_scanned: usize },

    #[error("Extraction timed out after {0}s")]
    Timeout(u64),

    /// The caller gave up (request deadline passed) and the run stopped early.
    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Extraction failed: {0}")]
    Failed(#[from] PipelineError),
}
