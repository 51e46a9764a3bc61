use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::attributes::{AttributeExtractor, AttributeMap, FlatAttributes};
use super::page_source::PageTextSource;
use super::pdfium::DEFAULT_RENDER_DPI;
use super::selector::{select_page, KeywordGate, PageMatcher, SelectionOutcome};
use super::types::{CancelFlag, OcrEngine, PdfPageRenderer, QaModel};
use super::{ExtractionError, PipelineError};
use crate::hospital::{self, parse_list, HospitalConfigStore, HospitalProfile};

/// Which attributes a request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeRequest {
    /// Exactly these names, in this order.
    Explicit(Vec<String>),
    /// Whatever the hospital profile lists.
    HospitalDefault,
}

impl AttributeRequest {
    /// Parse a comma-separated form value. Missing or blank means the
    /// hospital's configured list.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(parse_list) {
            Some(names) if !names.is_empty() => Self::Explicit(names),
            _ => Self::HospitalDefault,
        }
    }

    fn resolve(&self, profile: &HospitalProfile) -> Vec<String> {
        match self {
            Self::Explicit(names) => names.clone(),
            Self::HospitalDefault => profile.attribute_names().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub render_dpi: u32,
    pub parallel_attributes: bool,
    /// Where scratch page images go. System temp dir when `None`.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            render_dpi: DEFAULT_RENDER_DPI,
            parallel_attributes: false,
            scratch_dir: None,
        }
    }
}

/// Outcome of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub hospital_id: String,
    /// 0-based index of the selected page.
    pub page_index: usize,
    pub pages_scanned: usize,
    pub page_count: usize,
    pub attributes: AttributeMap,
    /// Requested names the hospital has no question for.
    pub skipped_attributes: Vec<String>,
}

impl ExtractionResult {
    /// Attribute name to value-or-null.
    pub fn flat(&self) -> FlatAttributes<'_> {
        self.attributes.flat()
    }
}

type MatcherFactory = Box<dyn Fn(&HospitalProfile) -> Box<dyn PageMatcher> + Send + Sync>;

fn keyword_gate(profile: &HospitalProfile) -> Box<dyn PageMatcher> {
    Box::new(KeywordGate::from_profile(profile))
}

fn cancelled_or_failed(err: PipelineError) -> ExtractionError {
    match err {
        PipelineError::Cancelled => ExtractionError::Cancelled,
        other => ExtractionError::Failed(other),
    }
}

/// Composes hospital resolution, page scanning, page selection and attribute
/// extraction. Holds the long-lived model handles; one instance serves every
/// request.
pub struct ExtractionOrchestrator {
    store: Arc<dyn HospitalConfigStore>,
    renderer: Arc<dyn PdfPageRenderer>,
    ocr: Arc<dyn OcrEngine>,
    qa: Arc<dyn QaModel>,
    options: PipelineOptions,
    matcher: MatcherFactory,
}

impl ExtractionOrchestrator {
    pub fn new(
        store: Arc<dyn HospitalConfigStore>,
        renderer: Arc<dyn PdfPageRenderer>,
        ocr: Arc<dyn OcrEngine>,
        qa: Arc<dyn QaModel>,
    ) -> Self {
        Self {
            store,
            renderer,
            ocr,
            qa,
            options: PipelineOptions::default(),
            matcher: Box::new(keyword_gate),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the keyword gate with another page matcher.
    pub fn with_matcher<F>(mut self, factory: F) -> Self
    where
        F: Fn(&HospitalProfile) -> Box<dyn PageMatcher> + Send + Sync + 'static,
    {
        self.matcher = Box::new(factory);
        self
    }

    pub fn qa_name(&self) -> &str {
        self.qa.name()
    }

    /// Run the full pipeline for one document. Blocking.
    pub fn run(
        &self,
        pdf_bytes: &[u8],
        hospital_id: &str,
        request: &AttributeRequest,
    ) -> Result<ExtractionResult, ExtractionError> {
        self.run_cancellable(pdf_bytes, hospital_id, request, &CancelFlag::new())
    }

    /// Like `run`, but stops before the next page or QA call once `cancel`
    /// is set and returns `ExtractionError::Cancelled`.
    pub fn run_cancellable(
        &self,
        pdf_bytes: &[u8],
        hospital_id: &str,
        request: &AttributeRequest,
        cancel: &CancelFlag,
    ) -> Result<ExtractionResult, ExtractionError> {
        let started = Instant::now();

        // Fails before any page is rasterized.
        let profile = hospital::resolve(self.store.as_ref(), hospital_id)?;
        let requested = request.resolve(&profile);
        let matcher = (self.matcher)(profile.as_ref());

        let pages = PageTextSource::open(
            pdf_bytes,
            self.renderer.as_ref(),
            self.ocr.as_ref(),
            self.options.render_dpi,
        )?
        .with_scratch_dir(self.options.scratch_dir.as_deref())
        .with_cancel(Some(cancel));
        let page_count = pages.page_count();

        tracing::info!(
            hospital = hospital_id,
            page_count,
            requested = requested.len(),
            "Scanning document"
        );

        let selection = match select_page(pages, matcher.as_ref()).map_err(cancelled_or_failed)? {
            SelectionOutcome::Selected(selection) => selection,
            SelectionOutcome::NoMatch { pages_scanned } => {
                tracing::info!(
                    hospital = hospital_id,
                    pages_scanned,
                    "No page matched the keyword gate"
                );
                return Err(ExtractionError::NoMatchingPage { pages_scanned });
            }
        };

        if cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let extraction = AttributeExtractor::new(self.qa.as_ref())
            .with_parallelism(self.options.parallel_attributes)
            .with_cancel(Some(cancel))
            .extract(&selection.page.text, &requested, &profile);

        if cancel.is_cancelled() {
            tracing::info!(hospital = hospital_id, "Extraction cancelled during QA");
            return Err(ExtractionError::Cancelled);
        }

        tracing::info!(
            hospital = hospital_id,
            page = selection.page.page_index,
            pages_scanned = selection.pages_scanned,
            found = extraction.attributes.found_count(),
            extracted = extraction.attributes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Extraction complete"
        );

        Ok(ExtractionResult {
            hospital_id: profile.hospital_id.clone(),
            page_index: selection.page.page_index,
            pages_scanned: selection.pages_scanned,
            page_count,
            attributes: extraction.attributes,
            skipped_attributes: extraction.skipped,
        })
    }
}
