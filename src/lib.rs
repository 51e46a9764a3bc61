pub mod api;
pub mod config;
pub mod hospital;
pub mod model_gate;
pub mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::api::server::start_server;
use crate::api::ApiContext;
use crate::config::{ConfigError, QaBackend, ServiceConfig};
use crate::hospital::CsvHospitalStore;
use crate::pipeline::extraction::ocr::check_language_data;
use crate::pipeline::extraction::pdfium::PdfiumRasterizer;
use crate::pipeline::extraction::qa::HttpQaClient;
use crate::pipeline::extraction::{
    ExtractionOrchestrator, OcrEngine, PipelineError, PipelineOptions, QaModel,
};

/// Where distribution packages put tesseract language data.
const TESSDATA_CANDIDATES: &[&str] = &[
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
];

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to initialize pipeline: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Server error: {0}")]
    Server(String),
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}

/// Build the production orchestrator: CSV hospital tables, PDFium, Tesseract
/// and the configured QA backend. Non-reentrant models are gated.
pub fn build_orchestrator(config: &ServiceConfig) -> Result<ExtractionOrchestrator, StartupError> {
    let store = CsvHospitalStore::open(
        config.keywords_csv.clone(),
        config.attributes_csv.clone(),
        config.questions_csv.clone(),
    )?;
    let renderer = PdfiumRasterizer::new(config.pdfium_library.as_deref())?;
    let ocr = model_gate::gate_ocr(build_ocr(config)?);
    let qa = model_gate::gate_qa(build_qa(config)?, config.serialize_qa);

    tracing::info!(
        qa_model = qa.name(),
        render_dpi = config.render_dpi,
        parallel_attributes = config.parallel_attributes,
        "Extraction pipeline ready"
    );

    Ok(
        ExtractionOrchestrator::new(Arc::new(store), Arc::new(renderer), ocr, qa).with_options(
            PipelineOptions {
                render_dpi: config.render_dpi,
                parallel_attributes: config.parallel_attributes,
                scratch_dir: config.scratch_dir.clone(),
            },
        ),
    )
}

/// Explicit setting, then `TESSDATA_PREFIX`, then the first system
/// directory holding data for every language in `language`.
#[cfg_attr(not(feature = "ocr"), allow(dead_code))]
fn resolve_tessdata_dir(configured: Option<&PathBuf>, language: &str) -> Option<PathBuf> {
    if let Some(dir) = configured {
        return Some(dir.clone());
    }
    if let Some(prefix) = std::env::var_os("TESSDATA_PREFIX") {
        return Some(PathBuf::from(prefix));
    }
    TESSDATA_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|dir| check_language_data(dir, language).is_ok())
}

#[cfg(feature = "ocr")]
fn build_ocr(config: &ServiceConfig) -> Result<Arc<dyn OcrEngine>, PipelineError> {
    use crate::pipeline::extraction::ocr::TesseractEngine;

    let tessdata = resolve_tessdata_dir(config.tessdata_dir.as_ref(), &config.ocr_language)
        .ok_or_else(|| {
            PipelineError::OcrInit(format!(
                "No tessdata directory with '{}' data found; set DISCHARGE_TESSDATA_DIR",
                config.ocr_language
            ))
        })?;
    let engine = TesseractEngine::for_language(&tessdata, &config.ocr_language)?;
    tracing::info!(tessdata = %tessdata.display(), language = %config.ocr_language, "Tesseract ready");
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "ocr"))]
fn build_ocr(_config: &ServiceConfig) -> Result<Arc<dyn OcrEngine>, PipelineError> {
    Err(PipelineError::OcrInit(
        "built without the `ocr` feature; rebuild with --features ocr".into(),
    ))
}

fn build_qa(config: &ServiceConfig) -> Result<Arc<dyn QaModel>, PipelineError> {
    match config.qa_backend {
        QaBackend::Http => Ok(Arc::new(HttpQaClient::new(
            &config.qa_url,
            &config.qa_model,
            config.qa_token.clone(),
            config.qa_timeout_secs,
        )?)),
        QaBackend::Onnx => build_onnx_qa(config),
    }
}

#[cfg(feature = "onnx-qa")]
fn build_onnx_qa(config: &ServiceConfig) -> Result<Arc<dyn QaModel>, PipelineError> {
    use crate::pipeline::extraction::qa::OnnxQaModel;

    let dir = config
        .qa_model_dir
        .as_deref()
        .ok_or_else(|| PipelineError::QaModel("DISCHARGE_QA_MODEL_DIR is not set".into()))?;
    Ok(Arc::new(OnnxQaModel::load(dir)?))
}

#[cfg(not(feature = "onnx-qa"))]
fn build_onnx_qa(_config: &ServiceConfig) -> Result<Arc<dyn QaModel>, PipelineError> {
    Err(PipelineError::QaModel(
        "built without the `onnx-qa` feature; rebuild with --features onnx-qa".into(),
    ))
}

/// Load configuration, build the pipeline and serve until Ctrl-C.
pub async fn run() -> Result<(), StartupError> {
    init_tracing();

    let config = ServiceConfig::from_env()?;
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    // PDFium binding and model loading block.
    let orchestrator = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || build_orchestrator(&config))
            .await
            .map_err(|e| StartupError::Server(format!("Startup task failed: {e}")))??
    };

    let ctx = ApiContext::new(
        Arc::new(orchestrator),
        Duration::from_secs(config.request_timeout_secs),
    );
    let mut server = start_server(ctx, config.bind_addr)
        .await
        .map_err(StartupError::Server)?;
    tracing::info!(
        session_id = %server.session.session_id,
        addr = %server.session.server_addr,
        started_at = %server.session.started_at,
        "Serving extraction API"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
    }
    server.shutdown();
    server.wait().await;
    Ok(())
}
