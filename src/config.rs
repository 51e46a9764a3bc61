//! Service configuration.
//!
//! Everything is read from environment variables at startup. Defaults mirror
//! a single-host deployment: the hospital tables sit next to the binary and
//! the QA model is reached over the HuggingFace inference API.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::Serialize;

/// Application-level constants
pub const APP_NAME: &str = "discharge-extract";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_KEYWORDS_CSV: &str = "Keywords.csv";
pub const DEFAULT_ATTRIBUTES_CSV: &str = "Attributes.csv";
pub const DEFAULT_QA_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_QA_MODEL: &str = "deepset/roberta-base-squad2";
pub const DEFAULT_QA_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "discharge_extract=info,tower_http=info"
}

/// Which extractive QA backend answers attribute questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QaBackend {
    /// HuggingFace-compatible inference endpoint over HTTP.
    Http,
    /// Local ONNX model (requires the `onnx-qa` feature).
    Onnx,
}

impl QaBackend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" | "hf" | "huggingface" => Some(Self::Http),
            "onnx" | "local" => Some(Self::Onnx),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0} must be set when the ONNX QA backend is selected")]
    MissingModelDir(&'static str),
}

/// Runtime configuration for the extraction service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub keywords_csv: PathBuf,
    pub attributes_csv: PathBuf,
    /// Optional per-hospital question overrides.
    pub questions_csv: Option<PathBuf>,
    pub qa_backend: QaBackend,
    pub qa_url: String,
    pub qa_model: String,
    #[serde(skip)]
    pub qa_token: Option<String>,
    pub qa_model_dir: Option<PathBuf>,
    pub qa_timeout_secs: u64,
    /// Route every QA call through one exclusive gate even if the backend is reentrant.
    pub serialize_qa: bool,
    pub tessdata_dir: Option<PathBuf>,
    pub ocr_language: String,
    pub pdfium_library: Option<PathBuf>,
    pub render_dpi: u32,
    pub scratch_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub parallel_attributes: bool,
}

impl ServiceConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = match get("DISCHARGE_BIND_ADDR") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "DISCHARGE_BIND_ADDR",
                value: raw,
            })?,
            None => {
                let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
            }
        };

        let qa_backend = match get("DISCHARGE_QA_BACKEND") {
            Some(raw) => QaBackend::parse(&raw).ok_or(ConfigError::InvalidValue {
                key: "DISCHARGE_QA_BACKEND",
                value: raw,
            })?,
            None => QaBackend::Http,
        };

        let qa_model_dir = get("DISCHARGE_QA_MODEL_DIR").map(PathBuf::from);
        if qa_backend == QaBackend::Onnx && qa_model_dir.is_none() {
            return Err(ConfigError::MissingModelDir("DISCHARGE_QA_MODEL_DIR"));
        }

        let render_dpi = parse_or(
            "DISCHARGE_RENDER_DPI",
            get("DISCHARGE_RENDER_DPI"),
            crate::pipeline::extraction::pdfium::DEFAULT_RENDER_DPI,
        )?;
        if !(36..=600).contains(&render_dpi) {
            return Err(ConfigError::InvalidValue {
                key: "DISCHARGE_RENDER_DPI",
                value: render_dpi.to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            keywords_csv: get("DISCHARGE_KEYWORDS_CSV")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KEYWORDS_CSV)),
            attributes_csv: get("DISCHARGE_ATTRIBUTES_CSV")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ATTRIBUTES_CSV)),
            questions_csv: get("DISCHARGE_QUESTIONS_CSV").map(PathBuf::from),
            qa_backend,
            qa_url: get("DISCHARGE_QA_URL").unwrap_or_else(|| DEFAULT_QA_URL.to_string()),
            qa_model: get("DISCHARGE_QA_MODEL").unwrap_or_else(|| DEFAULT_QA_MODEL.to_string()),
            qa_token: get("DISCHARGE_QA_TOKEN"),
            qa_model_dir,
            qa_timeout_secs: parse_or(
                "DISCHARGE_QA_TIMEOUT_SECS",
                get("DISCHARGE_QA_TIMEOUT_SECS"),
                DEFAULT_QA_TIMEOUT_SECS,
            )?,
            serialize_qa: parse_bool("DISCHARGE_SERIALIZE_QA", get("DISCHARGE_SERIALIZE_QA"), false)?,
            tessdata_dir: get("DISCHARGE_TESSDATA_DIR").map(PathBuf::from),
            ocr_language: get("DISCHARGE_OCR_LANG").unwrap_or_else(|| "eng".to_string()),
            pdfium_library: get("PDFIUM_DYNAMIC_LIB_PATH").map(PathBuf::from),
            render_dpi,
            scratch_dir: get("DISCHARGE_SCRATCH_DIR").map(PathBuf::from),
            request_timeout_secs: parse_or(
                "DISCHARGE_REQUEST_TIMEOUT_SECS",
                get("DISCHARGE_REQUEST_TIMEOUT_SECS"),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            parallel_attributes: parse_bool(
                "DISCHARGE_PARALLEL_ATTRIBUTES",
                get("DISCHARGE_PARALLEL_ATTRIBUTES"),
                false,
            )?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value }),
        },
        None => Ok(default),
    }
}
