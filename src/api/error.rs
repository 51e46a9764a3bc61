//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::extraction::ExtractionError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Hospital not configured: {0}")]
    HospitalNotFound(String),
    #[error("Hospital has no keywords configured: {0}")]
    NoKeywordsConfigured(String),
    #[error("No matching page after scanning {pages_scanned} pages")]
    NoMatchingPage { pages_scanned: usize },
    #[error("Extraction timed out after {0}s")]
    Timeout(u64),
    #[error("Extraction cancelled")]
    Cancelled,
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::HospitalNotFound(id) => (
                StatusCode::NOT_FOUND,
                "HOSPITAL_NOT_FOUND",
                format!("Hospital '{id}' is not configured"),
            ),
            ApiError::NoKeywordsConfigured(id) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "NO_KEYWORDS_CONFIGURED",
                format!("Hospital '{id}' has no keywords configured"),
            ),
            ApiError::NoMatchingPage { pages_scanned } => (
                StatusCode::NOT_FOUND,
                "NO_MATCHING_PAGE",
                format!("No relevant information found ({pages_scanned} pages scanned)"),
            ),
            ApiError::Timeout(secs) => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                format!("Extraction did not finish within {secs}s"),
            ),
            ApiError::Cancelled => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                "Extraction was cancelled before it finished".to_string(),
            ),
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                detail.clone(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "EXTRACTION_FAILED",
                    "Extraction failed".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::ConfigNotFound(id) => ApiError::HospitalNotFound(id),
            ExtractionError::NoKeywordsConfigured(id) => ApiError::NoKeywordsConfigured(id),
            ExtractionError::NoMatchingPage { pages_scanned } => {
                ApiError::NoMatchingPage { pages_scanned }
            }
            ExtractionError::Timeout(secs) => ApiError::Timeout(secs),
            ExtractionError::Cancelled => ApiError::Cancelled,
            ExtractionError::Failed(e) => ApiError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::PipelineError;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn hospital_not_found_returns_404() {
        let response = ApiError::from(ExtractionError::ConfigNotFound("ZZ".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "HOSPITAL_NOT_FOUND");
        assert!(json["error"]["message"].as_str().unwrap().contains("ZZ"));
    }

    #[tokio::test]
    async fn no_keywords_returns_422() {
        let response =
            ApiError::from(ExtractionError::NoKeywordsConfigured("EE".into())).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"]["code"], "NO_KEYWORDS_CONFIGURED");
    }

    #[tokio::test]
    async fn no_matching_page_is_distinct_404() {
        let response =
            ApiError::from(ExtractionError::NoMatchingPage { pages_scanned: 4 }).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "NO_MATCHING_PAGE");
    }

    #[tokio::test]
    async fn timeout_returns_504() {
        let response = ApiError::from(ExtractionError::Timeout(30)).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(response).await["error"]["code"], "TIMEOUT");
    }

    #[tokio::test]
    async fn cancelled_run_reports_timeout() {
        let response = ApiError::from(ExtractionError::Cancelled).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(response).await["error"]["code"], "TIMEOUT");
    }

    #[tokio::test]
    async fn bad_request_returns_400() {
        let response = ApiError::BadRequest("Missing 'file' field".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failure_hides_detail() {
        let err = ExtractionError::Failed(PipelineError::OcrProcessing("segfault at 0x0".into()));
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "EXTRACTION_FAILED");
        assert_eq!(json["error"]["message"], "Extraction failed");
    }
}
