//! `POST /extract-patient-info/`: discharge summary upload to attributes.
//!
//! Multipart fields:
//! - `file`: the scanned PDF. Its file name carries the hospital identifier.
//! - `requested_attributes`: optional comma-separated attribute names.
//!
//! `?verbose=true` returns the full result with not-found reasons instead of
//! the flat name-to-value object.

use axum::extract::{Multipart, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::hospital::hospital_id_from_filename;
use crate::pipeline::extraction::{AttributeRequest, CancelFlag, ExtractionError};

#[derive(Debug, Default, Deserialize)]
pub struct ExtractQuery {
    #[serde(default)]
    pub verbose: bool,
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
    requested_attributes: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut requested_attributes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file data: {e}")))?;
                file = Some((filename, bytes.to_vec()));
            }
            "requested_attributes" => {
                let text = field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Failed to read requested_attributes: {e}"))
                })?;
                requested_attributes = Some(text);
            }
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let (filename, bytes) = file.ok_or_else(|| ApiError::BadRequest("No file provided".into()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".into()));
    }

    Ok(Upload {
        filename,
        bytes,
        requested_attributes,
    })
}

/// `POST /extract-patient-info/`
pub async fn extract_patient_info(
    State(ctx): State<ApiContext>,
    Query(query): Query<ExtractQuery>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = read_upload(multipart).await?;

    let hospital_id = hospital_id_from_filename(&upload.filename).to_string();
    if hospital_id.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Cannot derive a hospital identifier from file name '{}'",
            upload.filename
        )));
    }
    let request = AttributeRequest::parse(upload.requested_attributes.as_deref());

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("extract", %request_id, hospital = %hospital_id);
    span.in_scope(|| {
        tracing::info!(
            bytes = upload.bytes.len(),
            explicit = matches!(request, AttributeRequest::Explicit(_)),
            "Extraction requested"
        )
    });

    let orchestrator = ctx.orchestrator.clone();
    let cancel = CancelFlag::new();
    let worker_cancel = cancel.clone();
    let task = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        orchestrator.run_cancellable(&upload.bytes, &hospital_id, &request, &worker_cancel)
    });

    // The worker cannot be interrupted mid-page; it sees the flag before its
    // next page or QA call and returns early.
    let result = match tokio::time::timeout(ctx.request_timeout, task).await {
        Err(_) => {
            cancel.cancel();
            let secs = ctx.request_timeout.as_secs();
            tracing::warn!(%request_id, timeout_secs = secs, "Extraction timed out");
            return Err(ExtractionError::Timeout(secs).into());
        }
        Ok(Err(join_error)) => {
            return Err(ApiError::Internal(format!("Extraction task failed: {join_error}")));
        }
        Ok(Ok(outcome)) => outcome?,
    };

    let response = if query.verbose {
        Json(&result).into_response()
    } else {
        Json(result.flat()).into_response()
    };
    Ok(response)
}
