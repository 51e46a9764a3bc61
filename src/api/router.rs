//! Extraction API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Largest accepted upload, multipart overhead included.
pub const MAX_UPLOAD_BYTES: usize = 55 * 1024 * 1024;

/// Build the extraction API router.
pub fn extraction_router(ctx: ApiContext) -> Router {
    Router::new()
        .route(
            "/extract-patient-info/",
            post(endpoints::extract::extract_patient_info),
        )
        .route(
            "/extract-patient-info",
            post(endpoints::extract::extract_patient_info),
        )
        .route("/health", get(endpoints::health::check))
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
