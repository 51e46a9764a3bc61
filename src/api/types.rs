//! Shared state for the extraction API.

use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::extraction::ExtractionOrchestrator;

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub orchestrator: Arc<ExtractionOrchestrator>,
    /// Upper bound on one extraction, OCR and QA included.
    pub request_timeout: Duration,
}

impl ApiContext {
    pub fn new(orchestrator: Arc<ExtractionOrchestrator>, request_timeout: Duration) -> Self {
        Self {
            orchestrator,
            request_timeout,
        }
    }
}
