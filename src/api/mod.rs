//! HTTP surface of the extraction service.
//!
//! `extraction_router()` returns a composable `Router`; `server` owns the
//! listener lifecycle. Handlers stay thin: they parse the upload, hand the
//! bytes to the orchestrator on a blocking worker and map the outcome to a
//! status code.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::extraction_router;
pub use server::{ExtractionServer, ServerSession};
pub use types::ApiContext;
