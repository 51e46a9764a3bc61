//! Exclusive access to models whose runtime is not reentrant.
//!
//! Tesseract handles and some QA runtimes must not be driven from two
//! requests at once. Instead of locking around every call site, such a model
//! is wrapped once at startup in a `ModelGate`; the gate implements the same
//! collaborator trait and serializes every call through one lock.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use serde::Serialize;

use crate::pipeline::extraction::{OcrEngine, OcrLine, PipelineError, QaAnswer, QaModel};

/// Snapshot of the call currently holding a gate.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveCall {
    pub gate: &'static str,
    /// RFC 3339.
    pub started_at: String,
}

#[derive(Debug, thiserror::Error)]
#[error("Model gate '{0}' lock poisoned")]
pub struct GatePoisoned(&'static str);

/// Serializing wrapper around a shared model.
pub struct ModelGate<M: ?Sized> {
    label: &'static str,
    inner: Arc<M>,
    lock: Mutex<()>,
    current: Mutex<Option<ActiveCall>>,
}

impl<M: ?Sized> ModelGate<M> {
    pub fn new(label: &'static str, inner: Arc<M>) -> Self {
        Self {
            label,
            inner,
            lock: Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    /// Block until the gate is free. Hold the guard for the whole call.
    pub fn acquire(&self) -> Result<GateGuard<'_, M>, GatePoisoned> {
        let guard = match self.lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                if let Some(call) = self.current_call() {
                    tracing::debug!(
                        gate = self.label,
                        held_since = %call.started_at,
                        "Waiting for model gate"
                    );
                }
                self.lock.lock().map_err(|_| GatePoisoned(self.label))?
            }
            Err(TryLockError::Poisoned(_)) => return Err(GatePoisoned(self.label)),
        };

        if let Ok(mut current) = self.current.lock() {
            *current = Some(ActiveCall {
                gate: self.label,
                started_at: chrono::Utc::now().to_rfc3339(),
            });
        }

        Ok(GateGuard {
            _guard: guard,
            gate: self,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    pub fn current_call(&self) -> Option<ActiveCall> {
        self.current.lock().ok()?.clone()
    }

    fn clear_current(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }
}

/// RAII token for a gate. Dropping it releases the gate.
pub struct GateGuard<'a, M: ?Sized> {
    _guard: MutexGuard<'a, ()>,
    gate: &'a ModelGate<M>,
}

impl<M: ?Sized> Drop for GateGuard<'_, M> {
    fn drop(&mut self) {
        self.gate.clear_current();
    }
}

impl<M: QaModel + ?Sized> QaModel for ModelGate<M> {
    fn answer(&self, question: &str, context: &str) -> Result<Option<QaAnswer>, PipelineError> {
        let _guard = self
            .acquire()
            .map_err(|e| PipelineError::QaModel(e.to_string()))?;
        self.inner.answer(question, context)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_reentrant(&self) -> bool {
        false
    }
}

impl<M: OcrEngine + ?Sized> OcrEngine for ModelGate<M> {
    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrLine>, PipelineError> {
        let _guard = self
            .acquire()
            .map_err(|e| PipelineError::OcrProcessing(e.to_string()))?;
        self.inner.recognize(image_path)
    }

    fn is_reentrant(&self) -> bool {
        false
    }
}

/// Wrap `model` in a gate unless it is reentrant and `force` is off.
pub fn gate_qa(model: Arc<dyn QaModel>, force: bool) -> Arc<dyn QaModel> {
    if model.is_reentrant() && !force {
        return model;
    }
    tracing::info!(model = model.name(), "Serializing QA model calls");
    Arc::new(ModelGate::new("qa", model))
}

/// Wrap `engine` in a gate unless it is reentrant.
pub fn gate_ocr(engine: Arc<dyn OcrEngine>) -> Arc<dyn OcrEngine> {
    if engine.is_reentrant() {
        return engine;
    }
    tracing::info!("Serializing OCR engine calls");
    Arc::new(ModelGate::new("ocr", engine))
}
