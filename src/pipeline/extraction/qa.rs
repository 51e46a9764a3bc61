use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{QaAnswer, QaModel};
use super::PipelineError;

/// Client for a HuggingFace-compatible question-answering endpoint.
pub struct HttpQaClient {
    base_url: String,
    model: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    name: String,
}

impl HttpQaClient {
    pub fn new(
        base_url: &str,
        model: &str,
        token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::QaModel(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            token,
            client,
            timeout_secs,
            name: format!("http:{model}"),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}", self.base_url, self.model)
    }
}

#[derive(Serialize)]
struct QaRequest<'a> {
    inputs: QaInputs<'a>,
}

#[derive(Serialize)]
struct QaInputs<'a> {
    question: &'a str,
    context: &'a str,
}

#[derive(Deserialize)]
struct QaSpan {
    #[serde(default)]
    answer: String,
    score: Option<f32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QaResponse {
    // Tried first: an error object would otherwise parse as an empty span.
    Error { error: String },
    Single(QaSpan),
    Ranked(Vec<QaSpan>),
}

/// Parse a question-answering response body. Accepts a single answer object
/// or a ranked list (the first entry is taken). An empty list is no answer.
pub fn parse_hf_response(body: &str) -> Result<Option<QaAnswer>, PipelineError> {
    let parsed: QaResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::QaModel(format!("Unexpected QA response: {e}")))?;

    let span = match parsed {
        QaResponse::Single(span) => Some(span),
        QaResponse::Ranked(spans) => spans.into_iter().next(),
        QaResponse::Error { error } => return Err(PipelineError::QaModel(error)),
    };

    Ok(span.map(|s| QaAnswer {
        text: s.answer,
        score: s.score,
    }))
}

impl QaModel for HttpQaClient {
    fn answer(&self, question: &str, context: &str) -> Result<Option<QaAnswer>, PipelineError> {
        let body = QaRequest {
            inputs: QaInputs { question, context },
        };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                PipelineError::QaModel(format!("Cannot connect to QA endpoint at {}", self.base_url))
            } else if e.is_timeout() {
                PipelineError::QaModel(format!("Request timed out after {}s", self.timeout_secs))
            } else {
                PipelineError::QaModel(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| PipelineError::QaModel(format!("Failed to read QA response: {e}")))?;
        if !status.is_success() {
            return Err(PipelineError::QaModel(format!(
                "QA endpoint returned {}: {text}",
                status.as_u16()
            )));
        }

        parse_hf_response(&text)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX extractive QA, behind the `onnx-qa` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-qa")]
pub use onnx::OnnxQaModel;

#[cfg(feature = "onnx-qa")]
mod onnx {
    use super::{QaAnswer, QaModel};
    use crate::pipeline::extraction::PipelineError;
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Mutex;
    use tokenizers::{TruncationParams, TruncationStrategy};

    const MAX_SEQ_LEN: usize = 384;
    const DOC_STRIDE: usize = 128;
    const MAX_ANSWER_TOKENS: usize = 30;

    /// Local SQuAD2-style span-extraction model (e.g. roberta-base-squad2
    /// exported to ONNX).
    ///
    /// `model_dir` holds `model.onnx` and `tokenizer.json`. Long contexts are
    /// split into overlapping windows and the best span across all windows
    /// wins.
    pub struct OnnxQaModel {
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
        name: String,
    }

    impl OnnxQaModel {
        pub fn load(model_dir: &Path) -> Result<Self, PipelineError> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");

            for path in [&model_path, &tokenizer_path] {
                if !path.exists() {
                    return Err(PipelineError::QaModel(format!(
                        "Model file not found: {}",
                        path.display()
                    )));
                }
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| PipelineError::QaModel(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| PipelineError::QaModel(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| PipelineError::QaModel(format!("ONNX load failed: {e}")))?;

            let mut tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| PipelineError::QaModel(format!("Tokenizer load failed: {e}")))?;
            tokenizer
                .with_truncation(Some(TruncationParams {
                    max_length: MAX_SEQ_LEN,
                    stride: DOC_STRIDE,
                    strategy: TruncationStrategy::OnlySecond,
                    ..Default::default()
                }))
                .map_err(|e| PipelineError::QaModel(format!("Tokenizer setup failed: {e}")))?;

            let name = format!(
                "onnx:{}",
                model_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "model".to_string())
            );
            tracing::info!(model = %name, "ONNX QA model loaded from {}", model_dir.display());

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
                name,
            })
        }

        /// Start/end logits for one window.
        fn logits(&self, encoding: &tokenizers::Encoding) -> Result<(Vec<f32>, Vec<f32>), PipelineError> {
            use ort::value::TensorRef;

            let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
            let mask: Vec<i64> = encoding
                .get_attention_mask()
                .iter()
                .map(|&m| m as i64)
                .collect();
            let seq_len = ids.len();

            let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), ids)
                .map_err(|e| PipelineError::QaModel(e.to_string()))?;
            let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), mask)
                .map_err(|e| PipelineError::QaModel(e.to_string()))?;

            let ids_tensor = TensorRef::from_array_view(&ids_array)
                .map_err(|e| PipelineError::QaModel(e.to_string()))?;
            let mask_tensor = TensorRef::from_array_view(&mask_array)
                .map_err(|e| PipelineError::QaModel(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| PipelineError::QaModel("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor])
                .map_err(|e| PipelineError::QaModel(format!("ONNX inference failed: {e}")))?;

            let (_, start) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| PipelineError::QaModel(format!("Start logits: {e}")))?;
            let (_, end) = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(|e| PipelineError::QaModel(format!("End logits: {e}")))?;

            if start.len() != seq_len || end.len() != seq_len {
                return Err(PipelineError::QaModel(format!(
                    "Unexpected logits length {} / {}, expected {seq_len}",
                    start.len(),
                    end.len()
                )));
            }

            Ok((start.to_vec(), end.to_vec()))
        }
    }

    struct Candidate {
        score: f32,
        char_start: usize,
        char_end: usize,
    }

    /// Best context span in one window, scored as the product of the start
    /// and end softmax probabilities.
    fn best_span(encoding: &tokenizers::Encoding, start: &[f32], end: &[f32]) -> Option<Candidate> {
        let context: Vec<usize> = encoding
            .get_sequence_ids()
            .iter()
            .enumerate()
            .filter(|(_, seq)| **seq == Some(1))
            .map(|(i, _)| i)
            .collect();
        let offsets = encoding.get_offsets();

        let start_p = softmax(start);
        let end_p = softmax(end);

        let mut best: Option<Candidate> = None;
        for (pos, &s) in context.iter().enumerate() {
            for &e in context[pos..].iter().take(MAX_ANSWER_TOKENS) {
                let score = start_p[s] * end_p[e];
                if best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(Candidate {
                        score,
                        char_start: offsets[s].0,
                        char_end: offsets[e].1,
                    });
                }
            }
        }
        best
    }

    fn softmax(logits: &[f32]) -> Vec<f32> {
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f32 = exp.iter().sum();
        exp.into_iter().map(|v| v / sum).collect()
    }

    impl QaModel for OnnxQaModel {
        fn answer(&self, question: &str, context: &str) -> Result<Option<QaAnswer>, PipelineError> {
            let encoding = self
                .tokenizer
                .encode((question, context), true)
                .map_err(|e| PipelineError::QaModel(format!("Tokenization failed: {e}")))?;

            let windows = std::iter::once(&encoding).chain(encoding.get_overflowing().iter());

            let mut best: Option<Candidate> = None;
            for window in windows {
                let (start, end) = self.logits(window)?;
                if let Some(candidate) = best_span(window, &start, &end) {
                    if best.as_ref().map_or(true, |b| candidate.score > b.score) {
                        best = Some(candidate);
                    }
                }
            }

            Ok(best.and_then(|c| {
                context.get(c.char_start..c.char_end).map(|text| QaAnswer {
                    text: text.to_string(),
                    score: Some(c.score),
                })
            }))
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Mock QA model answering from a fixed question-to-answer table.
/// Unknown questions get no answer.
pub struct MockQaModel {
    answers: Vec<(String, String)>,
    failing: Vec<String>,
    reentrant: bool,
    calls: Mutex<Vec<String>>,
}

impl MockQaModel {
    pub fn new() -> Self {
        Self {
            answers: Vec::new(),
            failing: Vec::new(),
            reentrant: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn answer_for(mut self, question: &str, answer: &str) -> Self {
        self.answers.push((question.to_string(), answer.to_string()));
        self
    }

    /// Make calls with `question` fail with a model error.
    pub fn fail_for(mut self, question: &str) -> Self {
        self.failing.push(question.to_string());
        self
    }

    pub fn non_reentrant(mut self) -> Self {
        self.reentrant = false;
        self
    }

    /// Questions asked so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Default for MockQaModel {
    fn default() -> Self {
        Self::new()
    }
}

impl QaModel for MockQaModel {
    fn answer(&self, question: &str, _context: &str) -> Result<Option<QaAnswer>, PipelineError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(question.to_string());
        }
        if self.failing.iter().any(|q| q == question) {
            return Err(PipelineError::QaModel("mock model failure".into()));
        }
        Ok(self
            .answers
            .iter()
            .find(|(q, _)| q == question)
            .map(|(_, a)| QaAnswer::new(a.as_str())))
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }
}
