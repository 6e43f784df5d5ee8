// Pluggable translation backends behind one capability:
// - Ollama: local model over HTTP
// - OpenAI: hosted chat-completions API
// - Mock: deterministic in-process backend for tests and dry runs
//
// Exactly one backend instance is constructed per job and shared between
// paragraph translation and LLM-based alignment.

pub mod mock;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use mock::MockBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use crate::config::{BackendConfig, BackendKind};
use crate::error::{DecklingError, Result};

/// Per-call translation parameters.
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub source_language: String,
    pub target_language: String,
    /// Prompt context: glossary fragment, slide context, caller hints.
    pub context: Option<String>,
}

impl TranslateRequest {
    pub fn new(source_language: impl Into<String>, target_language: impl Into<String>) -> Self {
        Self {
            source_language: source_language.into(),
            target_language: target_language.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.trim().is_empty());
        self
    }
}

/// The single backend capability. Implementations must honour the
/// cancellation token promptly and report transient errors distinctly from
/// permanent ones.
#[async_trait]
pub trait TranslateBackend: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        request: &TranslateRequest,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Longest input the backend accepts; callers never split sentences.
    fn max_input_chars(&self) -> usize;

    /// Cheap probe run before a job starts.
    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

/// Reject inputs beyond the backend bound before dispatching.
pub fn ensure_input_length(text: &str, limit: usize) -> Result<()> {
    let length = text.chars().count();
    if length > limit {
        return Err(DecklingError::TranslationTooLong { length, limit });
    }
    Ok(())
}

/// Map an HTTP-level failure onto the error taxonomy: timeouts, connection
/// failures, 429 and 5xx retry; other statuses are permanent.
pub fn classify_http_error(err: reqwest::Error) -> DecklingError {
    if err.is_timeout() || err.is_connect() {
        return DecklingError::TranslationTransient(err.to_string());
    }
    if let Some(status) = err.status() {
        return classify_status(status, err.to_string());
    }
    DecklingError::TranslationTransient(err.to_string())
}

pub fn classify_status(status: reqwest::StatusCode, message: String) -> DecklingError {
    if status.as_u16() == 429 || status.is_server_error() {
        DecklingError::TranslationTransient(format!("{}: {}", status, message))
    } else {
        DecklingError::TranslationPermanent {
            message: format!("{}: {}", status, message),
            auth: matches!(status.as_u16(), 401 | 403),
        }
    }
}

/// Construct the backend selected by configuration.
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn TranslateBackend>> {
    match config.kind {
        BackendKind::Ollama => Ok(Arc::new(OllamaBackend::new(config))),
        BackendKind::OpenAi => Ok(Arc::new(OpenAiBackend::from_env(config)?)),
        BackendKind::Mock => Ok(Arc::new(MockBackend::new().with_max_input_chars(
            config.max_input_chars,
        ))),
    }
}
