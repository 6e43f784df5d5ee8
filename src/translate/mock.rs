//! Deterministic backend for tests and dry runs.
//!
//! Maps configured inputs to fixed outputs and echoes everything else, so a
//! pipeline run is fully reproducible without a model. Latency and transient
//! failures can be injected to exercise retry and cancellation paths.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{ensure_input_length, TranslateBackend, TranslateRequest};
use crate::error::{DecklingError, Result};

#[derive(Debug, Clone)]
pub struct MockCall {
    pub text: String,
    pub context: Option<String>,
}

#[derive(Clone)]
pub struct MockBackend {
    responses: Arc<HashMap<String, String>>,
    latency: Duration,
    max_input_chars: usize,
    /// Inputs that always fail with a permanent error.
    permanent_failures: Arc<Vec<String>>,
    /// Number of leading calls that fail with a transient error.
    transient_failures: Arc<Mutex<u32>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(HashMap::new()),
            latency: Duration::ZERO,
            max_input_chars: 4000,
            permanent_failures: Arc::new(Vec::new()),
            transient_failures: Arc::new(Mutex::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fix the output for a specific input.
    pub fn with_response(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        let mut responses = (*self.responses).clone();
        responses.insert(input.into(), output.into());
        self.responses = Arc::new(responses);
        self
    }

    pub fn with_responses<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut responses = (*self.responses).clone();
        for (input, output) in pairs {
            responses.insert(input.into(), output.into());
        }
        self.responses = Arc::new(responses);
        self
    }

    /// Simulated latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_max_input_chars(mut self, limit: usize) -> Self {
        self.max_input_chars = limit;
        self
    }

    /// The given input always fails with a permanent error.
    pub fn with_permanent_failure(mut self, input: impl Into<String>) -> Self {
        let mut failures = (*self.permanent_failures).clone();
        failures.push(input.into());
        self.permanent_failures = Arc::new(failures);
        self
    }

    /// The first `count` calls fail with a transient error.
    pub fn with_transient_failures(self, count: u32) -> Self {
        *self.transient_failures.lock().unwrap() = count;
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranslateBackend for MockBackend {
    async fn translate(
        &self,
        text: &str,
        request: &TranslateRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        ensure_input_length(text, self.max_input_chars)?;

        self.calls.lock().unwrap().push(MockCall {
            text: text.to_string(),
            context: request.context.clone(),
        });

        if !self.latency.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(DecklingError::TranslationCancelled),
                _ = tokio::time::sleep(self.latency) => {}
            }
        } else if cancel.is_cancelled() {
            return Err(DecklingError::TranslationCancelled);
        }

        {
            let mut remaining = self.transient_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DecklingError::TranslationTransient(
                    "injected transient failure".to_string(),
                ));
            }
        }

        if self.permanent_failures.iter().any(|t| t.as_str() == text) {
            return Err(DecklingError::TranslationPermanent {
                message: "injected permanent failure".to_string(),
                auth: false,
            });
        }

        Ok(self
            .responses
            .get(text)
            .cloned()
            .unwrap_or_else(|| text.to_string()))
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }
}
