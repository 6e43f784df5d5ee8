//! Paragraph translation: prompt composition, transient-error retry with
//! jittered backoff, and record-level failure attachment. A paragraph that
//! cannot be translated passes through untranslated rather than being lost.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DecklingError, Result};
use crate::extract::ParagraphRecord;
use crate::glossary::Glossary;
use crate::translate::{TranslateBackend, TranslateRequest};

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_JITTER_MS: u64 = 250;

#[derive(Clone)]
pub struct ParagraphTranslator {
    backend: Arc<dyn TranslateBackend>,
    glossary: Option<Arc<Glossary>>,
    source_language: String,
    target_language: String,
    max_retries: u32,
}

impl ParagraphTranslator {
    pub fn new(
        backend: Arc<dyn TranslateBackend>,
        glossary: Option<Arc<Glossary>>,
        source_language: &str,
        target_language: &str,
        max_retries: u32,
    ) -> Self {
        Self {
            backend,
            glossary,
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            max_retries: max_retries.max(1),
        }
    }

    /// Translate one string: glossary fragment plus caller context form the
    /// prompt context, transient failures retry with jittered exponential
    /// backoff up to the configured cap.
    pub async fn translate_text(
        &self,
        text: &str,
        extra_context: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let context = self.compose_context(text, extra_context);
        let request = TranslateRequest::new(&self.source_language, &self.target_language)
            .with_context(context);

        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(DecklingError::TranslationCancelled);
            }

            let error = match tokio::time::timeout(
                timeout,
                self.backend.translate(text, &request, cancel),
            )
            .await
            {
                Ok(Ok(translation)) => return Ok(translation),
                Ok(Err(e)) => e,
                Err(_) => DecklingError::TranslationTransient(format!(
                    "backend call timed out after {}s",
                    timeout.as_secs()
                )),
            };

            if !error.is_transient() || attempt >= self.max_retries {
                return Err(error);
            }

            let delay = backoff_delay(attempt);
            warn!(
                "Attempt {}/{} failed ({}), retrying in {:?}",
                attempt, self.max_retries, error, delay
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(DecklingError::TranslationCancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Translate a paragraph record in place. Cancellation propagates; any
    /// other failure is attached to the record, which then passes through
    /// untranslated to the writer.
    pub async fn translate_paragraph(
        &self,
        record: &mut ParagraphRecord,
        extra_context: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if record.is_empty() {
            return Ok(());
        }

        debug!(
            "Translating paragraph {}/{}/{}: {}",
            record.slide,
            record.shape,
            record.paragraph,
            preview(&record.text)
        );

        match self
            .translate_text(&record.text, extra_context, timeout, cancel)
            .await
        {
            Ok(translation) => {
                info!(
                    "Translated paragraph {}/{}/{}: {}",
                    record.slide,
                    record.shape,
                    record.paragraph,
                    preview(&translation)
                );
                record.target_text = Some(translation);
                Ok(())
            }
            Err(DecklingError::TranslationCancelled) => Err(DecklingError::TranslationCancelled),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    "Paragraph {}/{}/{} passes through untranslated: {}",
                    record.slide, record.shape, record.paragraph, e
                );
                record.failure = Some(e.to_string());
                Ok(())
            }
        }
    }

    fn compose_context(&self, text: &str, extra_context: Option<&str>) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(glossary) = &self.glossary {
            let fragment = glossary.prompt_fragment(text, None);
            if !fragment.is_empty() {
                parts.push(fragment);
            }
        }
        if let Some(extra) = extra_context {
            if !extra.trim().is_empty() {
                parts.push(extra.to_string());
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Exponential backoff with jitter: 500ms, 1s, 2s... plus up to 250ms.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(1 << (attempt.saturating_sub(1)).min(6));
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(base + jitter)
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::{Run, RunFormat};
    use crate::glossary::GlossaryEntry;
    use crate::translate::MockBackend;

    fn record(text: &str) -> ParagraphRecord {
        ParagraphRecord {
            slide: 0,
            shape: 0,
            paragraph: 0,
            text: text.to_string(),
            alignment: Default::default(),
            level: 0,
            is_bullet: false,
            runs: vec![Run::new(text, RunFormat::default())],
            target_text: None,
            aligned_runs: None,
            align_summary: None,
            failure: None,
        }
    }

    fn translator(backend: MockBackend, glossary: Option<Glossary>) -> ParagraphTranslator {
        ParagraphTranslator::new(
            Arc::new(backend),
            glossary.map(Arc::new),
            "English",
            "French",
            3,
        )
    }

    #[tokio::test]
    async fn test_translation_attached() {
        let backend = MockBackend::new().with_response("Hello.", "Bonjour.");
        let translator = translator(backend, None);
        let mut record = record("Hello.");
        let cancel = CancellationToken::new();

        translator
            .translate_paragraph(&mut record, None, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(record.target_text.as_deref(), Some("Bonjour."));
        assert!(record.failure.is_none());
    }

    #[tokio::test]
    async fn test_empty_paragraph_skipped() {
        let backend = MockBackend::new();
        let translator = translator(backend.clone(), None);
        let mut record = record("   ");
        let cancel = CancellationToken::new();

        translator
            .translate_paragraph(&mut record, None, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert!(record.target_text.is_none());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_retried() {
        let backend = MockBackend::new()
            .with_response("Hello.", "Bonjour.")
            .with_transient_failures(2);
        let translator = translator(backend.clone(), None);
        let mut record = record("Hello.");
        let cancel = CancellationToken::new();

        translator
            .translate_paragraph(&mut record, None, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(record.target_text.as_deref(), Some("Bonjour."));
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_attaches_failure() {
        let backend = MockBackend::new().with_transient_failures(10);
        let translator = translator(backend.clone(), None);
        let mut record = record("Hello.");
        let cancel = CancellationToken::new();

        translator
            .translate_paragraph(&mut record, None, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert!(record.target_text.is_none());
        assert!(record.failure.is_some());
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let backend = MockBackend::new().with_permanent_failure("Hello.");
        let translator = translator(backend.clone(), None);
        let mut record = record("Hello.");
        let cancel = CancellationToken::new();

        translator
            .translate_paragraph(&mut record, None, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert!(record.failure.is_some());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let backend = MockBackend::new().with_latency(Duration::from_secs(10));
        let translator = translator(backend, None);
        let mut record = record("Hello.");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = translator
            .translate_paragraph(&mut record, None, Duration::from_secs(5), &cancel)
            .await;
        assert!(matches!(result, Err(DecklingError::TranslationCancelled)));
    }

    #[tokio::test]
    async fn test_glossary_fragment_in_context() {
        let glossary = Glossary::from_entries(vec![GlossaryEntry {
            source: "Senate".into(),
            target: "Sénat".into(),
            context: None,
            case_sensitive: true,
            notes: None,
            priority: 10,
        }])
        .unwrap();
        let backend = MockBackend::new();
        let translator = translator(backend.clone(), Some(glossary));
        let mut record = record("The Senate convened.");
        let cancel = CancellationToken::new();

        translator
            .translate_paragraph(&mut record, Some("deck about parliament"), Duration::from_secs(5), &cancel)
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        let context = calls[0].context.as_deref().unwrap();
        assert!(context.contains("Sénat"));
        assert!(context.contains("deck about parliament"));
    }

    #[tokio::test]
    async fn test_too_long_attaches_failure() {
        let backend = MockBackend::new().with_max_input_chars(5);
        let translator = translator(backend, None);
        let mut record = record("this text is much too long");
        let cancel = CancellationToken::new();

        translator
            .translate_paragraph(&mut record, None, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert!(record.failure.as_deref().unwrap().contains("too long"));
        assert!(record.target_text.is_none());
    }

    #[test]
    fn test_backoff_grows() {
        let first = backoff_delay(1);
        let third = backoff_delay(3);
        assert!(first >= Duration::from_millis(500));
        assert!(first < Duration::from_millis(500 + 250));
        assert!(third >= Duration::from_millis(2000));
    }
}
