//! Backend-reflective run alignment.
//!
//! Instead of embedding candidates, this strategy asks the translation
//! backend where each formatted source span landed in the target sentence.
//! It shares the job's backend instance; a second model is never loaded.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::common::{
    base_format, baseline_font, baseline_size, fill_gaps, guard_degenerate, is_formatted_run,
    trivial_alignment, GapFill,
};
use super::RunAligner;
use crate::deck::{Run, RunFormat};
use crate::error::{DecklingError, Result};
use crate::translate::{TranslateBackend, TranslateRequest};

const SPAN_TIMEOUT: Duration = Duration::from_secs(30);

/// A formatted stretch of source text, after merging truly consecutive runs
/// with identical formatting.
#[derive(Debug, Clone)]
struct FormattedSpan {
    text: String,
    format: RunFormat,
    /// Original index of the last run merged in, to detect consecutiveness.
    last_run_index: usize,
}

pub struct LlmAligner {
    backend: Arc<dyn TranslateBackend>,
    source_language: String,
    target_language: String,
}

impl LlmAligner {
    pub fn new(
        backend: Arc<dyn TranslateBackend>,
        source_language: &str,
        target_language: &str,
    ) -> Self {
        Self {
            backend,
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
        }
    }

    /// Runs that differ from the paragraph baseline, merged only when truly
    /// consecutive in the original run sequence with identical formatting.
    /// Whitespace-only runs are dropped so stray coloured spaces cannot
    /// bleed formatting into the target.
    fn formatted_spans(&self, runs: &[Run]) -> Vec<FormattedSpan> {
        let font = baseline_font(runs);
        let size = baseline_size(runs);

        let mut spans: Vec<FormattedSpan> = Vec::new();
        for (index, run) in runs.iter().enumerate() {
            if !is_formatted_run(run, &font, size) {
                continue;
            }

            match spans.last_mut() {
                Some(last)
                    if last.last_run_index + 1 == index && last.format == run.format =>
                {
                    last.text.push_str(&run.text);
                    last.last_run_index = index;
                }
                _ => spans.push(FormattedSpan {
                    text: run.text.clone(),
                    format: run.format.clone(),
                    last_run_index: index,
                }),
            }
        }

        spans.retain(|s| !s.text.trim().is_empty());
        spans
    }

    /// The reflective prompt sent to the backend for one span. Public so
    /// deterministic backends can be keyed on it.
    pub fn mapping_prompt(&self, term: &str, source_text: &str, target_text: &str) -> String {
        format!(
            "Given this translation:\n\
             \n\
             {source_lang}: \"{source}\"\n\
             {target_lang}: \"{target}\"\n\
             \n\
             Find where \"{term}\" appears in the {target_lang} translation above.\n\
             \n\
             IMPORTANT:\n\
             - Return the EXACT {target_lang} text that corresponds to \"{term}\"\n\
             - Copy it EXACTLY as it appears in the {target_lang} sentence (with correct capitalization, accents, articles)\n\
             - Do NOT translate it yourself - just find and return what's already in the {target_lang} text\n\
             - Return ONLY the {target_lang} phrase (no explanation, no quotes, no extra words)\n\
             \n\
             {target_lang} equivalent:",
            source_lang = self.source_language,
            target_lang = self.target_language,
            source = source_text,
            target = target_text,
            term = term,
        )
    }

    async fn map_span(
        &self,
        term: &str,
        source_text: &str,
        target_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let prompt = self.mapping_prompt(term, source_text, target_text);
        let request = TranslateRequest::new(&self.source_language, &self.target_language);

        let response = match tokio::time::timeout(
            SPAN_TIMEOUT,
            self.backend.translate(&prompt, &request, cancel),
        )
        .await
        {
            Err(_) => {
                warn!("Span mapping for '{}' timed out", term);
                return Ok(None);
            }
            Ok(Err(DecklingError::TranslationCancelled)) => {
                return Err(DecklingError::TranslationCancelled)
            }
            Ok(Err(e)) => {
                warn!("Span mapping for '{}' failed: {}", term, e);
                return Ok(None);
            }
            Ok(Ok(response)) => response,
        };

        let term_in_target = response.trim().trim_matches('"').trim().to_string();
        if term_in_target.is_empty() {
            warn!("Backend returned nothing for span '{}'", term);
            return Ok(None);
        }
        debug!("Mapped '{}' → '{}'", term, term_in_target);
        Ok(Some(term_in_target))
    }
}

#[async_trait]
impl RunAligner for LlmAligner {
    async fn align(
        &self,
        source_text: &str,
        source_runs: &[Run],
        target_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Run>> {
        if let Some(runs) = trivial_alignment(source_text, source_runs, target_text) {
            return Ok(runs);
        }

        let base = base_format(source_runs);
        let spans = self.formatted_spans(source_runs);
        if spans.is_empty() {
            return Ok(vec![Run::new(target_text, base)]);
        }

        info!("Mapping {} formatted spans via backend", spans.len());

        let mut used = vec![false; target_text.len()];
        let mut matched: Vec<(usize, usize, RunFormat)> = Vec::new();
        let mut mapped_count = 0;

        for span in &spans {
            let term = span.text.trim();
            let Some(term_in_target) = self
                .map_span(term, source_text, target_text, cancel)
                .await?
            else {
                continue;
            };

            // The response must be a contiguous substring of the target;
            // otherwise the span contributes nothing.
            match find_in_target(&term_in_target, target_text, &used) {
                Some((start, end)) => {
                    for slot in &mut used[start..end] {
                        *slot = true;
                    }
                    matched.push((start, end, span.format.clone()));
                    mapped_count += 1;
                    debug!(
                        "Applied span '{}' at {}..{} in target",
                        &target_text[start..end],
                        start,
                        end
                    );
                }
                None => {
                    warn!("Could not locate '{}' in target text", term_in_target);
                }
            }
        }

        info!(
            "Span mapping complete: {}/{} spans applied",
            mapped_count,
            spans.len()
        );

        let runs = fill_gaps(target_text, matched, &base, GapFill::BaseFormat);
        Ok(guard_degenerate(target_text, runs, &base))
    }
}

/// Locate `needle` in `target`, skipping already-claimed positions.
/// Tries the first case-insensitive occurrence, then word-boundary matches,
/// then any free occurrence.
fn find_in_target(needle: &str, target: &str, used: &[bool]) -> Option<(usize, usize)> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }

    let is_free =
        |start: usize, end: usize| !used[start..end].iter().any(|&taken| taken);

    let plain = Regex::new(&format!("(?i){}", regex::escape(needle))).ok()?;
    let matches: Vec<(usize, usize)> = plain
        .find_iter(target)
        .map(|m| (m.start(), m.end()))
        .collect();

    if let Some(&(start, end)) = matches.first() {
        if is_free(start, end) {
            return Some((start, end));
        }
    }

    if let Ok(boundary) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(needle))) {
        for m in boundary.find_iter(target) {
            if is_free(m.start(), m.end()) {
                return Some((m.start(), m.end()));
            }
        }
    }

    matches
        .into_iter()
        .find(|&(start, end)| is_free(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::Color;
    use crate::translate::MockBackend;

    fn default_run(text: &str) -> Run {
        Run::new(text, RunFormat::default())
    }

    fn bold_run(text: &str) -> Run {
        Run::new(
            text,
            RunFormat {
                bold: Some(true),
                ..Default::default()
            },
        )
    }

    fn link_run(text: &str, url: &str) -> Run {
        Run::new(
            text,
            RunFormat {
                hyperlink: Some(url.to_string()),
                ..Default::default()
            },
        )
    }

    fn concat(runs: &[Run]) -> String {
        runs.iter().map(|r| r.text.as_str()).collect()
    }

    /// Backend whose only job is answering the span-mapping prompts.
    fn aligner_with_mappings(
        source: &str,
        target: &str,
        mappings: Vec<(&str, &str)>,
    ) -> LlmAligner {
        let probe = LlmAligner::new(Arc::new(MockBackend::new()), "English", "French");
        let backend = MockBackend::new().with_responses(
            mappings
                .into_iter()
                .map(|(term, reply)| (probe.mapping_prompt(term, source, target), reply.to_string()))
                .collect::<Vec<_>>(),
        );
        LlmAligner::new(Arc::new(backend), "English", "French")
    }

    #[tokio::test]
    async fn test_hyperlink_preserved() {
        let source = "See the report.";
        let target = "Voir le rapport.";
        let runs = vec![
            default_run("See the "),
            link_run("report", "http://x"),
            default_run("."),
        ];
        let aligner = aligner_with_mappings(source, target, vec![("report", "rapport")]);
        let cancel = CancellationToken::new();

        let aligned = aligner.align(source, &runs, target, &cancel).await.unwrap();
        assert_eq!(concat(&aligned), target);

        let linked: Vec<&Run> = aligned
            .iter()
            .filter(|r| r.format.hyperlink.is_some())
            .collect();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].text, "rapport");
        // The trailing period keeps the base formatting.
        assert!(aligned.last().unwrap().format.hyperlink.is_none());
    }

    #[tokio::test]
    async fn test_bold_span_mapped() {
        let source = "Employees with an invisible disability";
        let target = "Les employés ayant un handicap invisible";
        let runs = vec![
            default_run("Employees with an "),
            bold_run("invisible"),
            default_run(" disability"),
        ];
        let aligner = aligner_with_mappings(source, target, vec![("invisible", "invisible")]);
        let cancel = CancellationToken::new();

        let aligned = aligner.align(source, &runs, target, &cancel).await.unwrap();
        assert_eq!(concat(&aligned), target);
        let bold: Vec<&Run> = aligned.iter().filter(|r| r.format.bold()).collect();
        assert_eq!(bold.len(), 1);
        assert_eq!(bold[0].text, "invisible");
    }

    #[tokio::test]
    async fn test_no_formatted_spans_single_base_run() {
        let source = "Plain text here";
        let target = "Texte simple ici";
        let runs = vec![default_run("Plain "), default_run("text here")];
        let aligner = aligner_with_mappings(source, target, vec![]);
        let cancel = CancellationToken::new();

        let aligned = aligner.align(source, &runs, target, &cancel).await.unwrap();
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].text, target);
    }

    #[tokio::test]
    async fn test_whitespace_formatted_run_ignored() {
        let source = "Warning danger";
        let target = "Attention danger";
        let runs = vec![
            default_run("Warning"),
            Run::new(
                " ",
                RunFormat {
                    bold: Some(true),
                    color: Some(Color::Rgb("#FF0000".into())),
                    ..Default::default()
                },
            ),
            default_run("danger"),
        ];
        // No mappings configured: the whitespace run must not even be asked.
        let backend = MockBackend::new();
        let aligner = LlmAligner::new(Arc::new(backend.clone()), "English", "French");
        let cancel = CancellationToken::new();

        let aligned = aligner.align(source, &runs, target, &cancel).await.unwrap();
        assert_eq!(concat(&aligned), target);
        assert_eq!(backend.call_count(), 0);
        for run in &aligned {
            assert!(!run.format.bold());
            assert!(run.format.color.is_none());
        }
    }

    #[tokio::test]
    async fn test_unmatched_span_contributes_nothing() {
        let source = "The bold word";
        let target = "Le mot";
        let runs = vec![default_run("The "), bold_run("bold"), default_run(" word")];
        // Backend replies with text absent from the target.
        let aligner = aligner_with_mappings(source, target, vec![("bold", "gras")]);
        let cancel = CancellationToken::new();

        let aligned = aligner.align(source, &runs, target, &cancel).await.unwrap();
        assert_eq!(concat(&aligned), target);
        assert!(aligned.iter().all(|r| !r.format.bold()));
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let source = "The bold word";
        let target = "Le mot gras";
        let runs = vec![default_run("The "), bold_run("bold"), default_run(" word")];
        let backend = MockBackend::new().with_latency(Duration::from_secs(10));
        let aligner = LlmAligner::new(Arc::new(backend), "English", "French");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = aligner.align(source, &runs, target, &cancel).await;
        assert!(matches!(result, Err(DecklingError::TranslationCancelled)));
    }

    #[tokio::test]
    async fn test_consecutive_identical_runs_merged_into_one_span() {
        let format = RunFormat {
            bold: Some(true),
            color: Some(Color::Rgb("#FFC000".into())),
            ..Default::default()
        };
        let runs = vec![
            Run::new("Legislative", format.clone()),
            Run::new(" ", format.clone()),
            Run::new("Branch", format.clone()),
            default_run(" of government"),
        ];
        let aligner = LlmAligner::new(Arc::new(MockBackend::new()), "English", "French");
        let spans = aligner.formatted_spans(&runs);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Legislative Branch");
    }

    #[tokio::test]
    async fn test_non_consecutive_identical_runs_stay_separate() {
        let format = RunFormat {
            bold: Some(true),
            ..Default::default()
        };
        let runs = vec![
            Run::new("federal", format.clone()),
            default_run(" and "),
            Run::new("municipal", format.clone()),
        ];
        let aligner = LlmAligner::new(Arc::new(MockBackend::new()), "English", "French");
        let spans = aligner.formatted_spans(&runs);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "federal");
        assert_eq!(spans[1].text, "municipal");
    }

    #[test]
    fn test_find_in_target_prefers_free_word_boundary() {
        let target = "le rapport du rapporteur";
        let mut used = vec![false; target.len()];
        // Claim the first "rapport" occurrence.
        for slot in &mut used[3..10] {
            *slot = true;
        }
        // First plain occurrence is taken; the word-boundary pass finds no
        // free standalone occurrence, so the scan falls back to the prefix
        // of "rapporteur".
        let (start, end) = find_in_target("rapport", target, &used).unwrap();
        assert_eq!(&target[start..end], "rapport");
        assert_eq!(start, 14);
    }

    #[test]
    fn test_find_in_target_case_insensitive() {
        let target = "Le Sénat s'est réuni.";
        let used = vec![false; target.len()];
        let (start, end) = find_in_target("sénat", target, &used).unwrap();
        assert_eq!(&target[start..end], "Sénat");
    }

    #[test]
    fn test_find_in_target_missing() {
        let target = "rien ici";
        let used = vec![false; target.len()];
        assert!(find_in_target("absent", target, &used).is_none());
    }
}
