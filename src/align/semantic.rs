//! Embedding-based run alignment.
//!
//! Source and target texts are broken into n-gram candidates, embedded in a
//! shared multilingual space, and greedily paired by a weighted score. The
//! formatting of each matched target span is projected from the source run
//! covering the majority of the matched source span.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::common::{
    base_format, baseline_font, baseline_size, fill_gaps, guard_degenerate, is_formatted_run,
    map_words_to_runs, run_spans, tokenize_words, trivial_alignment, word_spans, GapFill,
};
use super::RunAligner;
use crate::config::AlignConfig;
use crate::deck::{Run, RunFormat};
use crate::error::{DecklingError, Result};
use crate::glossary::Glossary;

const WEIGHT_COSINE: f32 = 0.30;
const WEIGHT_PHRASE_PAIR: f32 = 0.40;
const WEIGHT_LENGTH: f32 = 0.15;
const WEIGHT_CHAR_OVERLAP: f32 = 0.15;

/// Multilingual sentence embedding capability. One instance per job,
/// released once alignment stages finish.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embeddings served by an Ollama endpoint.
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn from_config(config: &AlignConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("HTTP client creation should not fail");

        Self {
            client,
            endpoint: config.embed_endpoint.clone(),
            model: config.embed_model.clone(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.endpoint);
        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DecklingError::TranslationTransient(format!("embedding failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DecklingError::TranslationTransient(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            DecklingError::TranslationTransient(format!("bad embedding body: {}", e))
        })?;
        Ok(parsed.embedding)
    }
}

/// An n-gram candidate with its word-index range (inclusive).
#[derive(Debug, Clone)]
struct Candidate {
    /// Stripped phrase text used for scoring.
    text: String,
    word_start: usize,
    word_end: usize,
}

pub struct SemanticAligner {
    embedder: Arc<dyn Embedder>,
    phrase_pairs: HashMap<String, Vec<String>>,
    max_phrase_len: usize,
    similarity_threshold: f32,
    formatted_threshold: f32,
}

impl SemanticAligner {
    pub fn new(config: &AlignConfig, embedder: Arc<dyn Embedder>, glossary: Option<&Glossary>) -> Self {
        Self {
            embedder,
            phrase_pairs: glossary.map(|g| g.phrase_pairs()).unwrap_or_default(),
            max_phrase_len: config.max_phrase_len,
            similarity_threshold: config.similarity_threshold,
            formatted_threshold: config.formatted_threshold,
        }
    }

    fn candidates(&self, words: &[String]) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for length in 1..=self.max_phrase_len.min(words.len()) {
            for start in 0..=(words.len() - length) {
                let end = start + length - 1;
                let text: String = words[start..=end].concat().trim().to_string();
                if text.is_empty() {
                    continue;
                }
                candidates.push(Candidate {
                    text,
                    word_start: start,
                    word_end: end,
                });
            }
        }

        candidates
    }

    /// Embed every distinct candidate phrase once.
    async fn embed_phrases(&self, candidates: &[Candidate]) -> Result<HashMap<String, Vec<f32>>> {
        let mut embeddings: HashMap<String, Vec<f32>> = HashMap::new();
        for candidate in candidates {
            if embeddings.contains_key(&candidate.text) {
                continue;
            }
            let vector = self.embedder.embed(&candidate.text).await?;
            embeddings.insert(candidate.text.clone(), vector);
        }
        Ok(embeddings)
    }

    fn phrase_pair_bonus(&self, src: &str, tgt: &str) -> f32 {
        let src_lower = src.to_lowercase();
        let tgt_lower = tgt.to_lowercase();

        if src_lower == tgt_lower {
            return 0.5;
        }
        if let Some(targets) = self.phrase_pairs.get(&src_lower) {
            if targets.iter().any(|t| t == &tgt_lower) {
                return 1.0;
            }
        }
        // Reverse direction: target phrase listed as the source of a pair
        // whose targets include the source phrase.
        if let Some(sources) = self.phrase_pairs.get(&tgt_lower) {
            if sources.iter().any(|s| s == &src_lower) {
                return 1.0;
            }
        }
        0.0
    }

    fn score(&self, src: &str, tgt: &str, cosine: f32) -> f32 {
        let pair = self.phrase_pair_bonus(src, tgt);

        let src_words = src.split_whitespace().count();
        let tgt_words = tgt.split_whitespace().count();
        let length = if src_words.max(tgt_words) > 0 {
            src_words.min(tgt_words) as f32 / src_words.max(tgt_words) as f32
        } else {
            0.0
        };

        let chars_of = |s: &str| {
            s.to_lowercase()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<std::collections::HashSet<char>>()
        };
        let src_chars = chars_of(src);
        let tgt_chars = chars_of(tgt);
        let overlap = if src_chars.is_empty() || tgt_chars.is_empty() {
            0.0
        } else {
            src_chars.intersection(&tgt_chars).count() as f32
                / src_chars.union(&tgt_chars).count() as f32
        };

        WEIGHT_COSINE * cosine
            + WEIGHT_PHRASE_PAIR * pair
            + WEIGHT_LENGTH * length
            + WEIGHT_CHAR_OVERLAP * overlap
    }

    async fn align_inner(
        &self,
        source_text: &str,
        source_runs: &[Run],
        target_text: &str,
    ) -> Result<Vec<Run>> {
        let src_words = tokenize_words(source_text);
        let tgt_words = tokenize_words(target_text);
        let src_spans = word_spans(source_text, &src_words);
        let tgt_spans = word_spans(target_text, &tgt_words);
        let source_run_spans = run_spans(source_runs);
        let word_to_run = map_words_to_runs(&src_spans, &source_run_spans);

        let src_candidates = self.candidates(&src_words);
        let tgt_candidates = self.candidates(&tgt_words);
        if src_candidates.is_empty() || tgt_candidates.is_empty() {
            return Ok(guard_degenerate(
                target_text,
                Vec::new(),
                &base_format(source_runs),
            ));
        }

        let font = baseline_font(source_runs);
        let size = baseline_size(source_runs);
        let candidate_is_formatted: Vec<bool> = src_candidates
            .iter()
            .map(|c| {
                (c.word_start..=c.word_end).any(|w| {
                    word_to_run[w]
                        .map(|run_idx| is_formatted_run(&source_runs[run_idx], &font, size))
                        .unwrap_or(false)
                })
            })
            .collect();

        let mut embeddings = self.embed_phrases(&src_candidates).await?;
        embeddings.extend(self.embed_phrases(&tgt_candidates).await?);

        // Score every pair, then greedily select non-overlapping matches.
        let mut scored: Vec<(f32, usize, usize)> = Vec::new();
        for (i, src) in src_candidates.iter().enumerate() {
            for (j, tgt) in tgt_candidates.iter().enumerate() {
                let cosine = cosine_similarity(&embeddings[&src.text], &embeddings[&tgt.text]);
                scored.push((self.score(&src.text, &tgt.text, cosine), i, j));
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut used_src = vec![false; src_words.len()];
        let mut used_tgt = vec![false; tgt_words.len()];
        let mut alignments: Vec<(usize, usize)> = Vec::new();

        for (score, src_idx, tgt_idx) in scored {
            let threshold = if candidate_is_formatted[src_idx] {
                self.formatted_threshold.max(self.similarity_threshold)
            } else {
                self.similarity_threshold
            };
            if score < threshold {
                continue;
            }

            let src = &src_candidates[src_idx];
            let tgt = &tgt_candidates[tgt_idx];
            if (src.word_start..=src.word_end).any(|w| used_src[w])
                || (tgt.word_start..=tgt.word_end).any(|w| used_tgt[w])
            {
                continue;
            }

            for w in src.word_start..=src.word_end {
                used_src[w] = true;
            }
            for w in tgt.word_start..=tgt.word_end {
                used_tgt[w] = true;
            }
            alignments.push((src_idx, tgt_idx));
        }

        debug!(
            "Selected {} phrase alignments from {}x{} candidates",
            alignments.len(),
            src_candidates.len(),
            tgt_candidates.len()
        );

        // Project formatting: each matched target span takes the format of
        // the source run covering the majority of the matched source span,
        // earlier run winning ties.
        let mut matched: Vec<(usize, usize, RunFormat)> = Vec::new();
        for (src_idx, tgt_idx) in alignments {
            let src = &src_candidates[src_idx];
            let tgt = &tgt_candidates[tgt_idx];

            let src_byte_start = src_spans[src.word_start].0;
            let src_byte_end = src_spans[src.word_end].1;
            let Some(run_idx) =
                majority_run(&source_run_spans, src_byte_start, src_byte_end)
            else {
                continue;
            };

            let tgt_byte_start = tgt_spans[tgt.word_start].0;
            let tgt_byte_end = tgt_spans[tgt.word_end].1;
            matched.push((
                tgt_byte_start,
                tgt_byte_end,
                source_runs[run_idx].format.clone(),
            ));
        }

        let base = base_format(source_runs);
        let runs = fill_gaps(target_text, matched, &base, GapFill::InheritPreceding);
        Ok(guard_degenerate(target_text, runs, &base))
    }
}

#[async_trait]
impl RunAligner for SemanticAligner {
    async fn align(
        &self,
        source_text: &str,
        source_runs: &[Run],
        target_text: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Run>> {
        if let Some(runs) = trivial_alignment(source_text, source_runs, target_text) {
            return Ok(runs);
        }

        match self.align_inner(source_text, source_runs, target_text).await {
            Ok(runs) => Ok(runs),
            Err(e) => {
                // Alignment never fails the paragraph.
                warn!("Semantic alignment degraded to base format: {}", e);
                Ok(vec![Run::new(target_text, base_format(source_runs))])
            }
        }
    }
}

/// Run covering the most bytes of the span; earlier run wins ties.
fn majority_run(run_spans: &[(usize, usize)], start: usize, end: usize) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (idx, &(run_start, run_end)) in run_spans.iter().enumerate() {
        let overlap = run_end.min(end).saturating_sub(run_start.max(start));
        if overlap == 0 {
            continue;
        }
        match best {
            Some((_, best_overlap)) if overlap <= best_overlap => {}
            _ => best = Some((idx, overlap)),
        }
    }
    best.map(|(idx, _)| idx)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
