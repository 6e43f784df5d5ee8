//! Slide-level context aggregation. Translated paragraphs are grouped per
//! slide into a bounded source→target phrase summary; charts and tables on
//! the same slide are translated against it so terminology stays consistent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::extract::ParagraphRecord;
use crate::glossary::Glossary;

/// Bounded per-slide phrase summary used as prompt context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideContext {
    pub slide: usize,
    /// Ordered (source phrase, target phrase) pairs: each paragraph's
    /// source/target strings plus glossary hits found on the slide.
    pub pairs: Vec<(String, String)>,
    pub source_summary: String,
    pub translated_summary: String,
    pub paragraph_count: usize,
}

impl SlideContext {
    /// Render the prompt block supplied when translating non-paragraph
    /// content on this slide.
    pub fn prompt_block(&self) -> String {
        let mut lines = vec![
            "SLIDE CONTEXT (for terminology consistency):".to_string(),
            String::new(),
            "Original slide content:".to_string(),
            self.source_summary.clone(),
            String::new(),
            "Translated slide content:".to_string(),
            self.translated_summary.clone(),
            String::new(),
            "INSTRUCTIONS:".to_string(),
            "- Use the SAME terminology as shown in the translated slide content above".to_string(),
            "- Keep translations concise and appropriate for labels".to_string(),
        ];
        if !self.pairs.is_empty() {
            lines.push(String::new());
            lines.push("Known phrase translations:".to_string());
            for (source, target) in &self.pairs {
                lines.push(format!("- \"{}\" → \"{}\"", source, target));
            }
        }
        lines.join("\n")
    }
}

pub struct SlideContextBuilder {
    max_chars: usize,
}

impl SlideContextBuilder {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Group aligned paragraphs per slide and build one context per slide,
    /// in slide order.
    pub fn build(
        &self,
        paragraphs: &[ParagraphRecord],
        glossary: Option<&Glossary>,
    ) -> Vec<SlideContext> {
        let mut slides: BTreeMap<usize, Vec<&ParagraphRecord>> = BTreeMap::new();
        for record in paragraphs {
            if record.target_text.is_some() {
                slides.entry(record.slide).or_default().push(record);
            }
        }

        let contexts: Vec<SlideContext> = slides
            .into_iter()
            .map(|(slide, records)| self.build_slide(slide, &records, glossary))
            .collect();

        info!("Built context for {} slides", contexts.len());
        contexts
    }

    fn build_slide(
        &self,
        slide: usize,
        records: &[&ParagraphRecord],
        glossary: Option<&Glossary>,
    ) -> SlideContext {
        let mut pairs: Vec<(String, String)> = Vec::new();
        let mut source_parts: Vec<&str> = Vec::new();
        let mut target_parts: Vec<&str> = Vec::new();

        for record in records {
            if let Some(target) = &record.target_text {
                pairs.push((record.text.clone(), target.clone()));
                source_parts.push(&record.text);
                target_parts.push(target);
            }
        }

        let source_full = source_parts.join(" ");
        let translated_full = target_parts.join(" ");

        // Glossary hits on this slide are high-confidence pairs of their own.
        if let Some(glossary) = glossary {
            for hit in glossary.lookup_matches(&source_full, None) {
                let pair = (hit.entry.source.clone(), hit.entry.target.clone());
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }

        let context = SlideContext {
            slide,
            pairs,
            source_summary: truncate_at_sentence(&source_full, self.max_chars),
            translated_summary: truncate_at_sentence(&translated_full, self.max_chars),
            paragraph_count: records.len(),
        };

        debug!(
            "Slide {}: {} paragraphs, {} chars source, {} chars translated",
            slide,
            context.paragraph_count,
            source_full.len(),
            translated_full.len()
        );
        context
    }
}

/// Truncate to the budget, preferring a sentence boundary past 70% of it.
fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let truncated = &text[..cut];

    let floor = (max_chars * 7) / 10;
    for delimiter in [". ", "! ", "? "] {
        if let Some(idx) = truncated.rfind(delimiter) {
            let chars_kept = text[..idx + 1].chars().count();
            if chars_kept > floor {
                return text[..idx + 1].to_string();
            }
        }
    }

    format!("{}...", truncated.trim_end())
}
