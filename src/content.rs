//! Chart label and table cell translation against slide context.
//!
//! Labels are single styled units: translate and move on. Table cell
//! paragraphs go through the same translate-then-align path as free
//! paragraphs, including formatting redistribution.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::align::RunAligner;
use crate::context::SlideContext;
use crate::error::{DecklingError, Result};
use crate::extract::{AlignmentSummary, CellRecord, ChartLabelRecord};
use crate::paragraphs::ParagraphTranslator;

pub struct ContentTranslator {
    translator: ParagraphTranslator,
    aligner: Arc<dyn RunAligner>,
    timeout: Duration,
}

impl ContentTranslator {
    pub fn new(
        translator: ParagraphTranslator,
        aligner: Arc<dyn RunAligner>,
        timeout: Duration,
    ) -> Self {
        Self {
            translator,
            aligner,
            timeout,
        }
    }

    /// Translate one chart label with the slide context as prompt hint.
    /// No run alignment: the label is one styled unit. Data labels pass
    /// through untouched.
    pub async fn translate_chart_label(
        &self,
        record: &mut ChartLabelRecord,
        context: Option<&SlideContext>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !record.label.kind.is_translatable() || record.label.text.trim().is_empty() {
            return Ok(());
        }

        let block = context.map(|c| c.prompt_block());
        match self
            .translator
            .translate_text(&record.label.text, block.as_deref(), self.timeout, cancel)
            .await
        {
            Ok(translation) => {
                debug!("Translated chart label: {}", translation);
                record.target_text = Some(translation);
                Ok(())
            }
            Err(DecklingError::TranslationCancelled) => Err(DecklingError::TranslationCancelled),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Chart label passes through untranslated: {}", e);
                record.failure = Some(e.to_string());
                Ok(())
            }
        }
    }

    /// Translate every paragraph in a cell. Alignment happens in a later
    /// stage via [`ContentTranslator::align_cell`].
    pub async fn translate_cell(
        &self,
        record: &mut CellRecord,
        context: Option<&SlideContext>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let block = context.map(|c| c.prompt_block());

        for paragraph in &mut record.paragraphs {
            if paragraph.text.trim().is_empty() {
                continue;
            }

            match self
                .translator
                .translate_text(&paragraph.text, block.as_deref(), self.timeout, cancel)
                .await
            {
                Ok(translation) => paragraph.target_text = Some(translation),
                Err(DecklingError::TranslationCancelled) => {
                    return Err(DecklingError::TranslationCancelled)
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "Cell ({}, {}) paragraph passes through untranslated: {}",
                        record.row, record.col, e
                    );
                    paragraph.failure = Some(e.to_string());
                }
            }
        }

        Ok(())
    }

    /// Realign the runs of every translated paragraph in a cell.
    pub async fn align_cell(&self, record: &mut CellRecord, cancel: &CancellationToken) -> Result<()> {
        for paragraph in &mut record.paragraphs {
            let Some(target) = paragraph.target_text.clone() else {
                continue;
            };
            let aligned = self
                .aligner
                .align(&paragraph.text, &paragraph.runs, &target, cancel)
                .await?;
            paragraph.align_summary = Some(AlignmentSummary {
                source_runs: paragraph.runs.len(),
                aligned_runs: aligned.len(),
            });
            paragraph.aligned_runs = Some(aligned);
        }
        Ok(())
    }
}
