//! Pipeline orchestrator: runs the nine stages of a translation job,
//! reports progress at every milestone, spills stage artifacts, and
//! cooperates with cancellation between records.
//!
//! Resource discipline: the translation backend handed in is the only one
//! for the job and is shared with LLM-based alignment; the aligner (and any
//! embedding model it holds) is dropped as soon as table-cell alignment
//! finishes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::align::RunAligner;
use crate::artifact::ArtifactStore;
use crate::config::Config;
use crate::content::ContentTranslator;
use crate::context::{SlideContext, SlideContextBuilder};
use crate::deck::Deck;
use crate::error::{DecklingError, Result};
use crate::extract::{AlignmentSummary, ContentExtractor, ParagraphRecord, Record};
use crate::glossary::Glossary;
use crate::paragraphs::ParagraphTranslator;
use crate::translate::TranslateBackend;
use crate::writer::DeckWriter;

/// The nine named progress checkpoints, in stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    ExtractParagraphs,
    TranslateParagraphs,
    AlignParagraphs,
    BuildContext,
    TranslateCharts,
    TranslateTables,
    AlignTableCells,
    Merge,
    Write,
}

impl Milestone {
    pub const ALL: [Milestone; 9] = [
        Milestone::ExtractParagraphs,
        Milestone::TranslateParagraphs,
        Milestone::AlignParagraphs,
        Milestone::BuildContext,
        Milestone::TranslateCharts,
        Milestone::TranslateTables,
        Milestone::AlignTableCells,
        Milestone::Merge,
        Milestone::Write,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Milestone::ExtractParagraphs => "extract paragraphs",
            Milestone::TranslateParagraphs => "translate paragraphs",
            Milestone::AlignParagraphs => "align paragraphs",
            Milestone::BuildContext => "build context",
            Milestone::TranslateCharts => "translate charts",
            Milestone::TranslateTables => "translate tables",
            Milestone::AlignTableCells => "align table cells",
            Milestone::Merge => "merge",
            Milestone::Write => "write",
        }
    }

    pub fn index(self) -> usize {
        Milestone::ALL.iter().position(|m| *m == self).unwrap_or(0)
    }
}

/// Progress callback: percent 0..=100 plus the current milestone.
pub type ProgressFn = Arc<dyn Fn(u8, Milestone) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub source_language: String,
    pub target_language: String,
    pub workers: usize,
    pub cancel_check_every: usize,
    pub max_retries: u32,
    pub paragraph_timeout: Duration,
    pub label_timeout: Duration,
    pub context_max_chars: usize,
    pub keep_intermediate: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_language: config.backend.source_language.clone(),
            target_language: config.backend.target_language.clone(),
            workers: config.jobs.workers.max(1),
            cancel_check_every: config.jobs.cancel_check_every.max(1),
            max_retries: config.backend.max_retries,
            paragraph_timeout: Duration::from_secs(config.backend.paragraph_timeout_secs),
            label_timeout: Duration::from_secs(config.backend.label_timeout_secs),
            context_max_chars: config.jobs.context_max_chars,
            keep_intermediate: config.artifacts.keep_intermediate,
        }
    }
}

/// Per-record issues do not fail the job; they are counted and summarized.
#[derive(Debug, Default, Clone)]
pub struct PipelineReport {
    pub paragraphs: usize,
    pub untranslated_paragraphs: usize,
    pub cells: usize,
    pub untranslated_cell_paragraphs: usize,
    pub chart_labels: usize,
    pub untranslated_labels: usize,
    pub written_paragraphs: usize,
    pub written_cells: usize,
    pub written_labels: usize,
}

impl PipelineReport {
    pub fn summary(&self) -> String {
        let mut parts = vec![format!(
            "{} paragraphs, {} cells, {} chart labels processed",
            self.paragraphs, self.cells, self.chart_labels
        )];
        if self.untranslated_paragraphs > 0 {
            parts.push(format!(
                "{} paragraphs passed through untranslated",
                self.untranslated_paragraphs
            ));
        }
        if self.untranslated_cell_paragraphs > 0 {
            parts.push(format!(
                "{} cell paragraphs passed through untranslated",
                self.untranslated_cell_paragraphs
            ));
        }
        if self.untranslated_labels > 0 {
            parts.push(format!(
                "{} chart labels passed through untranslated",
                self.untranslated_labels
            ));
        }
        parts.join("; ")
    }
}

pub struct Pipeline {
    options: PipelineOptions,
    backend: Arc<dyn TranslateBackend>,
    aligner: Option<Arc<dyn RunAligner>>,
    glossary: Option<Arc<Glossary>>,
    artifacts: ArtifactStore,
    progress: ProgressFn,
    cancel: CancellationToken,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: PipelineOptions,
        backend: Arc<dyn TranslateBackend>,
        aligner: Arc<dyn RunAligner>,
        glossary: Option<Arc<Glossary>>,
        artifacts: ArtifactStore,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            options,
            backend,
            aligner: Some(aligner),
            glossary,
            artifacts,
            progress,
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DecklingError::TranslationCancelled);
        }
        Ok(())
    }

    fn report(&self, milestone: Milestone, fraction: f32) {
        let stages = Milestone::ALL.len() as f32;
        let percent =
            ((milestone.index() as f32 + fraction.clamp(0.0, 1.0)) / stages * 100.0) as u8;
        (self.progress)(percent.min(100), milestone);
    }

    fn enter(&self, milestone: Milestone) -> Result<()> {
        self.check_cancelled()?;
        info!(
            "[{}/{}] {}",
            milestone.index() + 1,
            Milestone::ALL.len(),
            milestone.name()
        );
        self.report(milestone, 0.0);
        Ok(())
    }

    /// Run the whole job. Consumes the pipeline so per-job resources are
    /// released deterministically.
    pub async fn run(mut self, deck_bytes: &[u8], output_path: &Path) -> Result<PipelineReport> {
        let deck = Deck::from_bytes(deck_bytes)?;
        self.backend.check_availability().await?;

        let translator = ParagraphTranslator::new(
            self.backend.clone(),
            self.glossary.clone(),
            &self.options.source_language,
            &self.options.target_language,
            self.options.max_retries,
        );
        let mut report = PipelineReport::default();

        // Stage 1: extraction.
        self.enter(Milestone::ExtractParagraphs)?;
        let content = ContentExtractor::new().extract(&deck);
        self.artifacts
            .write_stage("extracted", &content.records())
            .await?;
        report.paragraphs = content.paragraphs.len();
        report.cells = content.cells.len();
        report.chart_labels = content.chart_labels.len();

        // Stage 2: paragraph translation, fanned out over the worker pool.
        self.enter(Milestone::TranslateParagraphs)?;
        let mut paragraphs = self
            .translate_paragraphs(&translator, content.paragraphs)
            .await?;
        let translated_records: Vec<Record> =
            paragraphs.iter().cloned().map(Record::Paragraph).collect();
        self.artifacts
            .write_stage("translated_paragraphs", &translated_records)
            .await?;

        // Stage 3: paragraph alignment. Each paragraph's translation is
        // complete by construction of the previous stage.
        self.enter(Milestone::AlignParagraphs)?;
        self.align_paragraphs(&mut paragraphs).await?;
        let aligned_records: Vec<Record> =
            paragraphs.iter().cloned().map(Record::Paragraph).collect();
        self.artifacts
            .write_stage("aligned_paragraphs", &aligned_records)
            .await?;
        report.untranslated_paragraphs = paragraphs
            .iter()
            .filter(|p| !p.is_empty() && p.failure.is_some())
            .count();

        // Stage 4: slide context.
        self.enter(Milestone::BuildContext)?;
        let contexts = SlideContextBuilder::new(self.options.context_max_chars)
            .build(&paragraphs, self.glossary.as_deref());
        self.artifacts.write_stage("slide_context", &contexts).await?;
        let context_by_slide: HashMap<usize, SlideContext> =
            contexts.into_iter().map(|c| (c.slide, c)).collect();

        let content_translator = ContentTranslator::new(
            translator.clone(),
            self.aligner
                .clone()
                .expect("aligner lives until table alignment"),
            self.options.label_timeout,
        );

        // Stage 5: chart labels, one string at a time with slide context.
        self.enter(Milestone::TranslateCharts)?;
        let mut chart_labels = content.chart_labels;
        let total_labels = chart_labels.len().max(1);
        for (index, record) in chart_labels.iter_mut().enumerate() {
            if index % self.options.cancel_check_every == 0 {
                self.check_cancelled()?;
            }
            let context = context_by_slide.get(&record.slide);
            content_translator
                .translate_chart_label(record, context, &self.cancel)
                .await?;
            self.report(
                Milestone::TranslateCharts,
                (index + 1) as f32 / total_labels as f32,
            );
        }
        let chart_records: Vec<Record> = chart_labels
            .iter()
            .cloned()
            .map(Record::ChartLabel)
            .collect();
        self.artifacts
            .write_stage("translated_charts", &chart_records)
            .await?;
        report.untranslated_labels = chart_labels.iter().filter(|l| l.failure.is_some()).count();

        // Stage 6: table cells.
        self.enter(Milestone::TranslateTables)?;
        let mut cells = content.cells;
        let total_cells = cells.len().max(1);
        for (index, record) in cells.iter_mut().enumerate() {
            if index % self.options.cancel_check_every == 0 {
                self.check_cancelled()?;
            }
            let context = context_by_slide.get(&record.slide);
            content_translator
                .translate_cell(record, context, &self.cancel)
                .await?;
            self.report(
                Milestone::TranslateTables,
                (index + 1) as f32 / total_cells as f32,
            );
        }
        let cell_records: Vec<Record> = cells.iter().cloned().map(Record::Cell).collect();
        self.artifacts
            .write_stage("translated_tables", &cell_records)
            .await?;

        // Stage 7: table cell alignment.
        self.enter(Milestone::AlignTableCells)?;
        for (index, record) in cells.iter_mut().enumerate() {
            if index % self.options.cancel_check_every == 0 {
                self.check_cancelled()?;
            }
            content_translator.align_cell(record, &self.cancel).await?;
            self.report(
                Milestone::AlignTableCells,
                (index + 1) as f32 / total_cells as f32,
            );
        }
        let aligned_cell_records: Vec<Record> = cells.iter().cloned().map(Record::Cell).collect();
        self.artifacts
            .write_stage("aligned_tables", &aligned_cell_records)
            .await?;
        report.untranslated_cell_paragraphs = cells
            .iter()
            .flat_map(|c| &c.paragraphs)
            .filter(|p| p.failure.is_some())
            .count();

        // The aligner (and any embedding model behind it) is no longer
        // needed; release it before the write stages.
        drop(content_translator);
        self.aligner = None;

        // Stage 8: merge all translated records.
        self.enter(Milestone::Merge)?;
        let mut merged: Vec<Record> = Vec::new();
        merged.extend(paragraphs.iter().cloned().map(Record::Paragraph));
        merged.extend(cells.iter().cloned().map(Record::Cell));
        merged.extend(chart_labels.iter().cloned().map(Record::ChartLabel));
        self.artifacts.write_stage("merged", &merged).await?;

        let writer = DeckWriter::new();
        let (output_deck, counts) = writer.apply(&deck, &paragraphs, &cells, &chart_labels);
        report.written_paragraphs = counts.paragraphs;
        report.written_cells = counts.cells;
        report.written_labels = counts.chart_labels;

        // Stage 9: write the new container. The input deck is untouched.
        self.enter(Milestone::Write)?;
        writer.write(&output_deck, output_path)?;
        self.report(Milestone::Write, 1.0);

        if !self.options.keep_intermediate {
            if let Err(e) = self.artifacts.remove().await {
                warn!("Failed to clean intermediate artifacts: {}", e);
            }
        }

        info!("Pipeline complete: {}", report.summary());
        Ok(report)
    }

    /// Fan paragraph translation out over the per-job worker pool, claiming
    /// up to `workers` records per batch, and restore container order after.
    async fn translate_paragraphs(
        &self,
        translator: &ParagraphTranslator,
        records: Vec<ParagraphRecord>,
    ) -> Result<Vec<ParagraphRecord>> {
        let total = records.len().max(1);
        let mut translated: Vec<ParagraphRecord> = Vec::with_capacity(records.len());
        let mut done = 0usize;
        let mut remaining = records.into_iter();

        loop {
            self.check_cancelled()?;
            let batch: Vec<ParagraphRecord> =
                remaining.by_ref().take(self.options.workers).collect();
            if batch.is_empty() {
                break;
            }

            let mut tasks = JoinSet::new();
            for mut record in batch {
                let translator = translator.clone();
                let cancel = self.cancel.clone();
                let timeout = self.options.paragraph_timeout;
                tasks.spawn(async move {
                    let result = translator
                        .translate_paragraph(&mut record, None, timeout, &cancel)
                        .await;
                    (record, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (record, result) = joined
                    .map_err(|e| DecklingError::Job(format!("translation task failed: {}", e)))?;
                result?;
                translated.push(record);
                done += 1;
                self.report(Milestone::TranslateParagraphs, done as f32 / total as f32);
            }
        }

        translated.sort_by_key(|r| (r.slide, r.shape, r.paragraph));
        Ok(translated)
    }

    async fn align_paragraphs(&self, paragraphs: &mut [ParagraphRecord]) -> Result<()> {
        let aligner = self
            .aligner
            .clone()
            .expect("aligner lives until table alignment");
        let total = paragraphs.len().max(1);

        for (index, record) in paragraphs.iter_mut().enumerate() {
            if index % self.options.cancel_check_every == 0 {
                self.check_cancelled()?;
            }
            if let Some(target) = record.target_text.clone() {
                let aligned = aligner
                    .align(&record.text, &record.runs, &target, &self.cancel)
                    .await?;
                record.align_summary = Some(AlignmentSummary {
                    source_runs: record.runs.len(),
                    aligned_runs: aligned.len(),
                });
                record.aligned_runs = Some(aligned);
            }
            self.report(Milestone::AlignParagraphs, (index + 1) as f32 / total as f32);
        }
        Ok(())
    }
}
