//! Content extraction: walk the deck tree and emit normalized records for
//! paragraphs, table cells and chart labels, each carrying identity
//! coordinates so the writer can route updates back.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::deck::{
    ChartLabel, Deck, Paragraph, ParagraphAlignment, Run, ShapeContent,
};

/// Run-count summary attached to a record once its runs are realigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub source_runs: usize,
    pub aligned_runs: usize,
}

/// One paragraph from a text body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParagraphRecord {
    pub slide: usize,
    pub shape: usize,
    pub paragraph: usize,
    pub text: String,
    pub alignment: ParagraphAlignment,
    pub level: u8,
    pub is_bullet: bool,
    pub runs: Vec<Run>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aligned_runs: Option<Vec<Run>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align_summary: Option<AlignmentSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ParagraphRecord {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One paragraph inside a table cell, same payload as a free paragraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellParagraph {
    pub paragraph: usize,
    pub text: String,
    pub runs: Vec<Run>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aligned_runs: Option<Vec<Run>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align_summary: Option<AlignmentSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// One table cell with its paragraphs. Non-anchor cells of merged ranges
/// are not extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRecord {
    pub slide: usize,
    pub shape: usize,
    pub row: usize,
    pub col: usize,
    pub paragraphs: Vec<CellParagraph>,
}

/// One chart label. Formatting applies to the whole label, so there is no
/// run alignment payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartLabelRecord {
    pub slide: usize,
    pub shape: usize,
    pub label: ChartLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Self-describing artifact line: any record, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Paragraph(ParagraphRecord),
    Cell(CellRecord),
    ChartLabel(ChartLabelRecord),
}

/// The three ordered record streams produced by extraction.
#[derive(Debug, Default)]
pub struct ExtractedContent {
    pub paragraphs: Vec<ParagraphRecord>,
    pub cells: Vec<CellRecord>,
    pub chart_labels: Vec<ChartLabelRecord>,
}

impl ExtractedContent {
    /// All records as tagged artifact lines, paragraphs first, then cells,
    /// then chart labels.
    pub fn records(&self) -> Vec<Record> {
        let mut records: Vec<Record> = Vec::new();
        records.extend(self.paragraphs.iter().cloned().map(Record::Paragraph));
        records.extend(self.cells.iter().cloned().map(Record::Cell));
        records.extend(self.chart_labels.iter().cloned().map(Record::ChartLabel));
        records
    }
}

pub struct ContentExtractor;

impl ContentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Walk the deck in container order. Formatting is captured verbatim;
    /// absent attributes stay `None` so the writer restores the inherit
    /// sentinels exactly.
    pub fn extract(&self, deck: &Deck) -> ExtractedContent {
        let mut content = ExtractedContent::default();

        for (slide_index, slide) in deck.slides.iter().enumerate() {
            for (shape_index, shape) in slide.shapes.iter().enumerate() {
                match &shape.content {
                    ShapeContent::TextBody { paragraphs } => {
                        self.extract_paragraphs(
                            slide_index,
                            shape_index,
                            paragraphs,
                            &mut content,
                        );
                    }
                    ShapeContent::Table(table) => {
                        for cell in &table.cells {
                            if let Some(anchor) = cell.merged_into {
                                debug!(
                                    "Skipping merged cell ({}, {}) covered by anchor {:?}",
                                    cell.row, cell.col, anchor
                                );
                                continue;
                            }
                            let paragraphs: Vec<CellParagraph> = cell
                                .paragraphs
                                .iter()
                                .enumerate()
                                .map(|(index, paragraph)| CellParagraph {
                                    paragraph: index,
                                    text: paragraph.text(),
                                    runs: paragraph.runs.clone(),
                                    target_text: None,
                                    aligned_runs: None,
                                    align_summary: None,
                                    failure: None,
                                })
                                .collect();
                            content.cells.push(CellRecord {
                                slide: slide_index,
                                shape: shape_index,
                                row: cell.row,
                                col: cell.col,
                                paragraphs,
                            });
                        }
                    }
                    ShapeContent::Chart(chart) => {
                        for label in &chart.labels {
                            if label.text.trim().is_empty() {
                                continue;
                            }
                            content.chart_labels.push(ChartLabelRecord {
                                slide: slide_index,
                                shape: shape_index,
                                label: label.clone(),
                                target_text: None,
                                failure: None,
                            });
                        }
                    }
                    ShapeContent::Other => {
                        warn!(
                            "Skipping unreadable shape {} on slide {}",
                            shape_index, slide_index
                        );
                    }
                }
            }
        }

        info!(
            "Extracted {} paragraphs, {} cells, {} chart labels",
            content.paragraphs.len(),
            content.cells.len(),
            content.chart_labels.len()
        );
        content
    }

    fn extract_paragraphs(
        &self,
        slide: usize,
        shape: usize,
        paragraphs: &[Paragraph],
        content: &mut ExtractedContent,
    ) {
        for (paragraph_index, paragraph) in paragraphs.iter().enumerate() {
            // Empty paragraphs are emitted as-is and pass through unchanged.
            content.paragraphs.push(ParagraphRecord {
                slide,
                shape,
                paragraph: paragraph_index,
                text: paragraph.text(),
                alignment: paragraph.alignment,
                level: paragraph.level,
                is_bullet: paragraph.is_bullet,
                runs: paragraph.runs.clone(),
                target_text: None,
                aligned_runs: None,
                align_summary: None,
                failure: None,
            });
        }
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new()
    }
}
