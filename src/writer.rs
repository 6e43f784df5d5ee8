//! Merger/writer: route translated records back onto a copy of the deck.
//!
//! Records are keyed by identity coordinates. Paragraphs get their runs
//! replaced by the aligner's output, chart labels get their text swapped
//! with formatting preserved, and everything untouched stays byte-identical.
//! The input deck is never modified.

use std::path::Path;
use tracing::{info, warn};

use crate::deck::{Deck, Paragraph, Run, ShapeContent};
use crate::error::{DecklingError, Result};
use crate::extract::{CellRecord, ChartLabelRecord, ParagraphRecord};

pub struct DeckWriter;

#[derive(Debug, Default, Clone, Copy)]
pub struct WriteCounts {
    pub paragraphs: usize,
    pub cells: usize,
    pub chart_labels: usize,
}

impl DeckWriter {
    pub fn new() -> Self {
        Self
    }

    /// Produce a new deck with all translated records applied.
    pub fn apply(
        &self,
        deck: &Deck,
        paragraphs: &[ParagraphRecord],
        cells: &[CellRecord],
        chart_labels: &[ChartLabelRecord],
    ) -> (Deck, WriteCounts) {
        let mut output = deck.clone();
        let mut counts = WriteCounts::default();

        for record in paragraphs {
            if self.apply_paragraph(&mut output, record) {
                counts.paragraphs += 1;
            }
        }
        for record in cells {
            if self.apply_cell(&mut output, record) {
                counts.cells += 1;
            }
        }
        for record in chart_labels {
            if self.apply_chart_label(&mut output, record) {
                counts.chart_labels += 1;
            }
        }

        info!(
            "Applied {} paragraphs, {} cells, {} chart labels",
            counts.paragraphs, counts.cells, counts.chart_labels
        );
        (output, counts)
    }

    /// Serialize and write the output container. Failure here is fatal.
    pub fn write<P: AsRef<Path>>(&self, deck: &Deck, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = deck
            .to_bytes()
            .map_err(|e| DecklingError::WriterIo(format!("serialize failed: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DecklingError::WriterIo(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        std::fs::write(path, bytes)
            .map_err(|e| DecklingError::WriterIo(format!("cannot write {}: {}", path.display(), e)))?;

        info!("Wrote translated deck to {}", path.display());
        Ok(())
    }

    fn paragraph_at<'a>(
        deck: &'a mut Deck,
        slide: usize,
        shape: usize,
    ) -> Option<&'a mut ShapeContent> {
        deck.slides
            .get_mut(slide)
            .and_then(|s| s.shapes.get_mut(shape))
            .map(|s| &mut s.content)
    }

    fn apply_paragraph(&self, deck: &mut Deck, record: &ParagraphRecord) -> bool {
        let Some(aligned) = &record.aligned_runs else {
            return false;
        };

        match Self::paragraph_at(deck, record.slide, record.shape) {
            Some(ShapeContent::TextBody { paragraphs }) => {
                match paragraphs.get_mut(record.paragraph) {
                    Some(paragraph) => {
                        replace_runs(paragraph, aligned);
                        true
                    }
                    None => {
                        warn!(
                            "Paragraph {} out of range on slide {} shape {}",
                            record.paragraph, record.slide, record.shape
                        );
                        false
                    }
                }
            }
            _ => {
                warn!(
                    "Shape {} on slide {} is not a text body",
                    record.shape, record.slide
                );
                false
            }
        }
    }

    fn apply_cell(&self, deck: &mut Deck, record: &CellRecord) -> bool {
        match Self::paragraph_at(deck, record.slide, record.shape) {
            Some(ShapeContent::Table(table)) => {
                let Some(cell) = table
                    .cells
                    .iter_mut()
                    .find(|c| c.row == record.row && c.col == record.col)
                else {
                    warn!(
                        "Cell ({}, {}) not found on slide {} shape {}",
                        record.row, record.col, record.slide, record.shape
                    );
                    return false;
                };

                let mut updated = false;
                for paragraph_record in &record.paragraphs {
                    let Some(aligned) = &paragraph_record.aligned_runs else {
                        continue;
                    };
                    match cell.paragraphs.get_mut(paragraph_record.paragraph) {
                        Some(paragraph) => {
                            replace_runs(paragraph, aligned);
                            updated = true;
                        }
                        None => warn!(
                            "Paragraph {} out of range in cell ({}, {})",
                            paragraph_record.paragraph, record.row, record.col
                        ),
                    }
                }
                updated
            }
            _ => {
                warn!(
                    "Shape {} on slide {} is not a table",
                    record.shape, record.slide
                );
                false
            }
        }
    }

    fn apply_chart_label(&self, deck: &mut Deck, record: &ChartLabelRecord) -> bool {
        let Some(target) = &record.target_text else {
            return false;
        };

        match Self::paragraph_at(deck, record.slide, record.shape) {
            Some(ShapeContent::Chart(chart)) => {
                match chart
                    .labels
                    .iter_mut()
                    .find(|l| l.kind == record.label.kind)
                {
                    Some(label) => {
                        // Text swaps; the label's single-unit formatting stays.
                        label.text = target.clone();
                        true
                    }
                    None => {
                        warn!(
                            "Chart label {:?} not found on slide {} shape {}",
                            record.label.kind, record.slide, record.shape
                        );
                        false
                    }
                }
            }
            _ => {
                warn!(
                    "Shape {} on slide {} is not a chart",
                    record.shape, record.slide
                );
                false
            }
        }
    }
}

impl Default for DeckWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Clear existing runs and write the aligned ones. `None` formatting fields
/// in the aligned runs are the inherit sentinels and stay `None`.
fn replace_runs(paragraph: &mut Paragraph, aligned: &[Run]) {
    paragraph.runs = aligned.to_vec();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::{
        Chart, ChartLabel, ChartLabelKind, ParagraphAlignment, RunFormat, Shape, Slide, Table,
        TableCell,
    };

    fn paragraph(text: &str) -> Paragraph {
        Paragraph {
            runs: vec![Run::new(text, RunFormat::default())],
            alignment: ParagraphAlignment::Left,
            level: 0,
            is_bullet: false,
        }
    }

    fn deck() -> Deck {
        Deck {
            slides: vec![Slide {
                shapes: vec![
                    Shape {
                        content: ShapeContent::TextBody {
                            paragraphs: vec![paragraph("Hello"), paragraph("Untouched")],
                        },
                    },
                    Shape {
                        content: ShapeContent::Table(Table {
                            rows: 1,
                            cols: 1,
                            cells: vec![TableCell {
                                row: 0,
                                col: 0,
                                paragraphs: vec![paragraph("Cell")],
                                merged_into: None,
                            }],
                        }),
                    },
                    Shape {
                        content: ShapeContent::Chart(Chart {
                            chart_type: "BAR".into(),
                            labels: vec![ChartLabel {
                                kind: ChartLabelKind::Title,
                                text: "Sales".into(),
                                format: RunFormat {
                                    bold: Some(true),
                                    ..Default::default()
                                },
                            }],
                        }),
                    },
                ],
            }],
        }
    }

    fn paragraph_record(aligned: Option<Vec<Run>>) -> ParagraphRecord {
        ParagraphRecord {
            slide: 0,
            shape: 0,
            paragraph: 0,
            text: "Hello".into(),
            alignment: ParagraphAlignment::Left,
            level: 0,
            is_bullet: false,
            runs: vec![Run::new("Hello", RunFormat::default())],
            target_text: Some("Bonjour".into()),
            aligned_runs: aligned,
            align_summary: None,
            failure: None,
        }
    }

    #[test]
    fn test_paragraph_runs_replaced() {
        let writer = DeckWriter::new();
        let record = paragraph_record(Some(vec![Run::new("Bonjour", RunFormat::default())]));
        let (output, counts) = writer.apply(&deck(), &[record], &[], &[]);
        assert_eq!(counts.paragraphs, 1);

        if let ShapeContent::TextBody { paragraphs } = &output.slides[0].shapes[0].content {
            assert_eq!(paragraphs[0].text(), "Bonjour");
            // Neighbouring paragraph untouched.
            assert_eq!(paragraphs[1].text(), "Untouched");
        } else {
            panic!("expected text body");
        }
    }

    #[test]
    fn test_untranslated_record_leaves_deck_alone() {
        let writer = DeckWriter::new();
        let original = deck();
        let record = paragraph_record(None);
        let (output, counts) = writer.apply(&original, &[record], &[], &[]);
        assert_eq!(counts.paragraphs, 0);
        assert_eq!(output, original);
    }

    #[test]
    fn test_out_of_range_identity_skipped() {
        let writer = DeckWriter::new();
        let mut record = paragraph_record(Some(vec![Run::new("X", RunFormat::default())]));
        record.paragraph = 42;
        let original = deck();
        let (output, counts) = writer.apply(&original, &[record], &[], &[]);
        assert_eq!(counts.paragraphs, 0);
        assert_eq!(output, original);
    }

    #[test]
    fn test_chart_label_text_swapped_format_kept() {
        let writer = DeckWriter::new();
        let record = ChartLabelRecord {
            slide: 0,
            shape: 2,
            label: ChartLabel {
                kind: ChartLabelKind::Title,
                text: "Sales".into(),
                format: RunFormat::default(),
            },
            target_text: Some("Ventes".into()),
            failure: None,
        };
        let (output, counts) = writer.apply(&deck(), &[], &[], &[record]);
        assert_eq!(counts.chart_labels, 1);

        if let ShapeContent::Chart(chart) = &output.slides[0].shapes[2].content {
            assert_eq!(chart.labels[0].text, "Ventes");
            assert_eq!(chart.labels[0].format.bold, Some(true));
        } else {
            panic!("expected chart");
        }
    }

    #[test]
    fn test_cell_paragraph_replaced() {
        use crate::extract::CellParagraph;
        let writer = DeckWriter::new();
        let record = CellRecord {
            slide: 0,
            shape: 1,
            row: 0,
            col: 0,
            paragraphs: vec![CellParagraph {
                paragraph: 0,
                text: "Cell".into(),
                runs: vec![Run::new("Cell", RunFormat::default())],
                target_text: Some("Cellule".into()),
                aligned_runs: Some(vec![Run::new("Cellule", RunFormat::default())]),
                align_summary: None,
                failure: None,
            }],
        };
        let (output, counts) = writer.apply(&deck(), &[], &[record], &[]);
        assert_eq!(counts.cells, 1);

        if let ShapeContent::Table(table) = &output.slides[0].shapes[1].content {
            assert_eq!(table.cells[0].paragraphs[0].text(), "Cellule");
        } else {
            panic!("expected table");
        }
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let writer = DeckWriter::new();
        let dir = std::env::temp_dir().join(format!("deckling-writer-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested/out.deck");
        writer.write(&deck(), &path).unwrap();
        let reopened = Deck::from_bytes(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(reopened, deck());
        std::fs::remove_dir_all(&dir).ok();
    }
}
