//! In-memory model of a slide deck.
//!
//! The deck binary format itself is handled by the container adapter at the
//! edge of the crate; everything inside works on this tree of slides, shapes,
//! paragraphs and runs. `None` on any formatting field means "inherit from
//! paragraph/shape/theme" and must survive a round trip untouched.

use serde::{Deserialize, Serialize};

use crate::error::{DecklingError, Result};

/// Run colour: explicit RGB or a reference into the deck theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// Hex string like `#FF0000`.
    Rgb(String),
    /// Theme slot name like `ACCENT_1` or `BACKGROUND_1`.
    Theme(String),
}

impl Color {
    /// Theme background slots behave as "inherit", never as a special colour.
    pub fn is_theme_background(&self) -> bool {
        matches!(self, Color::Theme(name) if name.starts_with("BACKGROUND"))
    }
}

/// Character-level formatting for a run. All fields optional; `None` is the
/// inherit sentinel restored verbatim by the writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFormat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superscript: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscript: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyperlink: Option<String>,
}

impl RunFormat {
    pub fn bold(&self) -> bool {
        self.bold.unwrap_or(false)
    }

    pub fn italic(&self) -> bool {
        self.italic.unwrap_or(false)
    }

    pub fn underline(&self) -> bool {
        self.underline.unwrap_or(false)
    }

    pub fn superscript(&self) -> bool {
        self.superscript.unwrap_or(false)
    }

    pub fn subscript(&self) -> bool {
        self.subscript.unwrap_or(false)
    }
}

/// Smallest unit of styled text inside a paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    #[serde(default)]
    pub format: RunFormat,
}

impl Run {
    pub fn new(text: impl Into<String>, format: RunFormat) -> Self {
        Self {
            text: text.into(),
            format,
        }
    }

    pub fn is_whitespace(&self) -> bool {
        self.text.chars().all(char::is_whitespace)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParagraphAlignment {
    #[default]
    Left,
    Center,
    Right,
    Justify,
    Distribute,
}

/// Ordered list of runs plus paragraph-level attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub runs: Vec<Run>,
    #[serde(default)]
    pub alignment: ParagraphAlignment,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub is_bullet: bool,
}

impl Paragraph {
    /// Full paragraph text; runs concatenate exactly to it.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// A single table cell. Non-anchor cells of a merged range carry the anchor
/// coordinates and are skipped by extraction and writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    pub row: usize,
    pub col: usize,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<TableCell>,
}

/// Identity of a chart label within its chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartLabelKind {
    Title,
    CategoryAxisTitle,
    ValueAxisTitle,
    LegendEntry { series: usize },
    SeriesName { series: usize },
    CategoryLabel { index: usize },
    DataLabel { series: usize, point: usize },
}

impl ChartLabelKind {
    /// Data labels are carried through the pipeline but never translated;
    /// they are usually numeric ("25%").
    pub fn is_translatable(&self) -> bool {
        !matches!(self, ChartLabelKind::DataLabel { .. })
    }
}

/// One styled string on a chart. Formatting applies to the whole label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartLabel {
    pub kind: ChartLabelKind,
    pub text: String,
    #[serde(default)]
    pub format: RunFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub chart_type: String,
    pub labels: Vec<ChartLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeContent {
    TextBody { paragraphs: Vec<Paragraph> },
    Table(Table),
    Chart(Chart),
    /// Pictures, media, anything without translatable text.
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub content: ShapeContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    pub shapes: Vec<Shape>,
}

/// A whole deck, as yielded by the container adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub slides: Vec<Slide>,
}

impl Deck {
    /// Open a deck container. Fails with `DeckMalformed` only when the
    /// container itself cannot be parsed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| DecklingError::DeckMalformed(format!("cannot open container: {}", e)))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
