//! Machinery shared by both alignment strategies: tokenization that keeps
//! whitespace attached, span bookkeeping, base-format selection, gap filling
//! and coalescing.

use std::collections::HashMap;
use tracing::warn;

use crate::deck::{Color, Run, RunFormat};

/// Split into words with trailing whitespace attached, so joining the words
/// back in order reconstructs the text (leading whitespace excepted, which
/// span computation handles by searching from position).
pub fn tokenize_words(text: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            if let Some(last) = words.last_mut() {
                last.push(c);
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
}

/// Byte spans of each word inside `text`, located left to right.
pub fn word_spans(text: &str, words: &[String]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = 0;

    for word in words {
        match text[pos..].find(word.as_str()) {
            Some(offset) => {
                let start = pos + offset;
                spans.push((start, start + word.len()));
                pos = start + word.len();
            }
            None => {
                let stripped = word.trim();
                if let Some(offset) = (!stripped.is_empty())
                    .then(|| text[pos..].find(stripped))
                    .flatten()
                {
                    let start = pos + offset;
                    spans.push((start, start + stripped.len()));
                    pos = start + stripped.len();
                } else {
                    spans.push((pos, pos));
                }
            }
        }
    }

    spans
}

/// Byte spans of each run inside the paragraph text they concatenate to.
pub fn run_spans(runs: &[Run]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = 0;
    for run in runs {
        let end = pos + run.text.len();
        spans.push((pos, end));
        pos = end;
    }
    spans
}

/// Map each word to the first run its span overlaps.
pub fn map_words_to_runs(
    word_spans: &[(usize, usize)],
    run_spans: &[(usize, usize)],
) -> Vec<Option<usize>> {
    word_spans
        .iter()
        .map(|&(word_start, word_end)| {
            run_spans
                .iter()
                .position(|&(run_start, run_end)| word_start < run_end && word_end > run_start)
        })
        .collect()
}

/// A colour counts as special unless it is absent, a theme background slot,
/// or plain white.
pub fn is_special_color(color: &Option<Color>) -> bool {
    match color {
        None => false,
        Some(c) => match c {
            Color::Theme(_) => !c.is_theme_background(),
            Color::Rgb(hex) => !hex.eq_ignore_ascii_case("#FFFFFF"),
        },
    }
}

/// Most common explicit font across runs.
pub fn baseline_font(runs: &[Run]) -> Option<String> {
    most_common(runs.iter().filter_map(|r| r.format.font.clone()))
}

/// Most common explicit size across runs.
pub fn baseline_size(runs: &[Run]) -> Option<f32> {
    most_common(runs.iter().filter_map(|r| r.format.size.map(f32::to_bits)))
        .map(f32::from_bits)
}

fn most_common<T: std::hash::Hash + Eq + Clone>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut order: Vec<T> = Vec::new();
    for value in values {
        if !counts.contains_key(&value) {
            order.push(value.clone());
        }
        *counts.entry(value).or_insert(0) += 1;
    }
    order.into_iter().max_by_key(|v| counts[v])
}

/// Does this run differ from the paragraph baseline in any way that must be
/// carried across the translation? Whitespace-only runs never qualify; a
/// hyperlink always does.
pub fn is_formatted_run(run: &Run, baseline_font: &Option<String>, baseline_size: Option<f32>) -> bool {
    if run.is_whitespace() {
        return false;
    }
    let format = &run.format;

    let traditional = format.bold()
        || format.italic()
        || format.underline()
        || format.superscript()
        || format.subscript()
        || is_special_color(&format.color);

    let size_emphasis = matches!(
        (baseline_size, format.size),
        (Some(base), Some(size)) if (base - size).abs() > f32::EPSILON
    );
    let font_emphasis = matches!(
        (baseline_font, &format.font),
        (Some(base), Some(font)) if base != font
    );

    traditional || size_emphasis || font_emphasis || format.hyperlink.is_some()
}

/// Paragraph base format: font, size and colour taken from the longest
/// unformatted non-whitespace run; emphasis fields left as inherit.
pub fn base_format(runs: &[Run]) -> RunFormat {
    let font = baseline_font(runs);
    let size = baseline_size(runs);

    let base_run = runs
        .iter()
        .filter(|r| !r.is_whitespace())
        .filter(|r| !is_formatted_run(r, &font, size))
        .max_by_key(|r| r.text.chars().count())
        .or_else(|| runs.iter().find(|r| !r.is_whitespace()))
        .or_else(|| runs.first());

    match base_run {
        Some(run) => RunFormat {
            font: run.format.font.clone(),
            size: run.format.size,
            color: run.format.color.clone(),
            ..Default::default()
        },
        None => RunFormat::default(),
    }
}

/// Merge adjacent runs with identical formatting; drop empty runs. Merging
/// only ever joins neighbours in the character sequence.
pub fn coalesce_runs(runs: Vec<Run>) -> Vec<Run> {
    let mut merged: Vec<Run> = Vec::new();
    for run in runs {
        if run.text.is_empty() {
            continue;
        }
        match merged.last_mut() {
            Some(last) if last.format == run.format => last.text.push_str(&run.text),
            _ => merged.push(run),
        }
    }
    merged
}

/// Whether gap characters inherit from the nearest preceding matched span or
/// always take the base format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapFill {
    InheritPreceding,
    BaseFormat,
}

/// Build runs covering the whole target from matched spans, filling the
/// uncovered stretches. Spans must be sorted, in-bounds and non-overlapping.
pub fn fill_gaps(
    target: &str,
    mut matched: Vec<(usize, usize, RunFormat)>,
    base: &RunFormat,
    gap_fill: GapFill,
) -> Vec<Run> {
    matched.sort_by_key(|&(start, _, _)| start);

    let mut runs: Vec<Run> = Vec::new();
    let mut pos = 0;
    let mut preceding: Option<RunFormat> = None;

    let gap_format = |preceding: &Option<RunFormat>| match gap_fill {
        GapFill::InheritPreceding => preceding.clone().unwrap_or_else(|| base.clone()),
        GapFill::BaseFormat => base.clone(),
    };

    for (start, end, format) in matched {
        if start >= end || start < pos || end > target.len() {
            continue;
        }
        if start > pos {
            runs.push(Run::new(&target[pos..start], gap_format(&preceding)));
        }
        runs.push(Run::new(&target[start..end], format.clone()));
        preceding = Some(format);
        pos = end;
    }

    if pos < target.len() {
        runs.push(Run::new(&target[pos..], gap_format(&preceding)));
    }

    coalesce_runs(runs)
}

/// Degenerate-output guard: alignment never fails the paragraph; an empty
/// result for a non-empty target becomes a single base-format run.
pub fn guard_degenerate(target: &str, runs: Vec<Run>, base: &RunFormat) -> Vec<Run> {
    if runs.is_empty() && !target.is_empty() {
        warn!("Aligner produced no runs for a non-empty target; using base format");
        return vec![Run::new(target, base.clone())];
    }
    runs
}

/// Fast paths shared by both strategies. Returns `Some` when no real
/// alignment is needed: empty target keeps the original text, a single
/// source run formats the whole target uniformly.
pub fn trivial_alignment(source_text: &str, runs: &[Run], target_text: &str) -> Option<Vec<Run>> {
    if target_text.trim().is_empty() {
        // Translator returned nothing; preserve the original text under the
        // paragraph base format.
        return Some(vec![Run::new(source_text, base_format(runs))]);
    }
    if source_text.trim().is_empty() || runs.is_empty() {
        return Some(vec![Run::new(target_text, base_format(runs))]);
    }
    if runs.len() == 1 {
        return Some(vec![Run::new(target_text, runs[0].format.clone())]);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, format: RunFormat) -> Run {
        Run::new(text, format)
    }

    fn bold() -> RunFormat {
        RunFormat {
            bold: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_tokenize_keeps_trailing_whitespace() {
        let words = tokenize_words("Employees with an  invisible disability");
        assert_eq!(
            words,
            vec!["Employees ", "with ", "an  ", "invisible ", "disability"]
        );
        assert_eq!(words.concat(), "Employees with an  invisible disability");
    }

    #[test]
    fn test_tokenize_empty_and_whitespace_only() {
        assert!(tokenize_words("").is_empty());
        assert!(tokenize_words("   ").is_empty());
    }

    #[test]
    fn test_word_spans_cover_words() {
        let text = "Les employés suivent";
        let words = tokenize_words(text);
        let spans = word_spans(text, &words);
        assert_eq!(spans.len(), 3);
        for (word, &(start, end)) in words.iter().zip(&spans) {
            assert_eq!(&text[start..end], word);
        }
    }

    #[test]
    fn test_map_words_to_runs() {
        let runs = vec![
            run("Employees with an ", RunFormat::default()),
            run("invisible", bold()),
            run(" disability", RunFormat::default()),
        ];
        let text: String = runs.iter().map(|r| r.text.as_str()).collect();
        let words = tokenize_words(&text);
        let spans = word_spans(&text, &words);
        let mapping = map_words_to_runs(&spans, &run_spans(&runs));

        // "invisible " overlaps the bold run first.
        let invisible_idx = words.iter().position(|w| w.starts_with("invisible")).unwrap();
        assert_eq!(mapping[invisible_idx], Some(1));
        assert_eq!(mapping[0], Some(0));
        let last = words.len() - 1;
        assert_eq!(mapping[last], Some(2));
    }

    #[test]
    fn test_special_color_rules() {
        assert!(!is_special_color(&None));
        assert!(!is_special_color(&Some(Color::Theme("BACKGROUND_1".into()))));
        assert!(!is_special_color(&Some(Color::Rgb("#FFFFFF".into()))));
        assert!(!is_special_color(&Some(Color::Rgb("#ffffff".into()))));
        assert!(is_special_color(&Some(Color::Rgb("#FF0000".into()))));
        assert!(is_special_color(&Some(Color::Theme("ACCENT_1".into()))));
    }

    #[test]
    fn test_whitespace_run_never_formatted() {
        let red_space = run(
            " ",
            RunFormat {
                bold: Some(true),
                color: Some(Color::Rgb("#FF0000".into())),
                ..Default::default()
            },
        );
        assert!(!is_formatted_run(&red_space, &None, None));
    }

    #[test]
    fn test_size_and_font_emphasis() {
        let runs = vec![
            run("body text here", RunFormat {
                font: Some("Calibri".into()),
                size: Some(18.0),
                ..Default::default()
            }),
            run("big", RunFormat {
                font: Some("Calibri".into()),
                size: Some(32.0),
                ..Default::default()
            }),
            run(" more body", RunFormat {
                font: Some("Calibri".into()),
                size: Some(18.0),
                ..Default::default()
            }),
        ];
        let font = baseline_font(&runs);
        let size = baseline_size(&runs);
        assert_eq!(font.as_deref(), Some("Calibri"));
        assert_eq!(size, Some(18.0));
        assert!(!is_formatted_run(&runs[0], &font, size));
        assert!(is_formatted_run(&runs[1], &font, size));
    }

    #[test]
    fn test_hyperlink_is_always_formatted() {
        let link = run(
            "report",
            RunFormat {
                hyperlink: Some("http://x".into()),
                ..Default::default()
            },
        );
        assert!(is_formatted_run(&link, &None, None));
    }

    #[test]
    fn test_base_format_ignores_formatted_runs() {
        let runs = vec![
            run("Warning: ", RunFormat {
                font: Some("Arial".into()),
                size: Some(14.0),
                ..Default::default()
            }),
            run("danger", RunFormat {
                bold: Some(true),
                color: Some(Color::Rgb("#FF0000".into())),
                font: Some("Arial".into()),
                size: Some(14.0),
                ..Default::default()
            }),
        ];
        let base = base_format(&runs);
        assert_eq!(base.font.as_deref(), Some("Arial"));
        assert_eq!(base.size, Some(14.0));
        assert!(base.bold.is_none());
        assert!(base.hyperlink.is_none());
    }

    #[test]
    fn test_coalesce_merges_only_adjacent_identical() {
        let runs = vec![
            run("a", RunFormat::default()),
            run("b", RunFormat::default()),
            run("c", bold()),
            run("d", RunFormat::default()),
        ];
        let merged = coalesce_runs(runs);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].text, "ab");
        assert_eq!(merged[1].text, "c");
        assert_eq!(merged[2].text, "d");
    }

    #[test]
    fn test_coalesce_drops_empty_runs() {
        let runs = vec![run("", bold()), run("x", RunFormat::default())];
        let merged = coalesce_runs(runs);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "x");
    }

    #[test]
    fn test_fill_gaps_base_format() {
        let target = "Voir le rapport.";
        let link = RunFormat {
            hyperlink: Some("http://x".into()),
            ..Default::default()
        };
        let runs = fill_gaps(
            target,
            vec![(8, 15, link.clone())],
            &RunFormat::default(),
            GapFill::BaseFormat,
        );
        let text: String = runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(text, target);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[1].text, "rapport");
        assert_eq!(runs[1].format, link);
        assert_eq!(runs[2].text, ".");
        assert!(runs[2].format.hyperlink.is_none());
    }

    #[test]
    fn test_fill_gaps_inherit_preceding() {
        let target = "abc def";
        let bold_format = bold();
        let runs = fill_gaps(
            target,
            vec![(0, 3, bold_format.clone())],
            &RunFormat::default(),
            GapFill::InheritPreceding,
        );
        let text: String = runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(text, target);
        // The trailing gap inherits the preceding bold span and coalesces in.
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].format, bold_format);
    }

    #[test]
    fn test_fill_gaps_leading_gap_gets_base() {
        let target = "pre bold";
        let runs = fill_gaps(
            target,
            vec![(4, 8, bold())],
            &RunFormat::default(),
            GapFill::InheritPreceding,
        );
        assert_eq!(runs[0].text, "pre ");
        assert!(runs[0].format.bold.is_none());
    }

    #[test]
    fn test_guard_degenerate() {
        let base = RunFormat::default();
        let runs = guard_degenerate("non-empty", Vec::new(), &base);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "non-empty");

        let kept = guard_degenerate("x", vec![Run::new("x", base.clone())], &base);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_trivial_alignment_empty_target_keeps_source() {
        let runs = vec![run("Hello", RunFormat::default())];
        let out = trivial_alignment("Hello", &runs, "").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "Hello");
    }

    #[test]
    fn test_trivial_alignment_single_run() {
        let format = bold();
        let runs = vec![run("Hello", format.clone())];
        let out = trivial_alignment("Hello", &runs, "Bonjour").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "Bonjour");
        assert_eq!(out[0].format, format);
    }

    #[test]
    fn test_trivial_alignment_none_for_multi_run() {
        let runs = vec![
            run("a ", RunFormat::default()),
            run("b", bold()),
        ];
        assert!(trivial_alignment("a b", &runs, "x y").is_none());
    }
}
