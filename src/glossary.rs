//! Terminology glossary for consistent translation.
//!
//! Entries map source terms to required target terms, optionally scoped by a
//! context tag. The table is compiled (priority desc, then source length
//! desc) so overlapping terms resolve deterministically, then consulted three
//! ways: prompt fragments for the translator, phrase pairs for the aligner,
//! and compliance verification after translation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{DecklingError, Result};

const MAX_PROMPT_ENTRIES: usize = 50;
const HIGH_PRIORITY: i32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Deserialize)]
struct GlossaryFile {
    entries: Vec<GlossaryEntry>,
}

/// A term occurrence found in a piece of source text.
#[derive(Debug, Clone)]
pub struct GlossaryHit<'a> {
    pub entry: &'a GlossaryEntry,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct GlossaryViolation {
    pub source_term: String,
    pub expected_target: String,
}

#[derive(Debug, Clone)]
pub struct GlossaryReport {
    pub compliant: bool,
    pub violations: Vec<GlossaryViolation>,
    pub correct: usize,
    pub total_terms: usize,
}

#[derive(Debug)]
pub struct Glossary {
    entries: Vec<GlossaryEntry>,
    patterns: Vec<Regex>,
}

impl Glossary {
    /// Build and compile a glossary from entries.
    pub fn from_entries(entries: Vec<GlossaryEntry>) -> Result<Self> {
        let mut glossary = Self {
            entries,
            patterns: Vec::new(),
        };
        glossary.compile()?;
        Ok(glossary)
    }

    /// Bundled sample glossary for Canadian-government decks, handy for
    /// demos and tests.
    pub fn sample() -> Self {
        let entry = |source: &str, target: &str, priority: i32| GlossaryEntry {
            source: source.to_string(),
            target: target.to_string(),
            context: None,
            case_sensitive: false,
            notes: None,
            priority,
        };

        Self::from_entries(vec![
            GlossaryEntry {
                case_sensitive: true,
                notes: Some("Canadian Senate (upper house)".to_string()),
                ..entry("Senate", "Sénat", 10)
            },
            entry("House of Commons", "Chambre des communes", 10),
            GlossaryEntry {
                case_sensitive: true,
                ..entry("Parliament", "Parlement", 10)
            },
            entry("federal government", "gouvernement fédéral", 8),
            entry("provincial government", "gouvernement provincial", 8),
            entry("municipal government", "gouvernement municipal", 8),
            entry("invisible disability", "handicap invisible", 9),
            GlossaryEntry {
                context: Some("disability".to_string()),
                notes: Some("In disability context, not housing".to_string()),
                ..entry("accommodation", "mesure d'adaptation", 9)
            },
            entry("accommodation request", "demande de mesure d'adaptation", 9),
            entry("assessment", "évaluation", 5),
            entry("wait time", "temps d'attente", 5),
            entry("implementation", "mise en œuvre", 5),
            entry("employee", "employé", 3),
            entry("employer", "employeur", 3),
            entry("manager", "gestionnaire", 3),
            entry("workplace", "milieu de travail", 3),
        ])
        .expect("sample glossary entries are valid")
    }

    /// Load from a file, dispatching on extension (.json or .csv).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Self::load_from_csv(path),
            _ => Self::load_from_json(path),
        }
    }

    /// Load from a JSON file shaped `{ "entries": [...] }`. Unknown keys
    /// are ignored.
    pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DecklingError::Glossary(format!("cannot read {}: {}", path.display(), e)))?;
        let file: GlossaryFile = serde_json::from_str(&content)
            .map_err(|e| DecklingError::Glossary(format!("malformed {}: {}", path.display(), e)))?;

        info!(
            "Loaded {} glossary entries from {}",
            file.entries.len(),
            path.display()
        );
        Self::from_entries(file.entries)
    }

    /// Load from a CSV file with a header row carrying at least
    /// `source,target`; extra columns are ignored.
    pub fn load_from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DecklingError::Glossary(format!("cannot read {}: {}", path.display(), e)))?;

        let mut lines = content.lines();
        let header = lines
            .next()
            .ok_or_else(|| DecklingError::Glossary(format!("{} is empty", path.display())))?;
        let columns: Vec<String> = parse_csv_line(header)
            .iter()
            .map(|c| c.trim().to_lowercase())
            .collect();

        let col = |name: &str| columns.iter().position(|c| c.as_str() == name);
        let source_col = col("source").ok_or_else(|| {
            DecklingError::Glossary(format!("{} has no 'source' column", path.display()))
        })?;
        let target_col = col("target").ok_or_else(|| {
            DecklingError::Glossary(format!("{} has no 'target' column", path.display()))
        })?;
        let context_col = col("context");
        let case_col = col("case_sensitive");
        let notes_col = col("notes");
        let priority_col = col("priority");

        let field = |row: &[String], idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| row.get(i))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let mut entries = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let row = parse_csv_line(line);
            let source = match row.get(source_col) {
                Some(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => continue,
            };
            let target = match row.get(target_col) {
                Some(t) if !t.trim().is_empty() => t.trim().to_string(),
                _ => continue,
            };
            entries.push(GlossaryEntry {
                source,
                target,
                context: field(&row, context_col),
                case_sensitive: field(&row, case_col)
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
                notes: field(&row, notes_col),
                priority: field(&row, priority_col)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            });
        }

        info!(
            "Loaded {} glossary entries from {}",
            entries.len(),
            path.display()
        );
        Self::from_entries(entries)
    }

    /// Sort by (priority desc, source length desc) so longer and more
    /// important terms claim positions first, and build the match patterns.
    fn compile(&mut self) -> Result<()> {
        self.entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.source.chars().count().cmp(&a.source.chars().count()))
        });

        self.patterns.clear();
        for entry in &self.entries {
            let escaped = regex::escape(&entry.source);
            let pattern = if entry.case_sensitive {
                format!(r"\b{}\b", escaped)
            } else {
                format!(r"(?i)\b{}\b", escaped)
            };
            let regex = Regex::new(&pattern).map_err(|e| {
                DecklingError::Glossary(format!("bad term '{}': {}", entry.source, e))
            })?;
            self.patterns.push(regex);
        }

        debug!("Compiled glossary with {} entries", self.entries.len());
        Ok(())
    }

    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Non-overlapping term occurrences in `text`, in order of appearance.
    /// Overlaps resolve in compiled order, so priority then length wins.
    pub fn lookup_matches<'a>(&'a self, text: &str, context: Option<&str>) -> Vec<GlossaryHit<'a>> {
        let mut hits: Vec<GlossaryHit> = Vec::new();
        let mut used = vec![false; text.len()];

        for (entry, pattern) in self.entries.iter().zip(&self.patterns) {
            if let (Some(required), Some(given)) = (&entry.context, context) {
                if !given.to_lowercase().contains(&required.to_lowercase()) {
                    continue;
                }
            }

            for m in pattern.find_iter(text) {
                if used[m.start()..m.end()].iter().any(|&taken| taken) {
                    continue;
                }
                for slot in &mut used[m.start()..m.end()] {
                    *slot = true;
                }
                hits.push(GlossaryHit {
                    entry,
                    start: m.start(),
                    end: m.end(),
                });
            }
        }

        hits.sort_by_key(|h| h.start);
        hits
    }

    /// Compact prompt hint listing the required translations for terms that
    /// appear in `text`, plus high-priority terms regardless.
    pub fn prompt_fragment(&self, text: &str, context: Option<&str>) -> String {
        let hits = self.lookup_matches(text, context);
        let mut selected: Vec<&GlossaryEntry> = Vec::new();
        for hit in &hits {
            if !selected
                .iter()
                .any(|e| std::ptr::eq(*e, hit.entry))
            {
                selected.push(hit.entry);
            }
        }
        for entry in &self.entries {
            if entry.priority >= HIGH_PRIORITY
                && !selected.iter().any(|e| std::ptr::eq(*e, entry))
            {
                selected.push(entry);
            }
        }
        selected.truncate(MAX_PROMPT_ENTRIES);

        if selected.is_empty() {
            return String::new();
        }

        let mut lines = vec![
            "TERMINOLOGY GLOSSARY (use these exact translations):".to_string(),
            String::new(),
        ];
        for entry in selected {
            let mut line = format!("- \"{}\" → \"{}\"", entry.source, entry.target);
            if let Some(ctx) = &entry.context {
                line.push_str(&format!(" (context: {})", ctx));
            }
            if let Some(notes) = &entry.notes {
                line.push_str(&format!(" // {}", notes));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// Lower-cased source → target list map; the semantic aligner scores
    /// these as high-confidence phrase equivalents.
    pub fn phrase_pairs(&self) -> HashMap<String, Vec<String>> {
        let mut pairs: HashMap<String, Vec<String>> = HashMap::new();
        for entry in &self.entries {
            let source = entry.source.to_lowercase();
            let target = entry.target.to_lowercase();
            let targets = pairs.entry(source).or_default();
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        pairs
    }

    /// Check that every matched source term has its required target in the
    /// translation (case-folded unless the entry is case-sensitive).
    pub fn verify(
        &self,
        source_text: &str,
        translated_text: &str,
        context: Option<&str>,
    ) -> GlossaryReport {
        let hits = self.lookup_matches(source_text, context);
        let translated_lower = translated_text.to_lowercase();

        let mut violations = Vec::new();
        let mut correct = 0;
        for hit in &hits {
            let found = if hit.entry.case_sensitive {
                translated_text.contains(&hit.entry.target)
            } else {
                translated_lower.contains(&hit.entry.target.to_lowercase())
            };
            if found {
                correct += 1;
            } else {
                violations.push(GlossaryViolation {
                    source_term: source_text[hit.start..hit.end].to_string(),
                    expected_target: hit.entry.target.clone(),
                });
            }
        }

        GlossaryReport {
            compliant: violations.is_empty(),
            violations,
            correct,
            total_terms: hits.len(),
        }
    }
}

/// Minimal CSV field splitting with double-quote support.
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, target: &str, priority: i32) -> GlossaryEntry {
        GlossaryEntry {
            source: source.to_string(),
            target: target.to_string(),
            context: None,
            case_sensitive: false,
            notes: None,
            priority,
        }
    }

    fn fixture() -> Glossary {
        Glossary::from_entries(vec![
            GlossaryEntry {
                case_sensitive: true,
                ..entry("Senate", "Sénat", 10)
            },
            entry("invisible disability", "handicap invisible", 9),
            entry("accommodation", "mesure d'adaptation", 8),
            entry("disability", "handicap", 2),
        ])
        .unwrap()
    }

    #[test]
    fn test_longer_term_wins_overlap() {
        let glossary = fixture();
        let hits = glossary.lookup_matches("an invisible disability claim", None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.source, "invisible disability");
    }

    #[test]
    fn test_word_boundaries() {
        let glossary = fixture();
        // "Senator" must not match the term "Senate".
        let hits = glossary.lookup_matches("The Senator spoke.", None);
        assert!(hits.is_empty());
        let hits = glossary.lookup_matches("The Senate convened.", None);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_case_sensitive_flag() {
        let glossary = fixture();
        assert!(glossary.lookup_matches("the senate floor", None).is_empty());
        assert_eq!(
            glossary
                .lookup_matches("the Accommodation request", None)
                .len(),
            1
        );
    }

    #[test]
    fn test_context_tag_gates_entry() {
        let glossary = Glossary::from_entries(vec![GlossaryEntry {
            context: Some("disability".to_string()),
            ..entry("accommodation", "mesure d'adaptation", 5)
        }])
        .unwrap();
        assert!(glossary
            .lookup_matches("hotel accommodation", Some("travel booking"))
            .is_empty());
        assert_eq!(
            glossary
                .lookup_matches("request accommodation", Some("disability support"))
                .len(),
            1
        );
        // No context supplied at lookup: the entry still applies.
        assert_eq!(
            glossary.lookup_matches("request accommodation", None).len(),
            1
        );
    }

    #[test]
    fn test_matches_ordered_by_appearance() {
        let glossary = fixture();
        let hits = glossary.lookup_matches(
            "The Senate discussed the invisible disability policy.",
            None,
        );
        assert_eq!(hits.len(), 2);
        assert!(hits[0].start < hits[1].start);
        assert_eq!(hits[0].entry.source, "Senate");
    }

    #[test]
    fn test_prompt_fragment_lists_matches_and_high_priority() {
        let glossary = fixture();
        let fragment = glossary.prompt_fragment("An invisible disability.", None);
        assert!(fragment.contains("handicap invisible"));
        // Priority 10 entry included even though absent from the text.
        assert!(fragment.contains("Sénat"));
        assert!(!fragment.contains("mesure d'adaptation"));
    }

    #[test]
    fn test_prompt_fragment_empty_when_no_terms() {
        let glossary = Glossary::from_entries(vec![entry("widget", "bidule", 0)]).unwrap();
        assert!(glossary.prompt_fragment("nothing relevant", None).is_empty());
    }

    #[test]
    fn test_phrase_pairs_lowercased() {
        let glossary = fixture();
        let pairs = glossary.phrase_pairs();
        assert_eq!(pairs["senate"], vec!["sénat".to_string()]);
        assert_eq!(
            pairs["invisible disability"],
            vec!["handicap invisible".to_string()]
        );
    }

    #[test]
    fn test_verify_compliant_and_violating() {
        let glossary = fixture();
        let source = "Employees with an invisible disability may ask the Senate.";
        let good = "Les employés ayant un handicap invisible peuvent demander au Sénat.";
        let bad = "Les employés avec une incapacité peuvent demander au Senate.";

        let report = glossary.verify(source, good, None);
        assert!(report.compliant);
        assert_eq!(report.correct, report.total_terms);

        let report = glossary.verify(source, bad, None);
        assert!(!report.compliant);
        assert_eq!(report.violations.len(), 2);
    }

    #[test]
    fn test_sample_glossary() {
        let glossary = Glossary::sample();
        assert!(!glossary.is_empty());

        // Compiled order puts the case-sensitive Senate entry ahead of the
        // lower-priority terms.
        let hits = glossary.lookup_matches(
            "Employees with an invisible disability may request accommodation from the Senate.",
            Some("disability support"),
        );
        assert!(hits.iter().any(|h| h.entry.target == "Sénat"));
        assert!(hits.iter().any(|h| h.entry.target == "handicap invisible"));
        assert!(hits.iter().any(|h| h.entry.target == "mesure d'adaptation"));

        let report = glossary.verify(
            "Employees with an invisible disability may request accommodation from the Senate.",
            "Les employés ayant un handicap invisible peuvent demander une mesure d'adaptation au Sénat.",
            Some("disability support"),
        );
        assert!(report.compliant);
    }

    #[test]
    fn test_csv_line_parsing() {
        assert_eq!(parse_csv_line("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(
            parse_csv_line(r#"one,"two, with comma","say ""hi""""#),
            vec!["one", "two, with comma", "say \"hi\""]
        );
    }

    #[test]
    fn test_load_csv() {
        let dir = std::env::temp_dir().join(format!("deckling-glossary-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("terms.csv");
        std::fs::write(
            &path,
            "source,target,context,case_sensitive,notes,priority,extra\n\
             Senate,Sénat,,true,upper house,10,ignored\n\
             wait time,temps d'attente,,,,5,\n",
        )
        .unwrap();

        let glossary = Glossary::load(&path).unwrap();
        assert_eq!(glossary.len(), 2);
        assert_eq!(glossary.entries()[0].source, "Senate");
        assert!(glossary.entries()[0].case_sensitive);
        assert_eq!(glossary.entries()[1].priority, 5);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_json_is_glossary_error() {
        let dir = std::env::temp_dir().join(format!("deckling-glossary-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Glossary::load(&path).unwrap_err();
        assert!(matches!(err, DecklingError::Glossary(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_json_keys_ignored() {
        let dir = std::env::temp_dir().join(format!("deckling-glossary-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("extra.json");
        std::fs::write(
            &path,
            r#"{"entries": [{"source": "a", "target": "b", "mystery": 42}], "version": 3}"#,
        )
        .unwrap();
        let glossary = Glossary::load(&path).unwrap();
        assert_eq!(glossary.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
