use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DecklingError, Result};

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_input_chars() -> usize {
    4000
}

fn default_max_retries() -> u32 {
    3
}

fn default_paragraph_timeout_secs() -> u64 {
    60
}

fn default_label_timeout_secs() -> u64 {
    30
}

fn default_source_language() -> String {
    "English".to_string()
}

fn default_target_language() -> String {
    "French".to_string()
}

fn default_max_phrase_len() -> usize {
    4
}

fn default_similarity_threshold() -> f32 {
    0.3
}

fn default_formatted_threshold() -> f32 {
    0.4
}

fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_cancel_check_every() -> usize {
    1
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_context_max_chars() -> usize {
    500
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".deckling/jobs")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub align: AlignConfig,
    #[serde(default)]
    pub jobs: JobConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
}

/// Which translation backend a job talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local model served by Ollama.
    #[default]
    Ollama,
    /// Hosted OpenAI-compatible API; key read from the environment.
    OpenAi,
    /// Deterministic in-process backend for tests and dry runs.
    Mock,
}

impl std::str::FromStr for BackendKind {
    type Err = DecklingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(BackendKind::Ollama),
            "openai" => Ok(BackendKind::OpenAi),
            "mock" => Ok(BackendKind::Mock),
            other => Err(DecklingError::Config(format!(
                "unknown backend '{}' (expected ollama, openai or mock)",
                other
            ))),
        }
    }
}

/// Run-alignment strategy. Both satisfy the same contract; selection is
/// per job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignStrategy {
    /// Multilingual embedding alignment over n-gram candidates.
    #[default]
    Semantic,
    /// Ask the translation backend to locate each formatted span.
    Llm,
}

impl std::str::FromStr for AlignStrategy {
    type Err = DecklingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "semantic" => Ok(AlignStrategy::Semantic),
            "llm" => Ok(AlignStrategy::Llm),
            other => Err(DecklingError::Config(format!(
                "unknown alignment strategy '{}' (expected semantic or llm)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend selection for new jobs; overridable per job.
    #[serde(default)]
    pub kind: BackendKind,
    /// Ollama endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model name for the local backend.
    #[serde(default = "default_model")]
    pub model: String,
    /// Model name for the hosted backend.
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    /// Inputs longer than this fail with a too-long error; the pipeline
    /// never splits sentences.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Maximum tries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-record timeout for paragraph translation.
    #[serde(default = "default_paragraph_timeout_secs")]
    pub paragraph_timeout_secs: u64,
    /// Per-record timeout for chart labels and table cells.
    #[serde(default = "default_label_timeout_secs")]
    pub label_timeout_secs: u64,
    /// Default source language name for new jobs.
    #[serde(default = "default_source_language")]
    pub source_language: String,
    /// Default target language name for new jobs.
    #[serde(default = "default_target_language")]
    pub target_language: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            endpoint: default_endpoint(),
            model: default_model(),
            openai_model: default_openai_model(),
            max_input_chars: default_max_input_chars(),
            max_retries: default_max_retries(),
            paragraph_timeout_secs: default_paragraph_timeout_secs(),
            label_timeout_secs: default_label_timeout_secs(),
            source_language: default_source_language(),
            target_language: default_target_language(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignConfig {
    #[serde(default)]
    pub strategy: AlignStrategy,
    /// Longest n-gram considered as an alignment candidate.
    #[serde(default = "default_max_phrase_len")]
    pub max_phrase_len: usize,
    /// Minimum combined score for a candidate pair to be selected.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Raised threshold for source spans carrying special formatting.
    #[serde(default = "default_formatted_threshold")]
    pub formatted_threshold: f32,
    /// Ollama endpoint serving the embedding model.
    #[serde(default = "default_endpoint")]
    pub embed_endpoint: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            strategy: AlignStrategy::default(),
            max_phrase_len: default_max_phrase_len(),
            similarity_threshold: default_similarity_threshold(),
            formatted_threshold: default_formatted_threshold(),
            embed_endpoint: default_endpoint(),
            embed_model: default_embed_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Per-job worker pool for record-level fan-out.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Check the cancellation flag every N records.
    #[serde(default = "default_cancel_check_every")]
    pub cancel_check_every: usize,
    /// Terminal jobs older than this are pruned.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Character budget for a slide context summary.
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            cancel_check_every: default_cancel_check_every(),
            retention_secs: default_retention_secs(),
            context_max_chars: default_context_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Per-job scratch directory for stage artifacts.
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
    /// Keep intermediate stage files after a job completes.
    #[serde(default = "default_true")]
    pub keep_intermediate: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            keep_intermediate: default_true(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            align: AlignConfig::default(),
            jobs: JobConfig::default(),
            artifacts: ArtifactConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DecklingError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| DecklingError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DecklingError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| DecklingError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}
