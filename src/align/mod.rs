// Run alignment: redistribute source character formatting onto translated
// text. Two sibling strategies satisfy the same contract:
// - Semantic: multilingual embedding alignment over n-gram candidates
// - Llm: ask the translation backend to locate each formatted span
//
// Whichever strategy runs, the emitted runs concatenate byte-for-byte to the
// target text, every target character is covered exactly once, and no
// formatting is invented. Alignment never fails a paragraph; the worst case
// is a single run carrying the paragraph base format.

pub mod common;
pub mod llm;
pub mod semantic;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use llm::LlmAligner;
pub use semantic::{Embedder, OllamaEmbedder, SemanticAligner};

use crate::config::{AlignConfig, AlignStrategy};
use crate::deck::Run;
use crate::error::Result;
use crate::glossary::Glossary;
use crate::translate::TranslateBackend;

/// Shared contract for both strategies. The only error that escapes is
/// cancellation; any other trouble degrades to a base-format result.
#[async_trait]
pub trait RunAligner: Send + Sync {
    async fn align(
        &self,
        source_text: &str,
        source_runs: &[Run],
        target_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Run>>;
}

/// Build the aligner selected for this job. The LLM strategy reuses the
/// job's translation backend; a second backend is never constructed.
pub fn create_aligner(
    strategy: AlignStrategy,
    config: &AlignConfig,
    backend: Arc<dyn TranslateBackend>,
    embedder: Option<Arc<dyn Embedder>>,
    glossary: Option<&Glossary>,
    source_language: &str,
    target_language: &str,
) -> Arc<dyn RunAligner> {
    match strategy {
        AlignStrategy::Semantic => {
            let embedder =
                embedder.unwrap_or_else(|| Arc::new(OllamaEmbedder::from_config(config)));
            Arc::new(SemanticAligner::new(config, embedder, glossary))
        }
        AlignStrategy::Llm => Arc::new(LlmAligner::new(
            backend,
            source_language,
            target_language,
        )),
    }
}
