use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecklingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Deck malformed: {0}")]
    DeckMalformed(String),

    #[error("Glossary load error: {0}")]
    Glossary(String),

    #[error("Transient translation error: {0}")]
    TranslationTransient(String),

    #[error("Permanent translation error: {message}")]
    TranslationPermanent { message: String, auth: bool },

    #[error("Translation cancelled")]
    TranslationCancelled,

    #[error("Input too long for backend: {length} chars (limit {limit})")]
    TranslationTooLong { length: usize, limit: usize },

    #[error("Aligner produced no runs for a non-empty target")]
    AlignmentDegenerate,

    #[error("Writer IO error: {0}")]
    WriterIo(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("Job error: {0}")]
    Job(String),
}

impl DecklingError {
    /// Record-level errors in this class are retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, DecklingError::TranslationTransient(_))
    }

    /// Only these kinds drive a job to `failed`; everything else is
    /// attached to the record and the record passes through.
    pub fn is_fatal(&self) -> bool {
        match self {
            DecklingError::DeckMalformed(_) | DecklingError::WriterIo(_) => true,
            DecklingError::TranslationPermanent { auth, .. } => *auth,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DecklingError>;
