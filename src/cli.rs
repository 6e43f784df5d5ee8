use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate a single deck file
    Translate {
        /// Input deck file
        #[arg(short, long)]
        input: PathBuf,

        /// Output deck file
        #[arg(short, long)]
        output: PathBuf,

        /// Source language name
        #[arg(long, default_value = "English")]
        source_lang: String,

        /// Target language name
        #[arg(long, default_value = "French")]
        target_lang: String,

        /// Glossary file (.json or .csv)
        #[arg(short, long)]
        glossary: Option<PathBuf>,

        /// Run-alignment strategy (semantic or llm)
        #[arg(long)]
        strategy: Option<String>,

        /// Translation backend (ollama, openai or mock)
        #[arg(long)]
        backend: Option<String>,
    },

    /// Translate all deck files in a directory
    Batch {
        /// Input directory containing deck files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Output directory for translated decks
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Source language name
        #[arg(long, default_value = "English")]
        source_lang: String,

        /// Target language name
        #[arg(long, default_value = "French")]
        target_lang: String,

        /// Glossary file (.json or .csv)
        #[arg(short, long)]
        glossary: Option<PathBuf>,

        /// Run-alignment strategy (semantic or llm)
        #[arg(long)]
        strategy: Option<String>,

        /// Translation backend (ollama, openai or mock)
        #[arg(long)]
        backend: Option<String>,
    },

    /// Inspect a glossary file
    Glossary {
        /// Glossary file (.json or .csv)
        #[arg(short, long)]
        file: PathBuf,
    },
}
