//! Deckling - Slide-Deck Translation Workflow
//!
//! Main entry point: parses the command line, loads configuration, and
//! drives translation jobs through the job manager so the CLI exercises the
//! same submit/status/result surface a hosting service would.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use walkdir::WalkDir;

use deckling::cli::{Args, Commands};
use deckling::config::Config;
use deckling::error::DecklingError;
use deckling::glossary::Glossary;
use deckling::job::{GlossarySource, JobManager, JobOptions, JobState};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    // Load configuration: explicit path, deckling.toml in cwd, or defaults.
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => {
            if Path::new("deckling.toml").exists() {
                info!("Loading deckling.toml from current directory");
                Config::from_file("deckling.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Translate {
            input,
            output,
            source_lang,
            target_lang,
            glossary,
            strategy,
            backend,
        } => {
            let manager = JobManager::new(config);
            let options = job_options(
                source_lang,
                target_lang,
                glossary,
                strategy.as_deref(),
                backend.as_deref(),
            )?;
            translate_file(&manager, &input, &output, options).await?;
        }
        Commands::Batch {
            input_dir,
            output_dir,
            source_lang,
            target_lang,
            glossary,
            strategy,
            backend,
        } => {
            if !input_dir.is_dir() {
                return Err(DecklingError::Config("input path is not a directory".into()).into());
            }
            let output_dir = output_dir.unwrap_or_else(|| input_dir.clone());
            std::fs::create_dir_all(&output_dir)?;

            let deck_files: Vec<PathBuf> = WalkDir::new(&input_dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path()
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| ext.eq_ignore_ascii_case("deck"))
                        .unwrap_or(false)
                })
                .map(|e| e.path().to_path_buf())
                .collect();

            info!("Found {} deck files to process", deck_files.len());

            let manager = JobManager::new(config);
            for deck_path in deck_files {
                let stem = deck_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "deck".to_string());
                let output = output_dir.join(format!("{}_{}.deck", stem, target_lang));
                let options = job_options(
                    source_lang.clone(),
                    target_lang.clone(),
                    glossary.clone(),
                    strategy.as_deref(),
                    backend.as_deref(),
                )?;
                match translate_file(&manager, &deck_path, &output, options).await {
                    Ok(()) => info!("Processed {}", deck_path.display()),
                    Err(e) => warn!("Failed to process {}: {}", deck_path.display(), e),
                }
            }
        }
        Commands::Glossary { file } => {
            let glossary = Glossary::load(&file)?;
            println!("\nGlossary: {} entries", glossary.len());
            println!(
                "{:<30} {:<30} {:<10} {:<6}",
                "Source", "Target", "Priority", "Case"
            );
            println!("{}", "-".repeat(80));
            for entry in glossary.entries() {
                println!(
                    "{:<30} {:<30} {:<10} {:<6}",
                    entry.source,
                    entry.target,
                    entry.priority,
                    if entry.case_sensitive { "yes" } else { "no" }
                );
            }
        }
    }

    Ok(())
}

fn job_options(
    source_lang: String,
    target_lang: String,
    glossary: Option<PathBuf>,
    strategy: Option<&str>,
    backend: Option<&str>,
) -> Result<JobOptions> {
    Ok(JobOptions {
        source_language: Some(source_lang),
        target_language: Some(target_lang),
        glossary: glossary.map(GlossarySource::Path),
        strategy: strategy
            .map(|s| s.parse::<deckling::config::AlignStrategy>())
            .transpose()?,
        backend: backend
            .map(|s| s.parse::<deckling::config::BackendKind>())
            .transpose()?,
        workers: None,
        record_timeout_secs: None,
    })
}

/// Submit one deck and poll until the job reaches a terminal state.
async fn translate_file(
    manager: &JobManager,
    input: &Path,
    output: &Path,
    options: JobOptions,
) -> Result<()> {
    let deck_bytes = std::fs::read(input)
        .map_err(|e| DecklingError::Config(format!("cannot read {}: {}", input.display(), e)))?;

    info!("Translating {}", input.display());
    let id = manager.submit(deck_bytes, options)?;

    let mut last_milestone: Option<String> = None;
    loop {
        let status = manager.status(id)?;
        if status.milestone != last_milestone {
            if let Some(milestone) = &status.milestone {
                info!("[{:>3}%] {}", status.progress, milestone);
            }
            last_milestone = status.milestone.clone();
        }
        if status.state.is_terminal() {
            match status.state {
                JobState::Completed => {
                    if let Some(summary) = &status.summary {
                        info!("{}", summary);
                    }
                    break;
                }
                JobState::Failed => {
                    return Err(DecklingError::Job(
                        status.error.unwrap_or_else(|| "job failed".to_string()),
                    )
                    .into());
                }
                JobState::Cancelled => {
                    return Err(DecklingError::TranslationCancelled.into());
                }
                _ => unreachable!(),
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let bytes = manager.result(id)?;
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, bytes)?;
    info!("Wrote {}", output.display());
    Ok(())
}
