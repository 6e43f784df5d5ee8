//! Asynchronous job management: submit/status/cancel/result over the
//! translation pipeline. One spawned task per job, a single lock around the
//! job table, and cooperative cancellation through a token the pipeline
//! checks between records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::align::{create_aligner, Embedder};
use crate::artifact::ArtifactStore;
use crate::config::{AlignStrategy, BackendKind, Config};
use crate::error::{DecklingError, Result};
use crate::glossary::{Glossary, GlossaryEntry};
use crate::pipeline::{Milestone, Pipeline, PipelineOptions};
use crate::translate::{create_backend, TranslateBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Public view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub state: JobState,
    /// 0..=100, non-decreasing while the job runs.
    pub progress: u8,
    pub milestone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
    /// Per-record issue summary, present once the job completes.
    pub summary: Option<String>,
}

/// Where a job's glossary comes from.
#[derive(Debug, Clone)]
pub enum GlossarySource {
    Path(PathBuf),
    Inline(Vec<GlossaryEntry>),
}

/// Per-job options; anything unset falls back to configuration.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub glossary: Option<GlossarySource>,
    pub strategy: Option<AlignStrategy>,
    pub backend: Option<BackendKind>,
    pub workers: Option<usize>,
    pub record_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyTerminal,
}

struct JobEntry {
    state: JobState,
    progress: u8,
    milestone: Option<&'static str>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    error: Option<String>,
    summary: Option<String>,
    cancel: CancellationToken,
    output_path: PathBuf,
    stage_dir: PathBuf,
}

type JobTable = Arc<RwLock<HashMap<Uuid, JobEntry>>>;

pub struct JobManager {
    config: Config,
    glossary: Option<Arc<Glossary>>,
    jobs: JobTable,
    backend_override: Option<Arc<dyn TranslateBackend>>,
    embedder_override: Option<Arc<dyn Embedder>>,
}

impl JobManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            glossary: None,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            backend_override: None,
            embedder_override: None,
        }
    }

    /// Process-long default glossary, read-only after load.
    pub fn with_glossary(mut self, glossary: Glossary) -> Self {
        self.glossary = Some(Arc::new(glossary));
        self
    }

    /// Inject a backend instance instead of constructing from config.
    pub fn with_backend(mut self, backend: Arc<dyn TranslateBackend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    /// Inject an embedder for the semantic aligner.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder_override = Some(embedder);
        self
    }

    /// Default glossary entries, for inspection.
    pub fn glossary_entries(&self) -> Vec<GlossaryEntry> {
        self.glossary
            .as_ref()
            .map(|g| g.entries().to_vec())
            .unwrap_or_default()
    }

    /// Submit a deck for translation. A malformed glossary fails the
    /// submission; everything else surfaces through job state.
    pub fn submit(&self, deck_bytes: Vec<u8>, options: JobOptions) -> Result<Uuid> {
        let glossary = self.resolve_glossary(&options)?;

        let mut pipeline_options = PipelineOptions::from_config(&self.config);
        if let Some(language) = &options.source_language {
            pipeline_options.source_language = language.clone();
        }
        if let Some(language) = &options.target_language {
            pipeline_options.target_language = language.clone();
        }
        if let Some(workers) = options.workers {
            pipeline_options.workers = workers.max(1);
        }
        if let Some(secs) = options.record_timeout_secs {
            pipeline_options.paragraph_timeout = std::time::Duration::from_secs(secs);
            pipeline_options.label_timeout = std::time::Duration::from_secs(secs);
        }

        let backend = match &self.backend_override {
            Some(backend) => backend.clone(),
            None => {
                let mut backend_config = self.config.backend.clone();
                if let Some(kind) = options.backend {
                    backend_config.kind = kind;
                }
                create_backend(&backend_config)?
            }
        };

        let strategy = options.strategy.unwrap_or(self.config.align.strategy);
        let aligner = create_aligner(
            strategy,
            &self.config.align,
            backend.clone(),
            self.embedder_override.clone(),
            glossary.as_deref(),
            &pipeline_options.source_language,
            &pipeline_options.target_language,
        );

        let id = Uuid::new_v4();
        let job_dir = self.config.artifacts.dir.join(id.to_string());
        let stage_dir = job_dir.join("stages");
        let output_path = job_dir.join("output.deck");

        let cancel = CancellationToken::new();
        let now = Utc::now();
        {
            let mut jobs = self.jobs.write().unwrap();
            jobs.insert(
                id,
                JobEntry {
                    state: JobState::Pending,
                    progress: 0,
                    milestone: None,
                    created_at: now,
                    updated_at: now,
                    error: None,
                    summary: None,
                    cancel: cancel.clone(),
                    output_path: output_path.clone(),
                    stage_dir: stage_dir.clone(),
                },
            );
        }

        let jobs = self.jobs.clone();
        let progress_jobs = self.jobs.clone();
        let progress = Arc::new(move |percent: u8, milestone: Milestone| {
            update_job(&progress_jobs, id, |entry| {
                // Monotone while running.
                entry.progress = entry.progress.max(percent);
                entry.milestone = Some(milestone.name());
            });
        });

        let pipeline = Pipeline::new(
            pipeline_options,
            backend,
            aligner,
            glossary,
            ArtifactStore::new(&stage_dir),
            progress,
            cancel.clone(),
        );

        info!("Submitting job {}", id);
        tokio::spawn(async move {
            update_job(&jobs, id, |entry| entry.state = JobState::Running);

            match pipeline.run(&deck_bytes, &output_path).await {
                Ok(report) => {
                    info!("Job {} completed: {}", id, report.summary());
                    update_job(&jobs, id, |entry| {
                        entry.state = JobState::Completed;
                        entry.progress = 100;
                        entry.summary = Some(report.summary());
                    });
                }
                Err(DecklingError::TranslationCancelled) => {
                    info!("Job {} cancelled", id);
                    discard_outputs(&stage_dir, &output_path).await;
                    update_job(&jobs, id, |entry| entry.state = JobState::Cancelled);
                }
                Err(e) => {
                    error!("Job {} failed: {}", id, e);
                    update_job(&jobs, id, |entry| {
                        entry.state = JobState::Failed;
                        entry.error = Some(e.to_string());
                    });
                }
            }
        });

        Ok(id)
    }

    pub fn status(&self, id: Uuid) -> Result<JobStatus> {
        let jobs = self.jobs.read().unwrap();
        let entry = jobs.get(&id).ok_or(DecklingError::JobNotFound(id))?;
        Ok(JobStatus {
            id,
            state: entry.state,
            progress: entry.progress,
            milestone: entry.milestone.map(String::from),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            error: entry.error.clone(),
            summary: entry.summary.clone(),
        })
    }

    /// Request cancellation. The job stops at its next cooperative
    /// checkpoint and partial outputs are discarded.
    pub fn cancel(&self, id: Uuid) -> Result<CancelOutcome> {
        let jobs = self.jobs.read().unwrap();
        let entry = jobs.get(&id).ok_or(DecklingError::JobNotFound(id))?;
        if entry.state.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        entry.cancel.cancel();
        Ok(CancelOutcome::Cancelled)
    }

    /// Translated deck bytes of a completed job.
    pub fn result(&self, id: Uuid) -> Result<Vec<u8>> {
        let output_path = {
            let jobs = self.jobs.read().unwrap();
            let entry = jobs.get(&id).ok_or(DecklingError::JobNotFound(id))?;
            if entry.state != JobState::Completed {
                return Err(DecklingError::Job(format!(
                    "job {} is not completed (state: {:?})",
                    id, entry.state
                )));
            }
            entry.output_path.clone()
        };
        Ok(std::fs::read(output_path)?)
    }

    /// Drop terminal jobs older than the retention window, removing their
    /// artifacts.
    pub async fn prune_expired(&self) -> usize {
        let retention = chrono::Duration::seconds(self.config.jobs.retention_secs as i64);
        let now = Utc::now();

        let expired: Vec<(Uuid, PathBuf, PathBuf)> = {
            let jobs = self.jobs.read().unwrap();
            jobs.iter()
                .filter(|(_, entry)| {
                    entry.state.is_terminal() && now - entry.updated_at > retention
                })
                .map(|(id, entry)| (*id, entry.stage_dir.clone(), entry.output_path.clone()))
                .collect()
        };

        for (id, stage_dir, output_path) in &expired {
            discard_outputs(stage_dir, output_path).await;
            self.jobs.write().unwrap().remove(id);
            info!("Pruned expired job {}", id);
        }
        expired.len()
    }
}

fn update_job(jobs: &JobTable, id: Uuid, f: impl FnOnce(&mut JobEntry)) {
    if let Ok(mut jobs) = jobs.write() {
        if let Some(entry) = jobs.get_mut(&id) {
            f(entry);
            entry.updated_at = Utc::now();
        }
    }
}

async fn discard_outputs(stage_dir: &PathBuf, output_path: &PathBuf) {
    if let Err(e) = ArtifactStore::new(stage_dir).remove().await {
        warn!("Failed to remove stage artifacts: {}", e);
    }
    if output_path.exists() {
        if let Err(e) = tokio::fs::remove_file(output_path).await {
            warn!("Failed to remove partial output: {}", e);
        }
    }
}

impl JobManager {
    fn resolve_glossary(&self, options: &JobOptions) -> Result<Option<Arc<Glossary>>> {
        match &options.glossary {
            Some(GlossarySource::Path(path)) => Ok(Some(Arc::new(Glossary::load(path)?))),
            Some(GlossarySource::Inline(entries)) => {
                Ok(Some(Arc::new(Glossary::from_entries(entries.clone())?)))
            }
            None => Ok(self.glossary.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let manager = JobManager::new(Config::default());
        let id = Uuid::new_v4();
        assert!(matches!(
            manager.status(id),
            Err(DecklingError::JobNotFound(_))
        ));
        assert!(matches!(
            manager.cancel(id),
            Err(DecklingError::JobNotFound(_))
        ));
        assert!(matches!(
            manager.result(id),
            Err(DecklingError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_with_malformed_glossary_fails() {
        let manager = JobManager::new(Config::default());
        let options = JobOptions {
            glossary: Some(GlossarySource::Path(PathBuf::from("/nonexistent/glossary.json"))),
            ..Default::default()
        };
        let result = manager.submit(Vec::new(), options);
        assert!(matches!(result, Err(DecklingError::Glossary(_))));
    }
}
