//! Per-job intermediate artifacts: append-only line-delimited JSON records.
//!
//! Every stage spills its output one record per line, written and read
//! strictly line by line. A crash leaves at most one partial trailing line,
//! which is discarded on resume; that gives a cheap crash-resume point
//! between stages without a database.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::Result;

/// One job's artifact directory with a file per stage.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stage_path(&self, stage: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", stage))
    }

    /// Replace a stage file with the given records, one JSON object per line.
    pub async fn write_stage<T: Serialize>(&self, stage: &str, records: &[T]) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.stage_path(stage);
        let mut file = fs::File::create(&path).await?;

        for record in records {
            let mut line = serde_json::to_vec(record)?;
            line.push(b'\n');
            file.write_all(&line).await?;
        }
        file.flush().await?;

        debug!("Wrote {} records to {}", records.len(), path.display());
        Ok(())
    }

    /// Read a stage file line by line. A partial trailing line (no newline,
    /// unparseable) is dropped silently; corrupt lines elsewhere are skipped
    /// with a warning.
    pub async fn read_stage<T: DeserializeOwned>(&self, stage: &str) -> Result<Vec<T>> {
        let path = self.stage_path(stage);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).await?;
        let ends_with_newline = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();

        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<T>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let is_last = index + 1 == lines.len();
                    if is_last && !ends_with_newline {
                        debug!("Discarding partial trailing line in {}", path.display());
                    } else {
                        warn!("Skipping corrupt line {} in {}: {}", index + 1, path.display(), e);
                    }
                }
            }
        }

        Ok(records)
    }

    /// Remove the whole artifact directory (used when discarding partial
    /// outputs of a cancelled job, or cleaning up after completion).
    pub async fn remove(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).await?;
        }
        Ok(())
    }
}
