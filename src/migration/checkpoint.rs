//! Durable job and batch progress
//!
//! The executor persists each job record and, after every completed batch,
//! a checkpoint cursor. A checkpoint never moves backwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{JobId, MigrationJob};
use crate::config::MigrationConfig;
use crate::error::{Result, SchemaError};

/// Last completed batch of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: JobId,
    pub batch_number: u64,
    /// Last source key migrated by that batch
    pub cursor: String,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(job_id: JobId, batch_number: u64, cursor: impl Into<String>) -> Self {
        Self {
            job_id,
            batch_number,
            cursor: cursor.into(),
            saved_at: Utc::now(),
        }
    }
}

/// Persistence for migration progress
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoint(&self, job_id: JobId, batch_number: u64, cursor: &str) -> Result<()>;

    async fn load_checkpoint(&self, job_id: JobId) -> Result<Option<Checkpoint>>;

    async fn save_job(&self, job: &MigrationJob) -> Result<()>;

    async fn load_job(&self, job_id: JobId) -> Result<Option<MigrationJob>>;

    async fn list_jobs(&self) -> Result<Vec<MigrationJob>>;
}

fn check_forward(previous: Option<&Checkpoint>, batch_number: u64, cursor: &str) -> Result<()> {
    if let Some(prev) = previous {
        if batch_number < prev.batch_number || cursor < prev.cursor.as_str() {
            return Err(SchemaError::Checkpoint(format!(
                "checkpoint for job {} would regress from batch {} (cursor {}) to batch {} (cursor {})",
                prev.job_id, prev.batch_number, prev.cursor, batch_number, cursor
            )));
        }
    }
    Ok(())
}

/// Checkpoints held in memory
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: DashMap<JobId, Checkpoint>,
    jobs: DashMap<JobId, MigrationJob>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save_checkpoint(&self, job_id: JobId, batch_number: u64, cursor: &str) -> Result<()> {
        let mut entry = self
            .checkpoints
            .entry(job_id)
            .or_insert_with(|| Checkpoint::new(job_id, 0, ""));
        check_forward(Some(entry.value()), batch_number, cursor)?;
        *entry = Checkpoint::new(job_id, batch_number, cursor);
        Ok(())
    }

    async fn load_checkpoint(&self, job_id: JobId) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.get(&job_id).map(|c| c.value().clone()))
    }

    async fn save_job(&self, job: &MigrationJob) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: JobId) -> Result<Option<MigrationJob>> {
        Ok(self.jobs.get(&job_id).map(|j| j.value().clone()))
    }

    async fn list_jobs(&self) -> Result<Vec<MigrationJob>> {
        let mut jobs: Vec<MigrationJob> = self.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}

/// One JSON file per job and per checkpoint under a directory
///
/// Files are written to a temporary path, synced, then renamed over the
/// previous version, so a reader after a crash sees either the old or the
/// new content.
pub struct FileCheckpointStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Store rooted at the configured `checkpoint_dir`
    pub async fn from_config(config: &MigrationConfig) -> Result<Self> {
        Self::open(&config.checkpoint_dir).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checkpoint_path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", job_id))
    }

    fn job_path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{}.job.json", job_id))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "checkpoint file written");
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save_checkpoint(&self, job_id: JobId, batch_number: u64, cursor: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.checkpoint_path(job_id);
        let previous: Option<Checkpoint> = Self::read_json(&path).await?;
        check_forward(previous.as_ref(), batch_number, cursor)?;

        let checkpoint = Checkpoint::new(job_id, batch_number, cursor);
        self.write_atomic(&path, &serde_json::to_vec_pretty(&checkpoint)?)
            .await
    }

    async fn load_checkpoint(&self, job_id: JobId) -> Result<Option<Checkpoint>> {
        Self::read_json(&self.checkpoint_path(job_id)).await
    }

    async fn save_job(&self, job: &MigrationJob) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_atomic(&self.job_path(job.id), &serde_json::to_vec_pretty(job)?)
            .await
    }

    async fn load_job(&self, job_id: JobId) -> Result<Option<MigrationJob>> {
        Self::read_json(&self.job_path(job_id)).await
    }

    async fn list_jobs(&self) -> Result<Vec<MigrationJob>> {
        let mut jobs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_job = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".job.json"))
                .unwrap_or(false);
            if is_job {
                if let Some(job) = Self::read_json::<MigrationJob>(&path).await? {
                    jobs.push(job);
                }
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}
