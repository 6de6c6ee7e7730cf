//! Checkpointed, rollback-capable data migration
//!
//! A migration moves the stored records of a schema from one published
//! version's shape to another's. It runs as a background job through a fixed
//! sequence of [`Phase`]s:
//!
//! ```text
//! PreValidation -> ShadowSetup -> BatchMigration -> Cutover -> PostValidation -> Cleanup
//! ```
//!
//! Records are transformed into a shadow structure in batches. Progress is
//! checkpointed after every batch so an interrupted job resumes where it
//! stopped. Any failure after the shadow exists rolls the schema's data back to
//! its pre-migration state.

mod checkpoint;
mod executor;
mod memory;
mod phases;
mod store;
mod transform;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use executor::MigrationExecutor;
pub use memory::MemoryStore;
pub use store::{MigrationStore, Record, StoreError, StoreResult, StructureId};
pub use transform::{FieldOp, RecordTransform, Transform, TransformError, TransformRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::version::Version;

/// Migration job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Job status
///
/// `PENDING -> RUNNING -> COMPLETED`, or on failure `RUNNING -> FAILED`
/// followed by `ROLLED_BACK` or `ROLLBACK_FAILED` when there was something
/// to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
    /// Rollback did not complete; needs an operator
    RollbackFailed,
}

impl JobStatus {
    /// No further transitions happen from this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::RolledBack | JobStatus::RollbackFailed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::RolledBack => "ROLLED_BACK",
            JobStatus::RollbackFailed => "ROLLBACK_FAILED",
        };
        f.write_str(s)
    }
}

/// Sub-steps of a running job, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    PreValidation,
    ShadowSetup,
    BatchMigration,
    Cutover,
    PostValidation,
    Cleanup,
}

impl Phase {
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::PreValidation => Some(Phase::ShadowSetup),
            Phase::ShadowSetup => Some(Phase::BatchMigration),
            Phase::BatchMigration => Some(Phase::Cutover),
            Phase::Cutover => Some(Phase::PostValidation),
            Phase::PostValidation => Some(Phase::Cleanup),
            Phase::Cleanup => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::PreValidation => "PRE_VALIDATION",
            Phase::ShadowSetup => "SHADOW_SETUP",
            Phase::BatchMigration => "BATCH_MIGRATION",
            Phase::Cutover => "CUTOVER",
            Phase::PostValidation => "POST_VALIDATION",
            Phase::Cleanup => "CLEANUP",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One unit of work within a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationBatch {
    pub batch_number: u64,
    /// Key the batch reads after; `None` for the first batch
    pub start_after: Option<String>,
    /// Last key the batch covered
    pub last_key: Option<String>,
    pub record_count: u64,
    pub status: BatchStatus,
    pub retries: u32,
}

impl MigrationBatch {
    pub fn new(batch_number: u64, start_after: Option<String>) -> Self {
        Self {
            batch_number,
            start_after,
            last_key: None,
            record_count: 0,
            status: BatchStatus::Pending,
            retries: 0,
        }
    }
}

/// Full record of a migration job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    pub id: JobId,
    pub schema_name: String,
    pub from_version: Version,
    pub to_version: Version,
    pub status: JobStatus,
    pub phase: Phase,
    pub total_records: u64,
    pub processed_records: u64,
    pub failed_records: u64,
    pub batch_size: usize,
    /// Last source key migrated into the shadow; reading resumes after it
    #[serde(default)]
    pub cursor: Option<String>,
    pub batches_completed: u64,
    #[serde(default)]
    pub batches: Vec<MigrationBatch>,
    /// Structure that was primary before the migration
    pub original: Option<StructureId>,
    pub shadow: Option<StructureId>,
    /// Whether the shadow has been swapped in as primary
    #[serde(default)]
    pub swapped: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl MigrationJob {
    pub fn new(request: &MigrationRequest, batch_size: usize) -> Self {
        Self {
            id: JobId::new(),
            schema_name: request.schema_name.clone(),
            from_version: request.from_version.clone(),
            to_version: request.to_version.clone(),
            status: JobStatus::Pending,
            phase: Phase::PreValidation,
            total_records: 0,
            processed_records: 0,
            failed_records: 0,
            batch_size,
            cursor: None,
            batches_completed: 0,
            batches: Vec::new(),
            original: None,
            shadow: None,
            swapped: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_kind: None,
            error_message: None,
        }
    }

    /// The job will not change again. A failure before the shadow existed
    /// has nothing to roll back and stays FAILED.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal() || (self.status == JobStatus::Failed && self.shadow.is_none())
    }

    /// Blocks new migrations of the same schema until resolved
    pub fn is_unresolved(&self) -> bool {
        match self.status {
            JobStatus::Pending | JobStatus::Running | JobStatus::RollbackFailed => true,
            JobStatus::Failed => self.shadow.is_some(),
            JobStatus::Completed | JobStatus::RolledBack => false,
        }
    }

    pub fn progress(&self) -> JobProgress {
        let percentage = if self.total_records == 0 {
            if self.status == JobStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (self.processed_records as f64 / self.total_records as f64 * 100.0).min(100.0)
        };
        JobProgress {
            job_id: self.id,
            schema_name: self.schema_name.clone(),
            status: self.status,
            phase: self.phase,
            processed: self.processed_records,
            total: self.total_records,
            failed: self.failed_records,
            percentage,
            finished: self.is_finished(),
            error_kind: self.error_kind.clone(),
        }
    }
}

/// Point-in-time view of a job for status queries and subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub schema_name: String,
    pub status: JobStatus,
    pub phase: Phase,
    pub processed: u64,
    pub total: u64,
    pub failed: u64,
    pub percentage: f64,
    pub finished: bool,
    pub error_kind: Option<String>,
}

/// Request to migrate a schema's records between two published versions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub schema_name: String,
    pub from_version: Version,
    pub to_version: Version,
    /// Overrides the configured batch size
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl MigrationRequest {
    pub fn new(schema_name: impl Into<String>, from_version: Version, to_version: Version) -> Self {
        Self {
            schema_name: schema_name.into(),
            from_version,
            to_version,
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> MigrationJob {
        let request = MigrationRequest::new("order", Version::new(1, 0, 0), Version::new(2, 0, 0));
        MigrationJob::new(&request, 100)
    }

    #[test]
    fn test_phase_order() {
        let mut phase = Phase::PreValidation;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(phase, Phase::Cleanup);
    }

    #[test]
    fn test_progress_percentage() {
        let mut job = job();
        job.total_records = 200;
        job.processed_records = 50;
        let progress = job.progress();
        assert_eq!(progress.percentage, 25.0);
        assert!(!progress.finished);
    }

    #[test]
    fn test_failure_without_shadow_is_finished() {
        let mut job = job();
        job.status = JobStatus::Failed;
        assert!(job.is_finished());
        assert!(!job.is_unresolved());

        job.shadow = Some(StructureId::new("order__shadow"));
        assert!(!job.is_finished());
        assert!(job.is_unresolved());
    }

    #[test]
    fn test_job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(serde_json::to_value(id).unwrap(), serde_json::json!(id.to_string()));
    }
}
