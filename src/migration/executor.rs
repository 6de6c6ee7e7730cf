//! Migration job executor
//!
//! Jobs are submitted synchronously and run as background tokio tasks. The
//! executor keeps an advisory lock per schema name so at most one job per
//! schema runs at a time; a second request is rejected, not queued.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::checkpoint::CheckpointStore;
use super::store::MigrationStore;
use super::transform::TransformRegistry;
use super::{JobId, JobProgress, JobStatus, MigrationJob, MigrationRequest, Phase};
use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result, SchemaError};
use crate::registry::VersionRegistry;

pub(crate) struct Shared {
    pub(crate) registry: Arc<VersionRegistry>,
    pub(crate) transforms: Arc<TransformRegistry>,
    pub(crate) store: Arc<dyn MigrationStore>,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) config: MigrationConfig,
    /// Advisory lock: schema name -> job holding it
    locks: DashMap<String, JobId>,
    handles: DashMap<JobId, JobHandle>,
}

struct JobHandle {
    progress: watch::Sender<JobProgress>,
    cancel: CancellationToken,
    snapshot: MigrationJob,
}

/// Runs migration jobs against a [`MigrationStore`]
#[derive(Clone)]
pub struct MigrationExecutor {
    shared: Arc<Shared>,
}

impl MigrationExecutor {
    pub fn new(
        registry: Arc<VersionRegistry>,
        transforms: Arc<TransformRegistry>,
        store: Arc<dyn MigrationStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                transforms,
                store,
                checkpoints,
                config,
                locks: DashMap::new(),
                handles: DashMap::new(),
            }),
        }
    }

    /// Start a migration and return its job id without waiting for it
    pub async fn submit(&self, request: MigrationRequest) -> Result<JobId> {
        let transforms = &self.shared.transforms;
        if !transforms.contains(&request.schema_name, &request.from_version, &request.to_version) {
            return Err(SchemaError::TransformNotRegistered {
                schema_name: request.schema_name.clone(),
                from: request.from_version.to_string(),
                to: request.to_version.to_string(),
            });
        }
        let batch_size = request
            .batch_size
            .unwrap_or(self.shared.config.batch_size)
            .max(1);
        let job = MigrationJob::new(&request, batch_size);
        self.acquire(&job.schema_name, job.id)?;

        if let Err(err) = self.check_unresolved(&job).await {
            self.shared.release(&job.schema_name, job.id);
            return Err(err);
        }
        if let Err(err) = self.shared.checkpoints.save_job(&job).await {
            self.shared.release(&job.schema_name, job.id);
            return Err(err);
        }

        info!(job_id = %job.id, schema = %job.schema_name, from = %job.from_version, to = %job.to_version, "migration submitted");
        let id = job.id;
        self.spawn(job);
        Ok(id)
    }

    /// Continue a job that was interrupted, from its last checkpoint
    pub async fn resume(&self, job_id: JobId) -> Result<JobId> {
        if self.is_active(job_id) {
            return Err(SchemaError::InvalidJobState {
                job_id,
                action: "resumed",
                status: JobStatus::Running.to_string(),
            });
        }
        let mut job = self
            .shared
            .checkpoints
            .load_job(job_id)
            .await?
            .ok_or(SchemaError::JobNotFound(job_id))?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::Running) {
            return Err(SchemaError::InvalidJobState {
                job_id,
                action: "resumed",
                status: job.status.to_string(),
            });
        }

        self.acquire(&job.schema_name, job_id)?;
        match self.shared.checkpoints.load_checkpoint(job_id).await {
            Ok(Some(cp)) => {
                job.batches_completed = cp.batch_number;
                job.batches.retain(|b| b.batch_number <= cp.batch_number);
                job.cursor = Some(cp.cursor);
            }
            Ok(None) => {}
            Err(err) => {
                self.shared.release(&job.schema_name, job_id);
                return Err(err);
            }
        }

        info!(job_id = %job_id, phase = %job.phase, cursor = ?job.cursor, "migration resumed");
        self.spawn(job);
        Ok(job_id)
    }

    /// Request cancellation; takes effect at the next batch boundary
    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        if let Some(handle) = self.shared.handles.get(&job_id) {
            if !handle.snapshot.is_finished() {
                handle.cancel.cancel();
                info!(job_id = %job_id, "migration cancellation requested");
                return Ok(());
            }
        }
        // Not running in this executor: finished, or interrupted and awaiting resume
        let job = self.job(job_id).await?;
        Err(SchemaError::InvalidJobState {
            job_id,
            action: "cancelled",
            status: job.status.to_string(),
        })
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobProgress> {
        Ok(self.job(job_id).await?.progress())
    }

    /// Full job record
    pub async fn job(&self, job_id: JobId) -> Result<MigrationJob> {
        if let Some(handle) = self.shared.handles.get(&job_id) {
            return Ok(handle.snapshot.clone());
        }
        self.shared
            .checkpoints
            .load_job(job_id)
            .await?
            .ok_or(SchemaError::JobNotFound(job_id))
    }

    /// Receive progress updates pushed after every batch and phase change
    pub fn subscribe(&self, job_id: JobId) -> Result<watch::Receiver<JobProgress>> {
        self.shared
            .handles
            .get(&job_id)
            .map(|h| h.progress.subscribe())
            .ok_or(SchemaError::JobNotFound(job_id))
    }

    /// Wait until the job stops changing
    pub async fn wait(&self, job_id: JobId) -> Result<JobProgress> {
        let mut rx = match self.subscribe(job_id) {
            Ok(rx) => rx,
            Err(_) => return self.status(job_id).await,
        };
        loop {
            let progress = rx.borrow_and_update().clone();
            if progress.finished {
                return Ok(progress);
            }
            if rx.changed().await.is_err() {
                return self.status(job_id).await;
            }
        }
    }

    /// Job currently holding the migration lock for a schema
    pub fn active_job(&self, schema_name: &str) -> Option<JobId> {
        self.shared.locks.get(schema_name).map(|id| *id)
    }

    fn is_active(&self, job_id: JobId) -> bool {
        self.shared
            .handles
            .get(&job_id)
            .map(|h| !h.snapshot.is_finished())
            .unwrap_or(false)
    }

    fn acquire(&self, schema_name: &str, job_id: JobId) -> Result<()> {
        match self.shared.locks.entry(schema_name.to_string()) {
            Entry::Occupied(held) if *held.get() != job_id => Err(SchemaError::MigrationInProgress {
                schema_name: schema_name.to_string(),
                job_id: *held.get(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(job_id);
                Ok(())
            }
        }
    }

    async fn check_unresolved(&self, job: &MigrationJob) -> Result<()> {
        let prior = self
            .shared
            .checkpoints
            .list_jobs()
            .await?
            .into_iter()
            .find(|j| j.schema_name == job.schema_name && j.id != job.id && j.is_unresolved());
        match prior {
            Some(prior) => Err(SchemaError::UnresolvedMigration {
                schema_name: job.schema_name.clone(),
                job_id: prior.id,
                status: prior.status.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn spawn(&self, job: MigrationJob) {
        let (progress, _) = watch::channel(job.progress());
        let cancel = CancellationToken::new();
        self.shared.handles.insert(
            job.id,
            JobHandle {
                progress,
                cancel: cancel.clone(),
                snapshot: job.clone(),
            },
        );

        let runner = Runner {
            shared: self.shared.clone(),
            cancel,
        };
        let span = info_span!("migration", job_id = %job.id, schema = %job.schema_name);
        tokio::spawn(runner.run(job).instrument(span));
    }
}

impl Shared {
    fn release(&self, schema_name: &str, job_id: JobId) {
        self.locks.remove_if(schema_name, |_, holder| *holder == job_id);
    }

    pub(crate) fn holds_lock(&self, schema_name: &str, job_id: JobId) -> bool {
        self.locks
            .get(schema_name)
            .map(|holder| *holder == job_id)
            .unwrap_or(false)
    }
}

/// Drives one job through its phases
pub(crate) struct Runner {
    pub(crate) shared: Arc<Shared>,
    pub(crate) cancel: CancellationToken,
}

impl Runner {
    async fn run(self, mut job: MigrationJob) {
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
        }

        let outcome = match self.record(&job).await {
            Ok(()) => self.drive(&mut job).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                job.status = JobStatus::Completed;
                job.finished_at = Some(Utc::now());
                info!(processed = job.processed_records, "migration completed");
                self.record_final(&job).await;
            }
            Err(err) => self.fail(&mut job, err).await,
        }
    }

    async fn drive(&self, job: &mut MigrationJob) -> std::result::Result<(), MigrationError> {
        loop {
            let phase = job.phase;
            let span = info_span!("phase", phase = %phase);
            match phase {
                Phase::PreValidation => self.pre_validation(job).instrument(span).await?,
                Phase::ShadowSetup => self.shadow_setup(job).instrument(span).await?,
                Phase::BatchMigration => self.batch_migration(job).instrument(span).await?,
                Phase::Cutover => self.cutover(job).instrument(span).await?,
                Phase::PostValidation => self.post_validation(job).instrument(span).await?,
                Phase::Cleanup => self.cleanup(job).instrument(span).await,
            }

            match phase.next() {
                Some(next) => {
                    // Cutover is never entered once cancellation was requested
                    if next == Phase::Cutover && self.cancel.is_cancelled() {
                        return Err(MigrationError::Cancelled);
                    }
                    job.phase = next;
                    self.record(job).await?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Mark the job failed and undo whatever the migration changed
    async fn fail(&self, job: &mut MigrationJob, err: MigrationError) {
        job.status = JobStatus::Failed;
        job.error_kind = Some(err.code().to_string());
        job.error_message = Some(err.to_string());
        warn!(phase = %job.phase, error = %err, "migration failed");

        if job.shadow.is_none() {
            job.finished_at = Some(Utc::now());
            self.record_final(job).await;
            return;
        }

        // Persist FAILED before touching the store so a crash mid-rollback is visible
        if let Err(e) = self.shared.checkpoints.save_job(job).await {
            warn!(error = %e, "could not persist failed job before rollback");
        }

        match self.rollback(job).await {
            Ok(()) => {
                job.status = JobStatus::RolledBack;
                info!("migration rolled back");
            }
            Err(rollback_err) => {
                job.status = JobStatus::RollbackFailed;
                job.error_kind = Some(rollback_err.code().to_string());
                job.error_message = Some(format!("{}; after: {}", rollback_err, err));
                error!(
                    severity = "CRITICAL",
                    job_id = %job.id,
                    schema = %job.schema_name,
                    error = %rollback_err,
                    cause = %err,
                    "migration rollback failed, operator intervention required"
                );
            }
        }
        job.finished_at = Some(Utc::now());
        self.record_final(job).await;
    }

    /// Restore the pre-migration structure as primary and discard the shadow
    async fn rollback(&self, job: &mut MigrationJob) -> std::result::Result<(), MigrationError> {
        let store = &self.shared.store;
        let schema = job.schema_name.clone();
        let schema = schema.as_str();
        let mut failures = Vec::new();

        if job.swapped {
            match &job.original {
                Some(original) => match store.swap_back(schema, original).await {
                    Ok(()) => job.swapped = false,
                    Err(e) => failures.push(format!("swap back: {}", e)),
                },
                None => failures.push("swap back: original structure unknown".to_string()),
            }
        }
        if let Err(e) = store.end_exclusive(schema).await {
            failures.push(format!("end exclusive: {}", e));
        }
        if let Err(e) = store.remove_dual_write(schema).await {
            failures.push(format!("remove dual-write: {}", e));
        }
        // Dropping the shadow while it is still primary would lose data
        if !job.swapped {
            if let Some(shadow) = &job.shadow {
                if let Err(e) = store.drop_structure(shadow).await {
                    failures.push(format!("drop shadow {}: {}", shadow, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::RollbackFailure(failures.join("; ")))
        }
    }

    /// Persist the job and publish progress
    pub(crate) async fn record(&self, job: &MigrationJob) -> std::result::Result<(), MigrationError> {
        self.shared
            .checkpoints
            .save_job(job)
            .await
            .map_err(|e| MigrationError::Checkpoint(e.to_string()))?;
        self.publish(job);
        Ok(())
    }

    /// Like [`record`](Self::record) for terminal states, where a persistence
    /// failure can only be logged. Releases the schema's migration lock and
    /// drops the in-memory handle; later queries read the checkpoint store.
    async fn record_final(&self, job: &MigrationJob) {
        if let Err(e) = self.shared.checkpoints.save_job(job).await {
            error!(error = %e, status = %job.status, "could not persist final job state");
        }
        self.shared.release(&job.schema_name, job.id);
        self.publish(job);
        self.shared.handles.remove(&job.id);
    }

    fn publish(&self, job: &MigrationJob) {
        if let Some(mut handle) = self.shared.handles.get_mut(&job.id) {
            handle.snapshot = job.clone();
            handle.progress.send_replace(job.progress());
        }
    }
}
