//! One handler per migration phase
//!
//! Each handler either returns `Ok(())` to advance to the next phase or a
//! [`MigrationError`] that sends the job down the rollback path.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use jsonschema::JSONSchema;
use similar::TextDiff;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::executor::Runner;
use super::store::{Record, StructureId};
use super::transform::Transform;
use super::{BatchStatus, MigrationBatch, MigrationJob};
use crate::error::MigrationError;

type PhaseResult = std::result::Result<(), MigrationError>;

impl Runner {
    pub(crate) async fn pre_validation(&self, job: &mut MigrationJob) -> PhaseResult {
        let registry = &self.shared.registry;
        for version in [&job.from_version, &job.to_version] {
            if !registry.contains(&job.schema_name, version) {
                return Err(MigrationError::PreValidation(format!(
                    "{} v{} is not published",
                    job.schema_name, version
                )));
            }
        }
        if job.to_version <= job.from_version {
            return Err(MigrationError::PreValidation(format!(
                "target version {} does not follow source version {}",
                job.to_version, job.from_version
            )));
        }
        self.transform(job)?;
        if !self.shared.holds_lock(&job.schema_name, job.id) {
            return Err(MigrationError::PreValidation(format!(
                "migration lock for {} is not held by this job",
                job.schema_name
            )));
        }

        let primary = self
            .shared
            .store
            .primary(&job.schema_name)
            .await
            .map_err(|e| MigrationError::PreValidation(e.to_string()))?;
        job.total_records = self
            .shared
            .store
            .count(&primary)
            .await
            .map_err(|e| MigrationError::PreValidation(e.to_string()))?;
        job.original = Some(primary);
        info!(total = job.total_records, "pre-validation passed");
        Ok(())
    }

    pub(crate) async fn shadow_setup(&self, job: &mut MigrationJob) -> PhaseResult {
        let store = &self.shared.store;
        let shadow = match job.shadow.clone() {
            Some(shadow) => shadow,
            None => {
                let shadow = store
                    .create_shadow(&job.schema_name, &job.to_version)
                    .await
                    .map_err(|e| MigrationError::ShadowSetup(e.to_string()))?;
                job.shadow = Some(shadow.clone());
                // Persist before anything else so rollback can find it
                self.record(job).await?;
                shadow
            }
        };
        store
            .install_dual_write(&job.schema_name, &shadow)
            .await
            .map_err(|e| MigrationError::ShadowSetup(e.to_string()))?;
        info!(shadow = %shadow, "shadow structure ready");
        Ok(())
    }

    pub(crate) async fn batch_migration(&self, job: &mut MigrationJob) -> PhaseResult {
        let transform = self.transform(job)?;
        let validator = self.target_validator(job)?;
        let (source, shadow) = structures(job)?;
        let store = &self.shared.store;
        let batch_size = job.batch_size.max(1);
        let parallelism = self.shared.config.parallelism.max(1);

        // Batches are upserts, so the shadow holds exactly what was migrated
        job.processed_records = store.count(&shadow).await?;

        loop {
            if self.cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }
            job.total_records = store.count(&source).await?;

            // Pages are read in key order, then transformed and written together.
            // Keys written behind the cursor are caught by dual-write.
            let mut window: Vec<(MigrationBatch, Vec<Record>)> = Vec::with_capacity(parallelism);
            let mut after = job.cursor.clone();
            let mut exhausted = false;
            while window.len() < parallelism {
                let records = self.read_page(&source, after.as_deref(), batch_size).await?;
                if records.is_empty() {
                    exhausted = true;
                    break;
                }
                let number = job.batches_completed + window.len() as u64 + 1;
                let mut batch = MigrationBatch::new(number, after.take());
                batch.last_key = records.last().map(|r| r.key.clone());
                batch.record_count = records.len() as u64;
                after = batch.last_key.clone();
                exhausted = records.len() < batch_size;
                window.push((batch, records));
                if exhausted {
                    break;
                }
            }

            let sizes: Vec<u64> = window.iter().map(|(b, _)| b.record_count).collect();
            let results: Vec<_> = stream::iter(window)
                .map(|(batch, records)| {
                    self.run_batch(batch, records, &shadow, &transform, validator.as_deref())
                })
                .buffered(parallelism)
                .collect()
                .await;

            for (result, size) in results.into_iter().zip(sizes) {
                let batch = match result {
                    Ok(batch) => batch,
                    Err(err) => {
                        job.failed_records += size;
                        return Err(err);
                    }
                };
                job.cursor = batch.last_key.clone();
                job.batches_completed = batch.batch_number;
                job.processed_records += batch.record_count;
                if let Some(cursor) = job.cursor.as_deref() {
                    self.shared
                        .checkpoints
                        .save_checkpoint(job.id, batch.batch_number, cursor)
                        .await
                        .map_err(|e| MigrationError::Checkpoint(e.to_string()))?;
                }
                debug!(
                    batch = batch.batch_number,
                    records = batch.record_count,
                    retries = batch.retries,
                    "batch committed"
                );
                job.batches.push(batch);
                self.record(job).await?;
            }

            if exhausted {
                return Ok(());
            }
        }
    }

    /// Read one page after `after`, retrying store failures with backoff
    async fn read_page(
        &self,
        source: &StructureId,
        after: Option<&str>,
        limit: usize,
    ) -> std::result::Result<Vec<Record>, MigrationError> {
        let max_retries = self.shared.config.max_batch_retries;
        let mut attempt = 0;
        loop {
            match self.shared.store.read_batch(source, after, limit).await {
                Ok(records) => return Ok(records),
                Err(err) if attempt < max_retries => {
                    attempt += 1;
                    warn!(after = ?after, attempt, error = %err, "batch read failed, retrying");
                    tokio::time::sleep(self.shared.config.retry_backoff(attempt)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Migrate one page already read, retrying retryable failures with backoff
    async fn run_batch(
        &self,
        mut batch: MigrationBatch,
        records: Vec<Record>,
        shadow: &StructureId,
        transform: &Transform,
        validator: Option<&JSONSchema>,
    ) -> std::result::Result<MigrationBatch, MigrationError> {
        let max_retries = self.shared.config.max_batch_retries;
        batch.status = BatchStatus::Running;
        loop {
            match self
                .process_batch(&batch, &records, shadow, transform, validator)
                .await
            {
                Ok(()) => {
                    batch.status = BatchStatus::Completed;
                    return Ok(batch);
                }
                Err(err) if err.is_retryable() && batch.retries < max_retries => {
                    batch.retries += 1;
                    let backoff = self.shared.config.retry_backoff(batch.retries);
                    warn!(
                        batch = batch.batch_number,
                        attempt = batch.retries,
                        error = %err,
                        "batch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    batch.status = BatchStatus::Failed;
                    return Err(err);
                }
            }
        }
    }

    async fn process_batch(
        &self,
        batch: &MigrationBatch,
        records: &[Record],
        shadow: &StructureId,
        transform: &Transform,
        validator: Option<&JSONSchema>,
    ) -> PhaseResult {
        let mut migrated = Vec::with_capacity(records.len());
        for record in records {
            let value = migrate_record(record, transform, validator, batch.batch_number)?;
            migrated.push(Record::new(record.key.clone(), value));
        }
        self.shared.store.write_batch(shadow, migrated).await?;
        Ok(())
    }

    /// Replay captured writes and swap the shadow in. Application writes stay
    /// blocked until post-validation releases them.
    pub(crate) async fn cutover(&self, job: &mut MigrationJob) -> PhaseResult {
        let transform = self.transform(job)?;
        let validator = self.target_validator(job)?;
        let (_, shadow) = structures(job)?;
        let store = &self.shared.store;
        let schema = job.schema_name.clone();
        let schema = schema.as_str();

        store
            .begin_exclusive(schema)
            .await
            .map_err(|e| MigrationError::Cutover(e.to_string()))?;

        // Records written since their batch was read
        let pending = store
            .drain_dual_writes(schema)
            .await
            .map_err(|e| MigrationError::Cutover(e.to_string()))?;
        let mut migrated = Vec::with_capacity(pending.len());
        for record in &pending {
            let value = migrate_record(record, &transform, validator.as_deref(), 0)
                .map_err(|e| MigrationError::Cutover(e.to_string()))?;
            migrated.push(Record::new(record.key.clone(), value));
        }
        store
            .write_batch(&shadow, migrated)
            .await
            .map_err(|e| MigrationError::Cutover(e.to_string()))?;

        store
            .swap(schema, &shadow)
            .await
            .map_err(|e| MigrationError::Cutover(e.to_string()))?;
        job.swapped = true;
        self.record(job).await?;
        info!(replayed = pending.len(), "cutover complete");
        Ok(())
    }

    /// Compare the swapped-in data against the frozen original, then reopen
    /// the schema for writes
    pub(crate) async fn post_validation(&self, job: &mut MigrationJob) -> PhaseResult {
        self.verify_shadow(job).await?;
        self.shared.store.end_exclusive(&job.schema_name).await?;
        info!("schema reopened for writes");
        Ok(())
    }

    async fn verify_shadow(&self, job: &MigrationJob) -> PhaseResult {
        let transform = self.transform(job)?;
        let (original, shadow) = structures(job)?;
        let store = &self.shared.store;

        let old_count = store.count(&original).await?;
        let new_count = store.count(&shadow).await?;
        if old_count != new_count {
            return Err(MigrationError::PostValidationMismatch(format!(
                "record count differs: {} before, {} after",
                old_count, new_count
            )));
        }

        // Spread samples over the batches, reading from each batch's start key
        let wanted = self.shared.config.post_validation_samples;
        let starts: Vec<Option<&str>> = job.batches.iter().map(|b| b.start_after.as_deref()).collect();
        let mut sample = Vec::with_capacity(wanted);
        if wanted > 0 && !starts.is_empty() {
            let stride = (starts.len() / wanted).max(1);
            let per_batch = wanted.div_ceil(starts.len());
            for after in starts.into_iter().step_by(stride) {
                let remaining = wanted - sample.len();
                if remaining == 0 {
                    break;
                }
                sample.extend(store.read_batch(&original, after, per_batch.min(remaining)).await?);
            }
        }

        for record in &sample {
            let expected = transform.apply(&record.value).map_err(|e| {
                MigrationError::PostValidationMismatch(format!("record {}: {}", record.key, e))
            })?;
            let actual = store.get(&shadow, &record.key).await?.ok_or_else(|| {
                MigrationError::PostValidationMismatch(format!("record {} missing after migration", record.key))
            })?;
            if actual.value != expected {
                return Err(MigrationError::PostValidationMismatch(format!(
                    "record {} differs from its re-applied transform:\n{}",
                    record.key,
                    render_diff(&expected, &actual.value)
                )));
            }
        }
        info!(samples = sample.len(), "post-validation passed");
        Ok(())
    }

    /// Best effort; failures are logged and never fail the job
    pub(crate) async fn cleanup(&self, job: &mut MigrationJob) {
        let store = &self.shared.store;
        if let Err(e) = store.remove_dual_write(&job.schema_name).await {
            warn!(error = %e, "could not remove dual-write");
        }
        if let Some(original) = &job.original {
            let retain_until = Utc::now() + self.shared.config.retention();
            match store.retire_structure(original, retain_until).await {
                Ok(()) => info!(structure = %original, %retain_until, "pre-migration structure retired"),
                Err(e) => warn!(structure = %original, error = %e, "could not retire pre-migration structure"),
            }
        }
    }

    fn transform(&self, job: &MigrationJob) -> std::result::Result<Transform, MigrationError> {
        self.shared
            .transforms
            .get(&job.schema_name, &job.from_version, &job.to_version)
            .ok_or_else(|| {
                MigrationError::PreValidation(format!(
                    "no transform registered for {} {} -> {}",
                    job.schema_name, job.from_version, job.to_version
                ))
            })
    }

    /// Compiled target schema when target validation is enabled
    fn target_validator(
        &self,
        job: &MigrationJob,
    ) -> std::result::Result<Option<Arc<JSONSchema>>, MigrationError> {
        if !self.shared.config.validate_against_target_schema {
            return Ok(None);
        }
        let target = self
            .shared
            .registry
            .get(&job.schema_name, &job.to_version)
            .ok_or_else(|| {
                MigrationError::PreValidation(format!("{} v{} is not published", job.schema_name, job.to_version))
            })?;
        let compiled = JSONSchema::compile(&target.content)
            .map_err(|e| MigrationError::PreValidation(format!("target schema does not compile: {}", e)))?;
        Ok(Some(Arc::new(compiled)))
    }
}

fn structures(job: &MigrationJob) -> std::result::Result<(StructureId, StructureId), MigrationError> {
    match (&job.original, &job.shadow) {
        (Some(original), Some(shadow)) => Ok((original.clone(), shadow.clone())),
        _ => Err(MigrationError::Store(
            "job has no source or shadow structure".to_string(),
        )),
    }
}

fn migrate_record(
    record: &Record,
    transform: &Transform,
    validator: Option<&JSONSchema>,
    batch: u64,
) -> std::result::Result<serde_json::Value, MigrationError> {
    let value = transform
        .apply(&record.value)
        .map_err(|e| MigrationError::BatchTransform {
            batch,
            key: record.key.clone(),
            message: e.to_string(),
        })?;
    transform
        .validate(&value)
        .map_err(|e| MigrationError::BatchValidation {
            batch,
            key: record.key.clone(),
            message: e.to_string(),
        })?;
    if let Some(validator) = validator {
        if let Err(mut errors) = validator.validate(&value) {
            let message = errors
                .next()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "does not match target schema".to_string());
            return Err(MigrationError::BatchValidation {
                batch,
                key: record.key.clone(),
                message,
            });
        }
    }
    Ok(value)
}

fn render_diff(expected: &serde_json::Value, actual: &serde_json::Value) -> String {
    let expected = serde_json::to_string_pretty(expected).unwrap_or_default();
    let actual = serde_json::to_string_pretty(actual).unwrap_or_default();
    TextDiff::from_lines(&expected, &actual)
        .unified_diff()
        .header("expected", "stored")
        .to_string()
}
