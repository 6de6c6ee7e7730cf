//! Error types for the schema lifecycle engine
//!
//! Publish-time errors are returned synchronously and carry enough structured
//! detail (change list, required bump, violations) for the caller to correct
//! the request. Migration-time errors are recorded on the job instead of being
//! thrown back to the caller.

use thiserror::Error;

use crate::analyzer::SchemaChange;
use crate::compatibility::Violation;
use crate::migration::JobId;
use crate::schema::CompatibilityMode;
use crate::version::BumpType;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Registry and publish errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Malformed version: {0}")]
    MalformedVersion(String),

    #[error("Invalid version range: {0}")]
    InvalidRange(String),

    #[error("Insufficient version bump for {schema_name}: declared {declared}, changes require {required}")]
    InsufficientVersionBump {
        schema_name: String,
        declared: BumpType,
        required: BumpType,
        changes: Vec<SchemaChange>,
    },

    #[error("Compatibility violation for {schema_name} under {mode}: {} violation(s)", .violations.len())]
    CompatibilityViolation {
        schema_name: String,
        mode: CompatibilityMode,
        violations: Vec<Violation>,
        changes: Vec<SchemaChange>,
    },

    #[error("Schema version already exists: {name} version {version}")]
    VersionAlreadyExists { name: String, version: String },

    #[error("Version {attempted} of {name} does not follow latest version {latest}")]
    VersionNotMonotonic {
        name: String,
        latest: String,
        attempted: String,
    },

    #[error("Concurrent publish to {name}: expected latest {expected:?}, found {actual:?}")]
    ConcurrentPublish {
        name: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("Schema not found: {name} version {version}")]
    NotFound { name: String, version: String },

    #[error("Checksum mismatch for {name} v{version}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        version: String,
        expected: String,
        actual: String,
    },

    #[error("Schema immutability violation: cannot modify existing schema {name} v{version}")]
    ImmutabilityViolation { name: String, version: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Migration already running for {schema_name}: job {job_id}")]
    MigrationInProgress { schema_name: String, job_id: JobId },

    #[error("Unresolved migration for {schema_name}: job {job_id} is {status}")]
    UnresolvedMigration {
        schema_name: String,
        job_id: JobId,
        status: String,
    },

    #[error("No transform registered for {schema_name} {from} -> {to}")]
    TransformNotRegistered {
        schema_name: String,
        from: String,
        to: String,
    },

    #[error("Migration job not found: {0}")]
    JobNotFound(JobId),

    #[error("Migration job {job_id} cannot be {action} while {status}")]
    InvalidJobState {
        job_id: JobId,
        action: &'static str,
        status: String,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl SchemaError {
    /// Stable error code for callers that branch on the failure kind
    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::MalformedVersion(_) => "MALFORMED_VERSION",
            SchemaError::InvalidRange(_) => "INVALID_RANGE",
            SchemaError::InsufficientVersionBump { .. } => "INSUFFICIENT_VERSION_BUMP",
            SchemaError::CompatibilityViolation { .. } => "COMPATIBILITY_VIOLATION",
            SchemaError::VersionAlreadyExists { .. } => "VERSION_ALREADY_EXISTS",
            SchemaError::VersionNotMonotonic { .. } => "VERSION_NOT_MONOTONIC",
            SchemaError::ConcurrentPublish { .. } => "CONCURRENT_PUBLISH",
            SchemaError::NotFound { .. } => "NOT_FOUND",
            SchemaError::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            SchemaError::ImmutabilityViolation { .. } => "IMMUTABILITY_VIOLATION",
            SchemaError::InvalidSchema(_) => "INVALID_SCHEMA",
            SchemaError::MigrationInProgress { .. } => "MIGRATION_IN_PROGRESS",
            SchemaError::UnresolvedMigration { .. } => "UNRESOLVED_MIGRATION",
            SchemaError::TransformNotRegistered { .. } => "TRANSFORM_NOT_REGISTERED",
            SchemaError::JobNotFound(_) => "JOB_NOT_FOUND",
            SchemaError::InvalidJobState { .. } => "INVALID_JOB_STATE",
            SchemaError::Checkpoint(_) => "CHECKPOINT_ERROR",
            SchemaError::Io(_) => "IO_ERROR",
            SchemaError::Json(_) => "JSON_ERROR",
            SchemaError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Changes attached to a rejected publish, if any
    pub fn changes(&self) -> &[SchemaChange] {
        match self {
            SchemaError::InsufficientVersionBump { changes, .. }
            | SchemaError::CompatibilityViolation { changes, .. } => changes,
            _ => &[],
        }
    }

    /// Per-change recommendations for a rejected publish
    pub fn recommendations(&self) -> Vec<String> {
        self.changes()
            .iter()
            .filter_map(|c| {
                c.recommendation
                    .as_ref()
                    .map(|r| format!("{}: {}", c.path, r))
            })
            .collect()
    }
}

/// Failures recorded on a migration job
#[derive(Error, Debug, Clone)]
pub enum MigrationError {
    #[error("Pre-validation failed: {0}")]
    PreValidation(String),

    #[error("Shadow setup failed: {0}")]
    ShadowSetup(String),

    #[error("Transform failed in batch {batch} for record {key}: {message}")]
    BatchTransform {
        batch: u64,
        key: String,
        message: String,
    },

    #[error("Validation failed in batch {batch} for record {key}: {message}")]
    BatchValidation {
        batch: u64,
        key: String,
        message: String,
    },

    #[error("Cutover failed: {0}")]
    Cutover(String),

    #[error("Post-validation mismatch: {0}")]
    PostValidationMismatch(String),

    #[error("Rollback failed: {0}")]
    RollbackFailure(String),

    #[error("Migration cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

impl MigrationError {
    /// Stable error code stored on the job record
    pub fn code(&self) -> &'static str {
        match self {
            MigrationError::PreValidation(_) => "PRE_VALIDATION_FAILURE",
            MigrationError::ShadowSetup(_) => "SHADOW_SETUP_FAILURE",
            MigrationError::BatchTransform { .. } => "BATCH_TRANSFORM_ERROR",
            MigrationError::BatchValidation { .. } => "BATCH_VALIDATION_ERROR",
            MigrationError::Cutover(_) => "CUTOVER_FAILURE",
            MigrationError::PostValidationMismatch(_) => "POST_VALIDATION_MISMATCH",
            MigrationError::RollbackFailure(_) => "ROLLBACK_FAILURE",
            MigrationError::Cancelled => "CANCELLED",
            MigrationError::Store(_) => "STORE_ERROR",
            MigrationError::Checkpoint(_) => "CHECKPOINT_ERROR",
        }
    }

    /// Batch-level failures are retried before escalating to the job
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MigrationError::BatchTransform { .. }
                | MigrationError::BatchValidation { .. }
                | MigrationError::Store(_)
        )
    }
}

impl From<crate::migration::StoreError> for MigrationError {
    fn from(err: crate::migration::StoreError) -> Self {
        MigrationError::Store(err.to_string())
    }
}
