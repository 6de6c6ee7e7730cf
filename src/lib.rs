//! Schema Lifecycle
//!
//! The version-lifecycle engine of a JSON Schema registry. It decides how a
//! named schema may evolve and moves stored data along when it does.
//!
//! ## Features
//!
//! - **Semantic Versioning**: ordered versions with prerelease labels and range matching
//! - **Change Analysis**: structural diff with per-change severity and a suggested bump
//! - **Compatibility Enforcement**: BACKWARD, FORWARD, FULL (and transitive) contracts
//! - **Immutable Registry**: append-only versions guarded by checksums and compare-and-swap
//! - **Data Migration**: phased, checkpointed batch migration with rollback
//!
//! ## Architecture
//!
//! ```text
//! publish ──► VersionPublisher ──► ChangeAnalyzer ──► CompatibilityValidator
//!                    │
//!                    └──► VersionRegistry (CAS commit) ──► PublishEvent
//!
//! migrate ──► MigrationExecutor ──► TransformRegistry
//!                    │
//!                    ├──► MigrationStore (batches, shadow, dual-write, swap)
//!                    └──► CheckpointStore (job records, cursors)
//! ```

pub mod analyzer;
pub mod checksum;
pub mod compatibility;
pub mod config;
pub mod error;
pub mod migration;
pub mod publisher;
pub mod registry;
pub mod schema;
pub mod version;

pub use analyzer::{AnalysisResult, ChangeAnalyzer, ChangeType, SchemaChange, Severity};
pub use checksum::Checksum;
pub use compatibility::{CompatibilityValidator, Direction, Violation};
pub use config::{LifecycleConfig, MigrationConfig};
pub use error::{MigrationError, Result, SchemaError};
pub use migration::{
    JobId, JobProgress, JobStatus, MigrationExecutor, MigrationJob, MigrationRequest, Phase,
};
pub use publisher::{PublishEvent, PublishRequest, VersionPublisher};
pub use registry::VersionRegistry;
pub use schema::{CompatibilityMode, SchemaVersion};
pub use version::{BumpType, Version};
