//! Storage collaborator contract
//!
//! The executor never touches data directly. Everything it needs from the
//! backing store is expressed by [`MigrationStore`]: batched transactional
//! reads and writes, creation of a parallel (shadow) structure, a dual-write
//! capture of concurrent changes, and an atomic swap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::version::Version;

/// Identifier of a physical structure (table, collection, keyspace...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructureId(String);

impl StructureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: Value,
}

impl Record {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Structure not found: {0}")]
    StructureNotFound(StructureId),

    #[error("No primary structure for schema {0}")]
    SchemaNotFound(String),

    #[error("Schema {0} is locked for exclusive writes")]
    Locked(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Data access the migration executor depends on
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Structure currently serving reads and writes for the schema
    async fn primary(&self, schema_name: &str) -> StoreResult<StructureId>;

    /// Number of records in a structure
    async fn count(&self, structure: &StructureId) -> StoreResult<u64>;

    /// Up to `limit` records whose keys sort strictly after `after`, in key
    /// order. `None` reads from the first key.
    async fn read_batch(
        &self,
        structure: &StructureId,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Record>>;

    async fn get(&self, structure: &StructureId, key: &str) -> StoreResult<Option<Record>>;

    /// Upsert all records in one transaction
    async fn write_batch(&self, structure: &StructureId, records: Vec<Record>) -> StoreResult<()>;

    /// Create an empty structure shaped for the target version
    async fn create_shadow(&self, schema_name: &str, target: &Version) -> StoreResult<StructureId>;

    /// Start capturing writes to the schema's primary for replay into `shadow`
    async fn install_dual_write(&self, schema_name: &str, shadow: &StructureId) -> StoreResult<()>;

    /// Current primary records for every key written since capture began
    /// (or since the last drain)
    async fn drain_dual_writes(&self, schema_name: &str) -> StoreResult<Vec<Record>>;

    async fn remove_dual_write(&self, schema_name: &str) -> StoreResult<()>;

    /// Block application writes to the schema
    async fn begin_exclusive(&self, schema_name: &str) -> StoreResult<()>;

    async fn end_exclusive(&self, schema_name: &str) -> StoreResult<()>;

    /// Atomically make `shadow` the primary; returns the structure it replaced
    async fn swap(&self, schema_name: &str, shadow: &StructureId) -> StoreResult<StructureId>;

    /// Restore `original` as primary
    async fn swap_back(&self, schema_name: &str, original: &StructureId) -> StoreResult<()>;

    async fn drop_structure(&self, structure: &StructureId) -> StoreResult<()>;

    /// Keep a no-longer-primary structure until `retain_until`, then remove it
    async fn retire_structure(
        &self,
        structure: &StructureId,
        retain_until: DateTime<Utc>,
    ) -> StoreResult<()>;
}
