//! In-memory migration store for testing and embedding

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;

use super::store::{MigrationStore, Record, StoreError, StoreResult, StructureId};
use crate::checksum::Checksum;
use crate::version::Version;

struct DualWrite {
    shadow: StructureId,
    captured: BTreeSet<String>,
}

#[derive(Default)]
struct Inner {
    primaries: HashMap<String, StructureId>,
    structures: HashMap<StructureId, BTreeMap<String, Value>>,
    dual_writes: HashMap<String, DualWrite>,
    exclusive: HashSet<String>,
    retired: HashMap<StructureId, DateTime<Utc>>,
    next_shadow: u64,
}

impl Inner {
    fn structure(&self, id: &StructureId) -> StoreResult<&BTreeMap<String, Value>> {
        self.structures
            .get(id)
            .ok_or_else(|| StoreError::StructureNotFound(id.clone()))
    }

    fn primary(&self, schema_name: &str) -> StoreResult<&StructureId> {
        self.primaries
            .get(schema_name)
            .ok_or_else(|| StoreError::SchemaNotFound(schema_name.to_string()))
    }
}

/// Record store held in memory, keyed and ordered by record key
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a schema whose primary structure holds `records`
    pub fn seed(&self, schema_name: &str, records: impl IntoIterator<Item = Record>) {
        let mut inner = self.inner.lock();
        let id = StructureId::new(schema_name);
        let data = records.into_iter().map(|r| (r.key, r.value)).collect();
        inner.structures.insert(id.clone(), data);
        inner.primaries.insert(schema_name.to_string(), id);
    }

    /// Application write to the schema's primary structure
    pub fn insert(&self, schema_name: &str, record: Record) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.exclusive.contains(schema_name) {
            return Err(StoreError::Locked(schema_name.to_string()));
        }
        let primary = inner.primary(schema_name)?.clone();
        if let Some(dual) = inner.dual_writes.get_mut(schema_name) {
            dual.captured.insert(record.key.clone());
        }
        inner
            .structures
            .entry(primary)
            .or_default()
            .insert(record.key, record.value);
        Ok(())
    }

    /// Records of the schema's primary structure, in key order
    pub fn records(&self, schema_name: &str) -> StoreResult<Vec<Record>> {
        let inner = self.inner.lock();
        let primary = inner.primary(schema_name)?;
        Ok(inner
            .structure(primary)?
            .iter()
            .map(|(k, v)| Record::new(k.clone(), v.clone()))
            .collect())
    }

    /// Checksum of the schema's primary data
    pub fn fingerprint(&self, schema_name: &str) -> StoreResult<Checksum> {
        let inner = self.inner.lock();
        let primary = inner.primary(schema_name)?;
        let data = inner.structure(primary)?;
        Ok(Checksum::from_records(data.iter().map(|(k, v)| (k.as_str(), v))))
    }

    pub fn primary_id(&self, schema_name: &str) -> Option<StructureId> {
        self.inner.lock().primaries.get(schema_name).cloned()
    }

    pub fn structure_exists(&self, id: &StructureId) -> bool {
        self.inner.lock().structures.contains_key(id)
    }

    pub fn has_dual_write(&self, schema_name: &str) -> bool {
        self.inner.lock().dual_writes.contains_key(schema_name)
    }

    pub fn retained_until(&self, id: &StructureId) -> Option<DateTime<Utc>> {
        self.inner.lock().retired.get(id).copied()
    }

    /// Physically remove retired structures whose retention has passed
    pub fn purge_retired(&self, now: DateTime<Utc>) -> Vec<StructureId> {
        let mut inner = self.inner.lock();
        let expired: Vec<StructureId> = inner
            .retired
            .iter()
            .filter(|(_, until)| **until <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.retired.remove(id);
            inner.structures.remove(id);
        }
        expired
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn primary(&self, schema_name: &str) -> StoreResult<StructureId> {
        self.inner.lock().primary(schema_name).cloned()
    }

    async fn count(&self, structure: &StructureId) -> StoreResult<u64> {
        Ok(self.inner.lock().structure(structure)?.len() as u64)
    }

    async fn read_batch(
        &self,
        structure: &StructureId,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Record>> {
        let inner = self.inner.lock();
        let data = inner.structure(structure)?;
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        Ok(data
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(k, v)| Record::new(k.clone(), v.clone()))
            .collect())
    }

    async fn get(&self, structure: &StructureId, key: &str) -> StoreResult<Option<Record>> {
        let inner = self.inner.lock();
        Ok(inner
            .structure(structure)?
            .get(key)
            .map(|v| Record::new(key, v.clone())))
    }

    async fn write_batch(&self, structure: &StructureId, records: Vec<Record>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let data = inner
            .structures
            .get_mut(structure)
            .ok_or_else(|| StoreError::StructureNotFound(structure.clone()))?;
        for record in records {
            data.insert(record.key, record.value);
        }
        Ok(())
    }

    async fn create_shadow(&self, schema_name: &str, target: &Version) -> StoreResult<StructureId> {
        let mut inner = self.inner.lock();
        inner.primary(schema_name)?;
        inner.next_shadow += 1;
        let id = StructureId::new(format!(
            "{}__{}__shadow{}",
            schema_name,
            target.tag_string(),
            inner.next_shadow
        ));
        inner.structures.insert(id.clone(), BTreeMap::new());
        Ok(id)
    }

    async fn install_dual_write(&self, schema_name: &str, shadow: &StructureId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.structure(shadow)?;
        match inner.dual_writes.get(schema_name) {
            Some(existing) if &existing.shadow == shadow => Ok(()),
            Some(existing) => Err(StoreError::Conflict(format!(
                "dual-write for {} already targets {}",
                schema_name, existing.shadow
            ))),
            None => {
                inner.dual_writes.insert(
                    schema_name.to_string(),
                    DualWrite {
                        shadow: shadow.clone(),
                        captured: BTreeSet::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn drain_dual_writes(&self, schema_name: &str) -> StoreResult<Vec<Record>> {
        let mut inner = self.inner.lock();
        let keys = match inner.dual_writes.get_mut(schema_name) {
            Some(dual) => std::mem::take(&mut dual.captured),
            None => return Ok(Vec::new()),
        };
        let primary = inner.primary(schema_name)?;
        let data = inner.structure(primary)?;
        Ok(keys
            .into_iter()
            .filter_map(|k| data.get(&k).map(|v| Record::new(k.clone(), v.clone())))
            .collect())
    }

    async fn remove_dual_write(&self, schema_name: &str) -> StoreResult<()> {
        self.inner.lock().dual_writes.remove(schema_name);
        Ok(())
    }

    async fn begin_exclusive(&self, schema_name: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.primary(schema_name)?;
        inner.exclusive.insert(schema_name.to_string());
        Ok(())
    }

    async fn end_exclusive(&self, schema_name: &str) -> StoreResult<()> {
        self.inner.lock().exclusive.remove(schema_name);
        Ok(())
    }

    async fn swap(&self, schema_name: &str, shadow: &StructureId) -> StoreResult<StructureId> {
        let mut inner = self.inner.lock();
        inner.structure(shadow)?;
        let previous = inner.primary(schema_name)?.clone();
        inner
            .primaries
            .insert(schema_name.to_string(), shadow.clone());
        Ok(previous)
    }

    async fn swap_back(&self, schema_name: &str, original: &StructureId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.structure(original)?;
        inner
            .primaries
            .insert(schema_name.to_string(), original.clone());
        Ok(())
    }

    async fn drop_structure(&self, structure: &StructureId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.primaries.values().any(|p| p == structure) {
            return Err(StoreError::Conflict(format!(
                "{} is a primary structure",
                structure
            )));
        }
        inner.structures.remove(structure);
        Ok(())
    }

    async fn retire_structure(
        &self,
        structure: &StructureId,
        retain_until: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.structure(structure)?;
        inner.retired.insert(structure.clone(), retain_until);
        Ok(())
    }
}
