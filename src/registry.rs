//! Version Registry
//!
//! Immutable, ordered store of published versions per schema name. Versions
//! are append-only: a version tuple is written once, and only its deprecation
//! fields may change afterwards. The "latest version" of a schema is advanced
//! with a compare-and-swap against the latest the caller analyzed.
//!
//! The registry lives in memory and can optionally be backed by a directory:
//!
//! ```text
//! registry/
//! ├── payment/
//! │   ├── v1.0.0.json
//! │   └── v1.1.0.json
//! └── customer/
//!     └── v1.0.0.json
//! ```

use dashmap::DashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Result, SchemaError};
use crate::schema::SchemaVersion;
use crate::version::Version;

/// Append-only store of published schema versions
pub struct VersionRegistry {
    /// Directory backing the registry, if persistent
    root: Option<PathBuf>,
    /// Versions per schema name, ascending
    schemas: DashMap<String, Vec<SchemaVersion>>,
}

impl VersionRegistry {
    /// Create a registry that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            root: None,
            schemas: DashMap::new(),
        }
    }

    /// Open an existing registry directory or create a new one
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let registry = Self {
            root: Some(root),
            schemas: DashMap::new(),
        };
        registry.load()?;
        Ok(registry)
    }

    /// Get the root path of the registry
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Names of all schemas with at least one version, sorted
    pub fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// All versions of a schema, ascending
    pub fn versions(&self, name: &str) -> Vec<SchemaVersion> {
        self.schemas
            .get(name)
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }

    /// Get the latest version (prereleases included)
    pub fn latest(&self, name: &str) -> Option<SchemaVersion> {
        self.schemas.get(name).and_then(|v| v.last().cloned())
    }

    /// Get the latest non-prerelease version
    pub fn latest_release(&self, name: &str) -> Option<SchemaVersion> {
        self.schemas
            .get(name)
            .and_then(|v| v.iter().rev().find(|s| !s.version.is_prerelease()).cloned())
    }

    /// Get a specific version
    pub fn get(&self, name: &str, version: &Version) -> Option<SchemaVersion> {
        self.schemas
            .get(name)
            .and_then(|v| v.iter().find(|s| &s.version == version).cloned())
    }

    pub fn contains(&self, name: &str, version: &Version) -> bool {
        self.schemas
            .get(name)
            .map(|v| v.iter().any(|s| &s.version == version))
            .unwrap_or(false)
    }

    /// Highest version satisfying a range expression (e.g. "^1.2.0")
    pub fn resolve(&self, name: &str, range: &str) -> Result<Option<SchemaVersion>> {
        let versions = self.versions(name);
        for candidate in versions.into_iter().rev() {
            if candidate.version.satisfies(range)? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Append a version if the schema's latest is still `expected_latest`
    ///
    /// This is the only way versions enter the registry. It rejects duplicate
    /// tuples, stale expectations, versions that do not follow the latest, and
    /// records whose checksum does not match their content.
    pub fn commit(&self, record: SchemaVersion, expected_latest: Option<&Version>) -> Result<()> {
        validate_schema_name(&record.schema_name)?;
        if !record.verify_checksum() {
            return Err(SchemaError::ChecksumMismatch {
                name: record.schema_name.clone(),
                version: record.version.to_string(),
                expected: record.checksum.to_string(),
                actual: crate::checksum::Checksum::from_json(&record.content).to_string(),
            });
        }

        // Holding the entry locks this schema name until the append completes
        let mut entry = self.schemas.entry(record.schema_name.clone()).or_default();
        let versions = entry.value_mut();

        if versions.iter().any(|s| s.version == record.version) {
            return Err(SchemaError::VersionAlreadyExists {
                name: record.schema_name.clone(),
                version: record.version.to_string(),
            });
        }

        let actual_latest = versions.last().map(|s| &s.version);
        if actual_latest != expected_latest {
            return Err(SchemaError::ConcurrentPublish {
                name: record.schema_name.clone(),
                expected: expected_latest.map(Version::to_string),
                actual: actual_latest.map(Version::to_string),
            });
        }

        if let Some(latest) = actual_latest {
            if record.version <= *latest {
                return Err(SchemaError::VersionNotMonotonic {
                    name: record.schema_name.clone(),
                    latest: latest.to_string(),
                    attempted: record.version.to_string(),
                });
            }
        }

        if let Some(root) = &self.root {
            write_new(root, &record)?;
        }

        info!(schema = %record.schema_name, version = %record.version, "version committed");
        versions.push(record);
        Ok(())
    }

    /// Mark a version deprecated. The only mutation a published version allows.
    pub fn deprecate(&self, name: &str, version: &Version, reason: impl Into<String>) -> Result<SchemaVersion> {
        let mut entry = self.schemas.get_mut(name).ok_or_else(|| SchemaError::NotFound {
            name: name.to_string(),
            version: version.to_string(),
        })?;
        let record = entry
            .iter_mut()
            .find(|s| &s.version == version)
            .ok_or_else(|| SchemaError::NotFound {
                name: name.to_string(),
                version: version.to_string(),
            })?;

        let mut updated = record.clone();
        updated.deprecated = true;
        updated.deprecated_reason = Some(reason.into());

        if let Some(root) = &self.root {
            overwrite(root, &updated)?;
        }
        *record = updated.clone();
        info!(schema = %name, version = %version, "version deprecated");
        Ok(updated)
    }

    /// Verify the checksum of a stored version
    pub fn verify(&self, name: &str, version: &Version) -> Result<bool> {
        self.get(name, version)
            .map(|s| s.verify_checksum())
            .ok_or_else(|| SchemaError::NotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    /// Load all version files from disk
    fn load(&self) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };

        for entry in WalkDir::new(root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| SchemaError::Io(std::io::Error::other(e.to_string())))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = fs::read_to_string(path)?;
            let record: SchemaVersion = serde_json::from_str(&content)?;
            if !record.verify_checksum() {
                return Err(SchemaError::ChecksumMismatch {
                    name: record.schema_name.clone(),
                    version: record.version.to_string(),
                    expected: record.checksum.to_string(),
                    actual: crate::checksum::Checksum::from_json(&record.content).to_string(),
                });
            }
            // A file renamed or copied under another version claims a tuple it was not published as
            if path != version_path(root, &record) {
                return Err(SchemaError::ImmutabilityViolation {
                    name: record.schema_name.clone(),
                    version: record.version.to_string(),
                });
            }
            debug!(path = %path.display(), "loaded schema version");
            self.schemas
                .entry(record.schema_name.clone())
                .or_default()
                .push(record);
        }

        for mut versions in self.schemas.iter_mut() {
            versions.sort_by(|a, b| a.version.cmp(&b.version));
        }
        Ok(())
    }
}

/// Schema names become directory names, so keep them to a safe alphabet
pub fn validate_schema_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidSchema(format!("invalid schema name '{}'", name)))
    }
}

fn version_path(root: &Path, record: &SchemaVersion) -> PathBuf {
    root.join(&record.schema_name)
        .join(format!("{}.json", record.version.tag_string()))
}

/// Write a version file that must not exist yet
fn write_new(root: &Path, record: &SchemaVersion) -> Result<()> {
    let path = version_path(root, record);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(SchemaError::VersionAlreadyExists {
                name: record.schema_name.clone(),
                version: record.version.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(serde_json::to_string_pretty(record)?.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Replace an existing version file atomically
fn overwrite(root: &Path, record: &SchemaVersion) -> Result<()> {
    let path = version_path(root, record);
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(record)?.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CompatibilityMode;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(name: &str, version: &str) -> SchemaVersion {
        SchemaVersion::new(
            name,
            Version::parse(version).unwrap(),
            json!({"type": "object", "properties": {"id": {"type": "string"}}}),
            CompatibilityMode::Backward,
        )
    }

    #[test]
    fn test_create_registry() {
        let dir = tempdir().unwrap();
        let registry = VersionRegistry::open(dir.path()).unwrap();
        assert!(registry.schema_names().is_empty());
    }

    #[test]
    fn test_commit_and_latest() {
        let registry = VersionRegistry::in_memory();
        registry.commit(record("payment", "1.0.0"), None).unwrap();
        registry
            .commit(record("payment", "1.1.0"), Some(&Version::new(1, 0, 0)))
            .unwrap();

        assert_eq!(registry.versions("payment").len(), 2);
        assert_eq!(registry.latest("payment").unwrap().version, Version::new(1, 1, 0));
        assert!(registry.contains("payment", &Version::new(1, 0, 0)));
    }

    #[test]
    fn test_immutability() {
        let registry = VersionRegistry::in_memory();
        registry.commit(record("payment", "1.0.0"), None).unwrap();

        let err = registry
            .commit(record("payment", "1.0.0"), Some(&Version::new(1, 0, 0)))
            .unwrap_err();
        assert_eq!(err.code(), "VERSION_ALREADY_EXISTS");
    }

    #[test]
    fn test_stale_expectation_is_rejected() {
        let registry = VersionRegistry::in_memory();
        registry.commit(record("payment", "1.0.0"), None).unwrap();

        let err = registry.commit(record("payment", "1.1.0"), None).unwrap_err();
        assert_eq!(err.code(), "CONCURRENT_PUBLISH");
    }

    #[test]
    fn test_non_monotonic_is_rejected() {
        let registry = VersionRegistry::in_memory();
        registry.commit(record("payment", "2.0.0"), None).unwrap();

        let err = registry
            .commit(record("payment", "1.5.0"), Some(&Version::new(2, 0, 0)))
            .unwrap_err();
        assert_eq!(err.code(), "VERSION_NOT_MONOTONIC");
    }

    #[test]
    fn test_tampered_content_is_rejected() {
        let registry = VersionRegistry::in_memory();
        let mut tampered = record("payment", "1.0.0");
        tampered.content = json!({"type": "string"});
        assert_eq!(registry.commit(tampered, None).unwrap_err().code(), "CHECKSUM_MISMATCH");
    }

    #[test]
    fn test_deprecate_keeps_content() {
        let dir = tempdir().unwrap();
        let registry = VersionRegistry::open(dir.path()).unwrap();
        let original = record("payment", "1.0.0");
        registry.commit(original.clone(), None).unwrap();

        let deprecated = registry
            .deprecate("payment", &Version::new(1, 0, 0), "superseded by 2.x")
            .unwrap();
        assert!(deprecated.deprecated);
        assert_eq!(deprecated.content, original.content);
        assert_eq!(deprecated.checksum, original.checksum);

        let reopened = VersionRegistry::open(dir.path()).unwrap();
        let stored = reopened.get("payment", &Version::new(1, 0, 0)).unwrap();
        assert!(stored.deprecated);
        assert_eq!(stored.deprecated_reason.as_deref(), Some("superseded by 2.x"));
    }

    #[test]
    fn test_version_file_under_foreign_name_is_rejected() {
        let dir = tempdir().unwrap();
        {
            let registry = VersionRegistry::open(dir.path()).unwrap();
            registry.commit(record("payment", "1.0.0"), None).unwrap();
        }
        let published = dir.path().join("payment").join("v1.0.0.json");
        fs::copy(&published, dir.path().join("payment").join("v1.1.0.json")).unwrap();

        let err = VersionRegistry::open(dir.path()).err().unwrap();
        assert_eq!(err.code(), "IMMUTABILITY_VIOLATION");

        fs::remove_file(dir.path().join("payment").join("v1.1.0.json")).unwrap();
        assert!(VersionRegistry::open(dir.path()).is_ok());
    }

    #[test]
    fn test_reopen_restores_order() {
        let dir = tempdir().unwrap();
        {
            let registry = VersionRegistry::open(dir.path()).unwrap();
            registry.commit(record("payment", "1.9.0"), None).unwrap();
            registry
                .commit(record("payment", "1.10.0"), Some(&Version::new(1, 9, 0)))
                .unwrap();
        }
        let registry = VersionRegistry::open(dir.path()).unwrap();
        let versions: Vec<String> = registry
            .versions("payment")
            .iter()
            .map(|s| s.version.to_string())
            .collect();
        assert_eq!(versions, vec!["1.9.0", "1.10.0"]);
        assert!(registry.verify("payment", &Version::new(1, 10, 0)).unwrap());
    }

    #[test]
    fn test_resolve_range() {
        let registry = VersionRegistry::in_memory();
        registry.commit(record("payment", "1.0.0"), None).unwrap();
        registry.commit(record("payment", "1.4.0"), Some(&Version::new(1, 0, 0))).unwrap();
        registry.commit(record("payment", "2.0.0"), Some(&Version::new(1, 4, 0))).unwrap();

        let hit = registry.resolve("payment", "^1.0.0").unwrap().unwrap();
        assert_eq!(hit.version, Version::new(1, 4, 0));
        assert!(registry.resolve("payment", "^3.0.0").unwrap().is_none());
    }

    #[test]
    fn test_invalid_names() {
        for bad in ["", "../etc", "a/b", ".hidden"] {
            assert!(validate_schema_name(bad).is_err(), "{:?}", bad);
        }
        assert!(validate_schema_name("payment-v2_events.eu").is_ok());
    }
}
