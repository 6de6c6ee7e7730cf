//! Version publishing
//!
//! Orchestrates a publish: analyze the proposed content against the latest
//! version, cross-check the declared bump against the detected severity,
//! enforce the compatibility mode, then commit to the registry with a
//! compare-and-swap on the latest version. A rejected publish returns the
//! full change list so the caller can correct the request; the bump is never
//! upgraded on the caller's behalf.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::analyzer::{AnalysisResult, ChangeAnalyzer};
use crate::checksum::Checksum;
use crate::compatibility::{CompatibilityValidator, Violation};
use crate::error::{Result, SchemaError};
use crate::registry::{validate_schema_name, VersionRegistry};
use crate::schema::{CompatibilityMode, SchemaVersion};
use crate::version::{BumpType, Version};

/// Capacity of the publish event channel
const EVENT_CAPACITY: usize = 256;

/// A request to publish a new version of a schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub schema_name: String,
    pub declared_bump: BumpType,
    pub content: Value,
    #[serde(default)]
    pub compatibility_mode: CompatibilityMode,
    #[serde(default)]
    pub published_by: Option<String>,
    /// Prerelease label for the new version (e.g. "rc.1")
    #[serde(default)]
    pub prerelease: Option<String>,
}

impl PublishRequest {
    pub fn new(schema_name: impl Into<String>, declared_bump: BumpType, content: Value) -> Self {
        Self {
            schema_name: schema_name.into(),
            declared_bump,
            content,
            compatibility_mode: CompatibilityMode::default(),
            published_by: None,
            prerelease: None,
        }
    }

    pub fn with_mode(mut self, mode: CompatibilityMode) -> Self {
        self.compatibility_mode = mode;
        self
    }

    pub fn with_publisher(mut self, published_by: impl Into<String>) -> Self {
        self.published_by = Some(published_by.into());
        self
    }

    pub fn with_prerelease(mut self, label: impl Into<String>) -> Self {
        self.prerelease = Some(label.into());
        self
    }
}

/// Emitted after every successful publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEvent {
    pub schema_name: String,
    pub version: Version,
    pub previous: Option<Version>,
    pub checksum: Checksum,
    pub change_count: usize,
    pub breaking: bool,
    pub published_at: DateTime<Utc>,
    pub published_by: Option<String>,
}

/// Outcome of a dry-run analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPreview {
    /// Version the content was compared with (None for a new schema)
    pub against: Option<Version>,
    pub analysis: AnalysisResult,
    pub violations: Vec<Violation>,
}

impl PublishPreview {
    /// Whether a publish with `declared` would pass the bump and mode checks
    pub fn would_accept(&self, declared: BumpType) -> bool {
        self.analysis.suggested_bump <= declared && self.violations.is_empty()
    }
}

/// Publishes schema versions into a [`VersionRegistry`]
pub struct VersionPublisher {
    registry: Arc<VersionRegistry>,
    analyzer: ChangeAnalyzer,
    validator: CompatibilityValidator,
    /// Serializes publishes per schema name
    locks: DashMap<String, Arc<Mutex<()>>>,
    events: broadcast::Sender<PublishEvent>,
}

impl VersionPublisher {
    pub fn new(registry: Arc<VersionRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            analyzer: ChangeAnalyzer::new(),
            validator: CompatibilityValidator::new(),
            locks: DashMap::new(),
            events,
        }
    }

    pub fn with_analyzer(mut self, analyzer: ChangeAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    /// Receive an event for every successful publish
    pub fn subscribe(&self) -> broadcast::Receiver<PublishEvent> {
        self.events.subscribe()
    }

    /// Publish a new version
    #[instrument(skip(self, request), fields(schema = %request.schema_name, bump = %request.declared_bump))]
    pub fn publish(&self, request: PublishRequest) -> Result<SchemaVersion> {
        validate_schema_name(&request.schema_name)?;
        validate_content(&request.content)?;

        let lock = self.lock_for(&request.schema_name);
        let _guard = lock.lock();

        let Some(latest) = self.registry.latest(&request.schema_name) else {
            let mut version = Version::initial();
            if let Some(label) = &request.prerelease {
                version = version.with_prerelease(label)?;
            }
            let record = SchemaVersion::new(
                &request.schema_name,
                version,
                request.content,
                request.compatibility_mode,
            )
            .with_publisher(request.published_by);
            self.registry.commit(record.clone(), None)?;
            self.emit(&record, None);
            return Ok(record);
        };

        let analysis = self.analyzer.analyze(&latest.content, &request.content);
        if analysis.suggested_bump > request.declared_bump {
            warn!(
                required = %analysis.suggested_bump,
                changes = analysis.changes.len(),
                "declared bump is too small"
            );
            return Err(SchemaError::InsufficientVersionBump {
                schema_name: request.schema_name,
                declared: request.declared_bump,
                required: analysis.suggested_bump,
                changes: analysis.changes,
            });
        }

        let violations =
            self.check_compatibility(&latest, &analysis, &request.content, request.compatibility_mode);
        if !violations.is_empty() {
            warn!(
                mode = %request.compatibility_mode,
                violations = violations.len(),
                "compatibility mode violated"
            );
            return Err(SchemaError::CompatibilityViolation {
                schema_name: request.schema_name,
                mode: request.compatibility_mode,
                violations,
                changes: analysis.changes,
            });
        }

        let version = self.next_version(
            &request.schema_name,
            &latest.version,
            request.declared_bump,
            request.prerelease.as_deref(),
        )?;
        if self.registry.contains(&request.schema_name, &version) {
            return Err(SchemaError::VersionAlreadyExists {
                name: request.schema_name,
                version: version.to_string(),
            });
        }

        let record = SchemaVersion::new(
            &request.schema_name,
            version,
            request.content,
            request.compatibility_mode,
        )
        .with_changes(analysis.changes)
        .with_publisher(request.published_by);
        self.registry.commit(record.clone(), Some(&latest.version))?;

        info!(version = %record.version, previous = %latest.version, "schema published");
        self.emit(&record, Some(latest.version));
        Ok(record)
    }

    /// Analyze content against the latest version without publishing
    pub fn analyze(
        &self,
        schema_name: &str,
        content: &Value,
        mode: CompatibilityMode,
    ) -> Result<PublishPreview> {
        validate_content(content)?;
        let Some(latest) = self.registry.latest(schema_name) else {
            return Ok(PublishPreview {
                against: None,
                analysis: AnalysisResult {
                    changes: Vec::new(),
                    suggested_bump: BumpType::Patch,
                },
                violations: Vec::new(),
            });
        };
        let analysis = self.analyzer.analyze(&latest.content, content);
        let violations = self.check_compatibility(&latest, &analysis, content, mode);
        Ok(PublishPreview {
            against: Some(latest.version),
            analysis,
            violations,
        })
    }

    /// Mark a published version deprecated
    pub fn deprecate(
        &self,
        schema_name: &str,
        version: &Version,
        reason: impl Into<String>,
    ) -> Result<SchemaVersion> {
        let lock = self.lock_for(schema_name);
        let _guard = lock.lock();
        self.registry.deprecate(schema_name, version, reason)
    }

    fn lock_for(&self, schema_name: &str) -> Arc<Mutex<()>> {
        self.locks.entry(schema_name.to_string()).or_default().clone()
    }

    /// Violations against the latest version, or every prior version for
    /// transitive modes
    fn check_compatibility(
        &self,
        latest: &SchemaVersion,
        analysis: &AnalysisResult,
        content: &Value,
        mode: CompatibilityMode,
    ) -> Vec<Violation> {
        if !mode.is_transitive() {
            return self.validator.validate(&analysis.changes, mode);
        }

        let mut violations = Vec::new();
        for prior in self.registry.versions(&latest.schema_name) {
            let changes = if prior.version == latest.version {
                analysis.changes.clone()
            } else {
                self.analyzer.analyze(&prior.content, content).changes
            };
            violations.extend(self.validator.validate_against(
                &changes,
                mode,
                &prior.version.to_string(),
            ));
        }
        violations
    }

    /// Bump the latest release; a schema with only prereleases releases
    /// their core version next
    fn next_version(
        &self,
        schema_name: &str,
        latest: &Version,
        bump: BumpType,
        prerelease: Option<&str>,
    ) -> Result<Version> {
        let core = match self.registry.latest_release(schema_name) {
            Some(release) => release.version.bump(bump),
            None => latest.core(),
        };
        match prerelease {
            Some(label) => core.with_prerelease(label),
            None => Ok(core),
        }
    }

    fn emit(&self, record: &SchemaVersion, previous: Option<Version>) {
        let event = PublishEvent {
            schema_name: record.schema_name.clone(),
            version: record.version.clone(),
            previous,
            checksum: record.checksum.clone(),
            change_count: record.changes.len(),
            breaking: record.changes.iter().any(|c| c.is_breaking()),
            published_at: record.published_at,
            published_by: record.published_by.clone(),
        };
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

/// Content must be a JSON object that compiles as a JSON Schema
fn validate_content(content: &Value) -> Result<()> {
    if !content.is_object() {
        return Err(SchemaError::InvalidSchema(
            "schema content must be a JSON object".to_string(),
        ));
    }
    jsonschema::JSONSchema::compile(content)
        .map_err(|e| SchemaError::InvalidSchema(format!("Invalid JSON Schema: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn publisher() -> VersionPublisher {
        VersionPublisher::new(Arc::new(VersionRegistry::in_memory()))
    }

    fn base() -> Value {
        json!({
            "type": "object",
            "properties": {"id": {"type": "string"}},
            "required": ["id"]
        })
    }

    #[test]
    fn test_first_publish_is_initial_version() {
        let p = publisher();
        let v = p.publish(PublishRequest::new("order", BumpType::Major, base())).unwrap();
        assert_eq!(v.version, Version::new(1, 0, 0));
        assert!(v.changes.is_empty());
    }

    #[test]
    fn test_patch_for_metadata_change() {
        let p = publisher();
        p.publish(PublishRequest::new("order", BumpType::Patch, base())).unwrap();

        let mut next = base();
        next["description"] = json!("An order");
        let v = p.publish(PublishRequest::new("order", BumpType::Patch, next)).unwrap();
        assert_eq!(v.version, Version::new(1, 0, 1));
    }

    #[test]
    fn test_prerelease_then_release() {
        let p = publisher();
        p.publish(PublishRequest::new("order", BumpType::Patch, base())).unwrap();

        let mut next = base();
        next["properties"]["note"] = json!({"type": "string"});
        let rc = p
            .publish(PublishRequest::new("order", BumpType::Minor, next.clone()).with_prerelease("rc.1"))
            .unwrap();
        assert_eq!(rc.version.to_string(), "1.1.0-rc.1");

        let release = p.publish(PublishRequest::new("order", BumpType::Minor, next)).unwrap();
        assert_eq!(release.version, Version::new(1, 1, 0));
    }

    #[test]
    fn test_non_object_content_is_invalid() {
        let p = publisher();
        let err = p
            .publish(PublishRequest::new("order", BumpType::Major, json!(["not", "a", "schema"])))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SCHEMA");
    }

    #[test]
    fn test_uncompilable_schema_is_invalid() {
        let p = publisher();
        let err = p
            .publish(PublishRequest::new("order", BumpType::Major, json!({"type": 12})))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SCHEMA");
    }

    #[test]
    fn test_analyze_does_not_publish() {
        let p = publisher();
        p.publish(PublishRequest::new("order", BumpType::Major, base())).unwrap();

        let preview = p
            .analyze("order", &json!({"type": "object"}), CompatibilityMode::Backward)
            .unwrap();
        assert_eq!(preview.analysis.suggested_bump, BumpType::Major);
        assert!(!preview.violations.is_empty());
        assert!(!preview.would_accept(BumpType::Major));
        assert_eq!(p.registry().versions("order").len(), 1);
    }

    #[test]
    fn test_transitive_checks_every_prior_version() {
        let p = publisher();
        let v1 = json!({
            "type": "object",
            "properties": {"id": {"type": "string"}, "legacy": {"type": "string"}}
        });
        p.publish(PublishRequest::new("order", BumpType::Major, v1).with_mode(CompatibilityMode::None))
            .unwrap();

        // 2.0.0 drops `legacy` under NONE
        let v2 = json!({"type": "object", "properties": {"id": {"type": "string"}}});
        p.publish(PublishRequest::new("order", BumpType::Major, v2).with_mode(CompatibilityMode::None))
            .unwrap();

        // Compatible with 2.0.0 but not with 1.0.0, which still had `legacy`
        let v3 = json!({
            "type": "object",
            "properties": {"id": {"type": "string"}, "legacy": {"type": "integer"}}
        });
        let plain = p
            .analyze("order", &v3, CompatibilityMode::Backward)
            .unwrap();
        assert!(plain.violations.is_empty());

        let err = p
            .publish(
                PublishRequest::new("order", BumpType::Minor, v3)
                    .with_mode(CompatibilityMode::BackwardTransitive),
            )
            .unwrap_err();
        match err {
            SchemaError::CompatibilityViolation { violations, .. } => {
                assert!(violations.iter().all(|v| v.against_version.as_deref() == Some("1.0.0")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_publish_event_emitted() {
        let p = publisher();
        let mut rx = p.subscribe();
        p.publish(PublishRequest::new("order", BumpType::Major, base()).with_publisher("alice"))
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.schema_name, "order");
        assert_eq!(event.version, Version::new(1, 0, 0));
        assert!(event.previous.is_none());
        assert_eq!(event.published_by.as_deref(), Some("alice"));
    }
}
