//! Published schema version records and compatibility modes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::analyzer::SchemaChange;
use crate::checksum::Checksum;
use crate::error::SchemaError;
use crate::version::Version;

/// Declared direction(s) of cross-version data exchange that must keep working
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    /// New schema can read data written with the latest version
    #[default]
    Backward,
    /// New schema can read data written with every prior version
    BackwardTransitive,
    /// Latest version can read data written with the new schema
    Forward,
    /// Every prior version can read data written with the new schema
    ForwardTransitive,
    /// Backward and forward against the latest version
    Full,
    /// Backward and forward against every prior version
    FullTransitive,
    /// No guarantee
    None,
}

impl CompatibilityMode {
    pub fn is_backward(&self) -> bool {
        matches!(
            self,
            Self::Backward | Self::BackwardTransitive | Self::Full | Self::FullTransitive
        )
    }

    pub fn is_forward(&self) -> bool {
        matches!(
            self,
            Self::Forward | Self::ForwardTransitive | Self::Full | Self::FullTransitive
        )
    }

    /// Transitive modes are checked against all prior versions
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            Self::BackwardTransitive | Self::ForwardTransitive | Self::FullTransitive
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backward => "BACKWARD",
            Self::BackwardTransitive => "BACKWARD_TRANSITIVE",
            Self::Forward => "FORWARD",
            Self::ForwardTransitive => "FORWARD_TRANSITIVE",
            Self::Full => "FULL",
            Self::FullTransitive => "FULL_TRANSITIVE",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityMode {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "BACKWARD" => Ok(Self::Backward),
            "BACKWARD_TRANSITIVE" => Ok(Self::BackwardTransitive),
            "FORWARD" => Ok(Self::Forward),
            "FORWARD_TRANSITIVE" => Ok(Self::ForwardTransitive),
            "FULL" => Ok(Self::Full),
            "FULL_TRANSITIVE" => Ok(Self::FullTransitive),
            "NONE" => Ok(Self::None),
            other => Err(SchemaError::InvalidSchema(format!(
                "unknown compatibility mode '{}'",
                other
            ))),
        }
    }
}

/// A published, immutable version of a named schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Name of the schema (e.g., "payment")
    pub schema_name: String,
    /// Version tuple
    pub version: Version,
    /// The JSON Schema document
    pub content: serde_json::Value,
    /// SHA256 checksum of the content
    pub checksum: Checksum,
    /// Compatibility contract declared at publish time
    pub compatibility_mode: CompatibilityMode,
    /// Changes relative to the predecessor (empty for the first version)
    #[serde(default)]
    pub changes: Vec<SchemaChange>,
    pub published_at: DateTime<Utc>,
    pub published_by: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_reason: Option<String>,
}

impl SchemaVersion {
    /// Create a new version record
    pub fn new(
        schema_name: impl Into<String>,
        version: Version,
        content: serde_json::Value,
        compatibility_mode: CompatibilityMode,
    ) -> Self {
        let checksum = Checksum::from_json(&content);
        Self {
            schema_name: schema_name.into(),
            version,
            content,
            checksum,
            compatibility_mode,
            changes: Vec::new(),
            published_at: Utc::now(),
            published_by: None,
            deprecated: false,
            deprecated_reason: None,
        }
    }

    pub fn with_changes(mut self, changes: Vec<SchemaChange>) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_publisher(mut self, published_by: Option<String>) -> Self {
        self.published_by = published_by;
        self
    }

    /// Verify the checksum matches the content
    pub fn verify_checksum(&self) -> bool {
        self.checksum.verify_json(&self.content)
    }

    /// Get a unique key for this entry
    pub fn key(&self) -> String {
        format!("{}/{}", self.schema_name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_directions() {
        assert!(CompatibilityMode::Full.is_backward() && CompatibilityMode::Full.is_forward());
        assert!(!CompatibilityMode::Backward.is_forward());
        assert!(!CompatibilityMode::None.is_backward() && !CompatibilityMode::None.is_forward());
        assert!(CompatibilityMode::ForwardTransitive.is_transitive());
        assert_eq!("full_transitive".parse::<CompatibilityMode>().unwrap(), CompatibilityMode::FullTransitive);
    }

    #[test]
    fn test_record_roundtrip_keeps_checksum_valid() {
        let record = SchemaVersion::new(
            "payment",
            Version::initial(),
            json!({"type": "object", "properties": {"id": {"type": "string"}}}),
            CompatibilityMode::Backward,
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: SchemaVersion = serde_json::from_str(&json).unwrap();
        assert!(back.verify_checksum());
        assert_eq!(back.key(), "payment/1.0.0");
        assert_eq!(back.checksum, record.checksum);
    }
}
