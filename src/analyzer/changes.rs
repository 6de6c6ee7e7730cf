//! Change records produced by the analyzer

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::version::BumpType;

/// How disruptive a change is to existing consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Patch,
    Minor,
    Major,
    Critical,
}

impl Severity {
    /// Smallest version bump that may carry a change of this severity
    pub fn required_bump(&self) -> BumpType {
        match self {
            Severity::Critical | Severity::Major => BumpType::Major,
            Severity::Minor => BumpType::Minor,
            Severity::Patch => BumpType::Patch,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Patch => write!(f, "PATCH"),
            Severity::Minor => write!(f, "MINOR"),
            Severity::Major => write!(f, "MAJOR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Type of schema change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// A property was removed
    FieldRemoved,
    /// A new property was added and listed as required
    RequiredFieldAdded,
    /// A new optional property was added
    OptionalFieldAdded,
    /// A node's type (or `$ref` target) changed
    TypeChanged,
    /// An existing property became required
    MadeRequired,
    /// An existing property became optional
    MadeOptional,
    EnumValueAdded,
    EnumValueRemoved,
    /// A bound was introduced or narrowed
    ConstraintTightened,
    /// A bound was dropped or widened
    ConstraintRelaxed,
    FormatAdded,
    FormatChanged,
    FormatRemoved,
    PatternAdded,
    PatternRemoved,
    /// Pattern replaced; severity depends on the sampled strictness verdict
    PatternChanged,
    AdditionalPropertiesRestricted,
    AdditionalPropertiesAllowed,
    DefaultChanged,
    /// Title, description, examples, comments, deprecation hints
    MetadataChanged,
}

impl ChangeType {
    /// Severity for change types whose classification is fixed
    pub fn default_severity(&self) -> Severity {
        match self {
            ChangeType::FieldRemoved | ChangeType::RequiredFieldAdded | ChangeType::TypeChanged => {
                Severity::Critical
            }
            ChangeType::MadeRequired
            | ChangeType::EnumValueRemoved
            | ChangeType::ConstraintTightened
            | ChangeType::FormatAdded
            | ChangeType::FormatChanged
            | ChangeType::PatternAdded
            | ChangeType::PatternChanged
            | ChangeType::AdditionalPropertiesRestricted => Severity::Major,
            ChangeType::OptionalFieldAdded
            | ChangeType::MadeOptional
            | ChangeType::EnumValueAdded
            | ChangeType::ConstraintRelaxed
            | ChangeType::FormatRemoved
            | ChangeType::PatternRemoved
            | ChangeType::AdditionalPropertiesAllowed => Severity::Minor,
            ChangeType::DefaultChanged | ChangeType::MetadataChanged => Severity::Patch,
        }
    }

    /// Advice attached to the change when the caller has to act on it
    pub fn recommendation(&self) -> Option<&'static str> {
        match self {
            ChangeType::FieldRemoved => Some(
                "Deprecate the field for at least one minor release before removing it, \
                 and register a transform that drops it from stored records",
            ),
            ChangeType::RequiredFieldAdded => Some(
                "Add the field as optional with a default first, backfill existing records, \
                 then make it required in a major release",
            ),
            ChangeType::TypeChanged => Some(
                "Introduce a new field with the new type and migrate readers instead of \
                 changing the type in place",
            ),
            ChangeType::MadeRequired => Some(
                "Backfill the field in stored records with a migration before requiring it",
            ),
            ChangeType::EnumValueRemoved => Some(
                "Map stored records holding the removed value to a surviving value in a transform",
            ),
            ChangeType::EnumValueAdded => Some(
                "Make sure older readers tolerate unknown enum values before publishing",
            ),
            ChangeType::ConstraintTightened
            | ChangeType::FormatAdded
            | ChangeType::FormatChanged
            | ChangeType::PatternAdded
            | ChangeType::PatternChanged
            | ChangeType::AdditionalPropertiesRestricted => Some(
                "Existing records may no longer validate; run a migration with a validating \
                 transform or relax the constraint",
            ),
            ChangeType::OptionalFieldAdded => Some(
                "Older readers must ignore unknown fields; declare FORWARD only if they do",
            ),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde spelling so logs and payloads agree
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&name)
    }
}

/// A detected change between two schema versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChange {
    /// Type of change
    pub change_type: ChangeType,
    /// Path to the changed element (e.g., "$.properties.amount")
    pub path: String,
    pub severity: Severity,
    /// Old value (if applicable)
    pub old_value: Option<serde_json::Value>,
    /// New value (if applicable)
    pub new_value: Option<serde_json::Value>,
    /// Human-readable description
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl SchemaChange {
    /// Build a change with the type's default severity and recommendation
    pub fn new(
        change_type: ChangeType,
        path: impl Into<String>,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            change_type,
            path: path.into(),
            severity: change_type.default_severity(),
            old_value,
            new_value,
            description: description.into(),
            recommendation: change_type.recommendation().map(String::from),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Whether consumers of the previous version can break
    pub fn is_breaking(&self) -> bool {
        self.severity >= Severity::Major
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} at {}: {}", self.severity, self.change_type, self.path, self.description)
    }
}
