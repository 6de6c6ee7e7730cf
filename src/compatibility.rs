//! Compatibility mode enforcement
//!
//! Checks an analyzed change list against the schema's declared
//! compatibility mode:
//!
//! - BACKWARD: the new schema must read data written with the old one
//! - FORWARD: the old schema must read data written with the new one
//! - FULL: both directions
//! - NONE: no guarantee, never violated
//!
//! Transitive modes use the same rules; the publisher applies them to every
//! prior version instead of only the latest.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analyzer::{ChangeType, SchemaChange};
use crate::schema::CompatibilityMode;

/// Direction of data exchange a change breaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// New readers, old data
    Backward,
    /// Old readers, new data
    Forward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Backward => write!(f, "BACKWARD"),
            Direction::Forward => write!(f, "FORWARD"),
        }
    }
}

/// A change that breaks the declared compatibility contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub change: SchemaChange,
    pub mode: CompatibilityMode,
    pub direction: Direction,
    /// Version the change was measured against (set for transitive checks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub against_version: Option<String>,
    pub message: String,
}

/// Change types that stop a new reader from reading old data
pub fn breaks_backward(change_type: ChangeType) -> bool {
    matches!(
        change_type,
        ChangeType::FieldRemoved
            | ChangeType::RequiredFieldAdded
            | ChangeType::TypeChanged
            | ChangeType::MadeRequired
    )
}

/// Change types that stop an old reader from reading new data
pub fn breaks_forward(change_type: ChangeType) -> bool {
    matches!(
        change_type,
        ChangeType::OptionalFieldAdded | ChangeType::EnumValueAdded
    )
}

/// Validates change lists against compatibility modes
#[derive(Debug, Clone, Copy, Default)]
pub struct CompatibilityValidator;

impl CompatibilityValidator {
    pub fn new() -> Self {
        Self
    }

    /// Collect every violation of `mode` in `changes`, in change order
    pub fn validate(&self, changes: &[SchemaChange], mode: CompatibilityMode) -> Vec<Violation> {
        let mut violations = Vec::new();
        for change in changes {
            if mode.is_backward() && breaks_backward(change.change_type) {
                violations.push(Violation {
                    change: change.clone(),
                    mode,
                    direction: Direction::Backward,
                    against_version: None,
                    message: format!(
                        "{} at {} prevents the new schema from reading existing data",
                        change.change_type, change.path
                    ),
                });
            }
            if mode.is_forward() && breaks_forward(change.change_type) {
                violations.push(Violation {
                    change: change.clone(),
                    mode,
                    direction: Direction::Forward,
                    against_version: None,
                    message: format!(
                        "{} at {} produces data that readers of the previous version do not expect",
                        change.change_type, change.path
                    ),
                });
            }
        }
        violations
    }

    /// Like [`validate`](Self::validate), tagging each violation with the
    /// version the changes were measured against
    pub fn validate_against(
        &self,
        changes: &[SchemaChange],
        mode: CompatibilityMode,
        against_version: &str,
    ) -> Vec<Violation> {
        self.validate(changes, mode)
            .into_iter()
            .map(|mut v| {
                v.against_version = Some(against_version.to_string());
                v
            })
            .collect()
    }

    pub fn is_compatible(&self, changes: &[SchemaChange], mode: CompatibilityMode) -> bool {
        self.validate(changes, mode).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(change_type: ChangeType) -> SchemaChange {
        SchemaChange::new(change_type, "$.properties.x", None, None, "test change")
    }

    #[test]
    fn test_backward_rejects_field_removal() {
        let changes = vec![change(ChangeType::FieldRemoved)];
        let violations = CompatibilityValidator::new().validate(&changes, CompatibilityMode::Backward);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].direction, Direction::Backward);
        assert_eq!(violations[0].mode, CompatibilityMode::Backward);
    }

    #[test]
    fn test_backward_allows_additive_changes() {
        let changes = vec![
            change(ChangeType::OptionalFieldAdded),
            change(ChangeType::EnumValueAdded),
            change(ChangeType::MadeOptional),
        ];
        assert!(CompatibilityValidator::new().is_compatible(&changes, CompatibilityMode::Backward));
    }

    #[test]
    fn test_forward_rejects_new_values() {
        let changes = vec![change(ChangeType::OptionalFieldAdded), change(ChangeType::EnumValueAdded)];
        let violations = CompatibilityValidator::new().validate(&changes, CompatibilityMode::Forward);
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(|v| v.direction == Direction::Forward));
    }

    #[test]
    fn test_full_is_union() {
        let changes = vec![
            change(ChangeType::TypeChanged),
            change(ChangeType::EnumValueAdded),
            change(ChangeType::MetadataChanged),
        ];
        let violations = CompatibilityValidator::new().validate(&changes, CompatibilityMode::Full);
        let directions: Vec<_> = violations.iter().map(|v| v.direction).collect();
        assert_eq!(directions, vec![Direction::Backward, Direction::Forward]);
    }

    #[test]
    fn test_none_never_violated() {
        let changes: Vec<_> = [
            ChangeType::FieldRemoved,
            ChangeType::RequiredFieldAdded,
            ChangeType::TypeChanged,
            ChangeType::OptionalFieldAdded,
        ]
        .into_iter()
        .map(change)
        .collect();
        assert!(CompatibilityValidator::new().validate(&changes, CompatibilityMode::None).is_empty());
    }

    #[test]
    fn test_transitive_tags_version() {
        let changes = vec![change(ChangeType::MadeRequired)];
        let violations = CompatibilityValidator::new().validate_against(
            &changes,
            CompatibilityMode::BackwardTransitive,
            "1.0.0",
        );
        assert_eq!(violations[0].against_version.as_deref(), Some("1.0.0"));
    }
}
