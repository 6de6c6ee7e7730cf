//! Structural change analysis between two JSON Schema documents
//!
//! The analyzer walks both trees in lockstep and records every difference as a
//! typed, severity-tagged [`SchemaChange`]. Traversal order is fixed (type,
//! bounds, enum, format/pattern, additionalProperties, default, metadata, then
//! properties by sorted name, then array items) so identical inputs always
//! produce identical change lists.

mod changes;
mod pattern;

pub use changes::{ChangeType, SchemaChange, Severity};
pub use pattern::{PatternSampler, PatternSamplingConfig, PatternVerdict};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::version::BumpType;

/// Lower bounds: raising them tightens the schema
const LOWER_BOUNDS: &[&str] = &[
    "minimum",
    "exclusiveMinimum",
    "minLength",
    "minItems",
    "minProperties",
];

/// Upper bounds: lowering them tightens the schema
const UPPER_BOUNDS: &[&str] = &[
    "maximum",
    "exclusiveMaximum",
    "maxLength",
    "maxItems",
    "maxProperties",
];

/// Keywords that never affect which documents validate
const METADATA_KEYS: &[&str] = &["title", "description", "examples", "$comment", "deprecated"];

/// Result of comparing two schema versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub changes: Vec<SchemaChange>,
    pub suggested_bump: BumpType,
}

impl AnalysisResult {
    fn from_changes(changes: Vec<SchemaChange>) -> Self {
        let suggested_bump = suggest_bump(&changes);
        Self {
            changes,
            suggested_bump,
        }
    }

    pub fn is_breaking(&self) -> bool {
        self.suggested_bump == BumpType::Major
    }

    /// Highest severity present, if anything changed
    pub fn max_severity(&self) -> Option<Severity> {
        self.changes.iter().map(|c| c.severity).max()
    }

    pub fn breaking_changes(&self) -> impl Iterator<Item = &SchemaChange> {
        self.changes.iter().filter(|c| c.is_breaking())
    }
}

/// MAJOR for any critical or major change, else MINOR for any minor change,
/// else PATCH
pub fn suggest_bump(changes: &[SchemaChange]) -> BumpType {
    changes
        .iter()
        .map(|c| c.severity.required_bump())
        .max()
        .unwrap_or(BumpType::Patch)
}

/// Structural diff engine for JSON Schema
#[derive(Debug, Clone, Default)]
pub struct ChangeAnalyzer {
    sampler: PatternSampler,
}

impl ChangeAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pattern_sampling(config: PatternSamplingConfig) -> Self {
        Self {
            sampler: PatternSampler::new(config),
        }
    }

    /// Compare an old schema with its proposed replacement
    pub fn analyze(&self, old: &Value, new: &Value) -> AnalysisResult {
        let mut changes = Vec::new();
        self.diff_node(old, new, "$", &mut changes);
        debug!(changes = changes.len(), "schema analysis complete");
        AnalysisResult::from_changes(changes)
    }

    fn diff_node(&self, old: &Value, new: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
        let (old_obj, new_obj) = match (old.as_object(), new.as_object()) {
            (Some(o), Some(n)) => (o, n),
            // Boolean schemas or garbage: any difference replaces the node's type
            _ => {
                if old != new {
                    changes.push(SchemaChange::new(
                        ChangeType::TypeChanged,
                        path,
                        Some(old.clone()),
                        Some(new.clone()),
                        format!("Schema at {} was replaced", path),
                    ));
                }
                return;
            }
        };

        // A type change makes the node's remaining keywords incomparable
        if self.diff_type(old_obj, new_obj, path, changes) {
            return;
        }
        self.diff_bounds(old_obj, new_obj, path, changes);
        self.diff_enum(old_obj, new_obj, path, changes);
        self.diff_format(old_obj, new_obj, path, changes);
        self.diff_pattern(old_obj, new_obj, path, changes);
        self.diff_additional_properties(old_obj, new_obj, path, changes);
        self.diff_default(old_obj, new_obj, path, changes);
        self.diff_metadata(old_obj, new_obj, path, changes);
        self.diff_properties(old_obj, new_obj, path, changes);
        self.diff_items(old_obj, new_obj, path, changes);
        self.diff_definitions(old_obj, new_obj, path, changes);
    }

    /// Returns true when the node's type changed
    fn diff_type(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) -> bool {
        let old_types = type_set(old.get("type"));
        let new_types = type_set(new.get("type"));
        if old_types != new_types {
            changes.push(SchemaChange::new(
                ChangeType::TypeChanged,
                format!("{}.type", path),
                old.get("type").cloned(),
                new.get("type").cloned(),
                format!(
                    "Type at {} changed from {} to {}",
                    path,
                    describe_types(&old_types),
                    describe_types(&new_types)
                ),
            ));
            return true;
        }

        let old_ref = old.get("$ref");
        let new_ref = new.get("$ref");
        if old_ref != new_ref {
            changes.push(SchemaChange::new(
                ChangeType::TypeChanged,
                format!("{}.$ref", path),
                old_ref.cloned(),
                new_ref.cloned(),
                format!("Reference at {} now points elsewhere", path),
            ));
            return true;
        }
        false
    }

    fn diff_bounds(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) {
        let keywords = LOWER_BOUNDS
            .iter()
            .map(|k| (*k, true))
            .chain(UPPER_BOUNDS.iter().map(|k| (*k, false)));

        for (keyword, is_lower) in keywords {
            let old_bound = old.get(keyword).and_then(Value::as_f64);
            let new_bound = new.get(keyword).and_then(Value::as_f64);
            let tightened = match (old_bound, new_bound) {
                (None, None) => continue,
                (Some(a), Some(b)) if a == b => continue,
                (Some(a), Some(b)) => {
                    if is_lower {
                        b > a
                    } else {
                        b < a
                    }
                }
                (None, Some(_)) => true,
                (Some(_), None) => false,
            };
            let (change_type, verb) = if tightened {
                (ChangeType::ConstraintTightened, "tightened")
            } else {
                (ChangeType::ConstraintRelaxed, "relaxed")
            };
            changes.push(SchemaChange::new(
                change_type,
                format!("{}.{}", path, keyword),
                old.get(keyword).cloned(),
                new.get(keyword).cloned(),
                format!(
                    "Constraint {} at {} {} ({} -> {})",
                    keyword,
                    path,
                    verb,
                    render(old.get(keyword)),
                    render(new.get(keyword))
                ),
            ));
        }

        let old_unique = old.get("uniqueItems").and_then(Value::as_bool).unwrap_or(false);
        let new_unique = new.get("uniqueItems").and_then(Value::as_bool).unwrap_or(false);
        if old_unique != new_unique {
            let change_type = if new_unique {
                ChangeType::ConstraintTightened
            } else {
                ChangeType::ConstraintRelaxed
            };
            changes.push(SchemaChange::new(
                change_type,
                format!("{}.uniqueItems", path),
                Some(Value::Bool(old_unique)),
                Some(Value::Bool(new_unique)),
                format!("uniqueItems at {} changed to {}", path, new_unique),
            ));
        }
    }

    fn diff_enum(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) {
        let enum_path = format!("{}.enum", path);
        match (
            old.get("enum").and_then(Value::as_array),
            new.get("enum").and_then(Value::as_array),
        ) {
            (Some(old_values), Some(new_values)) => {
                let old_set = sorted_values(old_values);
                let new_set = sorted_values(new_values);

                for (key, value) in &old_set {
                    if !new_set.contains_key(key) {
                        changes.push(SchemaChange::new(
                            ChangeType::EnumValueRemoved,
                            enum_path.clone(),
                            Some((*value).clone()),
                            None,
                            format!("Enum value {} was removed at {}", key, path),
                        ));
                    }
                }
                for (key, value) in &new_set {
                    if !old_set.contains_key(key) {
                        changes.push(SchemaChange::new(
                            ChangeType::EnumValueAdded,
                            enum_path.clone(),
                            None,
                            Some((*value).clone()),
                            format!("Enum value {} was added at {}", key, path),
                        ));
                    }
                }
            }
            (None, Some(new_values)) => changes.push(SchemaChange::new(
                ChangeType::ConstraintTightened,
                enum_path,
                None,
                Some(Value::Array(new_values.clone())),
                format!("Enum constraint introduced at {}", path),
            )),
            (Some(old_values), None) => changes.push(SchemaChange::new(
                ChangeType::ConstraintRelaxed,
                enum_path,
                Some(Value::Array(old_values.clone())),
                None,
                format!("Enum constraint dropped at {}", path),
            )),
            (None, None) => {}
        }
    }

    fn diff_format(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) {
        let old_format = old.get("format");
        let new_format = new.get("format");
        let change_type = match (old_format, new_format) {
            (None, None) => return,
            (Some(a), Some(b)) if a == b => return,
            (None, Some(_)) => ChangeType::FormatAdded,
            (Some(_), None) => ChangeType::FormatRemoved,
            (Some(_), Some(_)) => ChangeType::FormatChanged,
        };
        changes.push(SchemaChange::new(
            change_type,
            format!("{}.format", path),
            old_format.cloned(),
            new_format.cloned(),
            format!(
                "Format at {} changed ({} -> {})",
                path,
                render(old_format),
                render(new_format)
            ),
        ));
    }

    fn diff_pattern(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) {
        let old_pattern = old.get("pattern").and_then(Value::as_str);
        let new_pattern = new.get("pattern").and_then(Value::as_str);
        let pattern_path = format!("{}.pattern", path);
        let change = match (old_pattern, new_pattern) {
            (None, None) => return,
            (Some(a), Some(b)) if a == b => return,
            (None, Some(b)) => SchemaChange::new(
                ChangeType::PatternAdded,
                pattern_path,
                None,
                Some(Value::from(b)),
                format!("Pattern /{}/ added at {}", b, path),
            ),
            (Some(a), None) => SchemaChange::new(
                ChangeType::PatternRemoved,
                pattern_path,
                Some(Value::from(a)),
                None,
                format!("Pattern /{}/ removed at {}", a, path),
            ),
            (Some(a), Some(b)) => {
                let verdict = self.sampler.compare(a, b);
                let (severity, verb) = match verdict {
                    PatternVerdict::Stricter => (Severity::Major, "stricter"),
                    PatternVerdict::Relaxed => (Severity::Minor, "more permissive"),
                    PatternVerdict::Equivalent => (Severity::Patch, "equivalent"),
                };
                let mut change = SchemaChange::new(
                    ChangeType::PatternChanged,
                    pattern_path,
                    Some(Value::from(a)),
                    Some(Value::from(b)),
                    format!("Pattern at {} changed from /{}/ to /{}/ (judged {})", path, a, b, verb),
                )
                .with_severity(severity);
                if verdict != PatternVerdict::Stricter {
                    change.recommendation = None;
                }
                change
            }
        };
        changes.push(change);
    }

    fn diff_additional_properties(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) {
        let closed = |m: &Map<String, Value>| m.get("additionalProperties") == Some(&Value::Bool(false));
        let change_type = match (closed(old), closed(new)) {
            (false, true) => ChangeType::AdditionalPropertiesRestricted,
            (true, false) => ChangeType::AdditionalPropertiesAllowed,
            _ => return,
        };
        changes.push(SchemaChange::new(
            change_type,
            format!("{}.additionalProperties", path),
            old.get("additionalProperties").cloned(),
            new.get("additionalProperties").cloned(),
            format!("additionalProperties at {} changed", path),
        ));
    }

    fn diff_default(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) {
        if old.get("default") != new.get("default") {
            changes.push(SchemaChange::new(
                ChangeType::DefaultChanged,
                format!("{}.default", path),
                old.get("default").cloned(),
                new.get("default").cloned(),
                format!("Default value at {} changed", path),
            ));
        }
    }

    fn diff_metadata(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) {
        for key in METADATA_KEYS {
            if old.get(*key) != new.get(*key) {
                changes.push(SchemaChange::new(
                    ChangeType::MetadataChanged,
                    format!("{}.{}", path, key),
                    old.get(*key).cloned(),
                    new.get(*key).cloned(),
                    format!("Metadata '{}' at {} changed", key, path),
                ));
            }
        }
    }

    fn diff_properties(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) {
        let empty = Map::new();
        let old_props = old.get("properties").and_then(Value::as_object).unwrap_or(&empty);
        let new_props = new.get("properties").and_then(Value::as_object).unwrap_or(&empty);
        let old_required = required_set(old);
        let new_required = required_set(new);

        // Names listed only in `required` still constrain documents
        let names: BTreeSet<&str> = old_props
            .keys()
            .chain(new_props.keys())
            .map(String::as_str)
            .chain(old_required.iter().copied())
            .chain(new_required.iter().copied())
            .collect();
        for name in names {
            let prop_path = format!("{}.properties.{}", path, name);
            let was = old_required.contains(name);
            let is = new_required.contains(name);
            match (old_props.get(name), new_props.get(name)) {
                (Some(old_prop), None) => changes.push(SchemaChange::new(
                    ChangeType::FieldRemoved,
                    prop_path,
                    Some(old_prop.clone()),
                    None,
                    format!("Property '{}' was removed", name),
                )),
                (None, Some(new_prop)) => {
                    let change = if is {
                        SchemaChange::new(
                            ChangeType::RequiredFieldAdded,
                            prop_path,
                            None,
                            Some(new_prop.clone()),
                            format!("Required property '{}' was added", name),
                        )
                    } else {
                        SchemaChange::new(
                            ChangeType::OptionalFieldAdded,
                            prop_path,
                            None,
                            Some(new_prop.clone()),
                            format!("Optional property '{}' was added", name),
                        )
                    };
                    changes.push(change);
                }
                (Some(old_prop), Some(new_prop)) => {
                    changes.extend(requiredness_change(name, &prop_path, was, is));
                    self.diff_node(old_prop, new_prop, &prop_path, changes);
                }
                (None, None) => changes.extend(requiredness_change(name, &prop_path, was, is)),
            }
        }
    }

    fn diff_items(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) {
        let items_path = format!("{}.items", path);
        match (old.get("items"), new.get("items")) {
            (Some(old_items), Some(new_items)) => {
                self.diff_node(old_items, new_items, &items_path, changes)
            }
            (None, Some(new_items)) => changes.push(SchemaChange::new(
                ChangeType::ConstraintTightened,
                items_path,
                None,
                Some(new_items.clone()),
                format!("Item schema introduced at {}", path),
            )),
            (Some(old_items), None) => changes.push(SchemaChange::new(
                ChangeType::ConstraintRelaxed,
                items_path,
                Some(old_items.clone()),
                None,
                format!("Item schema dropped at {}", path),
            )),
            (None, None) => {}
        }
    }

    /// Shared definitions are compared in place; added or dropped ones surface
    /// through the `$ref` changes of the nodes that use them
    fn diff_definitions(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<SchemaChange>,
    ) {
        for keyword in ["$defs", "definitions"] {
            let (Some(old_defs), Some(new_defs)) = (
                old.get(keyword).and_then(Value::as_object),
                new.get(keyword).and_then(Value::as_object),
            ) else {
                continue;
            };
            for (name, old_def) in old_defs {
                if let Some(new_def) = new_defs.get(name) {
                    let def_path = format!("{}.{}.{}", path, keyword, name);
                    self.diff_node(old_def, new_def, &def_path, changes);
                }
            }
        }
    }
}

/// Normalize `type` (string or array) into a sorted set; empty means any type
fn type_set(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::String(s)) => BTreeSet::from([s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|t| t.as_str().map(String::from))
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn describe_types(types: &BTreeSet<String>) -> String {
    if types.is_empty() {
        "any".to_string()
    } else {
        types.iter().cloned().collect::<Vec<_>>().join("|")
    }
}

fn requiredness_change(name: &str, path: &str, was: bool, is: bool) -> Option<SchemaChange> {
    let (change_type, state) = match (was, is) {
        (false, true) => (ChangeType::MadeRequired, "required"),
        (true, false) => (ChangeType::MadeOptional, "optional"),
        _ => return None,
    };
    Some(SchemaChange::new(
        change_type,
        path.to_string(),
        Some(Value::Bool(was)),
        Some(Value::Bool(is)),
        format!("Property '{}' is now {}", name, state),
    ))
}

fn required_set(node: &Map<String, Value>) -> BTreeSet<&str> {
    node.get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Enum values keyed by their canonical rendering, in sorted order
fn sorted_values(values: &[Value]) -> BTreeMap<String, &Value> {
    values.iter().map(|v| (v.to_string(), v)).collect()
}

fn render(value: Option<&Value>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payment_v1() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "amount": { "type": "number", "minimum": 0 },
                "currency": { "type": "string", "enum": ["EUR", "USD"] }
            },
            "required": ["id", "amount", "currency"]
        })
    }

    fn analyze(old: &Value, new: &Value) -> AnalysisResult {
        ChangeAnalyzer::new().analyze(old, new)
    }

    #[test]
    fn test_field_removal_is_critical() {
        let old = payment_v1();
        let mut new = old.clone();
        new["properties"].as_object_mut().unwrap().remove("amount");
        new["required"] = json!(["id", "currency"]);

        let result = analyze(&old, &new);
        assert_eq!(result.changes.len(), 1);
        let change = &result.changes[0];
        assert_eq!(change.change_type, ChangeType::FieldRemoved);
        assert_eq!(change.severity, Severity::Critical);
        assert_eq!(change.path, "$.properties.amount");
        assert_eq!(result.suggested_bump, BumpType::Major);
        assert!(change.recommendation.is_some());
    }

    #[test]
    fn test_optional_field_addition_is_minor() {
        let old = payment_v1();
        let mut new = old.clone();
        new["properties"]["description"] = json!({ "type": "string" });

        let result = analyze(&old, &new);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].change_type, ChangeType::OptionalFieldAdded);
        assert_eq!(result.changes[0].severity, Severity::Minor);
        assert_eq!(result.suggested_bump, BumpType::Minor);
    }

    #[test]
    fn test_required_field_addition_is_critical() {
        let old = payment_v1();
        let mut new = old.clone();
        new["properties"]["merchant"] = json!({ "type": "string" });
        new["required"] = json!(["id", "amount", "currency", "merchant"]);

        let result = analyze(&old, &new);
        assert_eq!(result.changes[0].change_type, ChangeType::RequiredFieldAdded);
        assert_eq!(result.suggested_bump, BumpType::Major);
    }

    #[test]
    fn test_type_change_stops_descent() {
        let old = json!({"type": "object", "properties": {"amount": {"type": "number", "minimum": 0}}});
        let new = json!({"type": "object", "properties": {"amount": {"type": "string", "maxLength": 5}}});

        let result = analyze(&old, &new);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].change_type, ChangeType::TypeChanged);
        assert_eq!(result.changes[0].path, "$.properties.amount.type");
        assert_eq!(result.changes[0].severity, Severity::Critical);
    }

    #[test]
    fn test_bounds() {
        let old = json!({"type": "string", "minLength": 2, "maxLength": 10});
        let tighter = json!({"type": "string", "minLength": 3, "maxLength": 8});
        let looser = json!({"type": "string", "minLength": 1});

        let result = analyze(&old, &tighter);
        assert!(result
            .changes
            .iter()
            .all(|c| c.change_type == ChangeType::ConstraintTightened && c.severity == Severity::Major));
        assert_eq!(result.changes.len(), 2);

        let result = analyze(&old, &looser);
        assert_eq!(result.changes.len(), 2);
        assert!(result.changes.iter().all(|c| c.change_type == ChangeType::ConstraintRelaxed));
        assert_eq!(result.suggested_bump, BumpType::Minor);
    }

    #[test]
    fn test_enum_changes() {
        let old = json!({"type": "string", "enum": ["EUR", "USD"]});
        let new = json!({"type": "string", "enum": ["USD", "GBP"]});

        let result = analyze(&old, &new);
        let types: Vec<_> = result.changes.iter().map(|c| c.change_type).collect();
        assert_eq!(types, vec![ChangeType::EnumValueRemoved, ChangeType::EnumValueAdded]);
        assert_eq!(result.changes[0].old_value, Some(json!("EUR")));
        assert_eq!(result.changes[1].new_value, Some(json!("GBP")));
        assert_eq!(result.suggested_bump, BumpType::Major);
    }

    #[test]
    fn test_required_flips() {
        let old = json!({"type": "object", "properties": {"a": {"type": "string"}, "b": {"type": "string"}}, "required": ["a"]});
        let new = json!({"type": "object", "properties": {"a": {"type": "string"}, "b": {"type": "string"}}, "required": ["b"]});

        let result = analyze(&old, &new);
        assert_eq!(result.changes[0].change_type, ChangeType::MadeOptional);
        assert_eq!(result.changes[0].path, "$.properties.a");
        assert_eq!(result.changes[1].change_type, ChangeType::MadeRequired);
        assert_eq!(result.changes[1].severity, Severity::Major);
    }

    #[test]
    fn test_required_without_declared_property() {
        let old = json!({"type": "object", "properties": {}});
        let new = json!({"type": "object", "properties": {}, "required": ["tenant"]});

        let result = analyze(&old, &new);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].change_type, ChangeType::MadeRequired);
        assert_eq!(result.changes[0].path, "$.properties.tenant");
        assert_eq!(result.suggested_bump, BumpType::Major);

        let result = analyze(&new, &old);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].change_type, ChangeType::MadeOptional);
        assert_eq!(result.suggested_bump, BumpType::Minor);
    }

    #[test]
    fn test_format_and_pattern() {
        let old = json!({"type": "string"});
        let new = json!({"type": "string", "format": "email", "pattern": "^[a-z@.]+$"});

        let result = analyze(&old, &new);
        let types: Vec<_> = result.changes.iter().map(|c| c.change_type).collect();
        assert_eq!(types, vec![ChangeType::FormatAdded, ChangeType::PatternAdded]);
        assert!(result.changes.iter().all(|c| c.severity == Severity::Major));

        let stricter = json!({"type": "string", "format": "email", "pattern": "^[a-z]+$"});
        let result = analyze(&new, &stricter);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].change_type, ChangeType::PatternChanged);
        assert_eq!(result.changes[0].severity, Severity::Major);
    }

    #[test]
    fn test_metadata_only_is_patch() {
        let old = json!({"type": "object", "description": "A payment", "properties": {"id": {"type": "string", "title": "Id"}}});
        let new = json!({"type": "object", "description": "A card payment", "properties": {"id": {"type": "string", "title": "Identifier"}}});

        let result = analyze(&old, &new);
        assert_eq!(result.changes.len(), 2);
        assert!(result.changes.iter().all(|c| c.change_type == ChangeType::MetadataChanged));
        assert_eq!(result.suggested_bump, BumpType::Patch);
    }

    #[test]
    fn test_nested_and_items_paths() {
        let old = json!({
            "type": "object",
            "properties": {
                "address": {"type": "object", "properties": {"zip": {"type": "string"}}},
                "tags": {"type": "array", "items": {"type": "string", "enum": ["a", "b"]}}
            }
        });
        let new = json!({
            "type": "object",
            "properties": {
                "address": {"type": "object", "properties": {}},
                "tags": {"type": "array", "items": {"type": "string", "enum": ["a"]}}
            }
        });

        let result = analyze(&old, &new);
        let paths: Vec<_> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["$.properties.address.properties.zip", "$.properties.tags.items.enum"]);
    }

    #[test]
    fn test_additive_changes_never_major() {
        let old = payment_v1();
        let new = json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "amount": { "type": "number" },
                "currency": { "type": "string", "enum": ["EUR", "USD", "GBP"] },
                "note": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["id", "amount", "currency"]
        });

        let result = analyze(&old, &new);
        assert!(!result.changes.is_empty());
        assert!(result.changes.iter().all(|c| !c.is_breaking()));
        assert_eq!(result.suggested_bump, BumpType::Minor);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let old = payment_v1();
        let new = json!({"type": "object", "properties": {"z": {"type": "string"}, "b": {"type": "integer"}, "id": {"type": "integer"}}, "required": ["z"]});
        let first = analyze(&old, &new);
        for _ in 0..5 {
            assert_eq!(analyze(&old, &new), first);
        }
    }

    #[test]
    fn test_identical_schemas_have_no_changes() {
        let result = analyze(&payment_v1(), &payment_v1());
        assert!(result.changes.is_empty());
        assert_eq!(result.suggested_bump, BumpType::Patch);
        assert_eq!(result.max_severity(), None);
    }
}
