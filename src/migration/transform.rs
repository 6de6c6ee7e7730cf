//! Record transforms
//!
//! A transform maps a record in the old shape to the new shape. Transforms
//! are registered per (schema, from, to) and come in two forms: a list of
//! declarative field operations, or a statically linked implementation of
//! [`RecordTransform`]. Nothing is evaluated from text.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::version::Version;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("{0}")]
    Invalid(String),
}

/// A pure mapping from old records to new records
pub trait RecordTransform: Send + Sync {
    fn transform(&self, record: &Value) -> Result<Value, TransformError>;

    /// Check a transformed record; the default accepts everything
    fn validate(&self, _record: &Value) -> Result<(), TransformError> {
        Ok(())
    }
}

/// A single declarative edit on a top-level field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldOp {
    /// Move a field; no-op when the source is absent
    Rename { from: String, to: String },
    Drop { field: String },
    /// Set a field only when it is absent
    SetDefault { field: String, value: Value },
    /// Set a field unconditionally
    Set { field: String, value: Value },
    /// Duplicate a field; no-op when the source is absent
    Copy { from: String, to: String },
    /// Fail validation when the field is missing from the result
    Require { field: String },
}

impl FieldOp {
    fn apply(&self, obj: &mut Map<String, Value>) {
        match self {
            FieldOp::Rename { from, to } => {
                if let Some(v) = obj.remove(from) {
                    obj.insert(to.clone(), v);
                }
            }
            FieldOp::Drop { field } => {
                obj.remove(field);
            }
            FieldOp::SetDefault { field, value } => {
                obj.entry(field.clone()).or_insert_with(|| value.clone());
            }
            FieldOp::Set { field, value } => {
                obj.insert(field.clone(), value.clone());
            }
            FieldOp::Copy { from, to } => {
                if let Some(v) = obj.get(from).cloned() {
                    obj.insert(to.clone(), v);
                }
            }
            FieldOp::Require { .. } => {}
        }
    }
}

struct FnTransform<F>(F);

impl<F> RecordTransform for FnTransform<F>
where
    F: Fn(&Value) -> Result<Value, TransformError> + Send + Sync,
{
    fn transform(&self, record: &Value) -> Result<Value, TransformError> {
        (self.0)(record)
    }
}

/// A registered transform
#[derive(Clone)]
pub enum Transform {
    Declarative(Vec<FieldOp>),
    Custom(Arc<dyn RecordTransform>),
}

impl Transform {
    pub fn custom(transform: impl RecordTransform + 'static) -> Self {
        Transform::Custom(Arc::new(transform))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        Transform::Custom(Arc::new(FnTransform(f)))
    }

    pub fn apply(&self, record: &Value) -> Result<Value, TransformError> {
        match self {
            Transform::Declarative(ops) => {
                let mut obj = record.as_object().cloned().ok_or(TransformError::NotAnObject)?;
                for op in ops {
                    op.apply(&mut obj);
                }
                Ok(Value::Object(obj))
            }
            Transform::Custom(t) => t.transform(record),
        }
    }

    pub fn validate(&self, record: &Value) -> Result<(), TransformError> {
        match self {
            Transform::Declarative(ops) => {
                let obj = record.as_object().ok_or(TransformError::NotAnObject)?;
                for op in ops {
                    if let FieldOp::Require { field } = op {
                        if !obj.contains_key(field) {
                            return Err(TransformError::MissingField(field.clone()));
                        }
                    }
                }
                Ok(())
            }
            Transform::Custom(t) => t.validate(record),
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Declarative(ops) => f.debug_tuple("Declarative").field(ops).finish(),
            Transform::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransformKey {
    schema_name: String,
    from: Version,
    to: Version,
}

/// Transforms keyed by (schema, from version, to version)
#[derive(Default)]
pub struct TransformRegistry {
    transforms: DashMap<TransformKey, Transform>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform, replacing any previous one for the same key
    pub fn register(&self, schema_name: &str, from: Version, to: Version, transform: Transform) {
        self.transforms.insert(
            TransformKey {
                schema_name: schema_name.to_string(),
                from,
                to,
            },
            transform,
        );
    }

    pub fn get(&self, schema_name: &str, from: &Version, to: &Version) -> Option<Transform> {
        let key = TransformKey {
            schema_name: schema_name.to_string(),
            from: from.clone(),
            to: to.clone(),
        };
        self.transforms.get(&key).map(|t| t.value().clone())
    }

    pub fn contains(&self, schema_name: &str, from: &Version, to: &Version) -> bool {
        self.get(schema_name, from, to).is_some()
    }
}
