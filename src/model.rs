use std::fmt;

use serde::Serialize;

/// Predicate marking a subject as deleted. Written by [`MarkDeleted`] only;
/// callers cannot set predicates in the reserved `_` namespace.
///
/// [`MarkDeleted`]: crate::engine::NodeRef::mark_deleted
pub const DELETED_PREDICATE: &str = "_deleted_";

/// Returns true for predicate names reserved for engine metadata.
pub fn is_reserved_predicate(predicate: &str) -> bool {
    predicate.starts_with('_')
}

/// A single mutation value: scalar, arbitrary JSON, a child-edge reference,
/// or the tombstone marker.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Ref { kind: String, id: String },
    Tombstone,
}

impl Value {
    /// Truthiness as seen by `filter_out`: `Bool(true)`, non-zero numbers,
    /// and non-empty strings, bytes, and JSON containers are truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Tombstone => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(v) => !v.is_empty(),
            Value::Bytes(v) => !v.is_empty(),
            Value::Json(v) => json_truthy(v),
            Value::Ref { .. } => true,
        }
    }

    /// Renders the value for a materialized view. Bytes become base64;
    /// non-finite floats degrade to JSON null, like serde_json itself.
    pub fn to_json(&self) -> serde_json::Value {
        use base64::Engine as _;
        match self {
            Value::Null | Value::Tombstone => serde_json::Value::Null,
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(v) => serde_json::Value::String(v.clone()),
            Value::Bytes(v) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(v),
            ),
            Value::Json(v) => v.clone(),
            Value::Ref { kind, id } => {
                serde_json::json!({ "kind": kind, "id": id })
            }
        }
    }
}

fn json_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(v) => *v,
        serde_json::Value::Number(v) => v.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(v) => !v.is_empty(),
        serde_json::Value::Array(v) => !v.is_empty(),
        serde_json::Value::Object(v) => !v.is_empty(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "bytes(len={})", v.len()),
            Value::Json(v) => write!(f, "{v}"),
            Value::Ref { kind, id } => write!(f, "{kind}/{id}"),
            Value::Tombstone => write!(f, "tombstone"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

/// One append-only mutation record. Immutable once committed; edits are new
/// records with a later `nanotime`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub subject_kind: String,
    pub subject_id: String,
    pub predicate: String,
    pub value: Value,
    pub source: String,
    /// Commit timestamp stamped by the engine, never the caller.
    pub nanotime: i64,
    /// Intra-batch sequence; breaks `nanotime` ties within one commit.
    pub seq: u32,
}

impl Record {
    /// Fold ordering key: records apply in `(nanotime, seq)` order.
    pub fn ord_key(&self) -> (i64, u32) {
        (self.nanotime, self.seq)
    }
}
