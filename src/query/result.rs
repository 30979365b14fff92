use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{CrudError, Result};
use crate::model::Value;

/// One node of a materialized view tree.
///
/// Serialization order is fixed: `id` first, scalar predicates
/// alphabetically (nulls omitted), then child arrays alphabetically by
/// predicate. Children within an array keep the commit order of their
/// edges, so output is deterministic for a given record set.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult {
    pub kind: String,
    pub id: String,
    pub scalars: BTreeMap<String, Value>,
    pub children: BTreeMap<String, Vec<QueryResult>>,
}

impl QueryResult {
    /// Renders the view as a JSON document.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CrudError::Serialization(e.to_string()))
    }

    /// Renders the view as an in-memory JSON value.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Direct access to child views under one predicate.
    pub fn children_of(&self, predicate: &str) -> &[QueryResult] {
        self.children
            .get(predicate)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        for (predicate, value) in &self.scalars {
            let rendered = value.to_json();
            if !rendered.is_null() {
                map.serialize_entry(predicate, &rendered)?;
            }
        }
        for (predicate, children) in &self.children {
            map.serialize_entry(predicate, children)?;
        }
        map.end()
    }
}
