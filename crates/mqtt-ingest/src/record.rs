// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Normalized record model.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record classification, selects dependency and drain behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Depends on a frame through a reference field.
    Event,
    /// Container that events depend on.
    Frame,
    /// Anything else.
    Other,
}

impl RecordKind {
    /// Whether a successful write of this kind can satisfy buffered records.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, RecordKind::Frame)
    }

    /// Whether records of this kind are checked for an outbound dependency.
    pub fn has_dependency(self) -> bool {
        matches!(self, RecordKind::Event)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Event => write!(f, "event"),
            RecordKind::Frame => write!(f, "frame"),
            RecordKind::Other => write!(f, "other"),
        }
    }
}

/// Pointer to another record, possibly one not written yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Space the target record lives in.
    pub space_key: String,
    /// Sanitized identity of the target record.
    pub target_id: String,
}

impl Reference {
    pub fn new(space_key: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            space_key: space_key.into(),
            target_id: target_id.into(),
        }
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("space", &self.space_key)?;
        map.serialize_entry("externalId", &self.target_id)?;
        map.end()
    }
}

/// Field value of a normalized record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Reference(Reference),
    /// Nested object, carried through unchanged.
    Object(serde_json::Map<String, serde_json::Value>),
}

impl Value {
    /// Convert a JSON value without interpreting reference keys.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(map),
        }
    }

    /// The reference held by this value, if any.
    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// All references held by this value, including inside lists.
    pub fn references(&self) -> Vec<&Reference> {
        match self {
            Value::Reference(r) => vec![r],
            Value::List(items) => items.iter().flat_map(Value::references).collect(),
            _ => Vec::new(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => items.serialize(serializer),
            Value::Reference(r) => r.serialize(serializer),
            Value::Object(map) => map.serialize(serializer),
        }
    }
}

/// Ordered field map. Keeps the key order of the inbound payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert a field, replacing an existing value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// One inbound message transformed for the backend.
///
/// The identity is never part of `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub id: String,
    pub kind: RecordKind,
    pub fields: Fields,
}

impl NormalizedRecord {
    /// Serialized form used in diagnostics.
    pub fn to_json(&self) -> String {
        let body = serde_json::json!({
            "externalId": self.id,
            "kind": self.kind.to_string(),
            "properties": self.fields,
        });
        body.to_string()
    }
}

/// Message as received from the transport.
///
/// Buffered in this form so replays re-run normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub kind: RecordKind,
    /// Arrival time, epoch milliseconds. Datapoints without their own
    /// timestamp use it, including on replay.
    pub received_ms: i64,
}

impl RawMessage {
    /// Message received now.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, kind: RecordKind) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            kind,
            received_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_preserve_order() {
        let mut fields = Fields::new();
        fields.insert("b", Value::Bool(true));
        fields.insert("a", Value::Null);
        fields.insert("b", Value::Bool(false));

        let keys: Vec<_> = fields.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(fields.get("b"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_reference_serialization() {
        let mut fields = Fields::new();
        fields.insert("frame", Value::Reference(Reference::new("sp_site", "F1")));
        fields.insert("note", Value::Null);

        let json = serde_json::to_string(&fields).expect("serialize");
        assert_eq!(
            json,
            r#"{"frame":{"space":"sp_site","externalId":"F1"},"note":null}"#
        );
    }

    #[test]
    fn test_references_in_lists() {
        let value = Value::List(vec![
            Value::Reference(Reference::new("s", "a")),
            Value::Reference(Reference::new("s", "b")),
        ]);
        let ids: Vec<_> = value.references().iter().map(|r| r.target_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(value.as_reference().is_none());
    }

    #[test]
    fn test_kind_roles() {
        assert!(RecordKind::Frame.satisfies_dependents());
        assert!(!RecordKind::Event.satisfies_dependents());
        assert!(RecordKind::Event.has_dependency());
        assert!(!RecordKind::Other.has_dependency());
    }
}
