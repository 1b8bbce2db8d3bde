// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload normalization.
//!
//! Turns `(topic, payload)` into a [`NormalizedRecord`]:
//!
//! - the payload must be a UTF-8 JSON object
//! - `externalId` (preferred) or `external_id` is the identity
//! - `<name>ExternalId` keys become [`Reference`] fields named `<name>`
//! - every other key is carried through, `null` included

use crate::record::{Fields, NormalizedRecord, Reference, Value};
use crate::route::DataModelTarget;
use crate::sanitize::IdSanitizer;
use chrono::{DateTime, SecondsFormat};
use thiserror::Error;

const REFERENCE_SUFFIX: &str = "ExternalId";
const IDENTITY_KEYS: [&str; 2] = ["externalId", "external_id"];

/// Normalization failures. The message is dropped, never buffered.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("payload on '{topic}' is not valid UTF-8: {source}")]
    Decode {
        topic: String,
        source: std::str::Utf8Error,
    },

    #[error("payload on '{topic}' is not a JSON object: {reason}")]
    Parse { topic: String, reason: String },

    #[error("payload on '{topic}' has no externalId")]
    MissingIdentity { topic: String },
}

/// Decode a payload into a JSON object.
pub fn decode_object(
    topic: &str,
    payload: &[u8],
) -> Result<serde_json::Map<String, serde_json::Value>, NormalizeError> {
    let text = std::str::from_utf8(payload).map_err(|source| NormalizeError::Decode {
        topic: topic.to_string(),
        source,
    })?;
    let text = text.trim();
    if text.is_empty() {
        return Err(NormalizeError::Parse {
            topic: topic.to_string(),
            reason: "empty payload".into(),
        });
    }

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(NormalizeError::Parse {
            topic: topic.to_string(),
            reason: format!("found {}", json_type(&other)),
        }),
        Err(e) => Err(NormalizeError::Parse {
            topic: topic.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Identifier text of a scalar, `None` for null, empty and non-scalars.
fn scalar_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn identity(object: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    IDENTITY_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(scalar_id))
}

fn reference_value(
    value: &serde_json::Value,
    space: &str,
    sanitizer: &IdSanitizer,
) -> Option<Value> {
    let make = |id: String| Value::Reference(Reference::new(space, sanitizer.sanitize(&id)));
    match value {
        serde_json::Value::Array(items) => {
            let refs: Vec<Value> = items.iter().filter_map(scalar_id).map(make).collect();
            (!refs.is_empty()).then_some(Value::List(refs))
        }
        other => scalar_id(other).map(make),
    }
}

/// Epoch milliseconds to RFC 3339 UTC.
fn timestamp_value(value: &serde_json::Value) -> Option<Value> {
    let n = value.as_number()?;
    let millis = match n.as_i64() {
        Some(ms) => ms,
        None => n.as_f64()? as i64,
    };
    let dt = DateTime::from_timestamp_millis(millis)?;
    Some(Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
}

/// Normalize one message for a data-model route.
pub fn normalize(
    topic: &str,
    payload: &[u8],
    target: &DataModelTarget,
    sanitizer: &IdSanitizer,
) -> Result<NormalizedRecord, NormalizeError> {
    let object = decode_object(topic, payload)?;
    let raw_id = identity(&object).ok_or_else(|| NormalizeError::MissingIdentity {
        topic: topic.to_string(),
    })?;
    let space = target.collection.instance_space.as_str();

    let mut fields = Fields::new();
    for (key, value) in object {
        if IDENTITY_KEYS.contains(&key.as_str()) {
            continue;
        }

        if let Some(name) = key.strip_suffix(REFERENCE_SUFFIX) {
            if name.is_empty() {
                tracing::debug!("{}: ignoring bare '{}' key", topic, key);
                continue;
            }
            if let Some(reference) = reference_value(&value, space, sanitizer) {
                fields.insert(name, reference);
            }
            continue;
        }

        if target.normalize_timestamps && key.to_ascii_lowercase().contains("time") {
            if let Some(ts) = timestamp_value(&value) {
                fields.insert(key, ts);
                continue;
            }
        }

        fields.insert(key, Value::from_json(value));
    }

    Ok(NormalizedRecord {
        id: sanitizer.sanitize(&raw_id),
        kind: target.kind,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CollectionRef;
    use crate::config::IdentityConfig;
    use crate::record::RecordKind;

    fn target(kind: RecordKind) -> DataModelTarget {
        DataModelTarget {
            collection: CollectionRef {
                schema_space: "sp_schema".into(),
                name: "AlarmEvent".into(),
                version: Some("v1".into()),
                instance_space: "sp_site".into(),
            },
            kind,
            normalize_timestamps: false,
        }
    }

    fn sanitizer() -> IdSanitizer {
        IdSanitizer::new(&IdentityConfig::default()).expect("sanitizer")
    }

    fn run(payload: &str) -> Result<NormalizedRecord, NormalizeError> {
        normalize(
            "t",
            payload.as_bytes(),
            &target(RecordKind::Event),
            &sanitizer(),
        )
    }

    #[test]
    fn test_reference_field() {
        let record = run(r#"{"externalId":"e1","assetExternalId":"pump1"}"#).expect("record");
        assert_eq!(record.id, "e1");
        assert_eq!(
            record.fields.get("asset"),
            Some(&Value::Reference(Reference::new("sp_site", "pump1")))
        );
        assert!(!record.fields.contains_key("assetExternalId"));
        assert!(!record.fields.contains_key("externalId"));
    }

    #[test]
    fn test_reference_target_is_sanitized() {
        let record = run(r#"{"externalId":"e1","frameExternalId":"123abc"}"#).expect("record");
        assert_eq!(
            record.fields.get("frame"),
            Some(&Value::Reference(Reference::new("sp_site", "id_123abc")))
        );
    }

    #[test]
    fn test_empty_references_are_absent() {
        let record = run(
            r#"{"externalId":"e1","aExternalId":null,"bExternalId":"","cExternalId":[],"dExternalId":[null,""]}"#,
        )
        .expect("record");
        assert!(record.fields.is_empty());
    }

    #[test]
    fn test_reference_list() {
        let record =
            run(r#"{"externalId":"e1","tagsExternalId":["t1",null,"",7]}"#).expect("record");
        assert_eq!(
            record.fields.get("tags"),
            Some(&Value::List(vec![
                Value::Reference(Reference::new("sp_site", "t1")),
                Value::Reference(Reference::new("sp_site", "id_7")),
            ]))
        );
    }

    #[test]
    fn test_null_passes_through() {
        let record = run(r#"{"externalId":"e1","note":null,"level":3}"#).expect("record");
        assert_eq!(record.fields.get("note"), Some(&Value::Null));
        let keys: Vec<_> = record.fields.keys().collect();
        assert_eq!(keys, vec!["note", "level"]);
    }

    #[test]
    fn test_identity_preference() {
        let record = run(r#"{"external_id":"b","externalId":"a"}"#).expect("record");
        assert_eq!(record.id, "a");
        assert!(!record.fields.contains_key("external_id"));

        let record = run(r#"{"external_id":"b"}"#).expect("record");
        assert_eq!(record.id, "b");

        let record = run(r#"{"externalId":42}"#).expect("record");
        assert_eq!(record.id, "id_42");
    }

    #[test]
    fn test_missing_identity() {
        for payload in [r#"{"name":"x"}"#, r#"{"externalId":""}"#, r#"{"externalId":null}"#] {
            assert!(matches!(
                run(payload),
                Err(NormalizeError::MissingIdentity { .. })
            ));
        }
    }

    #[test]
    fn test_decode_and_parse_errors() {
        let bad_utf8 = normalize(
            "t",
            &[0xff, 0xfe],
            &target(RecordKind::Event),
            &sanitizer(),
        );
        assert!(matches!(bad_utf8, Err(NormalizeError::Decode { .. })));

        for payload in ["", "   ", "{", "[1,2]", "42", "\"s\""] {
            assert!(
                matches!(run(payload), Err(NormalizeError::Parse { .. })),
                "{:?}",
                payload
            );
        }
    }

    #[test]
    fn test_timestamp_normalization() {
        let mut t = target(RecordKind::Frame);
        t.normalize_timestamps = true;
        let record = normalize(
            "t",
            br#"{"externalId":"f","startTime":1700000000000,"endTime":"open","count":5}"#,
            &t,
            &sanitizer(),
        )
        .expect("record");
        assert_eq!(
            record.fields.get("startTime"),
            Some(&Value::String("2023-11-14T22:13:20.000Z".into()))
        );
        assert_eq!(
            record.fields.get("endTime"),
            Some(&Value::String("open".into()))
        );
        assert_eq!(record.kind, RecordKind::Frame);
    }
}
