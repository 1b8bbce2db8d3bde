// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series sink.
//!
//! Each payload on a `timeseries` route becomes one datapoint. Accepted
//! payloads:
//!
//! - a number (`20.66`)
//! - an on/off word (`ON`, `closed`, `armed`) stored as 1 or 0
//! - a JSON object with `value` and `timestamp`, optionally `external_id`
//! - a JSON object with exactly one numeric or boolean member
//!
//! Anything else is skipped. A series is created the first time its id is
//! seen; known series are cached and never invalidated.

use crate::backend::{Backend, BackendError, Datapoint, SeriesDefinition};
use crate::config::TimeSeriesConfig;
use crate::route::TimeSeriesTarget;
use parking_lot::Mutex;
use serde_json::{Map, Value as Json};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use thiserror::Error;

const TRUE_WORDS: &[&str] = &[
    "on", "yes", "true", "1", "active", "enabled", "open", "high", "online", "arm", "armed",
];
const FALSE_WORDS: &[&str] = &[
    "off", "no", "false", "0", "inactive", "disabled", "closed", "low", "offline", "disarm",
    "disarmed",
];

/// Why a payload yields no datapoint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatapointError {
    #[error("empty payload")]
    Empty,

    #[error("payload is not UTF-8")]
    NotUtf8,

    #[error("no numeric value in '{0}'")]
    NotNumeric(String),

    #[error("{0} numeric members, expected one")]
    Ambiguous(usize),

    #[error("datapoint timestamp is not a number")]
    Timestamp,
}

/// Value read from one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDatapoint {
    /// Series named by the payload. The topic names it otherwise.
    pub series: Option<String>,
    /// Epoch milliseconds from the payload. `None` means arrival time.
    pub timestamp: Option<i64>,
    pub value: f64,
}

impl ParsedDatapoint {
    fn scalar(value: f64) -> Self {
        Self {
            series: None,
            timestamp: None,
            value,
        }
    }
}

/// Read one datapoint from a payload.
pub fn parse_datapoint(payload: &[u8]) -> Result<ParsedDatapoint, DatapointError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| DatapointError::NotUtf8)?
        .trim();
    if text.is_empty() {
        return Err(DatapointError::Empty);
    }
    if let Some(value) = parse_number(text) {
        return Ok(ParsedDatapoint::scalar(value));
    }
    if text.starts_with('{') {
        // Invalid JSON falls through to the word check.
        if let Ok(Json::Object(map)) = serde_json::from_str::<Json>(text) {
            return parse_object(&map);
        }
    }
    bool_word(text)
        .map(ParsedDatapoint::scalar)
        .ok_or_else(|| DatapointError::NotNumeric(preview(text)))
}

fn parse_object(map: &Map<String, Json>) -> Result<ParsedDatapoint, DatapointError> {
    if let (Some(raw), Some(timestamp)) = (map.get("value"), map.get("timestamp")) {
        let value = member_value(raw).ok_or_else(|| DatapointError::NotNumeric(raw.to_string()))?;
        let timestamp = match timestamp {
            Json::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
        .ok_or(DatapointError::Timestamp)?;
        return Ok(ParsedDatapoint {
            series: map
                .get("external_id")
                .and_then(Json::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            timestamp: Some(timestamp),
            value,
        });
    }

    let numeric: Vec<f64> = map.values().filter_map(scalar).collect();
    match numeric.as_slice() {
        [value] => Ok(ParsedDatapoint::scalar(*value)),
        [] => Err(DatapointError::NotNumeric(preview(&Json::Object(map.clone()).to_string()))),
        many => Err(DatapointError::Ambiguous(many.len())),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn bool_word(text: &str) -> Option<f64> {
    let lower = text.to_ascii_lowercase();
    if TRUE_WORDS.contains(&lower.as_str()) {
        Some(1.0)
    } else if FALSE_WORDS.contains(&lower.as_str()) {
        Some(0.0)
    } else {
        None
    }
}

/// Numbers and booleans.
fn scalar(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Json::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Like [`scalar`], also reading numeric strings and on/off words.
fn member_value(value: &Json) -> Option<f64> {
    match value {
        Json::String(s) => parse_number(s.trim()).or_else(|| bool_word(s.trim())),
        other => scalar(other),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}

/// Topic with `strip` removed from the front.
pub fn display_topic<'a>(topic: &'a str, strip: &str) -> &'a str {
    if strip.is_empty() {
        return topic;
    }
    topic.strip_prefix(strip).unwrap_or(topic)
}

/// Series name for a topic: `strip` removed, `/` replaced with `_`.
pub fn series_name(topic: &str, strip: &str) -> String {
    display_topic(topic, strip).replace('/', "_")
}

#[derive(Debug)]
struct StatusHeartbeat {
    pipeline: String,
    interval: Duration,
    next: Mutex<Option<Instant>>,
}

/// Writes datapoints, creating series on first sight.
#[derive(Debug)]
pub struct TimeSeriesSink {
    prefix: String,
    strip: String,
    known: Mutex<HashSet<(String, String)>>,
    status: Option<StatusHeartbeat>,
}

impl TimeSeriesSink {
    pub fn new(config: &TimeSeriesConfig) -> Self {
        Self {
            prefix: config.external_id_prefix.clone(),
            strip: config.strip_topic_prefix.clone(),
            known: Mutex::new(HashSet::new()),
            status: config
                .status_pipeline
                .clone()
                .map(|pipeline| StatusHeartbeat {
                    pipeline,
                    interval: config.status_interval(),
                    next: Mutex::new(None),
                }),
        }
    }

    /// External id of the series a datapoint from `topic` belongs to.
    pub fn external_id(&self, topic: &str, point: &ParsedDatapoint) -> String {
        let source = point.series.as_deref().unwrap_or(topic);
        format!("{}{}", self.prefix, series_name(source, &self.strip))
    }

    pub fn is_known(&self, instance_space: &str, external_id: &str) -> bool {
        self.known
            .lock()
            .contains(&(instance_space.to_string(), external_id.to_string()))
    }

    /// Append one datapoint, creating its series first when unknown.
    /// `received_ms` stamps payloads without their own timestamp. Returns
    /// the series external id.
    pub async fn write<B: Backend>(
        &self,
        backend: &B,
        target: &TimeSeriesTarget,
        topic: &str,
        point: &ParsedDatapoint,
        received_ms: i64,
    ) -> Result<String, BackendError> {
        let external_id = self.external_id(topic, point);
        let space = &target.collection.instance_space;

        if !self.is_known(space, &external_id) {
            let name = display_topic(topic, &self.strip);
            let series = SeriesDefinition {
                collection: target.collection.clone(),
                external_id: external_id.clone(),
                name: name.to_string(),
                description: format!("Time series from MQTT topic: {}", name),
                topic: topic.to_string(),
            };
            backend.ensure_timeseries(&series).await?;
            self.known
                .lock()
                .insert((space.clone(), external_id.clone()));
            tracing::info!("new time series {} for {}", external_id, topic);
        }

        let datapoint = Datapoint {
            timestamp: point.timestamp.unwrap_or(received_ms),
            value: point.value,
        };
        backend
            .insert_datapoints(space, &external_id, &[datapoint])
            .await?;
        tracing::debug!(
            "datapoint {} = {} @ {}",
            external_id,
            datapoint.value,
            datapoint.timestamp
        );
        Ok(external_id)
    }

    /// Report the status pipeline as alive, at most once per interval.
    /// A failed report is retried after the next upload.
    pub async fn heartbeat<B: Backend>(&self, backend: &B, now: Instant) {
        let Some(status) = &self.status else {
            return;
        };
        if status.next.lock().is_some_and(|next| now < next) {
            return;
        }
        match backend.report_status(&status.pipeline).await {
            Ok(()) => *status.next.lock() = Some(now + status.interval),
            Err(e) => tracing::warn!("status report for {} failed: {}", status.pipeline, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CollectionRef, MemoryBackend};

    fn parse(payload: &str) -> Result<ParsedDatapoint, DatapointError> {
        parse_datapoint(payload.as_bytes())
    }

    fn value(payload: &str) -> f64 {
        parse(payload).expect("datapoint").value
    }

    fn target() -> TimeSeriesTarget {
        TimeSeriesTarget {
            collection: CollectionRef {
                schema_space: "sp_schema".into(),
                name: "haTimeSeries".into(),
                version: Some("v1".into()),
                instance_space: "sp_ha".into(),
            },
        }
    }

    #[test]
    fn test_plain_values() {
        assert_eq!(value(" 20.66\n"), 20.66);
        assert_eq!(value("-3"), -3.0);
        assert_eq!(value("ON"), 1.0);
        assert_eq!(value("Disarmed"), 0.0);
        assert_eq!(parse("").unwrap_err(), DatapointError::Empty);
        assert!(matches!(parse("idle"), Err(DatapointError::NotNumeric(_))));
        assert!(matches!(parse("NaN"), Err(DatapointError::NotNumeric(_))));
        assert!(matches!(parse("[1, 2]"), Err(DatapointError::NotNumeric(_))));
        assert_eq!(
            parse_datapoint(&[0xff, 0xfe]).unwrap_err(),
            DatapointError::NotUtf8
        );
    }

    #[test]
    fn test_single_member_object() {
        assert_eq!(value(r#"{"temperature": 21.5, "unit": "C"}"#), 21.5);
        assert_eq!(value(r#"{"state": true, "label": "door"}"#), 1.0);
        assert_eq!(
            parse(r#"{"a": 1, "b": 2}"#).unwrap_err(),
            DatapointError::Ambiguous(2)
        );
        assert!(matches!(
            parse(r#"{"unit": "C"}"#),
            Err(DatapointError::NotNumeric(_))
        ));
    }

    #[test]
    fn test_structured_datapoint() {
        let point = parse(
            r#"{"value": "closed", "timestamp": 1700000000123.7, "external_id": "states/door/front"}"#,
        )
        .expect("datapoint");
        assert_eq!(
            point,
            ParsedDatapoint {
                series: Some("states/door/front".into()),
                timestamp: Some(1_700_000_000_123),
                value: 0.0,
            }
        );

        let point = parse(r#"{"value": "12.5", "timestamp": 5}"#).expect("datapoint");
        assert_eq!(point.series, None);
        assert_eq!(point.value, 12.5);

        assert!(matches!(
            parse(r#"{"value": "stuck", "timestamp": 5}"#),
            Err(DatapointError::NotNumeric(_))
        ));
        assert_eq!(
            parse(r#"{"value": 1, "timestamp": "now"}"#).unwrap_err(),
            DatapointError::Timestamp
        );
    }

    #[test]
    fn test_series_naming() {
        assert_eq!(series_name("states/sensor/temp", "states/"), "sensor_temp");
        assert_eq!(series_name("plant/temp", "states/"), "plant_temp");
        assert_eq!(series_name("states/x", ""), "states_x");

        let sink = TimeSeriesSink::new(&TimeSeriesConfig::default());
        let point = ParsedDatapoint::scalar(1.0);
        assert_eq!(
            sink.external_id("states/sensor/temp", &point),
            "mqtt:sensor_temp"
        );
        let named = ParsedDatapoint {
            series: Some("states/door/front".into()),
            ..point
        };
        assert_eq!(sink.external_id("ignored", &named), "mqtt:door_front");
    }

    #[tokio::test]
    async fn test_series_created_once() {
        let backend = MemoryBackend::new();
        let sink = TimeSeriesSink::new(&TimeSeriesConfig::default());
        let point = ParsedDatapoint::scalar(20.5);

        let id = sink
            .write(&backend, &target(), "states/sensor/temp", &point, 1_000)
            .await
            .expect("write");
        assert_eq!(id, "mqtt:sensor_temp");
        assert!(sink.is_known("sp_ha", &id));

        // Series is cached, so the injected failure hits the insert.
        backend.fail_next(BackendError::Transport("reset".into()));
        assert!(sink
            .write(&backend, &target(), "states/sensor/temp", &point, 2_000)
            .await
            .is_err());
        sink.write(&backend, &target(), "states/sensor/temp", &point, 3_000)
            .await
            .expect("retry");

        let series = backend.series("sp_ha", &id).expect("series");
        assert_eq!(series.name, "sensor/temp");
        assert_eq!(series.description, "Time series from MQTT topic: sensor/temp");
        let stamps: Vec<_> = backend
            .datapoints("sp_ha", &id)
            .iter()
            .map(|d| d.timestamp)
            .collect();
        assert_eq!(stamps, vec![1_000, 3_000]);
    }

    #[tokio::test]
    async fn test_heartbeat_interval() {
        let backend = MemoryBackend::new();
        let config = TimeSeriesConfig {
            status_pipeline: Some("ep-mqtt".into()),
            status_interval_secs: 60,
            ..Default::default()
        };
        let sink = TimeSeriesSink::new(&config);
        let start = Instant::now();

        sink.heartbeat(&backend, start).await;
        sink.heartbeat(&backend, start + Duration::from_secs(30)).await;
        assert_eq!(backend.status_runs().len(), 1);

        backend.fail_next(BackendError::Transport("reset".into()));
        sink.heartbeat(&backend, start + Duration::from_secs(61)).await;
        sink.heartbeat(&backend, start + Duration::from_secs(62)).await;
        assert_eq!(backend.status_runs(), vec!["ep-mqtt", "ep-mqtt"]);
    }
}
