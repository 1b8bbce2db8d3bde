// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion service configuration.
//!
//! Supports programmatic construction and TOML or YAML files. File contents
//! go through `${VAR}` environment substitution before parsing.

use crate::record::RecordKind;
use crate::route::TopicPattern;
use crate::sanitize::IdSanitizer;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Service name (used in logs and as default MQTT client id suffix).
    #[serde(default = "default_name")]
    pub name: String,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Statistics reporting interval (seconds). 0 selects the adaptive cadence.
    #[serde(default)]
    pub stats_interval_secs: u64,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub classify: ClassifyConfig,

    #[serde(default)]
    pub dependency: DependencyConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub overflow: OverflowConfig,

    /// Downstream workflow fired after raw writes.
    #[serde(default)]
    pub workflow: Option<WorkflowConfig>,

    #[serde(default)]
    pub timeseries: TimeSeriesConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Topic routes.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_name() -> String {
    "mqtt-ingest".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            stats_interval_secs: 0,
            mqtt: MqttConfig::default(),
            backend: BackendConfig::default(),
            identity: IdentityConfig::default(),
            classify: ClassifyConfig::default(),
            dependency: DependencyConfig::default(),
            buffer: BufferConfig::default(),
            overflow: OverflowConfig::default(),
            workflow: None,
            timeseries: TimeSeriesConfig::default(),
            defaults: DefaultsConfig::default(),
            routes: Vec::new(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from a file. `.yaml`/`.yml` are read as YAML,
    /// anything else as TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let content = substitute_env(&content);
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routes.is_empty() {
            return Err(ConfigError::Invalid("No routes configured".into()));
        }

        let mut seen = HashSet::new();
        for (i, route) in self.routes.iter().enumerate() {
            TopicPattern::parse(&route.topic).map_err(|e| {
                ConfigError::Invalid(format!("Route {} ({}): {}", i, route.topic, e))
            })?;
            if !seen.insert(route.topic.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Route {} duplicates topic pattern '{}'",
                    i, route.topic
                )));
            }

            if route.sink == SinkKind::DataModel
                && route.collection.as_deref().map_or(true, str::is_empty)
            {
                return Err(ConfigError::Invalid(format!(
                    "Route {} ({}) has no collection",
                    i, route.topic
                )));
            }
            if route.sink != SinkKind::Raw && self.instance_space_for(route).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "Route {} ({}) has no instance_space and no default",
                    i, route.topic
                )));
            }
        }

        IdSanitizer::new(&self.identity).map_err(ConfigError::Invalid)?;

        if self.classify.event_marker.is_empty() || self.classify.frame_marker.is_empty() {
            return Err(ConfigError::Invalid("Kind markers must not be empty".into()));
        }
        if self.dependency.field.is_empty() || self.dependency.collection.is_empty() {
            return Err(ConfigError::Invalid(
                "Dependency field and collection must be set".into(),
            ));
        }
        if self.buffer.max_entries == 0 || self.buffer.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "Buffer max_entries and timeout_secs must be positive".into(),
            ));
        }
        if self.overflow.enabled
            && (self.overflow.max_entries == 0 || self.overflow.timeout_secs == 0)
        {
            return Err(ConfigError::Invalid(
                "Overflow max_entries and timeout_secs must be positive".into(),
            ));
        }
        if self.mqtt.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "MQTT QoS {} out of range (0-2)",
                self.mqtt.qos
            )));
        }
        if let Some(workflow) = &self.workflow {
            if workflow.external_id.is_empty() {
                return Err(ConfigError::Invalid("Workflow external_id is empty".into()));
            }
        }
        if self.timeseries.collection.is_empty() {
            return Err(ConfigError::Invalid(
                "Time series collection must be set".into(),
            ));
        }
        if self.timeseries.status_pipeline.as_deref() == Some("") {
            return Err(ConfigError::Invalid("Status pipeline is empty".into()));
        }

        Ok(())
    }

    /// Add a route.
    pub fn add_route(&mut self, route: RouteConfig) {
        self.routes.push(route);
    }

    /// Instance space a data-model route writes into.
    pub fn instance_space_for<'a>(&'a self, route: &'a RouteConfig) -> Option<&'a str> {
        route
            .instance_space
            .as_deref()
            .or(self.defaults.instance_space.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client id. Defaults to the service name.
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_true")]
    pub clean_session: bool,

    /// Subscription QoS (0, 1 or 2).
    #[serde(default = "default_qos")]
    pub qos: u8,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Outgoing request channel capacity of the MQTT client.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: None,
            username: None,
            password: None,
            clean_session: true,
            qos: default_qos(),
            keep_alive_secs: default_keep_alive(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Backend HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_project")]
    pub project: String,

    /// Static bearer token.
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Error message fragments that identify a missing referenced record
    /// when the backend gives no structured error kind.
    #[serde(default = "default_dependency_markers")]
    pub dependency_markers: Vec<String>,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_project() -> String {
    "default".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_dependency_markers() -> Vec<String> {
    vec![
        "does not exist".to_string(),
        "direct relation target".to_string(),
    ]
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            project: default_project(),
            token: None,
            request_timeout_secs: default_request_timeout(),
            dependency_markers: default_dependency_markers(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Identity sanitizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Prepended to identities that do not start with a letter.
    #[serde(default = "default_canonical_prefix")]
    pub canonical_prefix: String,

    /// Upstream namespace prefixes replaced by the canonical prefix.
    #[serde(default = "default_namespace_prefixes")]
    pub namespace_prefixes: Vec<String>,

    /// Identity used when nothing survives sanitization.
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

fn default_canonical_prefix() -> String {
    "id_".to_string()
}

fn default_namespace_prefixes() -> Vec<String> {
    vec!["mqtt:".to_string()]
}

fn default_fallback() -> String {
    "unknown".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            canonical_prefix: default_canonical_prefix(),
            namespace_prefixes: default_namespace_prefixes(),
            fallback: default_fallback(),
        }
    }
}

/// Collection-name markers used to derive a route's record kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyConfig {
    #[serde(default = "default_event_marker")]
    pub event_marker: String,

    #[serde(default = "default_frame_marker")]
    pub frame_marker: String,
}

fn default_event_marker() -> String {
    "Event".to_string()
}

fn default_frame_marker() -> String {
    "Frame".to_string()
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            event_marker: default_event_marker(),
            frame_marker: default_frame_marker(),
        }
    }
}

impl ClassifyConfig {
    /// Coarse kind of a collection by substring. Event wins over Frame.
    pub fn kind_of(&self, collection: &str) -> RecordKind {
        if collection.contains(&self.event_marker) {
            RecordKind::Event
        } else if collection.contains(&self.frame_marker) {
            RecordKind::Frame
        } else {
            RecordKind::Other
        }
    }
}

/// Where event records name their frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Field holding the reference (after `ExternalId` stripping).
    #[serde(default = "default_dependency_field")]
    pub field: String,

    /// Collection the referenced records live in.
    #[serde(default = "default_dependency_collection")]
    pub collection: String,

    /// Schema space of the collection. Falls back to `defaults.schema_space`.
    #[serde(default)]
    pub schema_space: Option<String>,

    /// Collection version. Falls back to `defaults.version`.
    #[serde(default)]
    pub version: Option<String>,
}

fn default_dependency_field() -> String {
    "frame".to_string()
}

fn default_dependency_collection() -> String {
    "AlarmFrame".to_string()
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            field: default_dependency_field(),
            collection: default_dependency_collection(),
            schema_space: None,
            version: None,
        }
    }
}

/// Pending buffer bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum buffered entries across all keys.
    #[serde(default = "default_buffer_max")]
    pub max_entries: usize,

    /// Entry lifetime (seconds).
    #[serde(default = "default_buffer_timeout")]
    pub timeout_secs: u64,

    /// Expiry sweep period (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_buffer_max() -> usize {
    1000
}

fn default_buffer_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    30
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_entries: default_buffer_max(),
            timeout_secs: default_buffer_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl BufferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Connectivity-loss overflow queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverflowConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_overflow_max")]
    pub max_entries: usize,

    /// Entry lifetime (seconds).
    #[serde(default = "default_overflow_timeout")]
    pub timeout_secs: u64,

    /// Probe period when no write has succeeded recently (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

fn default_overflow_max() -> usize {
    10_000
}

fn default_overflow_timeout() -> u64 {
    86_400
}

fn default_probe_interval() -> u64 {
    60
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: default_overflow_max(),
            timeout_secs: default_overflow_timeout(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

/// Debounced downstream workflow trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub external_id: String,

    #[serde(default)]
    pub version: Option<String>,

    /// Minimum time between two runs (seconds).
    #[serde(default = "default_trigger_interval")]
    pub trigger_interval_secs: u64,

    /// Quiet period after the last write before a run (seconds).
    #[serde(default = "default_debounce_window")]
    pub debounce_window_secs: u64,
}

fn default_trigger_interval() -> u64 {
    300
}

fn default_debounce_window() -> u64 {
    5
}

/// Series created by `timeseries` routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesConfig {
    /// Prepended to every series external id.
    #[serde(default = "default_series_prefix")]
    pub external_id_prefix: String,

    /// Leading topic segment dropped when naming a series.
    #[serde(default = "default_strip_topic_prefix")]
    pub strip_topic_prefix: String,

    /// Collection a series is registered in (schema space and version from
    /// `[defaults]`).
    #[serde(default = "default_series_collection")]
    pub collection: String,

    /// Extraction pipeline receiving a success heartbeat after uploads.
    #[serde(default)]
    pub status_pipeline: Option<String>,

    /// Minimum time between two heartbeats (seconds).
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

fn default_series_prefix() -> String {
    "mqtt:".to_string()
}

fn default_strip_topic_prefix() -> String {
    "states/".to_string()
}

fn default_series_collection() -> String {
    "haTimeSeries".to_string()
}

fn default_status_interval() -> u64 {
    60
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            external_id_prefix: default_series_prefix(),
            strip_topic_prefix: default_strip_topic_prefix(),
            collection: default_series_collection(),
            status_pipeline: None,
            status_interval_secs: default_status_interval(),
        }
    }
}

impl TimeSeriesConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

/// Values shared by routes that leave them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_schema_space")]
    pub schema_space: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub instance_space: Option<String>,
}

fn default_schema_space() -> String {
    "sp_schema".to_string()
}

fn default_version() -> String {
    "v1".to_string()
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            schema_space: default_schema_space(),
            version: default_version(),
            instance_space: None,
        }
    }
}

/// What a route does with matching messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Normalize into a record of a data-model collection.
    #[default]
    DataModel,
    /// Store the payload as a row under `db/table` taken from the topic.
    Raw,
    /// Append a scalar payload as a datapoint to a series named after the
    /// topic.
    #[serde(rename = "timeseries")]
    TimeSeries,
}

/// Configuration for a single route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Topic pattern (`a/b`, `a/#`, `a/+/c`, `#`, `*`).
    pub topic: String,

    #[serde(default)]
    pub sink: SinkKind,

    /// Target collection (data-model routes).
    #[serde(default)]
    pub collection: Option<String>,

    /// Space records are written into.
    #[serde(default)]
    pub instance_space: Option<String>,

    #[serde(default)]
    pub schema_space: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    /// Explicit kind, overriding the collection-name markers.
    #[serde(default)]
    pub kind: Option<RecordKind>,

    /// Render epoch-millisecond `*time*` fields as RFC 3339.
    #[serde(default)]
    pub normalize_timestamps: bool,
}

impl RouteConfig {
    /// Create a data-model route.
    pub fn data_model(
        topic: impl Into<String>,
        collection: impl Into<String>,
        instance_space: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            sink: SinkKind::DataModel,
            collection: Some(collection.into()),
            instance_space: Some(instance_space.into()),
            schema_space: None,
            version: None,
            kind: None,
            normalize_timestamps: false,
        }
    }

    /// Create a raw-row route.
    pub fn raw(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            sink: SinkKind::Raw,
            collection: None,
            instance_space: None,
            schema_space: None,
            version: None,
            kind: None,
            normalize_timestamps: false,
        }
    }

    /// Create a time-series route.
    pub fn timeseries(topic: impl Into<String>, instance_space: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            sink: SinkKind::TimeSeries,
            collection: None,
            instance_space: Some(instance_space.into()),
            schema_space: None,
            version: None,
            kind: None,
            normalize_timestamps: false,
        }
    }

    /// Force the record kind.
    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Enable timestamp normalization.
    pub fn normalize_timestamps(mut self, enabled: bool) -> Self {
        self.normalize_timestamps = enabled;
        self
    }
}

fn env_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([^}]+)\}").ok())
        .as_ref()
}

/// Replace `${VAR}` with the environment value. Unset variables stay verbatim.
pub fn substitute_env(text: &str) -> String {
    substitute_with(text, |name| std::env::var(name).ok())
}

/// Replace `${VAR}` using `lookup`.
pub fn substitute_with<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let Some(pattern) = env_pattern() else {
        return text.to_string();
    };
    pattern
        .replace_all(text, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> IngestConfig {
        IngestConfig {
            routes: vec![
                RouteConfig::data_model("events/alarms/frame", "AlarmFrame", "sp_site"),
                RouteConfig::data_model("events/alarms/log", "AlarmEvent", "sp_site"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_has_no_routes() {
        let config = IngestConfig::default();
        assert!(config.validate().is_err());
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
            name = "plant-a"

            [buffer]
            max_entries = 50

            [[routes]]
            topic = "events/alarms/frame"
            collection = "AlarmFrame"
            instance_space = "sp_site"

            [[routes]]
            topic = "raw/#"
            sink = "raw"
        "#;
        let config = IngestConfig::from_toml_str(text).expect("parse");
        assert_eq!(config.name, "plant-a");
        assert_eq!(config.buffer.max_entries, 50);
        assert_eq!(config.buffer.timeout_secs, 300);
        assert_eq!(config.routes[1].sink, SinkKind::Raw);
        assert_eq!(config.overflow.max_entries, 10_000);
    }

    #[test]
    fn test_parse_yaml_file_with_env() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("tempfile");
        writeln!(
            file,
            "routes:\n  - topic: \"a/b\"\n    collection: \"${{MQTT_INGEST_TEST_COLLECTION}}\"\n    instance_space: sp\n    kind: frame"
        )
        .expect("write");
        std::env::set_var("MQTT_INGEST_TEST_COLLECTION", "Things");

        let config = IngestConfig::from_file(file.path()).expect("load");
        assert_eq!(config.routes[0].collection.as_deref(), Some("Things"));
        assert_eq!(config.routes[0].kind, Some(RecordKind::Frame));
    }

    #[test]
    fn test_substitute_keeps_unknown() {
        let out = substitute_with("a=${ONE} b=${MISSING}", |name| {
            (name == "ONE").then(|| "1".to_string())
        });
        assert_eq!(out, "a=1 b=${MISSING}");
    }

    #[test]
    fn test_validate_rejects_missing_collection() {
        let mut config = sample();
        config.routes[0].collection = None;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_uses_default_instance_space() {
        let mut config = sample();
        config.routes[0].instance_space = None;
        assert!(config.validate().is_err());
        config.defaults.instance_space = Some("sp_default".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_and_bad_patterns() {
        let mut config = sample();
        config.add_route(RouteConfig::raw("events/alarms/frame"));
        assert!(config.validate().is_err());

        let mut config = sample();
        config.add_route(RouteConfig::raw("a/#/b"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_identity() {
        let mut config = sample();
        config.identity.canonical_prefix = "_".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_timeseries_routes() {
        let text = r#"
            [defaults]
            instance_space = "sp_ha"

            [timeseries]
            status_pipeline = "ep-mqtt"

            [[routes]]
            topic = "states/#"
            sink = "timeseries"
        "#;
        let config = IngestConfig::from_toml_str(text).expect("parse");
        assert_eq!(config.routes[0].sink, SinkKind::TimeSeries);
        assert_eq!(config.timeseries.external_id_prefix, "mqtt:");
        assert_eq!(config.timeseries.collection, "haTimeSeries");
        assert_eq!(config.timeseries.status_pipeline.as_deref(), Some("ep-mqtt"));
        assert_eq!(config.timeseries.status_interval(), Duration::from_secs(60));

        let mut config = config;
        config.defaults.instance_space = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_kind_of_collection() {
        let classify = ClassifyConfig::default();
        assert_eq!(classify.kind_of("AlarmEvent"), RecordKind::Event);
        assert_eq!(classify.kind_of("AlarmFrame"), RecordKind::Frame);
        assert_eq!(classify.kind_of("EventFrame"), RecordKind::Event);
        assert_eq!(classify.kind_of("Pump"), RecordKind::Other);
    }

    #[test]
    fn test_toml_round_trip_of_generated_config() {
        let mut config = sample();
        config.workflow = Some(WorkflowConfig {
            external_id: "wf".into(),
            version: Some("1".into()),
            trigger_interval_secs: 300,
            debounce_window_secs: 5,
        });
        let text = toml::to_string_pretty(&config).expect("serialize");
        let parsed = IngestConfig::from_toml_str(&text).expect("parse");
        assert_eq!(parsed.routes.len(), 2);
        assert_eq!(parsed.workflow.map(|w| w.external_id), Some("wf".into()));
    }
}
