// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic routing.
//!
//! Routes are resolved once from configuration into a [`RouteTable`]. Lookup
//! picks the most specific matching pattern: an exact pattern beats any
//! wildcard, then more literal levels win, then `+` beats `#`, then the
//! earlier route in configuration order.

use crate::backend::CollectionRef;
use crate::config::{ConfigError, IngestConfig, RouteConfig, SinkKind};
use crate::record::RecordKind;
use thiserror::Error;

/// Invalid topic pattern.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty topic pattern")]
    Empty,

    #[error("'#' must be the last level")]
    MultiLevelNotLast,

    #[error("wildcard must occupy a whole level: '{0}'")]
    PartialWildcard(String),
}

/// One level of a topic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Literal(String),
    /// `+`
    Single,
    /// `#`, always last.
    Multi,
}

/// Parsed MQTT topic filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    source: String,
    levels: Vec<Level>,
}

impl TopicPattern {
    /// Parse a pattern. `*` is accepted as an alias for `#`.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        let source = if pattern == "*" { "#" } else { pattern };

        let parts: Vec<&str> = source.split('/').collect();
        let mut levels = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let level = match *part {
                "#" if i + 1 == parts.len() => Level::Multi,
                "#" => return Err(PatternError::MultiLevelNotLast),
                "+" => Level::Single,
                p if p.contains('#') || p.contains('+') => {
                    return Err(PatternError::PartialWildcard(p.to_string()))
                }
                p => Level::Literal(p.to_string()),
            };
            levels.push(level);
        }

        Ok(Self {
            source: source.to_string(),
            levels,
        })
    }

    /// Filter string as sent to the broker.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_exact(&self) -> bool {
        self.levels.iter().all(|l| matches!(l, Level::Literal(_)))
    }

    /// Check if a topic matches. `a/#` also matches `a`.
    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split('/').collect();
        let mut i = 0;
        for level in &self.levels {
            match level {
                Level::Multi => return true,
                Level::Single => {
                    if i >= parts.len() {
                        return false;
                    }
                }
                Level::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return false;
                    }
                }
            }
            i += 1;
        }
        i == parts.len()
    }

    /// Ordering key, larger is more specific.
    fn specificity(&self) -> (bool, usize, bool, usize) {
        let literals = self
            .levels
            .iter()
            .filter(|l| matches!(l, Level::Literal(_)))
            .count();
        let has_multi = matches!(self.levels.last(), Some(Level::Multi));
        (self.is_exact(), literals, !has_multi, self.levels.len())
    }
}

/// Data-model destination of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataModelTarget {
    /// Collection definition and record space.
    pub collection: CollectionRef,
    /// Kind of records produced on this route.
    pub kind: RecordKind,
    pub normalize_timestamps: bool,
}

/// Time-series destination of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesTarget {
    /// Collection series are registered in, and the space holding them.
    pub collection: CollectionRef,
}

/// What a route does with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    DataModel(DataModelTarget),
    Raw,
    TimeSeries(TimeSeriesTarget),
}

impl RouteTarget {
    /// Record kind used for statistics and buffering.
    pub fn kind(&self) -> RecordKind {
        match self {
            RouteTarget::DataModel(t) => t.kind,
            RouteTarget::Raw | RouteTarget::TimeSeries(_) => RecordKind::Other,
        }
    }
}

/// A resolved route.
#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: TopicPattern,
    pub target: RouteTarget,
}

impl Route {
    /// Resolve one route from configuration.
    pub fn from_config(config: &IngestConfig, route: &RouteConfig) -> Result<Self, String> {
        let pattern = TopicPattern::parse(&route.topic).map_err(|e| e.to_string())?;
        let target = match route.sink {
            SinkKind::Raw => RouteTarget::Raw,
            SinkKind::TimeSeries => RouteTarget::TimeSeries(TimeSeriesTarget {
                collection: collection_ref(config, route, config.timeseries.collection.clone())?,
            }),
            SinkKind::DataModel => {
                let name = route
                    .collection
                    .clone()
                    .ok_or_else(|| format!("route '{}' has no collection", route.topic))?;
                let kind = route
                    .kind
                    .unwrap_or_else(|| config.classify.kind_of(&name));
                RouteTarget::DataModel(DataModelTarget {
                    collection: collection_ref(config, route, name)?,
                    kind,
                    normalize_timestamps: route.normalize_timestamps,
                })
            }
        };
        Ok(Self { pattern, target })
    }

    /// Check if this route handles a given topic.
    pub fn matches_topic(&self, topic: &str) -> bool {
        self.pattern.matches(topic)
    }
}

/// Collection `name` as seen from `route`, with unset parts from `[defaults]`.
fn collection_ref(
    config: &IngestConfig,
    route: &RouteConfig,
    name: String,
) -> Result<CollectionRef, String> {
    let instance_space = config
        .instance_space_for(route)
        .ok_or_else(|| format!("route '{}' has no instance_space", route.topic))?
        .to_string();
    Ok(CollectionRef {
        schema_space: route
            .schema_space
            .clone()
            .unwrap_or_else(|| config.defaults.schema_space.clone()),
        name,
        version: Some(
            route
                .version
                .clone()
                .unwrap_or_else(|| config.defaults.version.clone()),
        ),
        instance_space,
    })
}

/// Typed route registry, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Resolve every configured route.
    pub fn from_config(config: &IngestConfig) -> Result<Self, ConfigError> {
        let routes = config
            .routes
            .iter()
            .map(|r| Route::from_config(config, r))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::Invalid)?;
        Ok(Self { routes })
    }

    /// Most specific route for `topic`.
    pub fn find(&self, topic: &str) -> Option<&Route> {
        let mut best: Option<&Route> = None;
        for route in self.routes.iter().filter(|r| r.matches_topic(topic)) {
            match best {
                Some(b) if b.pattern.specificity() >= route.pattern.specificity() => {}
                _ => best = Some(route),
            }
        }
        best
    }

    /// Broker subscription filters.
    pub fn subscriptions(&self) -> Vec<String> {
        self.routes
            .iter()
            .map(|r| r.pattern.as_str().to_string())
            .collect()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(p: &str) -> TopicPattern {
        TopicPattern::parse(p).expect("pattern")
    }

    #[test]
    fn test_exact_match() {
        let p = pattern("events/alarms/frame");
        assert!(p.is_exact());
        assert!(p.matches("events/alarms/frame"));
        assert!(!p.matches("events/alarms"));
        assert!(!p.matches("events/alarms/frame/x"));
    }

    #[test]
    fn test_multi_level_match() {
        let p = pattern("sensors/#");
        assert!(p.matches("sensors"));
        assert!(p.matches("sensors/a"));
        assert!(p.matches("sensors/a/b/c"));
        assert!(!p.matches("sensorsx/a"));

        assert!(pattern("#").matches("anything/at/all"));
        assert!(pattern("*").matches("x"));
        assert_eq!(pattern("*").as_str(), "#");
    }

    #[test]
    fn test_single_level_match() {
        let p = pattern("site/+/temp");
        assert!(p.matches("site/a/temp"));
        assert!(!p.matches("site/a/b/temp"));
        assert!(!p.matches("site/temp"));
        assert!(pattern("+").matches("a"));
        assert!(!pattern("+").matches("a/b"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert_eq!(TopicPattern::parse(""), Err(PatternError::Empty));
        assert_eq!(
            TopicPattern::parse("a/#/b"),
            Err(PatternError::MultiLevelNotLast)
        );
        assert!(matches!(
            TopicPattern::parse("a/b+"),
            Err(PatternError::PartialWildcard(_))
        ));
    }

    fn table(topics: &[&str]) -> RouteTable {
        let mut config = IngestConfig::default();
        for (i, topic) in topics.iter().enumerate() {
            config.add_route(RouteConfig::data_model(*topic, format!("C{}", i), "sp"));
        }
        RouteTable::from_config(&config).expect("table")
    }

    fn found(table: &RouteTable, topic: &str) -> Option<String> {
        table.find(topic).map(|r| r.pattern.as_str().to_string())
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let t = table(&["events/#", "events/alarms/frame", "events/+/frame"]);
        assert_eq!(
            found(&t, "events/alarms/frame").as_deref(),
            Some("events/alarms/frame")
        );
    }

    #[test]
    fn test_longest_wildcard_wins() {
        let t = table(&["#", "events/#", "events/alarms/#"]);
        assert_eq!(
            found(&t, "events/alarms/log").as_deref(),
            Some("events/alarms/#")
        );
        assert_eq!(found(&t, "events/x").as_deref(), Some("events/#"));
        assert_eq!(found(&t, "other").as_deref(), Some("#"));
    }

    #[test]
    fn test_single_level_beats_multi_level_on_tie() {
        let t = table(&["a/#", "a/+"]);
        assert_eq!(found(&t, "a/b").as_deref(), Some("a/+"));
    }

    #[test]
    fn test_no_route() {
        let t = table(&["a/b"]);
        assert!(t.find("c").is_none());
    }

    #[test]
    fn test_kind_resolution() {
        let mut config = IngestConfig::default();
        config.add_route(RouteConfig::data_model("f", "AlarmFrame", "sp"));
        config.add_route(RouteConfig::data_model("e", "AlarmEvent", "sp"));
        config.add_route(RouteConfig::data_model("o", "Pump", "sp").kind(RecordKind::Frame));
        config.add_route(RouteConfig::raw("raw/#"));
        let t = RouteTable::from_config(&config).expect("table");

        let kinds: Vec<_> = ["f", "e", "o", "raw/x"]
            .iter()
            .map(|topic| t.find(topic).expect("route").target.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                RecordKind::Frame,
                RecordKind::Event,
                RecordKind::Frame,
                RecordKind::Other
            ]
        );
        assert_eq!(t.subscriptions(), vec!["f", "e", "o", "raw/#"]);
    }

    #[test]
    fn test_timeseries_target() {
        let mut config = IngestConfig::default();
        config.defaults.schema_space = "cdf_cdm".into();
        config.add_route(RouteConfig::timeseries("states/#", "sp_ha"));
        let t = RouteTable::from_config(&config).expect("table");

        let route = t.find("states/sensor/temp").expect("route");
        assert_eq!(route.target.kind(), RecordKind::Other);
        let RouteTarget::TimeSeries(target) = &route.target else {
            panic!("expected a time-series target");
        };
        assert_eq!(target.collection.name, "haTimeSeries");
        assert_eq!(target.collection.schema_space, "cdf_cdm");
        assert_eq!(target.collection.instance_space, "sp_ha");
    }
}
