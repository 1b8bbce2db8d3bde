// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT ingestion service
//!
//! Consumes MQTT publishes and writes them into a structured backend while
//! keeping records that reference each other in a consistent order.
//!
//! # Features
//!
//! - **Topic Routing**: Exact and wildcard (`+`, `#`) topic patterns, most
//!   specific route wins
//! - **Normalization**: JSON payloads become records with sanitized
//!   identities and typed references
//! - **Dependency Ordering**: Events whose frame is not stored yet wait in a
//!   bounded pending buffer and are replayed once the frame is written
//! - **Recovery**: Transient backend failures go to an overflow queue replayed
//!   when the backend answers again
//! - **Raw Rows**: Topics can be stored as rows under `db/table`, with a
//!   debounced downstream workflow trigger
//! - **Time Series**: Scalar payloads become datapoints on series created on
//!   first sight, with an optional extraction-pipeline heartbeat
//!
//! # Quick Start
//!
//! ```bash
//! # Write an example configuration
//! mqtt-ingest gen-config --output ingest.toml
//!
//! # Run against the configured backend
//! mqtt-ingest --config ingest.toml
//!
//! # Run against an in-memory backend
//! mqtt-ingest --config ingest.toml --dry-run
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! name = "site-ingest"
//!
//! [mqtt]
//! host = "broker.local"
//!
//! [backend]
//! base_url = "https://api.example.com"
//! project = "plant"
//! token = "${INGEST_TOKEN}"
//!
//! [defaults]
//! instance_space = "sp_site"
//!
//! [[routes]]
//! topic = "alarms/frame"
//! collection = "AlarmFrame"
//!
//! [[routes]]
//! topic = "alarms/event/#"
//! collection = "AlarmEvent"
//!
//! [[routes]]
//! topic = "states/#"
//! sink = "timeseries"
//! ```

pub mod backend;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dependency;
pub mod mqtt;
pub mod normalize;
pub mod overflow;
pub mod pipeline;
pub mod raw;
pub mod record;
pub mod route;
pub mod sanitize;
pub mod service;
pub mod stats;
pub mod timeseries;
pub mod trigger;

pub use backend::{
    Backend, BackendError, CollectionRef, Datapoint, HttpBackend, MemoryBackend, SeriesDefinition,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, IngestConfig, RouteConfig, SinkKind};
pub use coordinator::{WriteCoordinator, WriteError};
pub use pipeline::{Disposition, Pipeline};
pub use record::{NormalizedRecord, RawMessage, RecordKind, Reference, Value};
pub use route::{Route, RouteTable, TopicPattern};
pub use sanitize::IdSanitizer;
pub use service::{IngestService, ServiceError, ServiceHandle};
pub use stats::{IngestStats, IngestStatsSnapshot};
pub use timeseries::{parse_datapoint, ParsedDatapoint, TimeSeriesSink};
