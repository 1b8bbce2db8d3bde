// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordering-aware ingestion pipeline.
//!
//! [`Pipeline`] owns every piece of runtime state: routes, sanitizer,
//! pending buffer, overflow queue, raw and time-series sinks, workflow
//! trigger and statistics. The MQTT intake task calls [`Pipeline::process_message`] once
//! per publish, in arrival order; maintenance timers call
//! [`Pipeline::sweep_expired`] and [`Pipeline::probe_overflow`].
//!
//! Flow for a data-model route:
//!
//! ```text
//! normalize -> event with frame reference?
//!                 |-- frame missing -> pending buffer (key = frame id)
//!                 `-- otherwise     -> write
//!                                       |-- ok, frame   -> drain buffered events
//!                                       |-- missing ref -> overflow queue
//!                                       |-- transient   -> overflow queue
//!                                       `-- fatal       -> dropped
//! ```
//!
//! Buffered entries are replayed with plain writes, so a drain never starts
//! another drain or an overflow pass. A record parked after a negative lookup
//! looks its dependency up once more, since a concurrent overflow replay may
//! have written and drained it in between.

use crate::backend::Backend;
use crate::buffer::{BufferedEntry, PendingBuffer};
use crate::clock::{age, Clock, SystemClock};
use crate::config::{ConfigError, IngestConfig};
use crate::coordinator::{WriteCoordinator, WriteError};
use crate::dependency::DependencyResolver;
use crate::normalize::normalize;
use crate::overflow::{OverflowEntry, OverflowQueue};
use crate::raw::{parse_row, RawSink};
use crate::record::{RawMessage, RecordKind, Reference};
use crate::route::{Route, RouteTable, RouteTarget, TimeSeriesTarget};
use crate::sanitize::IdSanitizer;
use crate::stats::{IngestStats, IngestStatsSnapshot};
use crate::timeseries::{parse_datapoint, TimeSeriesSink};
use crate::trigger::DebouncedTrigger;
use std::sync::Arc;
use std::time::Duration;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Persisted. `drained` counts buffered records replayed as a result.
    Written { id: String, drained: usize },
    /// Parked until the named dependency is written.
    Buffered { dependency: String },
    /// No route matches the topic.
    Unrouted,
    /// Malformed message, dropped.
    Rejected { reason: String },
    /// Write failed. `overflowed` tells whether it was kept for replay.
    Failed { reason: String, overflowed: bool },
}

impl Disposition {
    /// Whether the pipeline took responsibility for the message.
    pub fn is_handled(&self) -> bool {
        matches!(
            self,
            Disposition::Written { .. } | Disposition::Buffered { .. }
        )
    }
}

/// Result of one write attempt, before overflow bookkeeping.
#[derive(Debug)]
enum Attempt {
    Written { id: String, drained: usize },
    Buffered { dependency: String },
    Rejected(String),
    Fatal(String),
    Transient(String),
}

/// Result of replaying one buffered entry.
enum Replay {
    Written,
    Retry(String),
    Dropped(String),
}

/// Ingestion pipeline over a backend `B`.
#[derive(Debug)]
pub struct Pipeline<B: Backend> {
    routes: RouteTable,
    sanitizer: IdSanitizer,
    resolver: DependencyResolver,
    coordinator: WriteCoordinator<B>,
    pending: PendingBuffer,
    overflow: Option<OverflowQueue>,
    probe_interval: Duration,
    raw: RawSink,
    timeseries: TimeSeriesSink,
    trigger: Option<Arc<DebouncedTrigger<B>>>,
    stats: Arc<IngestStats>,
    clock: Arc<dyn Clock>,
}

impl<B: Backend> Pipeline<B> {
    /// Build a pipeline using the system clock.
    pub fn new(config: &IngestConfig, backend: Arc<B>) -> Result<Self, ConfigError> {
        Self::with_clock(config, backend, Arc::new(SystemClock))
    }

    /// Build a pipeline with an explicit clock.
    pub fn with_clock(
        config: &IngestConfig,
        backend: Arc<B>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let routes = RouteTable::from_config(config)?;
        let sanitizer = IdSanitizer::new(&config.identity).map_err(ConfigError::Invalid)?;

        let overflow = config.overflow.enabled.then(|| {
            OverflowQueue::new(
                config.overflow.max_entries,
                Duration::from_secs(config.overflow.timeout_secs),
                clock.clone(),
            )
        });
        let trigger = config.workflow.as_ref().map(|wf| {
            Arc::new(DebouncedTrigger::new(
                backend.clone(),
                wf,
                clock.clone(),
            ))
        });

        Ok(Self {
            routes,
            sanitizer,
            resolver: DependencyResolver::from_config(config),
            coordinator: WriteCoordinator::new(
                backend,
                config.backend.dependency_markers.clone(),
            ),
            pending: PendingBuffer::new(
                config.buffer.max_entries,
                config.buffer.timeout(),
                clock.clone(),
            ),
            overflow,
            probe_interval: Duration::from_secs(config.overflow.probe_interval_secs),
            raw: RawSink::new(),
            timeseries: TimeSeriesSink::new(&config.timeseries),
            trigger,
            stats: Arc::new(IngestStats::new()),
            clock,
        })
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn backend(&self) -> &Arc<B> {
        self.coordinator.backend()
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    pub fn overflow(&self) -> Option<&OverflowQueue> {
        self.overflow.as_ref()
    }

    pub fn trigger(&self) -> Option<&Arc<DebouncedTrigger<B>>> {
        self.trigger.as_ref()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        self.stats.snapshot(
            self.pending.len(),
            self.overflow.as_ref().map_or(0, OverflowQueue::len),
        )
    }

    /// Handle one inbound message. Never fails: every outcome is logged,
    /// counted and reported as a [`Disposition`].
    pub async fn process_message(&self, topic: &str, payload: &[u8]) -> Disposition {
        let Some(route) = self.routes.find(topic) else {
            tracing::debug!("no route for topic {}", topic);
            self.stats.record_unrouted();
            return Disposition::Unrouted;
        };
        let kind = route.target.kind();
        self.stats.record_received(kind);
        let message = RawMessage::new(topic, payload, kind);

        match self.attempt(&message, route).await {
            Attempt::Written { id, drained } => {
                self.retry_overflow().await;
                Disposition::Written { id, drained }
            }
            Attempt::Buffered { dependency } => Disposition::Buffered { dependency },
            Attempt::Rejected(reason) => {
                tracing::warn!("dropping message on {}: {}", topic, reason);
                self.stats.record_error(kind);
                Disposition::Rejected { reason }
            }
            Attempt::Fatal(reason) => {
                self.stats.record_error(kind);
                Disposition::Failed {
                    reason,
                    overflowed: false,
                }
            }
            Attempt::Transient(reason) => {
                self.stats.record_error(kind);
                let overflowed = self.push_overflow(message, &reason);
                Disposition::Failed { reason, overflowed }
            }
        }
    }

    async fn attempt(&self, message: &RawMessage, route: &Route) -> Attempt {
        let (topic, payload) = (message.topic.as_str(), message.payload.as_slice());
        let target = match &route.target {
            RouteTarget::Raw => return self.attempt_raw(topic, payload).await,
            RouteTarget::TimeSeries(target) => {
                return self.attempt_timeseries(message, target).await
            }
            RouteTarget::DataModel(target) => target,
        };

        let record = match normalize(topic, payload, target, &self.sanitizer) {
            Ok(record) => record,
            Err(e) => return Attempt::Rejected(e.to_string()),
        };
        let dependency = self.resolver.extract_dependency(&record);

        if let Some(reference) = dependency {
            match self
                .resolver
                .dependency_exists(self.backend().as_ref(), reference)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    let key = &reference.target_id;
                    let parked = self.park(key, message.clone());
                    self.recheck_parked(reference).await;
                    return parked;
                }
                Err(e) => {
                    tracing::warn!(
                        "dependency check for {} -> {} failed: {}",
                        record.id,
                        reference.target_id,
                        e
                    );
                    return Attempt::Transient(format!("dependency check failed: {}", e));
                }
            }
        }

        match self.coordinator.write(&record, target).await {
            Ok(()) => {
                self.on_written(record.kind);
                let drained = if record.kind.satisfies_dependents() {
                    self.drain_dependents(&record.id).await
                } else {
                    0
                };
                Attempt::Written {
                    id: record.id,
                    drained,
                }
            }
            // The declared dependency was confirmed above, so the missing
            // reference is another one and its write will not drain this key.
            Err(WriteError::DependencyMissing { detail, .. }) => {
                Attempt::Transient(format!("missing reference: {}", detail))
            }
            Err(e @ WriteError::Transient { .. }) => Attempt::Transient(e.to_string()),
            Err(e @ WriteError::Fatal { .. }) => Attempt::Fatal(e.to_string()),
        }
    }

    async fn attempt_raw(&self, topic: &str, payload: &[u8]) -> Attempt {
        let row = match parse_row(topic, payload) {
            Ok(row) => row,
            Err(e) => return Attempt::Rejected(e.to_string()),
        };
        match self.raw.write(self.backend().as_ref(), &row).await {
            Ok(()) => {
                self.on_written(RecordKind::Other);
                if let Some(trigger) = &self.trigger {
                    trigger.notify();
                }
                Attempt::Written {
                    id: format!("{}/{}/{}", row.db, row.table, row.key),
                    drained: 0,
                }
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("raw write {}/{}/{} failed: {}", row.db, row.table, row.key, e);
                Attempt::Transient(e.to_string())
            }
            Err(e) => {
                tracing::error!(
                    "raw write {}/{}/{} rejected: {} {}",
                    row.db,
                    row.table,
                    row.key,
                    e,
                    serde_json::Value::Object(row.columns.clone())
                );
                Attempt::Fatal(e.to_string())
            }
        }
    }

    async fn attempt_timeseries(&self, message: &RawMessage, target: &TimeSeriesTarget) -> Attempt {
        let point = match parse_datapoint(&message.payload) {
            Ok(point) => point,
            Err(e) => return Attempt::Rejected(e.to_string()),
        };
        let backend = self.backend().as_ref();
        match self
            .timeseries
            .write(backend, target, &message.topic, &point, message.received_ms)
            .await
        {
            Ok(external_id) => {
                self.on_written(RecordKind::Other);
                self.timeseries.heartbeat(backend, self.clock.now()).await;
                Attempt::Written {
                    id: external_id,
                    drained: 0,
                }
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("datapoint from {} failed: {}", message.topic, e);
                Attempt::Transient(e.to_string())
            }
            Err(e) => {
                tracing::error!("datapoint from {} rejected: {}", message.topic, e);
                Attempt::Fatal(e.to_string())
            }
        }
    }

    fn on_written(&self, kind: RecordKind) {
        self.stats.record_written(kind);
        if let Some(overflow) = &self.overflow {
            overflow.mark_success();
        }
    }

    fn park(&self, key: &str, message: RawMessage) -> Attempt {
        let kind = message.kind;
        let admission = self.pending.enqueue(key, message);
        for entry in &admission.expired {
            self.report_expired(entry);
        }
        if let Some(evicted) = &admission.evicted {
            self.report_evicted(evicted);
        }
        self.stats.record_buffered(kind);
        tracing::debug!(
            "buffered {} record waiting on {} ({} pending)",
            kind,
            key,
            self.pending.len()
        );
        Attempt::Buffered {
            dependency: key.to_string(),
        }
    }

    fn report_expired(&self, entry: &BufferedEntry) {
        tracing::warn!(
            "dropping record from {} after waiting {:?} for {}",
            entry.message.topic,
            age(self.clock.now(), entry.enqueued_at),
            entry.dependency_key
        );
        self.stats.record_expired(entry.message.kind);
    }

    fn report_evicted(&self, entry: &BufferedEntry) {
        tracing::error!(
            "pending buffer full ({}), data lost: record from {} waiting on {}",
            self.pending.max_entries(),
            entry.message.topic,
            entry.dependency_key
        );
        self.stats.record_evicted(entry.message.kind);
    }

    /// A frame written by another task between the negative lookup and the
    /// enqueue has already drained `key`, so look again once parked.
    async fn recheck_parked(&self, reference: &Reference) {
        let key = &reference.target_id;
        match self
            .resolver
            .dependency_exists(self.backend().as_ref(), reference)
            .await
        {
            Ok(true) => {
                tracing::debug!("{} appeared while parking, draining", key);
                self.drain_dependents(key).await;
            }
            Ok(false) => {}
            Err(e) => tracing::debug!("recheck of {} failed: {}", key, e),
        }
    }

    /// Replay records buffered under `key` in arrival order. Stops at the
    /// first renewed failure, which goes back to the tail of the queue.
    /// Records parked while a pass runs are picked up by another pass.
    /// Returns the number of records written.
    pub async fn drain_dependents(&self, key: &str) -> usize {
        let mut committed = 0;
        loop {
            let Some(guard) = self.pending.begin_drain(key) else {
                tracing::debug!("drain of {} already running", key);
                break;
            };
            let stalled = self.drain_pass(key, &mut committed).await;
            drop(guard);
            if stalled || self.pending.queue_len(key) == 0 {
                break;
            }
        }

        if committed > 0 {
            tracing::info!("replayed {} record(s) waiting on {}", committed, key);
        }
        committed
    }

    /// One pass over the queue for `key`. Returns true when it stopped on a
    /// renewed failure.
    async fn drain_pass(&self, key: &str, committed: &mut usize) -> bool {
        while let Some(entry) = self.pending.pop_front(key) {
            if self.pending.is_expired(&entry) {
                self.report_expired(&entry);
                continue;
            }
            let kind = entry.message.kind;
            match self.replay(&entry.message).await {
                Replay::Written => {
                    *committed += 1;
                    self.stats.record_retried(kind);
                }
                Replay::Dropped(reason) => {
                    tracing::warn!(
                        "dropping buffered record from {}: {}",
                        entry.message.topic,
                        reason
                    );
                    self.stats.record_error(kind);
                }
                Replay::Retry(reason) => {
                    tracing::debug!("replay for {} deferred: {}", key, reason);
                    if let Some(evicted) = self.pending.requeue(entry) {
                        self.report_evicted(&evicted);
                    }
                    return true;
                }
            }
        }
        false
    }

    async fn replay(&self, message: &RawMessage) -> Replay {
        let target = match self.routes.find(&message.topic).map(|r| &r.target) {
            Some(RouteTarget::DataModel(target)) => target,
            _ => return Replay::Dropped(format!("no data-model route for {}", message.topic)),
        };
        let record = match normalize(&message.topic, &message.payload, target, &self.sanitizer) {
            Ok(record) => record,
            Err(e) => return Replay::Dropped(e.to_string()),
        };
        match self.coordinator.write(&record, target).await {
            Ok(()) => {
                self.on_written(record.kind);
                Replay::Written
            }
            Err(e @ WriteError::Fatal { .. }) => Replay::Dropped(e.to_string()),
            Err(e) => Replay::Retry(e.to_string()),
        }
    }

    fn push_overflow(&self, message: RawMessage, reason: &str) -> bool {
        let Some(queue) = &self.overflow else {
            return false;
        };
        let kind = message.kind;
        let (expired, evicted) = queue.push(message, reason);
        for entry in &expired {
            self.report_overflow_expired(entry);
        }
        if let Some(entry) = evicted {
            tracing::error!(
                "overflow queue full, data lost: message from {}",
                entry.message.topic
            );
            self.stats.record_evicted(entry.message.kind);
        }
        self.stats.record_overflowed();
        tracing::debug!("queued {} message for replay ({} queued)", kind, queue.len());
        true
    }

    fn report_overflow_expired(&self, entry: &OverflowEntry) {
        tracing::warn!(
            "dropping queued message from {} after {:?} (last error: {})",
            entry.message.topic,
            age(self.clock.now(), entry.enqueued_at),
            entry.reason
        );
        self.stats.record_expired(entry.message.kind);
    }

    /// Replay the overflow queue oldest first, stopping at the first renewed
    /// transient failure. Skipped when another pass is running. Returns the
    /// number of messages taken over by the backend or the pending buffer.
    pub async fn retry_overflow(&self) -> usize {
        let Some(queue) = &self.overflow else {
            return 0;
        };
        if queue.is_empty() {
            return 0;
        }
        let Some(_guard) = queue.begin_drain() else {
            return 0;
        };

        let mut replayed = 0;
        while let Some(mut entry) = queue.pop_front() {
            let kind = entry.message.kind;
            if queue.is_expired(&entry) {
                self.report_overflow_expired(&entry);
                continue;
            }
            let Some(route) = self.routes.find(&entry.message.topic) else {
                tracing::warn!(
                    "dropping queued message from {}: no route",
                    entry.message.topic
                );
                self.stats.record_error(kind);
                continue;
            };

            match self.attempt(&entry.message, route).await {
                Attempt::Written { .. } => {
                    replayed += 1;
                    self.stats.record_retried(kind);
                }
                Attempt::Buffered { .. } => replayed += 1,
                Attempt::Rejected(reason) | Attempt::Fatal(reason) => {
                    tracing::warn!(
                        "dropping queued message from {}: {}",
                        entry.message.topic,
                        reason
                    );
                    self.stats.record_error(kind);
                }
                Attempt::Transient(reason) => {
                    entry.reason = reason;
                    if let Some(lost) = queue.push_front(entry) {
                        tracing::error!(
                            "overflow queue full, data lost: message from {}",
                            lost.message.topic
                        );
                        self.stats.record_evicted(lost.message.kind);
                    }
                    break;
                }
            }
        }

        if replayed > 0 {
            tracing::info!(
                "replayed {} queued message(s), {} left",
                replayed,
                queue.len()
            );
        }
        replayed
    }

    /// Periodic connectivity probe: one replay pass when messages are queued
    /// and no write succeeded within the probe interval.
    pub async fn probe_overflow(&self) -> usize {
        match &self.overflow {
            Some(queue) if queue.should_probe(self.probe_interval) => {
                tracing::debug!("probing backend with {} queued message(s)", queue.len());
                self.retry_overflow().await
            }
            _ => 0,
        }
    }

    /// Expire old entries in the pending buffer and the overflow queue.
    pub fn sweep_expired(&self) -> usize {
        let expired = self.pending.sweep_expired();
        for entry in &expired {
            self.report_expired(entry);
        }
        let mut count = expired.len();

        if let Some(queue) = &self.overflow {
            let expired = queue.sweep_expired();
            for entry in &expired {
                self.report_overflow_expired(entry);
            }
            count += expired.len();
        }
        count
    }

    /// Stop background work and discard in-memory state. Buffered records
    /// are not persisted anywhere.
    pub fn shutdown(&self) {
        if let Some(trigger) = &self.trigger {
            trigger.cancel();
        }
        let dropped = self.pending.clear();
        let queued = self.overflow.as_ref().map_or(0, OverflowQueue::len);
        if dropped > 0 || queued > 0 {
            tracing::warn!(
                "shutdown discards {} buffered and {} queued record(s)",
                dropped,
                queued
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MemoryBackend};
    use crate::config::RouteConfig;
    use crate::record::Value;

    fn config() -> IngestConfig {
        let mut config = IngestConfig::default();
        config.add_route(RouteConfig::data_model("alarms/frame", "AlarmFrame", "sp_site"));
        config.add_route(RouteConfig::data_model("alarms/event", "AlarmEvent", "sp_site"));
        config.add_route(RouteConfig::data_model("pumps/#", "Pump", "sp_site"));
        config.add_route(RouteConfig::data_model("sites/#", "Site", "sp_site"));
        config
    }

    fn pipeline(config: &IngestConfig, backend: MemoryBackend) -> Pipeline<MemoryBackend> {
        Pipeline::new(config, Arc::new(backend)).expect("pipeline")
    }

    #[tokio::test]
    async fn test_unrouted() {
        let p = pipeline(&config(), MemoryBackend::new());
        let d = p.process_message("nowhere", b"{}").await;
        assert_eq!(d, Disposition::Unrouted);
        assert!(!d.is_handled());
        assert_eq!(p.snapshot().unrouted, 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let p = pipeline(&config(), MemoryBackend::new());
        let d = p.process_message("alarms/frame", b"not json").await;
        assert!(matches!(d, Disposition::Rejected { .. }));
        assert_eq!(p.snapshot().frames.errored, 1);
        assert_eq!(p.backend().upsert_count(), 0);
    }

    #[tokio::test]
    async fn test_event_waits_for_frame() {
        let p = pipeline(&config(), MemoryBackend::new());

        let d = p
            .process_message("alarms/event", br#"{"externalId":"e-1","frameExternalId":"123abc"}"#)
            .await;
        assert_eq!(
            d,
            Disposition::Buffered {
                dependency: "id_123abc".into()
            }
        );
        assert_eq!(p.pending().len(), 1);
        assert_eq!(p.backend().record_count(), 0);

        let d = p
            .process_message("alarms/frame", br#"{"externalId":"123abc","severity":"high"}"#)
            .await;
        assert_eq!(
            d,
            Disposition::Written {
                id: "id_123abc".into(),
                drained: 1
            }
        );
        assert!(p.pending().is_empty());

        let event = p
            .backend()
            .record("AlarmEvent", "sp_site", "e_1")
            .expect("event stored");
        assert_eq!(
            event.get("frame"),
            Some(&Value::Reference(Reference::new("sp_site", "id_123abc")))
        );

        let snap = p.snapshot();
        assert_eq!(snap.events.buffered, 1);
        assert_eq!(snap.events.written, 1);
        assert_eq!(snap.events.retried, 1);
        assert_eq!(snap.frames.written, 1);
    }

    #[tokio::test]
    async fn test_event_with_existing_frame_written_directly() {
        let p = pipeline(&config(), MemoryBackend::new());
        p.process_message("alarms/frame", br#"{"externalId":"F1"}"#)
            .await;
        let d = p
            .process_message("alarms/event", br#"{"externalId":"E1","frameExternalId":"F1"}"#)
            .await;
        assert_eq!(
            d,
            Disposition::Written {
                id: "E1".into(),
                drained: 0
            }
        );
        assert!(p.pending().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_without_overflow() {
        let backend = MemoryBackend::new();
        backend.fail_next(BackendError::Transport("connection reset".into()));
        let p = pipeline(&config(), backend);

        let d = p.process_message("pumps/1", br#"{"externalId":"P1"}"#).await;
        assert!(matches!(
            d,
            Disposition::Failed {
                overflowed: false,
                ..
            }
        ));
        assert_eq!(p.snapshot().other.errored, 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_not_queued() {
        let mut config = config();
        config.overflow.enabled = true;
        let backend = MemoryBackend::new();
        backend.fail_next(BackendError::Rejected {
            status: 400,
            message: "bad property".into(),
        });
        let p = pipeline(&config, backend);

        let d = p.process_message("pumps/1", br#"{"externalId":"P1"}"#).await;
        assert!(matches!(
            d,
            Disposition::Failed {
                overflowed: false,
                ..
            }
        ));
        assert_eq!(p.overflow().map(OverflowQueue::len), Some(0));
    }

    #[tokio::test]
    async fn test_missing_reference_goes_to_overflow() {
        let mut config = config();
        config.overflow.enabled = true;
        let p = pipeline(&config, MemoryBackend::with_reference_check());

        // Pumps have no declared dependency, so a missing site is retried
        // through the overflow queue rather than the pending buffer.
        let d = p
            .process_message("pumps/1", br#"{"externalId":"P1","siteExternalId":"S1"}"#)
            .await;
        assert!(matches!(d, Disposition::Failed { overflowed: true, .. }));
        assert_eq!(p.snapshot().overflow, 1);

        let d = p.process_message("sites/1", br#"{"externalId":"S1"}"#).await;
        assert!(d.is_handled());
        assert_eq!(p.snapshot().overflow, 0);
        assert!(p.backend().record("Pump", "sp_site", "P1").is_some());
        assert_eq!(p.snapshot().other.retried, 1);
    }

    #[tokio::test]
    async fn test_queued_message_without_route_is_dropped_and_counted() {
        let mut config = config();
        config.overflow.enabled = true;
        let p = pipeline(&config, MemoryBackend::new());
        let message = RawMessage::new("retired/topic", b"{}".to_vec(), RecordKind::Other);
        assert!(p.push_overflow(message, "connection reset"));

        assert_eq!(p.retry_overflow().await, 0);
        assert_eq!(p.overflow().map(OverflowQueue::len), Some(0));
        assert_eq!(p.snapshot().other.errored, 1);
    }

    #[tokio::test]
    async fn test_shutdown_clears_buffers() {
        let p = pipeline(&config(), MemoryBackend::new());
        p.process_message("alarms/event", br#"{"externalId":"E1","frameExternalId":"F9"}"#)
            .await;
        assert_eq!(p.pending().len(), 1);
        p.shutdown();
        assert!(p.pending().is_empty());
    }
}
