// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion statistics.

use crate::record::RecordKind;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for one record kind.
#[derive(Debug, Default)]
pub struct KindStats {
    /// Messages routed to this kind.
    pub received: AtomicU64,
    /// Records persisted, replays included.
    pub written: AtomicU64,
    /// Records parked waiting on a dependency.
    pub buffered: AtomicU64,
    /// Buffered or overflowed records later persisted.
    pub retried: AtomicU64,
    /// Entries dropped by timeout.
    pub expired: AtomicU64,
    /// Entries dropped to respect a cap.
    pub evicted: AtomicU64,
    /// Normalization and write failures.
    pub errored: AtomicU64,
}

impl KindStats {
    pub fn snapshot(&self) -> KindStatsSnapshot {
        KindStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`KindStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStatsSnapshot {
    pub received: u64,
    pub written: u64,
    pub buffered: u64,
    pub retried: u64,
    pub expired: u64,
    pub evicted: u64,
    pub errored: u64,
}

/// Pipeline-wide counters.
#[derive(Debug)]
pub struct IngestStats {
    pub events: KindStats,
    pub frames: KindStats,
    pub other: KindStats,
    /// Messages with no matching route.
    pub unrouted: AtomicU64,
    /// Writes parked in the overflow queue.
    pub overflowed: AtomicU64,
    pub created: Instant,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            events: KindStats::default(),
            frames: KindStats::default(),
            other: KindStats::default(),
            unrouted: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Counters of `kind`.
    pub fn kind(&self, kind: RecordKind) -> &KindStats {
        match kind {
            RecordKind::Event => &self.events,
            RecordKind::Frame => &self.frames,
            RecordKind::Other => &self.other,
        }
    }

    pub fn record_received(&self, kind: RecordKind) {
        self.kind(kind).received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self, kind: RecordKind) {
        self.kind(kind).written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_buffered(&self, kind: RecordKind) {
        self.kind(kind).buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self, kind: RecordKind) {
        self.kind(kind).retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, kind: RecordKind) {
        self.kind(kind).expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, kind: RecordKind) {
        self.kind(kind).evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: RecordKind) {
        self.kind(kind).errored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unrouted(&self) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflowed(&self) {
        self.overflowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot with the current buffer occupancy.
    pub fn snapshot(&self, pending: usize, overflow: usize) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            events: self.events.snapshot(),
            frames: self.frames.snapshot(),
            other: self.other.snapshot(),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            pending,
            overflow,
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub events: KindStatsSnapshot,
    pub frames: KindStatsSnapshot,
    pub other: KindStatsSnapshot,
    pub unrouted: u64,
    pub overflowed: u64,
    /// Entries currently in the pending buffer.
    pub pending: usize,
    /// Entries currently in the overflow queue.
    pub overflow: usize,
    pub uptime_secs: u64,
}

impl IngestStatsSnapshot {
    pub fn total_errors(&self) -> u64 {
        self.events.errored + self.frames.errored + self.other.errored
    }

    pub fn total_written(&self) -> u64 {
        self.events.written + self.frames.written + self.other.written
    }

    /// Messages received per second since start.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs == 0 {
            return 0.0;
        }
        let received = self.events.received + self.frames.received + self.other.received;
        received as f64 / self.uptime_secs as f64
    }
}

impl fmt::Display for IngestStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Events: {}/{} | Frames: {}/{} | Other: {}/{} | Errors: {} | Pending: {} | Overflow: {}",
            self.events.written,
            self.events.received,
            self.frames.written,
            self.frames.received,
            self.other.written,
            self.other.received,
            self.total_errors(),
            self.pending,
            self.overflow
        )
    }
}

/// Reporting period for a given uptime: every minute for the first ten
/// minutes, every ten minutes for the first hour, hourly afterwards.
pub fn adaptive_interval(uptime: Duration) -> Duration {
    if uptime < Duration::from_secs(600) {
        Duration::from_secs(60)
    } else if uptime < Duration::from_secs(3600) {
        Duration::from_secs(600)
    } else {
        Duration::from_secs(3600)
    }
}
