// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending buffer for records waiting on a dependency.
//!
//! Entries are grouped in one FIFO queue per dependency key. The total
//! number of entries is capped; when the cap is hit the globally oldest
//! entry (by arrival) is evicted. Entries older than the timeout are
//! expired and never handed out for replay.
//!
//! All mutations happen under one short critical section that is never held
//! across an await. A key can be drained by one caller at a time through
//! [`PendingBuffer::begin_drain`].

use crate::clock::{age, Clock};
use crate::record::RawMessage;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A message parked until its dependency exists.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedEntry {
    /// Identity of the record this entry waits on.
    pub dependency_key: String,
    pub enqueued_at: Instant,
    /// Global arrival order.
    pub seq: u64,
    pub message: RawMessage,
}

/// Outcome of [`PendingBuffer::enqueue`].
#[derive(Debug, Default)]
pub struct Admission {
    /// Entries dropped by the expiry sweep that ran first.
    pub expired: Vec<BufferedEntry>,
    /// Entry evicted to respect the cap.
    pub evicted: Option<BufferedEntry>,
}

#[derive(Debug, Default)]
struct BufferState {
    queues: HashMap<String, VecDeque<BufferedEntry>>,
    /// seq -> key, for global oldest-first eviction.
    order: BTreeMap<u64, String>,
    next_seq: u64,
    draining: HashSet<String>,
}

impl BufferState {
    fn push_back(&mut self, entry: BufferedEntry) {
        self.order.insert(entry.seq, entry.dependency_key.clone());
        self.queues
            .entry(entry.dependency_key.clone())
            .or_default()
            .push_back(entry);
    }

    fn remove_seq(&mut self, key: &str, seq: u64) -> Option<BufferedEntry> {
        let queue = self.queues.get_mut(key)?;
        let pos = queue.iter().position(|e| e.seq == seq)?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            self.queues.remove(key);
        }
        entry
    }

    fn evict_oldest(&mut self) -> Option<BufferedEntry> {
        let (seq, key) = self.order.pop_first()?;
        self.remove_seq(&key, seq)
    }

    fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<BufferedEntry> {
        let mut expired = Vec::new();
        self.queues.retain(|_, queue| {
            let mut kept = VecDeque::with_capacity(queue.len());
            for entry in queue.drain(..) {
                if age(now, entry.enqueued_at) > timeout {
                    expired.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            *queue = kept;
            !queue.is_empty()
        });
        for entry in &expired {
            self.order.remove(&entry.seq);
        }
        expired
    }
}

/// Per-key FIFO buffer with a global cap and age-based expiry.
#[derive(Debug)]
pub struct PendingBuffer {
    state: Mutex<BufferState>,
    max_entries: usize,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl PendingBuffer {
    pub fn new(max_entries: usize, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            max_entries: max_entries.max(1),
            timeout,
            clock,
        }
    }

    /// Park `message` under `key`. Runs the expiry sweep first.
    pub fn enqueue(&self, key: &str, message: RawMessage) -> Admission {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let expired = state.sweep(now, self.timeout);
        let evicted = if state.order.len() >= self.max_entries {
            state.evict_oldest()
        } else {
            None
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.push_back(BufferedEntry {
            dependency_key: key.to_string(),
            enqueued_at: now,
            seq,
            message,
        });

        Admission { expired, evicted }
    }

    /// Put a popped entry back at the tail of its queue. Age and global
    /// arrival order (used for eviction) are kept. Returns the entry evicted
    /// to respect the cap, which may be `entry` itself.
    pub fn requeue(&self, entry: BufferedEntry) -> Option<BufferedEntry> {
        let mut state = self.state.lock();
        state.push_back(entry);
        if state.order.len() > self.max_entries {
            state.evict_oldest()
        } else {
            None
        }
    }

    /// Take the head of `key`'s queue.
    pub fn pop_front(&self, key: &str) -> Option<BufferedEntry> {
        let mut state = self.state.lock();
        let queue = state.queues.get_mut(key)?;
        let entry = queue.pop_front()?;
        if queue.is_empty() {
            state.queues.remove(key);
        }
        state.order.remove(&entry.seq);
        Some(entry)
    }

    /// Claim `key` for draining. `None` if another drain holds it.
    pub fn begin_drain(&self, key: &str) -> Option<DrainGuard<'_>> {
        let mut state = self.state.lock();
        if !state.draining.insert(key.to_string()) {
            return None;
        }
        Some(DrainGuard {
            buffer: self,
            key: key.to_string(),
        })
    }

    /// Remove every entry older than the timeout.
    pub fn sweep_expired(&self) -> Vec<BufferedEntry> {
        let now = self.clock.now();
        self.state.lock().sweep(now, self.timeout)
    }

    /// Whether an entry has outlived the timeout.
    pub fn is_expired(&self, entry: &BufferedEntry) -> bool {
        age(self.clock.now(), entry.enqueued_at) > self.timeout
    }

    /// Total buffered entries.
    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with a non-empty queue.
    pub fn key_count(&self) -> usize {
        self.state.lock().queues.len()
    }

    pub fn queue_len(&self, key: &str) -> usize {
        self.state.lock().queues.get(key).map_or(0, VecDeque::len)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Drop everything. Returns the number of entries discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.order.len();
        state.queues.clear();
        state.order.clear();
        count
    }
}

/// Exclusive drain claim on one key, released on drop.
#[derive(Debug)]
pub struct DrainGuard<'a> {
    buffer: &'a PendingBuffer,
    key: String,
}

impl DrainGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.buffer.state.lock().draining.remove(&self.key);
    }
}
