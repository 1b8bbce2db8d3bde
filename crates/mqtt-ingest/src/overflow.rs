// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Overflow queue for writes lost to connectivity problems.
//!
//! One global bounded FIFO. Entries are replayed oldest first after a
//! successful write or by the periodic probe; a replay pass stops at the
//! first renewed failure.

use crate::clock::{age, Clock};
use crate::record::RawMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A failed write kept for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct OverflowEntry {
    pub message: RawMessage,
    pub enqueued_at: Instant,
    /// Last failure, for diagnostics.
    pub reason: String,
}

/// Bounded global retry queue.
#[derive(Debug)]
pub struct OverflowQueue {
    entries: Mutex<VecDeque<OverflowEntry>>,
    last_success: Mutex<Option<Instant>>,
    draining: AtomicBool,
    max_entries: usize,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl OverflowQueue {
    pub fn new(max_entries: usize, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            last_success: Mutex::new(None),
            draining: AtomicBool::new(false),
            max_entries: max_entries.max(1),
            timeout,
            clock,
        }
    }

    /// Append a failed write. Returns expired entries and the entry evicted
    /// to respect the cap, if any.
    pub fn push(
        &self,
        message: RawMessage,
        reason: impl Into<String>,
    ) -> (Vec<OverflowEntry>, Option<OverflowEntry>) {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let expired = Self::sweep_head(&mut entries, now, self.timeout);
        let evicted = if entries.len() >= self.max_entries {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(OverflowEntry {
            message,
            enqueued_at: now,
            reason: reason.into(),
        });
        (expired, evicted)
    }

    /// Take the oldest entry.
    pub fn pop_front(&self) -> Option<OverflowEntry> {
        self.entries.lock().pop_front()
    }

    /// Return an entry to the head after a failed replay. Returns the entry
    /// evicted if the queue filled up meanwhile.
    pub fn push_front(&self, entry: OverflowEntry) -> Option<OverflowEntry> {
        let mut entries = self.entries.lock();
        entries.push_front(entry);
        if entries.len() > self.max_entries {
            entries.pop_front()
        } else {
            None
        }
    }

    /// Claim the queue for one replay pass. `None` if a pass is running.
    pub fn begin_drain(&self) -> Option<OverflowDrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| OverflowDrainGuard { queue: self })
    }

    /// Remove expired entries. Entries are ordered by age, so only the head
    /// is inspected.
    pub fn sweep_expired(&self) -> Vec<OverflowEntry> {
        let now = self.clock.now();
        Self::sweep_head(&mut self.entries.lock(), now, self.timeout)
    }

    fn sweep_head(
        entries: &mut VecDeque<OverflowEntry>,
        now: Instant,
        timeout: Duration,
    ) -> Vec<OverflowEntry> {
        let mut expired = Vec::new();
        while entries
            .front()
            .is_some_and(|e| age(now, e.enqueued_at) > timeout)
        {
            if let Some(entry) = entries.pop_front() {
                expired.push(entry);
            }
        }
        expired
    }

    pub fn is_expired(&self, entry: &OverflowEntry) -> bool {
        age(self.clock.now(), entry.enqueued_at) > self.timeout
    }

    /// Record a successful backend write.
    pub fn mark_success(&self) {
        *self.last_success.lock() = Some(self.clock.now());
    }

    /// Whether the periodic probe should run: something is queued and no
    /// write succeeded within `window`.
    pub fn should_probe(&self, window: Duration) -> bool {
        if self.is_empty() {
            return false;
        }
        match *self.last_success.lock() {
            Some(at) => age(self.clock.now(), at) >= window,
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Exclusive replay claim, released on drop.
#[derive(Debug)]
pub struct OverflowDrainGuard<'a> {
    queue: &'a OverflowQueue,
}

impl Drop for OverflowDrainGuard<'_> {
    fn drop(&mut self) {
        self.queue.draining.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::RecordKind;

    fn msg(n: u32) -> RawMessage {
        RawMessage {
            received_ms: 0,
            ..RawMessage::new("t", format!("{}", n), RecordKind::Other)
        }
    }

    fn queue(max: usize) -> (OverflowQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (
            OverflowQueue::new(max, Duration::from_secs(100), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_bounded_oldest_evicted() {
        let (q, _) = queue(2);
        q.push(msg(1), "down");
        q.push(msg(2), "down");
        let (_, evicted) = q.push(msg(3), "down");
        assert_eq!(evicted.map(|e| e.message), Some(msg(1)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_front().map(|e| e.message), Some(msg(2)));
    }

    #[test]
    fn test_push_front_restores_order() {
        let (q, _) = queue(10);
        q.push(msg(1), "down");
        q.push(msg(2), "down");
        let head = q.pop_front().expect("head");
        assert!(q.push_front(head).is_none());
        assert_eq!(q.pop_front().map(|e| e.message), Some(msg(1)));
    }

    #[test]
    fn test_expiry() {
        let (q, clock) = queue(10);
        q.push(msg(1), "down");
        clock.advance(Duration::from_secs(60));
        q.push(msg(2), "down");
        clock.advance(Duration::from_secs(50));

        let expired = q.sweep_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(q.len(), 1);
        let head = q.pop_front().expect("head");
        assert!(!q.is_expired(&head));
    }

    #[test]
    fn test_probe_window() {
        let (q, clock) = queue(10);
        assert!(!q.should_probe(Duration::from_secs(60)));
        q.push(msg(1), "down");
        assert!(q.should_probe(Duration::from_secs(60)));
        q.mark_success();
        assert!(!q.should_probe(Duration::from_secs(60)));
        clock.advance(Duration::from_secs(60));
        assert!(q.should_probe(Duration::from_secs(60)));
    }

    #[test]
    fn test_single_drain() {
        let (q, _) = queue(10);
        let guard = q.begin_drain().expect("claim");
        assert!(q.begin_drain().is_none());
        drop(guard);
        assert!(q.begin_drain().is_some());
    }
}
