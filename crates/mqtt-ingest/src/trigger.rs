// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Debounced, throttled workflow trigger.
//!
//! Every [`DebouncedTrigger::notify`] cancels the scheduled run and schedules
//! a new one after the quiet window. A run never starts sooner than the
//! minimum interval after the previous one; a throttled run is deferred, not
//! dropped.

use crate::backend::Backend;
use crate::clock::{age, Clock};
use crate::config::WorkflowConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// What a woken timer should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    Fire,
    /// Throttled, retry after the duration.
    Wait(Duration),
    /// A newer notification superseded this timer.
    Stale,
}

#[derive(Debug, Default)]
struct TriggerState {
    generation: u64,
    last_fired: Option<Instant>,
    scheduled: Option<JoinHandle<()>>,
    runs: u64,
}

impl TriggerState {
    fn decide(&self, generation: u64, now: Instant, min_interval: Duration) -> FireDecision {
        if generation != self.generation {
            return FireDecision::Stale;
        }
        match self.last_fired {
            Some(last) if age(now, last) < min_interval => {
                FireDecision::Wait(min_interval - age(now, last))
            }
            _ => FireDecision::Fire,
        }
    }
}

/// Fires a backend workflow once writes go quiet.
#[derive(Debug)]
pub struct DebouncedTrigger<B> {
    backend: Arc<B>,
    external_id: String,
    version: Option<String>,
    quiet: Duration,
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<TriggerState>,
}

impl<B: Backend> DebouncedTrigger<B> {
    pub fn new(backend: Arc<B>, config: &WorkflowConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            external_id: config.external_id.clone(),
            version: config.version.clone(),
            quiet: Duration::from_secs(config.debounce_window_secs),
            min_interval: Duration::from_secs(config.trigger_interval_secs),
            clock,
            state: Mutex::new(TriggerState::default()),
        }
    }

    /// Override the windows (tests and tuning).
    pub fn with_windows(mut self, quiet: Duration, min_interval: Duration) -> Self {
        self.quiet = quiet;
        self.min_interval = min_interval;
        self
    }

    /// Record activity and (re)schedule a run. Requires a Tokio runtime.
    pub fn notify(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some(handle) = state.scheduled.take() {
            handle.abort();
        }
        let generation = state.generation;
        let this = Arc::clone(self);
        state.scheduled = Some(tokio::spawn(async move {
            this.run_after_quiet(generation).await;
        }));
    }

    async fn run_after_quiet(&self, generation: u64) {
        tokio::time::sleep(self.quiet).await;
        loop {
            let decision = {
                let mut state = self.state.lock();
                let decision = state.decide(generation, self.clock.now(), self.min_interval);
                if decision == FireDecision::Fire {
                    state.last_fired = Some(self.clock.now());
                    state.scheduled = None;
                    state.runs += 1;
                }
                decision
            };
            match decision {
                FireDecision::Stale => return,
                FireDecision::Wait(d) => {
                    tracing::debug!("workflow {} throttled for {:?}", self.external_id, d);
                    tokio::time::sleep(d).await;
                }
                FireDecision::Fire => {
                    match self
                        .backend
                        .trigger_workflow(&self.external_id, self.version.as_deref())
                        .await
                    {
                        Ok(()) => tracing::info!("workflow {} triggered", self.external_id),
                        Err(e) => {
                            tracing::error!("workflow {} trigger failed: {}", self.external_id, e)
                        }
                    }
                    return;
                }
            }
        }
    }

    /// Whether a run is scheduled and not started yet.
    pub fn is_scheduled(&self) -> bool {
        self.state.lock().scheduled.is_some()
    }

    /// Runs started so far.
    pub fn runs(&self) -> u64 {
        self.state.lock().runs
    }

    /// Drop any scheduled run.
    pub fn cancel(&self) {
        if let Some(handle) = self.state.lock().scheduled.take() {
            handle.abort();
        }
    }
}
