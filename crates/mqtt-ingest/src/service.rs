// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service lifecycle: MQTT intake plus maintenance timers around a shared
//! [`Pipeline`].

use crate::backend::Backend;
use crate::config::{ConfigError, IngestConfig};
use crate::mqtt::MqttIntake;
use crate::pipeline::Pipeline;
use crate::stats::IngestStatsSnapshot;
use rumqttc::AsyncClient;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service already running")]
    AlreadyRunning,
}

/// Handle to control a running service.
pub struct ServiceHandle<B: Backend> {
    running: Arc<AtomicBool>,
    pipeline: Arc<Pipeline<B>>,
    client: Option<AsyncClient>,
}

impl<B: Backend> Clone for ServiceHandle<B> {
    fn clone(&self) -> Self {
        Self {
            running: self.running.clone(),
            pipeline: self.pipeline.clone(),
            client: self.client.clone(),
        }
    }
}

impl<B: Backend> ServiceHandle<B> {
    /// Check if the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop intake and timers, then drop in-memory buffers.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Some(client) = &self.client {
            if let Err(e) = client.try_disconnect() {
                tracing::debug!("disconnect: {}", e);
            }
        }
        self.pipeline.shutdown();
    }

    pub fn pipeline(&self) -> &Arc<Pipeline<B>> {
        &self.pipeline
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        self.pipeline.snapshot()
    }
}

/// Ingestion service.
pub struct IngestService<B: Backend> {
    config: IngestConfig,
    pipeline: Arc<Pipeline<B>>,
    running: Arc<AtomicBool>,
}

impl<B: Backend> IngestService<B> {
    /// Create a service from a validated configuration.
    pub fn new(config: IngestConfig, backend: Arc<B>) -> Result<Self, ServiceError> {
        let pipeline = Pipeline::new(&config, backend)?;
        Ok(Self::with_pipeline(config, Arc::new(pipeline)))
    }

    /// Wrap an existing pipeline.
    pub fn with_pipeline(config: IngestConfig, pipeline: Arc<Pipeline<B>>) -> Self {
        Self {
            config,
            pipeline,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<Pipeline<B>> {
        &self.pipeline
    }

    /// Check if the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Connect to the broker and start the maintenance timers.
    pub fn run(&mut self) -> Result<ServiceHandle<B>, ServiceError> {
        let mut handle = self.start_maintenance()?;

        let intake = MqttIntake::new(self.pipeline.clone(), &self.config.mqtt, &self.config.name);
        handle.client = Some(intake.client());
        let running = self.running.clone();
        tokio::spawn(async move {
            intake.run(running).await;
        });

        tracing::info!(
            "Service '{}' started with {} routes, broker {}:{}",
            self.config.name,
            self.pipeline.routes().len(),
            self.config.mqtt.host,
            self.config.mqtt.port
        );
        Ok(handle)
    }

    /// Start expiry sweeps and overflow probes without a broker connection.
    /// Messages are then fed through [`ServiceHandle::pipeline`].
    pub fn start_maintenance(&mut self) -> Result<ServiceHandle<B>, ServiceError> {
        if self.running.swap(true, Ordering::Relaxed) {
            return Err(ServiceError::AlreadyRunning);
        }

        let pipeline = self.pipeline.clone();
        spawn_periodic(
            self.running.clone(),
            Duration::from_secs(self.config.buffer.sweep_interval_secs.max(1)),
            move || {
                let pipeline = pipeline.clone();
                async move {
                    let expired = pipeline.sweep_expired();
                    if expired > 0 {
                        tracing::debug!("sweep expired {} entries", expired);
                    }
                }
            },
        );

        if self.config.overflow.enabled {
            let pipeline = self.pipeline.clone();
            spawn_periodic(
                self.running.clone(),
                Duration::from_secs(self.config.overflow.probe_interval_secs.max(1)),
                move || {
                    let pipeline = pipeline.clone();
                    async move {
                        pipeline.probe_overflow().await;
                    }
                },
            );
        }

        Ok(ServiceHandle {
            running: self.running.clone(),
            pipeline: self.pipeline.clone(),
            client: None,
        })
    }
}

/// Run `task` every `period` until `running` is cleared. The first run
/// happens one period after start.
fn spawn_periodic<F, Fut>(running: Arc<AtomicBool>, period: Duration, task: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            interval.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }
            task().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::RouteConfig;

    fn config() -> IngestConfig {
        let mut config = IngestConfig::default();
        config.add_route(RouteConfig::data_model("alarms/frame", "AlarmFrame", "sp_site"));
        config.add_route(RouteConfig::data_model("alarms/event", "AlarmEvent", "sp_site"));
        config
    }

    #[tokio::test]
    async fn test_start_stop() {
        let mut service =
            IngestService::new(config(), Arc::new(MemoryBackend::new())).expect("service");
        assert!(!service.is_running());

        let handle = service.start_maintenance().expect("start");
        assert!(service.is_running());
        assert!(handle.is_running());
        assert!(matches!(
            service.start_maintenance(),
            Err(ServiceError::AlreadyRunning)
        ));

        handle.stop();
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_stop_discards_pending() {
        let mut service =
            IngestService::new(config(), Arc::new(MemoryBackend::new())).expect("service");
        let handle = service.start_maintenance().expect("start");

        handle
            .pipeline()
            .process_message("alarms/event", br#"{"externalId":"E1","frameExternalId":"F1"}"#)
            .await;
        assert_eq!(handle.snapshot().pending, 1);

        handle.stop();
        assert_eq!(handle.snapshot().pending, 0);
    }

    #[tokio::test]
    async fn test_sweeper_expires_entries() {
        let mut config = config();
        config.buffer.timeout_secs = 1;
        config.buffer.sweep_interval_secs = 1;
        let mut service =
            IngestService::new(config, Arc::new(MemoryBackend::new())).expect("service");
        let handle = service.start_maintenance().expect("start");

        handle
            .pipeline()
            .process_message("alarms/event", br#"{"externalId":"E1","frameExternalId":"F1"}"#)
            .await;
        assert_eq!(handle.snapshot().pending, 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let snap = handle.snapshot();
        assert_eq!(snap.pending, 0);
        assert_eq!(snap.events.expired, 1);
        handle.stop();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = IngestService::new(IngestConfig::default(), Arc::new(MemoryBackend::new()));
        assert!(matches!(result, Err(ServiceError::Config(_))));
    }
}
