// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT intake.
//!
//! One task owns the broker connection and feeds every publish to
//! [`Pipeline::process_message`] in arrival order. Subscriptions are renewed
//! on every `CONNACK`, so a broker restart does not lose routes.

use crate::backend::Backend;
use crate::config::MqttConfig;
use crate::pipeline::Pipeline;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pause after a connection error before the event loop reconnects.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Map a configured QoS level onto the client's enum. Values above 2 are
/// rejected by config validation.
pub fn qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Build client options. `client_id` falls back to `default_id`.
pub fn mqtt_options(config: &MqttConfig, default_id: &str) -> MqttOptions {
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| default_id.to_string());
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options.set_clean_session(config.clean_session);
    if let Some(username) = &config.username {
        options.set_credentials(
            username.clone(),
            config.password.clone().unwrap_or_default(),
        );
    }
    options
}

/// Broker connection bound to a pipeline.
pub struct MqttIntake<B: Backend> {
    pipeline: Arc<Pipeline<B>>,
    client: AsyncClient,
    eventloop: EventLoop,
    filters: Vec<String>,
    qos: QoS,
}

impl<B: Backend> MqttIntake<B> {
    pub fn new(pipeline: Arc<Pipeline<B>>, config: &MqttConfig, default_id: &str) -> Self {
        let filters = pipeline.routes().subscriptions();
        // Room for every SUBSCRIBE of a reconnect plus the disconnect.
        let capacity = config.channel_capacity.max(filters.len() + 1);
        let (client, eventloop) = AsyncClient::new(mqtt_options(config, default_id), capacity);
        Self {
            pipeline,
            client,
            eventloop,
            filters,
            qos: qos(config.qos),
        }
    }

    /// Client handle, used to disconnect from outside the poll loop.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Queue one SUBSCRIBE per route filter. Non-blocking, since the
    /// request channel is only drained by the poll loop calling this.
    fn subscribe_all(&self) {
        for filter in &self.filters {
            match self.client.try_subscribe(filter.as_str(), self.qos) {
                Ok(()) => tracing::debug!("subscribed to {}", filter),
                Err(e) => tracing::warn!("subscribe to {} failed: {}", filter, e),
            }
        }
    }

    /// Poll the broker until `running` is cleared. Stopping also needs a
    /// disconnect through [`MqttIntake::client`] to wake a blocked poll.
    pub async fn run(mut self, running: Arc<AtomicBool>) {
        tracing::info!(
            "MQTT intake started with {} subscription(s)",
            self.filters.len()
        );

        while running.load(Ordering::Relaxed) {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::info!("connected to broker ({:?})", ack.code);
                    self.subscribe_all();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let disposition = self
                        .pipeline
                        .process_message(&publish.topic, &publish.payload)
                        .await;
                    tracing::trace!("{} -> {:?}", publish.topic, disposition);
                }
                Ok(_) => {}
                Err(_) if !running.load(Ordering::Relaxed) => break,
                Err(e) => {
                    tracing::warn!("MQTT connection error: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }

        tracing::info!("MQTT intake stopped");
    }
}
