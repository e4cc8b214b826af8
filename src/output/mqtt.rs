//! MQTT sink for processed entity states.

use crate::config::MqttConfig;
use crate::processor::{EntityKey, EntityState, PassiveDataProcessor, ProcessorUpdate};
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// State payload published for one entity.
#[derive(Debug, Serialize)]
struct StatePayload<'a> {
    name: &'a str,
    value: f64,
    unit: String,
    device_class: String,
    state_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_category: Option<String>,
    updated_at: String,
}

/// Topic for one entity: `<prefix>/<ADDRESS>/<entity key>`.
pub fn entity_topic(prefix: &str, key: &EntityKey) -> String {
    format!("{}/{}/{}", prefix.trim_end_matches('/'), key.device_id, key.key)
}

pub fn state_payload(state: &EntityState) -> serde_json::Result<String> {
    serde_json::to_string(&StatePayload {
        name: &state.name,
        value: state.value,
        unit: state.unit.to_string(),
        device_class: state.device_class.to_string(),
        state_class: state.state_class.to_string(),
        entity_category: state.entity_category.map(|c| c.to_string()),
        updated_at: state.updated_at.to_rfc3339(),
    })
}

/// Publishes entity states to an MQTT broker.
///
/// Publishing never waits: it is called from coordinator tasks, so a full
/// request queue drops the message with a warning.
#[derive(Clone)]
pub struct MqttSink {
    client: AsyncClient,
    topic_prefix: String,
}

/// Drives the rumqttc event loop for an [`MqttSink`].
pub struct MqttDriver {
    event_loop: EventLoop,
}

impl MqttSink {
    /// Create a new sink from configuration.
    pub fn new(config: &MqttConfig) -> (Self, MqttDriver) {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(30));

        // Set credentials if provided
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);
        let sink = Self {
            client,
            topic_prefix: config.topic_prefix.clone(),
        };
        (sink, MqttDriver { event_loop })
    }

    /// Publish every state of `update`. Returns how many were queued.
    pub fn publish_update(&self, update: &ProcessorUpdate) -> usize {
        let mut queued = 0;
        for state in &update.states {
            let topic = entity_topic(&self.topic_prefix, &state.entity_key);
            let payload = match state_payload(state) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("[MQTT] Failed to encode {}: {}", state.entity_key, e);
                    continue;
                }
            };

            debug!("[MQTT] Publishing to {}: {}", topic, payload);
            match self
                .client
                .try_publish(topic.as_str(), QoS::AtLeastOnce, true, payload.into_bytes())
            {
                Ok(()) => queued += 1,
                Err(e) => warn!("[MQTT] Dropped update for {}: {}", topic, e),
            }
        }
        queued
    }

    /// Forward every update of `processor` to the broker.
    pub fn attach(&self, processor: &PassiveDataProcessor) {
        let sink = self.clone();
        processor.add_listener(move |update| {
            sink.publish_update(update);
        });
        info!("[MQTT] Attached to {} processor", processor.name());
    }
}

impl MqttDriver {
    /// Run the MQTT event loop until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("[MQTT] Starting event loop");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.event_loop.poll() => event,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("[MQTT] Connected to broker"),
                Ok(_) => {}
                Err(e) => {
                    error!("[MQTT] Connection error: {:?}", e);
                    // Wait before reconnecting
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }
        }
        info!("[MQTT] Event loop stopped");
    }
}
