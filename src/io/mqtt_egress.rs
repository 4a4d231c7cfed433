//! MQTT publisher for egress events
//!
//! Publishes analytics to MQTT topics for downstream consumers:
//! - crowd/snapshots - Per-tick snapshots (QoS 0)
//! - crowd/crossings - Counted line crossings (QoS 1)
//! - crowd/connection - Camera connection state (QoS 0, retained)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    snapshots_topic: String,
    crossings_topic: String,
    connection_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("crowd-flow-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            snapshots_topic: config.mqtt_egress_snapshots_topic().to_string(),
            crossings_topic: config.mqtt_egress_crossings_topic().to_string(),
            connection_topic: config.mqtt_egress_connection_topic().to_string(),
        }
    }

    /// Run the publisher loop until shutdown, then drain what is queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            snapshots = %self.snapshots_topic,
            crossings = %self.crossings_topic,
            connection = %self.connection_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Snapshot(payload) => {
                if let Err(e) = self
                    .client
                    .publish(&self.snapshots_topic, QoS::AtMostOnce, false, payload.json.into_bytes())
                    .await
                {
                    debug!(error = %e, "mqtt_egress_snapshot_failed");
                }
            }
            EgressMessage::Crossing(payload) => {
                // Counts matter downstream: at-least-once
                if let Ok(json) = serde_json::to_string(&payload) {
                    if let Err(e) = self
                        .client
                        .publish(&self.crossings_topic, QoS::AtLeastOnce, false, json.into_bytes())
                        .await
                    {
                        error!(error = %e, "mqtt_egress_crossing_failed");
                    }
                }
            }
            EgressMessage::Connection(payload) => {
                // Retained so late subscribers see the current state
                if let Ok(json) = serde_json::to_string(&payload) {
                    if let Err(e) = self
                        .client
                        .publish(&self.connection_topic, QoS::AtMostOnce, true, json.into_bytes())
                        .await
                    {
                        debug!(error = %e, "mqtt_egress_connection_failed");
                    }
                }
            }
        }
    }
}
