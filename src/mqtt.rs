//! MQTT glue on top of `rumqttc`.
//!
//! ```text
//! broker ─► EventLoop ─► parse_command ─► BridgeHandle::submit
//! Bridge ─► StateChange channel ─► AsyncClient::publish (retained, QoS 1)
//! ```
//!
//! `rumqttc` does not restore subscriptions after a reconnect, so they are
//! renewed on every ConnAck and whenever the broker side announces `online`.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;

use crate::bridge::{BridgeHandle, StateChange};
use crate::config::MqttConfig;
use crate::error::Result;
use crate::topic::{self, CommandRequest, AVAILABILITY_TOPIC};

/// Client request queue capacity.
const CLIENT_CAPACITY: usize = 256;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Delay after an event loop error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// How an inbound publish is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(CommandRequest),
    Resubscribe,
    Ignored,
}

/// Classify an inbound publish.
pub fn classify(prefix: &str, topic: &str, payload: &[u8]) -> Inbound {
    if topic::is_online_announcement(topic, payload) {
        return Inbound::Resubscribe;
    }
    match topic::parse_command(prefix, topic, payload) {
        Some(request) => Inbound::Command(request),
        None => Inbound::Ignored,
    }
}

/// Connected MQTT client bound to one topic prefix.
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
    prefix: String,
}

impl MqttLink {
    pub fn new(config: &MqttConfig, prefix: &str) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }
        let (client, eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);
        (
            Self {
                client,
                prefix: prefix.to_string(),
            },
            eventloop,
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Subscribe to the command topics and the availability topic.
    pub async fn subscribe(&self) -> Result<()> {
        let filter = topic::command_filter(&self.prefix);
        self.client.subscribe(&filter, QoS::AtLeastOnce).await?;
        self.client
            .subscribe(AVAILABILITY_TOPIC, QoS::AtLeastOnce)
            .await?;
        tracing::info!(filter = %filter, "MQTT subscribed");
        Ok(())
    }

    /// Publish one property to its retained state topic.
    pub async fn publish(&self, change: &StateChange) -> Result<()> {
        let update = &change.update;
        let topic = topic::state_topic(&self.prefix, update.device, &update.room, &update.name);
        self.client
            .publish(topic, QoS::AtLeastOnce, true, update.value.to_string())
            .await?;
        Ok(())
    }

    /// Forward bridge state changes until the bridge drops its publisher.
    pub async fn run_publisher(self, mut changes: mpsc::UnboundedReceiver<StateChange>) {
        while let Some(change) = changes.recv().await {
            if let Err(e) = self.publish(&change).await {
                tracing::error!("Failed to publish state: {}", e);
            }
        }
    }

    /// Drive the MQTT event loop and route commands into the bridge.
    pub async fn run_events(self, mut eventloop: EventLoop, handle: BridgeHandle) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("MQTT connected");
                    if let Err(e) = self.subscribe().await {
                        tracing::error!("Failed to subscribe: {}", e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(message))) => {
                    match classify(&self.prefix, &message.topic, &message.payload) {
                        Inbound::Command(request) => {
                            tracing::debug!(topic = %message.topic, payload = %request.payload, "MQTT command");
                            // outcomes are logged by the bridge
                            let ticket = handle.submit(&request);
                            drop(ticket);
                        }
                        Inbound::Resubscribe => {
                            tracing::info!("broker online, renewing subscriptions");
                            if let Err(e) = self.subscribe().await {
                                tracing::error!("Failed to subscribe: {}", e);
                            }
                        }
                        Inbound::Ignored => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("MQTT event loop error: {}", e);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }

            if handle.is_closed() {
                tracing::debug!("bridge stopped, leaving MQTT event loop");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DeviceKind;

    #[test]
    fn test_classify_command() {
        match classify("bestin", "bestin/outlet/1/standby/command", b"off") {
            Inbound::Command(request) => {
                assert_eq!(request.device, DeviceKind::Outlet);
                assert_eq!(request.name, "standby");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_classify_availability() {
        assert_eq!(classify("bestin", "homeassistant/status", b"online"), Inbound::Resubscribe);
        assert_eq!(classify("bestin", "homeassistant/status", b"offline"), Inbound::Ignored);
        assert_eq!(classify("bestin", "bestin/light/1/power1/state", b"on"), Inbound::Ignored);
    }

    #[tokio::test]
    async fn test_link_uses_prefix() {
        let config = MqttConfig {
            broker: "localhost".into(),
            port: 1883,
            username: Some("user".into()),
            password: None,
            prefix: None,
            client_id: "test".into(),
        };
        let (link, _eventloop) = MqttLink::new(&config, "kocom");
        assert_eq!(link.prefix(), "kocom");
    }
}
