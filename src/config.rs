//! Bridge configuration.
//!
//! Loaded from the add-on options file (JSON):
//!
//! ```json
//! {
//!   "protocol": "kocom",
//!   "transport": { "type": "socket", "address": "192.168.0.20", "port": 8899 },
//!   "rs485": { "max_retry": 20, "reconnect_delay_ms": 3000 },
//!   "mqtt": { "broker": "core-mosquitto", "username": "mqtt", "password": "secret" }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::bridge::{BridgeBuilder, DEFAULT_MAX_RETRIES};
use crate::error::{BridgeError, Result};
use crate::family::ProtocolKind;

/// Default serial baud rate of the wallpad bus.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default port of RS485-to-TCP converters.
pub const DEFAULT_SOCKET_PORT: u16 = 8899;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Top-level options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeConfig {
    pub protocol: ProtocolKind,
    pub transport: TransportConfig,
    #[serde(default)]
    pub rs485: Rs485Config,
    pub mqtt: MqttConfig,
}

/// Physical link to the bus.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Serial(SerialConfig),
    Socket(SocketConfig),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_databits")]
    pub databits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stopbits")]
    pub stopbits: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SocketConfig {
    pub address: String,
    #[serde(default = "default_socket_port")]
    pub port: u16,
}

/// Bus timing and retry budget. Unset timings fall back to the family defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rs485Config {
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default)]
    pub min_gap_ms: Option<u64>,
    #[serde(default)]
    pub retry_interval_ms: Option<u64>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for Rs485Config {
    fn default() -> Self {
        Self {
            max_retry: default_max_retry(),
            min_gap_ms: None,
            retry_interval_ms: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Rs485Config {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Topic prefix; defaults to the protocol name.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_baudrate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_databits() -> u8 {
    8
}
fn default_stopbits() -> u8 {
    1
}
fn default_socket_port() -> u16 {
    DEFAULT_SOCKET_PORT
}
fn default_max_retry() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}
fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}
fn default_client_id() -> String {
    "wallpad-bridge".to_string()
}

impl BridgeConfig {
    /// Read, parse and validate an options file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse and validate options from a JSON string.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match &self.transport {
            TransportConfig::Serial(serial) => {
                if serial.port.is_empty() {
                    return Err(invalid("transport.port must not be empty"));
                }
                if !(5..=8).contains(&serial.databits) {
                    return Err(invalid("transport.databits must be between 5 and 8"));
                }
                if !matches!(serial.stopbits, 1 | 2) {
                    return Err(invalid("transport.stopbits must be 1 or 2"));
                }
            }
            TransportConfig::Socket(socket) => {
                if socket.address.is_empty() {
                    return Err(invalid("transport.address must not be empty"));
                }
            }
        }

        if self.rs485.retry_interval_ms == Some(0) {
            return Err(invalid("rs485.retry_interval_ms must be positive"));
        }
        if self.mqtt.broker.is_empty() {
            return Err(invalid("mqtt.broker must not be empty"));
        }
        let prefix = self.topic_prefix();
        if prefix.is_empty() || prefix.contains(['+', '#']) || prefix.ends_with('/') {
            return Err(invalid("mqtt.prefix must be a plain topic level"));
        }
        Ok(())
    }

    /// Topic prefix for state and command topics.
    pub fn topic_prefix(&self) -> &str {
        self.mqtt
            .prefix
            .as_deref()
            .unwrap_or_else(|| self.protocol.as_str())
    }

    /// Bridge builder with the configured protocol and timing.
    pub fn bridge_builder(&self) -> BridgeBuilder {
        let mut builder = BridgeBuilder::new(self.protocol).max_retries(self.rs485.max_retry);
        if let Some(ms) = self.rs485.min_gap_ms {
            builder = builder.min_gap(Duration::from_millis(ms));
        }
        if let Some(ms) = self.rs485.retry_interval_ms {
            builder = builder.retry_interval(Duration::from_millis(ms));
        }
        builder
    }
}

fn invalid(message: &str) -> BridgeError {
    BridgeError::Config(message.to_string())
}
