//! Error types for wallpad-bridge.

use std::io;

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error on the bus transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// MQTT client request failed.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Configuration is structurally valid JSON but semantically wrong.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No set specification exists for the requested device.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The device exists but the property cannot be commanded.
    #[error("unknown property {property} for device {device}")]
    UnknownProperty { device: String, property: String },

    /// The room identifier could not be encoded into a frame.
    #[error("invalid room: {0}")]
    InvalidRoom(String),

    /// The command payload could not be interpreted for this property.
    #[error("invalid value {value:?} for {property}")]
    InvalidValue { property: String, value: String },

    /// A fixed frame only accepts one command value.
    #[error("unsupported command for {device}: {value:?} (expected {expected:?})")]
    UnsupportedValue {
        device: String,
        value: String,
        expected: &'static str,
    },

    /// Command arrived with an empty payload.
    #[error("no payload for {0}")]
    EmptyPayload(String),

    /// The command was retried until its budget ran out without an acknowledgment.
    #[error("command {device}/{room}/{property} not acknowledged after {attempts} attempts")]
    CommandExhausted {
        device: String,
        room: String,
        property: String,
        attempts: u32,
    },

    /// Transport closed or the bridge task stopped.
    #[error("connection closed")]
    ConnectionClosed,
}

impl BridgeError {
    /// Whether this error should terminate the process instead of reconnecting.
    ///
    /// A timed-out connection leaves the transport in an unknown state, so
    /// recovery is left to the external supervisor.
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            BridgeError::Config(_) => true,
            _ => false,
        }
    }
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
