//! Pub/sub topic layout.
//!
//! ```text
//! <prefix>/<device>/<room>/<property>/command   inbound, UTF-8 payload
//! <prefix>/<device>/<room>/<property>/state     outbound, retained
//! ```

use crate::error::{BridgeError, Result};
use crate::value::{DeviceKind, PropertyValue};

/// Broker availability topic; `online` on it means subscriptions must be renewed.
pub const AVAILABILITY_TOPIC: &str = "homeassistant/status";

/// Availability payload announcing the broker side came back.
pub const ONLINE: &str = "online";

const COMMAND_SUFFIX: &str = "command";
const STATE_SUFFIX: &str = "state";

/// A property-set request parsed from a command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub device: DeviceKind,
    pub room: String,
    pub name: String,
    pub payload: String,
}

impl CommandRequest {
    /// Commanded value. Empty payloads are rejected.
    pub fn value(&self) -> Result<PropertyValue> {
        let payload = self.payload.trim();
        if payload.is_empty() {
            return Err(BridgeError::EmptyPayload(format!(
                "{}/{}/{}",
                self.device, self.room, self.name
            )));
        }
        Ok(PropertyValue::from_command(payload))
    }
}

/// Parse `<prefix>/<device>/<room>/<name>/command`.
///
/// Returns `None` for any other topic, including unknown device kinds.
pub fn parse_command(prefix: &str, topic: &str, payload: &[u8]) -> Option<CommandRequest> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let (device, room, name, suffix) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || suffix != COMMAND_SUFFIX || room.is_empty() || name.is_empty() {
        return None;
    }
    let device = match device.parse::<DeviceKind>() {
        Ok(device) => device,
        Err(_) => {
            tracing::debug!(topic, "command for unknown device");
            return None;
        }
    };
    Some(CommandRequest {
        device,
        room: room.to_string(),
        name: name.to_string(),
        payload: String::from_utf8_lossy(payload).into_owned(),
    })
}

/// `<prefix>/<device>/<room>/<name>/state`.
pub fn state_topic(prefix: &str, device: DeviceKind, room: &str, name: &str) -> String {
    format!("{prefix}/{device}/{room}/{name}/{STATE_SUFFIX}")
}

/// Subscription filter matching every command topic under `prefix`.
pub fn command_filter(prefix: &str) -> String {
    format!("{prefix}/+/+/+/{COMMAND_SUFFIX}")
}

/// Whether a message announces that the broker side is back online.
pub fn is_online_announcement(topic: &str, payload: &[u8]) -> bool {
    topic == AVAILABILITY_TOPIC && payload == ONLINE.as_bytes()
}
