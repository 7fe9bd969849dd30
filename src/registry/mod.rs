//! Message registry for matching frames to decode and encode specifications.
//!
//! The registry is an ordered, immutable table. Order is part of the contract:
//! [`MessageRegistry::lookup`] and [`MessageRegistry::encoder_for`] return the
//! first match, so earlier entries shadow later ones with overlapping matchers.
//!
//! Each entry is tagged by direction and carries only what that direction needs:
//! status (`Get`) and acknowledgment (`Ack`) entries carry a decoder, command
//! (`Set`) entries carry an encoder.
//!
//! # Example
//!
//! ```
//! use wallpad_bridge::family::ProtocolKind;
//! use wallpad_bridge::registry::Direction;
//! use wallpad_bridge::DeviceKind;
//!
//! let registry = &ProtocolKind::Bestin.family().registry;
//! let spec = registry.lookup(0x28, 0x91).unwrap();
//! assert_eq!(spec.device(), DeviceKind::Thermostat);
//! assert_eq!(spec.direction(), Direction::Ack);
//! ```

pub mod bestin;
pub mod kocom;

use crate::error::Result;
use crate::protocol::Frame;
use crate::value::{DeviceKind, PropertyUpdate, PropertyValue};

/// Direction of a message relative to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Periodic status reported by the wallpad.
    Get,
    /// Command written by the bridge.
    Set,
    /// Response to a command, also carrying device state.
    Ack,
}

/// Matching fields extracted from a frame by a family classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageKey {
    pub header: u8,
    pub command: u8,
    pub length: usize,
    /// Set when the wire format carries an explicit direction byte.
    pub direction: Option<Direction>,
}

/// Frame → property updates.
pub type Decoder = fn(&Frame) -> Vec<PropertyUpdate>;

/// Writes property bytes into a command frame prepared from the family template.
///
/// Arguments are the frame, room, property name and commanded value.
pub type FieldEncoder = fn(&mut [u8], &str, &str, &PropertyValue) -> Result<()>;

/// How a command frame is produced.
#[derive(Debug, Clone, Copy)]
pub enum Encoder {
    /// Family template plus per-property field writes; the checksum is applied afterwards.
    Fields(FieldEncoder),
    /// Complete frame sent verbatim. Only the single `on`/`off` value in `accepts` is valid.
    Fixed {
        frame: &'static [u8],
        accepts: bool,
    },
}

/// Status or acknowledgment entry.
#[derive(Debug, Clone, Copy)]
pub struct DecodeSpec {
    pub device: DeviceKind,
    pub header: u8,
    pub command: u8,
    pub length: usize,
    pub decode: Decoder,
}

/// Command entry.
#[derive(Debug, Clone, Copy)]
pub struct SetSpec {
    pub device: DeviceKind,
    pub header: u8,
    pub command: u8,
    pub length: usize,
    /// Only match commands addressed to this room.
    pub room: Option<&'static str>,
    /// Only match commands for this property.
    pub property: Option<&'static str>,
    pub encode: Encoder,
}

impl SetSpec {
    fn accepts(&self, device: DeviceKind, room: &str, property: &str) -> bool {
        self.device == device
            && self.room.map_or(true, |r| r == room)
            && self.property.map_or(true, |p| p == property)
    }
}

/// One registry entry.
#[derive(Debug, Clone, Copy)]
pub enum MessageSpec {
    Get(DecodeSpec),
    Set(SetSpec),
    Ack(DecodeSpec),
}

impl MessageSpec {
    pub fn direction(&self) -> Direction {
        match self {
            MessageSpec::Get(_) => Direction::Get,
            MessageSpec::Set(_) => Direction::Set,
            MessageSpec::Ack(_) => Direction::Ack,
        }
    }

    pub fn device(&self) -> DeviceKind {
        match self {
            MessageSpec::Get(spec) | MessageSpec::Ack(spec) => spec.device,
            MessageSpec::Set(spec) => spec.device,
        }
    }

    pub fn header(&self) -> u8 {
        match self {
            MessageSpec::Get(spec) | MessageSpec::Ack(spec) => spec.header,
            MessageSpec::Set(spec) => spec.header,
        }
    }

    pub fn command(&self) -> u8 {
        match self {
            MessageSpec::Get(spec) | MessageSpec::Ack(spec) => spec.command,
            MessageSpec::Set(spec) => spec.command,
        }
    }

    /// Decoder capability. `None` for command entries.
    pub fn as_decode(&self) -> Option<&DecodeSpec> {
        match self {
            MessageSpec::Get(spec) | MessageSpec::Ack(spec) => Some(spec),
            MessageSpec::Set(_) => None,
        }
    }

    /// Encoder capability. `None` for status and acknowledgment entries.
    pub fn as_set(&self) -> Option<&SetSpec> {
        match self {
            MessageSpec::Set(spec) => Some(spec),
            _ => None,
        }
    }

    fn decodes(&self, key: &MessageKey) -> bool {
        let Some(spec) = self.as_decode() else {
            return false;
        };
        spec.header == key.header
            && spec.command == key.command
            && spec.length == key.length
            && key.direction.map_or(true, |d| d == self.direction())
    }
}

/// Immutable ordered table of message specifications for one bus family.
#[derive(Debug, Clone, Copy)]
pub struct MessageRegistry {
    specs: &'static [MessageSpec],
}

impl MessageRegistry {
    pub const fn new(specs: &'static [MessageSpec]) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &'static [MessageSpec] {
        self.specs
    }

    /// First entry whose header and command match, in registry order.
    pub fn lookup(&self, header: u8, command: u8) -> Option<&'static MessageSpec> {
        self.specs
            .iter()
            .find(|spec| spec.header() == header && spec.command() == command)
    }

    /// Every decoder matching `key`, in registry order.
    ///
    /// Several device kinds can share one frame (a room status frame carries both
    /// light and outlet state), so dispatch runs all of them.
    pub fn decoders<'a>(&'a self, key: &'a MessageKey) -> impl Iterator<Item = &'static DecodeSpec> + 'a {
        self.specs
            .iter()
            .filter(move |spec| spec.decodes(key))
            .filter_map(MessageSpec::as_decode)
    }

    /// Property updates carried by `frame`. Empty when nothing matches.
    pub fn decode(&self, key: &MessageKey, frame: &Frame) -> Vec<PropertyUpdate> {
        self.decoders(key)
            .flat_map(|spec| (spec.decode)(frame))
            .collect()
    }

    /// First command entry accepting this device, room and property.
    pub fn encoder_for(&self, device: DeviceKind, room: &str, property: &str) -> Option<&'static SetSpec> {
        self.specs
            .iter()
            .filter_map(MessageSpec::as_set)
            .find(|spec| spec.accepts(device, room, property))
    }
}

/// Switch command value or [`BridgeError::InvalidValue`](crate::BridgeError::InvalidValue).
pub(crate) fn expect_switch(property: &str, value: &PropertyValue) -> Result<bool> {
    match value {
        PropertyValue::Switch(on) => Ok(*on),
        other => Err(invalid_value(property, other)),
    }
}

/// Numeric command value or [`BridgeError::InvalidValue`](crate::BridgeError::InvalidValue).
pub(crate) fn expect_number(property: &str, value: &PropertyValue) -> Result<f64> {
    match value {
        PropertyValue::Number(n) => Ok(*n),
        other => Err(invalid_value(property, other)),
    }
}

pub(crate) fn invalid_value(property: &str, value: &PropertyValue) -> crate::BridgeError {
    crate::BridgeError::InvalidValue {
        property: property.to_string(),
        value: value.to_string(),
    }
}

pub(crate) fn unknown_property(device: DeviceKind, property: &str) -> crate::BridgeError {
    crate::BridgeError::UnknownProperty {
        device: device.to_string(),
        property: property.to_string(),
    }
}

/// Room index parsed from a topic segment.
pub(crate) fn parse_room(room: &str) -> Result<u8> {
    room.parse::<u8>()
        .map_err(|_| crate::BridgeError::InvalidRoom(room.to_string()))
}

/// Unit number of a `power<N>` / `usage<N>` style property, if it has that prefix.
pub(crate) fn unit_index(property: &str, prefix: &str) -> Option<u8> {
    property.strip_prefix(prefix)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::ProtocolKind;

    #[test]
    fn test_lookup_is_first_match() {
        let registry = &ProtocolKind::Bestin.family().registry;
        // light and outlet share 0x31/0x91; light comes first
        let spec = registry.lookup(0x31, 0x91).unwrap();
        assert_eq!(spec.device(), DeviceKind::Light);
        assert!(registry.lookup(0x99, 0x00).is_none());
    }

    #[test]
    fn test_decoders_return_all_matches_in_order() {
        let registry = &ProtocolKind::Bestin.family().registry;
        let key = MessageKey {
            header: 0x31,
            command: 0x91,
            length: 30,
            direction: None,
        };
        let devices: Vec<_> = registry.decoders(&key).map(|s| s.device).collect();
        assert_eq!(devices, vec![DeviceKind::Light, DeviceKind::Outlet]);
    }

    #[test]
    fn test_decoders_respect_length() {
        let registry = &ProtocolKind::Bestin.family().registry;
        let key = MessageKey {
            header: 0x31,
            command: 0x91,
            length: 20,
            direction: None,
        };
        assert_eq!(registry.decoders(&key).count(), 0);
    }

    #[test]
    fn test_encoder_for_shadowing() {
        let registry = &ProtocolKind::Bestin.family().registry;

        let batch = registry
            .encoder_for(DeviceKind::Light, "all", "batch")
            .unwrap();
        assert!(matches!(batch.encode, Encoder::Fixed { accepts: true, .. }));

        let room = registry
            .encoder_for(DeviceKind::Light, "2", "batch")
            .unwrap();
        assert!(matches!(room.encode, Encoder::Fields(_)));

        assert!(registry
            .encoder_for(DeviceKind::Energy, "elec", "total")
            .is_none());
    }

    #[test]
    fn test_unit_index() {
        assert_eq!(unit_index("power3", "power"), Some(3));
        assert_eq!(unit_index("power", "power"), None);
        assert_eq!(unit_index("usage1", "power"), None);
    }
}
