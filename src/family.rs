//! Bus families.
//!
//! A [`BusFamily`] bundles everything that differs between wallpad brands:
//! framing, checksum, registry, how match fields are read from a frame, how a
//! response is correlated to the command in flight, which frames are timing
//! references, and the default bus timing. The engine itself is family-agnostic.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::protocol::{ChecksumPolicy, Frame, FramingPolicy};
use crate::registry::{self, Encoder, MessageKey, MessageRegistry, SetSpec};
use crate::value::{DeviceKind, PropertyValue};

/// Built-in bus families, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Bestin,
    Kocom,
}

impl ProtocolKind {
    pub fn family(&self) -> &'static BusFamily {
        match self {
            ProtocolKind::Bestin => &registry::bestin::FAMILY,
            ProtocolKind::Kocom => &registry::kocom::FAMILY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Bestin => "bestin",
            ProtocolKind::Kocom => "kocom",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bestin" => Ok(ProtocolKind::Bestin),
            "kocom" => Ok(ProtocolKind::Kocom),
            other => Err(BridgeError::Config(format!("unknown protocol: {other}"))),
        }
    }
}

/// Static description of one wallpad bus.
pub struct BusFamily {
    pub kind: ProtocolKind,
    pub framing: FramingPolicy,
    pub checksum: ChecksumPolicy,
    pub registry: MessageRegistry,
    /// Extract the registry match fields from a frame.
    pub classify: fn(&Frame) -> MessageKey,
    /// Whether `frame` answers the command bytes in flight.
    pub acknowledges: fn(&[u8], &Frame) -> bool,
    /// Whether `frame` refreshes the pacing reference.
    pub is_sync: fn(&Frame) -> bool,
    /// Zeroed command frame with the fixed fields of `spec` filled in.
    pub template: fn(&SetSpec) -> Vec<u8>,
    pub min_gap: Duration,
    pub retry_interval: Duration,
}

impl fmt::Debug for BusFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusFamily")
            .field("kind", &self.kind)
            .field("framing", &self.framing)
            .field("checksum", &self.checksum)
            .field("min_gap", &self.min_gap)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

impl BusFamily {
    /// Build the command frame for setting `property` of `device` in `room`.
    pub fn encode(
        &self,
        device: DeviceKind,
        room: &str,
        property: &str,
        value: &PropertyValue,
    ) -> Result<Bytes> {
        let spec = self
            .registry
            .encoder_for(device, room, property)
            .ok_or_else(|| BridgeError::UnknownDevice(device.to_string()))?;

        match spec.encode {
            Encoder::Fixed { frame, accepts } => {
                if *value != PropertyValue::Switch(accepts) {
                    return Err(BridgeError::UnsupportedValue {
                        device: device.to_string(),
                        value: value.to_string(),
                        expected: if accepts { "on" } else { "off" },
                    });
                }
                Ok(Bytes::from_static(frame))
            }
            Encoder::Fields(write) => {
                let mut frame = (self.template)(spec);
                write(&mut frame, room, property, value)?;
                self.framing.seal(&mut frame);
                self.checksum.apply(&mut frame);
                Ok(Bytes::from(frame))
            }
        }
    }

    /// Checksum check under this family's policy.
    #[inline]
    pub fn verify(&self, frame: &Frame) -> bool {
        self.checksum.verify(frame.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_kind_parse() {
        assert_eq!("bestin".parse::<ProtocolKind>().unwrap(), ProtocolKind::Bestin);
        assert_eq!("kocom".parse::<ProtocolKind>().unwrap(), ProtocolKind::Kocom);
        assert!("commax".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn test_family_kind_matches() {
        for kind in [ProtocolKind::Bestin, ProtocolKind::Kocom] {
            assert_eq!(kind.family().kind, kind);
        }
    }

    #[test]
    fn test_unknown_device_rejected() {
        let family = ProtocolKind::Kocom.family();
        let err = family
            .encode(DeviceKind::Doorlock, "1", "power", &PropertyValue::Switch(true))
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownDevice(_)));
    }

    #[test]
    fn test_fixed_frame_only_accepts_its_value() {
        let family = ProtocolKind::Bestin.family();
        let frame = family
            .encode(DeviceKind::Gas, "1", "cutoff", &PropertyValue::Switch(false))
            .unwrap();
        assert_eq!(frame.len(), 10);

        let err = family
            .encode(DeviceKind::Gas, "1", "cutoff", &PropertyValue::Switch(true))
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UnsupportedValue { expected: "off", .. }
        ));
    }
}
