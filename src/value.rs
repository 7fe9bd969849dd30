//! Device kinds and property values shared by decoders, the state store
//! and the publish path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Device family addressed on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Light,
    Outlet,
    Thermostat,
    Fan,
    Gas,
    Doorlock,
    Energy,
    Elevator,
}

impl DeviceKind {
    /// Topic segment for this device kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Light => "light",
            DeviceKind::Outlet => "outlet",
            DeviceKind::Thermostat => "thermostat",
            DeviceKind::Fan => "fan",
            DeviceKind::Gas => "gas",
            DeviceKind::Doorlock => "doorlock",
            DeviceKind::Energy => "energy",
            DeviceKind::Elevator => "elevator",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(DeviceKind::Light),
            "outlet" => Ok(DeviceKind::Outlet),
            "thermostat" => Ok(DeviceKind::Thermostat),
            // older add-on releases published the fan as "ventil"
            "fan" | "ventil" => Ok(DeviceKind::Fan),
            "gas" => Ok(DeviceKind::Gas),
            "doorlock" => Ok(DeviceKind::Doorlock),
            "energy" => Ok(DeviceKind::Energy),
            "elevator" => Ok(DeviceKind::Elevator),
            other => Err(BridgeError::UnknownDevice(other.to_string())),
        }
    }
}

/// Value of a single device property.
///
/// The set of shapes is closed: an on/off switch, a number (temperatures,
/// consumption), a named preset (fan speed, thermostat mode, valve state)
/// or a raw hex counter that could not be read as decimal digits.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Switch(bool),
    Number(f64),
    Preset(String),
    Hex(String),
}

impl PropertyValue {
    /// `on` / `off` switch value.
    #[inline]
    pub fn on_off(on: bool) -> Self {
        PropertyValue::Switch(on)
    }

    /// Named preset. `on`/`off` are normalized to switches so that a mode
    /// decoded from the bus compares equal to the same mode commanded by name.
    pub fn preset(name: &str) -> Self {
        match name {
            "on" => PropertyValue::Switch(true),
            "off" => PropertyValue::Switch(false),
            other => PropertyValue::Preset(other.to_string()),
        }
    }

    /// Interpret an inbound command payload.
    ///
    /// `on`/`off` become switches, anything parseable as a float becomes a
    /// number, and everything else is kept as a preset name.
    pub fn from_command(payload: &str) -> Self {
        match payload {
            "on" => PropertyValue::Switch(true),
            "off" => PropertyValue::Switch(false),
            other => match other.parse::<f64>() {
                Ok(n) if n.is_finite() => PropertyValue::Number(n),
                _ => PropertyValue::Preset(other.to_string()),
            },
        }
    }

    /// Whether the value is numeric (these change constantly and are not logged on publish).
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyValue::Number(_))
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Switch(true) => f.write_str("on"),
            PropertyValue::Switch(false) => f.write_str("off"),
            PropertyValue::Number(n) => write_number(f, *n),
            PropertyValue::Preset(s) | PropertyValue::Hex(s) => f.write_str(s),
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

/// One decoded (or commanded) property change.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdate {
    pub device: DeviceKind,
    pub room: String,
    pub name: String,
    pub value: PropertyValue,
}

impl PropertyUpdate {
    pub fn new(
        device: DeviceKind,
        room: impl Into<String>,
        name: impl Into<String>,
        value: PropertyValue,
    ) -> Self {
        Self {
            device,
            room: room.into(),
            name: name.into(),
            value,
        }
    }
}
