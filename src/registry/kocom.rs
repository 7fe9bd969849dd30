//! Kocom wallpad tables.
//!
//! Every frame is 21 bytes:
//!
//! ```text
//! AA 55 30 <type> 00 <dev> <room> <src> 00 <cmd> <payload: 8 bytes> <sum> 0D 0D
//! ```
//!
//! `type` is `0xBC` for commands and `0xDC` for device status.

use std::time::Duration;

use super::{
    expect_number, expect_switch, invalid_value, parse_room, unit_index, unknown_property,
    DecodeSpec, Direction, Encoder, MessageKey, MessageRegistry, MessageSpec, SetSpec,
};
use crate::error::Result;
use crate::family::{BusFamily, ProtocolKind};
use crate::protocol::{ChecksumPolicy, FixedMarker, Frame, FramingPolicy};
use crate::value::{DeviceKind, PropertyUpdate, PropertyValue};

pub const FRAME_LEN: usize = 21;
pub const START: [u8; 2] = [0xAA, 0x55];
pub const END: [u8; 2] = [0x0D, 0x0D];

pub const TYPE_COMMAND: u8 = 0xBC;
pub const TYPE_STATUS: u8 = 0xDC;

const DEV_LIGHT: u8 = 0x0E;
const DEV_OUTLET: u8 = 0x3B;
const DEV_THERMOSTAT: u8 = 0x36;
const DEV_FAN: u8 = 0x48;
const DEV_GAS: u8 = 0x2C;

/// Checksum covers everything before its own slot.
const CHECKSUM_AT: usize = 18;

const GAS_CLOSE: &[u8] = &[
    0xAA, 0x55, 0x30, 0xBC, 0x00, 0x2C, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x1B, 0x0D, 0x0D,
];
const ELEVATOR_CALL: &[u8] = &[
    0xAA, 0x55, 0x30, 0xBC, 0x00, 0x01, 0x00, 0x44, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x32, 0x0D, 0x0D,
];

const fn status(device: DeviceKind, dev: u8, decode: super::Decoder) -> MessageSpec {
    MessageSpec::Ack(DecodeSpec {
        device,
        header: dev,
        command: 0x00,
        length: FRAME_LEN,
        decode,
    })
}

const fn command(device: DeviceKind, dev: u8, encode: super::FieldEncoder) -> MessageSpec {
    MessageSpec::Set(SetSpec {
        device,
        header: dev,
        command: 0x00,
        length: FRAME_LEN,
        room: None,
        property: None,
        encode: Encoder::Fields(encode),
    })
}

const SPECS: &[MessageSpec] = &[
    status(DeviceKind::Light, DEV_LIGHT, decode_light),
    status(DeviceKind::Outlet, DEV_OUTLET, decode_outlet),
    status(DeviceKind::Thermostat, DEV_THERMOSTAT, decode_thermostat),
    status(DeviceKind::Fan, DEV_FAN, decode_fan),
    status(DeviceKind::Gas, DEV_GAS, decode_gas),
    command(DeviceKind::Light, DEV_LIGHT, encode_light),
    command(DeviceKind::Outlet, DEV_OUTLET, encode_outlet),
    command(DeviceKind::Thermostat, DEV_THERMOSTAT, encode_thermostat),
    command(DeviceKind::Fan, DEV_FAN, encode_fan),
    MessageSpec::Set(SetSpec {
        device: DeviceKind::Gas,
        header: DEV_GAS,
        command: 0x02,
        length: FRAME_LEN,
        room: None,
        property: None,
        encode: Encoder::Fixed {
            frame: GAS_CLOSE,
            accepts: false,
        },
    }),
    MessageSpec::Set(SetSpec {
        device: DeviceKind::Elevator,
        header: 0x01,
        command: 0x01,
        length: FRAME_LEN,
        room: None,
        property: None,
        encode: Encoder::Fixed {
            frame: ELEVATOR_CALL,
            accepts: true,
        },
    }),
];

pub static FAMILY: BusFamily = BusFamily {
    kind: ProtocolKind::Kocom,
    framing: FramingPolicy::FixedMarker(FixedMarker {
        start: START,
        end: END,
        len: FRAME_LEN,
    }),
    checksum: ChecksumPolicy::SumMod256 {
        covered: CHECKSUM_AT,
    },
    registry: MessageRegistry::new(SPECS),
    classify,
    acknowledges,
    is_sync,
    template,
    min_gap: Duration::from_millis(300),
    retry_interval: Duration::from_millis(300),
};

/// Anything other than a status frame is command traffic from a controller.
fn classify(frame: &Frame) -> MessageKey {
    let direction = if frame.byte(3) == TYPE_STATUS {
        Direction::Ack
    } else {
        Direction::Set
    };
    MessageKey {
        header: frame.byte(5),
        command: frame.byte(9),
        length: frame.len(),
        direction: Some(direction),
    }
}

fn acknowledges(pending: &[u8], frame: &Frame) -> bool {
    let (Some(&dev), Some(&cmd)) = (pending.get(5), pending.get(9)) else {
        return false;
    };
    frame.get(3) == Some(TYPE_STATUS) && frame.get(5) == Some(dev) && frame.get(9) == Some(cmd)
}

fn is_sync(frame: &Frame) -> bool {
    frame.byte(3) != TYPE_STATUS
}

fn template(spec: &SetSpec) -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&[START[0], START[1], 0x30, TYPE_COMMAND]);
    frame[5] = spec.header;
    frame[9] = spec.command;
    frame
}

fn address(frame: &mut [u8], room: &str) -> Result<()> {
    frame[6] = parse_room(room)?;
    frame[7] = 0x01;
    Ok(())
}

/// Units are numbered from zero and occupy one payload byte each.
fn encode_units(
    device: DeviceKind,
    units: u8,
    frame: &mut [u8],
    room: &str,
    property: &str,
    value: &PropertyValue,
) -> Result<()> {
    let unit = unit_index(property, "power")
        .filter(|n| *n < units)
        .ok_or_else(|| unknown_property(device, property))?;
    let on = expect_switch(property, value)?;
    address(frame, room)?;
    frame[10 + usize::from(unit)] = if on { 0xFF } else { 0x00 };
    Ok(())
}

fn encode_light(frame: &mut [u8], room: &str, property: &str, value: &PropertyValue) -> Result<()> {
    encode_units(DeviceKind::Light, 3, frame, room, property, value)
}

fn encode_outlet(frame: &mut [u8], room: &str, property: &str, value: &PropertyValue) -> Result<()> {
    encode_units(DeviceKind::Outlet, 2, frame, room, property, value)
}

fn thermostat_mode_code(value: &PropertyValue) -> Option<[u8; 2]> {
    match value {
        PropertyValue::Switch(false) => Some([0x01, 0x00]),
        PropertyValue::Preset(mode) if mode == "heat" => Some([0x11, 0x00]),
        PropertyValue::Preset(mode) if mode == "fan_only" => Some([0x11, 0x01]),
        _ => None,
    }
}

fn thermostat_mode_name(code: [u8; 2]) -> Option<&'static str> {
    match code {
        [0x01, 0x00] => Some("off"),
        [0x11, 0x00] => Some("heat"),
        [0x11, 0x01] => Some("fan_only"),
        _ => None,
    }
}

fn encode_thermostat(
    frame: &mut [u8],
    room: &str,
    property: &str,
    value: &PropertyValue,
) -> Result<()> {
    address(frame, room)?;
    match property {
        "power" => {
            let code = thermostat_mode_code(value).ok_or_else(|| invalid_value(property, value))?;
            frame[10..12].copy_from_slice(&code);
        }
        "target" => {
            let target = expect_number(property, value)?;
            if !(0.0..256.0).contains(&target) {
                return Err(invalid_value(property, value));
            }
            frame[12] = target.trunc() as u8;
        }
        _ => return Err(unknown_property(DeviceKind::Thermostat, property)),
    }
    Ok(())
}

fn fan_speed_code(name: &str) -> Option<u8> {
    match name {
        "low" => Some(0x40),
        "medium" => Some(0x80),
        "high" => Some(0xC0),
        _ => None,
    }
}

fn fan_speed_name(code: u8) -> Option<&'static str> {
    match code >> 4 {
        0x4 => Some("low"),
        0x8 => Some("medium"),
        0xC => Some("high"),
        _ => None,
    }
}

fn encode_fan(frame: &mut [u8], room: &str, property: &str, value: &PropertyValue) -> Result<()> {
    address(frame, room)?;
    match property {
        "power" => {
            let on = expect_switch(property, value)?;
            let code = if on { [0x11, 0x01] } else { [0x00, 0x01] };
            frame[10..12].copy_from_slice(&code);
        }
        "preset" => {
            let speed = match value {
                PropertyValue::Preset(name) => fan_speed_code(name),
                _ => None,
            };
            frame[12] = speed.ok_or_else(|| invalid_value(property, value))?;
        }
        _ => return Err(unknown_property(DeviceKind::Fan, property)),
    }
    Ok(())
}

fn room_of(frame: &Frame) -> String {
    frame.byte(6).to_string()
}

fn decode_units(device: DeviceKind, units: usize, frame: &Frame) -> Vec<PropertyUpdate> {
    let room = room_of(frame);
    (0..units)
        .map(|i| {
            PropertyUpdate::new(
                device,
                room.clone(),
                format!("power{i}"),
                PropertyValue::on_off(frame.byte(10 + i) == 0xFF),
            )
        })
        .collect()
}

fn decode_light(frame: &Frame) -> Vec<PropertyUpdate> {
    decode_units(DeviceKind::Light, 3, frame)
}

fn decode_outlet(frame: &Frame) -> Vec<PropertyUpdate> {
    decode_units(DeviceKind::Outlet, 2, frame)
}

fn decode_thermostat(frame: &Frame) -> Vec<PropertyUpdate> {
    let room = room_of(frame);
    let mut updates = Vec::with_capacity(3);
    if let Some(mode) = thermostat_mode_name([frame.byte(10), frame.byte(11)]) {
        updates.push(PropertyUpdate::new(
            DeviceKind::Thermostat,
            room.clone(),
            "power",
            PropertyValue::preset(mode),
        ));
    }
    updates.push(PropertyUpdate::new(
        DeviceKind::Thermostat,
        room.clone(),
        "target",
        PropertyValue::Number(f64::from(frame.byte(12))),
    ));
    updates.push(PropertyUpdate::new(
        DeviceKind::Thermostat,
        room,
        "current",
        PropertyValue::Number(f64::from(frame.byte(14))),
    ));
    updates
}

fn decode_fan(frame: &Frame) -> Vec<PropertyUpdate> {
    let room = room_of(frame);
    let on = frame.byte(10) == 0x11 && frame.byte(11) == 0x01;
    let mut updates = vec![PropertyUpdate::new(
        DeviceKind::Fan,
        room.clone(),
        "power",
        PropertyValue::on_off(on),
    )];
    let speed = frame.byte(12);
    if speed != 0 {
        if let Some(name) = fan_speed_name(speed) {
            updates.push(PropertyUpdate::new(
                DeviceKind::Fan,
                room,
                "preset",
                PropertyValue::preset(name),
            ));
        }
    }
    updates
}

fn decode_gas(frame: &Frame) -> Vec<PropertyUpdate> {
    let room = room_of(frame);
    // valve labels follow the wallpad display, not the cutoff switch
    let cutoff = frame.byte(10) == 0x00;
    vec![
        PropertyUpdate::new(DeviceKind::Gas, room.clone(), "cutoff", PropertyValue::on_off(cutoff)),
        PropertyUpdate::new(
            DeviceKind::Gas,
            room,
            "power",
            PropertyValue::preset(if cutoff { "open" } else { "closed" }),
        ),
    ]
}
