//! Bestin wallpad tables.
//!
//! Length-prefixed frames `02 <header> <len> <cmd> ..` with a rolling XOR
//! checksum. Short status frames (gas, doorlock, fan) are always 10 bytes and
//! carry the command code where the length would be.

use std::time::Duration;

use super::{
    expect_number, expect_switch, invalid_value, parse_room, unit_index, unknown_property,
    DecodeSpec, Encoder, MessageKey, MessageRegistry, MessageSpec, SetSpec,
};
use crate::error::Result;
use crate::family::{BusFamily, ProtocolKind};
use crate::protocol::{ChecksumPolicy, Frame, FramingPolicy, LengthPrefixed, ShortFrameRule};
use crate::value::{DeviceKind, PropertyUpdate, PropertyValue};

pub const PREFIX: u8 = 0x02;

const HEADERS: &[u8] = &[0x17, 0x28, 0x31, 0x41, 0x42, 0x61, 0xD1];

const SHORT_FRAMES: &[ShortFrameRule] = &[
    ShortFrameRule {
        headers: &[0x31, 0x41],
        codes: Some(&[0x00, 0x02, 0x80, 0x82]),
        len: 10,
    },
    ShortFrameRule {
        headers: &[0x61],
        codes: None,
        len: 10,
    },
];

pub const MAX_FRAME_LEN: usize = 64;

const LIGHT_CUTOFF: &[u8] = &[0x02, 0x31, 0x0B, 0x02, 0x31, 0x3F, 0x00, 0x00, 0x00, 0x00, 0x51];
const GAS_CLOSE: &[u8] = &[0x02, 0x31, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x3D];
const DOORLOCK_OPEN: &[u8] = &[0x02, 0x41, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x4E];

const ENERGY_METERS: [&str; 5] = ["elec", "heat", "hwater", "gas", "water"];

const SPECS: &[MessageSpec] = &[
    // commands
    MessageSpec::Set(SetSpec {
        device: DeviceKind::Light,
        header: 0x31,
        command: 0x02,
        length: 11,
        room: Some("all"),
        property: Some("batch"),
        encode: Encoder::Fixed {
            frame: LIGHT_CUTOFF,
            accepts: true,
        },
    }),
    MessageSpec::Set(SetSpec {
        device: DeviceKind::Light,
        header: 0x31,
        command: 0x01,
        length: 13,
        room: None,
        property: None,
        encode: Encoder::Fields(encode_light),
    }),
    MessageSpec::Set(SetSpec {
        device: DeviceKind::Outlet,
        header: 0x31,
        command: 0x01,
        length: 13,
        room: None,
        property: None,
        encode: Encoder::Fields(encode_outlet),
    }),
    MessageSpec::Set(SetSpec {
        device: DeviceKind::Thermostat,
        header: 0x28,
        command: 0x12,
        length: 14,
        room: None,
        property: None,
        encode: Encoder::Fields(encode_thermostat),
    }),
    MessageSpec::Set(SetSpec {
        device: DeviceKind::Fan,
        header: 0x61,
        command: 0x00,
        length: 10,
        room: None,
        property: None,
        encode: Encoder::Fields(encode_fan),
    }),
    MessageSpec::Set(SetSpec {
        device: DeviceKind::Gas,
        header: 0x31,
        command: 0x02,
        length: 10,
        room: None,
        property: None,
        encode: Encoder::Fixed {
            frame: GAS_CLOSE,
            accepts: false,
        },
    }),
    MessageSpec::Set(SetSpec {
        device: DeviceKind::Doorlock,
        header: 0x41,
        command: 0x02,
        length: 10,
        room: None,
        property: None,
        encode: Encoder::Fixed {
            frame: DOORLOCK_OPEN,
            accepts: true,
        },
    }),
    // state
    MessageSpec::Ack(DecodeSpec {
        device: DeviceKind::Light,
        header: 0x31,
        command: 0x91,
        length: 30,
        decode: decode_light,
    }),
    MessageSpec::Ack(DecodeSpec {
        device: DeviceKind::Outlet,
        header: 0x31,
        command: 0x91,
        length: 30,
        decode: decode_outlet,
    }),
    MessageSpec::Ack(DecodeSpec {
        device: DeviceKind::Thermostat,
        header: 0x28,
        command: 0x91,
        length: 16,
        decode: decode_thermostat,
    }),
    MessageSpec::Get(DecodeSpec {
        device: DeviceKind::Fan,
        header: 0x61,
        command: 0x80,
        length: 10,
        decode: decode_fan,
    }),
    MessageSpec::Get(DecodeSpec {
        device: DeviceKind::Gas,
        header: 0x31,
        command: 0x80,
        length: 10,
        decode: decode_gas,
    }),
    MessageSpec::Get(DecodeSpec {
        device: DeviceKind::Doorlock,
        header: 0x41,
        command: 0x80,
        length: 10,
        decode: decode_doorlock,
    }),
    MessageSpec::Get(DecodeSpec {
        device: DeviceKind::Energy,
        header: 0xD1,
        command: 0x82,
        length: 48,
        decode: decode_energy,
    }),
];

pub static FAMILY: BusFamily = BusFamily {
    kind: ProtocolKind::Bestin,
    framing: FramingPolicy::LengthPrefixed(LengthPrefixed {
        prefixes: &[PREFIX],
        headers: HEADERS,
        short_frames: SHORT_FRAMES,
        max_len: MAX_FRAME_LEN,
    }),
    checksum: ChecksumPolicy::RollingXor,
    registry: MessageRegistry::new(SPECS),
    classify,
    acknowledges,
    is_sync,
    template,
    min_gap: Duration::from_millis(100),
    retry_interval: Duration::from_millis(100),
};

fn classify(frame: &Frame) -> MessageKey {
    let command = if frame.len() == 10 {
        frame.byte(2)
    } else {
        frame.byte(3)
    };
    MessageKey {
        header: frame.byte(1),
        command,
        length: frame.len(),
        direction: None,
    }
}

/// The response echoes the header and turns the command code into `0x8?`
/// (`0x9?` for the thermostat) keeping its low nibble.
fn acknowledges(pending: &[u8], frame: &Frame) -> bool {
    let at = if pending.len() == 10 { 2 } else { 3 };
    let (Some(&header), Some(&code)) = (pending.get(1), pending.get(at)) else {
        return false;
    };
    let class: u8 = if header == 0x28 { 0x9 } else { 0x8 };
    frame.get(1) == Some(header) && frame.get(at) == Some(class << 4 | (code & 0x0F))
}

fn is_sync(frame: &Frame) -> bool {
    frame.get(0) == Some(PREFIX)
}

fn template(spec: &SetSpec) -> Vec<u8> {
    let mut frame = vec![0u8; spec.length];
    frame[0] = PREFIX;
    frame[1] = spec.header;
    if spec.length == 10 {
        frame[2] = spec.command;
    } else {
        frame[2] = spec.length as u8;
        frame[3] = spec.command;
    }
    frame
}

fn power_unit(device: DeviceKind, property: &str, units: u8) -> Result<u8> {
    unit_index(property, "power")
        .filter(|n| (1..=units).contains(n))
        .ok_or_else(|| unknown_property(device, property))
}

fn encode_light(frame: &mut [u8], room: &str, property: &str, value: &PropertyValue) -> Result<()> {
    let on = expect_switch(property, value)?;
    frame[5] = parse_room(room)? & 0x0F;
    frame[6] = match property {
        "batch" => {
            if on {
                0x8F
            } else {
                0x0F
            }
        }
        _ => {
            let unit = power_unit(DeviceKind::Light, property, 4)?;
            1u8 << (unit - 1) | if on { 0x80 } else { 0x00 }
        }
    };
    frame[11] = if on { 0x04 } else { 0x00 };
    Ok(())
}

fn encode_outlet(frame: &mut [u8], room: &str, property: &str, value: &PropertyValue) -> Result<()> {
    let on = expect_switch(property, value)?;
    frame[5] = parse_room(room)? & 0x0F;
    match property {
        "standby" => frame[8] = if on { 0x83 } else { 0x03 },
        "batch" => {
            frame[7] = if on { 0x8F } else { 0x0F };
            frame[11] = if on { 0x09 } else { 0x00 };
        }
        _ => {
            let unit = power_unit(DeviceKind::Outlet, property, 3)?;
            frame[7] = 1u8 << (unit - 1) | if on { 0x80 } else { 0x00 };
            frame[11] = if on { 0x09u8 << (unit - 1) } else { 0x00 };
        }
    }
    Ok(())
}

fn encode_thermostat(
    frame: &mut [u8],
    room: &str,
    property: &str,
    value: &PropertyValue,
) -> Result<()> {
    frame[5] = parse_room(room)? & 0x0F;
    match property {
        "power" => {
            frame[6] = match value {
                PropertyValue::Preset(mode) if mode == "heat" => 0x01,
                PropertyValue::Switch(false) => 0x02,
                other => return Err(invalid_value(property, other)),
            };
        }
        "target" => {
            let target = expect_number(property, value)?;
            if !(0.0..64.0).contains(&target) {
                return Err(invalid_value(property, value));
            }
            let half = if target.fract() != 0.0 { 0x40 } else { 0x00 };
            frame[7] = target.trunc() as u8 | half;
        }
        _ => return Err(unknown_property(DeviceKind::Thermostat, property)),
    }
    Ok(())
}

fn encode_fan(frame: &mut [u8], _room: &str, property: &str, value: &PropertyValue) -> Result<()> {
    match property {
        "power" => {
            let on = expect_switch(property, value)?;
            frame[2] = 0x01;
            frame[5] = u8::from(on);
            frame[6] = 0x01;
        }
        "preset" => {
            let (mode, speed) = match value {
                PropertyValue::Preset(p) if p == "nature" => (0x07, 0x00),
                PropertyValue::Preset(p) => match fan_speed_code(p) {
                    Some(speed) => (0x03, speed),
                    None => return Err(invalid_value(property, value)),
                },
                other => return Err(invalid_value(property, other)),
            };
            frame[2] = mode;
            frame[6] = speed;
        }
        _ => return Err(unknown_property(DeviceKind::Fan, property)),
    }
    Ok(())
}

fn fan_speed_code(name: &str) -> Option<u8> {
    match name {
        "low" => Some(0x01),
        "medium" => Some(0x02),
        "high" => Some(0x03),
        _ => None,
    }
}

fn fan_speed_name(code: u8) -> Option<&'static str> {
    match code {
        0x01 => Some("low"),
        0x02 => Some("medium"),
        0x03 => Some("high"),
        _ => None,
    }
}

fn room_of(frame: &Frame) -> String {
    (frame.byte(5) & 0x0F).to_string()
}

fn decode_light(frame: &Frame) -> Vec<PropertyUpdate> {
    let room = room_of(frame);
    let state = frame.byte(6);
    let units = if room == "1" {
        ((state >> 4) & 1) + 3
    } else {
        2
    };

    let mut updates: Vec<_> = (0..units)
        .map(|i| {
            PropertyUpdate::new(
                DeviceKind::Light,
                room.clone(),
                format!("power{}", i + 1),
                PropertyValue::on_off(state & (1 << i) != 0),
            )
        })
        .collect();
    updates.push(PropertyUpdate::new(
        DeviceKind::Light,
        room,
        "batch",
        PropertyValue::on_off(state & 0x0F != 0),
    ));
    updates
}

fn decode_outlet(frame: &Frame) -> Vec<PropertyUpdate> {
    let room = room_of(frame);
    let state = frame.byte(7);
    let units = if room == "1" { 3 } else { 2 };

    let mut updates = Vec::with_capacity(units * 2 + 2);
    for i in 0..units {
        let at = 14 + 2 * i;
        let raw = u16::from(frame.byte(at)) << 4 | u16::from(frame.byte(at + 1));
        updates.push(PropertyUpdate::new(
            DeviceKind::Outlet,
            room.clone(),
            format!("power{}", i + 1),
            PropertyValue::on_off(state & (1 << i) != 0),
        ));
        updates.push(PropertyUpdate::new(
            DeviceKind::Outlet,
            room.clone(),
            format!("usage{}", i + 1),
            PropertyValue::Number(f64::from(raw) / 10.0),
        ));
    }
    updates.push(PropertyUpdate::new(
        DeviceKind::Outlet,
        room.clone(),
        "batch",
        PropertyValue::on_off(state & 0x0F != 0),
    ));
    updates.push(PropertyUpdate::new(
        DeviceKind::Outlet,
        room,
        "standby",
        PropertyValue::on_off((state >> 4) & 1 != 0),
    ));
    updates
}

fn decode_thermostat(frame: &Frame) -> Vec<PropertyUpdate> {
    let room = room_of(frame);
    let mode = if frame.byte(6) & 0x01 != 0 { "heat" } else { "off" };
    let setting = frame.byte(7);
    let target = f64::from(setting & 0x3F) + if setting & 0x40 != 0 { 0.5 } else { 0.0 };
    let current = f64::from(u16::from(frame.byte(8)) << 8 | u16::from(frame.byte(9))) / 10.0;

    vec![
        PropertyUpdate::new(DeviceKind::Thermostat, room.clone(), "power", PropertyValue::preset(mode)),
        PropertyUpdate::new(DeviceKind::Thermostat, room.clone(), "target", PropertyValue::Number(target)),
        PropertyUpdate::new(DeviceKind::Thermostat, room, "current", PropertyValue::Number(current)),
    ]
}

fn decode_fan(frame: &Frame) -> Vec<PropertyUpdate> {
    let mode = frame.byte(5);
    let mut updates = vec![PropertyUpdate::new(
        DeviceKind::Fan,
        "1",
        "power",
        PropertyValue::on_off(mode != 0),
    )];
    let preset = if mode == 0x11 {
        Some("nature")
    } else {
        fan_speed_name(frame.byte(6))
    };
    if let Some(preset) = preset {
        updates.push(PropertyUpdate::new(
            DeviceKind::Fan,
            "1",
            "preset",
            PropertyValue::preset(preset),
        ));
    }
    updates
}

fn decode_gas(frame: &Frame) -> Vec<PropertyUpdate> {
    let open = frame.byte(5) != 0;
    vec![
        PropertyUpdate::new(DeviceKind::Gas, "1", "cutoff", PropertyValue::on_off(open)),
        PropertyUpdate::new(
            DeviceKind::Gas,
            "1",
            "power",
            PropertyValue::preset(if open { "open" } else { "closed" }),
        ),
    ]
}

fn decode_doorlock(frame: &Frame) -> Vec<PropertyUpdate> {
    vec![PropertyUpdate::new(
        DeviceKind::Doorlock,
        "1",
        "power",
        PropertyValue::on_off(frame.byte(5) != 0x51),
    )]
}

fn decode_energy(frame: &Frame) -> Vec<PropertyUpdate> {
    let mut updates = Vec::with_capacity(ENERGY_METERS.len() + 3);
    for (k, meter) in ENERGY_METERS.into_iter().enumerate() {
        let total = match meter {
            "elec" => bcd_counter(frame, 8..12).map(|v| scale(v, 100.0, true)),
            "water" => bcd_counter(frame, 17..19).map(|v| scale(v, 10.0, false)),
            "gas" => bcd_counter(frame, 32..35).map(|v| scale(v, 10.0, false)),
            _ => None,
        };
        if let Some(total) = total {
            updates.push(PropertyUpdate::new(DeviceKind::Energy, meter, "total", total));
        }

        let at = 13 + 8 * k;
        if let Some(realt) = bcd_counter(frame, at..at + 2) {
            updates.push(PropertyUpdate::new(DeviceKind::Energy, meter, "realt", realt));
        }
    }
    updates
}

/// Meter counters are BCD: the hex digits read as a decimal number.
fn bcd_counter(frame: &Frame, range: std::ops::Range<usize>) -> Option<PropertyValue> {
    let digits = hex::encode(frame.as_bytes().get(range)?);
    Some(match digits.parse::<u64>() {
        Ok(n) => PropertyValue::Number(n as f64),
        Err(_) => PropertyValue::Hex(digits),
    })
}

fn scale(value: PropertyValue, divisor: f64, one_decimal: bool) -> PropertyValue {
    match value {
        PropertyValue::Number(n) if one_decimal => PropertyValue::Number((n / (divisor / 10.0)).round() / 10.0),
        PropertyValue::Number(n) => PropertyValue::Number(n / divisor),
        other => other,
    }
}
