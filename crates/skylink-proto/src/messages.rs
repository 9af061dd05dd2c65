//! ---
//! skylink_section: "02-messaging-ipc-data-model"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Message schema helpers and protocol codecs."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! Payload layouts for the MAVLink common-dialect messages the bridge consumes.
//!
//! Fields are listed in wire order (MAVLink sorts by type size), which differs from the
//! order in the XML definitions.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use strum::{AsRefStr, Display};

use crate::DecodeError;

/// Sentinel for `GLOBAL_POSITION_INT.hdg` when the heading is unknown.
pub const HEADING_UNKNOWN: u16 = u16::MAX;
/// Sentinel for `SYS_STATUS.voltage_battery` when the voltage is unknown.
pub const VOLTAGE_UNKNOWN: u16 = u16::MAX;
/// Sentinel for `SYS_STATUS.current_battery` when the current is not measured.
pub const CURRENT_UNKNOWN: i16 = -1;
/// Sentinel for `SYS_STATUS.battery_remaining` when the charge is unknown.
pub const BATTERY_REMAINING_UNKNOWN: i8 = -1;

/// Static description of a message payload.
pub trait MessageLayout: Sized {
    const ID: u32;
    const CRC_EXTRA: u8;
    /// Length of the base (non-extension) payload in bytes.
    const LEN: usize;

    /// Read from a buffer holding at least `LEN` bytes.
    fn read(buf: &mut &[u8]) -> Self;

    fn write(&self, out: &mut BytesMut);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl MessageLayout for Heartbeat {
    const ID: u32 = 0;
    const CRC_EXTRA: u8 = 50;
    const LEN: usize = 9;

    fn read(buf: &mut &[u8]) -> Self {
        Self {
            custom_mode: buf.get_u32_le(),
            mav_type: buf.get_u8(),
            autopilot: buf.get_u8(),
            base_mode: buf.get_u8(),
            system_status: buf.get_u8(),
            mavlink_version: buf.get_u8(),
        }
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u32_le(self.custom_mode);
        out.put_u8(self.mav_type);
        out.put_u8(self.autopilot);
        out.put_u8(self.base_mode);
        out.put_u8(self.system_status);
        out.put_u8(self.mavlink_version);
    }
}

/// `SYS_STATUS`: onboard sensor health and the primary battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemStatus {
    pub sensors_present: u32,
    pub sensors_enabled: u32,
    pub sensors_health: u32,
    pub load: u16,
    /// Millivolts, [`VOLTAGE_UNKNOWN`] when not reported.
    pub voltage_battery: u16,
    /// Centiamps, [`CURRENT_UNKNOWN`] when not measured.
    pub current_battery: i16,
    pub drop_rate_comm: u16,
    pub errors_comm: u16,
    pub errors_count: [u16; 4],
    /// Percent, [`BATTERY_REMAINING_UNKNOWN`] when not reported.
    pub battery_remaining: i8,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            sensors_present: 0,
            sensors_enabled: 0,
            sensors_health: 0,
            load: 0,
            voltage_battery: VOLTAGE_UNKNOWN,
            current_battery: CURRENT_UNKNOWN,
            drop_rate_comm: 0,
            errors_comm: 0,
            errors_count: [0; 4],
            battery_remaining: BATTERY_REMAINING_UNKNOWN,
        }
    }
}

impl MessageLayout for SystemStatus {
    const ID: u32 = 1;
    const CRC_EXTRA: u8 = 124;
    const LEN: usize = 31;

    fn read(buf: &mut &[u8]) -> Self {
        let sensors_present = buf.get_u32_le();
        let sensors_enabled = buf.get_u32_le();
        let sensors_health = buf.get_u32_le();
        let load = buf.get_u16_le();
        let voltage_battery = buf.get_u16_le();
        let current_battery = buf.get_i16_le();
        let drop_rate_comm = buf.get_u16_le();
        let errors_comm = buf.get_u16_le();
        let mut errors_count = [0u16; 4];
        for slot in errors_count.iter_mut() {
            *slot = buf.get_u16_le();
        }
        Self {
            sensors_present,
            sensors_enabled,
            sensors_health,
            load,
            voltage_battery,
            current_battery,
            drop_rate_comm,
            errors_comm,
            errors_count,
            battery_remaining: buf.get_i8(),
        }
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u32_le(self.sensors_present);
        out.put_u32_le(self.sensors_enabled);
        out.put_u32_le(self.sensors_health);
        out.put_u16_le(self.load);
        out.put_u16_le(self.voltage_battery);
        out.put_i16_le(self.current_battery);
        out.put_u16_le(self.drop_rate_comm);
        out.put_u16_le(self.errors_comm);
        for count in self.errors_count {
            out.put_u16_le(count);
        }
        out.put_i8(self.battery_remaining);
    }
}

/// `ATTITUDE`: body orientation in radians and body rates in rad/s.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attitude {
    pub time_boot_ms: u32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub rollspeed: f32,
    pub pitchspeed: f32,
    pub yawspeed: f32,
}

impl MessageLayout for Attitude {
    const ID: u32 = 30;
    const CRC_EXTRA: u8 = 39;
    const LEN: usize = 28;

    fn read(buf: &mut &[u8]) -> Self {
        Self {
            time_boot_ms: buf.get_u32_le(),
            roll: buf.get_f32_le(),
            pitch: buf.get_f32_le(),
            yaw: buf.get_f32_le(),
            rollspeed: buf.get_f32_le(),
            pitchspeed: buf.get_f32_le(),
            yawspeed: buf.get_f32_le(),
        }
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u32_le(self.time_boot_ms);
        out.put_f32_le(self.roll);
        out.put_f32_le(self.pitch);
        out.put_f32_le(self.yaw);
        out.put_f32_le(self.rollspeed);
        out.put_f32_le(self.pitchspeed);
        out.put_f32_le(self.yawspeed);
    }
}

/// `GLOBAL_POSITION_INT`: fused position in fixed-point units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalPosition {
    pub time_boot_ms: u32,
    /// Degrees * 1e7.
    pub lat: i32,
    /// Degrees * 1e7.
    pub lon: i32,
    /// Millimeters above MSL.
    pub alt: i32,
    /// Millimeters above home.
    pub relative_alt: i32,
    /// Centimeters per second, north.
    pub vx: i16,
    /// Centimeters per second, east.
    pub vy: i16,
    /// Centimeters per second, down.
    pub vz: i16,
    /// Centidegrees, [`HEADING_UNKNOWN`] when not available.
    pub hdg: u16,
}

impl Default for GlobalPosition {
    fn default() -> Self {
        Self {
            time_boot_ms: 0,
            lat: 0,
            lon: 0,
            alt: 0,
            relative_alt: 0,
            vx: 0,
            vy: 0,
            vz: 0,
            hdg: HEADING_UNKNOWN,
        }
    }
}

impl MessageLayout for GlobalPosition {
    const ID: u32 = 33;
    const CRC_EXTRA: u8 = 104;
    const LEN: usize = 28;

    fn read(buf: &mut &[u8]) -> Self {
        Self {
            time_boot_ms: buf.get_u32_le(),
            lat: buf.get_i32_le(),
            lon: buf.get_i32_le(),
            alt: buf.get_i32_le(),
            relative_alt: buf.get_i32_le(),
            vx: buf.get_i16_le(),
            vy: buf.get_i16_le(),
            vz: buf.get_i16_le(),
            hdg: buf.get_u16_le(),
        }
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u32_le(self.time_boot_ms);
        out.put_i32_le(self.lat);
        out.put_i32_le(self.lon);
        out.put_i32_le(self.alt);
        out.put_i32_le(self.relative_alt);
        out.put_i16_le(self.vx);
        out.put_i16_le(self.vy);
        out.put_i16_le(self.vz);
        out.put_u16_le(self.hdg);
    }
}

/// Message kinds understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    Heartbeat,
    SystemStatus,
    Attitude,
    GlobalPosition,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Heartbeat,
        MessageKind::SystemStatus,
        MessageKind::Attitude,
        MessageKind::GlobalPosition,
    ];

    pub fn from_id(message_id: u32) -> Option<Self> {
        match message_id {
            Heartbeat::ID => Some(MessageKind::Heartbeat),
            SystemStatus::ID => Some(MessageKind::SystemStatus),
            Attitude::ID => Some(MessageKind::Attitude),
            GlobalPosition::ID => Some(MessageKind::GlobalPosition),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            MessageKind::Heartbeat => Heartbeat::ID,
            MessageKind::SystemStatus => SystemStatus::ID,
            MessageKind::Attitude => Attitude::ID,
            MessageKind::GlobalPosition => GlobalPosition::ID,
        }
    }

    pub fn crc_extra(&self) -> u8 {
        match self {
            MessageKind::Heartbeat => Heartbeat::CRC_EXTRA,
            MessageKind::SystemStatus => SystemStatus::CRC_EXTRA,
            MessageKind::Attitude => Attitude::CRC_EXTRA,
            MessageKind::GlobalPosition => GlobalPosition::CRC_EXTRA,
        }
    }

    pub fn payload_len(&self) -> usize {
        match self {
            MessageKind::Heartbeat => Heartbeat::LEN,
            MessageKind::SystemStatus => SystemStatus::LEN,
            MessageKind::Attitude => Attitude::LEN,
            MessageKind::GlobalPosition => GlobalPosition::LEN,
        }
    }
}

/// A decoded message of one of the supported kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawMessage {
    Heartbeat(Heartbeat),
    SystemStatus(SystemStatus),
    Attitude(Attitude),
    GlobalPosition(GlobalPosition),
}

impl RawMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            RawMessage::Heartbeat(_) => MessageKind::Heartbeat,
            RawMessage::SystemStatus(_) => MessageKind::SystemStatus,
            RawMessage::Attitude(_) => MessageKind::Attitude,
            RawMessage::GlobalPosition(_) => MessageKind::GlobalPosition,
        }
    }

    /// Decode a payload for `message_id`.
    ///
    /// With `zero_extend` set (MAVLink 2) a short payload had its trailing zeros
    /// stripped by the sender and is padded back; otherwise a short payload is malformed.
    pub fn decode_payload(
        message_id: u32,
        payload: &[u8],
        zero_extend: bool,
    ) -> Result<Self, DecodeError> {
        let kind = MessageKind::from_id(message_id).ok_or(DecodeError::Unsupported { message_id })?;
        let required = kind.payload_len();
        if payload.len() < required && !zero_extend {
            return Err(DecodeError::PayloadTooShort {
                message_id,
                len: payload.len(),
                required,
            });
        }

        let mut padded = [0u8; 255];
        let take = payload.len().min(required);
        padded[..take].copy_from_slice(&payload[..take]);
        let mut buf = &padded[..required];

        Ok(match kind {
            MessageKind::Heartbeat => RawMessage::Heartbeat(Heartbeat::read(&mut buf)),
            MessageKind::SystemStatus => RawMessage::SystemStatus(SystemStatus::read(&mut buf)),
            MessageKind::Attitude => RawMessage::Attitude(Attitude::read(&mut buf)),
            MessageKind::GlobalPosition => {
                RawMessage::GlobalPosition(GlobalPosition::read(&mut buf))
            }
        })
    }

    /// Serialise the full, untruncated payload.
    pub fn write_payload(&self, out: &mut BytesMut) {
        match self {
            RawMessage::Heartbeat(msg) => msg.write(out),
            RawMessage::SystemStatus(msg) => msg.write(out),
            RawMessage::Attitude(msg) => msg.write(out),
            RawMessage::GlobalPosition(msg) => msg.write(out),
        }
    }
}

impl From<Heartbeat> for RawMessage {
    fn from(value: Heartbeat) -> Self {
        RawMessage::Heartbeat(value)
    }
}

impl From<SystemStatus> for RawMessage {
    fn from(value: SystemStatus) -> Self {
        RawMessage::SystemStatus(value)
    }
}

impl From<Attitude> for RawMessage {
    fn from(value: Attitude) -> Self {
        RawMessage::Attitude(value)
    }
}

impl From<GlobalPosition> for RawMessage {
    fn from(value: GlobalPosition) -> Self {
        RawMessage::GlobalPosition(value)
    }
}
