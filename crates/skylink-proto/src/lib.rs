//! ---
//! skylink_section: "02-messaging-ipc-data-model"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Message schema helpers and protocol codecs."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! MAVLink wire codec for the subset of the common dialect SkyLink consumes:
//! `HEARTBEAT`, `SYS_STATUS`, `ATTITUDE` and `GLOBAL_POSITION_INT`.

pub mod crc;
pub mod frame;
pub mod messages;

use thiserror::Error;

pub use crc::{frame_checksum, Crc16};
pub use frame::{
    decode, decode_datagram, encode_frame, FrameEncoder, FrameHeader, Frames, Packet, WireVersion,
    MAGIC_V1, MAGIC_V2, MIN_FRAME_LEN,
};
pub use messages::{
    Attitude, GlobalPosition, Heartbeat, MessageKind, MessageLayout, RawMessage, SystemStatus,
    BATTERY_REMAINING_UNKNOWN, CURRENT_UNKNOWN, HEADING_UNKNOWN, VOLTAGE_UNKNOWN,
};

/// Reasons a buffer could not be turned into a [`Packet`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("no frame start marker in {skipped} leading bytes")]
    BadMagic { skipped: usize },
    #[error("checksum mismatch on message {message_id}: expected {expected:#06x}, got {actual:#06x}")]
    Checksum {
        message_id: u32,
        expected: u16,
        actual: u16,
    },
    #[error("unsupported incompatibility flags {0:#04x}")]
    IncompatFlags(u8),
    #[error("message {message_id} payload is {len} bytes, need {required}")]
    PayloadTooShort {
        message_id: u32,
        len: usize,
        required: usize,
    },
    #[error("message {message_id} is not handled")]
    Unsupported { message_id: u32 },
}

impl DecodeError {
    /// Errors that describe valid traffic the bridge simply does not use. These are
    /// dropped without counting against link health.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            DecodeError::Unsupported { .. } | DecodeError::PayloadTooShort { .. }
        )
    }

    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Truncated { .. } => "truncated",
            DecodeError::BadMagic { .. } => "bad_magic",
            DecodeError::Checksum { .. } => "checksum",
            DecodeError::IncompatFlags(_) => "incompat_flags",
            DecodeError::PayloadTooShort { .. } => "payload_too_short",
            DecodeError::Unsupported { .. } => "unsupported",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unused_traffic_is_silent() {
        assert!(DecodeError::Unsupported { message_id: 74 }.is_silent());
        assert!(DecodeError::PayloadTooShort { message_id: 1, len: 3, required: 31 }.is_silent());
        assert!(!DecodeError::BadMagic { skipped: 4 }.is_silent());
        assert!(!DecodeError::Checksum { message_id: 0, expected: 1, actual: 2 }.is_silent());
        assert!(!DecodeError::Truncated { needed: 8, available: 2 }.is_silent());
    }

    #[test]
    fn error_messages_are_readable() {
        let err = DecodeError::Checksum { message_id: 30, expected: 0x1234, actual: 0x00ff };
        assert_eq!(
            err.to_string(),
            "checksum mismatch on message 30: expected 0x1234, got 0x00ff"
        );
        assert_eq!(err.kind(), "checksum");
    }
}
