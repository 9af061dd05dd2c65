//! ---
//! skylink_section: "02-messaging-ipc-data-model"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Message schema helpers and protocol codecs."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! MAVLink v1/v2 frame parsing and construction.
//!
//! ```text
//! v1: 0xFE len seq sysid compid msgid                       payload crc16
//! v2: 0xFD len incompat compat seq sysid compid msgid[3]    payload crc16 [signature(13)]
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::crc::frame_checksum;
use crate::messages::{MessageKind, RawMessage};
use crate::DecodeError;

pub const MAGIC_V1: u8 = 0xFE;
pub const MAGIC_V2: u8 = 0xFD;

const HEADER_LEN_V1: usize = 6;
const HEADER_LEN_V2: usize = 10;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

/// Smallest buffer that can hold a complete frame (empty v1 payload).
pub const MIN_FRAME_LEN: usize = HEADER_LEN_V1 + CHECKSUM_LEN;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WireVersion {
    V1,
    #[default]
    V2,
}

impl std::str::FromStr for WireVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "v1" | "1" => Ok(WireVersion::V1),
            "v2" | "2" => Ok(WireVersion::V2),
            other => Err(format!("unknown protocol version: {}", other)),
        }
    }
}

impl WireVersion {
    pub fn magic(&self) -> u8 {
        match self {
            WireVersion::V1 => MAGIC_V1,
            WireVersion::V2 => MAGIC_V2,
        }
    }

    fn from_magic(byte: u8) -> Option<Self> {
        match byte {
            MAGIC_V1 => Some(WireVersion::V1),
            MAGIC_V2 => Some(WireVersion::V2),
            _ => None,
        }
    }
}

/// Routing header carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub version: WireVersion,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message_id: u32,
}

/// A decoded frame: header plus typed message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Packet {
    pub header: FrameHeader,
    pub message: RawMessage,
}

/// Outcome of parsing the frame at the start of a buffer.
struct Parsed {
    result: Result<Packet, DecodeError>,
    consumed: usize,
}

/// Decode the frame starting at byte 0 of `bytes`.
///
/// Bytes after the frame are ignored; use [`decode_datagram`] to walk every frame in a
/// datagram.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    parse_frame(bytes).result
}

fn parse_frame(bytes: &[u8]) -> Parsed {
    let Some(&magic) = bytes.first() else {
        return Parsed {
            result: Err(DecodeError::Truncated { needed: MIN_FRAME_LEN, available: 0 }),
            consumed: 0,
        };
    };
    let Some(version) = WireVersion::from_magic(magic) else {
        let skipped = next_magic(bytes, 1).unwrap_or(bytes.len());
        return Parsed { result: Err(DecodeError::BadMagic { skipped }), consumed: skipped };
    };

    let header_len = match version {
        WireVersion::V1 => HEADER_LEN_V1,
        WireVersion::V2 => HEADER_LEN_V2,
    };
    if bytes.len() < header_len + CHECKSUM_LEN {
        return truncated(header_len + CHECKSUM_LEN, bytes.len());
    }

    let payload_len = usize::from(bytes[1]);
    let (header, incompat) = match version {
        WireVersion::V1 => (
            FrameHeader {
                version,
                sequence: bytes[2],
                system_id: bytes[3],
                component_id: bytes[4],
                message_id: u32::from(bytes[5]),
            },
            0,
        ),
        WireVersion::V2 => (
            FrameHeader {
                version,
                sequence: bytes[4],
                system_id: bytes[5],
                component_id: bytes[6],
                message_id: u32::from_le_bytes([bytes[7], bytes[8], bytes[9], 0]),
            },
            bytes[2],
        ),
    };

    let signature_len = if incompat & INCOMPAT_FLAG_SIGNED != 0 { SIGNATURE_LEN } else { 0 };
    let frame_len = header_len + payload_len + CHECKSUM_LEN + signature_len;
    if bytes.len() < frame_len {
        return truncated(frame_len, bytes.len());
    }

    let result = check_frame(&bytes[..frame_len], header, header_len, payload_len, incompat);
    Parsed { result, consumed: frame_len }
}

fn check_frame(
    frame: &[u8],
    header: FrameHeader,
    header_len: usize,
    payload_len: usize,
    incompat: u8,
) -> Result<Packet, DecodeError> {
    if incompat & !INCOMPAT_FLAG_SIGNED != 0 {
        return Err(DecodeError::IncompatFlags(incompat));
    }
    let message_id = header.message_id;
    let kind = MessageKind::from_id(message_id).ok_or(DecodeError::Unsupported { message_id })?;

    let payload_end = header_len + payload_len;
    let expected = frame_checksum(&frame[1..payload_end], kind.crc_extra());
    let actual = u16::from_le_bytes([frame[payload_end], frame[payload_end + 1]]);
    if expected != actual {
        return Err(DecodeError::Checksum { message_id, expected, actual });
    }

    let message = RawMessage::decode_payload(
        message_id,
        &frame[header_len..payload_end],
        header.version == WireVersion::V2,
    )?;
    Ok(Packet { header, message })
}

fn truncated(needed: usize, available: usize) -> Parsed {
    Parsed {
        result: Err(DecodeError::Truncated { needed, available }),
        consumed: available,
    }
}

fn next_magic(bytes: &[u8], from: usize) -> Option<usize> {
    bytes
        .iter()
        .skip(from)
        .position(|byte| WireVersion::from_magic(*byte).is_some())
        .map(|offset| offset + from)
}

/// Walk every frame in `bytes`, resynchronising on the next start marker after garbage.
///
/// Each well-formed but rejected frame (checksum, unsupported id) yields one error and is
/// skipped whole. A truncated tail yields one error and ends iteration.
pub fn decode_datagram(bytes: &[u8]) -> Frames<'_> {
    Frames { remaining: bytes }
}

/// Iterator returned by [`decode_datagram`].
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    remaining: &'a [u8],
}

impl Iterator for Frames<'_> {
    type Item = Result<Packet, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let parsed = parse_frame(self.remaining);
        let consumed = parsed.consumed.clamp(1, self.remaining.len());
        self.remaining = &self.remaining[consumed..];
        Some(parsed.result)
    }
}

/// Builds outgoing frames for a single sender identity.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    version: WireVersion,
    system_id: u8,
    component_id: u8,
    sequence: u8,
}

impl FrameEncoder {
    pub fn new(version: WireVersion, system_id: u8, component_id: u8) -> Self {
        Self { version, system_id, component_id, sequence: 0 }
    }

    pub fn version(&self) -> WireVersion {
        self.version
    }

    /// Sequence number the next frame will carry.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Encode `message` and advance the sequence counter (wrapping at 255).
    pub fn encode(&mut self, message: &RawMessage) -> Bytes {
        let frame = encode_frame(
            self.version,
            self.sequence,
            self.system_id,
            self.component_id,
            message,
        );
        self.sequence = self.sequence.wrapping_add(1);
        frame
    }
}

/// Encode a single frame. MAVLink 2 payloads have trailing zero bytes removed, keeping
/// at least one byte.
pub fn encode_frame(
    version: WireVersion,
    sequence: u8,
    system_id: u8,
    component_id: u8,
    message: &RawMessage,
) -> Bytes {
    let kind = message.kind();
    let mut payload = BytesMut::with_capacity(kind.payload_len());
    message.write_payload(&mut payload);
    if version == WireVersion::V2 {
        let used = payload.iter().rposition(|byte| *byte != 0).map_or(1, |idx| idx + 1);
        payload.truncate(used);
    }

    let mut out = BytesMut::with_capacity(HEADER_LEN_V2 + payload.len() + CHECKSUM_LEN);
    out.put_u8(version.magic());
    // Payload lengths of the supported messages are well under 255.
    out.put_u8(payload.len() as u8);
    match version {
        WireVersion::V1 => {
            out.put_u8(sequence);
            out.put_u8(system_id);
            out.put_u8(component_id);
            out.put_u8(kind.id() as u8);
        }
        WireVersion::V2 => {
            out.put_u8(0);
            out.put_u8(0);
            out.put_u8(sequence);
            out.put_u8(system_id);
            out.put_u8(component_id);
            out.put_slice(&kind.id().to_le_bytes()[..3]);
        }
    }
    out.put_slice(&payload);
    let crc = frame_checksum(&out[1..], kind.crc_extra());
    out.put_u16_le(crc);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Attitude, GlobalPosition, Heartbeat, SystemStatus};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn heartbeat() -> RawMessage {
        RawMessage::Heartbeat(Heartbeat {
            custom_mode: 0,
            mav_type: 2,
            autopilot: 3,
            base_mode: 81,
            system_status: 4,
            mavlink_version: 3,
        })
    }

    fn attitude() -> RawMessage {
        RawMessage::Attitude(Attitude {
            time_boot_ms: 1_234,
            roll: 0.1,
            pitch: -0.05,
            yaw: 1.57,
            ..Attitude::default()
        })
    }

    #[test]
    fn v1_heartbeat_layout() {
        let frame = encode_frame(WireVersion::V1, 7, 1, 1, &heartbeat());
        assert_eq!(frame.len(), HEADER_LEN_V1 + 9 + CHECKSUM_LEN);
        assert_eq!(&frame[..6], &[MAGIC_V1, 9, 7, 1, 1, 0]);

        let packet = decode(&frame).unwrap();
        assert_eq!(packet.header.sequence, 7);
        assert_eq!(packet.header.version, WireVersion::V1);
        assert_eq!(packet.message, heartbeat());
    }

    #[test]
    fn v2_truncates_trailing_zeros_and_decodes_back() {
        let status = RawMessage::SystemStatus(SystemStatus {
            sensors_present: 1,
            sensors_enabled: 0,
            sensors_health: 0,
            load: 0,
            voltage_battery: 0,
            current_battery: 0,
            drop_rate_comm: 0,
            errors_comm: 0,
            errors_count: [0; 4],
            battery_remaining: 0,
        });
        let frame = encode_frame(WireVersion::V2, 0, 1, 1, &status);
        assert_eq!(frame[1], 1, "payload should shrink to the last non-zero byte");
        assert_eq!(decode(&frame).unwrap().message, status);
    }

    #[test]
    fn all_zero_payload_keeps_one_byte() {
        let frame = encode_frame(WireVersion::V2, 0, 1, 1, &RawMessage::Attitude(Attitude::default()));
        assert_eq!(frame[1], 1);
        assert_eq!(decode(&frame).unwrap().message, RawMessage::Attitude(Attitude::default()));
    }

    #[test]
    fn v2_message_id_is_24_bit_little_endian() {
        let frame = encode_frame(
            WireVersion::V2,
            0,
            1,
            1,
            &RawMessage::GlobalPosition(GlobalPosition::default()),
        );
        assert_eq!(&frame[7..10], &[33, 0, 0]);
    }

    #[test]
    fn signed_frames_skip_the_signature() {
        let mut frame = BytesMut::from(&encode_frame(WireVersion::V2, 3, 1, 1, &attitude())[..]);
        frame[2] = INCOMPAT_FLAG_SIGNED;
        // The incompat byte is covered by the checksum.
        let payload_end = frame.len() - CHECKSUM_LEN;
        let crc = frame_checksum(&frame[1..payload_end], 39);
        frame[payload_end..].copy_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&[0x55; SIGNATURE_LEN]);
        frame.extend_from_slice(&encode_frame(WireVersion::V2, 4, 1, 1, &heartbeat()));

        let packets: Vec<_> = decode_datagram(&frame).collect::<Result<_, _>>().unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].message, attitude());
        assert_eq!(packets[1].message, heartbeat());
    }

    #[test]
    fn unknown_incompat_flags_are_rejected() {
        let mut frame = BytesMut::from(&encode_frame(WireVersion::V2, 0, 1, 1, &attitude())[..]);
        frame[2] = 0x02;
        assert_eq!(decode(&frame), Err(DecodeError::IncompatFlags(0x02)));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut frame = BytesMut::from(&encode_frame(WireVersion::V1, 0, 1, 1, &attitude())[..]);
        frame[10] ^= 0xFF;
        assert!(matches!(decode(&frame), Err(DecodeError::Checksum { message_id: 30, .. })));
    }

    #[test]
    fn truncated_frames_report_needed_length() {
        let frame = encode_frame(WireVersion::V1, 0, 1, 1, &attitude());
        let short = &frame[..frame.len() - 1];
        assert_eq!(
            decode(short),
            Err(DecodeError::Truncated { needed: frame.len(), available: frame.len() - 1 })
        );
        assert!(matches!(decode(&[]), Err(DecodeError::Truncated { available: 0, .. })));
    }

    #[test]
    fn unknown_message_ids_are_skipped_whole() {
        let mut datagram = BytesMut::new();
        // A well-framed v1 message with id 74 (VFR_HUD) and a nonsense checksum.
        datagram.extend_from_slice(&[MAGIC_V1, 2, 0, 1, 1, 74, 0xAA, 0xBB, 0x00, 0x00]);
        datagram.extend_from_slice(&encode_frame(WireVersion::V1, 1, 1, 1, &heartbeat()));

        let results: Vec<_> = decode_datagram(&datagram).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(DecodeError::Unsupported { message_id: 74 }));
        assert!(results[0].as_ref().unwrap_err().is_silent());
        assert_eq!(results[1].as_ref().unwrap().message, heartbeat());
    }

    #[test]
    fn garbage_prefix_resynchronises() {
        let mut datagram = BytesMut::from(&[0x00u8, 0x11, 0x22][..]);
        datagram.extend_from_slice(&encode_frame(WireVersion::V2, 9, 1, 1, &attitude()));

        let results: Vec<_> = decode_datagram(&datagram).collect();
        assert_eq!(results[0], Err(DecodeError::BadMagic { skipped: 3 }));
        assert_eq!(results[1].as_ref().unwrap().header.sequence, 9);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn encoder_sequence_wraps() {
        let mut encoder = FrameEncoder::new(WireVersion::V2, 42, 200);
        for _ in 0..255 {
            encoder.encode(&heartbeat());
        }
        assert_eq!(encoder.sequence(), 255);
        let last = encoder.encode(&heartbeat());
        assert_eq!(encoder.sequence(), 0);

        let packet = decode(&last).unwrap();
        assert_eq!(packet.header.sequence, 255);
        assert_eq!(packet.header.system_id, 42);
        assert_eq!(packet.header.component_id, 200);
    }

    #[test]
    fn random_bytes_never_panic() {
        let mut rng = StdRng::seed_from_u64(0xC0DE);
        let valid = encode_frame(WireVersion::V2, 0, 1, 1, &attitude());
        for round in 0..2_000 {
            let len = rng.gen_range(0..96);
            let mut buf: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            if round % 3 == 0 && !buf.is_empty() {
                buf[0] = if rng.gen() { MAGIC_V1 } else { MAGIC_V2 };
            }
            if round % 5 == 0 {
                buf.extend_from_slice(&valid);
            }
            let _ = decode(&buf);
            let frames = decode_datagram(&buf).count();
            assert!(frames <= buf.len());
        }
    }
}
