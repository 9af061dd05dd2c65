//! ---
//! skylink_section: "02-messaging-ipc-data-model"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Message schema helpers and protocol codecs."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! CRC-16/MCRF4XX as used by MAVLink (X.25 accumulation, no final xor).

const SEED: u16 = 0xFFFF;

/// Running checksum over a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    pub fn new() -> Self {
        Self { value: SEED }
    }

    pub fn accumulate(&mut self, byte: u8) {
        let mut tmp = byte ^ (self.value & 0xFF) as u8;
        tmp ^= tmp << 4;
        let tmp = u16::from(tmp);
        self.value = (self.value >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4);
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.accumulate(*byte);
        }
    }

    pub fn value(&self) -> u16 {
        self.value
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of `bytes` followed by the message's CRC_EXTRA seed.
pub fn frame_checksum(bytes: &[u8], crc_extra: u8) -> u16 {
    let mut crc = Crc16::new();
    crc.update(bytes);
    crc.accumulate(crc_extra);
    crc.value()
}
