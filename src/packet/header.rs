//! The fixed 24-byte packet header and its on-wire encoding.

use static_assertions::const_assert_eq;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{
    CLOCK_SKEW_FUTURE_WARN_NS, CLOCK_SKEW_STALE_WARN_NS, DEFAULT_MAX_PAYLOAD_SIZE,
    PACKET_HEADER_SIZE, RESERVED_MASK,
};
use crate::error::{Result, TelemetryError};

/// Bitset of header flags. Bits outside the defined set are `Reserved` and
/// cause validation to fail.
pub mod flags {
    pub use crate::constants::{
        FLAG_COMPRESSED as COMPRESSED, FLAG_ENCRYPTED as ENCRYPTED, FLAG_FRAGMENTED as FRAGMENTED,
        FLAG_NETWORK as NETWORK, FLAG_OFFLINE as OFFLINE, FLAG_PRIORITY as PRIORITY,
        FLAG_SIMULATION as SIMULATION, FLAG_TEST_DATA as TEST_DATA,
    };
}

/// The fixed 24-byte little-endian packet header described in the data
/// model: `id`, `sequence`, `timestamp_ns`, `payload_size`, `flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PacketHeader {
    pub id: u32,
    pub sequence: u32,
    pub timestamp_ns: u64,
    pub payload_size: u32,
    pub flags: u32,
}

const_assert_eq!(PACKET_HEADER_SIZE, 24);

/// Outcome of [`PacketHeader::validate`]: either `Ok`, with zero or more
/// non-fatal clock-skew warnings, or a hard validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSkewWarning {
    FutureTimestamp,
    StaleTimestamp,
}

impl PacketHeader {
    /// Build a header with the current timestamp and zero flags.
    pub fn new(id: u32, sequence: u32, payload_size: u32) -> Self {
        Self {
            id,
            sequence,
            timestamp_ns: now_ns(),
            payload_size,
            flags: 0,
        }
    }

    /// Encode into the fixed 24-byte little-endian wire layout.
    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut buf = [0u8; PACKET_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        buf[16..20].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    /// Decode from the first 24 bytes of `bytes`. Fails if fewer than 24
    /// bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(TelemetryError::invalid_header("fewer than 24 bytes available"));
        }
        let id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let sequence = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let timestamp_ns = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let payload_size = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        let flags = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        Ok(Self { id, sequence, timestamp_ns, payload_size, flags })
    }

    /// Validate structural invariants: no reserved flag bits, payload size
    /// within `max_payload_size`. Returns non-fatal clock-skew warnings
    /// rather than failing on them.
    pub fn validate(&self, max_payload_size: u32) -> Result<Vec<ClockSkewWarning>> {
        if self.flags & RESERVED_MASK != 0 {
            return Err(TelemetryError::invalid_header(format!(
                "reserved flag bits set: {:#x}",
                self.flags & RESERVED_MASK
            )));
        }
        if self.payload_size > max_payload_size {
            return Err(TelemetryError::invalid_header(format!(
                "payload_size {} exceeds max {}",
                self.payload_size, max_payload_size
            )));
        }

        let mut warnings = Vec::new();
        let now = now_ns();
        if self.timestamp_ns > now && self.timestamp_ns - now > CLOCK_SKEW_FUTURE_WARN_NS {
            warnings.push(ClockSkewWarning::FutureTimestamp);
        } else if now > self.timestamp_ns && now - self.timestamp_ns > CLOCK_SKEW_STALE_WARN_NS {
            warnings.push(ClockSkewWarning::StaleTimestamp);
        }
        Ok(warnings)
    }

    /// Validate using the default maximum payload size.
    pub fn validate_default(&self) -> Result<Vec<ClockSkewWarning>> {
        self.validate(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: u32) {
        self.flags &= !flag;
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as u64
}
