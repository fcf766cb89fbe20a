//! Bus frames and fixed-width relay records
//!
//! A [`BusFrame`] is what the bus controller hands us: an identifier and up to
//! eight data bytes. A [`RelayRecord`] is what goes out over the wireless
//! transport: the same identifier and length, but always eight payload slots.
//!
//! # Relay record wire layout
//!
//! The record mirrors the C struct `{ u32 identifier; u8 dlc; u8 data[8]; }`
//! that existing receivers decode, including its tail padding:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 4    | identifier (little-endian) |
//! | 4      | 1    | data length code |
//! | 5      | 8    | payload slots |
//! | 13     | 3    | zero padding |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Maximum number of data bytes in a classic bus frame
pub const MAX_DATA_LEN: usize = 8;

/// Largest standard (11-bit) identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Largest extended (29-bit) identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Encoded size of a relay record, padding included
pub const RELAY_RECORD_SIZE: usize = 16;

/// Bytes of a relay record that carry data (the rest is padding)
const RELAY_RECORD_PACKED_SIZE: usize = 13;

/// A single frame received from the field bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusFrame {
    /// Frame identifier
    pub identifier: u32,
    /// Whether the identifier uses the 29-bit format
    pub extended: bool,
    /// Data length code as reported by the controller
    pub data_length: u8,
    /// Raw payload slots; only `[0, data_length)` are meaningful
    pub data: [u8; MAX_DATA_LEN],
}

impl BusFrame {
    /// Build a frame from an identifier and payload slice
    pub fn new(identifier: u32, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_DATA_LEN {
            return Err(CoreError::PayloadTooLong {
                len: payload.len(),
                max: MAX_DATA_LEN,
            });
        }
        if identifier > MAX_EXTENDED_ID {
            return Err(CoreError::IdentifierOutOfRange(identifier));
        }

        let mut data = [0u8; MAX_DATA_LEN];
        data[..payload.len()].copy_from_slice(payload);

        Ok(Self {
            identifier,
            extended: identifier > MAX_STANDARD_ID,
            data_length: payload.len() as u8,
            data,
        })
    }

    /// Build a frame exactly as a driver reports it, without validation
    ///
    /// Controllers may report a data length code above 8 (classic CAN allows
    /// codes up to 15, all meaning eight bytes). Consumers clamp.
    pub fn from_raw(identifier: u32, extended: bool, data_length: u8, data: [u8; 8]) -> Self {
        Self {
            identifier,
            extended,
            data_length,
            data,
        }
    }

    /// Number of meaningful payload bytes, clamped to the bus maximum
    pub fn len(&self) -> usize {
        (self.data_length as usize).min(MAX_DATA_LEN)
    }

    /// Check if the frame carries no data
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The meaningful payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Payload rendered as space-separated uppercase hex, for logging
    pub fn payload_hex(&self) -> String {
        self.payload()
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Renders the frame in candump compact form (`123#DEADBEEF`)
impl fmt::Display for BusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "{:08X}#", self.identifier)?;
        } else {
            write!(f, "{:03X}#", self.identifier)?;
        }
        write!(f, "{}", hex::encode_upper(self.payload()))
    }
}

/// Parses candump compact form (`123#DEADBEEF`, `1ABCDE00#01.02`)
///
/// Three hex digits denote a standard identifier, eight an extended one.
/// Remote-request frames (`123#R`) are not data and are rejected.
impl FromStr for BusFrame {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let (id_part, data_part) = s
            .trim()
            .split_once('#')
            .ok_or_else(|| CoreError::MalformedFrame(format!("missing '#' in '{}'", s)))?;

        let identifier = u32::from_str_radix(id_part, 16)
            .map_err(|e| CoreError::MalformedFrame(format!("identifier '{}': {}", id_part, e)))?;

        if data_part.starts_with('R') || data_part.starts_with('r') {
            return Err(CoreError::MalformedFrame(format!(
                "remote frame '{}' carries no data",
                s
            )));
        }

        let cleaned: String = data_part.chars().filter(|c| *c != '.').collect();
        let payload = hex::decode(&cleaned)
            .map_err(|e| CoreError::MalformedFrame(format!("payload '{}': {}", data_part, e)))?;

        let mut frame = BusFrame::new(identifier, &payload)?;
        frame.extended = id_part.len() > 3 || identifier > MAX_STANDARD_ID;
        Ok(frame)
    }
}

/// Fixed-width record relayed over the wireless transport
///
/// Invariant: slots `[data_length, 8)` are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRecord {
    /// Identifier copied from the source frame
    pub identifier: u32,
    /// Data length copied from the source frame
    pub data_length: u8,
    /// Payload slots
    pub data: [u8; MAX_DATA_LEN],
}

impl RelayRecord {
    /// Encode into the 16-byte wire layout
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RELAY_RECORD_SIZE);
        buf.put_u32_le(self.identifier);
        buf.put_u8(self.data_length);
        buf.put_slice(&self.data);
        buf.put_bytes(0, RELAY_RECORD_SIZE - RELAY_RECORD_PACKED_SIZE);
        buf.freeze()
    }

    /// Decode from the wire layout; trailing padding is optional
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < RELAY_RECORD_PACKED_SIZE {
            return Err(CoreError::InvalidRecord(format!(
                "record too short: {} bytes, need {}",
                data.len(),
                RELAY_RECORD_PACKED_SIZE
            )));
        }

        let mut buf = &data[..RELAY_RECORD_PACKED_SIZE];
        let identifier = buf.get_u32_le();
        let data_length = buf.get_u8();
        if data_length as usize > MAX_DATA_LEN {
            return Err(CoreError::InvalidRecord(format!(
                "data length {} exceeds {}",
                data_length, MAX_DATA_LEN
            )));
        }

        let mut slots = [0u8; MAX_DATA_LEN];
        buf.copy_to_slice(&mut slots);

        Ok(Self {
            identifier,
            data_length,
            data: slots,
        })
    }

    /// The meaningful payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.data_length as usize).min(MAX_DATA_LEN)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new_rejects_long_payload() {
        let err = BusFrame::new(0x100, &[0u8; 9]).unwrap_err();
        assert_eq!(err, CoreError::PayloadTooLong { len: 9, max: 8 });
    }

    #[test]
    fn test_frame_new_rejects_wide_identifier() {
        assert!(BusFrame::new(0x2000_0000, &[]).is_err());
    }

    #[test]
    fn test_frame_extended_flag() {
        assert!(!BusFrame::new(0x7FF, &[]).unwrap().extended);
        assert!(BusFrame::new(0x800, &[]).unwrap().extended);
    }

    #[test]
    fn test_raw_frame_clamps_length() {
        let frame = BusFrame::from_raw(0x10, false, 15, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frame.len(), 8);
        assert_eq!(frame.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_parse_candump_standard() {
        let frame: BusFrame = "123#DEADBEEF".parse().unwrap();
        assert_eq!(frame.identifier, 0x123);
        assert!(!frame.extended);
        assert_eq!(frame.payload(), &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(frame.to_string(), "123#DEADBEEF");
    }

    #[test]
    fn test_parse_candump_extended_with_dots() {
        let frame: BusFrame = "00000042#01.02.03".parse().unwrap();
        assert_eq!(frame.identifier, 0x42);
        assert!(frame.extended);
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(frame.to_string(), "00000042#010203");
    }

    #[test]
    fn test_parse_candump_empty_payload() {
        let frame: BusFrame = "000#".parse().unwrap();
        assert_eq!(frame.identifier, 0);
        assert!(frame.is_empty());
    }

    #[test]
    fn test_parse_candump_rejects_remote_and_garbage() {
        assert!("123#R".parse::<BusFrame>().is_err());
        assert!("nothing here".parse::<BusFrame>().is_err());
        assert!("XYZ#00".parse::<BusFrame>().is_err());
        assert!("123#001122334455667788".parse::<BusFrame>().is_err());
    }

    #[test]
    fn test_payload_hex() {
        let frame = BusFrame::new(0x5, &[0x0A, 0xFF]).unwrap();
        assert_eq!(frame.payload_hex(), "0A FF");
    }

    #[test]
    fn test_record_wire_layout() {
        let record = RelayRecord {
            identifier: 0x0102_0304,
            data_length: 3,
            data: [0xAA, 0xBB, 0xCC, 0, 0, 0, 0, 0],
        };
        let encoded = record.encode();
        assert_eq!(encoded.len(), RELAY_RECORD_SIZE);
        assert_eq!(&encoded[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(encoded[4], 3);
        assert_eq!(&encoded[5..8], &[0xAA, 0xBB, 0xCC]);
        assert!(encoded[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_record_decode_packed_and_padded() {
        let record = RelayRecord {
            identifier: 0x321,
            data_length: 8,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
        };
        let encoded = record.encode();
        assert_eq!(RelayRecord::decode(&encoded).unwrap(), record);
        assert_eq!(RelayRecord::decode(&encoded[..13]).unwrap(), record);
    }

    #[test]
    fn test_record_decode_rejects_bad_input() {
        assert!(RelayRecord::decode(&[0u8; 12]).is_err());

        let mut bad = [0u8; 16];
        bad[4] = 9;
        assert!(RelayRecord::decode(&bad).is_err());
    }
}
