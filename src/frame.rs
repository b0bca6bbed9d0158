//! DL/T 645 frame codec
//!
//! Building and parsing of protocol frames:
//!
//! ```text
//! FE FE FE FE 68 A0..A5 68 C L D0..D(L-1) CS 16
//! ```
//!
//! - `FE` preamble wakes the receiver's UART (added on send, optional on
//!   receive)
//! - `68` start markers bracket the 6-byte little-endian BCD address
//! - `C` control code; responses set 0x80, error responses also set 0x40
//! - `L` data-domain length, `D` the data domain (+0x33 per byte on the wire)
//! - `CS` modulo-256 sum from the first `68` through the last data byte
//!
//! [`Frame`] stores the data domain **decoded**; serialization applies the
//! +0x33 offset, deserialization removes it.

use std::fmt;

use tracing::debug;

use crate::constants::{
    ADDRESS_LEN, CTRL_BROADCAST_TIME_SYNC, CTRL_CHANGE_BAUD_RATE, CTRL_CHANGE_PASSWORD,
    CTRL_ERROR_FLAG, CTRL_FREEZE, CTRL_READ_ADDRESS, CTRL_READ_DATA, CTRL_RESPONSE_FLAG,
    CTRL_WRITE_ADDRESS, CTRL_WRITE_DATA, DATA_OFFSET, FRAME_END, FRAME_START, MAX_DATA_LEN,
    MIN_BYTES_AFTER_START, PREAMBLE_BYTE, PREAMBLE_LEN,
};
use crate::error::{Dlt645Error, Dlt645Result};
use crate::transform::bytes_to_hex_string;

/// Control codes defined by DL/T 645-2007.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    /// Broadcast time synchronization (0x08)
    BroadcastTimeSync,
    /// Read data (0x11)
    ReadData,
    /// Read communication address (0x13)
    ReadAddress,
    /// Write data (0x14)
    WriteData,
    /// Write communication address (0x15)
    WriteAddress,
    /// Freeze command (0x16)
    Freeze,
    /// Change baud rate (0x17)
    ChangeBaudRate,
    /// Change password (0x18)
    ChangePassword,
}

impl ControlCode {
    /// Convert to the protocol byte.
    pub fn to_u8(self) -> u8 {
        match self {
            ControlCode::BroadcastTimeSync => CTRL_BROADCAST_TIME_SYNC,
            ControlCode::ReadData => CTRL_READ_DATA,
            ControlCode::ReadAddress => CTRL_READ_ADDRESS,
            ControlCode::WriteData => CTRL_WRITE_DATA,
            ControlCode::WriteAddress => CTRL_WRITE_ADDRESS,
            ControlCode::Freeze => CTRL_FREEZE,
            ControlCode::ChangeBaudRate => CTRL_CHANGE_BAUD_RATE,
            ControlCode::ChangePassword => CTRL_CHANGE_PASSWORD,
        }
    }

    /// Parse a protocol byte, ignoring the response and error flags.
    pub fn from_u8(byte: u8) -> Dlt645Result<Self> {
        match byte & !(CTRL_RESPONSE_FLAG | CTRL_ERROR_FLAG) {
            CTRL_BROADCAST_TIME_SYNC => Ok(ControlCode::BroadcastTimeSync),
            CTRL_READ_DATA => Ok(ControlCode::ReadData),
            CTRL_READ_ADDRESS => Ok(ControlCode::ReadAddress),
            CTRL_WRITE_DATA => Ok(ControlCode::WriteData),
            CTRL_WRITE_ADDRESS => Ok(ControlCode::WriteAddress),
            CTRL_FREEZE => Ok(ControlCode::Freeze),
            CTRL_CHANGE_BAUD_RATE => Ok(ControlCode::ChangeBaudRate),
            CTRL_CHANGE_PASSWORD => Ok(ControlCode::ChangePassword),
            other => Err(Dlt645Error::protocol(format!(
                "Unknown control code: 0x{:02X}",
                other
            ))),
        }
    }

    /// Get human-readable control code description
    pub fn description(self) -> &'static str {
        match self {
            ControlCode::BroadcastTimeSync => "Broadcast Time Sync",
            ControlCode::ReadData => "Read Data",
            ControlCode::ReadAddress => "Read Address",
            ControlCode::WriteData => "Write Data",
            ControlCode::WriteAddress => "Write Address",
            ControlCode::Freeze => "Freeze",
            ControlCode::ChangeBaudRate => "Change Baud Rate",
            ControlCode::ChangePassword => "Change Password",
        }
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.to_u8())
    }
}

/// A single protocol frame with its data domain stored decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Device address, little-endian BCD digits.
    pub address: [u8; ADDRESS_LEN],
    /// Raw control byte, including response/error flags when present.
    pub control: u8,
    /// Decoded data domain (the on-wire bytes minus 0x33 each).
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a frame from its logical parts.
    pub fn new(address: [u8; ADDRESS_LEN], control: u8, data: Vec<u8>) -> Self {
        Self {
            address,
            control,
            data,
        }
    }

    /// Build a complete on-wire byte sequence in one step.
    pub fn build(
        address: [u8; ADDRESS_LEN],
        control: u8,
        data: &[u8],
    ) -> Dlt645Result<Vec<u8>> {
        Frame::new(address, control, data.to_vec()).serialize()
    }

    /// Serialize to on-wire bytes, applying the +0x33 data-domain offset and
    /// prepending the preamble.
    pub fn serialize(&self) -> Dlt645Result<Vec<u8>> {
        if self.data.len() > MAX_DATA_LEN {
            return Err(Dlt645Error::frame(format!(
                "Data domain too long: {} bytes (max {})",
                self.data.len(),
                MAX_DATA_LEN
            )));
        }

        let mut body = Vec::with_capacity(self.data.len() + 12);
        body.push(FRAME_START);
        body.extend_from_slice(&self.address);
        body.push(FRAME_START);
        body.push(self.control);
        body.push(self.data.len() as u8);
        body.extend(self.data.iter().map(|b| b.wrapping_add(DATA_OFFSET)));

        let checksum = checksum(&body);
        body.push(checksum);
        body.push(FRAME_END);

        let mut wire = Vec::with_capacity(PREAMBLE_LEN + body.len());
        wire.extend_from_slice(&[PREAMBLE_BYTE; PREAMBLE_LEN]);
        wire.extend_from_slice(&body);

        debug!(
            "Frame serialized: ctrl=0x{:02X}, data_len={}, total_len={}",
            self.control,
            self.data.len(),
            wire.len()
        );
        Ok(wire)
    }

    /// Parse a frame out of a raw byte buffer.
    ///
    /// Tolerates arbitrary leading noise (preamble bytes included) by
    /// scanning for the first start marker, and ignores trailing bytes
    /// beyond the end marker. The buffer must contain at least one whole
    /// frame; all failures surface as [`Dlt645Error::Frame`].
    pub fn deserialize(raw: &[u8]) -> Dlt645Result<Frame> {
        let start = raw
            .iter()
            .position(|&b| b == FRAME_START)
            .ok_or_else(|| Dlt645Error::frame("No start marker found"))?;

        if raw.len() < start + 1 + MIN_BYTES_AFTER_START {
            return Err(Dlt645Error::frame(format!(
                "Buffer truncated: {} bytes after start marker",
                raw.len() - start - 1
            )));
        }
        if raw[start + 7] != FRAME_START {
            return Err(Dlt645Error::frame("Missing second start marker"));
        }

        let control = raw[start + 8];
        let data_len = raw[start + 9] as usize;
        let data_start = start + 10;
        let checksum_pos = data_start + data_len;

        // Checksum byte and end marker must both fit in the buffer.
        if checksum_pos + 1 >= raw.len() {
            return Err(Dlt645Error::frame(format!(
                "Declared data length {} exceeds buffer",
                data_len
            )));
        }

        let expected = checksum(&raw[start..checksum_pos]);
        if expected != raw[checksum_pos] {
            return Err(Dlt645Error::frame(format!(
                "Checksum mismatch: calculated 0x{:02X}, received 0x{:02X}",
                expected, raw[checksum_pos]
            )));
        }
        if raw[checksum_pos + 1] != FRAME_END {
            return Err(Dlt645Error::frame("Missing end marker"));
        }

        let mut address = [0u8; ADDRESS_LEN];
        address.copy_from_slice(&raw[start + 1..start + 7]);

        let data: Vec<u8> = raw[data_start..checksum_pos]
            .iter()
            .map(|b| b.wrapping_sub(DATA_OFFSET))
            .collect();

        debug!(
            "Frame parsed: addr={}, ctrl=0x{:02X}, data_len={}",
            bytes_to_hex_string(&address),
            control,
            data.len()
        );

        Ok(Frame {
            address,
            control,
            data,
        })
    }

    /// Whether the response flag (0x80) is set.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.control & CTRL_RESPONSE_FLAG != 0
    }

    /// Whether the error flag (0x40) is set.
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.control & CTRL_ERROR_FLAG != 0
    }

    /// The control code with response/error flags stripped.
    pub fn control_code(&self) -> Dlt645Result<ControlCode> {
        ControlCode::from_u8(self.control)
    }
}

/// Modulo-256 sum over a byte slice.
#[inline]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: [u8; 6] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

    #[test]
    fn test_control_code_roundtrip() {
        for code in [
            ControlCode::BroadcastTimeSync,
            ControlCode::ReadData,
            ControlCode::ReadAddress,
            ControlCode::WriteData,
            ControlCode::WriteAddress,
            ControlCode::Freeze,
            ControlCode::ChangeBaudRate,
            ControlCode::ChangePassword,
        ] {
            assert_eq!(ControlCode::from_u8(code.to_u8()).unwrap(), code);
            // Flags are stripped before matching.
            assert_eq!(ControlCode::from_u8(code.to_u8() | 0x80).unwrap(), code);
            assert_eq!(ControlCode::from_u8(code.to_u8() | 0xC0).unwrap(), code);
        }
        assert!(ControlCode::from_u8(0x3F).is_err());
    }

    #[test]
    fn test_serialize_layout() {
        let wire = Frame::build(ADDR, CTRL_READ_DATA, &[0x00, 0x00, 0x01, 0x00]).unwrap();

        // Preamble
        assert_eq!(&wire[..4], &[0xFE, 0xFE, 0xFE, 0xFE]);
        assert_eq!(wire[4], FRAME_START);
        assert_eq!(&wire[5..11], &ADDR);
        assert_eq!(wire[11], FRAME_START);
        assert_eq!(wire[12], CTRL_READ_DATA);
        assert_eq!(wire[13], 4);
        // Data domain is +0x33 encoded on the wire.
        assert_eq!(&wire[14..18], &[0x33, 0x33, 0x34, 0x33]);
        assert_eq!(*wire.last().unwrap(), FRAME_END);

        // Checksum covers first start marker through last data byte.
        let expected = checksum(&wire[4..18]);
        assert_eq!(wire[18], expected);
    }

    #[test]
    fn test_roundtrip_various_lengths() {
        for len in [0usize, 1, 4, 12, 200, 255] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let frame = Frame::new(ADDR, CTRL_READ_DATA | 0x80, data);
            let wire = frame.serialize().unwrap();
            let parsed = Frame::deserialize(&wire).unwrap();
            assert_eq!(parsed, frame, "roundtrip failed for len {}", len);
        }
    }

    #[test]
    fn test_data_offset_wraps() {
        // 0xCD + 0x33 == 0x00 and 0xCC + 0x33 == 0xFF modulo 256.
        let frame = Frame::new(ADDR, CTRL_READ_DATA, vec![0xCD, 0xCC]);
        let wire = frame.serialize().unwrap();
        let data_start = 4 + 10;
        assert_eq!(&wire[data_start..data_start + 2], &[0x00, 0xFF]);
        assert_eq!(Frame::deserialize(&wire).unwrap().data, vec![0xCD, 0xCC]);
    }

    #[test]
    fn test_deserialize_with_heavy_preamble() {
        let wire = Frame::build(ADDR, CTRL_READ_DATA, &[0x12]).unwrap();
        // Up to 8 leading preamble bytes must be tolerated.
        let mut noisy = vec![0xFE; 8];
        noisy.extend_from_slice(&wire[4..]);
        let parsed = Frame::deserialize(&noisy).unwrap();
        assert_eq!(parsed.data, vec![0x12]);
    }

    #[test]
    fn test_deserialize_with_arbitrary_noise() {
        let wire = Frame::build(ADDR, CTRL_READ_ADDRESS, &[]).unwrap();
        let mut noisy = vec![0x00, 0xFF, 0x55, 0xFE];
        noisy.extend_from_slice(&wire[4..]);
        noisy.extend_from_slice(&[0xDE, 0xAD]); // trailing garbage
        let parsed = Frame::deserialize(&noisy).unwrap();
        assert_eq!(parsed.address, ADDR);
    }

    #[test]
    fn test_checksum_reject() {
        let mut wire = Frame::build(ADDR, CTRL_READ_DATA, &[0x01, 0x02, 0x03, 0x04]).unwrap();
        // Flip one bit in the data domain.
        wire[15] ^= 0x01;
        assert!(Frame::deserialize(&wire).is_err());
    }

    #[test]
    fn test_checksum_off_by_one_reject() {
        let mut wire = Frame::build(ADDR, CTRL_READ_DATA, &[0x01]).unwrap();
        let cs_pos = wire.len() - 2;
        wire[cs_pos] = wire[cs_pos].wrapping_add(1);
        assert!(Frame::deserialize(&wire).is_err());
    }

    #[test]
    fn test_declared_length_exceeds_buffer() {
        let mut wire = Frame::build(ADDR, CTRL_READ_DATA, &[0x01]).unwrap();
        // Claim far more data than the buffer holds.
        wire[13] = 200;
        assert!(Frame::deserialize(&wire).is_err());
    }

    #[test]
    fn test_truncated_buffer() {
        let wire = Frame::build(ADDR, CTRL_READ_DATA, &[0x01, 0x02]).unwrap();
        assert!(Frame::deserialize(&wire[..wire.len() - 3]).is_err());
        assert!(Frame::deserialize(&[0x68, 0x01]).is_err());
        assert!(Frame::deserialize(&[]).is_err());
    }

    #[test]
    fn test_missing_second_start_marker() {
        let mut wire = Frame::build(ADDR, CTRL_READ_DATA, &[]).unwrap();
        wire[11] = 0x00;
        assert!(Frame::deserialize(&wire).is_err());
    }

    #[test]
    fn test_missing_end_marker() {
        let mut wire = Frame::build(ADDR, CTRL_READ_DATA, &[]).unwrap();
        let end = wire.len() - 1;
        wire[end] = 0x17;
        assert!(Frame::deserialize(&wire).is_err());
    }

    #[test]
    fn test_response_and_exception_flags() {
        let frame = Frame::new(ADDR, CTRL_READ_DATA | 0x80, vec![]);
        assert!(frame.is_response());
        assert!(!frame.is_exception());
        assert_eq!(frame.control_code().unwrap(), ControlCode::ReadData);

        let frame = Frame::new(ADDR, CTRL_READ_DATA | 0xC0, vec![]);
        assert!(frame.is_response());
        assert!(frame.is_exception());
    }

    #[test]
    fn test_oversized_data_rejected() {
        let frame = Frame::new(ADDR, CTRL_READ_DATA, vec![0u8; 256]);
        assert!(frame.serialize().is_err());
    }
}
