//! BLE-FTP packet framing
//!
//! Every value written to or read from the FTP data characteristic is one
//! frame with a fixed two-byte header:
//!
//! ```text
//! byte 0        byte 1        bytes 2..
//! +-------------+-------------+---------------------+
//! | opcode      | transfer id | payload             |
//! +-------------+-------------+---------------------+
//! ```
//!
//! The payload length is implicit in the frame length. Request payloads carry
//! a UTF-8 filename; data payloads carry raw file bytes.

use crate::error::{FtpError, Result};
use std::fmt;

/// Header length in bytes (opcode + transfer id)
pub const HEADER_LEN: usize = 2;

/// Maximum filename length in a request payload, in bytes
pub const MAX_FILENAME_LEN: usize = 18;

/// Frame opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Data chunk with more to follow
    DataContinuation = 0x01,
    /// Last data chunk of a transfer
    DataFinal = 0x03,
    /// Client requests a file read
    ReadRequest = 0x10,
    /// Client announces a file write
    WriteRequest = 0x20,
}

impl Opcode {
    /// True for both data opcodes
    pub fn is_data(&self) -> bool {
        matches!(self, Opcode::DataContinuation | Opcode::DataFinal)
    }

    /// True for both request opcodes
    pub fn is_request(&self) -> bool {
        matches!(self, Opcode::ReadRequest | Opcode::WriteRequest)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FtpError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Opcode::DataContinuation),
            0x03 => Ok(Opcode::DataFinal),
            0x10 => Ok(Opcode::ReadRequest),
            0x20 => Ok(Opcode::WriteRequest),
            other => Err(FtpError::InvalidPacket(format!(
                "unknown opcode {other:#04x}"
            ))),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::DataContinuation => "DATA_CONTINUATION",
            Opcode::DataFinal => "DATA_FINAL",
            Opcode::ReadRequest => "READ_REQUEST",
            Opcode::WriteRequest => "WRITE_REQUEST",
        };
        write!(f, "{}", name)
    }
}

/// One framed value on the FTP data characteristic
///
/// # Examples
///
/// ```rust
/// use ble_ftp_protocol::{Opcode, Packet};
///
/// let packet = Packet::new(Opcode::DataFinal, 0x07, b"hello".to_vec());
/// let bytes = packet.encode();
/// assert_eq!(bytes, vec![0x03, 0x07, b'h', b'e', b'l', b'l', b'o']);
///
/// let decoded = Packet::decode(&bytes).unwrap();
/// assert_eq!(decoded, packet);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub opcode: Opcode,
    pub transfer_id: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet from its parts
    pub fn new(opcode: Opcode, transfer_id: u8, payload: Vec<u8>) -> Self {
        Self {
            opcode,
            transfer_id,
            payload,
        }
    }

    /// Create a request packet carrying a filename
    ///
    /// Fails when `opcode` is not a request opcode or the filename exceeds
    /// [`MAX_FILENAME_LEN`] bytes.
    pub fn request(opcode: Opcode, transfer_id: u8, filename: &str) -> Result<Self> {
        if !opcode.is_request() {
            return Err(FtpError::InvalidPacket(format!(
                "{} is not a request opcode",
                opcode
            )));
        }
        validate_filename(filename)?;
        Ok(Self::new(opcode, transfer_id, filename.as_bytes().to_vec()))
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.push(self.opcode as u8);
        bytes.push(self.transfer_id);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse wire bytes into a packet
    ///
    /// A frame shorter than the header is malformed; a header-only frame is a
    /// valid packet with an empty payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(FtpError::InvalidPacket(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }
        let opcode = Opcode::try_from(data[0])?;
        Ok(Self {
            opcode,
            transfer_id: data[1],
            payload: data[HEADER_LEN..].to_vec(),
        })
    }

    /// True when this packet terminates a transfer
    pub fn is_final(&self) -> bool {
        self.opcode == Opcode::DataFinal
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} xid={:#04x} ({} byte payload)",
            self.opcode,
            self.transfer_id,
            self.payload.len()
        )
    }
}

/// Validate a filename against the request payload limit
pub fn validate_filename(filename: &str) -> Result<()> {
    let len = filename.len();
    if len > MAX_FILENAME_LEN {
        return Err(FtpError::FilenameTooLong(len));
    }
    Ok(())
}
