//! Wire-level enums and small value types shared by the record layer,
//! the DTLS reassembler and the handshake sequencer.

use std::cmp::Ordering;
use std::fmt;

use nom::number::complete::be_u8;
use nom::IResult;

mod alert;
pub use alert::{AlertDescription, AlertLevel};

mod handshake;
pub use handshake::HandshakeType;

mod version;
pub use version::ProtocolVersion;

// ============================================================================
// Content Type
// ============================================================================

/// Record content type (RFC 5246 §6.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// Change Cipher Spec.
    ChangeCipherSpec,
    /// Alert message.
    Alert,
    /// Handshake message.
    Handshake,
    /// Application data.
    ApplicationData,
    /// Unknown content type.
    Unknown(u8),
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ContentType {
    /// Convert a u8 value to a `ContentType`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    /// Convert this `ContentType` to its u8 value.
    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    /// Parse a `ContentType` from wire format.
    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }

    /// Whether this is one of the four record types defined for TLS 1.2 and below.
    pub fn is_known(&self) -> bool {
        !matches!(self, ContentType::Unknown(_))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::ChangeCipherSpec => write!(f, "change_cipher_spec"),
            ContentType::Alert => write!(f, "alert"),
            ContentType::Handshake => write!(f, "handshake"),
            ContentType::ApplicationData => write!(f, "application_data"),
            ContentType::Unknown(v) => write!(f, "unknown({})", v),
        }
    }
}

// ============================================================================
// Sequence Number
// ============================================================================

/// DTLS record sequence number (epoch + sequence).
///
/// For plain TLS the epoch is always 0 and the sequence number uses the
/// full 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Sequence {
    /// The epoch (incremented on cipher change).
    pub epoch: u16,
    /// The sequence number within the epoch (u48 for DTLS).
    pub sequence_number: u64,
}

impl Sequence {
    /// Create a new sequence with the given epoch and sequence number 0.
    pub fn new(epoch: u16) -> Self {
        Self {
            epoch,
            sequence_number: 0,
        }
    }

    /// Split the 8 byte DTLS sequence block into epoch and sequence.
    pub fn from_dtls_bytes(b: [u8; 8]) -> Self {
        let epoch = u16::from_be_bytes([b[0], b[1]]);
        let sequence_number = u64::from_be_bytes([0, 0, b[2], b[3], b[4], b[5], b[6], b[7]]);
        Self {
            epoch,
            sequence_number,
        }
    }

    /// The 8 byte DTLS sequence block: epoch(2) | sequence(6).
    pub fn to_dtls_bytes(&self) -> [u8; 8] {
        let mut out = [0; 8];
        out[..2].copy_from_slice(&self.epoch.to_be_bytes());
        out[2..].copy_from_slice(&self.sequence_number.to_be_bytes()[2..]);
        out
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[epoch: {}, sequence_number: {}]",
            self.epoch, self.sequence_number,
        )
    }
}

impl Ord for Sequence {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then(self.sequence_number.cmp(&other.sequence_number))
    }
}

impl PartialOrd for Sequence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
