use std::fmt;

use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;

/// Record layer protocol version.
///
/// DTLS versions are the 1-complement of the TLS version they are based on,
/// which makes their raw wire values compare the wrong way around.
/// Use [`ProtocolVersion::cmp_version`] for "newer than" decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum ProtocolVersion {
    /// Pseudo version of a V2 framed ClientHello.
    SSL2_HELLO,
    /// SSL 3.0.
    SSL3_0,
    /// TLS 1.0.
    TLS1_0,
    /// TLS 1.1.
    TLS1_1,
    /// TLS 1.2.
    TLS1_2,
    /// DTLS 1.0 (based on TLS 1.1).
    DTLS1_0,
    /// DTLS 1.2.
    DTLS1_2,
    /// Unknown version.
    Unknown(u16),
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::TLS1_2
    }
}

impl ProtocolVersion {
    /// Convert a wire value to a `ProtocolVersion`.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0002 => ProtocolVersion::SSL2_HELLO,
            0x0300 => ProtocolVersion::SSL3_0,
            0x0301 => ProtocolVersion::TLS1_0,
            0x0302 => ProtocolVersion::TLS1_1,
            0x0303 => ProtocolVersion::TLS1_2,
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    /// Convert this version to its wire value.
    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::SSL2_HELLO => 0x0002,
            ProtocolVersion::SSL3_0 => 0x0300,
            ProtocolVersion::TLS1_0 => 0x0301,
            ProtocolVersion::TLS1_1 => 0x0302,
            ProtocolVersion::TLS1_2 => 0x0303,
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn major(&self) -> u8 {
        (self.as_u16() >> 8) as u8
    }

    pub fn minor(&self) -> u8 {
        self.as_u16() as u8
    }

    /// Parse a `ProtocolVersion` from wire format.
    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, Self::from_u16(version)))
    }

    /// Serialize this version to wire format.
    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    pub fn is_dtls(&self) -> bool {
        matches!(self, ProtocolVersion::DTLS1_0 | ProtocolVersion::DTLS1_2)
            || self.major() == 0xFE
    }

    /// Position on a common TLS scale, DTLS mapped onto the TLS version it derives from.
    fn rank(&self) -> u16 {
        match self {
            ProtocolVersion::DTLS1_0 => 0x0302,
            ProtocolVersion::DTLS1_2 => 0x0303,
            // Anything else in the 0xFExx space is a DTLS newer than 1.2.
            ProtocolVersion::Unknown(_) if self.is_dtls() => 0x0304,
            v => v.as_u16(),
        }
    }

    /// Compare protocol generations, treating DTLS 1.0 as TLS 1.1 and DTLS 1.2 as TLS 1.2.
    pub fn cmp_version(&self, other: &ProtocolVersion) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }

    pub fn is_ssl3(&self) -> bool {
        *self == ProtocolVersion::SSL3_0
    }

    /// TLS 1.1 or later (explicit CBC IVs).
    pub fn use_tls11_plus(&self) -> bool {
        self.rank() >= 0x0302
    }

    /// TLS 1.2 or later (negotiated PRF and handshake hash).
    pub fn use_tls12_plus(&self) -> bool {
        self.rank() >= 0x0303
    }

    /// Record versions accepted on the wire.
    pub fn is_supported(&self) -> bool {
        !matches!(
            self,
            ProtocolVersion::Unknown(_) | ProtocolVersion::SSL2_HELLO
        )
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::SSL2_HELLO => write!(f, "SSLv2Hello"),
            ProtocolVersion::SSL3_0 => write!(f, "SSLv3"),
            ProtocolVersion::TLS1_0 => write!(f, "TLSv1"),
            ProtocolVersion::TLS1_1 => write!(f, "TLSv1.1"),
            ProtocolVersion::TLS1_2 => write!(f, "TLSv1.2"),
            ProtocolVersion::DTLS1_0 => write!(f, "DTLSv1.0"),
            ProtocolVersion::DTLS1_2 => write!(f, "DTLSv1.2"),
            ProtocolVersion::Unknown(v) => write!(f, "Unknown(0x{:04x})", v),
        }
    }
}
