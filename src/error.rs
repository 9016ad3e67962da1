use thiserror::Error;

use crate::types::{AlertDescription, ContentType, HandshakeType, ProtocolVersion};

/// Errors produced by the record layer, the DTLS reassembler and the
/// handshake sequencer.
#[derive(Debug, Error)]
pub enum Error {
    /// Authentication failure of a protected record.
    ///
    /// Bad padding, bad MAC, bad AEAD tag and short ciphertexts all end up
    /// here without further detail.
    #[error("bad record MAC")]
    BadRecordMac,

    /// A condition that terminates the connection with the given alert.
    #[error("fatal {alert}: {reason}")]
    Fatal {
        alert: AlertDescription,
        reason: String,
    },

    /// DTLS only: drop the datagram and carry on.
    #[error("discarded: {0}")]
    Discard(&'static str),

    #[error("sequence number overflow")]
    SequenceOverflow,

    /// Handshake message arrived out of order.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// An API was used in a way that can never succeed.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("parse incomplete")]
    ParseIncomplete,

    #[error("parse error: {0:?}")]
    Parse(nom::error::ErrorKind),

    #[error("record too big: max = {max} len = {len}")]
    RecordOverflow { max: usize, len: usize },

    #[error("unsupported record version {0}")]
    UnsupportedVersion(ProtocolVersion),

    #[error("unexpected record type {0}")]
    UnexpectedContentType(ContentType),

    #[error("SSLv2Hello not enabled")]
    UnsupportedSslv2Hello,

    #[error("peer alert: {0}")]
    PeerAlert(AlertDescription),

    #[error("crypto error: {0}")]
    CryptoError(String),

    #[error("transmit queue full")]
    TransmitQueueFull,

    #[error("receive queue full")]
    ReceiveQueueFull,

    #[error("connection closed")]
    Closed,

    #[error("config error: {0}")]
    ConfigError(String),
}

impl Error {
    pub fn fatal(alert: AlertDescription, reason: impl Into<String>) -> Self {
        Error::Fatal {
            alert,
            reason: reason.into(),
        }
    }

    pub fn unexpected(t: HandshakeType) -> Self {
        Error::UnexpectedMessage(format!("handshake message sequence violation, {}", t))
    }

    /// Whether a DTLS connection may drop the offending datagram and continue.
    pub fn is_discard(&self) -> bool {
        matches!(
            self,
            Error::Discard(_) | Error::ParseIncomplete | Error::Parse(_)
        )
    }

    /// Alert to send to the peer for this error.
    pub fn alert(&self) -> AlertDescription {
        match self {
            Error::BadRecordMac => AlertDescription::BadRecordMac,
            Error::Fatal { alert, .. } => *alert,
            Error::SequenceOverflow => AlertDescription::HandshakeFailure,
            Error::RecordOverflow { .. } => AlertDescription::RecordOverflow,
            Error::UnsupportedVersion(_) => AlertDescription::ProtocolVersion,
            Error::Parse(_) | Error::ParseIncomplete => AlertDescription::DecodeError,
            Error::IllegalState(_) | Error::CryptoError(_) => AlertDescription::InternalError,
            Error::PeerAlert(_) | Error::Closed => AlertDescription::CloseNotify,
            _ => AlertDescription::UnexpectedMessage,
        }
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::ParseIncomplete,
            nom::Err::Error(e) | nom::Err::Failure(e) => Error::Parse(e.code),
        }
    }
}
