//! Handshake message framing.
//!
//! TLS prefixes each message with `type(1) | length(3)`. DTLS adds
//! `message_seq(2) | fragment_offset(3) | fragment_length(3)` so that a
//! message can be split across records and put back together.

use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::types::HandshakeType;
use crate::util::put_u24;
use crate::Error;

/// Largest handshake message body accepted from the peer.
pub const MAX_HANDSHAKE_MESSAGE_SIZE: usize = 32_768;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct HandshakeHeader {
    pub msg_type: HandshakeType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl HandshakeHeader {
    pub const TLS_LEN: usize = 4;
    pub const DTLS_LEN: usize = 12;

    /// Header of an unfragmented message.
    pub fn whole(msg_type: HandshakeType, length: usize, message_seq: u16) -> Self {
        HandshakeHeader {
            msg_type,
            length: length as u32,
            message_seq,
            fragment_offset: 0,
            fragment_length: length as u32,
        }
    }

    pub fn parse_tls(input: &[u8]) -> IResult<&[u8], HandshakeHeader> {
        let (input, msg_type) = be_u8(input)?;
        let (input, length) = be_u24(input)?;
        Ok((
            input,
            HandshakeHeader::whole(HandshakeType::from_u8(msg_type), length as usize, 0),
        ))
    }

    pub fn parse_dtls(input: &[u8]) -> IResult<&[u8], HandshakeHeader> {
        let (input, msg_type) = be_u8(input)?;
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        // A fragment must stay inside its message.
        if fragment_offset as u64 + fragment_length as u64 > length as u64 {
            return Err(Err::Failure(NomError::new(input, ErrorKind::LengthValue)));
        }

        Ok((
            input,
            HandshakeHeader {
                msg_type: HandshakeType::from_u8(msg_type),
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize_tls(&self, output: &mut Buf) {
        output.push(self.msg_type.as_u8());
        put_u24(output, self.length);
    }

    pub fn serialize_dtls(&self, output: &mut Buf) {
        output.push(self.msg_type.as_u8());
        put_u24(output, self.length);
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        put_u24(output, self.fragment_offset);
        put_u24(output, self.fragment_length);
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment_offset > 0 || self.fragment_length < self.length
    }
}

/// One DTLS handshake fragment as carried by a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFragment {
    pub header: HandshakeHeader,
    pub data: Buf,
}

impl HandshakeFragment {
    pub fn parse(input: &[u8]) -> IResult<&[u8], HandshakeFragment> {
        let (input, header) = HandshakeHeader::parse_dtls(input)?;
        let (input, data) = take(header.fragment_length as usize)(input)?;
        Ok((
            input,
            HandshakeFragment {
                header,
                data: Buf::from_slice(data),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.header.serialize_dtls(output);
        output.extend_from_slice(&self.data);
    }
}

/// Split a record's worth of DTLS handshake data into fragments.
pub fn parse_dtls_fragments(mut input: &[u8]) -> Result<Vec<HandshakeFragment>, Error> {
    let mut out = Vec::new();
    while !input.is_empty() {
        let (rest, fragment) = HandshakeFragment::parse(input)?;
        out.push(fragment);
        input = rest;
    }
    Ok(out)
}

/// `type | length | body`.
pub fn frame_tls(msg_type: HandshakeType, body: &[u8]) -> Buf {
    let mut out = Buf::with_capacity(HandshakeHeader::TLS_LEN + body.len());
    HandshakeHeader::whole(msg_type, body.len(), 0).serialize_tls(&mut out);
    out.extend_from_slice(body);
    out
}

/// Unfragmented DTLS message, the form that is hashed and fragmented for sending.
pub fn frame_dtls(msg_type: HandshakeType, message_seq: u16, body: &[u8]) -> Buf {
    let mut out = Buf::with_capacity(HandshakeHeader::DTLS_LEN + body.len());
    HandshakeHeader::whole(msg_type, body.len(), message_seq).serialize_dtls(&mut out);
    out.extend_from_slice(body);
    out
}

/// A complete inbound handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub msg_type: HandshakeType,
    pub message_seq: u16,
    /// Header and body exactly as they enter the transcript hash.
    pub raw: Buf,
    header_len: usize,
}

impl HandshakeMessage {
    pub fn body(&self) -> &[u8] {
        &self.raw[self.header_len..]
    }

    /// A reassembled DTLS message: 12 byte header with offset 0, then the body.
    pub fn from_dtls(raw: Buf) -> Result<Self, Error> {
        let (rest, header) = HandshakeHeader::parse_dtls(&raw)?;
        if header.is_fragment() || rest.len() != header.length as usize {
            return Err(Error::fatal(
                crate::types::AlertDescription::DecodeError,
                "incomplete DTLS handshake message",
            ));
        }
        Ok(HandshakeMessage {
            msg_type: header.msg_type,
            message_seq: header.message_seq,
            raw,
            header_len: HandshakeHeader::DTLS_LEN,
        })
    }

    /// One complete TLS message, e.g. a ClientHello converted from SSLv2 framing.
    pub fn from_tls(raw: Buf) -> Result<Self, Error> {
        let (body, header) = HandshakeHeader::parse_tls(&raw)?;
        if body.len() != header.length as usize {
            return Err(Error::fatal(
                crate::types::AlertDescription::DecodeError,
                "handshake message length mismatch",
            ));
        }
        Ok(HandshakeMessage {
            msg_type: header.msg_type,
            message_seq: 0,
            raw,
            header_len: HandshakeHeader::TLS_LEN,
        })
    }
}

/// Reassembles TLS handshake messages that span, or share, records.
#[derive(Debug, Default)]
pub struct HandshakeAssembler {
    pending: Buf,
}

impl HandshakeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &[u8]) {
        self.pending.extend_from_slice(fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The next complete message, if all of its bytes have arrived.
    pub fn next_message(&mut self) -> Result<Option<HandshakeMessage>, Error> {
        if self.pending.len() < HandshakeHeader::TLS_LEN {
            return Ok(None);
        }
        let (_, header) = HandshakeHeader::parse_tls(&self.pending)?;
        let length = header.length as usize;
        if length > MAX_HANDSHAKE_MESSAGE_SIZE {
            return Err(Error::fatal(
                crate::types::AlertDescription::IllegalParameter,
                format!(
                    "handshake message size {} exceeds {}",
                    length, MAX_HANDSHAKE_MESSAGE_SIZE
                ),
            ));
        }
        let total = HandshakeHeader::TLS_LEN + length;
        if self.pending.len() < total {
            return Ok(None);
        }

        let raw = Buf::from_slice(&self.pending[..total]);
        self.pending.drain_front(total);

        Ok(Some(HandshakeMessage {
            msg_type: header.msg_type,
            message_seq: 0,
            raw,
            header_len: HandshakeHeader::TLS_LEN,
        }))
    }
}
