//! Record codecs.
//!
//! Three variants share [`RecordProtection`] for the actual MAC and
//! cipher work and differ only in framing and buffering:
//!
//! * TLS over a byte stream, where records may arrive split or merged.
//! * TLS over caller-supplied packets, one or more whole records per call.
//! * DTLS over datagrams, with explicit epoch and sequence, replay
//!   detection and handshake reassembly.
//!
//! The two enums [`InputRecord`] and [`OutputRecord`] pick the variant at
//! connection setup.

use std::sync::Arc;

use crate::buffer::Buf;
use crate::types::{AlertDescription, AlertLevel, ContentType, ProtocolVersion, Sequence};
use crate::{Config, Error};

mod protect;
pub use protect::{remaining_len, RecordProtection};

mod dtls;
mod sslv2;
mod tls;
mod tls_packet;
mod tls_stream;

pub use dtls::{DtlsInput, DtlsOutput, DtlsRecordHeader};
pub use sslv2::{convert_client_hello, NO_CIPHER_ERROR};
pub use tls::{RecordSink, TlsHeader, TlsReader, TlsWriter};
pub use tls_packet::{TlsPacketInput, TlsPacketOutput};
pub use tls_stream::{TlsStreamInput, TlsStreamOutput};

/// A decoded and authenticated record fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plaintext {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    /// Epoch is always 0 for TLS.
    pub sequence: Sequence,
    pub fragment: Buf,
    /// For a ClientHello converted from SSLv2 framing: the original
    /// message, which is what the transcript hash covers.
    pub v2_hello: Option<Buf>,
}

impl Plaintext {
    pub fn new(
        content_type: ContentType,
        version: ProtocolVersion,
        sequence: Sequence,
        fragment: Buf,
    ) -> Self {
        Plaintext {
            content_type,
            version,
            sequence,
            fragment,
            v2_hello: None,
        }
    }
}

/// Result of one decode call.
///
/// Decoding stops right after a ChangeCipherSpec so the caller can
/// install the new read state before anything behind it is decrypted.
#[derive(Debug, Default)]
pub struct Decoded {
    pub plaintexts: Vec<Plaintext>,
    /// Input bytes taken. The stream and datagram variants always take
    /// everything; the packet variant stops at the last whole record.
    pub consumed: usize,
}

/// How records reach us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// TLS over a byte stream.
    Stream,
    /// TLS, the caller hands over whole records.
    Packet,
    /// DTLS.
    Datagram,
}

impl Transport {
    pub fn is_dtls(&self) -> bool {
        *self == Transport::Datagram
    }
}

#[derive(Debug)]
pub enum InputRecord {
    TlsStream(TlsStreamInput),
    TlsPacket(TlsPacketInput),
    Dtls(DtlsInput),
}

impl InputRecord {
    pub fn new(config: Arc<Config>, transport: Transport) -> Self {
        match transport {
            Transport::Stream => InputRecord::TlsStream(TlsStreamInput::new(config)),
            Transport::Packet => InputRecord::TlsPacket(TlsPacketInput::new(config)),
            Transport::Datagram => InputRecord::Dtls(DtlsInput::new(config)),
        }
    }

    pub fn is_dtls(&self) -> bool {
        matches!(self, InputRecord::Dtls(_))
    }

    pub fn decode(&mut self, data: &[u8]) -> Result<Decoded, Error> {
        match self {
            InputRecord::TlsStream(v) => v.decode(data),
            InputRecord::TlsPacket(v) => v.decode(data),
            InputRecord::Dtls(v) => v.decode(data),
        }
    }

    /// Install the read state that follows a ChangeCipherSpec.
    pub fn change_read_state(&mut self, protection: RecordProtection) {
        match self {
            InputRecord::TlsStream(v) => v.reader_mut().change_read_state(protection),
            InputRecord::TlsPacket(v) => v.reader_mut().change_read_state(protection),
            InputRecord::Dtls(v) => v.change_read_state(protection),
        }
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        match self {
            InputRecord::TlsStream(v) => v.reader_mut().set_version(version),
            InputRecord::TlsPacket(v) => v.reader_mut().set_version(version),
            InputRecord::Dtls(v) => v.set_version(version),
        }
    }

    pub fn seq_num_is_huge(&self) -> bool {
        match self {
            InputRecord::TlsStream(v) => v.reader().protection().seq_num_is_huge(),
            InputRecord::TlsPacket(v) => v.reader().protection().seq_num_is_huge(),
            InputRecord::Dtls(v) => v.protection().seq_num_is_huge(),
        }
    }

    /// DTLS: the next inbound flight is CCS and Finished only.
    pub fn expecting_finish_flight(&mut self) {
        if let InputRecord::Dtls(v) = self {
            v.expecting_finish_flight();
        }
    }

    /// DTLS: whether the peer resent something we already consumed.
    pub fn take_peer_retransmitted(&mut self) -> bool {
        match self {
            InputRecord::Dtls(v) => v.take_peer_retransmitted(),
            _ => false,
        }
    }

    pub fn close(&mut self) {
        match self {
            InputRecord::TlsStream(v) => v.reader_mut().close(),
            InputRecord::TlsPacket(v) => v.reader_mut().close(),
            InputRecord::Dtls(v) => v.close(),
        }
    }
}

#[derive(Debug)]
pub enum OutputRecord {
    TlsStream(TlsStreamOutput),
    TlsPacket(TlsPacketOutput),
    Dtls(DtlsOutput),
}

macro_rules! each_output {
    ($self:ident, $v:ident => $e:expr) => {
        match $self {
            OutputRecord::TlsStream($v) => $e,
            OutputRecord::TlsPacket($v) => $e,
            OutputRecord::Dtls($v) => $e,
        }
    };
}

impl OutputRecord {
    pub fn new(config: Arc<Config>, transport: Transport) -> Self {
        match transport {
            Transport::Stream => OutputRecord::TlsStream(TlsStreamOutput::new(config)),
            Transport::Packet => OutputRecord::TlsPacket(TlsPacketOutput::new(config)),
            Transport::Datagram => OutputRecord::Dtls(DtlsOutput::new(config)),
        }
    }

    pub fn is_dtls(&self) -> bool {
        matches!(self, OutputRecord::Dtls(_))
    }

    /// Queue one whole handshake message, header included.
    pub fn encode_handshake(&mut self, message: Buf) -> Result<(), Error> {
        each_output!(self, v => v.encode_handshake(message))
    }

    pub fn encode_change_cipher_spec(&mut self) -> Result<(), Error> {
        each_output!(self, v => v.encode_change_cipher_spec())
    }

    pub fn encode_alert(&mut self, level: AlertLevel, description: AlertDescription) -> Result<(), Error> {
        each_output!(self, v => v.encode_alert(level, description))
    }

    pub fn write_app_data(&mut self, data: &[u8]) -> Result<(), Error> {
        each_output!(self, v => v.write_app_data(data))
    }

    /// Push buffered handshake data into records.
    pub fn flush(&mut self) -> Result<(), Error> {
        each_output!(self, v => v.flush())
    }

    /// Bytes that bypass record protection, e.g. an SSLv2 error message.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        match self {
            OutputRecord::TlsStream(v) => v.write_raw(data),
            OutputRecord::TlsPacket(v) => v.write_raw(data),
            OutputRecord::Dtls(_) => Err(Error::IllegalState("raw writes are TLS only")),
        }
    }

    pub fn change_write_state(&mut self, protection: RecordProtection) {
        each_output!(self, v => v.change_write_state(protection))
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        each_output!(self, v => v.set_version(version))
    }

    pub fn seq_num_is_huge(&self) -> bool {
        each_output!(self, v => v.protection().seq_num_is_huge())
    }

    /// DTLS: send the last flight again.
    pub fn retransmit(&mut self) -> Result<bool, Error> {
        match self {
            OutputRecord::Dtls(v) => v.retransmit(),
            _ => Err(Error::IllegalState("retransmission is DTLS only")),
        }
    }

    /// DTLS: drop the retransmission copy of the last flight.
    pub fn finish_flights(&mut self) {
        if let OutputRecord::Dtls(v) = self {
            v.finish_flights();
        }
    }

    /// Next chunk of wire bytes, a whole datagram for DTLS.
    pub fn poll_output(&mut self) -> Option<Buf> {
        each_output!(self, v => v.poll_output())
    }

    pub fn has_output(&self) -> bool {
        each_output!(self, v => v.has_output())
    }

    pub fn close(&mut self) {
        each_output!(self, v => v.close())
    }
}
