//! TLS record framing shared by the stream and packet codecs.

use std::collections::VecDeque;
use std::sync::Arc;

use nom::number::complete::be_u16;
use nom::IResult;

use super::protect::RecordProtection;
use super::sslv2;
use super::Plaintext;
use crate::buffer::{Buf, BufferPool};
use crate::config::MAX_FRAGMENT_SIZE;
use crate::rng::SeededRng;
use crate::types::{AlertDescription, AlertLevel, ContentType, ProtocolVersion, Sequence};
use crate::util::read_u16;
use crate::{Config, Error};

/// `type(1) | version(2) | length(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub length: u16,
}

impl TlsHeader {
    pub const LEN: usize = 5;

    /// Byte offset of the length field.
    pub const LENGTH_OFFSET: std::ops::Range<usize> = 3..5;

    pub fn parse(input: &[u8]) -> IResult<&[u8], TlsHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, length) = be_u16(input)?;
        Ok((
            input,
            TlsHeader {
                content_type,
                version,
                length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.length.to_be_bytes());
    }
}

/// Size and framing of the next record in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFrame {
    pub len: usize,
    pub sslv2: bool,
}

/// Inbound half of a TLS connection.
#[derive(Debug)]
pub struct TlsReader {
    config: Arc<Config>,
    protection: RecordProtection,
    version: ProtocolVersion,
    /// Set once an SSLv3+ record header has been seen. From then on
    /// every record must use that framing.
    format_verified: bool,
    closed: bool,
}

impl TlsReader {
    pub fn new(config: Arc<Config>) -> Self {
        let version = ProtocolVersion::TLS1_0;
        TlsReader {
            config,
            protection: RecordProtection::null(version),
            version,
            format_verified: false,
            closed: false,
        }
    }

    pub fn protection(&self) -> &RecordProtection {
        &self.protection
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn change_read_state(&mut self, protection: RecordProtection) {
        debug!(
            "Change read state for {}, null: {}",
            self.version,
            protection.is_null()
        );
        self.protection.dispose();
        self.protection = protection;
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.protection.dispose();
            self.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_version(&self, version: ProtocolVersion) -> Result<(), Error> {
        if !version.is_supported() || version.is_dtls() {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(())
    }

    /// Length of the record at the start of `data`, once 5 bytes are there.
    pub fn bytes_in_complete_packet(&mut self, data: &[u8]) -> Result<Option<RecordFrame>, Error> {
        if data.len() < TlsHeader::LEN {
            return Ok(None);
        }

        let byte0 = data[0];
        let handshake_or_alert = byte0 == ContentType::Handshake.as_u8()
            || byte0 == ContentType::Alert.as_u8();

        if self.format_verified || handshake_or_alert {
            let version = ProtocolVersion::from_u16(read_u16(&data[1..3]));
            self.check_version(version)?;
            self.format_verified = true;

            let len = read_u16(&data[TlsHeader::LENGTH_OFFSET]) as usize + TlsHeader::LEN;
            if len > self.config.max_packet_size() {
                return Err(Error::RecordOverflow {
                    max: self.config.max_packet_size(),
                    len,
                });
            }
            return Ok(Some(RecordFrame { len, sslv2: false }));
        }

        let is_short = byte0 & 0x80 != 0;
        if is_short && (data[2] == 1 || data[2] == 4) {
            let version = ProtocolVersion::from_u16(read_u16(&data[3..5]));
            if version != ProtocolVersion::SSL2_HELLO {
                self.check_version(version)?;
            }
            let len = (((byte0 & 0x7F) as usize) << 8 | data[1] as usize) + 2;
            if len < TlsHeader::LEN {
                return Err(Error::fatal(
                    AlertDescription::UnexpectedMessage,
                    "SSLv2 record too short for a ClientHello",
                ));
            }
            return Ok(Some(RecordFrame { len, sslv2: true }));
        }

        Err(Error::fatal(
            AlertDescription::UnexpectedMessage,
            "Unrecognized SSL message, plaintext connection?",
        ))
    }

    /// Decode one whole record as framed by [`bytes_in_complete_packet`].
    ///
    /// [`bytes_in_complete_packet`]: TlsReader::bytes_in_complete_packet
    pub fn decode_record(&mut self, record: &[u8], frame: RecordFrame) -> Result<Plaintext, Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        if frame.sslv2 {
            return self.decode_v2(record);
        }

        let (body, header) = TlsHeader::parse(record)?;
        let body = &body[..header.length as usize];
        trace!(
            "Record {} {} len {}",
            header.content_type,
            header.version,
            header.length
        );

        let sequence = self.protection.sequence();

        let mut fragment = Buf::from_slice(body);
        self.protection.decrypt(header.content_type, &mut fragment)?;

        if fragment.len() > MAX_FRAGMENT_SIZE {
            return Err(Error::RecordOverflow {
                max: MAX_FRAGMENT_SIZE,
                len: fragment.len(),
            });
        }

        Ok(Plaintext::new(
            header.content_type,
            header.version,
            sequence,
            fragment,
        ))
    }

    /// The record sequence number is not advanced for a V2 hello.
    fn decode_v2(&mut self, record: &[u8]) -> Result<Plaintext, Error> {
        if !sslv2::is_v2_client_hello(record) {
            return Err(Error::fatal(
                AlertDescription::UnexpectedMessage,
                "SSL V2.0 servers are not supported",
            ));
        }
        let version = record
            .get(3..5)
            .map(|v| ProtocolVersion::from_u16(read_u16(v)))
            .ok_or(Error::fatal(
                AlertDescription::UnexpectedMessage,
                "Truncated SSLv2 ClientHello",
            ))?;
        if !self.config.enable_sslv2_hello() || version == ProtocolVersion::SSL2_HELLO {
            warn!("Rejecting SSLv2 ClientHello, version {}", version);
            return Err(Error::UnsupportedSslv2Hello);
        }

        let fragment = sslv2::convert_client_hello(record)?;
        debug!("Accepted SSLv2 ClientHello for {}", version);
        Ok(Plaintext {
            content_type: ContentType::Handshake,
            version,
            sequence: Sequence::default(),
            fragment,
            v2_hello: Some(Buf::from_slice(&record[2..])),
        })
    }
}

/// Where sealed records go.
pub trait RecordSink: Default + std::fmt::Debug {
    /// Buffer the next record is appended to.
    fn begin_record(&mut self, max_queue: usize) -> Result<&mut Buf, Error>;

    fn take(&mut self) -> Option<Buf>;

    fn has_output(&self) -> bool;

    /// How many more records `begin_record` will accept.
    fn room(&self, max_queue: usize) -> usize;
}

/// Stream: records are concatenated.
impl RecordSink for Buf {
    fn begin_record(&mut self, _max_queue: usize) -> Result<&mut Buf, Error> {
        Ok(self)
    }

    fn take(&mut self) -> Option<Buf> {
        if self.is_empty() {
            None
        } else {
            Some(std::mem::take(self))
        }
    }

    fn has_output(&self) -> bool {
        !self.is_empty()
    }

    fn room(&self, _max_queue: usize) -> usize {
        usize::MAX
    }
}

/// Packets: one record per entry.
impl RecordSink for VecDeque<Buf> {
    fn begin_record(&mut self, max_queue: usize) -> Result<&mut Buf, Error> {
        if self.len() >= max_queue {
            warn!("Transmit queue full (max {}): {}", max_queue, self.len());
            return Err(Error::TransmitQueueFull);
        }
        self.push_back(Buf::new());
        self.back_mut()
            .ok_or(Error::IllegalState("transmit queue vanished"))
    }

    fn take(&mut self) -> Option<Buf> {
        self.pop_front()
    }

    fn has_output(&self) -> bool {
        !self.is_empty()
    }

    fn room(&self, max_queue: usize) -> usize {
        max_queue.saturating_sub(self.len())
    }
}

/// Outbound half of a TLS connection.
#[derive(Debug)]
pub struct TlsWriter<S: RecordSink> {
    config: Arc<Config>,
    protection: RecordProtection,
    version: ProtocolVersion,
    rng: SeededRng,
    pool: BufferPool,
    /// Handshake messages waiting to be packed into records.
    handshake: Buf,
    /// No application record sent since the last cipher change.
    first_app_record: bool,
    closed: bool,
    sink: S,
}

impl<S: RecordSink> TlsWriter<S> {
    pub fn new(config: Arc<Config>) -> Self {
        let version = ProtocolVersion::TLS1_0;
        let rng = SeededRng::new(config.rng_seed());
        TlsWriter {
            config,
            protection: RecordProtection::null(version),
            version,
            rng,
            pool: BufferPool::default(),
            handshake: Buf::new(),
            first_app_record: true,
            closed: false,
            sink: S::default(),
        }
    }

    pub fn protection(&self) -> &RecordProtection {
        &self.protection
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn change_write_state(&mut self, protection: RecordProtection) {
        debug!(
            "Change write state for {}, null: {}",
            self.version,
            protection.is_null()
        );
        self.protection.dispose();
        self.protection = protection;
        self.first_app_record = true;
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.protection.dispose();
            self.closed = true;
        }
    }

    fn fragment_limit(&self) -> usize {
        self.protection
            .fragment_size(self.config.max_packet_size(), TlsHeader::LEN)
            .min(MAX_FRAGMENT_SIZE)
            .max(1)
    }

    fn seal(&mut self, content_type: ContentType, fragment: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.protection.seq_num_is_huge() {
            warn!("Write sequence number is close to overflow");
        }

        let out = self.sink.begin_record(self.config.max_queue_tx())?;
        let start = out.len();
        TlsHeader {
            content_type,
            version: self.version,
            length: 0,
        }
        .serialize(out);

        self.protection
            .encrypt(content_type, fragment, out, &mut self.rng)?;

        let length = out.len() - start - TlsHeader::LEN;
        let at = start + TlsHeader::LENGTH_OFFSET.start;
        out[at..at + 2].copy_from_slice(&(length as u16).to_be_bytes());

        trace!("Sealed {} record, {} bytes on the wire", content_type, length);
        Ok(())
    }

    /// Queue a whole handshake message. Full records are sealed right away.
    pub fn encode_handshake(&mut self, message: Buf) -> Result<(), Error> {
        self.handshake.extend_from_slice(&message);
        self.pool.push(message);

        let limit = self.fragment_limit();
        while self.handshake.len() >= limit {
            let mut chunk = self.pool.pop();
            chunk.extend_from_slice(&self.handshake[..limit]);
            self.handshake.drain_front(limit);
            let res = self.seal(ContentType::Handshake, &chunk);
            self.pool.push(chunk);
            res?;
        }
        Ok(())
    }

    /// Seal any buffered handshake data.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.handshake.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.handshake);
        let limit = self.fragment_limit();
        for chunk in pending.chunks(limit) {
            self.seal(ContentType::Handshake, chunk)?;
        }
        self.handshake = pending;
        self.handshake.clear();
        Ok(())
    }

    pub fn encode_change_cipher_spec(&mut self) -> Result<(), Error> {
        self.flush()?;
        self.seal(ContentType::ChangeCipherSpec, &[1])
    }

    pub fn encode_alert(&mut self, level: AlertLevel, description: AlertDescription) -> Result<(), Error> {
        self.flush()?;
        self.seal(ContentType::Alert, &[level.as_u8(), description.as_u8()])
    }

    fn needs_cbc_split(&self, len: usize) -> bool {
        self.config.cbc_split()
            && self.protection.is_cbc_mode()
            && !self.version.use_tls11_plus()
            && !self.first_app_record
            && len > 1
    }

    pub fn write_app_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        if self.closed {
            return Err(Error::Closed);
        }
        self.flush()?;

        let split = self.needs_cbc_split(data.len());
        let limit = self.fragment_limit();
        let tail = if split { data.len() - 1 } else { data.len() };
        let records = usize::from(split) + tail.div_ceil(limit);
        let max_queue = self.config.max_queue_tx();
        if records > self.sink.room(max_queue) {
            warn!("Transmit queue full (max {}): need {} records", max_queue, records);
            return Err(Error::TransmitQueueFull);
        }

        let mut rest = data;
        if split {
            trace!("1/n-1 split of {} bytes", rest.len());
            self.seal(ContentType::ApplicationData, &rest[..1])?;
            rest = &rest[1..];
        }

        for chunk in rest.chunks(limit) {
            self.seal(ContentType::ApplicationData, chunk)?;
        }
        self.first_app_record = false;
        Ok(())
    }

    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        let out = self.sink.begin_record(self.config.max_queue_tx())?;
        out.extend_from_slice(data);
        Ok(())
    }

    pub fn poll_output(&mut self) -> Option<Buf> {
        self.sink.take()
    }

    pub fn has_output(&self) -> bool {
        self.sink.has_output()
    }
}
