//! DTLS record codec.
//!
//! Every datagram may carry several records. Records of the current read
//! epoch are checked against the replay window and decrypted at once;
//! records of the next epoch wait in the reassembler as ciphertext; anything
//! older or further ahead is dropped. Handshake and CCS records go through
//! the reassembler so whole flights come out in order.

use std::collections::VecDeque;
use std::sync::Arc;

use nom::number::complete::be_u16;
use nom::IResult;

use super::protect::RecordProtection;
use super::Decoded;
use super::Plaintext;
use crate::buffer::Buf;
use crate::config::MAX_FRAGMENT_SIZE;
use crate::dtls::{FragmentBody, Fragmenter, Reassembled, Reassembler};
use crate::handshake::{parse_dtls_fragments, HandshakeHeader};
use crate::rng::SeededRng;
use crate::types::{AlertDescription, AlertLevel, ContentType, ProtocolVersion, Sequence};
use crate::util::{be_u48, put_u48};
use crate::window::ReplayWindow;
use crate::{Config, Error};

/// `type(1) | version(2) | epoch(2) | sequence(6) | length(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtlsRecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub sequence: Sequence,
    pub length: u16,
}

impl DtlsRecordHeader {
    pub const LEN: usize = 13;

    /// Byte offset of the length field.
    pub const LENGTH_OFFSET: std::ops::Range<usize> = 11..13;

    pub fn parse(input: &[u8]) -> IResult<&[u8], DtlsRecordHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        Ok((
            input,
            DtlsRecordHeader {
                content_type,
                version,
                sequence: Sequence {
                    epoch,
                    sequence_number,
                },
                length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.sequence.epoch.to_be_bytes());
        put_u48(output, self.sequence.sequence_number);
        output.extend_from_slice(&self.length.to_be_bytes());
    }
}

#[derive(Debug)]
pub struct DtlsInput {
    config: Arc<Config>,
    read: RecordProtection,
    read_epoch: u16,
    version: ProtocolVersion,
    window: ReplayWindow,
    reassembler: Reassembler,
    /// A CCS was delivered and the next read state is not installed yet.
    ccs_pending: bool,
    peer_retransmitted: bool,
    closed: bool,
}

impl DtlsInput {
    pub fn new(config: Arc<Config>) -> Self {
        let version = ProtocolVersion::DTLS1_0;
        let reassembler = Reassembler::new(config.max_queue_rx());
        DtlsInput {
            config,
            read: RecordProtection::null(version),
            read_epoch: 0,
            version,
            window: ReplayWindow::new(),
            reassembler,
            ccs_pending: false,
            peer_retransmitted: false,
            closed: false,
        }
    }

    pub fn protection(&self) -> &RecordProtection {
        &self.read
    }

    pub fn read_epoch(&self) -> u16 {
        self.read_epoch
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn expecting_finish_flight(&mut self) {
        self.reassembler.expecting_finish_flight();
    }

    pub fn take_peer_retransmitted(&mut self) -> bool {
        let from_records = std::mem::take(&mut self.peer_retransmitted);
        let from_flights = self.reassembler.take_peer_retransmitted();
        from_records || from_flights
    }

    pub fn change_read_state(&mut self, mut protection: RecordProtection) {
        self.read_epoch = self.read_epoch.wrapping_add(1);
        protection.set_epoch(self.read_epoch);
        debug!(
            "Change read state to epoch {} for {}",
            self.read_epoch, self.version
        );
        self.read.dispose();
        self.read = protection;
        self.window.reset();
        self.ccs_pending = false;
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.read.dispose();
            self.closed = true;
        }
    }

    /// Decode one datagram.
    ///
    /// Broken records are dropped without failing the rest of the
    /// datagram. Only conditions that must end the connection, or a full
    /// receive queue, come back as errors.
    pub fn decode(&mut self, datagram: &[u8]) -> Result<Decoded, Error> {
        if self.closed {
            return Err(Error::Closed);
        }

        let mut plaintexts = Vec::new();
        let mut input = datagram;

        while !input.is_empty() {
            let (rest, header) = match DtlsRecordHeader::parse(input) {
                Ok(v) => v,
                Err(_) => {
                    warn!("Discard {} trailing bytes of datagram", input.len());
                    break;
                }
            };
            let len = header.length as usize;
            if rest.len() < len {
                warn!(
                    "Discard truncated record {}: need {} have {}",
                    header.sequence,
                    len,
                    rest.len()
                );
                break;
            }
            let body = &rest[..len];
            input = &rest[len..];

            match self.handle_record(header, body, &mut plaintexts) {
                Ok(()) => {}
                Err(e) if e.is_discard() || matches!(e, Error::BadRecordMac) => {
                    debug!("Discard record {} {}: {}", header.content_type, header.sequence, e);
                }
                Err(e) => return Err(e),
            }
        }

        self.acquire(&mut plaintexts)?;

        Ok(Decoded {
            plaintexts,
            consumed: datagram.len(),
        })
    }

    fn handle_record(
        &mut self,
        header: DtlsRecordHeader,
        body: &[u8],
        out: &mut Vec<Plaintext>,
    ) -> Result<(), Error> {
        trace!(
            "Record {} {} {} len {}",
            header.content_type,
            header.version,
            header.sequence,
            header.length
        );

        if !header.version.is_dtls() {
            return Err(Error::Discard("not a DTLS record version"));
        }
        if body.len() > self.config.max_packet_size() {
            return Err(Error::Discard("record larger than max packet size"));
        }

        let epoch = header.sequence.epoch;
        if epoch < self.read_epoch {
            if header.content_type == ContentType::Handshake {
                self.peer_retransmitted = true;
            }
            return Err(Error::Discard("record of a previous epoch"));
        }
        if epoch > self.read_epoch {
            if Some(epoch) != self.read_epoch.checked_add(1) {
                return Err(Error::Discard("record of a future epoch"));
            }
            // Only the peer's next flight may run ahead of our read state.
            if !matches!(
                header.content_type,
                ContentType::Handshake | ContentType::ChangeCipherSpec
            ) {
                return Err(Error::Discard("non-handshake record of the next epoch"));
            }
            return match self.reassembler.queue_up_ciphertext(
                header.content_type,
                header.version,
                header.sequence,
                Buf::from_slice(body),
            ) {
                Err(Error::ReceiveQueueFull) => {
                    Err(Error::Discard("no room for ciphertext of the next epoch"))
                }
                res => res,
            };
        }

        let fragment = self.open(header.content_type, header.sequence, Buf::from_slice(body))?;
        self.deliver(header.content_type, header.version, header.sequence, fragment, out)
    }

    /// Replay check, decrypt, then mark as seen.
    fn open(&mut self, ct: ContentType, sequence: Sequence, mut body: Buf) -> Result<Buf, Error> {
        if !self.window.is_fresh(sequence.sequence_number) {
            return Err(Error::Discard("replayed record"));
        }
        self.read
            .authenticator_mut()
            .sequencer_mut()
            .set_sequence(sequence);
        self.read.decrypt(ct, &mut body)?;
        self.window.update(sequence.sequence_number);

        if body.len() > MAX_FRAGMENT_SIZE {
            return Err(Error::Discard("plaintext fragment too large"));
        }
        Ok(body)
    }

    fn deliver(
        &mut self,
        ct: ContentType,
        version: ProtocolVersion,
        sequence: Sequence,
        fragment: Buf,
        out: &mut Vec<Plaintext>,
    ) -> Result<(), Error> {
        match ct {
            ContentType::Handshake => {
                for f in parse_dtls_fragments(&fragment)? {
                    match self.reassembler.queue_up_handshake(version, sequence, f) {
                        Ok(()) => {}
                        Err(e) if e.is_discard() || matches!(e, Error::ReceiveQueueFull) => {
                            debug!("Discard handshake fragment in {}: {}", sequence, e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            }
            ContentType::ChangeCipherSpec => {
                self.reassembler
                    .queue_up_change_cipher_spec(version, sequence, fragment)
            }
            _ => {
                out.push(Plaintext::new(ct, version, sequence, fragment));
                Ok(())
            }
        }
    }

    /// Pull whatever the reassembler can release, stopping after a CCS.
    fn acquire(&mut self, out: &mut Vec<Plaintext>) -> Result<(), Error> {
        while !self.ccs_pending {
            let Some(next) = self.reassembler.acquire_plaintext(self.read_epoch) else {
                break;
            };

            match next {
                Reassembled::Plaintext(p) => {
                    let is_ccs = p.content_type == ContentType::ChangeCipherSpec;
                    out.push(p);
                    if is_ccs {
                        self.ccs_pending = true;
                    }
                }
                Reassembled::Ciphertext(f) => {
                    let FragmentBody::Ciphertext(body) = f.body else {
                        continue;
                    };
                    let res = self
                        .open(f.content_type, f.sequence, body)
                        .and_then(|fragment| {
                            self.deliver(f.content_type, f.version, f.sequence, fragment, out)
                        });
                    match res {
                        Ok(()) => {}
                        Err(e) if e.is_discard() || matches!(e, Error::BadRecordMac) => {
                            debug!("Discard buffered record {}: {}", f.sequence, e);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct DtlsOutput {
    config: Arc<Config>,
    write: RecordProtection,
    /// The state before the last cipher change, kept while a flight
    /// that spans both epochs may still be retransmitted.
    prev_write: Option<RecordProtection>,
    write_epoch: u16,
    version: ProtocolVersion,
    fragmenter: Fragmenter,
    queue_tx: VecDeque<Buf>,
    rng: SeededRng,
    closed: bool,
}

/// Seal one record into the datagram queue, packing it into the last
/// datagram if it fits.
#[allow(clippy::too_many_arguments)]
fn seal(
    queue: &mut VecDeque<Buf>,
    max_queue: usize,
    packet_size: usize,
    protection: &mut RecordProtection,
    rng: &mut SeededRng,
    content_type: ContentType,
    version: ProtocolVersion,
    fragment: &[u8],
) -> Result<(), Error> {
    let wire_len = protection.packet_size(fragment.len(), DtlsRecordHeader::LEN);
    let can_append = queue
        .back()
        .map(|b| b.len() + wire_len <= packet_size)
        .unwrap_or(false);

    if !can_append {
        if queue.len() >= max_queue {
            warn!("Transmit queue full (max {}): {}", max_queue, queue.len());
            return Err(Error::TransmitQueueFull);
        }
        queue.push_back(Buf::new());
    }
    let out = queue
        .back_mut()
        .ok_or(Error::IllegalState("transmit queue vanished"))?;

    let start = out.len();
    let sequence = protection.sequence();
    DtlsRecordHeader {
        content_type,
        version,
        sequence,
        length: 0,
    }
    .serialize(out);

    protection.encrypt(content_type, fragment, out, rng)?;

    let length = out.len() - start - DtlsRecordHeader::LEN;
    let at = start + DtlsRecordHeader::LENGTH_OFFSET.start;
    out[at..at + 2].copy_from_slice(&(length as u16).to_be_bytes());

    trace!("Sealed {} record {} ({} bytes)", content_type, sequence, length);
    Ok(())
}

/// Datagrams `seal` would add to `queue` for records of these wire sizes.
fn new_datagrams(
    queue: &VecDeque<Buf>,
    packet_size: usize,
    wire_lens: impl Iterator<Item = usize>,
) -> usize {
    let mut last = queue.back().map(|b| b.len());
    let mut added = 0;
    for wire_len in wire_lens {
        match last {
            Some(used) if used + wire_len <= packet_size => last = Some(used + wire_len),
            _ => {
                added += 1;
                last = Some(wire_len);
            }
        }
    }
    added
}

impl DtlsOutput {
    pub fn new(config: Arc<Config>) -> Self {
        let version = ProtocolVersion::DTLS1_0;
        let fragmenter = Fragmenter::new(config.mtu(), config.min_mtu());
        let rng = SeededRng::new(config.rng_seed());
        DtlsOutput {
            config,
            write: RecordProtection::null(version),
            prev_write: None,
            write_epoch: 0,
            version,
            fragmenter,
            queue_tx: VecDeque::new(),
            rng,
            closed: false,
        }
    }

    pub fn protection(&self) -> &RecordProtection {
        &self.write
    }

    pub fn write_epoch(&self) -> u16 {
        self.write_epoch
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn change_write_state(&mut self, mut protection: RecordProtection) {
        self.write_epoch = self.write_epoch.wrapping_add(1);
        protection.set_epoch(self.write_epoch);
        debug!(
            "Change write state to epoch {} for {}",
            self.write_epoch, self.version
        );
        if let Some(mut old) = self.prev_write.take() {
            old.dispose();
        }
        self.prev_write = Some(std::mem::replace(&mut self.write, protection));
    }

    fn dispose_prev_write(&mut self) {
        if let Some(mut old) = self.prev_write.take() {
            trace!("Dispose write state of epoch {}", self.write_epoch.wrapping_sub(1));
            old.dispose();
        }
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.write.dispose();
            self.dispose_prev_write();
            self.fragmenter.clear();
            self.closed = true;
        }
    }

    /// Queue a whole handshake message (12 byte header, offset 0).
    pub fn encode_handshake(&mut self, message: Buf) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self
            .fragmenter
            .queue_up_handshake(self.version, self.write_epoch, message)?
        {
            self.dispose_prev_write();
        }
        Ok(())
    }

    pub fn encode_change_cipher_spec(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self
            .fragmenter
            .queue_up_change_cipher_spec(self.version, self.write_epoch)
        {
            self.dispose_prev_write();
        }
        Ok(())
    }

    /// Turn queued flight data into records.
    pub fn flush(&mut self) -> Result<(), Error> {
        let max_queue = self.config.max_queue_tx();

        while let Some(epoch) = self.fragmenter.peek_epoch() {
            let packet_size = self.fragmenter.packet_size();
            let protection = if epoch == self.write_epoch {
                &mut self.write
            } else if epoch.wrapping_add(1) == self.write_epoch {
                self.prev_write
                    .as_mut()
                    .ok_or(Error::IllegalState("write state of previous epoch is gone"))?
            } else {
                return Err(Error::IllegalState("flight data of an unknown epoch"));
            };

            // Fill the last datagram unless it cannot take a header plus
            // one body byte, then start a fresh one.
            let used = self.queue_tx.back().map(|b| b.len()).unwrap_or(0);
            let room = packet_size.saturating_sub(used);
            let mut limit = protection.fragment_size(room, DtlsRecordHeader::LEN);
            if limit <= HandshakeHeader::DTLS_LEN {
                limit = protection.fragment_size(packet_size, DtlsRecordHeader::LEN);
            }
            let limit = limit.min(MAX_FRAGMENT_SIZE);

            let Some(f) = self.fragmenter.next_fragment(limit) else {
                break;
            };
            seal(
                &mut self.queue_tx,
                max_queue,
                packet_size,
                protection,
                &mut self.rng,
                f.content_type,
                f.version,
                &f.fragment,
            )?;
        }
        Ok(())
    }

    pub fn encode_alert(&mut self, level: AlertLevel, description: AlertDescription) -> Result<(), Error> {
        self.flush()?;
        seal(
            &mut self.queue_tx,
            self.config.max_queue_tx(),
            self.config.mtu(),
            &mut self.write,
            &mut self.rng,
            ContentType::Alert,
            self.version,
            &[level.as_u8(), description.as_u8()],
        )
    }

    pub fn write_app_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        if self.closed {
            return Err(Error::Closed);
        }
        self.flush()?;

        let packet_size = self.config.mtu();
        let limit = self
            .write
            .fragment_size(packet_size, DtlsRecordHeader::LEN)
            .min(MAX_FRAGMENT_SIZE)
            .max(1);

        // All of `data` is queued or none of it.
        let wire_lens = data
            .chunks(limit)
            .map(|c| self.write.packet_size(c.len(), DtlsRecordHeader::LEN));
        let added = new_datagrams(&self.queue_tx, packet_size, wire_lens);
        let max_queue = self.config.max_queue_tx();
        if self.queue_tx.len() + added > max_queue {
            warn!(
                "Transmit queue full (max {}): {} + {}",
                max_queue,
                self.queue_tx.len(),
                added
            );
            return Err(Error::TransmitQueueFull);
        }

        for chunk in data.chunks(limit) {
            seal(
                &mut self.queue_tx,
                self.config.max_queue_tx(),
                packet_size,
                &mut self.write,
                &mut self.rng,
                ContentType::ApplicationData,
                self.version,
                chunk,
            )?;
        }
        Ok(())
    }

    /// Send the last flight again. `false` if there is nothing to resend.
    pub fn retransmit(&mut self) -> Result<bool, Error> {
        if !self.fragmenter.rewind() {
            return Ok(false);
        }
        debug!(
            "Retransmit flight, packet size {}",
            self.fragmenter.packet_size()
        );
        self.flush()?;
        Ok(true)
    }

    /// Forget the last flight once the handshake is over.
    pub fn finish_flights(&mut self) {
        self.fragmenter.clear();
    }

    pub fn poll_output(&mut self) -> Option<Buf> {
        self.queue_tx.pop_front()
    }

    pub fn has_output(&self) -> bool {
        !self.queue_tx.is_empty()
    }
}
