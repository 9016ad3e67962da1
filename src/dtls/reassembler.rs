//! Inbound DTLS handshake reassembly.
//!
//! Records are held in a sorted set until a whole flight has arrived.
//! Handshake fragments are ordered by message_seq and offset, so duplicates
//! collapse and out of order pieces line up. Records of the next epoch
//! cannot be decrypted yet and wait here as ciphertext until the read
//! state catches up.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use super::hole::HoleSet;
use crate::buffer::Buf;
use crate::handshake::{HandshakeFragment, HandshakeHeader};
use crate::record::Plaintext;
use crate::types::{ContentType, HandshakeType, ProtocolVersion, Sequence};
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentBody {
    Handshake(HandshakeFragment),
    ChangeCipherSpec(Buf),
    /// Protected record of an epoch we cannot read yet.
    Ciphertext(Buf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFragment {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub sequence: Sequence,
    pub body: FragmentBody,
}

impl RecordFragment {
    fn compare(&self, other: &RecordFragment) -> Ordering {
        use FragmentBody::*;
        let same_epoch = self.sequence.epoch == other.sequence.epoch;
        match (&self.body, &other.body) {
            (Handshake(a), Handshake(b)) => a
                .header
                .message_seq
                .cmp(&b.header.message_seq)
                .then(a.header.fragment_offset.cmp(&b.header.fragment_offset))
                .then_with(|| {
                    if a.header.fragment_length == b.header.fragment_length {
                        Ordering::Equal
                    } else {
                        self.sequence.cmp(&other.sequence)
                    }
                }),
            (ChangeCipherSpec(_), ChangeCipherSpec(_)) => {
                self.sequence.epoch.cmp(&other.sequence.epoch)
            }
            // CCS closes the handshake messages of its epoch.
            (ChangeCipherSpec(_), Handshake(_)) if same_epoch => Ordering::Greater,
            (Handshake(_), ChangeCipherSpec(_)) if same_epoch => Ordering::Less,
            _ => self.sequence.cmp(&other.sequence),
        }
    }

    fn is_ciphertext_handshake(&self) -> bool {
        matches!(self.body, FragmentBody::Ciphertext(_))
            && self.content_type == ContentType::Handshake
    }
}

/// What the reassembler hands back.
#[derive(Debug)]
pub enum Reassembled {
    /// A whole handshake message (12 byte header, offset 0) or a CCS.
    Plaintext(Plaintext),
    /// A buffered record whose epoch is now readable. Decrypt it and feed
    /// the result back in.
    Ciphertext(RecordFragment),
}

#[derive(Debug, Clone, Default)]
struct Flight {
    /// Type of the first message. `None` for the CCS/Finished flight.
    handshake_type: Option<HandshakeType>,
    min_message_seq: u16,
    max_message_seq: u16,
    holes: HashMap<HandshakeType, HoleSet>,
}

impl Flight {
    fn starting_at(min_message_seq: u16) -> Self {
        Flight {
            handshake_type: None,
            min_message_seq,
            max_message_seq: min_message_seq,
            holes: HashMap::new(),
        }
    }

    fn has_completed(&self, t: HandshakeType) -> bool {
        self.holes.get(&t).map(|h| h.is_complete()).unwrap_or(false)
    }

    /// Every message_seq in `min..=max` has a complete message.
    fn has_completed_range(&self) -> bool {
        (self.min_message_seq..=self.max_message_seq).all(|seq| {
            self.holes
                .values()
                .any(|h| h.message_seq() == seq && h.is_complete())
        })
    }
}

#[derive(Debug)]
pub struct Reassembler {
    fragments: VecDeque<RecordFragment>,
    max_fragments: usize,
    next_record_epoch: u16,
    next_record_seq: u64,
    flight: Flight,
    preceding: Option<Flight>,
    flight_is_ready: bool,
    expect_ccs_flight: bool,
    peer_retransmitted: bool,
}

impl Reassembler {
    pub fn new(max_fragments: usize) -> Self {
        Reassembler {
            fragments: VecDeque::new(),
            max_fragments,
            next_record_epoch: 0,
            next_record_seq: 0,
            flight: Flight::default(),
            preceding: None,
            flight_is_ready: false,
            expect_ccs_flight: false,
            peer_retransmitted: false,
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// The next flight is the peer's CCS and Finished with no other message.
    pub fn expecting_finish_flight(&mut self) {
        self.expect_ccs_flight = true;
    }

    /// Whether the peer resent a flight we already consumed. Clears the flag.
    pub fn take_peer_retransmitted(&mut self) -> bool {
        std::mem::take(&mut self.peer_retransmitted)
    }

    pub fn preceding_flight_type(&self) -> Option<HandshakeType> {
        self.preceding.as_ref().and_then(|f| f.handshake_type)
    }

    fn is_desirable(&self, sequence: Sequence) -> bool {
        if sequence.epoch < self.next_record_epoch {
            return false;
        }
        !(sequence.epoch == self.next_record_epoch
            && sequence.sequence_number < self.next_record_seq)
    }

    /// Where `fragment` would go in the queue. `None` for a duplicate.
    fn slot_for(&self, fragment: &RecordFragment) -> Result<Option<usize>, Error> {
        match self
            .fragments
            .binary_search_by(|probe| probe.compare(fragment))
        {
            Ok(_) => {
                trace!("Duplicate fragment {}", fragment.sequence);
                Ok(None)
            }
            Err(_) if self.fragments.len() >= self.max_fragments => {
                warn!(
                    "Receive queue full (max {}): {}",
                    self.max_fragments,
                    self.fragments.len()
                );
                Err(Error::ReceiveQueueFull)
            }
            Err(at) => Ok(Some(at)),
        }
    }

    fn insert(&mut self, fragment: RecordFragment) -> Result<(), Error> {
        if let Some(at) = self.slot_for(&fragment)? {
            self.fragments.insert(at, fragment);
        }
        Ok(())
    }

    /// Buffer one handshake fragment of a readable record.
    pub fn queue_up_handshake(
        &mut self,
        version: ProtocolVersion,
        sequence: Sequence,
        fragment: HandshakeFragment,
    ) -> Result<(), Error> {
        if !self.is_desirable(sequence) {
            trace!("Discard undesirable handshake fragment {}", sequence);
            return Ok(());
        }

        let hs = fragment.header;

        if hs.message_seq < self.flight.min_message_seq {
            debug!(
                "Peer retransmitted {} (message_seq {} < {})",
                hs.msg_type, hs.message_seq, self.flight.min_message_seq
            );
            self.peer_retransmitted = true;
            return Ok(());
        }

        let record = RecordFragment {
            content_type: ContentType::Handshake,
            version,
            sequence,
            body: FragmentBody::Handshake(fragment),
        };
        // Nothing in the flight may change unless the bytes can be kept.
        let slot = self.slot_for(&record)?;

        let is_flight_start = hs.message_seq == self.flight.min_message_seq
            && hs.fragment_offset == 0
            && hs.msg_type != HandshakeType::Finished;
        if self.flight.handshake_type.is_none() && is_flight_start {
            trace!("Flight starts with {}", hs.msg_type);
            self.flight.handshake_type = Some(hs.msg_type);
        }
        if hs.message_seq > self.flight.max_message_seq {
            self.flight.max_message_seq = hs.message_seq;
        }

        let restarts = matches!(
            hs.msg_type,
            HandshakeType::ClientHello | HandshakeType::HelloVerifyRequest
        );

        let holes = match self.flight.holes.get_mut(&hs.msg_type) {
            None => self
                .flight
                .holes
                .entry(hs.msg_type)
                .or_insert_with(|| HoleSet::new(hs.message_seq, hs.length)),
            Some(set) if set.is_complete() => {
                if restarts && set.message_seq() != hs.message_seq {
                    *set = HoleSet::new(hs.message_seq, hs.length);
                    set
                } else {
                    trace!("Have the full {} already, discard fragment", hs.msg_type);
                    return Ok(());
                }
            }
            Some(set) => {
                if !set.is_consistent(hs.message_seq, hs.length) {
                    return Err(Error::Discard("inconsistent handshake fragment"));
                }
                set
            }
        };

        if hs.fragment_offset == 0 && hs.fragment_length == hs.length {
            holes.clear();
        } else {
            holes.fill(hs.fragment_offset, hs.fragment_length)?;
        }

        if let Some(at) = slot {
            self.fragments.insert(at, record);
        }
        Ok(())
    }

    pub fn queue_up_change_cipher_spec(
        &mut self,
        version: ProtocolVersion,
        sequence: Sequence,
        body: Buf,
    ) -> Result<(), Error> {
        if !self.is_desirable(sequence) {
            trace!("Discard undesirable change_cipher_spec {}", sequence);
            return Ok(());
        }
        self.insert(RecordFragment {
            content_type: ContentType::ChangeCipherSpec,
            version,
            sequence,
            body: FragmentBody::ChangeCipherSpec(body),
        })
    }

    /// Hold a record of the next epoch until it can be decrypted.
    pub fn queue_up_ciphertext(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        sequence: Sequence,
        body: Buf,
    ) -> Result<(), Error> {
        if !self.is_desirable(sequence) {
            trace!("Discard undesirable ciphertext {}", sequence);
            return Ok(());
        }
        self.insert(RecordFragment {
            content_type,
            version,
            sequence,
            body: FragmentBody::Ciphertext(body),
        })
    }

    /// CCS followed by a handshake record of the next epoch, i.e. Finished.
    fn has_finished_message(&self) -> bool {
        let mut has_ccs = false;
        let mut has_fin = false;
        for f in &self.fragments {
            if matches!(f.body, FragmentBody::ChangeCipherSpec(_)) {
                if has_fin {
                    return true;
                }
                has_ccs = true;
            } else if f.is_ciphertext_handshake() {
                if has_ccs {
                    return true;
                }
                has_fin = true;
            }
        }
        has_ccs && has_fin
    }

    fn is_flight_ready(&self) -> bool {
        let flight = &self.flight;
        let Some(flight_type) = flight.handshake_type else {
            return self.expect_ccs_flight && self.has_finished_message();
        };

        match flight_type {
            HandshakeType::ClientHello
            | HandshakeType::HelloRequest
            | HandshakeType::HelloVerifyRequest => flight.has_completed(flight_type),

            HandshakeType::ServerHello => {
                if !flight.has_completed(flight_type) {
                    return false;
                }
                // Abbreviated handshake.
                if self.has_finished_message() {
                    return true;
                }
                if !flight.holes.contains_key(&HandshakeType::ServerHelloDone) {
                    return false;
                }
                flight.has_completed_range()
            }

            HandshakeType::Certificate | HandshakeType::ClientKeyExchange => {
                if !flight.has_completed(flight_type) {
                    return false;
                }
                if !self.has_finished_message() {
                    return false;
                }
                if flight_type == HandshakeType::ClientKeyExchange {
                    return true;
                }
                if !flight.has_completed(HandshakeType::ClientKeyExchange) {
                    return false;
                }
                flight.has_completed_range()
            }

            _ => false,
        }
    }

    fn finish_flight(&mut self) {
        let next_min = self.flight.max_message_seq.wrapping_add(1);
        let done = std::mem::replace(&mut self.flight, Flight::starting_at(next_min));
        debug!(
            "Flight {:?} consumed, next message_seq {}",
            done.handshake_type, next_min
        );
        if self.expect_ccs_flight && done.handshake_type.is_none() {
            self.expect_ccs_flight = false;
        }
        self.preceding = Some(Flight {
            holes: HashMap::new(),
            ..done
        });
        self.flight_is_ready = false;
    }

    /// Next deliverable unit for a reader at `read_epoch`, if the current
    /// flight is complete.
    pub fn acquire_plaintext(&mut self, read_epoch: u16) -> Option<Reassembled> {
        if self.fragments.is_empty() {
            return None;
        }

        if !self.flight_is_ready {
            self.flight_is_ready = self.is_flight_ready();
            if !self.flight_is_ready {
                return None;
            }
            debug!("Flight {:?} is ready", self.flight.handshake_type);
        }

        let front = self.fragments.front()?;
        if matches!(front.body, FragmentBody::Ciphertext(_)) {
            let epoch = front.sequence.epoch;
            if epoch != read_epoch {
                if epoch < read_epoch {
                    trace!("Drop stale ciphertext {}", front.sequence);
                    self.fragments.pop_front();
                    if self.fragments.is_empty() {
                        self.finish_flight();
                    }
                }
                return None;
            }
            return self.fragments.pop_front().map(Reassembled::Ciphertext);
        }

        let plaintext = self.acquire_handshake_message();
        if self.fragments.is_empty() {
            self.finish_flight();
        }
        plaintext.map(Reassembled::Plaintext)
    }

    fn acquire_handshake_message(&mut self) -> Option<Plaintext> {
        let first = self.fragments.pop_front()?;

        let hs = match first.body {
            FragmentBody::ChangeCipherSpec(body) => {
                self.next_record_epoch = first.sequence.epoch.wrapping_add(1);
                // The Finished that follows fixes up the record sequence.
                self.next_record_seq = 0;
                return Some(Plaintext::new(
                    ContentType::ChangeCipherSpec,
                    first.version,
                    first.sequence,
                    body,
                ));
            }
            FragmentBody::Handshake(hs) => hs,
            FragmentBody::Ciphertext(_) => return None,
        };

        let header = hs.header;
        let length = header.length as usize;
        let mut body = vec![0u8; length];
        let mut last_sequence = first.sequence;

        let mut place = |f: &HandshakeFragment| {
            let start = f.header.fragment_offset as usize;
            let end = (start + f.data.len()).min(length);
            if start < end {
                body[start..end].copy_from_slice(&f.data[..end - start]);
            }
        };
        place(&hs);

        while let Some(next) = self.fragments.front() {
            let FragmentBody::Handshake(f) = &next.body else {
                break;
            };
            if f.header.message_seq != header.message_seq {
                break;
            }
            place(f);
            if next.sequence > last_sequence {
                last_sequence = next.sequence;
            }
            self.fragments.pop_front();
        }

        self.next_record_seq = last_sequence.sequence_number + 1;

        let mut raw = Buf::with_capacity(HandshakeHeader::DTLS_LEN + length);
        HandshakeHeader::whole(header.msg_type, length, header.message_seq).serialize_dtls(&mut raw);
        raw.extend_from_slice(&body);

        trace!(
            "Reassembled {} message_seq {} ({} bytes)",
            header.msg_type,
            header.message_seq,
            length
        );

        Some(Plaintext::new(
            ContentType::Handshake,
            first.version,
            first.sequence,
            raw,
        ))
    }
}
