//! Outbound DTLS flight memory.
//!
//! Every handshake message and CCS of the current flight is kept so the
//! flight can be sent again when the peer does not answer. Handshake
//! messages are cut into fragments that fit the record space offered by
//! the caller, and each retransmission may use a smaller packet size.

use crate::buffer::Buf;
use crate::handshake::HandshakeHeader;
use crate::types::{ContentType, HandshakeType, ProtocolVersion};
use crate::Error;

/// Retransmits at one packet size before halving it.
const RETRANSMITS_PER_SIZE: usize = 2;

#[derive(Debug)]
struct Memo {
    content_type: ContentType,
    version: ProtocolVersion,
    epoch: u16,
    /// For handshake messages: the whole message with a 12 byte header.
    fragment: Buf,
    /// Body bytes of a handshake message already handed out.
    acquire_offset: usize,
}

impl Memo {
    fn header(&self) -> Option<HandshakeHeader> {
        if self.content_type != ContentType::Handshake {
            return None;
        }
        HandshakeHeader::parse_dtls(&self.fragment)
            .ok()
            .map(|(_, h)| h)
    }

    fn body(&self) -> &[u8] {
        &self.fragment[HandshakeHeader::DTLS_LEN..]
    }
}

/// One record's worth of flight data, still in plaintext.
#[derive(Debug, PartialEq, Eq)]
pub struct OutboundFragment {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub fragment: Buf,
}

#[derive(Debug)]
pub struct Fragmenter {
    memos: Vec<Memo>,
    acquire_index: usize,
    flight_is_ready: bool,
    packet_size: usize,
    min_packet_size: usize,
    retransmits: usize,
}

fn ends_flight(t: HandshakeType) -> bool {
    matches!(
        t,
        HandshakeType::ClientHello
            | HandshakeType::HelloRequest
            | HandshakeType::HelloVerifyRequest
            | HandshakeType::ServerHelloDone
            | HandshakeType::Finished
    )
}

impl Fragmenter {
    pub fn new(packet_size: usize, min_packet_size: usize) -> Self {
        Fragmenter {
            memos: Vec::new(),
            acquire_index: 0,
            flight_is_ready: false,
            packet_size,
            min_packet_size: min_packet_size.min(packet_size),
            retransmits: RETRANSMITS_PER_SIZE,
        }
    }

    /// Current datagram budget. Shrinks on repeated retransmission.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Whether everything queued has been handed out.
    pub fn is_empty(&self) -> bool {
        self.acquire_index >= self.memos.len()
    }

    /// Epoch of the next fragment to hand out.
    pub fn peek_epoch(&self) -> Option<u16> {
        self.memos.get(self.acquire_index).map(|m| m.epoch)
    }

    /// Whether the flight has ended with its last message.
    pub fn is_flight_ready(&self) -> bool {
        self.flight_is_ready
    }

    fn begin_flight_if_done(&mut self) -> bool {
        if !self.flight_is_ready {
            return false;
        }
        debug!("Begin new outbound flight, forget {} memos", self.memos.len());
        self.memos.clear();
        self.acquire_index = 0;
        self.flight_is_ready = false;
        self.retransmits = RETRANSMITS_PER_SIZE;
        true
    }

    /// Remember a whole handshake message (12 byte header, offset 0).
    ///
    /// Returns `true` when this message opened a new flight.
    pub fn queue_up_handshake(
        &mut self,
        version: ProtocolVersion,
        epoch: u16,
        message: Buf,
    ) -> Result<bool, Error> {
        let (_, header) = HandshakeHeader::parse_dtls(&message)?;
        if header.is_fragment() {
            return Err(Error::IllegalState("queued handshake message must be whole"));
        }
        let new_flight = self.begin_flight_if_done();

        self.memos.push(Memo {
            content_type: ContentType::Handshake,
            version,
            epoch,
            fragment: message,
            acquire_offset: 0,
        });

        if ends_flight(header.msg_type) {
            trace!("{} ends the flight", header.msg_type);
            self.flight_is_ready = true;
        }

        Ok(new_flight)
    }

    pub fn queue_up_change_cipher_spec(&mut self, version: ProtocolVersion, epoch: u16) -> bool {
        let new_flight = self.begin_flight_if_done();
        self.memos.push(Memo {
            content_type: ContentType::ChangeCipherSpec,
            version,
            epoch,
            fragment: Buf::from_slice(&[1]),
            acquire_offset: 0,
        });
        new_flight
    }

    /// Hand out the next fragment, at most `limit` plaintext bytes.
    ///
    /// A handshake fragment always carries its 12 byte header and at
    /// least one body byte, unless the message body is empty.
    pub fn next_fragment(&mut self, limit: usize) -> Option<OutboundFragment> {
        let memo = self.memos.get_mut(self.acquire_index)?;

        let Some(header) = memo.header() else {
            self.acquire_index += 1;
            return Some(OutboundFragment {
                content_type: memo.content_type,
                version: memo.version,
                epoch: memo.epoch,
                fragment: memo.fragment.clone(),
            });
        };

        let total = memo.body().len();
        let offset = memo.acquire_offset;
        let room = limit.saturating_sub(HandshakeHeader::DTLS_LEN).max(1);
        let chunk = (total - offset).min(room);

        let mut fragment = Buf::with_capacity(HandshakeHeader::DTLS_LEN + chunk);
        HandshakeHeader {
            fragment_offset: offset as u32,
            fragment_length: chunk as u32,
            ..header
        }
        .serialize_dtls(&mut fragment);
        fragment.extend_from_slice(&memo.body()[offset..offset + chunk]);

        memo.acquire_offset += chunk;
        let out = OutboundFragment {
            content_type: ContentType::Handshake,
            version: memo.version,
            epoch: memo.epoch,
            fragment,
        };
        if memo.acquire_offset >= total {
            self.acquire_index += 1;
        }
        Some(out)
    }

    /// Start the current flight over for retransmission.
    ///
    /// Only a completed flight that was fully sent can be rewound. Each
    /// call counts as one retransmission for the packet size back-off.
    pub fn rewind(&mut self) -> bool {
        if !self.flight_is_ready || !self.is_empty() {
            return false;
        }

        self.acquire_index = 0;
        for memo in &mut self.memos {
            memo.acquire_offset = 0;
        }

        if self.packet_size > self.min_packet_size {
            if self.retransmits == 0 {
                self.packet_size = (self.packet_size / 2).max(self.min_packet_size);
                self.retransmits = RETRANSMITS_PER_SIZE;
                debug!("Shrink retransmission packet size to {}", self.packet_size);
            } else {
                self.retransmits -= 1;
            }
        }

        true
    }

    /// Drop the flight, e.g. once the handshake completed.
    pub fn clear(&mut self) {
        self.memos.clear();
        self.acquire_index = 0;
        self.flight_is_ready = false;
        self.retransmits = RETRANSMITS_PER_SIZE;
    }
}
