//! Record sequence numbers and the authenticated-data block built from them.
//!
//! Every protected record consumes exactly one sequence number, and the
//! number is taken from the same place whether it ends up in a MAC, in an
//! AEAD nonce or nowhere at all (null cipher). An [`Authenticator`] is owned
//! by one traffic direction and replaced wholesale on cipher change.

use tinyvec::ArrayVec;

use super::mac::Mac;
use crate::types::{ContentType, ProtocolVersion, Sequence};

/// seq(8) | type(1) | version(2) | length(2).
pub type AuthBytes = ArrayVec<[u8; 13]>;

/// The 8 byte counter of one direction.
///
/// For DTLS the top 2 bytes are the epoch and the low 6 the sequence
/// number within the epoch.
#[derive(Debug, Clone)]
pub struct Sequencer {
    block: [u8; 8],
    version: ProtocolVersion,
}

impl Sequencer {
    pub fn new(version: ProtocolVersion) -> Self {
        Sequencer {
            block: [0; 8],
            version,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn is_dtls(&self) -> bool {
        self.version.is_dtls()
    }

    /// The raw 8 byte block, also the AEAD explicit nonce.
    pub fn block(&self) -> [u8; 8] {
        self.block
    }

    pub fn sequence_number(&self) -> u64 {
        u64::from_be_bytes(self.block)
    }

    /// Epoch and in-epoch sequence number.
    pub fn sequence(&self) -> Sequence {
        if self.is_dtls() {
            Sequence::from_dtls_bytes(self.block)
        } else {
            Sequence {
                epoch: 0,
                sequence_number: self.sequence_number(),
            }
        }
    }

    /// Jump the whole counter. For TLS this is the full 64 bit value.
    pub fn set_sequence_number(&mut self, value: u64) {
        self.block = value.to_be_bytes();
    }

    /// DTLS input: align with the header of the record being processed.
    pub fn set_sequence(&mut self, sequence: Sequence) {
        self.block = sequence.to_dtls_bytes();
    }

    /// DTLS: start a new epoch at sequence number 0.
    pub fn set_epoch(&mut self, epoch: u16) {
        self.block = [0; 8];
        self.block[..2].copy_from_slice(&epoch.to_be_bytes());
    }

    /// Fatal when only 2^8 values are left.
    pub fn seq_num_overflow(&self) -> bool {
        let prefix = if self.is_dtls() {
            &self.block[2..7]
        } else {
            &self.block[..7]
        };
        prefix.iter().all(|b| *b == 0xFF)
    }

    /// Time to renegotiate, 2^32 values are left.
    pub fn seq_num_is_huge(&self) -> bool {
        let prefix = if self.is_dtls() {
            &self.block[2..4]
        } else {
            &self.block[..4]
        };
        prefix.iter().all(|b| *b == 0xFF)
    }

    /// Authenticated data for the record about to be protected, then advance
    /// the counter.
    pub fn acquire_authentication_bytes(&mut self, ct: ContentType, length: usize) -> AuthBytes {
        let bytes = self.peek_authentication_bytes(ct, length);
        self.increase_sequence_number();
        bytes
    }

    /// As [`Sequencer::acquire_authentication_bytes`] but without advancing.
    pub fn peek_authentication_bytes(&self, ct: ContentType, length: usize) -> AuthBytes {
        let mut out = AuthBytes::default();
        out.extend_from_slice(&self.block);
        out.push(ct.as_u8());
        // SSLv3 MACs do not cover the version.
        if !self.version.is_ssl3() {
            out.extend_from_slice(&self.version.as_u16().to_be_bytes());
        }
        out.extend_from_slice(&(length as u16).to_be_bytes());
        out
    }

    pub fn increase_sequence_number(&mut self) {
        let start = if self.is_dtls() { 2 } else { 0 };
        for b in self.block[start..].iter_mut().rev() {
            *b = b.wrapping_add(1);
            if *b != 0 {
                break;
            }
        }
    }
}

/// Record authentication for one direction.
#[derive(Debug)]
pub enum Authenticator {
    /// No record protection yet (initial handshake).
    Null(Sequencer),
    /// Block, stream and null-cipher suites with a keyed MAC.
    Mac(Mac),
    /// AEAD suites. The cipher authenticates; only the sequence block is needed.
    Aead(Sequencer),
}

impl Authenticator {
    pub fn null(version: ProtocolVersion) -> Self {
        Authenticator::Null(Sequencer::new(version))
    }

    pub fn aead(version: ProtocolVersion) -> Self {
        Authenticator::Aead(Sequencer::new(version))
    }

    pub fn sequencer(&self) -> &Sequencer {
        match self {
            Authenticator::Null(s) | Authenticator::Aead(s) => s,
            Authenticator::Mac(m) => m.sequencer(),
        }
    }

    pub fn sequencer_mut(&mut self) -> &mut Sequencer {
        match self {
            Authenticator::Null(s) | Authenticator::Aead(s) => s,
            Authenticator::Mac(m) => m.sequencer_mut(),
        }
    }

    /// The MAC, when this direction uses one.
    pub fn mac(&mut self) -> Option<&mut Mac> {
        match self {
            Authenticator::Mac(m) => Some(m),
            _ => None,
        }
    }

    /// Length of the MAC tag appended to each record.
    pub fn mac_len(&self) -> usize {
        match self {
            Authenticator::Mac(m) => m.mac_len(),
            _ => 0,
        }
    }

    pub fn acquire_authentication_bytes(&mut self, ct: ContentType, length: usize) -> AuthBytes {
        self.sequencer_mut().acquire_authentication_bytes(ct, length)
    }

    pub fn seq_num_overflow(&self) -> bool {
        self.sequencer().seq_num_overflow()
    }

    pub fn seq_num_is_huge(&self) -> bool {
        self.sequencer().seq_num_is_huge()
    }

    pub fn sequence(&self) -> Sequence {
        self.sequencer().sequence()
    }

    pub fn version(&self) -> ProtocolVersion {
        self.sequencer().version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aad_layout_tls() {
        let mut s = Sequencer::new(ProtocolVersion::TLS1_2);
        s.set_sequence_number(0x0102);
        let aad = s.acquire_authentication_bytes(ContentType::ApplicationData, 0x0304);
        assert_eq!(
            &aad[..],
            &[0, 0, 0, 0, 0, 0, 1, 2, 23, 3, 3, 3, 4]
        );
        assert_eq!(s.sequence_number(), 0x0103);
    }

    #[test]
    fn aad_layout_ssl3_skips_version() {
        let mut s = Sequencer::new(ProtocolVersion::SSL3_0);
        let aad = s.acquire_authentication_bytes(ContentType::Handshake, 5);
        assert_eq!(aad.len(), 11);
        assert_eq!(&aad[8..], &[22, 0, 5]);
    }

    #[test]
    fn aad_layout_dtls() {
        let mut s = Sequencer::new(ProtocolVersion::DTLS1_2);
        s.set_epoch(1);
        s.increase_sequence_number();
        let aad = s.peek_authentication_bytes(ContentType::Handshake, 16);
        assert_eq!(
            &aad[..],
            &[0, 1, 0, 0, 0, 0, 0, 1, 22, 0xFE, 0xFD, 0, 16]
        );
    }

    #[test]
    fn snapshot_then_increment() {
        let mut s = Sequencer::new(ProtocolVersion::TLS1_2);
        for n in 0..5u64 {
            let aad = s.acquire_authentication_bytes(ContentType::Alert, 2);
            assert_eq!(&aad[..8], &n.to_be_bytes());
        }
        assert_eq!(s.sequence_number(), 5);
    }

    #[test]
    fn dtls_increment_keeps_epoch() {
        let mut s = Sequencer::new(ProtocolVersion::DTLS1_0);
        s.set_sequence(Sequence {
            epoch: 3,
            sequence_number: 0xFFFF_FFFF_FFFE,
        });
        s.increase_sequence_number();
        assert_eq!(s.sequence().epoch, 3);
        assert_eq!(s.sequence().sequence_number, 0xFFFF_FFFF_FFFF);
        assert!(s.seq_num_overflow());
    }

    #[test]
    fn overflow_thresholds() {
        let mut s = Sequencer::new(ProtocolVersion::TLS1_2);
        s.set_sequence_number(u64::MAX - 256);
        assert!(!s.seq_num_overflow());
        s.increase_sequence_number();
        assert!(s.seq_num_overflow());

        s.set_sequence_number(u64::MAX - (1u64 << 32));
        assert!(!s.seq_num_is_huge());
        s.increase_sequence_number();
        assert!(s.seq_num_is_huge());
        assert!(!s.seq_num_overflow());

        s.set_sequence_number(u64::MAX - (1u64 << 32) - 1);
        s.increase_sequence_number();
        assert!(!s.seq_num_is_huge());
        assert!(!s.seq_num_overflow());
    }
}
