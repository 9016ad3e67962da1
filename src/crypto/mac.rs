//! Keyed record MACs for non-AEAD suites: HMAC for TLS, the SSLv3 MAC
//! for SSLv3.

use hmac::{Hmac, Mac as _};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384};
use tinyvec::ArrayVec;
use zeroize::Zeroizing;

use super::authenticator::Sequencer;
use super::hash::{Hash, HashAlgorithm};
use super::suite::MacAlg;
use crate::types::{ContentType, ProtocolVersion};
use crate::Error;

/// Largest MAC value (SHA-384).
pub type MacTag = ArrayVec<[u8; 48]>;

macro_rules! hmac_over {
    ($digest:ty, $key:expr, $parts:expr) => {{
        let mut m = Hmac::<$digest>::new_from_slice($key)
            .map_err(|_| Error::CryptoError("Invalid HMAC key length".to_string()))?;
        for p in $parts {
            m.update(p);
        }
        let mut out = MacTag::default();
        out.extend_from_slice(&m.finalize().into_bytes());
        out
    }};
}

/// HMAC over the concatenation of `parts`.
pub fn hmac_parts(alg: HashAlgorithm, key: &[u8], parts: &[&[u8]]) -> Result<MacTag, Error> {
    let tag = match alg {
        HashAlgorithm::Md5 => hmac_over!(Md5, key, parts),
        HashAlgorithm::Sha1 => hmac_over!(Sha1, key, parts),
        HashAlgorithm::Sha256 => hmac_over!(Sha256, key, parts),
        HashAlgorithm::Sha384 => hmac_over!(Sha384, key, parts),
    };
    Ok(tag)
}

const PAD1: u8 = 0x36;
const PAD2: u8 = 0x5c;

/// Pad lengths of the SSLv3 MAC construction.
fn ssl3_pad_len(alg: HashAlgorithm) -> usize {
    match alg {
        HashAlgorithm::Md5 => 48,
        _ => 40,
    }
}

/// Record MAC for one direction. Owns that direction's sequence counter.
pub struct Mac {
    seq: Sequencer,
    alg: MacAlg,
    hash: HashAlgorithm,
    key: Zeroizing<Vec<u8>>,
}

impl Mac {
    pub fn new(alg: MacAlg, version: ProtocolVersion, key: &[u8]) -> Result<Self, Error> {
        let Some(hash) = alg.info().hash else {
            return Err(Error::IllegalState("NULL MAC has no keyed instance"));
        };
        if key.len() != alg.size() {
            return Err(Error::CryptoError(format!(
                "MAC key length {} != {}",
                key.len(),
                alg.size()
            )));
        }
        Ok(Mac {
            seq: Sequencer::new(version),
            alg,
            hash,
            key: Zeroizing::new(key.to_vec()),
        })
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.seq
    }

    pub fn sequencer_mut(&mut self) -> &mut Sequencer {
        &mut self.seq
    }

    pub fn alg(&self) -> MacAlg {
        self.alg
    }

    pub fn mac_len(&self) -> usize {
        self.alg.size()
    }

    pub fn hash_block_len(&self) -> usize {
        self.alg.info().hash_block_size
    }

    pub fn minimal_padding_len(&self) -> usize {
        self.alg.info().minimal_padding_size
    }

    /// MAC over a record fragment.
    ///
    /// A real computation consumes one sequence number. A simulated one does
    /// the same amount of hashing but leaves the counter alone; it exists to
    /// even out timing on the CBC decrypt path.
    pub fn compute(
        &mut self,
        ct: ContentType,
        data: &[u8],
        is_simulated: bool,
    ) -> Result<MacTag, Error> {
        let header = if is_simulated {
            self.seq.peek_authentication_bytes(ct, data.len())
        } else {
            self.seq.acquire_authentication_bytes(ct, data.len())
        };

        if self.seq.version().is_ssl3() {
            Ok(self.ssl3_mac(&header, data))
        } else {
            hmac_parts(self.hash, &self.key, &[&header[..], data])
        }
    }

    fn ssl3_mac(&self, header: &[u8], data: &[u8]) -> MacTag {
        let pad_len = ssl3_pad_len(self.hash);
        let pad1 = [PAD1; 48];
        let pad2 = [PAD2; 48];

        let inner = Hash::digest(self.hash, &[&self.key[..], &pad1[..pad_len], header, data]);
        let outer = Hash::digest(self.hash, &[&self.key[..], &pad2[..pad_len], &inner[..]]);

        let mut out = MacTag::default();
        out.extend_from_slice(&outer);
        out
    }
}

impl std::fmt::Debug for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mac")
            .field("alg", &self.alg)
            .field("seq", &self.seq.sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_known_value() {
        // RFC 4231 test case 2.
        let tag = hmac_parts(
            HashAlgorithm::Sha256,
            b"Jefe",
            &[&b"what do ya want "[..], &b"for nothing?"[..]],
        )
        .unwrap();
        assert_eq!(
            &tag[..],
            &[
                0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95,
                0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9,
                0x64, 0xec, 0x38, 0x43
            ]
        );
    }

    #[test]
    fn compute_consumes_sequence_simulated_does_not() {
        let mut mac = Mac::new(MacAlg::Sha, ProtocolVersion::TLS1_0, &[7; 20]).unwrap();
        let a = mac.compute(ContentType::ApplicationData, b"data", true).unwrap();
        assert_eq!(mac.sequencer().sequence_number(), 0);
        let b = mac.compute(ContentType::ApplicationData, b"data", false).unwrap();
        assert_eq!(mac.sequencer().sequence_number(), 1);
        // Same sequence number was used for both.
        assert_eq!(a, b);
        let c = mac.compute(ContentType::ApplicationData, b"data", false).unwrap();
        assert_ne!(b, c);
        assert_eq!(c.len(), 20);
    }

    #[test]
    fn ssl3_mac_differs_from_hmac() {
        let mut ssl3 = Mac::new(MacAlg::Md5, ProtocolVersion::SSL3_0, &[1; 16]).unwrap();
        let mut tls = Mac::new(MacAlg::Md5, ProtocolVersion::TLS1_0, &[1; 16]).unwrap();
        let a = ssl3.compute(ContentType::Handshake, b"x", false).unwrap();
        let b = tls.compute(ContentType::Handshake, b"x", false).unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_bad_key() {
        assert!(Mac::new(MacAlg::Sha256, ProtocolVersion::TLS1_2, &[0; 20]).is_err());
        assert!(Mac::new(MacAlg::Null, ProtocolVersion::TLS1_2, &[]).is_err());
    }
}
