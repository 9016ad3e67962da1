//! Protection of one record body, shared by every record codec.
//!
//! The encode side computes the MAC, prepends the explicit nonce and
//! encrypts. The decode side is the interesting one: every failure,
//! whether short input, bad padding, bad MAC or bad AEAD tag, comes out
//! as [`Error::BadRecordMac`], and a CBC record costs the same amount of
//! MAC work no matter how much padding it claimed.

use subtle::ConstantTimeEq;

use crate::buffer::Buf;
use crate::crypto::{Authenticator, CipherBox, Mac};
use crate::rng::SeededRng;
use crate::types::{ContentType, ProtocolVersion, Sequence};
use crate::Error;

/// Authenticator and cipher of one traffic direction in one epoch.
#[derive(Debug)]
pub struct RecordProtection {
    authenticator: Authenticator,
    cipher: CipherBox,
}

impl RecordProtection {
    /// The state every connection starts in: no MAC, no encryption.
    pub fn null(version: ProtocolVersion) -> Self {
        RecordProtection {
            authenticator: Authenticator::null(version),
            cipher: CipherBox::null(version),
        }
    }

    pub fn new(authenticator: Authenticator, cipher: CipherBox) -> Self {
        RecordProtection {
            authenticator,
            cipher,
        }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn authenticator_mut(&mut self) -> &mut Authenticator {
        &mut self.authenticator
    }

    pub fn cipher(&self) -> &CipherBox {
        &self.cipher
    }

    pub fn is_null(&self) -> bool {
        self.cipher.is_null_cipher() && self.authenticator.mac_len() == 0
    }

    pub fn is_cbc_mode(&self) -> bool {
        self.cipher.is_cbc_mode()
    }

    pub fn sequence(&self) -> Sequence {
        self.authenticator.sequence()
    }

    pub fn seq_num_overflow(&self) -> bool {
        self.authenticator.seq_num_overflow()
    }

    pub fn seq_num_is_huge(&self) -> bool {
        self.authenticator.seq_num_is_huge()
    }

    /// DTLS: move both the counter and the record version to `epoch`.
    pub fn set_epoch(&mut self, epoch: u16) {
        self.authenticator.sequencer_mut().set_epoch(epoch);
    }

    /// Largest plaintext that fits in `packet_limit` wire bytes.
    pub fn fragment_size(&self, packet_limit: usize, header_size: usize) -> usize {
        self.cipher
            .calculate_fragment_size(packet_limit, self.authenticator.mac_len(), header_size)
    }

    /// Wire size of a record carrying `fragment_len` bytes.
    pub fn packet_size(&self, fragment_len: usize, header_size: usize) -> usize {
        self.cipher
            .calculate_packet_size(fragment_len, self.authenticator.mac_len(), header_size)
    }

    pub fn dispose(&mut self) {
        self.cipher.dispose();
    }

    /// Append the protected body of one record to `out`.
    ///
    /// Spends exactly one sequence number, whatever the cipher.
    pub fn encrypt(
        &mut self,
        ct: ContentType,
        fragment: &[u8],
        out: &mut Buf,
        rng: &mut SeededRng,
    ) -> Result<(), Error> {
        if self.authenticator.seq_num_overflow() {
            return Err(Error::SequenceOverflow);
        }

        let tag = match self.authenticator.mac() {
            Some(mac) => Some(mac.compute(ct, fragment, false)?),
            None => None,
        };
        if tag.is_none() && !self.cipher.is_aead_mode() {
            self.authenticator
                .acquire_authentication_bytes(ct, fragment.len());
        }

        let nonce =
            self.cipher
                .create_explicit_nonce(&mut self.authenticator, ct, fragment.len(), rng)?;

        let start = out.len();
        out.extend_from_slice(&nonce);
        // A CBC explicit IV is encrypted along with the record, an AEAD
        // nonce travels in the clear.
        let offset = if self.cipher.is_aead_mode() {
            out.len()
        } else {
            start
        };
        out.extend_from_slice(fragment);
        if let Some(tag) = &tag {
            out.extend_from_slice(tag);
        }
        self.cipher.encrypt(out, offset)?;

        Ok(())
    }

    /// Authenticate and decrypt a record body in place, leaving only the
    /// plaintext fragment in `body`.
    pub fn decrypt(&mut self, ct: ContentType, body: &mut Buf) -> Result<(), Error> {
        if self.authenticator.seq_num_overflow() {
            return Err(Error::SequenceOverflow);
        }

        if self.cipher.is_aead_mode() {
            let nonce_len = self
                .cipher
                .apply_explicit_nonce(&mut self.authenticator, ct, body)?;
            self.cipher.decrypt(body, nonce_len, 0)?;
            body.drain_front(nonce_len);
            return Ok(());
        }

        let ciphered_len = body.len();
        let tag_len = self.authenticator.mac_len();
        let mut failed = false;
        let mut nonce_len = 0;

        if !self.cipher.is_null_cipher() {
            match self
                .cipher
                .apply_explicit_nonce(&mut self.authenticator, ct, body)
            {
                Ok(n) => {
                    nonce_len = n;
                    match self.cipher.decrypt(body, 0, tag_len) {
                        Ok(_) => {}
                        Err(Error::BadRecordMac) => failed = true,
                        Err(e) => return Err(e),
                    }
                    // The decrypted explicit IV is not part of the fragment.
                    body.drain_front(nonce_len.min(body.len()));
                }
                Err(Error::BadRecordMac) => failed = true,
                Err(e) => return Err(e),
            }
        }

        if tag_len == 0 {
            if failed {
                return Err(Error::BadRecordMac);
            }
            self.authenticator
                .acquire_authentication_bytes(ct, body.len());
            return Ok(());
        }

        let is_cbc = self.cipher.is_cbc_mode();
        let Some(mac) = self.authenticator.mac() else {
            return Err(Error::IllegalState("MAC length without a MAC"));
        };

        let content_len = if body.len() < tag_len {
            failed = true;
            // Keep the sequence in step even though nothing can match.
            mac.compute(ct, &[], false)?;
            0
        } else {
            let content_len = body.len() - tag_len;
            let expected = mac.compute(ct, &body[..content_len], false)?;
            let matched: bool = expected[..].ct_eq(&body[content_len..]).into();
            if !matched {
                failed = true;
            }
            content_len
        };

        if is_cbc {
            let used_len = nonce_len + content_len;
            simulate_remainder(mac, ct, ciphered_len, used_len)?;
        }

        if failed {
            return Err(Error::BadRecordMac);
        }
        body.truncate(content_len);

        Ok(())
    }
}

/// Bytes of dummy MAC input that make up for the hash blocks the padding
/// kept out of the real computation.
///
/// `full_len` is the ciphertext length, `used_len` what the real MAC
/// covered. The 13 accounts for the MAC header; the extra byte keeps the
/// result positive without adding a compression round.
pub fn remaining_len(
    hash_block_len: usize,
    minimal_padding_len: usize,
    full_len: usize,
    used_len: usize,
) -> usize {
    let block = hash_block_len as isize;
    let adjust = 13 - (block - minimal_padding_len as isize);
    let full = full_len as isize + adjust;
    let used = used_len as isize + adjust;
    let blocks = (ceil_div(full, block) - ceil_div(used, block)).max(0);
    1 + blocks as usize * hash_block_len
}

fn ceil_div(a: isize, b: isize) -> isize {
    (a + b - 1).div_euclid(b)
}

fn simulate_remainder(
    mac: &mut Mac,
    ct: ContentType,
    full_len: usize,
    used_len: usize,
) -> Result<(), Error> {
    let len = remaining_len(
        mac.hash_block_len(),
        mac.minimal_padding_len(),
        full_len,
        used_len,
    );
    let scratch = vec![0u8; len];
    mac.compute(ct, &scratch, true)?;
    Ok(())
}
