//! Symmetric record protection for one traffic direction.
//!
//! A [`CipherBox`] wraps the bulk cipher of one epoch: padding for CBC,
//! explicit IVs and AEAD nonces, and the size arithmetic between plaintext
//! fragments and wire packets. Every failure on the decrypt side is
//! reported as [`Error::BadRecordMac`] and nothing else.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::cipher::generic_array::GenericArray;
use aes_gcm::aes::cipher::{BlockDecrypt, BlockEncrypt};
use aes_gcm::aes::{Aes128, Aes256};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce, Tag};
use rc4::cipher::consts::U16;
use rc4::cipher::StreamCipher;
use rc4::Rc4;
use tinyvec::ArrayVec;
use zeroize::{Zeroize, Zeroizing};

use super::authenticator::{AuthBytes, Authenticator};
use super::suite::{BulkCipher, CipherType};
use crate::buffer::Buf;
use crate::rng::SeededRng;
use crate::types::{ContentType, ProtocolVersion};
use crate::Error;

/// Number of byte comparisons of every padding check, valid or not.
pub const PADDING_CHECK_ITERATIONS: usize = 257;

/// Explicit nonce/IV, at most one AES block.
pub type ExplicitNonce = ArrayVec<[u8; 16]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

enum BlockImpl {
    Aes128(Box<Aes128>),
    Aes256(Box<Aes256>),
}

impl BlockImpl {
    fn encrypt_block(&self, block: &mut [u8]) {
        let b = GenericArray::from_mut_slice(block);
        match self {
            BlockImpl::Aes128(c) => c.encrypt_block(b),
            BlockImpl::Aes256(c) => c.encrypt_block(b),
        }
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let b = GenericArray::from_mut_slice(block);
        match self {
            BlockImpl::Aes128(c) => c.decrypt_block(b),
            BlockImpl::Aes256(c) => c.decrypt_block(b),
        }
    }
}

enum AeadImpl {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl AeadImpl {
    fn encrypt(&self, nonce: &[u8; 12], aad: &[u8], data: &mut [u8]) -> Result<Tag, Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            AeadImpl::Aes128(c) => c.encrypt_in_place_detached(nonce, aad, data),
            AeadImpl::Aes256(c) => c.encrypt_in_place_detached(nonce, aad, data),
        }
        .map_err(|_| Error::CryptoError("AEAD encryption failed".into()))
    }

    fn decrypt(&self, nonce: &[u8; 12], aad: &[u8], data: &mut [u8], tag: &Tag) -> Result<(), Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            AeadImpl::Aes128(c) => c.decrypt_in_place_detached(nonce, aad, data, tag),
            AeadImpl::Aes256(c) => c.decrypt_in_place_detached(nonce, aad, data, tag),
        }
        .map_err(|_| Error::BadRecordMac)
    }
}

enum Engine {
    Null,
    Stream(Box<Rc4<U16>>),
    Block {
        cipher: BlockImpl,
        // Chained IV: the last ciphertext block seen.
        iv: Zeroizing<[u8; 16]>,
    },
    Aead {
        cipher: AeadImpl,
        fixed_iv: Zeroizing<[u8; 4]>,
        // Set per record by the explicit nonce step.
        pending: Option<([u8; 12], AuthBytes)>,
    },
    Disposed,
}

/// Bulk cipher state of one direction and epoch.
pub struct CipherBox {
    bulk: BulkCipher,
    version: ProtocolVersion,
    direction: Direction,
    engine: Engine,
}

impl CipherBox {
    /// Pass-through box used before the first cipher change.
    pub fn null(version: ProtocolVersion) -> Self {
        CipherBox {
            bulk: BulkCipher::Null,
            version,
            direction: Direction::Encrypt,
            engine: Engine::Null,
        }
    }

    /// `iv` is the CBC IV (ignored for TLS 1.1+) or the 4 byte AEAD fixed IV.
    pub fn new(
        bulk: BulkCipher,
        version: ProtocolVersion,
        direction: Direction,
        key: &[u8],
        iv: Option<&[u8]>,
    ) -> Result<Self, Error> {
        let info = bulk.info();
        if !bulk.is_available(version) {
            return Err(Error::CryptoError(format!(
                "{} not available with {}",
                bulk, version
            )));
        }
        if key.len() != info.key_size {
            return Err(Error::CryptoError(format!(
                "{} key length {} != {}",
                bulk,
                key.len(),
                info.key_size
            )));
        }

        let bad_key = |_| Error::CryptoError(format!("{} rejected key", bulk));

        let engine = match bulk {
            BulkCipher::Null => Engine::Null,
            BulkCipher::Rc4_128 => {
                Engine::Stream(Box::new(Rc4::<U16>::new_from_slice(key).map_err(bad_key)?))
            }
            BulkCipher::Aes128Cbc | BulkCipher::Aes256Cbc => {
                let cipher = if bulk == BulkCipher::Aes128Cbc {
                    BlockImpl::Aes128(Box::new(Aes128::new_from_slice(key).map_err(bad_key)?))
                } else {
                    BlockImpl::Aes256(Box::new(Aes256::new_from_slice(key).map_err(bad_key)?))
                };
                let mut chained = Zeroizing::new([0u8; 16]);
                // TLS 1.1+ sends an explicit IV per record; the initial IV
                // only affects the discarded first block.
                if let Some(iv) = iv {
                    if iv.len() != info.iv_size {
                        return Err(Error::CryptoError("CBC IV length".into()));
                    }
                    chained.copy_from_slice(iv);
                } else if !version.use_tls11_plus() {
                    return Err(Error::CryptoError("CBC IV required before TLS 1.1".into()));
                }
                Engine::Block {
                    cipher,
                    iv: chained,
                }
            }
            BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm => {
                let cipher = if bulk == BulkCipher::Aes128Gcm {
                    AeadImpl::Aes128(Box::new(Aes128Gcm::new_from_slice(key).map_err(bad_key)?))
                } else {
                    AeadImpl::Aes256(Box::new(Aes256Gcm::new_from_slice(key).map_err(bad_key)?))
                };
                let iv = iv.ok_or_else(|| Error::CryptoError("AEAD fixed IV missing".into()))?;
                if iv.len() != info.fixed_iv_size {
                    return Err(Error::CryptoError("AEAD fixed IV length".into()));
                }
                let mut fixed_iv = Zeroizing::new([0u8; 4]);
                fixed_iv.copy_from_slice(iv);
                Engine::Aead {
                    cipher,
                    fixed_iv,
                    pending: None,
                }
            }
        };

        debug!("New {:?} cipher box {} for {}", direction, bulk, version);

        Ok(CipherBox {
            bulk,
            version,
            direction,
            engine,
        })
    }

    pub fn bulk(&self) -> BulkCipher {
        self.bulk
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn cipher_type(&self) -> CipherType {
        self.bulk.cipher_type()
    }

    pub fn is_null_cipher(&self) -> bool {
        self.cipher_type() == CipherType::Null
    }

    pub fn is_cbc_mode(&self) -> bool {
        self.cipher_type() == CipherType::Block
    }

    pub fn is_aead_mode(&self) -> bool {
        self.cipher_type() == CipherType::Aead
    }

    pub fn block_size(&self) -> usize {
        self.bulk.info().block_size()
    }

    pub fn tag_size(&self) -> usize {
        self.bulk.info().tag_size
    }

    /// Bytes in front of the ciphertext: AEAD explicit nonce or TLS 1.1+ CBC IV.
    pub fn explicit_nonce_size(&self) -> usize {
        match self.cipher_type() {
            CipherType::Aead => self.bulk.info().record_iv_size(),
            CipherType::Block if self.version.use_tls11_plus() => self.block_size(),
            _ => 0,
        }
    }

    /// Produce the explicit nonce for the next outbound record.
    ///
    /// For AEAD this also takes the record's authenticated data, which
    /// consumes the sequence number. The nonce is the sequence block: for
    /// DTLS that carries epoch and sequence, which the peer reads back from
    /// the record.
    pub fn create_explicit_nonce(
        &mut self,
        authenticator: &mut Authenticator,
        ct: ContentType,
        fragment_len: usize,
        rng: &mut SeededRng,
    ) -> Result<ExplicitNonce, Error> {
        let mut nonce = ExplicitNonce::default();
        let tls11_plus = self.version.use_tls11_plus();
        let block_size = self.block_size();
        match &mut self.engine {
            Engine::Aead {
                fixed_iv, pending, ..
            } => {
                let explicit = authenticator.sequencer().block();
                let aad = authenticator.acquire_authentication_bytes(ct, fragment_len);
                let mut full = [0u8; 12];
                full[..4].copy_from_slice(&fixed_iv[..]);
                full[4..].copy_from_slice(&explicit);
                *pending = Some((full, aad));
                nonce.extend_from_slice(&explicit);
            }
            Engine::Block { .. } if tls11_plus => {
                nonce.resize(block_size, 0);
                rng.fill(&mut nonce);
            }
            _ => {}
        }
        Ok(nonce)
    }

    /// Read the explicit nonce of an inbound record body.
    ///
    /// Returns the number of leading bytes that are nonce. For CBC this
    /// only sanity checks the length; the IV is decrypted with the rest.
    pub fn apply_explicit_nonce(
        &mut self,
        authenticator: &mut Authenticator,
        ct: ContentType,
        body: &[u8],
    ) -> Result<usize, Error> {
        let info = self.bulk.info();
        if let Engine::Aead {
            fixed_iv, pending, ..
        } = &mut self.engine
        {
            let record_iv = info.record_iv_size();
            if body.len() < record_iv + info.tag_size {
                return Err(Error::BadRecordMac);
            }
            let mut full = [0u8; 12];
            full[..4].copy_from_slice(&fixed_iv[..]);
            full[4..].copy_from_slice(&body[..record_iv]);
            let aad = authenticator
                .acquire_authentication_bytes(ct, body.len() - record_iv - info.tag_size);
            *pending = Some((full, aad));
            return Ok(record_iv);
        }

        if self.is_cbc_mode() {
            let tag_len = authenticator.mac_len();
            if tag_len != 0 && !self.sanity_check(tag_len, body.len()) {
                return Err(Error::BadRecordMac);
            }
            if self.version.use_tls11_plus() {
                return Ok(info.block_size());
            }
        }
        Ok(0)
    }

    /// Encrypt `buf[offset..]` in place, padding CBC and appending AEAD
    /// tags. Returns the length of the protected region.
    pub fn encrypt(&mut self, buf: &mut Buf, offset: usize) -> Result<usize, Error> {
        if self.direction != Direction::Encrypt && !self.is_null_cipher() {
            return Err(Error::IllegalState("encrypt on a decrypting cipher box"));
        }
        let block_size = self.block_size();
        match &mut self.engine {
            Engine::Null => Ok(buf.len() - offset),
            Engine::Stream(rc4) => {
                rc4.apply_keystream(&mut buf[offset..]);
                Ok(buf.len() - offset)
            }
            Engine::Block { cipher, iv } => {
                let len = add_padding(buf, offset, block_size);
                let mut prev: [u8; 16] = **iv;
                for block in buf[offset..].chunks_exact_mut(block_size) {
                    for (b, p) in block.iter_mut().zip(prev.iter()) {
                        *b ^= p;
                    }
                    cipher.encrypt_block(block);
                    prev.copy_from_slice(block);
                }
                **iv = prev;
                prev.zeroize();
                Ok(len)
            }
            Engine::Aead {
                cipher, pending, ..
            } => {
                let (nonce, aad) = pending
                    .take()
                    .ok_or(Error::IllegalState("AEAD encrypt without explicit nonce"))?;
                let tag = cipher.encrypt(&nonce, &aad, &mut buf[offset..])?;
                buf.extend_from_slice(&tag);
                Ok(buf.len() - offset)
            }
            Engine::Disposed => Err(Error::IllegalState("cipher box disposed")),
        }
    }

    /// Decrypt `buf[offset..]` in place and strip padding or AEAD tag.
    ///
    /// `tag_len` is the MAC length that must remain after padding removal.
    /// Returns the plaintext length, which for TLS 1.1+ CBC still includes
    /// the decrypted explicit IV block.
    pub fn decrypt(&mut self, buf: &mut Buf, offset: usize, tag_len: usize) -> Result<usize, Error> {
        if self.direction != Direction::Decrypt && !self.is_null_cipher() {
            return Err(Error::IllegalState("decrypt on an encrypting cipher box"));
        }
        let len = buf.len() - offset;
        let block_size = self.block_size();
        let version = self.version;

        if !self.is_aead_mode() && !self.sanity_check(tag_len, len) {
            return Err(Error::BadRecordMac);
        }

        match &mut self.engine {
            Engine::Null => Ok(len),
            Engine::Stream(rc4) => {
                rc4.apply_keystream(&mut buf[offset..]);
                Ok(len)
            }
            Engine::Block { cipher, iv } => {
                let mut prev: [u8; 16] = **iv;
                let mut saved = [0u8; 16];
                for block in buf[offset..].chunks_exact_mut(block_size) {
                    saved.copy_from_slice(block);
                    cipher.decrypt_block(block);
                    for (b, p) in block.iter_mut().zip(prev.iter()) {
                        *b ^= p;
                    }
                    prev = saved;
                }
                **iv = prev;

                let new_len = remove_padding(&buf[offset..], tag_len, block_size, version)?;
                if version.use_tls11_plus() && new_len < block_size {
                    return Err(Error::BadRecordMac);
                }
                buf.truncate(offset + new_len);
                Ok(new_len)
            }
            Engine::Aead {
                cipher, pending, ..
            } => {
                let (nonce, aad) = pending
                    .take()
                    .ok_or(Error::IllegalState("AEAD decrypt without explicit nonce"))?;
                let tag_size = 16;
                if len < tag_size {
                    return Err(Error::BadRecordMac);
                }
                let end = buf.len() - tag_size;
                let tag = Tag::clone_from_slice(&buf[end..]);
                cipher.decrypt(&nonce, &aad, &mut buf[offset..end], &tag)?;
                buf.truncate(end);
                Ok(end - offset)
            }
            Engine::Disposed => Err(Error::IllegalState("cipher box disposed")),
        }
    }

    /// Release cipher state once a newer epoch has taken over.
    pub fn dispose(&mut self) {
        self.engine = Engine::Disposed;
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.engine, Engine::Disposed)
    }

    /// Plausibility of a ciphertext length before touching it.
    fn sanity_check(&self, tag_len: usize, fragment_len: usize) -> bool {
        if !self.is_cbc_mode() {
            return fragment_len >= tag_len;
        }
        let block_size = self.block_size();
        if fragment_len % block_size != 0 {
            return false;
        }
        let mut minimal = (tag_len + 1).max(block_size);
        if minimal % block_size != 0 {
            minimal += block_size - (minimal % block_size);
        }
        if self.version.use_tls11_plus() {
            minimal += block_size;
        }
        fragment_len >= minimal
    }

    /// Wire size of a record with `fragment_size` plaintext bytes.
    pub fn calculate_packet_size(
        &self,
        fragment_size: usize,
        mac_len: usize,
        header_size: usize,
    ) -> usize {
        let mut packet_size = fragment_size;
        match self.cipher_type() {
            CipherType::Block => {
                let block_size = self.block_size();
                packet_size += mac_len;
                packet_size += 1;
                packet_size += (block_size - (packet_size % block_size)) % block_size;
                if self.version.use_tls11_plus() {
                    packet_size += block_size;
                }
            }
            CipherType::Aead => {
                packet_size += self.explicit_nonce_size();
                packet_size += self.tag_size();
            }
            CipherType::Null | CipherType::Stream => {
                packet_size += mac_len;
            }
        }
        packet_size + header_size
    }

    /// Largest fragment that fits in `packet_limit` on the wire.
    pub fn calculate_fragment_size(
        &self,
        packet_limit: usize,
        mac_len: usize,
        header_size: usize,
    ) -> usize {
        let mut frag = packet_limit as isize - header_size as isize;
        match self.cipher_type() {
            CipherType::Block => {
                let block_size = self.block_size() as isize;
                if self.version.use_tls11_plus() {
                    frag -= block_size;
                }
                if frag > 0 {
                    frag -= frag % block_size;
                }
                frag -= 1;
                frag -= mac_len as isize;
            }
            CipherType::Aead => {
                frag -= self.explicit_nonce_size() as isize;
                frag -= self.tag_size() as isize;
            }
            CipherType::Null | CipherType::Stream => {
                frag -= mac_len as isize;
            }
        }
        frag.max(0) as usize
    }

    /// Upper bound of the plaintext inside a received packet, ignoring padding.
    pub fn estimate_fragment_size(
        &self,
        packet_size: usize,
        mac_len: usize,
        header_size: usize,
    ) -> usize {
        let mut frag = packet_size as isize - header_size as isize;
        match self.cipher_type() {
            CipherType::Aead => {
                frag -= self.explicit_nonce_size() as isize;
                frag -= self.tag_size() as isize;
            }
            CipherType::Block => {
                frag -= self.explicit_nonce_size() as isize;
                frag -= 1;
                frag -= mac_len as isize;
            }
            CipherType::Null | CipherType::Stream => {
                frag -= mac_len as isize;
            }
        }
        frag.max(0) as usize
    }
}

impl std::fmt::Debug for CipherBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherBox")
            .field("bulk", &self.bulk)
            .field("version", &self.version)
            .field("direction", &self.direction)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Pad `buf[offset..]` to a multiple of `block_size`, TLS style: every
/// padding byte and the length byte carry the padding length.
pub fn add_padding(buf: &mut Buf, offset: usize, block_size: usize) -> usize {
    let len = buf.len() - offset;
    let mut new_len = len + 1;
    if new_len % block_size != 0 {
        new_len += block_size - 1;
        new_len -= new_len % block_size;
    }
    let pad = (new_len - len - 1) as u8;
    buf.resize(offset + new_len, pad);
    new_len
}

/// Result of a constant-time padding scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaddingCheck {
    pub missed: usize,
    pub matched: usize,
}

impl PaddingCheck {
    pub fn iterations(&self) -> usize {
        self.missed + self.matched
    }
}

/// Compare every byte of `region` against `pad`, cycling over the region
/// until exactly [`PADDING_CHECK_ITERATIONS`] comparisons have been made.
///
/// Both counters are kept so no branch can be folded away. `region` must
/// not be empty.
pub fn check_padding(region: &[u8], pad: u8) -> PaddingCheck {
    let mut result = PaddingCheck::default();
    if region.is_empty() {
        return result;
    }
    let mut i = 0;
    while i < PADDING_CHECK_ITERATIONS {
        for b in region {
            if i >= PADDING_CHECK_ITERATIONS {
                break;
            }
            let hit = (*b == pad) as usize;
            result.matched += hit;
            result.missed += 1 - hit;
            i += 1;
        }
    }
    result
}

/// Length of `data` without its CBC padding.
///
/// A buffer too short for padding plus `tag_len` still gets a full dummy
/// scan before failing, so both failure modes cost the same.
pub fn remove_padding(
    data: &[u8],
    tag_len: usize,
    block_size: usize,
    version: ProtocolVersion,
) -> Result<usize, Error> {
    let len = data.len();
    let Some(&pad) = data.last() else {
        return Err(Error::BadRecordMac);
    };
    let pad_len = pad as usize;

    let new_len = len as isize - (pad_len as isize + 1);
    if new_len - (tag_len as isize) < 0 {
        check_padding(data, pad);
        return Err(Error::BadRecordMac);
    }
    let new_len = new_len as usize;

    let check = check_padding(&data[new_len..], pad);
    if version.is_ssl3() {
        // SSLv3 leaves the padding content unspecified.
        if pad_len > block_size {
            return Err(Error::BadRecordMac);
        }
    } else if check.missed != 0 {
        return Err(Error::BadRecordMac);
    }

    Ok(new_len)
}
