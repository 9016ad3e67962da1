//! Static descriptions of the bulk ciphers and MAC algorithms the record
//! layer can drive, plus the packet/fragment size arithmetic that depends
//! on them.

use std::fmt;

use super::hash::HashAlgorithm;
use crate::types::ProtocolVersion;

/// TLS record header: type(1) | version(2) | length(2).
pub const TLS_HEADER_SIZE: usize = 5;

/// DTLS record header: type(1) | version(2) | epoch(2) | seq(6) | length(2).
pub const DTLS_HEADER_SIZE: usize = 13;

/// How a bulk cipher protects a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherType {
    Null,
    Stream,
    Block,
    Aead,
}

#[derive(Debug)]
pub struct BulkCipherInfo {
    pub name: &'static str,
    pub cipher_type: CipherType,
    pub key_size: usize,
    /// Full IV (block ciphers) or nonce (AEAD) size.
    pub iv_size: usize,
    /// Part of the AEAD nonce derived from key material.
    pub fixed_iv_size: usize,
    pub tag_size: usize,
}

impl BulkCipherInfo {
    /// Block size for CBC ciphers, 0 otherwise.
    pub fn block_size(&self) -> usize {
        match self.cipher_type {
            CipherType::Block => self.iv_size,
            _ => 0,
        }
    }

    /// Per-record explicit nonce size for AEAD ciphers.
    pub fn record_iv_size(&self) -> usize {
        match self.cipher_type {
            CipherType::Aead => self.iv_size - self.fixed_iv_size,
            _ => 0,
        }
    }
}

/// Bulk ciphers with a working implementation in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum BulkCipher {
    Null,
    Rc4_128,
    Aes128Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes256Gcm,
}

static BULK_CIPHERS: [BulkCipherInfo; 6] = [
    BulkCipherInfo {
        name: "NULL",
        cipher_type: CipherType::Null,
        key_size: 0,
        iv_size: 0,
        fixed_iv_size: 0,
        tag_size: 0,
    },
    BulkCipherInfo {
        name: "RC4/128",
        cipher_type: CipherType::Stream,
        key_size: 16,
        iv_size: 0,
        fixed_iv_size: 0,
        tag_size: 0,
    },
    BulkCipherInfo {
        name: "AES/128",
        cipher_type: CipherType::Block,
        key_size: 16,
        iv_size: 16,
        fixed_iv_size: 0,
        tag_size: 0,
    },
    BulkCipherInfo {
        name: "AES/256",
        cipher_type: CipherType::Block,
        key_size: 32,
        iv_size: 16,
        fixed_iv_size: 0,
        tag_size: 0,
    },
    BulkCipherInfo {
        name: "AES/GCM/128",
        cipher_type: CipherType::Aead,
        key_size: 16,
        iv_size: 12,
        fixed_iv_size: 4,
        tag_size: 16,
    },
    BulkCipherInfo {
        name: "AES/GCM/256",
        cipher_type: CipherType::Aead,
        key_size: 32,
        iv_size: 12,
        fixed_iv_size: 4,
        tag_size: 16,
    },
];

impl BulkCipher {
    pub fn info(&self) -> &'static BulkCipherInfo {
        let idx = match self {
            BulkCipher::Null => 0,
            BulkCipher::Rc4_128 => 1,
            BulkCipher::Aes128Cbc => 2,
            BulkCipher::Aes256Cbc => 3,
            BulkCipher::Aes128Gcm => 4,
            BulkCipher::Aes256Gcm => 5,
        };
        &BULK_CIPHERS[idx]
    }

    pub fn cipher_type(&self) -> CipherType {
        self.info().cipher_type
    }

    /// Whether the cipher may be used with the given record version.
    ///
    /// AEAD needs TLS 1.2 and RC4 is not allowed in DTLS.
    pub fn is_available(&self, version: ProtocolVersion) -> bool {
        match self.cipher_type() {
            CipherType::Aead => version.use_tls12_plus(),
            CipherType::Stream => !version.is_dtls(),
            _ => true,
        }
    }
}

impl fmt::Display for BulkCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().name)
    }
}

#[derive(Debug)]
pub struct MacAlgInfo {
    pub name: &'static str,
    /// Size of the MAC value and key in bytes.
    pub size: usize,
    /// Block size of the underlying hash.
    pub hash_block_size: usize,
    /// Minimal padding the hash appends to its last block.
    pub minimal_padding_size: usize,
    pub hash: Option<HashAlgorithm>,
}

/// Record MAC algorithm for non-AEAD suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacAlg {
    Null,
    Md5,
    Sha,
    Sha256,
    Sha384,
}

static MAC_ALGS: [MacAlgInfo; 5] = [
    MacAlgInfo {
        name: "NULL",
        size: 0,
        hash_block_size: 0,
        minimal_padding_size: 0,
        hash: None,
    },
    MacAlgInfo {
        name: "MD5",
        size: 16,
        hash_block_size: 64,
        minimal_padding_size: 9,
        hash: Some(HashAlgorithm::Md5),
    },
    MacAlgInfo {
        name: "SHA",
        size: 20,
        hash_block_size: 64,
        minimal_padding_size: 9,
        hash: Some(HashAlgorithm::Sha1),
    },
    MacAlgInfo {
        name: "SHA256",
        size: 32,
        hash_block_size: 64,
        minimal_padding_size: 9,
        hash: Some(HashAlgorithm::Sha256),
    },
    MacAlgInfo {
        name: "SHA384",
        size: 48,
        hash_block_size: 128,
        minimal_padding_size: 17,
        hash: Some(HashAlgorithm::Sha384),
    },
];

impl MacAlg {
    pub fn info(&self) -> &'static MacAlgInfo {
        let idx = match self {
            MacAlg::Null => 0,
            MacAlg::Md5 => 1,
            MacAlg::Sha => 2,
            MacAlg::Sha256 => 3,
            MacAlg::Sha384 => 4,
        };
        &MAC_ALGS[idx]
    }

    pub fn size(&self) -> usize {
        self.info().size
    }
}

/// A cipher/MAC pairing used for size arithmetic before any key exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteShape {
    pub cipher: BulkCipher,
    pub mac: MacAlg,
}

impl SuiteShape {
    pub fn new(cipher: BulkCipher, mac: MacAlg) -> Self {
        SuiteShape { cipher, mac }
    }

    /// Wire size of a record carrying `fragment_size` plaintext bytes.
    pub fn calculate_packet_size(
        &self,
        fragment_size: usize,
        version: ProtocolVersion,
        is_dtls: bool,
    ) -> usize {
        let info = self.cipher.info();
        let mut packet_size = fragment_size;
        match info.cipher_type {
            CipherType::Block => {
                let block_size = info.iv_size;
                packet_size += self.mac.size();
                packet_size += 1;
                packet_size += (block_size - (packet_size % block_size)) % block_size;
                if version.use_tls11_plus() {
                    packet_size += block_size;
                }
            }
            CipherType::Aead => {
                packet_size += info.record_iv_size();
                packet_size += info.tag_size;
            }
            CipherType::Null | CipherType::Stream => {
                packet_size += self.mac.size();
            }
        }
        packet_size + header_size(is_dtls)
    }

    /// Largest plaintext fragment fitting in `packet_limit` wire bytes.
    /// Zero if nothing fits.
    pub fn calculate_frag_size(
        &self,
        packet_limit: usize,
        version: ProtocolVersion,
        is_dtls: bool,
    ) -> usize {
        let info = self.cipher.info();
        let mut frag = packet_limit as isize - header_size(is_dtls) as isize;
        match info.cipher_type {
            CipherType::Block => {
                let block_size = info.iv_size as isize;
                if version.use_tls11_plus() {
                    frag -= block_size;
                }
                if frag > 0 {
                    frag -= frag % block_size;
                }
                frag -= 1;
                frag -= self.mac.size() as isize;
            }
            CipherType::Aead => {
                frag -= info.tag_size as isize;
                frag -= info.record_iv_size() as isize;
            }
            CipherType::Null | CipherType::Stream => {
                frag -= self.mac.size() as isize;
            }
        }
        frag.max(0) as usize
    }
}

pub fn header_size(is_dtls: bool) -> usize {
    if is_dtls {
        DTLS_HEADER_SIZE
    } else {
        TLS_HEADER_SIZE
    }
}
