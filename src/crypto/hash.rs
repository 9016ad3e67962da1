use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};

/// Digests used by the handshake transcript, the MACs and the PRFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }

    /// Internal block size of the compression function.
    pub fn block_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha384 => 128,
            _ => 64,
        }
    }

    /// Look up by standard name, e.g. `"SHA-256"`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MD5" => Some(HashAlgorithm::Md5),
            "SHA" | "SHA1" | "SHA-1" => Some(HashAlgorithm::Sha1),
            "SHA256" | "SHA-256" => Some(HashAlgorithm::Sha256),
            "SHA384" | "SHA-384" => Some(HashAlgorithm::Sha384),
            _ => None,
        }
    }
}

/// A running digest. Cloneable, so intermediate values can be taken
/// without disturbing the stream.
#[derive(Clone)]
pub enum Hash {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
}

impl Hash {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Hash::Md5(Md5::new()),
            HashAlgorithm::Sha1 => Hash::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Hash::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Hash::Sha384(Sha384::new()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Hash::Md5(_) => HashAlgorithm::Md5,
            Hash::Sha1(_) => HashAlgorithm::Sha1,
            Hash::Sha256(_) => HashAlgorithm::Sha256,
            Hash::Sha384(_) => HashAlgorithm::Sha384,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hash::Md5(hasher) => hasher.update(data),
            Hash::Sha1(hasher) => hasher.update(data),
            Hash::Sha256(hasher) => hasher.update(data),
            Hash::Sha384(hasher) => hasher.update(data),
        }
    }

    /// Finalize a copy of the state, leaving this one open for more input.
    pub fn clone_and_finalize(&self) -> Vec<u8> {
        match self {
            Hash::Md5(hasher) => hasher.clone().finalize().to_vec(),
            Hash::Sha1(hasher) => hasher.clone().finalize().to_vec(),
            Hash::Sha256(hasher) => hasher.clone().finalize().to_vec(),
            Hash::Sha384(hasher) => hasher.clone().finalize().to_vec(),
        }
    }

    /// One-shot digest.
    pub fn digest(algorithm: HashAlgorithm, data: &[&[u8]]) -> Vec<u8> {
        let mut h = Hash::new(algorithm);
        for d in data {
            h.update(d);
        }
        h.clone_and_finalize()
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Hash").field(&self.algorithm()).finish()
    }
}
