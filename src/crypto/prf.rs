use tinyvec::ArrayVec;
use zeroize::Zeroizing;

use super::authenticator::Authenticator;
use super::cipher_box::{CipherBox, Direction};
use super::hash::{Hash, HashAlgorithm};
use super::handshake_hash::HandshakeHash;
use super::mac::{hmac_parts, Mac};
use super::suite::{CipherType, MacAlg, SuiteShape};
use crate::types::ProtocolVersion;
use crate::Error;

/// Largest PRF output we ever need: a key block for AES-256 with SHA-384.
pub type PrfOutput = ArrayVec<[u8; 256]>;

/// PRF for TLS 1.2
/// as specified in RFC 5246 Section 5.
///
/// PRF(secret, label, seed) = P_<hash>(secret, label + seed)
///
/// The seed here is WITHOUT the label.
pub fn prf_tls12(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
    hash: HashAlgorithm,
) -> Result<PrfOutput, Error> {
    match hash {
        HashAlgorithm::Sha256 | HashAlgorithm::Sha384 => {}
        _ => {
            return Err(Error::CryptoError(format!(
                "Unsupported PRF hash for TLS1.2: {:?}",
                hash
            )))
        }
    }
    let full_seed = compute_full_seed(label, seed);
    p_hash(hash, secret, &full_seed, output_len)
}

/// PRF for TLS 1.0 and 1.1 (RFC 2246 Section 5).
///
/// The secret is split in two halves (sharing the middle byte when odd),
/// and P_MD5 over the first is XORed with P_SHA1 over the second.
pub fn prf_tls10(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<PrfOutput, Error> {
    let full_seed = compute_full_seed(label, seed);
    let half = secret.len().div_ceil(2);
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];

    let mut out = p_hash(HashAlgorithm::Md5, s1, &full_seed, output_len)?;
    let sha = p_hash(HashAlgorithm::Sha1, s2, &full_seed, output_len)?;
    for (o, s) in out.iter_mut().zip(sha.iter()) {
        *o ^= s;
    }
    Ok(out)
}

/// Version dispatching PRF. `hash` only matters from TLS 1.2.
pub fn prf(
    version: ProtocolVersion,
    hash: HashAlgorithm,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<PrfOutput, Error> {
    if version.is_ssl3() {
        return Err(Error::IllegalState("SSLv3 has no PRF"));
    }
    if version.use_tls12_plus() {
        prf_tls12(secret, label, seed, output_len, hash)
    } else {
        prf_tls10(secret, label, seed, output_len)
    }
}

fn compute_full_seed(label: &str, seed: &[u8]) -> Vec<u8> {
    let mut full_seed = Vec::with_capacity(label.len() + seed.len());
    full_seed.extend_from_slice(label.as_bytes());
    full_seed.extend_from_slice(seed);
    full_seed
}

fn p_hash(
    hash: HashAlgorithm,
    secret: &[u8],
    full_seed: &[u8],
    output_len: usize,
) -> Result<PrfOutput, Error> {
    if output_len > 256 {
        return Err(Error::CryptoError(format!("PRF output too long: {}", output_len)));
    }
    let mut result = PrfOutput::default();

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut a = hmac_parts(hash, secret, &[full_seed])?;

    while result.len() < output_len {
        // HMAC_hash(secret, A(i) + seed)
        let output = hmac_parts(hash, secret, &[&a[..], full_seed])?;

        let remaining = output_len - result.len();
        let to_copy = remaining.min(output.len());
        result.extend_from_slice(&output[..to_copy]);

        if result.len() < output_len {
            // A(i+1) = HMAC_hash(secret, A(i))
            a = hmac_parts(hash, secret, &[&a[..]])?;
        }
    }

    Ok(result)
}

/// SSLv3 expansion: MD5(secret + SHA1("A" + secret + seed)) +
/// MD5(secret + SHA1("BB" + secret + seed)) + ...
fn ssl3_expand(secret: &[u8], seed: &[u8], output_len: usize) -> Result<PrfOutput, Error> {
    // One MD5 block per round.
    if output_len > 16 * 16 {
        return Err(Error::CryptoError("SSLv3 expansion too long".into()));
    }
    let mut out = PrfOutput::default();
    let mut round = 0u8;
    while out.len() < output_len {
        let salt = [b'A' + round; 16];
        let salt = &salt[..round as usize + 1];
        let inner = Hash::digest(HashAlgorithm::Sha1, &[salt, secret, seed]);
        let block = Hash::digest(HashAlgorithm::Md5, &[secret, &inner[..]]);
        let to_copy = (output_len - out.len()).min(block.len());
        out.extend_from_slice(&block[..to_copy]);
        round += 1;
    }
    Ok(out)
}

/// master_secret = PRF(pre_master_secret, "master secret",
///                     ClientHello.random + ServerHello.random)[0..47]
pub fn master_secret(
    version: ProtocolVersion,
    hash: HashAlgorithm,
    pre_master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);

    let out = if version.is_ssl3() {
        ssl3_expand(pre_master_secret, &seed, 48)?
    } else {
        prf(version, hash, pre_master_secret, "master secret", &seed, 48)?
    };
    Ok(Zeroizing::new(out.to_vec()))
}

/// Key expansion
/// as specified in RFC 5246 Section 6.3
pub fn key_expansion(
    version: ProtocolVersion,
    hash: HashAlgorithm,
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    key_material_length: usize,
) -> Result<PrfOutput, Error> {
    // For key expansion, the seed is server_random + client_random
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);

    if version.is_ssl3() {
        ssl3_expand(master_secret, &seed, key_material_length)
    } else {
        prf(
            version,
            hash,
            master_secret,
            "key expansion",
            &seed,
            key_material_length,
        )
    }
}

const SSL3_CLIENT_SENDER: [u8; 4] = [0x43, 0x4C, 0x4E, 0x54];
const SSL3_SERVER_SENDER: [u8; 4] = [0x53, 0x52, 0x56, 0x52];

/// Contents of a Finished message for the transcript so far.
///
/// `is_client` names the side that sends the Finished, not the local role.
pub fn finished_verify_data(
    version: ProtocolVersion,
    prf_hash: HashAlgorithm,
    master_secret: &[u8],
    handshake_hash: &HandshakeHash,
    is_client: bool,
) -> Result<Vec<u8>, Error> {
    if version.is_ssl3() {
        let sender = if is_client {
            SSL3_CLIENT_SENDER
        } else {
            SSL3_SERVER_SENDER
        };
        let (md5, sha1) = handshake_hash.legacy_digests()?;
        let mut out = ssl3_finished_part(md5, &sender, master_secret, 48);
        out.extend_from_slice(&ssl3_finished_part(sha1, &sender, master_secret, 40));
        return Ok(out);
    }

    let label = if is_client {
        "client finished"
    } else {
        "server finished"
    };
    let transcript = handshake_hash.finished_hash()?;
    let out = prf(version, prf_hash, master_secret, label, &transcript, 12)?;
    Ok(out.to_vec())
}

fn ssl3_finished_part(mut hash: Hash, sender: &[u8], master: &[u8], pad_len: usize) -> Vec<u8> {
    let alg = hash.algorithm();
    hash.update(sender);
    hash.update(master);
    hash.update(&[0x36; 48][..pad_len]);
    let inner = hash.clone_and_finalize();
    Hash::digest(alg, &[master, &[0x5c; 48][..pad_len], &inner[..]])
}

/// Both directions' keys for one suite, split out of the key block.
pub struct KeyMaterial {
    version: ProtocolVersion,
    shape: SuiteShape,
    client_mac: Zeroizing<Vec<u8>>,
    server_mac: Zeroizing<Vec<u8>>,
    client_key: Zeroizing<Vec<u8>>,
    server_key: Zeroizing<Vec<u8>>,
    client_iv: Zeroizing<Vec<u8>>,
    server_iv: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    /// Expand `master_secret` and split the key block.
    ///
    /// CBC from TLS 1.1 on derives no IV since every record carries its own.
    pub fn derive(
        version: ProtocolVersion,
        shape: SuiteShape,
        prf_hash: HashAlgorithm,
        master_secret: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<Self, Error> {
        let info = shape.cipher.info();
        let mac_len = if info.cipher_type == CipherType::Aead {
            0
        } else {
            shape.mac.size()
        };
        let iv_len = match info.cipher_type {
            CipherType::Aead => info.fixed_iv_size,
            CipherType::Block if version.use_tls11_plus() => 0,
            _ => info.iv_size,
        };
        let key_len = info.key_size;

        let total = 2 * (mac_len + key_len + iv_len);
        let block = key_expansion(
            version,
            prf_hash,
            master_secret,
            client_random,
            server_random,
            total,
        )?;

        let mut rest = &block[..];
        let mut take = |n: usize| {
            let (head, tail) = rest.split_at(n);
            rest = tail;
            Zeroizing::new(head.to_vec())
        };

        let client_mac = take(mac_len);
        let server_mac = take(mac_len);
        let client_key = take(key_len);
        let server_key = take(key_len);
        let client_iv = take(iv_len);
        let server_iv = take(iv_len);

        trace!(
            "Key block {} bytes for {} / {:?}",
            total,
            shape.cipher,
            shape.mac
        );

        Ok(KeyMaterial {
            version,
            shape,
            client_mac,
            server_mac,
            client_key,
            server_key,
            client_iv,
            server_iv,
        })
    }

    pub fn shape(&self) -> SuiteShape {
        self.shape
    }

    /// Inbound state: the peer's write keys.
    pub fn read_state(&self, is_client: bool) -> Result<(Authenticator, CipherBox), Error> {
        if is_client {
            self.build(&self.server_mac, &self.server_key, &self.server_iv, Direction::Decrypt)
        } else {
            self.build(&self.client_mac, &self.client_key, &self.client_iv, Direction::Decrypt)
        }
    }

    /// Outbound state: our own write keys.
    pub fn write_state(&self, is_client: bool) -> Result<(Authenticator, CipherBox), Error> {
        if is_client {
            self.build(&self.client_mac, &self.client_key, &self.client_iv, Direction::Encrypt)
        } else {
            self.build(&self.server_mac, &self.server_key, &self.server_iv, Direction::Encrypt)
        }
    }

    fn build(
        &self,
        mac_key: &[u8],
        key: &[u8],
        iv: &[u8],
        direction: Direction,
    ) -> Result<(Authenticator, CipherBox), Error> {
        let cipher = self.shape.cipher;
        let iv = if iv.is_empty() { None } else { Some(iv) };
        let cipher_box = CipherBox::new(cipher, self.version, direction, key, iv)?;

        let authenticator = if cipher.cipher_type() == CipherType::Aead {
            Authenticator::aead(self.version)
        } else if self.shape.mac == MacAlg::Null {
            Authenticator::null(self.version)
        } else {
            Authenticator::Mac(Mac::new(self.shape.mac, self.version, mac_key)?)
        };

        Ok((authenticator, cipher_box))
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("version", &self.version)
            .field("shape", &self.shape)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buf;
    use crate::crypto::suite::BulkCipher;
    use crate::rng::SeededRng;
    use crate::types::ContentType;

    #[test]
    fn tls12_prf_sha256_vector() {
        let secret = [
            0x9b, 0xbe, 0x43, 0x6b, 0xa9, 0x40, 0xf0, 0x17, 0xb1, 0x76, 0x52, 0x84, 0x9a, 0x71,
            0xdb, 0x35,
        ];
        let seed = [
            0xa0, 0xba, 0x9f, 0x93, 0x6c, 0xda, 0x31, 0x18, 0x27, 0xa6, 0xf7, 0x96, 0xff, 0xd5,
            0x19, 0x8c,
        ];
        let out = prf_tls12(&secret, "test label", &seed, 100, HashAlgorithm::Sha256).unwrap();
        assert_eq!(out.len(), 100);
        assert_eq!(
            &out[..16],
            &[
                0xe3, 0xf2, 0x29, 0xba, 0x72, 0x7b, 0xe1, 0x7b, 0x8d, 0x12, 0x26, 0x20, 0x55, 0x7c,
                0xd4, 0x53
            ]
        );
    }

    #[test]
    fn tls12_prf_rejects_legacy_hash() {
        assert!(prf_tls12(b"s", "l", b"x", 12, HashAlgorithm::Md5).is_err());
    }

    #[test]
    fn tls10_prf_mixes_both_halves() {
        let a = prf_tls10(b"secret!", "label", b"seed", 40).unwrap();
        let b = prf_tls10(b"secret?", "label", b"seed", 40).unwrap();
        assert_eq!(a.len(), 40);
        // The last byte of the secret only feeds P_SHA1.
        assert_ne!(a, b);
        let c = prf_tls12(b"secret!", "label", b"seed", 40, HashAlgorithm::Sha256).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn ssl3_master_secret_length() {
        let ms = master_secret(
            ProtocolVersion::SSL3_0,
            HashAlgorithm::Sha256,
            &[1; 48],
            &[2; 32],
            &[3; 32],
        )
        .unwrap();
        assert_eq!(ms.len(), 48);
        assert!(prf(ProtocolVersion::SSL3_0, HashAlgorithm::Sha256, b"", "", b"", 1).is_err());
    }

    #[test]
    fn verify_data_lengths() {
        let mut hh = HandshakeHash::new();
        hh.update(b"transcript");
        hh.protocol_determined(ProtocolVersion::TLS1_0);
        let ms = [7u8; 48];
        let c = finished_verify_data(ProtocolVersion::TLS1_0, HashAlgorithm::Sha256, &ms, &hh, true)
            .unwrap();
        let s =
            finished_verify_data(ProtocolVersion::TLS1_0, HashAlgorithm::Sha256, &ms, &hh, false)
                .unwrap();
        assert_eq!(c.len(), 12);
        assert_ne!(c, s);

        let mut hh = HandshakeHash::new();
        hh.protocol_determined(ProtocolVersion::SSL3_0);
        hh.update(b"transcript");
        let v = finished_verify_data(ProtocolVersion::SSL3_0, HashAlgorithm::Sha256, &ms, &hh, true)
            .unwrap();
        assert_eq!(v.len(), 36);
    }

    #[test]
    fn key_material_pairs_directions() {
        let shape = SuiteShape::new(BulkCipher::Aes128Gcm, MacAlg::Null);
        let km = KeyMaterial::derive(
            ProtocolVersion::TLS1_2,
            shape,
            HashAlgorithm::Sha256,
            &[5; 48],
            &[1; 32],
            &[2; 32],
        )
        .unwrap();

        let (mut wa, mut wb) = km.write_state(true).unwrap();
        let (mut ra, mut rb) = km.read_state(false).unwrap();

        let mut rng = SeededRng::new(Some(3));
        let nonce = wb
            .create_explicit_nonce(&mut wa, ContentType::ApplicationData, 5, &mut rng)
            .unwrap();
        let mut buf = Buf::from_slice(&nonce);
        buf.extend_from_slice(b"hello");
        wb.encrypt(&mut buf, nonce.len()).unwrap();

        let n = rb
            .apply_explicit_nonce(&mut ra, ContentType::ApplicationData, &buf)
            .unwrap();
        let len = rb.decrypt(&mut buf, n, 0).unwrap();
        assert_eq!(&buf[n..n + len], b"hello");
    }

    #[test]
    fn cbc_tls11_derives_no_iv() {
        let shape = SuiteShape::new(BulkCipher::Aes256Cbc, MacAlg::Sha);
        let km = KeyMaterial::derive(
            ProtocolVersion::TLS1_1,
            shape,
            HashAlgorithm::Sha256,
            &[5; 48],
            &[1; 32],
            &[2; 32],
        )
        .unwrap();
        assert!(km.client_iv.is_empty());
        let (auth, cb) = km.write_state(false).unwrap();
        assert_eq!(auth.mac_len(), 20);
        assert!(cb.is_cbc_mode());
    }
}
