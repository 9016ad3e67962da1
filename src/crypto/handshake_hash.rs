//! Running transcript hash of the handshake.
//!
//! Until the protocol version is negotiated the transcript is only
//! buffered. [`HandshakeHash::protocol_determined`] then picks the digest
//! layout: MD5 and SHA-1 side by side before TLS 1.2, or a single digest
//! named by the cipher suite from TLS 1.2 on.

use super::hash::{Hash, HashAlgorithm};
use crate::types::ProtocolVersion;
use crate::Error;

#[derive(Debug)]
enum Mode {
    /// Version not known yet. Everything goes to `data`.
    Pending,
    /// SSLv3, TLS 1.0 and TLS 1.1.
    Legacy { md5: Hash, sha1: Hash },
    /// TLS 1.2 and DTLS 1.2. The Finished digest is chosen by the suite.
    Tls12 { finished: Option<Hash> },
}

#[derive(Debug)]
pub struct HandshakeHash {
    mode: Mode,
    /// Raw transcript. Kept in TLS 1.2 mode for CertificateVerify and a
    /// late `set_finished_alg`.
    data: Vec<u8>,
    reserved: Vec<u8>,
}

impl Default for HandshakeHash {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeHash {
    pub fn new() -> Self {
        HandshakeHash {
            mode: Mode::Pending,
            data: Vec::new(),
            reserved: Vec::new(),
        }
    }

    pub fn is_determined(&self) -> bool {
        !matches!(self.mode, Mode::Pending)
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match &mut self.mode {
            Mode::Pending => self.data.extend_from_slice(bytes),
            Mode::Legacy { md5, sha1 } => {
                md5.update(bytes);
                sha1.update(bytes);
            }
            Mode::Tls12 { finished } => {
                self.data.extend_from_slice(bytes);
                if let Some(h) = finished {
                    h.update(bytes);
                }
            }
        }
    }

    /// Hold back a message that must not be part of its own hash.
    pub fn reserve(&mut self, bytes: &[u8]) {
        self.reserved.extend_from_slice(bytes);
    }

    /// Feed held back bytes into the transcript.
    pub fn reload(&mut self) {
        if self.reserved.is_empty() {
            return;
        }
        let reserved = std::mem::take(&mut self.reserved);
        self.update(&reserved);
    }

    /// Drop the buffered transcript. Only legal before the version is known,
    /// e.g. when a HelloRequest or HelloVerifyRequest restarts the exchange.
    pub fn reset(&mut self) -> Result<(), Error> {
        if self.is_determined() {
            return Err(Error::IllegalState(
                "handshake hash reset after protocol determined",
            ));
        }
        self.data.clear();
        self.reserved.clear();
        Ok(())
    }

    /// Lock in the digest layout and replay what was buffered.
    /// Later calls are ignored.
    pub fn protocol_determined(&mut self, version: ProtocolVersion) {
        if self.is_determined() {
            return;
        }

        if version.use_tls12_plus() {
            debug!("Handshake hash locked to single digest for {}", version);
            self.mode = Mode::Tls12 { finished: None };
        } else {
            debug!("Handshake hash locked to MD5+SHA1 for {}", version);
            let mut md5 = Hash::new(HashAlgorithm::Md5);
            let mut sha1 = Hash::new(HashAlgorithm::Sha1);
            md5.update(&self.data);
            sha1.update(&self.data);
            self.data.clear();
            self.mode = Mode::Legacy { md5, sha1 };
        }
    }

    /// Select the Finished digest in TLS 1.2 mode.
    pub fn set_finished_alg(&mut self, alg: HashAlgorithm) -> Result<(), Error> {
        match &mut self.mode {
            Mode::Tls12 { finished } => {
                if let Some(h) = finished {
                    if h.algorithm() != alg {
                        return Err(Error::IllegalState("finished hash algorithm already set"));
                    }
                    return Ok(());
                }
                let mut h = Hash::new(alg);
                h.update(&self.data);
                *finished = Some(h);
                Ok(())
            }
            Mode::Pending => Err(Error::IllegalState(
                "finished hash algorithm before protocol determined",
            )),
            Mode::Legacy { .. } => Err(Error::IllegalState(
                "finished hash algorithm only applies to TLS 1.2",
            )),
        }
    }

    /// Digest of the transcript so far. May be taken repeatedly.
    ///
    /// Before TLS 1.2 this is MD5 followed by SHA-1 (36 bytes).
    pub fn finished_hash(&self) -> Result<Vec<u8>, Error> {
        match &self.mode {
            Mode::Tls12 {
                finished: Some(h), ..
            } => Ok(h.clone_and_finalize()),
            Mode::Tls12 { finished: None } => {
                Err(Error::IllegalState("finished hash algorithm not set"))
            }
            Mode::Legacy { md5, sha1 } => {
                let mut out = md5.clone_and_finalize();
                out.extend_from_slice(&sha1.clone_and_finalize());
                Ok(out)
            }
            Mode::Pending => Err(Error::IllegalState(
                "finished hash before protocol determined",
            )),
        }
    }

    /// Copies of the running MD5 and SHA-1 digests, for SSLv3 Finished and
    /// pre-TLS 1.2 CertificateVerify.
    pub fn legacy_digests(&self) -> Result<(Hash, Hash), Error> {
        match &self.mode {
            Mode::Legacy { md5, sha1 } => Ok((md5.clone(), sha1.clone())),
            _ => Err(Error::IllegalState("MD5/SHA1 digests only before TLS 1.2")),
        }
    }

    /// The raw transcript, signed by a TLS 1.2 CertificateVerify.
    pub fn all_handshake_messages(&self) -> Result<&[u8], Error> {
        match &self.mode {
            Mode::Tls12 { .. } => Ok(&self.data),
            _ => Err(Error::IllegalState("raw transcript only kept for TLS 1.2")),
        }
    }
}
