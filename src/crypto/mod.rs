//! Record protection primitives: sequence numbers, MACs, bulk ciphers,
//! the handshake transcript hash and key derivation.

mod authenticator;
mod cipher_box;
mod handshake_hash;
mod hash;
mod mac;
pub mod prf;
mod suite;

pub use authenticator::{AuthBytes, Authenticator, Sequencer};
pub use cipher_box::{add_padding, check_padding, remove_padding};
pub use cipher_box::{CipherBox, Direction, ExplicitNonce, PaddingCheck, PADDING_CHECK_ITERATIONS};
pub use handshake_hash::HandshakeHash;
pub use hash::{Hash, HashAlgorithm};
pub use mac::{hmac_parts, Mac, MacTag};
pub use prf::KeyMaterial;
pub use suite::{header_size, BulkCipher, BulkCipherInfo, CipherType, MacAlg, MacAlgInfo};
pub use suite::{SuiteShape, DTLS_HEADER_SIZE, TLS_HEADER_SIZE};
