//! Handshake framing, ordering and the glue to the record layer.

mod handshaker;
mod message;
mod state;

#[cfg(test)]
pub(crate) mod test_peers;

pub use handshaker::{DelegatedTask, HandshakeConsumer, HandshakeContext, Handshaker, Outbound};
pub use message::{frame_dtls, frame_tls, parse_dtls_fragments};
pub use message::{HandshakeAssembler, HandshakeFragment, HandshakeHeader, HandshakeMessage};
pub use message::MAX_HANDSHAKE_MESSAGE_SIZE;
pub use state::{HandshakeState, HandshakeStateManager, ServerHelloFacts};
pub use state::{ServerKeyExchangeNeed, StateMessage};
