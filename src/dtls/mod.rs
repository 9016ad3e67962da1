//! DTLS flight handling: reassembly of inbound handshake fragments and
//! fragmentation plus retransmission memory for outbound flights.

mod fragmenter;
mod hole;
mod reassembler;

pub use fragmenter::{Fragmenter, OutboundFragment};
pub use hole::{HoleDescriptor, HoleSet};
pub use reassembler::{FragmentBody, Reassembled, Reassembler, RecordFragment};
