mod common;

mod cbc;
mod dtls;
mod handshake;
mod status;
mod stream;
