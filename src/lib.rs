//! rimpl is the record layer of TLS 1.0 to 1.2 and DTLS 1.0/1.2.
//!
//! It protects and parses records over three transports, reassembles and
//! fragments DTLS handshake flights, enforces handshake message order and
//! carries the OCSP stapling plumbing (`status_request` and
//! `status_request_v2`). Key exchange and certificate handling are left
//! to a [`HandshakeConsumer`] supplied by the caller.
//!
//! # Sans-IO
//!
//! Nothing in the crate does I/O. A [`Connection`] is fed received bytes
//! with [`Connection::handle_packet`] and drained with
//! [`Connection::poll_output`]:
//!
//! ```text
//!   socket ──▶ handle_packet ──▶ InputRecord ──▶ Handshaker / app data
//!                                                      │
//!   socket ◀── poll_output ◀── OutputRecord ◀──────────┘
//! ```
//!
//! The one place threads appear is the [`StatusResponseManager`], which
//! fetches OCSP responses on a small worker pool, and delegated handshake
//! tasks that the caller may run wherever it likes.
//!
//! # Cipher suites
//!
//! Bulk ciphers are RC4-128, AES-128/256-CBC and AES-128/256-GCM, with
//! HMAC over MD5, SHA-1, SHA-256 or SHA-384 where the cipher needs a MAC.
//! The pre-1.1 CBC predictable IV problem is avoided with a 1/n-1 record
//! split when [`ConfigBuilder::cbc_split`] is on.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]

#[macro_use]
extern crate log;

mod buffer;
pub use buffer::Buf;

mod config;
pub use config::{Config, ConfigBuilder, MAX_FRAGMENT_SIZE, MAX_TLS_PACKET_SIZE};

mod error;
pub use error::Error;

mod rng;
mod util;
mod window;
pub use window::ReplayWindow;

pub mod types;

pub mod crypto;
pub mod dtls;
pub mod handshake;
pub mod record;
pub mod status;

mod connection;
pub use connection::{Connection, ConnectionState, Output, TaskRunner};

pub use handshake::{HandshakeConsumer, HandshakeContext, HandshakeMessage, StateMessage};
pub use record::Transport;
pub use status::StatusResponseManager;
pub use types::{AlertDescription, AlertLevel, ContentType, HandshakeType, ProtocolVersion};
