#![no_main]

//! Fuzz target for whole-connection packet handling.
//!
//! A server and a client connection, each fed the input as one packet.
//! The handshake peers below only know hello messages, so anything
//! further is rejected by ordering; we are looking for panics.

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

use rimpl::{Config, Connection, Error, HandshakeConsumer, HandshakeContext};
use rimpl::{HandshakeMessage, HandshakeType, Output, StateMessage, Transport};

struct Peer;

impl HandshakeConsumer for Peer {
    fn kickstart(&mut self, ctx: &mut HandshakeContext) -> Result<(), Error> {
        if ctx.is_client() {
            let mut body = vec![0xFE, 0xFD];
            body.extend_from_slice(&[0; 32]);
            body.push(0);
            ctx.send(
                StateMessage::ClientHello {
                    has_cookie: false,
                    has_session_id: false,
                },
                &body,
            )
        } else {
            ctx.send(StateMessage::HelloRequest, &[])
        }
    }

    fn consume(
        &mut self,
        message: &HandshakeMessage,
        _ctx: &mut HandshakeContext,
    ) -> Result<StateMessage, Error> {
        match message.msg_type {
            HandshakeType::ClientHello => Ok(StateMessage::ClientHello {
                has_cookie: message.body().get(34).map(|n| *n > 0).unwrap_or(false),
                has_session_id: false,
            }),
            HandshakeType::HelloVerifyRequest => Ok(StateMessage::HelloVerifyRequest),
            HandshakeType::HelloRequest => Ok(StateMessage::HelloRequest),
            t => Err(Error::unexpected(t)),
        }
    }
}

fn drain(c: &mut Connection) {
    for _ in 0..16 {
        match c.poll_output() {
            Output::Idle => break,
            Output::NeedTask => {
                if let Some(task) = c.delegated_task() {
                    task();
                }
            }
            _ => {}
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let config = Arc::new(Config::default());

    for transport in [Transport::Datagram, Transport::Stream] {
        for is_client in [false, true] {
            let mut c = Connection::new(Arc::clone(&config), transport, is_client, Box::new(Peer));
            if is_client {
                let _ = c.begin_handshake();
                drain(&mut c);
            }
            // Ignore errors - we're looking for panics, not handling errors
            let _ = c.handle_packet(data);
            drain(&mut c);
            let _ = c.handle_packet(data);
            drain(&mut c);
        }
    }
});
