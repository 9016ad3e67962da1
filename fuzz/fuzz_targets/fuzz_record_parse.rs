#![no_main]

//! Fuzz target for record decoding.
//!
//! Feeds the input to all three record readers, first as-is and then
//! behind a plausible record header so the body parsers get exercised.
//!
//! TLS record: type(1) | version(2) | length(2) | fragment
//! DTLS record: type(1) | version(2) | epoch(2) | sequence(6) | length(2) | fragment

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

use rimpl::record::{InputRecord, Transport};
use rimpl::{Config, MAX_FRAGMENT_SIZE};

fn decode_all(config: &Arc<Config>, transport: Transport, data: &[u8]) {
    let mut input = InputRecord::new(Arc::clone(config), transport);
    let mut rest = data;
    // Decoding stops after a ChangeCipherSpec; keep going a few times.
    for _ in 0..8 {
        match input.decode(rest) {
            Ok(d) if d.plaintexts.is_empty() && d.consumed == 0 => break,
            Ok(d) => rest = &rest[d.consumed.min(rest.len())..],
            Err(_) => break,
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let config = Arc::new(Config::builder().enable_sslv2_hello(true).build().unwrap());

    for transport in [Transport::Stream, Transport::Packet, Transport::Datagram] {
        decode_all(&config, transport, data);
    }

    if data.is_empty() {
        return;
    }
    let frag_len = data.len().min(MAX_FRAGMENT_SIZE);

    let mut tls = Vec::with_capacity(5 + frag_len);
    tls.push(22u8);
    tls.extend_from_slice(&[0x03, 0x03]);
    tls.extend_from_slice(&(frag_len as u16).to_be_bytes());
    tls.extend_from_slice(&data[..frag_len]);
    decode_all(&config, Transport::Stream, &tls);

    let mut dtls = Vec::with_capacity(13 + frag_len);
    dtls.push(22u8);
    dtls.extend_from_slice(&[0xFE, 0xFD]);
    dtls.extend_from_slice(&[0, 0]);
    dtls.extend_from_slice(&[0, 0, 0, 0, 0, 1]);
    dtls.extend_from_slice(&(frag_len as u16).to_be_bytes());
    dtls.extend_from_slice(&data[..frag_len]);
    decode_all(&config, Transport::Datagram, &dtls);
});
