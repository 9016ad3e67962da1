//! TLS over byte streams and caller-framed packets.

use rimpl::crypto::{BulkCipher, MacAlg, SuiteShape};
use rimpl::{ConnectionState, ProtocolVersion, Transport, MAX_FRAGMENT_SIZE};

use crate::common::*;

#[test]
fn handshake_one_byte_at_a_time() {
    init_log();
    let config = config();
    let mut c = client(&config, Transport::Stream, Client::new(ProtocolVersion::TLS1_2, gcm()));
    let mut s = server(&config, Transport::Stream, Server::new(gcm()));
    c.begin_handshake().unwrap();

    let mut connected = (false, false);
    for _ in 0..10 {
        let dc = drain(&mut c);
        for p in &dc.packets {
            for b in p.chunks(1) {
                assert_eq!(s.handle_packet(b).unwrap(), 1);
            }
        }
        let ds = drain(&mut s);
        for p in &ds.packets {
            for b in p.chunks(1) {
                assert_eq!(c.handle_packet(b).unwrap(), 1);
            }
        }
        connected.0 |= dc.connected;
        connected.1 |= ds.connected;
        if dc.packets.is_empty() && ds.packets.is_empty() {
            break;
        }
    }

    assert_eq!(connected, (true, true));
    assert_eq!(c.state(), ConnectionState::Data);
    assert_eq!(s.state(), ConnectionState::Data);
}

#[test]
fn suites_across_versions() {
    init_log();
    let cases = [
        (ProtocolVersion::TLS1_0, SuiteShape::new(BulkCipher::Rc4_128, MacAlg::Md5)),
        (ProtocolVersion::TLS1_0, SuiteShape::new(BulkCipher::Aes128Cbc, MacAlg::Sha)),
        (ProtocolVersion::TLS1_1, SuiteShape::new(BulkCipher::Aes256Cbc, MacAlg::Sha)),
        (ProtocolVersion::TLS1_2, SuiteShape::new(BulkCipher::Aes128Cbc, MacAlg::Sha256)),
        (ProtocolVersion::TLS1_2, SuiteShape::new(BulkCipher::Aes256Cbc, MacAlg::Sha384)),
        (ProtocolVersion::TLS1_2, SuiteShape::new(BulkCipher::Aes256Gcm, MacAlg::Null)),
    ];

    for (version, shape) in cases {
        let (mut c, mut s) = connected(Transport::Stream, version, shape);
        assert_eq!(c.version(), Some(version), "{:?}", shape);

        c.write_app_data(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        s.write_app_data(b"HTTP/1.0 200 OK\r\n\r\n").unwrap();
        let (dc, ds) = run(&mut c, &mut s);
        assert_eq!(ds.app_data.concat(), b"GET / HTTP/1.0\r\n\r\n", "{:?}", shape);
        assert_eq!(dc.app_data.concat(), b"HTTP/1.0 200 OK\r\n\r\n", "{:?}", shape);
    }
}

#[test]
fn large_write_is_fragmented() {
    init_log();
    let (mut c, mut s) = connected(Transport::Stream, ProtocolVersion::TLS1_2, gcm());

    let data: Vec<u8> = (0..40_000u32).map(|i| i as u8).collect();
    c.write_app_data(&data).unwrap();

    let dc = drain(&mut c);
    assert_eq!(dc.packets.len(), 1);
    let records = tls_records(&dc.packets[0]);
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|(t, _)| *t == 23));
    // Nonce and tag around a full fragment.
    assert_eq!(records[0].1, MAX_FRAGMENT_SIZE + 8 + 16);

    deliver(&dc.packets, &mut s);
    let ds = drain(&mut s);
    assert_eq!(ds.app_data.len(), 3);
    assert_eq!(ds.app_data.concat(), data);
}

#[test]
fn packet_transport_leaves_partial_record() {
    init_log();
    let (mut c, mut s) = connected(Transport::Packet, ProtocolVersion::TLS1_2, gcm());

    c.write_app_data(b"one").unwrap();
    c.write_app_data(b"two").unwrap();
    let dc = drain(&mut c);
    assert_eq!(dc.packets.len(), 2);

    let mut wire = dc.packets[0].clone();
    wire.extend_from_slice(&dc.packets[1][..7]);
    assert_eq!(s.handle_packet(&wire).unwrap(), dc.packets[0].len());
    assert_eq!(s.handle_packet(&dc.packets[1]).unwrap(), dc.packets[1].len());

    let ds = drain(&mut s);
    assert_eq!(ds.app_data, vec![b"one".to_vec(), b"two".to_vec()]);
}

#[test]
fn plaintext_garbage_is_rejected() {
    init_log();
    let config = config();
    let mut s = server(&config, Transport::Stream, Server::new(gcm()));
    let err = s.handle_packet(b"GET / HTTP/1.1\r\n").unwrap_err();
    assert_eq!(err.alert(), rimpl::AlertDescription::UnexpectedMessage);
    assert_eq!(s.state(), ConnectionState::Closed);
}
