//! Handshake ordering and renegotiation seen through whole connections.

use rimpl::{AlertDescription, ConnectionState, ProtocolVersion, Transport};

use crate::common::*;

#[test]
fn finished_before_server_hello() {
    init_log();
    let config = config();
    let mut c = client(&config, Transport::Stream, Client::new(ProtocolVersion::TLS1_2, gcm()));
    c.begin_handshake().unwrap();
    drain(&mut c);

    let mut record = vec![22, 3, 3, 0, 16, 20, 0, 0, 12];
    record.extend_from_slice(&[0; 12]);
    let err = c.handle_packet(&record).unwrap_err();
    assert_eq!(err.alert(), AlertDescription::UnexpectedMessage);

    let out = drain(&mut c);
    assert_eq!(out.packets, vec![vec![21, 3, 1, 0, 2, 2, 10]]);
}

#[test]
fn server_rejects_server_hello() {
    init_log();
    let config = config();
    let mut s = server(&config, Transport::Stream, Server::new(gcm()));
    let mut record = vec![22, 3, 3, 0, 38, 2, 0, 0, 34, 3, 3];
    record.extend_from_slice(&[0; 32]);
    let err = s.handle_packet(&record).unwrap_err();
    assert_eq!(err.alert(), AlertDescription::UnexpectedMessage);
    assert_eq!(s.state(), ConnectionState::Closed);
}

#[test]
fn large_certificate_spans_records() {
    init_log();
    let config = config();
    let peer = Client::new(ProtocolVersion::TLS1_2, gcm());
    let seen = peer.seen.clone();
    let mut c = client(&config, Transport::Stream, peer);
    let mut server_peer = Server::new(gcm());
    server_peer.chain = vec![vec![0x30; 20_000], vec![0x31; 9_000]];
    let mut s = server(&config, Transport::Stream, server_peer);

    c.begin_handshake().unwrap();
    deliver(&drain(&mut c).packets, &mut s);
    let flight = drain(&mut s);
    let handshake_records = flight
        .packets
        .iter()
        .flat_map(|p| tls_records(p))
        .filter(|(t, _)| *t == 22)
        .count();
    assert!(handshake_records >= 2);

    deliver(&flight.packets, &mut c);
    let (dc, ds) = run(&mut c, &mut s);
    assert!(dc.connected && ds.connected);
    // Two length prefixed certificates.
    assert_eq!(seen.lock().unwrap().certificate.len(), 3 + 20_000 + 3 + 9_000);
}

#[test]
fn client_renegotiates_with_data_in_flight() {
    init_log();
    let (mut c, mut s) = connected(Transport::Stream, ProtocolVersion::TLS1_2, gcm());

    c.begin_handshake().unwrap();
    assert_eq!(c.state(), ConnectionState::Renegotiate);
    s.write_app_data(b"meanwhile").unwrap();

    let (dc, ds) = run(&mut c, &mut s);
    assert!(dc.connected && ds.connected);
    assert_eq!(dc.app_data, vec![b"meanwhile".to_vec()]);
    assert_eq!(c.state(), ConnectionState::Data);
    assert_eq!(s.state(), ConnectionState::Data);

    c.write_app_data(b"fresh keys").unwrap();
    let (_, ds) = run(&mut c, &mut s);
    assert_eq!(ds.app_data, vec![b"fresh keys".to_vec()]);
}

#[test]
fn server_requests_renegotiation() {
    init_log();
    let (mut c, mut s) = connected(Transport::Packet, ProtocolVersion::TLS1_2, gcm());

    s.begin_handshake().unwrap();
    let hello_request = drain(&mut s);
    assert_eq!(hello_request.packets.len(), 1);

    deliver(&hello_request.packets, &mut c);
    assert_eq!(c.state(), ConnectionState::Renegotiate);

    let (dc, ds) = run(&mut c, &mut s);
    assert!(dc.connected && ds.connected);
}

#[test]
fn close_after_handshake() {
    init_log();
    let (mut c, mut s) = connected(Transport::Stream, ProtocolVersion::TLS1_2, gcm());
    s.write_app_data(b"bye").unwrap();
    s.close();

    let (at_server, at_client) = run(&mut s, &mut c);
    assert_eq!(at_client.app_data, vec![b"bye".to_vec()]);
    assert!(at_client.closed);
    assert!(at_server.closed);
    assert_eq!(c.state(), ConnectionState::Closed);
    assert_eq!(c.close_reason(), None);
}
