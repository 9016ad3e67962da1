//! DTLS over datagrams: cookies, lost flights, replay and reordering.

use std::sync::Arc;

use rimpl::{Config, Connection, ConnectionState, Error, ProtocolVersion, Transport};

use crate::common::*;

fn endpoints(config: &Arc<Config>) -> (Connection, Connection) {
    (
        client(config, Transport::Datagram, Client::new(ProtocolVersion::DTLS1_2, gcm())),
        server(config, Transport::Datagram, Server::new(gcm())),
    )
}

#[test]
fn cookie_exchange_precedes_server_hello() {
    init_log();
    let (mut c, mut s) = endpoints(&config());
    c.begin_handshake().unwrap();

    deliver(&drain(&mut c).packets, &mut s);
    let hvr = drain(&mut s);
    assert_eq!(hvr.packets.len(), 1);
    assert_eq!(dtls_records(&hvr.packets[0]), vec![(22, 0, 0)]);
    // HelloVerifyRequest
    assert_eq!(hvr.packets[0][13], 3);

    deliver(&hvr.packets, &mut c);
    let hello = drain(&mut c);
    assert_eq!(hello.packets[0][13], 1);
    // message_seq of the second ClientHello
    assert_eq!(&hello.packets[0][17..19], &[0, 1]);

    let (dc, ds) = run(&mut c, &mut s);
    assert!(dc.connected && ds.connected);
}

#[test]
fn dtls10_with_cbc() {
    init_log();
    let (mut c, mut s) = connected(Transport::Datagram, ProtocolVersion::DTLS1_0, cbc_sha());
    c.write_app_data(b"explicit iv").unwrap();
    let (_, ds) = run(&mut c, &mut s);
    assert_eq!(ds.app_data, vec![b"explicit iv".to_vec()]);
}

#[test]
fn lost_server_hello_flight_is_resent() {
    init_log();
    let (mut c, mut s) = endpoints(&config());
    c.begin_handshake().unwrap();

    deliver(&drain(&mut c).packets, &mut s);
    deliver(&drain(&mut s).packets, &mut c);
    deliver(&drain(&mut c).packets, &mut s);

    // ServerHello flight goes missing.
    let lost = drain(&mut s);
    assert!(!lost.packets.is_empty());

    // The client's timer fires. The server sees an old ClientHello and
    // answers with its flight again.
    assert!(c.retransmit().unwrap());
    deliver(&drain(&mut c).packets, &mut s);
    let again = drain(&mut s);
    assert_eq!(again.packets.len(), lost.packets.len());

    deliver(&again.packets, &mut c);
    let (dc, ds) = run(&mut c, &mut s);
    assert!(dc.connected && ds.connected);
}

#[test]
fn lost_final_flight_is_resent() {
    init_log();
    let (mut c, mut s) = endpoints(&config());
    c.begin_handshake().unwrap();

    let mut dropped = vec![];
    for _ in 0..3 {
        deliver(&drain(&mut c).packets, &mut s);
        let ds = drain(&mut s);
        if ds.connected {
            dropped = ds.packets;
            break;
        }
        deliver(&ds.packets, &mut c);
    }
    assert!(!dropped.is_empty());
    assert_eq!(s.state(), ConnectionState::Data);
    assert_eq!(c.state(), ConnectionState::Handshake);

    assert!(c.retransmit().unwrap());
    deliver(&drain(&mut c).packets, &mut s);
    let again = drain(&mut s);
    assert!(!again.packets.is_empty());
    let records: Vec<_> = again
        .packets
        .iter()
        .flat_map(|p| dtls_records(p))
        .map(|(t, epoch, _)| (t, epoch))
        .collect();
    assert_eq!(records, vec![(20, 0), (22, 1)]);

    deliver(&again.packets, &mut c);
    assert!(drain(&mut c).connected);
}

#[test]
fn replayed_datagram_is_dropped() {
    init_log();
    let (mut c, mut s) = connected(Transport::Datagram, ProtocolVersion::DTLS1_2, gcm());

    c.write_app_data(b"once").unwrap();
    let dc = drain(&mut c);
    deliver(&dc.packets, &mut s);
    deliver(&dc.packets, &mut s);

    assert_eq!(drain(&mut s).app_data, vec![b"once".to_vec()]);
}

#[test]
fn reordered_datagrams_are_accepted() {
    init_log();
    let (mut c, mut s) = connected(Transport::Datagram, ProtocolVersion::DTLS1_2, gcm());

    c.write_app_data(b"first").unwrap();
    let first = drain(&mut c).packets;
    c.write_app_data(b"second").unwrap();
    let second = drain(&mut c).packets;

    deliver(&second, &mut s);
    deliver(&first, &mut s);
    assert_eq!(
        drain(&mut s).app_data,
        vec![b"second".to_vec(), b"first".to_vec()]
    );
}

#[test]
fn small_mtu_fragments_handshake() {
    init_log();
    let config = Arc::new(Config::builder().mtu(512).rng_seed(3).build().unwrap());
    let mut c = client(&config, Transport::Datagram, Client::new(ProtocolVersion::DTLS1_2, gcm()));
    let mut server_peer = Server::new(gcm());
    server_peer.chain = vec![vec![0xaa; 2000], vec![0xbb; 1500]];
    let mut s = server(&config, Transport::Datagram, server_peer);

    c.begin_handshake().unwrap();
    deliver(&drain(&mut c).packets, &mut s);
    deliver(&drain(&mut s).packets, &mut c);
    deliver(&drain(&mut c).packets, &mut s);

    let flight = drain(&mut s);
    assert!(flight.packets.len() > 6);
    assert!(flight.packets.iter().all(|p| p.len() <= 512));

    deliver(&flight.packets, &mut c);
    let (dc, ds) = run(&mut c, &mut s);
    assert!(dc.connected && ds.connected);
}

#[test]
fn renegotiation_is_refused() {
    init_log();
    let (mut c, mut s) = connected(Transport::Datagram, ProtocolVersion::DTLS1_2, gcm());
    assert!(matches!(s.begin_handshake(), Err(Error::IllegalState(_))));
    assert!(matches!(c.begin_handshake(), Err(Error::IllegalState(_))));
    assert_eq!(s.state(), ConnectionState::Data);
}
