//! CBC records: the TLS 1.0 1/n-1 split and padding failures.

use std::sync::Arc;

use rimpl::crypto::{BulkCipher, MacAlg, SuiteShape};
use rimpl::{AlertDescription, Config, ProtocolVersion, Transport};

use crate::common::*;

fn app_records(packets: &[Vec<u8>]) -> usize {
    packets
        .iter()
        .flat_map(|p| tls_records(p))
        .filter(|(t, _)| *t == 23)
        .count()
}

#[test]
fn split_from_second_write_at_tls10() {
    init_log();
    let (mut c, mut s) = connected(Transport::Stream, ProtocolVersion::TLS1_0, cbc_sha());

    c.write_app_data(b"first").unwrap();
    let dc = drain(&mut c);
    assert_eq!(app_records(&dc.packets), 1);
    deliver(&dc.packets, &mut s);

    c.write_app_data(b"second").unwrap();
    let dc = drain(&mut c);
    assert_eq!(app_records(&dc.packets), 2);
    deliver(&dc.packets, &mut s);

    let ds = drain(&mut s);
    assert_eq!(
        ds.app_data,
        vec![b"first".to_vec(), b"s".to_vec(), b"econd".to_vec()]
    );
}

#[test]
fn no_split_with_explicit_iv() {
    init_log();
    let (mut c, _) = connected(Transport::Stream, ProtocolVersion::TLS1_1, cbc_sha());
    c.write_app_data(b"first").unwrap();
    c.write_app_data(b"second").unwrap();
    assert_eq!(app_records(&drain(&mut c).packets), 2);
}

#[test]
fn split_can_be_disabled() {
    init_log();
    let config = Arc::new(Config::builder().cbc_split(false).build().unwrap());
    let mut c = client(&config, Transport::Stream, Client::new(ProtocolVersion::TLS1_0, cbc_sha()));
    let mut s = server(&config, Transport::Stream, Server::new(cbc_sha()));
    c.begin_handshake().unwrap();
    run(&mut c, &mut s);

    c.write_app_data(b"first").unwrap();
    c.write_app_data(b"second").unwrap();
    assert_eq!(app_records(&drain(&mut c).packets), 2);
}

#[test]
fn single_byte_write_is_not_split() {
    init_log();
    let (mut c, _) = connected(Transport::Stream, ProtocolVersion::TLS1_0, cbc_sha());
    c.write_app_data(b"x").unwrap();
    c.write_app_data(b"y").unwrap();
    assert_eq!(app_records(&drain(&mut c).packets), 2);
}

#[test]
fn corrupt_padding_is_bad_record_mac() {
    init_log();
    let shape = SuiteShape::new(BulkCipher::Aes256Cbc, MacAlg::Sha256);
    let (mut c, mut s) = connected(Transport::Stream, ProtocolVersion::TLS1_2, shape);

    c.write_app_data(&[0x33; 100]).unwrap();
    let mut p = drain(&mut c).packets.remove(0);
    // Last ciphertext block, which holds the padding.
    let n = p.len();
    p[n - 20] ^= 0x01;

    let err = s.handle_packet(&p).unwrap_err();
    assert_eq!(err.alert(), AlertDescription::BadRecordMac);
    assert_eq!(s.close_reason(), Some(AlertDescription::BadRecordMac));
}
