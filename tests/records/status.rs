//! OCSP stapling driven by real handshakes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rimpl::status::{CertStatusRequest, OcspResponse, OcspStatusRequest, ResponseFetcher};
use rimpl::status::{StatusRequestExtension, StatusRequestV2Extension};
use rimpl::{Config, Error, ProtocolVersion, StatusResponseManager, Transport};

use crate::common::*;

struct Responder {
    down: AtomicBool,
}

impl ResponseFetcher for Responder {
    fn fetch(
        &self,
        cert: &[u8],
        issuer: &[u8],
        _request: &OcspStatusRequest,
    ) -> Result<OcspResponse, Error> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::CryptoError("responder down".into()));
        }
        let mut bytes = cert.to_vec();
        bytes.push(b'/');
        bytes.extend_from_slice(issuer);
        Ok(OcspResponse {
            bytes,
            next_update: None,
        })
    }
}

fn manager(down: bool) -> Arc<StatusResponseManager> {
    let config = Config::builder()
        .status_worker_threads(2)
        .status_response_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let responder = Arc::new(Responder {
        down: AtomicBool::new(down),
    });
    Arc::new(StatusResponseManager::new(&config, responder))
}

fn chain() -> Vec<Vec<u8>> {
    vec![b"leaf".to_vec(), b"sub".to_vec(), b"root".to_vec()]
}

fn v1_ocsp() -> StatusRequestExtension {
    StatusRequestExtension {
        request: Some(CertStatusRequest::Ocsp(OcspStatusRequest::default())),
    }
}

/// Handshake and return the client's CertificateStatus body, if any.
fn handshake(client_peer: Client, manager: Arc<StatusResponseManager>) -> Option<Vec<u8>> {
    let config = config();
    let seen = client_peer.seen.clone();
    let mut c = client(&config, Transport::Stream, client_peer);
    let mut s = server(
        &config,
        Transport::Stream,
        Server::new(gcm()).with_status(manager, chain()),
    );
    c.begin_handshake().unwrap();
    let (dc, ds) = run(&mut c, &mut s);
    assert!(dc.connected && ds.connected);
    let status = seen.lock().unwrap().status.clone();
    status
}

#[test]
fn ocsp_staples_end_entity() {
    init_log();
    let m = manager(false);
    let peer = Client::new(ProtocolVersion::TLS1_2, gcm()).request_status(Some(v1_ocsp()), None);

    let status = handshake(peer, m.clone()).unwrap();
    assert_eq!(status, b"\x01\x00\x00\x08leaf/sub".to_vec());
    assert_eq!(m.fetch_count(), 1);
}

#[test]
fn cached_response_is_reused() {
    init_log();
    let m = manager(false);
    for _ in 0..3 {
        let peer = Client::new(ProtocolVersion::TLS1_2, gcm()).request_status(Some(v1_ocsp()), None);
        assert!(handshake(peer, m.clone()).is_some());
    }
    assert_eq!(m.fetch_count(), 1);
    assert_eq!(m.cache_len(), 1);
}

#[test]
fn v2_multi_staples_the_chain() {
    init_log();
    let m = manager(false);
    let v2 = StatusRequestV2Extension {
        requests: vec![
            CertStatusRequest::Ocsp(OcspStatusRequest::default()),
            CertStatusRequest::OcspMulti(OcspStatusRequest::default()),
        ],
    };
    let peer = Client::new(ProtocolVersion::TLS1_2, gcm()).request_status(Some(v1_ocsp()), Some(v2));

    let status = handshake(peer, m.clone()).unwrap();
    let mut expected = vec![2, 0, 0, 8];
    expected.extend_from_slice(b"leaf/sub");
    expected.extend_from_slice(&[0, 0, 8]);
    expected.extend_from_slice(b"sub/root");
    assert_eq!(status, expected);
    assert_eq!(m.fetch_count(), 2);
}

#[test]
fn no_request_no_status() {
    init_log();
    let m = manager(false);
    let peer = Client::new(ProtocolVersion::TLS1_2, gcm());
    assert_eq!(handshake(peer, m.clone()), None);
    assert_eq!(m.fetch_count(), 0);
}

#[test]
fn responder_down_skips_status() {
    init_log();
    let m = manager(true);
    let peer = Client::new(ProtocolVersion::TLS1_2, gcm()).request_status(Some(v1_ocsp()), None);
    assert_eq!(handshake(peer, m.clone()), None);
    assert_eq!(m.cache_len(), 0);
}

#[test]
fn request_extensions_are_not_cached() {
    init_log();
    let m = manager(false);
    let nonce = StatusRequestExtension {
        request: Some(CertStatusRequest::Ocsp(OcspStatusRequest {
            responder_ids: vec![],
            extensions: vec![0x30, 0x03, 0x04, 0x01, 0x2a],
        })),
    };
    for _ in 0..2 {
        let peer = Client::new(ProtocolVersion::TLS1_2, gcm()).request_status(Some(nonce.clone()), None);
        assert!(handshake(peer, m.clone()).is_some());
    }
    assert_eq!(m.fetch_count(), 2);
    assert_eq!(m.cache_len(), 0);
}
