//! Shared peers and drivers for the connection tests.

#![allow(unused)]

use std::sync::{Arc, Mutex};

use rimpl::crypto::{BulkCipher, HashAlgorithm, MacAlg, SuiteShape};
use rimpl::handshake::{ServerHelloFacts, ServerKeyExchangeNeed};
use rimpl::status::{can_staple, select_status_request, CertStatusRequestType};
use rimpl::status::{StatusRequestExtension, StatusRequestV2Extension};
use rimpl::status::{STATUS_REQUEST, STATUS_REQUEST_V2};
use rimpl::{AlertDescription, Buf, Config, Connection, Error, HandshakeConsumer};
use rimpl::{HandshakeContext, HandshakeMessage, HandshakeType, Output, ProtocolVersion};
use rimpl::{StateMessage, StatusResponseManager, Transport};

pub const MASTER: [u8; 48] = [0x42; 48];
pub const CLIENT_RANDOM: [u8; 32] = [0x11; 32];
pub const SERVER_RANDOM: [u8; 32] = [0x22; 32];
pub const COOKIE: [u8; 8] = [0xc0; 8];

const FLAG_STAPLING: u8 = 1;
const FLAG_SKE: u8 = 2;

pub fn init_log() {
    let _ = env_logger::try_init();
}

pub fn config() -> Arc<Config> {
    Arc::new(Config::builder().rng_seed(7).build().unwrap())
}

pub fn gcm() -> SuiteShape {
    SuiteShape::new(BulkCipher::Aes128Gcm, MacAlg::Null)
}

pub fn cbc_sha() -> SuiteShape {
    SuiteShape::new(BulkCipher::Aes128Cbc, MacAlg::Sha)
}

fn version_of(body: &[u8]) -> Result<ProtocolVersion, Error> {
    if body.len() < 2 {
        return Err(Error::fatal(AlertDescription::DecodeError, "short hello"));
    }
    Ok(ProtocolVersion::from_u16(u16::from_be_bytes([body[0], body[1]])))
}

fn put_u24(out: &mut Vec<u8>, n: usize) {
    out.extend_from_slice(&(n as u32).to_be_bytes()[1..]);
}

/// What a client saw of the server's certificate status.
#[derive(Debug, Default, Clone)]
pub struct Seen {
    pub certificate: Vec<u8>,
    pub status: Option<Vec<u8>>,
}

/// Client side: `version | random | cookie<1> | extensions<2>`.
pub struct Client {
    pub offer: ProtocolVersion,
    pub shape: SuiteShape,
    /// Serialized hello extensions.
    pub extensions: Vec<u8>,
    pub seen: Arc<Mutex<Seen>>,
    cookie: Vec<u8>,
}

impl Client {
    pub fn new(offer: ProtocolVersion, shape: SuiteShape) -> Self {
        Client {
            offer,
            shape,
            extensions: vec![],
            seen: Arc::default(),
            cookie: vec![],
        }
    }

    pub fn request_status(mut self, v1: Option<StatusRequestExtension>, v2: Option<StatusRequestV2Extension>) -> Self {
        let mut ext = Buf::new();
        if let Some(v1) = v1 {
            v1.serialize(&mut ext);
        }
        if let Some(v2) = v2 {
            v2.serialize(&mut ext);
        }
        self.extensions = ext.to_vec();
        self
    }

    fn send_hello(&mut self, ctx: &mut HandshakeContext) -> Result<(), Error> {
        let mut body = self.offer.as_u16().to_be_bytes().to_vec();
        body.extend_from_slice(&CLIENT_RANDOM);
        body.push(self.cookie.len() as u8);
        body.extend_from_slice(&self.cookie);
        body.extend_from_slice(&(self.extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&self.extensions);
        ctx.send(
            StateMessage::ClientHello {
                has_cookie: !self.cookie.is_empty(),
                has_session_id: false,
            },
            &body,
        )
    }
}

impl HandshakeConsumer for Client {
    fn kickstart(&mut self, ctx: &mut HandshakeContext) -> Result<(), Error> {
        self.cookie.clear();
        self.send_hello(ctx)
    }

    fn consume(
        &mut self,
        message: &HandshakeMessage,
        ctx: &mut HandshakeContext,
    ) -> Result<StateMessage, Error> {
        let body = message.body();
        Ok(match message.msg_type {
            HandshakeType::HelloRequest => StateMessage::HelloRequest,
            HandshakeType::HelloVerifyRequest => {
                self.cookie = body.get(3..).unwrap_or_default().to_vec();
                StateMessage::HelloVerifyRequest
            }
            HandshakeType::ServerHello => {
                let flags = *body
                    .get(34)
                    .ok_or(Error::fatal(AlertDescription::DecodeError, "short ServerHello"))?;
                ctx.negotiated(version_of(body)?);
                ctx.set_secure_renegotiation(true);
                ctx.derive_keys(
                    self.shape,
                    HashAlgorithm::Sha256,
                    &MASTER,
                    &CLIENT_RANDOM,
                    &body[2..34],
                )?;
                StateMessage::ServerHello(ServerHelloFacts {
                    status_stapling: flags & FLAG_STAPLING != 0,
                    server_key_exchange: if flags & FLAG_SKE != 0 {
                        ServerKeyExchangeNeed::Required
                    } else {
                        ServerKeyExchangeNeed::None
                    },
                    ..ServerHelloFacts::full()
                })
            }
            HandshakeType::Certificate => {
                self.seen.lock().unwrap().certificate = body.to_vec();
                StateMessage::Certificate
            }
            HandshakeType::CertificateStatus => {
                self.seen.lock().unwrap().status = Some(body.to_vec());
                StateMessage::CertificateStatus
            }
            HandshakeType::ServerKeyExchange => StateMessage::ServerKeyExchange,
            HandshakeType::ServerHelloDone => StateMessage::ServerHelloDone,
            HandshakeType::Finished => StateMessage::Finished,
            t => return Err(Error::unexpected(t)),
        })
    }

    fn produce(&mut self, after: HandshakeType, ctx: &mut HandshakeContext) -> Result<(), Error> {
        match after {
            HandshakeType::HelloVerifyRequest => self.send_hello(ctx),
            HandshakeType::ServerHelloDone => {
                ctx.send(StateMessage::ClientKeyExchange, &[0x55; 16])?;
                ctx.send_finished()
            }
            _ => Ok(()),
        }
    }
}

/// Server side, optionally stapling OCSP responses for `chain`.
pub struct Server {
    pub shape: SuiteShape,
    pub chain: Vec<Vec<u8>>,
    pub status: Option<Arc<StatusResponseManager>>,
    pub key_exchange: bool,
    client_version: Option<ProtocolVersion>,
    client_cookie: bool,
    v1: Option<StatusRequestExtension>,
    v2: Option<StatusRequestV2Extension>,
}

impl Server {
    pub fn new(shape: SuiteShape) -> Self {
        Server {
            shape,
            chain: vec![b"leaf".to_vec(), b"ca".to_vec()],
            status: None,
            key_exchange: true,
            client_version: None,
            client_cookie: false,
            v1: None,
            v2: None,
        }
    }

    pub fn with_status(mut self, manager: Arc<StatusResponseManager>, chain: Vec<Vec<u8>>) -> Self {
        self.status = Some(manager);
        self.chain = chain;
        self
    }

    fn parse_extensions(&mut self, mut ext: &[u8]) -> Result<(), Error> {
        self.v1 = None;
        self.v2 = None;
        while ext.len() >= 4 {
            let t = u16::from_be_bytes([ext[0], ext[1]]);
            let len = u16::from_be_bytes([ext[2], ext[3]]) as usize;
            let body = ext
                .get(4..4 + len)
                .ok_or(Error::fatal(AlertDescription::DecodeError, "short extension"))?;
            if t == STATUS_REQUEST {
                self.v1 = Some(StatusRequestExtension::parse(body)?);
            } else if t == STATUS_REQUEST_V2 {
                self.v2 = Some(StatusRequestV2Extension::parse(body)?);
            }
            ext = &ext[4 + len..];
        }
        Ok(())
    }

    /// Responses to staple, in chain order.
    fn staple(&self) -> Option<(CertStatusRequestType, Vec<Vec<u8>>)> {
        let manager = self.status.as_ref()?;
        let (status_type, request) = select_status_request(self.v1.as_ref(), self.v2.as_ref())?;
        let responses = manager.staple(status_type, request, &self.chain);
        if !can_staple(status_type, &responses, &self.chain) {
            return None;
        }
        let ordered = self
            .chain
            .iter()
            .take(if status_type == CertStatusRequestType::Ocsp { 1 } else { self.chain.len() - 1 })
            .map(|c| responses.get(c).cloned().unwrap_or_default())
            .collect();
        Some((status_type, ordered))
    }
}

impl HandshakeConsumer for Server {
    fn kickstart(&mut self, ctx: &mut HandshakeContext) -> Result<(), Error> {
        ctx.send(StateMessage::HelloRequest, &[])
    }

    fn consume(
        &mut self,
        message: &HandshakeMessage,
        _ctx: &mut HandshakeContext,
    ) -> Result<StateMessage, Error> {
        let body = message.body();
        Ok(match message.msg_type {
            HandshakeType::ClientHello => {
                self.client_version = Some(version_of(body)?);
                let cookie_len = *body
                    .get(34)
                    .ok_or(Error::fatal(AlertDescription::DecodeError, "short ClientHello"))?
                    as usize;
                self.client_cookie = cookie_len > 0;
                let ext_at = 35 + cookie_len + 2;
                self.parse_extensions(body.get(ext_at..).unwrap_or_default())?;
                StateMessage::ClientHello {
                    has_cookie: self.client_cookie,
                    has_session_id: false,
                }
            }
            HandshakeType::ClientKeyExchange => StateMessage::ClientKeyExchange,
            HandshakeType::Finished => StateMessage::Finished,
            t => return Err(Error::unexpected(t)),
        })
    }

    fn produce(&mut self, after: HandshakeType, ctx: &mut HandshakeContext) -> Result<(), Error> {
        match after {
            HandshakeType::ClientHello => {
                let version = self
                    .client_version
                    .ok_or(Error::IllegalState("no ClientHello"))?;

                if ctx.is_dtls() && !self.client_cookie {
                    let mut body = version.as_u16().to_be_bytes().to_vec();
                    body.push(COOKIE.len() as u8);
                    body.extend_from_slice(&COOKIE);
                    return ctx.send(StateMessage::HelloVerifyRequest, &body);
                }

                let staple = self.staple();
                let mut flags = 0;
                if staple.is_some() {
                    flags |= FLAG_STAPLING;
                }
                if self.key_exchange {
                    flags |= FLAG_SKE;
                }
                let facts = ServerHelloFacts {
                    status_stapling: staple.is_some(),
                    server_key_exchange: if self.key_exchange {
                        ServerKeyExchangeNeed::Required
                    } else {
                        ServerKeyExchangeNeed::None
                    },
                    ..ServerHelloFacts::full()
                };

                ctx.negotiated(version);
                ctx.set_secure_renegotiation(true);
                let mut body = version.as_u16().to_be_bytes().to_vec();
                body.extend_from_slice(&SERVER_RANDOM);
                body.push(flags);
                ctx.send(StateMessage::ServerHello(facts), &body)?;
                ctx.derive_keys(
                    self.shape,
                    HashAlgorithm::Sha256,
                    &MASTER,
                    &CLIENT_RANDOM,
                    &SERVER_RANDOM,
                )?;

                let mut certs = vec![];
                for c in &self.chain {
                    put_u24(&mut certs, c.len());
                    certs.extend_from_slice(c);
                }
                ctx.send(StateMessage::Certificate, &certs)?;

                if let Some((status_type, responses)) = staple {
                    let mut body = vec![status_type.as_u8()];
                    for r in &responses {
                        put_u24(&mut body, r.len());
                        body.extend_from_slice(r);
                    }
                    ctx.send(StateMessage::CertificateStatus, &body)?;
                }
                if self.key_exchange {
                    ctx.send(StateMessage::ServerKeyExchange, &[0x66; 32])?;
                }
                ctx.send(StateMessage::ServerHelloDone, &[])
            }
            HandshakeType::Finished => ctx.send_finished(),
            _ => Ok(()),
        }
    }
}

pub fn client(config: &Arc<Config>, transport: Transport, consumer: Client) -> Connection {
    Connection::new(config.clone(), transport, true, Box::new(consumer))
}

pub fn server(config: &Arc<Config>, transport: Transport, consumer: Server) -> Connection {
    Connection::new(config.clone(), transport, false, Box::new(consumer))
}

/// Everything an endpoint handed back while draining.
#[derive(Debug, Default)]
pub struct Drained {
    pub packets: Vec<Vec<u8>>,
    pub app_data: Vec<Vec<u8>>,
    pub connected: bool,
    pub closed: bool,
}

pub fn drain(c: &mut Connection) -> Drained {
    let mut d = Drained::default();
    loop {
        match c.poll_output() {
            Output::Packet(p) => d.packets.push(p.to_vec()),
            Output::ApplicationData(a) => d.app_data.push(a.to_vec()),
            Output::Connected => d.connected = true,
            Output::Closed => d.closed = true,
            Output::NeedTask => {
                let task = c.delegated_task().unwrap();
                task();
            }
            Output::Idle => return d,
        }
    }
}

pub fn deliver(packets: &[Vec<u8>], to: &mut Connection) {
    for p in packets {
        to.handle_packet(p).unwrap();
    }
}

/// Shuttle packets both ways until both sides go quiet.
pub fn run(a: &mut Connection, b: &mut Connection) -> (Drained, Drained) {
    let (mut total_a, mut total_b) = (Drained::default(), Drained::default());
    for _ in 0..50 {
        let da = drain(a);
        deliver(&da.packets, b);
        let db = drain(b);
        deliver(&db.packets, a);

        let quiet = da.packets.is_empty() && db.packets.is_empty();
        merge(&mut total_a, da);
        merge(&mut total_b, db);
        if quiet {
            return (total_a, total_b);
        }
    }
    panic!("endpoints did not go quiet");
}

fn merge(total: &mut Drained, d: Drained) {
    total.packets.extend(d.packets);
    total.app_data.extend(d.app_data);
    total.connected |= d.connected;
    total.closed |= d.closed;
}

/// A client and server with a finished handshake.
pub fn connected(transport: Transport, version: ProtocolVersion, shape: SuiteShape) -> (Connection, Connection) {
    let config = config();
    let mut c = client(&config, transport, Client::new(version, shape));
    let mut s = server(&config, transport, Server::new(shape));
    c.begin_handshake().unwrap();
    let (dc, ds) = run(&mut c, &mut s);
    assert!(dc.connected, "client not connected");
    assert!(ds.connected, "server not connected");
    (c, s)
}

/// `(content type, record length)` of every TLS record in `data`.
pub fn tls_records(mut data: &[u8]) -> Vec<(u8, usize)> {
    let mut out = vec![];
    while data.len() >= 5 {
        let len = u16::from_be_bytes([data[3], data[4]]) as usize;
        out.push((data[0], len));
        data = &data[(5 + len).min(data.len())..];
    }
    out
}

/// `(content type, epoch, sequence)` of every DTLS record in a datagram.
pub fn dtls_records(mut data: &[u8]) -> Vec<(u8, u16, u64)> {
    let mut out = vec![];
    while data.len() >= 13 {
        let epoch = u16::from_be_bytes([data[3], data[4]]);
        let mut seq = [0u8; 8];
        seq[2..].copy_from_slice(&data[5..11]);
        let len = u16::from_be_bytes([data[11], data[12]]) as usize;
        out.push((data[0], epoch, u64::from_be_bytes(seq)));
        data = &data[(13 + len).min(data.len())..];
    }
    out
}
