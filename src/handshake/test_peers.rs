//! Minimal handshake peers for exercising the machinery around them.
//!
//! Hellos carry `version(2) | random(32) | cookie<0..2^8-1>`, the key
//! exchange is four zero bytes and both sides use a fixed master secret.

use super::{HandshakeConsumer, HandshakeContext, HandshakeMessage};
use super::{ServerHelloFacts, ServerKeyExchangeNeed, StateMessage};
use crate::crypto::{BulkCipher, HashAlgorithm, MacAlg, SuiteShape};
use crate::types::{AlertDescription, HandshakeType, ProtocolVersion};
use crate::Error;

pub const MASTER: [u8; 48] = [9; 48];
const CLIENT_RANDOM: [u8; 32] = [1; 32];
const SERVER_RANDOM: [u8; 32] = [2; 32];
const COOKIE: [u8; 4] = [7, 7, 7, 7];

pub fn gcm() -> SuiteShape {
    SuiteShape::new(BulkCipher::Aes128Gcm, MacAlg::Null)
}

fn facts() -> ServerHelloFacts {
    ServerHelloFacts {
        server_certificate: false,
        server_key_exchange: ServerKeyExchangeNeed::None,
        ..ServerHelloFacts::full()
    }
}

fn version_of(body: &[u8]) -> Result<ProtocolVersion, Error> {
    if body.len() < 2 {
        return Err(Error::fatal(AlertDescription::DecodeError, "short hello"));
    }
    Ok(ProtocolVersion::from_u16(u16::from_be_bytes([body[0], body[1]])))
}

pub struct TestClient {
    pub offer: ProtocolVersion,
    pub shape: SuiteShape,
    pub secure_renegotiation: bool,
    cookie: Vec<u8>,
}

impl TestClient {
    pub fn new(offer: ProtocolVersion) -> Self {
        TestClient {
            offer,
            shape: gcm(),
            secure_renegotiation: true,
            cookie: vec![],
        }
    }

    fn send_hello(&mut self, ctx: &mut HandshakeContext) -> Result<(), Error> {
        let mut body = self.offer.as_u16().to_be_bytes().to_vec();
        body.extend_from_slice(&CLIENT_RANDOM);
        body.push(self.cookie.len() as u8);
        body.extend_from_slice(&self.cookie);
        ctx.send(
            StateMessage::ClientHello {
                has_cookie: !self.cookie.is_empty(),
                has_session_id: false,
            },
            &body,
        )
    }
}

impl HandshakeConsumer for TestClient {
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
                ctx.negotiated(version_of(body)?);
                ctx.set_secure_renegotiation(self.secure_renegotiation);
                let server_random = body.get(2..34).unwrap_or_default();
                ctx.derive_keys(
                    self.shape,
                    HashAlgorithm::Sha256,
                    &MASTER,
                    &CLIENT_RANDOM,
                    server_random,
                )?;
                StateMessage::ServerHello(facts())
            }
            HandshakeType::ServerHelloDone => StateMessage::ServerHelloDone,
            HandshakeType::Finished => StateMessage::Finished,
            t => return Err(Error::unexpected(t)),
        })
    }

    fn produce(&mut self, after: HandshakeType, ctx: &mut HandshakeContext) -> Result<(), Error> {
        match after {
            HandshakeType::HelloVerifyRequest => self.send_hello(ctx),
            HandshakeType::ServerHelloDone => {
                ctx.send(StateMessage::ClientKeyExchange, &[0; 4])?;
                ctx.send_finished()
            }
            _ => Ok(()),
        }
    }
}

pub struct TestServer {
    pub shape: SuiteShape,
    pub secure_renegotiation: bool,
    /// Hand out a delegated task after the ClientHello that fails.
    pub failing_task: bool,
    hello_cookie: bool,
    client_version: Option<ProtocolVersion>,
}

impl TestServer {
    pub fn new() -> Self {
        TestServer {
            shape: gcm(),
            secure_renegotiation: true,
            failing_task: false,
            hello_cookie: false,
            client_version: None,
        }
    }
}

impl HandshakeConsumer for TestServer {
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
                self.hello_cookie = body.get(34).map(|n| *n > 0).unwrap_or(false);
                StateMessage::ClientHello {
                    has_cookie: self.hello_cookie,
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

                if ctx.is_dtls() && !self.hello_cookie {
                    let mut body = version.as_u16().to_be_bytes().to_vec();
                    body.push(COOKIE.len() as u8);
                    body.extend_from_slice(&COOKIE);
                    return ctx.send(StateMessage::HelloVerifyRequest, &body);
                }

                if self.failing_task {
                    ctx.delegate(|| {
                        Err(Error::fatal(
                            AlertDescription::InternalError,
                            "key lookup failed",
                        ))
                    });
                }

                ctx.negotiated(version);
                ctx.set_secure_renegotiation(self.secure_renegotiation);
                let mut body = version.as_u16().to_be_bytes().to_vec();
                body.extend_from_slice(&SERVER_RANDOM);
                ctx.send(StateMessage::ServerHello(facts()), &body)?;
                ctx.derive_keys(
                    self.shape,
                    HashAlgorithm::Sha256,
                    &MASTER,
                    &CLIENT_RANDOM,
                    &SERVER_RANDOM,
                )?;
                ctx.send(StateMessage::ServerHelloDone, &[])
            }
            HandshakeType::Finished => ctx.send_finished(),
            _ => Ok(()),
        }
    }
}
