// Handshake message ordering.
//
// Full handshake:
//
//   ClientHello            -------->
//                                        (HelloVerifyRequest, DTLS)
//                                        ServerHello
//                                        Certificate*
//                                        CertificateStatus*
//                                        ServerKeyExchange*
//                                        CertificateRequest*
//                          <--------     ServerHelloDone
//   Certificate*
//   ClientKeyExchange
//   CertificateVerify*
//   [ChangeCipherSpec]
//   Finished               -------->
//                                        [ChangeCipherSpec]
//                          <--------     Finished
//
// Abbreviated handshake:
//
//   ClientHello            -------->
//                                        ServerHello
//                                        [ChangeCipherSpec]
//                          <--------     Finished
//   [ChangeCipherSpec]
//   Finished               -------->
//
// Both sides run the same queue. Every message, sent or received, is
// checked against it and then moves it forward.

use std::collections::VecDeque;
use std::fmt;

use crate::types::HandshakeType;
use crate::Error;

/// One expected step of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    HelloRequest,
    ClientHello,
    HelloVerifyRequest,
    ServerHello,
    ServerSupplementalData,
    ServerCertificate,
    CertificateStatus,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    ClientSupplementalData,
    ClientCertificate,
    ClientKeyExchange,
    CertificateVerify,
    ClientChangeCipherSpec,
    ClientFinished,
    ServerChangeCipherSpec,
    ServerFinished,
}

impl HandshakeState {
    /// Message type of the step. `None` for ChangeCipherSpec.
    pub fn handshake_type(&self) -> Option<HandshakeType> {
        use HandshakeState::*;
        let t = match self {
            HelloRequest => HandshakeType::HelloRequest,
            ClientHello => HandshakeType::ClientHello,
            HelloVerifyRequest => HandshakeType::HelloVerifyRequest,
            ServerHello => HandshakeType::ServerHello,
            ServerSupplementalData | ClientSupplementalData => HandshakeType::SupplementalData,
            ServerCertificate | ClientCertificate => HandshakeType::Certificate,
            CertificateStatus => HandshakeType::CertificateStatus,
            ServerKeyExchange => HandshakeType::ServerKeyExchange,
            CertificateRequest => HandshakeType::CertificateRequest,
            ServerHelloDone => HandshakeType::ServerHelloDone,
            ClientKeyExchange => HandshakeType::ClientKeyExchange,
            CertificateVerify => HandshakeType::CertificateVerify,
            ClientFinished | ServerFinished => HandshakeType::Finished,
            ClientChangeCipherSpec | ServerChangeCipherSpec => return None,
        };
        Some(t)
    }

    /// Whether the step may always be skipped.
    pub fn is_optional(&self) -> bool {
        use HandshakeState::*;
        matches!(
            self,
            HelloRequest
                | ServerSupplementalData
                | CertificateStatus
                | CertificateRequest
                | ClientSupplementalData
                | ClientCertificate
                | CertificateVerify
        )
    }

    fn matches(&self, t: HandshakeType) -> bool {
        self.handshake_type() == Some(t)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.handshake_type() {
            Some(t) => write!(f, "{}", t),
            None => write!(f, "change_cipher_spec"),
        }
    }
}

/// What the server's key exchange asks of the ServerKeyExchange message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKeyExchangeNeed {
    /// Static RSA, static DH, PSK without hint.
    None,
    /// RSA export and PSK with identity hint.
    Optional,
    /// Ephemeral DH and ECDH, anonymous suites.
    Required,
}

/// Facts about a ServerHello that decide the rest of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHelloFacts {
    /// Session resumption.
    pub abbreviated: bool,
    /// Anonymous suites send no server Certificate.
    pub server_certificate: bool,
    /// The server agreed to staple a certificate status.
    pub status_stapling: bool,
    pub server_key_exchange: ServerKeyExchangeNeed,
}

impl ServerHelloFacts {
    /// A full handshake with certificate and ephemeral key exchange.
    pub fn full() -> Self {
        ServerHelloFacts {
            abbreviated: false,
            server_certificate: true,
            status_stapling: false,
            server_key_exchange: ServerKeyExchangeNeed::Required,
        }
    }

    pub fn abbreviated() -> Self {
        ServerHelloFacts {
            abbreviated: true,
            ..Self::full()
        }
    }
}

/// A handshake message reduced to what ordering depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMessage {
    HelloRequest,
    ClientHello {
        /// DTLS: the hello carries a non-empty cookie.
        has_cookie: bool,
        /// The client asks to resume a session.
        has_session_id: bool,
    },
    HelloVerifyRequest,
    ServerHello(ServerHelloFacts),
    SupplementalData,
    Certificate,
    CertificateStatus,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    ClientKeyExchange,
    CertificateVerify,
    Finished,
}

impl StateMessage {
    pub fn handshake_type(&self) -> HandshakeType {
        match self {
            StateMessage::HelloRequest => HandshakeType::HelloRequest,
            StateMessage::ClientHello { .. } => HandshakeType::ClientHello,
            StateMessage::HelloVerifyRequest => HandshakeType::HelloVerifyRequest,
            StateMessage::ServerHello(_) => HandshakeType::ServerHello,
            StateMessage::SupplementalData => HandshakeType::SupplementalData,
            StateMessage::Certificate => HandshakeType::Certificate,
            StateMessage::CertificateStatus => HandshakeType::CertificateStatus,
            StateMessage::ServerKeyExchange => HandshakeType::ServerKeyExchange,
            StateMessage::CertificateRequest => HandshakeType::CertificateRequest,
            StateMessage::ServerHelloDone => HandshakeType::ServerHelloDone,
            StateMessage::ClientKeyExchange => HandshakeType::ClientKeyExchange,
            StateMessage::CertificateVerify => HandshakeType::CertificateVerify,
            StateMessage::Finished => HandshakeType::Finished,
        }
    }
}

#[derive(Debug)]
pub struct HandshakeStateManager {
    is_dtls: bool,
    upcoming: VecDeque<HandshakeState>,
    /// Consulted only when the head of `upcoming` is mandatory and does
    /// not match.
    alternatives: VecDeque<HandshakeState>,
    client_certificate_requested: bool,
    /// The negotiated key exchange may go without ServerKeyExchange.
    server_key_exchange_optional: bool,
}

impl HandshakeStateManager {
    pub fn new(is_dtls: bool) -> Self {
        HandshakeStateManager {
            is_dtls,
            upcoming: VecDeque::new(),
            alternatives: VecDeque::new(),
            client_certificate_requested: false,
            server_key_exchange_optional: false,
        }
    }

    fn is_optional(&self, s: HandshakeState) -> bool {
        s.is_optional()
            || (s == HandshakeState::ServerKeyExchange && self.server_key_exchange_optional)
    }

    /// Nothing more is expected.
    pub fn is_empty(&self) -> bool {
        self.upcoming.is_empty()
    }

    /// The next mandatory step, skipping optional ones.
    pub fn next_required(&self) -> Option<HandshakeState> {
        self.upcoming
            .iter()
            .copied()
            .find(|s| !self.is_optional(*s))
    }

    pub fn upcoming(&self) -> impl Iterator<Item = &HandshakeState> {
        self.upcoming.iter()
    }

    /// Whether a message of type `t` may come next.
    pub fn check(&self, t: HandshakeType) -> Result<(), Error> {
        if self.upcoming.is_empty() {
            // Only a kickstart message opens a handshake.
            if t != HandshakeType::HelloRequest && t != HandshakeType::ClientHello {
                return Err(Error::unexpected(t));
            }
            return Ok(());
        }

        if self.position(t).is_some() || self.alternatives.iter().any(|s| s.matches(t)) {
            return Ok(());
        }

        debug!(
            "{} not expected, upcoming: {:?}, alternatives: {:?}",
            t, self.upcoming, self.alternatives
        );
        Err(Error::unexpected(t))
    }

    /// Index of the first step matching `t`, looking past optional steps only.
    fn position(&self, t: HandshakeType) -> Option<usize> {
        for (i, s) in self.upcoming.iter().enumerate() {
            if s.matches(t) {
                return Some(i);
            }
            if !self.is_optional(*s) {
                break;
            }
        }
        None
    }

    /// Move past `message` and queue what it makes necessary.
    ///
    /// The message must have passed [`check`](Self::check).
    pub fn update(&mut self, message: StateMessage) -> Result<(), Error> {
        let t = message.handshake_type();

        if let Some(at) = self.position(t) {
            self.upcoming.drain(..=at);
        } else if self.alternatives.iter().any(|s| s.matches(t)) {
            self.upcoming.clear();
        } else if !self.upcoming.is_empty() {
            return Err(Error::unexpected(t));
        }
        self.alternatives.clear();

        use HandshakeState as S;
        match message {
            StateMessage::HelloRequest => {
                self.upcoming.clear();
                self.upcoming.push_back(S::ClientHello);
            }

            StateMessage::ClientHello {
                has_cookie,
                has_session_id,
            } => {
                self.client_certificate_requested = false;
                if self.is_dtls && !has_cookie {
                    // The server may resume right away or ask for a cookie.
                    self.upcoming.push_back(S::HelloVerifyRequest);
                    if has_session_id {
                        self.alternatives.push_back(S::ServerHello);
                    }
                } else {
                    self.upcoming.push_back(S::ServerHello);
                    if self.is_dtls {
                        // The cookie may still fail to verify.
                        self.alternatives.push_back(S::HelloVerifyRequest);
                    }
                }
            }

            StateMessage::HelloVerifyRequest => {
                self.upcoming.clear();
                self.upcoming.push_back(S::ClientHello);
            }

            StateMessage::ServerHello(facts) => {
                if facts.abbreviated {
                    self.upcoming.extend([
                        S::ServerChangeCipherSpec,
                        S::ServerFinished,
                        S::ClientChangeCipherSpec,
                        S::ClientFinished,
                    ]);
                } else {
                    self.upcoming.push_back(S::ServerSupplementalData);
                    if facts.server_certificate {
                        self.upcoming.push_back(S::ServerCertificate);
                        if facts.status_stapling {
                            self.upcoming.push_back(S::CertificateStatus);
                        }
                    }
                    if facts.server_key_exchange != ServerKeyExchangeNeed::None {
                        self.upcoming.push_back(S::ServerKeyExchange);
                    }
                    self.server_key_exchange_optional =
                        facts.server_key_exchange == ServerKeyExchangeNeed::Optional;
                    if facts.server_certificate {
                        self.upcoming.push_back(S::CertificateRequest);
                    }
                    self.upcoming.push_back(S::ServerHelloDone);
                }
            }

            StateMessage::ServerKeyExchange
            | StateMessage::SupplementalData
            | StateMessage::Certificate
            | StateMessage::CertificateStatus
            | StateMessage::CertificateVerify => {}

            StateMessage::CertificateRequest => {
                self.client_certificate_requested = true;
            }

            StateMessage::ServerHelloDone => {
                self.upcoming.clear();
                self.upcoming.push_back(S::ClientSupplementalData);
                if self.client_certificate_requested {
                    self.upcoming.push_back(S::ClientCertificate);
                }
                self.upcoming.push_back(S::ClientKeyExchange);
                if self.client_certificate_requested {
                    self.upcoming.push_back(S::CertificateVerify);
                }
                self.upcoming.extend([
                    S::ClientChangeCipherSpec,
                    S::ClientFinished,
                    S::ServerChangeCipherSpec,
                    S::ServerFinished,
                ]);
            }

            StateMessage::ClientKeyExchange | StateMessage::Finished => {}
        }

        trace!("After {}: upcoming {:?}", t, self.upcoming);
        Ok(())
    }

    /// Validate a ChangeCipherSpec. `is_input` is the direction, `is_client`
    /// the local role.
    pub fn change_cipher_spec(&mut self, is_input: bool, is_client: bool) -> Result<(), Error> {
        let expected = if is_client == is_input {
            HandshakeState::ServerChangeCipherSpec
        } else {
            HandshakeState::ClientChangeCipherSpec
        };

        let mut at = None;
        for (i, s) in self.upcoming.iter().enumerate() {
            if *s == expected {
                at = Some(i);
                break;
            }
            if !self.is_optional(*s) {
                break;
            }
        }

        let Some(at) = at else {
            debug!(
                "{:?} not expected, upcoming: {:?}",
                expected, self.upcoming
            );
            return Err(Error::UnexpectedMessage(
                "ChangeCipherSpec message sequence violation".into(),
            ));
        };

        self.upcoming.drain(..=at);
        self.alternatives.clear();
        Ok(())
    }

    /// The peer's ChangeCipherSpec is the next mandatory step.
    pub fn expects_peer_change_cipher_spec(&self, is_client: bool) -> bool {
        let peer = if is_client {
            HandshakeState::ServerChangeCipherSpec
        } else {
            HandshakeState::ClientChangeCipherSpec
        };
        self.next_required() == Some(peer)
    }
}
