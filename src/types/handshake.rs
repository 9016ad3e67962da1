use std::fmt;

/// Handshake message type (RFC 5246 §7.4, RFC 6347 §4.3.2, RFC 6066 §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandshakeType {
    HelloRequest,
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    NewSessionTicket,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    CertificateUrl,
    CertificateStatus,
    SupplementalData,
    Unknown(u8),
}

impl HandshakeType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => HandshakeType::HelloRequest,
            1 => HandshakeType::ClientHello,
            2 => HandshakeType::ServerHello,
            3 => HandshakeType::HelloVerifyRequest,
            4 => HandshakeType::NewSessionTicket,
            11 => HandshakeType::Certificate,
            12 => HandshakeType::ServerKeyExchange,
            13 => HandshakeType::CertificateRequest,
            14 => HandshakeType::ServerHelloDone,
            15 => HandshakeType::CertificateVerify,
            16 => HandshakeType::ClientKeyExchange,
            20 => HandshakeType::Finished,
            21 => HandshakeType::CertificateUrl,
            22 => HandshakeType::CertificateStatus,
            23 => HandshakeType::SupplementalData,
            _ => HandshakeType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HandshakeType::HelloRequest => 0,
            HandshakeType::ClientHello => 1,
            HandshakeType::ServerHello => 2,
            HandshakeType::HelloVerifyRequest => 3,
            HandshakeType::NewSessionTicket => 4,
            HandshakeType::Certificate => 11,
            HandshakeType::ServerKeyExchange => 12,
            HandshakeType::CertificateRequest => 13,
            HandshakeType::ServerHelloDone => 14,
            HandshakeType::CertificateVerify => 15,
            HandshakeType::ClientKeyExchange => 16,
            HandshakeType::Finished => 20,
            HandshakeType::CertificateUrl => 21,
            HandshakeType::CertificateStatus => 22,
            HandshakeType::SupplementalData => 23,
            HandshakeType::Unknown(value) => *value,
        }
    }

    /// Messages that must not be part of the transcript hash they themselves carry.
    pub fn defers_hash(&self) -> bool {
        matches!(
            self,
            HandshakeType::Finished | HandshakeType::CertificateVerify
        )
    }

    /// Messages that are not hashed into the transcript at all.
    pub fn excluded_from_hash(&self) -> bool {
        matches!(
            self,
            HandshakeType::HelloRequest | HandshakeType::HelloVerifyRequest
        )
    }
}

impl fmt::Display for HandshakeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandshakeType::HelloRequest => "hello_request",
            HandshakeType::ClientHello => "client_hello",
            HandshakeType::ServerHello => "server_hello",
            HandshakeType::HelloVerifyRequest => "hello_verify_request",
            HandshakeType::NewSessionTicket => "new_session_ticket",
            HandshakeType::Certificate => "certificate",
            HandshakeType::ServerKeyExchange => "server_key_exchange",
            HandshakeType::CertificateRequest => "certificate_request",
            HandshakeType::ServerHelloDone => "server_hello_done",
            HandshakeType::CertificateVerify => "certificate_verify",
            HandshakeType::ClientKeyExchange => "client_key_exchange",
            HandshakeType::Finished => "finished",
            HandshakeType::CertificateUrl => "certificate_url",
            HandshakeType::CertificateStatus => "certificate_status",
            HandshakeType::SupplementalData => "supplemental_data",
            HandshakeType::Unknown(v) => return write!(f, "unknown({})", v),
        };
        f.write_str(s)
    }
}
