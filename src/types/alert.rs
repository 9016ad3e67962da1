use std::fmt;

/// Alert level (RFC 5246 §7.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Fatal,
    Unknown(u8),
}

impl AlertLevel {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => AlertLevel::Warning,
            2 => AlertLevel::Fatal,
            _ => AlertLevel::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AlertLevel::Warning => 1,
            AlertLevel::Fatal => 2,
            AlertLevel::Unknown(v) => *v,
        }
    }
}

macro_rules! alert_descriptions {
    ($($variant:ident = $value:literal => $name:literal,)*) => {
        /// Alert description (RFC 5246 §7.2, RFC 6066 §9).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum AlertDescription {
            $($variant,)*
            Unknown(u8),
        }

        impl AlertDescription {
            pub fn from_u8(value: u8) -> Self {
                match value {
                    $($value => AlertDescription::$variant,)*
                    _ => AlertDescription::Unknown(value),
                }
            }

            pub fn as_u8(&self) -> u8 {
                match self {
                    $(AlertDescription::$variant => $value,)*
                    AlertDescription::Unknown(v) => *v,
                }
            }
        }

        impl fmt::Display for AlertDescription {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(AlertDescription::$variant => f.write_str($name),)*
                    AlertDescription::Unknown(v) => write!(f, "<UNKNOWN ALERT: {}>", v),
                }
            }
        }
    };
}

alert_descriptions! {
    CloseNotify = 0 => "close_notify",
    UnexpectedMessage = 10 => "unexpected_message",
    BadRecordMac = 20 => "bad_record_mac",
    DecryptionFailed = 21 => "decryption_failed",
    RecordOverflow = 22 => "record_overflow",
    DecompressionFailure = 30 => "decompression_failure",
    HandshakeFailure = 40 => "handshake_failure",
    NoCertificate = 41 => "no_certificate",
    BadCertificate = 42 => "bad_certificate",
    UnsupportedCertificate = 43 => "unsupported_certificate",
    CertificateRevoked = 44 => "certificate_revoked",
    CertificateExpired = 45 => "certificate_expired",
    CertificateUnknown = 46 => "certificate_unknown",
    IllegalParameter = 47 => "illegal_parameter",
    UnknownCa = 48 => "unknown_ca",
    AccessDenied = 49 => "access_denied",
    DecodeError = 50 => "decode_error",
    DecryptError = 51 => "decrypt_error",
    ExportRestriction = 60 => "export_restriction",
    ProtocolVersion = 70 => "protocol_version",
    InsufficientSecurity = 71 => "insufficient_security",
    InternalError = 80 => "internal_error",
    InappropriateFallback = 86 => "inappropriate_fallback",
    UserCanceled = 90 => "user_canceled",
    NoRenegotiation = 100 => "no_renegotiation",
    UnsupportedExtension = 110 => "unsupported_extension",
    CertificateUnobtainable = 111 => "certificate_unobtainable",
    UnrecognizedName = 112 => "unrecognized_name",
    BadCertificateStatusResponse = 113 => "bad_certificate_status_response",
    BadCertificateHashValue = 114 => "bad_certificate_hash_value",
}
