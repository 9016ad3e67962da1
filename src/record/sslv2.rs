//! SSLv2 framed ClientHello.
//!
//! Old clients open with a V2 ClientHello that advertises SSLv3 or TLS
//! as its version. The message is rewritten into the equivalent TLS
//! ClientHello so the rest of the handshake never sees V2 framing.
//!
//! ```text
//! length(2, high bit set) | msg_type(1) = 1 | version(2)
//! | cipher_specs_length(2) | session_id_length(2) | challenge_length(2)
//! | cipher_specs (3 bytes each) | session_id | challenge
//! ```

use nom::bytes::complete::{tag, take};
use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::handshake::frame_tls;
use crate::types::{AlertDescription, HandshakeType, ProtocolVersion};
use crate::Error;

/// A V2 ERROR message with NO-CIPHER-ERROR, sent to a peer that only
/// speaks SSLv2.
pub const NO_CIPHER_ERROR: [u8; 5] = [0x80, 0x03, 0x00, 0x00, 0x01];

const V2_CLIENT_HELLO: u8 = 1;
const RANDOM_LEN: usize = 32;

#[derive(Debug)]
struct V2ClientHello<'a> {
    version: ProtocolVersion,
    cipher_specs: &'a [u8],
    session_id: &'a [u8],
    challenge: &'a [u8],
}

fn parse_v2_client_hello(input: &[u8]) -> IResult<&[u8], V2ClientHello<'_>> {
    let (input, _) = be_u16(input)?;
    let (input, _) = tag(&[V2_CLIENT_HELLO][..])(input)?;
    let (input, version) = ProtocolVersion::parse(input)?;
    let (input, cipher_len) = be_u16(input)?;
    let (input, session_id_len) = be_u16(input)?;
    let (input, challenge_len) = be_u16(input)?;
    let (input, cipher_specs) = take(cipher_len as usize)(input)?;
    let (input, session_id) = take(session_id_len as usize)(input)?;
    let (input, challenge) = take(challenge_len as usize)(input)?;
    Ok((
        input,
        V2ClientHello {
            version,
            cipher_specs,
            session_id,
            challenge,
        },
    ))
}

/// Convert a whole V2 ClientHello record into a TLS ClientHello handshake
/// message (4 byte header included).
pub fn convert_client_hello(record: &[u8]) -> Result<Buf, Error> {
    let (_, hello) = parse_v2_client_hello(record)?;

    if hello.cipher_specs.len() % 3 != 0 {
        return Err(Error::fatal(
            AlertDescription::DecodeError,
            "V2 cipher specs length is not a multiple of 3",
        ));
    }
    if hello.challenge.len() > RANDOM_LEN || hello.session_id.len() > 32 {
        return Err(Error::fatal(
            AlertDescription::DecodeError,
            "V2 ClientHello challenge or session id too long",
        ));
    }

    let mut body = Buf::with_capacity(64 + hello.cipher_specs.len());
    hello.version.serialize(&mut body);

    // The challenge sits at the right end of the random.
    let mut random = [0u8; RANDOM_LEN];
    random[RANDOM_LEN - hello.challenge.len()..].copy_from_slice(hello.challenge);
    body.extend_from_slice(&random);

    body.push(hello.session_id.len() as u8);
    body.extend_from_slice(hello.session_id);

    // Only specs in the 0x00xxxx range name TLS cipher suites.
    let suites: Vec<u8> = hello
        .cipher_specs
        .chunks_exact(3)
        .filter(|spec| spec[0] == 0)
        .flat_map(|spec| [spec[1], spec[2]])
        .collect();
    body.extend_from_slice(&(suites.len() as u16).to_be_bytes());
    body.extend_from_slice(&suites);

    // Null compression only.
    body.extend_from_slice(&[1, 0]);

    trace!(
        "Converted V2 ClientHello: {} suites, session id {} bytes, challenge {} bytes",
        suites.len() / 2,
        hello.session_id.len(),
        hello.challenge.len()
    );

    Ok(frame_tls(HandshakeType::ClientHello, &body))
}

/// Whether the byte after the two byte V2 length is a ClientHello.
pub(crate) fn is_v2_client_hello(record: &[u8]) -> bool {
    record.get(2) == Some(&V2_CLIENT_HELLO)
}
