//! `status_request` (RFC 6066) and `status_request_v2` (RFC 6961).
//!
//! ```text
//! status_request:     CertificateStatusRequest              (may be empty in ServerHello)
//! status_request_v2:  CertificateStatusRequestItemV2 list<1..2^16-1>
//!
//! CertificateStatusRequest:        status_type(1) | request
//! CertificateStatusRequestItemV2:  status_type(1) | request_length(2) | request
//! OCSPStatusRequest:               responder_id_list<0..2^16-1> | request_extensions<0..2^16-1>
//! ```

use nom::bytes::complete::take;
use nom::combinator::all_consuming;
use nom::multi::many0;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::buffer::Buf;
use crate::types::AlertDescription;
use crate::Error;

/// Extension type of `status_request`.
pub const STATUS_REQUEST: u16 = 5;

/// Extension type of `status_request_v2`.
pub const STATUS_REQUEST_V2: u16 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertStatusRequestType {
    /// Staple the end-entity certificate's OCSP response.
    Ocsp,
    /// Staple responses for every certificate in the chain.
    OcspMulti,
    Unknown(u8),
}

impl CertStatusRequestType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => CertStatusRequestType::Ocsp,
            2 => CertStatusRequestType::OcspMulti,
            _ => CertStatusRequestType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            CertStatusRequestType::Ocsp => 1,
            CertStatusRequestType::OcspMulti => 2,
            CertStatusRequestType::Unknown(v) => *v,
        }
    }
}

fn u16_vec(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u16(input)?;
    take(len as usize)(input)
}

fn put_u16_vec(output: &mut Buf, data: &[u8]) {
    output.extend_from_slice(&(data.len() as u16).to_be_bytes());
    output.extend_from_slice(data);
}

/// OCSPStatusRequest. Responder ids and extensions are DER we do not look into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OcspStatusRequest {
    pub responder_ids: Vec<Vec<u8>>,
    /// DER encoded `Extensions`, e.g. a nonce. Empty if absent.
    pub extensions: Vec<u8>,
}

impl OcspStatusRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], OcspStatusRequest> {
        let (input, ids) = u16_vec(input)?;
        let (_, responder_ids) = all_consuming(many0(u16_vec))(ids)?;
        let (input, extensions) = u16_vec(input)?;
        Ok((
            input,
            OcspStatusRequest {
                responder_ids: responder_ids.into_iter().map(|id| id.to_vec()).collect(),
                extensions: extensions.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        let mut ids = Buf::new();
        for id in &self.responder_ids {
            put_u16_vec(&mut ids, id);
        }
        put_u16_vec(output, &ids);
        put_u16_vec(output, &self.extensions);
    }

    pub fn has_extensions(&self) -> bool {
        !self.extensions.is_empty()
    }
}

/// One status request, as carried by either extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertStatusRequest {
    Ocsp(OcspStatusRequest),
    OcspMulti(OcspStatusRequest),
    Unknown { status_type: u8, request: Vec<u8> },
}

impl CertStatusRequest {
    pub fn status_type(&self) -> CertStatusRequestType {
        match self {
            CertStatusRequest::Ocsp(_) => CertStatusRequestType::Ocsp,
            CertStatusRequest::OcspMulti(_) => CertStatusRequestType::OcspMulti,
            CertStatusRequest::Unknown { status_type, .. } => {
                CertStatusRequestType::Unknown(*status_type)
            }
        }
    }

    pub fn ocsp_request(&self) -> Option<&OcspStatusRequest> {
        match self {
            CertStatusRequest::Ocsp(r) | CertStatusRequest::OcspMulti(r) => Some(r),
            CertStatusRequest::Unknown { .. } => None,
        }
    }

    fn from_parts(status_type: u8, request: &[u8]) -> Result<Self, Error> {
        let parsed = match CertStatusRequestType::from_u8(status_type) {
            CertStatusRequestType::Ocsp => {
                CertStatusRequest::Ocsp(all_consuming(OcspStatusRequest::parse)(request)?.1)
            }
            CertStatusRequestType::OcspMulti => {
                CertStatusRequest::OcspMulti(all_consuming(OcspStatusRequest::parse)(request)?.1)
            }
            CertStatusRequestType::Unknown(_) => CertStatusRequest::Unknown {
                status_type,
                request: request.to_vec(),
            },
        };
        Ok(parsed)
    }

    fn serialize_request(&self, output: &mut Buf) {
        match self {
            CertStatusRequest::Ocsp(r) | CertStatusRequest::OcspMulti(r) => r.serialize(output),
            CertStatusRequest::Unknown { request, .. } => output.extend_from_slice(request),
        }
    }
}

fn decode_error(reason: &str) -> Error {
    Error::fatal(AlertDescription::DecodeError, reason)
}

/// Body of `status_request`. `None` is the empty ServerHello form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRequestExtension {
    pub request: Option<CertStatusRequest>,
}

impl StatusRequestExtension {
    pub fn parse(body: &[u8]) -> Result<Self, Error> {
        if body.is_empty() {
            return Ok(StatusRequestExtension { request: None });
        }
        let (request, status_type) = be_u8::<_, nom::error::Error<&[u8]>>(body)
            .map_err(|_| decode_error("Invalid status_request extension"))?;
        let request = CertStatusRequest::from_parts(status_type, request)
            .map_err(|_| decode_error("Invalid status_request extension"))?;
        if let CertStatusRequest::OcspMulti(_) = request {
            // ocsp_multi only exists in the v2 list.
            return Err(decode_error("ocsp_multi in status_request"));
        }
        Ok(StatusRequestExtension {
            request: Some(request),
        })
    }

    /// `type(2) | length(2) | body`.
    pub fn serialize(&self, output: &mut Buf) {
        let mut body = Buf::new();
        if let Some(r) = &self.request {
            body.push(r.status_type().as_u8());
            r.serialize_request(&mut body);
        }
        output.extend_from_slice(&STATUS_REQUEST.to_be_bytes());
        put_u16_vec(output, &body);
    }
}

/// Body of `status_request_v2`. Empty in ServerHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRequestV2Extension {
    pub requests: Vec<CertStatusRequest>,
}

fn parse_item(input: &[u8]) -> IResult<&[u8], (u8, &[u8])> {
    let (input, status_type) = be_u8(input)?;
    let (input, request) = u16_vec(input)?;
    Ok((input, (status_type, request)))
}

impl StatusRequestV2Extension {
    pub fn parse(body: &[u8]) -> Result<Self, Error> {
        if body.is_empty() {
            return Ok(StatusRequestV2Extension { requests: vec![] });
        }
        let invalid = |_| decode_error("Invalid status_request_v2 extension");

        let (tail, list) = u16_vec(body).map_err(invalid)?;
        if !tail.is_empty() || list.is_empty() {
            return Err(decode_error("Invalid status_request_v2 extension"));
        }
        let (_, items) = all_consuming(many0(parse_item))(list).map_err(invalid)?;

        let requests = items
            .into_iter()
            .map(|(t, r)| CertStatusRequest::from_parts(t, r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StatusRequestV2Extension { requests })
    }

    pub fn serialize(&self, output: &mut Buf) {
        let mut list = Buf::new();
        for r in &self.requests {
            list.push(r.status_type().as_u8());
            let mut request = Buf::new();
            r.serialize_request(&mut request);
            put_u16_vec(&mut list, &request);
        }
        let mut body = Buf::new();
        if !self.requests.is_empty() {
            put_u16_vec(&mut body, &list);
        }
        output.extend_from_slice(&STATUS_REQUEST_V2.to_be_bytes());
        put_u16_vec(output, &body);
    }
}

/// Pick the request to staple for, if any.
///
/// `status_request_v2` wins over `status_request`. Within v2, the first
/// `ocsp_multi` item wins over the first `ocsp` item.
pub fn select_status_request<'a>(
    v1: Option<&'a StatusRequestExtension>,
    v2: Option<&'a StatusRequestV2Extension>,
) -> Option<(CertStatusRequestType, &'a OcspStatusRequest)> {
    if let Some(v2) = v2 {
        let first_of = |t: CertStatusRequestType| {
            v2.requests
                .iter()
                .find(|r| r.status_type() == t)
                .and_then(|r| r.ocsp_request())
        };
        if let Some(r) = first_of(CertStatusRequestType::OcspMulti) {
            return Some((CertStatusRequestType::OcspMulti, r));
        }
        if let Some(r) = first_of(CertStatusRequestType::Ocsp) {
            return Some((CertStatusRequestType::Ocsp, r));
        }
    }

    match v1.and_then(|e| e.request.as_ref()) {
        Some(CertStatusRequest::Ocsp(r)) => Some((CertStatusRequestType::Ocsp, r)),
        _ => None,
    }
}
