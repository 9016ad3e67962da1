//! OCSP stapling: the status request extensions and the response manager.

mod extension;
mod manager;

pub use extension::{select_status_request, CertStatusRequest, CertStatusRequestType};
pub use extension::{OcspStatusRequest, StatusRequestExtension, StatusRequestV2Extension};
pub use extension::{STATUS_REQUEST, STATUS_REQUEST_V2};
pub use manager::{can_staple, OcspResponse, ResponseFetcher, StatusResponseManager};
