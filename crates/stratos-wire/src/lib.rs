//! # stratos-wire
//!
//! Fixed little-endian binary codec for every datagram STRATOS nodes
//! exchange: the discovery port (`SearchRequest`/`SearchResponse`/
//! `SearchError`), the service port (`ServiceRequest`/`ServiceResponse`/
//! `ServiceError`), and the hello port. Layout is dictated by spec.md §6,
//! not inferred from a generic serializer — see [`buf`] for the cursor
//! primitives every packet type is built from.

pub mod buf;
pub mod discovery;
pub mod hello;
pub mod service;

pub use discovery::{
    search_error_key, search_request_key, search_response_key, select_best, SearchError,
    SearchRequest, SearchResponse,
};
pub use service::{DialogueFlag, ServiceError, ServiceRequestResponse};

/// Errors raised while decoding a datagram. Per spec.md §7, a codec failure
/// is always a silent drop at the port handler — callers should log and
/// discard, never propagate as a protocol error.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("datagram truncated")]
    Truncated,
    #[error("invalid UTF-8 in service identifier")]
    Utf8,
    #[error("unrecognised packet type tag: {0}")]
    BadTag(u8),
    #[error("unrecognised dialogue flag: {0}")]
    BadFlag(u8),
}

/// A decoded datagram from any of the three ports, tagged by its wire type
/// byte.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    SearchRequest(SearchRequest),
    SearchResponse(SearchResponse),
    SearchError(SearchError),
    ServiceRequest(ServiceRequestResponse),
    ServiceResponse(ServiceRequestResponse),
    ServiceError(ServiceError),
    Hello,
}

impl Packet {
    /// Decode a full datagram, including its leading type-tag byte.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let (&tag, body) = datagram.split_first().ok_or(WireError::Truncated)?;
        Ok(match tag {
            hello::TYPE_HELLO => Packet::Hello,
            discovery::TYPE_SEARCH_REQUEST => Packet::SearchRequest(SearchRequest::decode(body)?),
            discovery::TYPE_SEARCH_RESPONSE => Packet::SearchResponse(SearchResponse::decode(body)?),
            discovery::TYPE_SEARCH_ERROR => Packet::SearchError(SearchError::decode(body)?),
            service::TYPE_SERVICE_REQUEST => Packet::ServiceRequest(ServiceRequestResponse::decode(body)?),
            service::TYPE_SERVICE_RESPONSE => Packet::ServiceResponse(ServiceRequestResponse::decode(body)?),
            service::TYPE_SERVICE_ERROR => Packet::ServiceError(ServiceError::decode(body)?),
            other => return Err(WireError::BadTag(other)),
        })
    }

    /// Encode back to a full datagram.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Hello => hello::encode(),
            Packet::SearchRequest(r) => r.encode(),
            Packet::SearchResponse(r) => r.encode(),
            Packet::SearchError(r) => r.encode(),
            Packet::ServiceRequest(r) => r.encode(service::TYPE_SERVICE_REQUEST),
            Packet::ServiceResponse(r) => r.encode(service::TYPE_SERVICE_RESPONSE),
            Packet::ServiceError(r) => r.encode(),
        }
    }
}
