//! Discovery-port packet bodies: `SearchRequest`, `SearchResponse`,
//! `SearchError` (spec.md §3, §6 — types 2, 3, 4).

use stratos_types::{NodeAddress, OfferedService, Position, RequestKey, SemanticDistance, ServiceId, Timestamp};

use crate::buf::{Reader, Writer};
use crate::WireError;

pub const TYPE_SEARCH_REQUEST: u8 = 2;
pub const TYPE_SEARCH_RESPONSE: u8 = 3;
pub const TYPE_SEARCH_ERROR: u8 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct SearchRequest {
    pub origin_address: NodeAddress,
    pub origin_timestamp: Timestamp,
    pub origin_position: Position,
    pub requested_service: ServiceId,
    pub max_hops_allowed: u8,
    pub current_hops: u8,
    pub max_distance_allowed: f64,
}

impl SearchRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(TYPE_SEARCH_REQUEST);
        w.put_u32(self.origin_address.0);
        w.put_f64(self.origin_timestamp.as_secs_f64());
        w.put_f64(self.origin_position.x);
        w.put_f64(self.origin_position.y);
        w.put_string(self.requested_service.as_str());
        w.put_u8(self.max_hops_allowed);
        w.put_u8(self.current_hops);
        w.put_f64(self.max_distance_allowed);
        w.into_bytes()
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(body);
        let origin_address = NodeAddress(r.get_u32()?);
        let origin_timestamp = Timestamp(r.get_f64()?);
        let origin_position = Position::new(r.get_f64()?, r.get_f64()?);
        let requested_service = ServiceId::new(r.get_string()?);
        let max_hops_allowed = r.get_u8()?;
        let current_hops = r.get_u8()?;
        let max_distance_allowed = r.get_f64()?;
        Ok(Self {
            origin_address,
            origin_timestamp,
            origin_position,
            requested_service,
            max_hops_allowed,
            current_hops,
            max_distance_allowed,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchResponse {
    pub origin_address: NodeAddress,
    pub origin_timestamp: Timestamp,
    pub responder_address: NodeAddress,
    pub hop_distance: u8,
    pub planar_distance: f64,
    pub offered_service: OfferedService,
}

impl SearchResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(TYPE_SEARCH_RESPONSE);
        w.put_u32(self.origin_address.0);
        w.put_f64(self.origin_timestamp.as_secs_f64());
        w.put_u32(self.responder_address.0);
        w.put_u8(self.hop_distance);
        w.put_f64(self.planar_distance);
        w.put_string(self.offered_service.service.as_str());
        w.put_i32(self.offered_service.semantic_distance.0);
        w.into_bytes()
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(body);
        let origin_address = NodeAddress(r.get_u32()?);
        let origin_timestamp = Timestamp(r.get_f64()?);
        let responder_address = NodeAddress(r.get_u32()?);
        let hop_distance = r.get_u8()?;
        let planar_distance = r.get_f64()?;
        let service = ServiceId::new(r.get_string()?);
        let semantic_distance = SemanticDistance(r.get_i32()?);
        Ok(Self {
            origin_address,
            origin_timestamp,
            responder_address,
            hop_distance,
            planar_distance,
            offered_service: OfferedService {
                service,
                semantic_distance,
            },
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchError {
    pub origin_address: NodeAddress,
    pub origin_timestamp: Timestamp,
}

impl SearchError {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(TYPE_SEARCH_ERROR);
        w.put_u32(self.origin_address.0);
        w.put_f64(self.origin_timestamp.as_secs_f64());
        w.into_bytes()
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(body);
        let origin_address = NodeAddress(r.get_u32()?);
        let origin_timestamp = Timestamp(r.get_f64()?);
        Ok(Self {
            origin_address,
            origin_timestamp,
        })
    }
}

/// The source overloads `GetRequestKey` across all three discovery header
/// types (spec.md §9); rather than a shared trait, each gets its own free
/// function returning the same `(origin_address, origin_timestamp)` pair,
/// since key extraction is the only behaviour the three types share.
pub fn search_request_key(request: &SearchRequest) -> RequestKey {
    RequestKey::new(request.origin_address, request.origin_timestamp)
}

pub fn search_response_key(response: &SearchResponse) -> RequestKey {
    RequestKey::new(response.origin_address, response.origin_timestamp)
}

pub fn search_error_key(error: &SearchError) -> RequestKey {
    RequestKey::new(error.origin_address, error.origin_timestamp)
}

/// `SelectBest` (spec.md §4.1): strict lexicographic ordering over a
/// discovery round's collected responses — smallest semantic distance,
/// then smallest hop distance, then smallest responder address.
/// Deterministic and order-independent; shared by the discovery engine
/// (picking what to condense upward) and the schedule engine (picking the
/// best peer to head the schedule).
pub fn select_best(responses: &[SearchResponse]) -> Option<&SearchResponse> {
    responses.iter().min_by(|a, b| {
        a.offered_service
            .semantic_distance
            .cmp(&b.offered_service.semantic_distance)
            .then(a.hop_distance.cmp(&b.hop_distance))
            .then(a.responder_address.cmp(&b.responder_address))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> SearchRequest {
        SearchRequest {
            origin_address: NodeAddress(1),
            origin_timestamp: Timestamp(1000.25),
            origin_position: Position::new(10.0, 20.0),
            requested_service: ServiceId::new("printing"),
            max_hops_allowed: 4,
            current_hops: 0,
            max_distance_allowed: 600.0,
        }
    }

    #[test]
    fn search_request_roundtrip() {
        let req = sample_request();
        let bytes = req.encode();
        assert_eq!(bytes[0], TYPE_SEARCH_REQUEST);
        let decoded = SearchRequest::decode(&bytes[1..]).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn search_response_roundtrip() {
        let resp = SearchResponse {
            origin_address: NodeAddress(1),
            origin_timestamp: Timestamp(1000.25),
            responder_address: NodeAddress(2),
            hop_distance: 1,
            planar_distance: 42.5,
            offered_service: OfferedService {
                service: ServiceId::new("printing"),
                semantic_distance: SemanticDistance(3),
            },
        };
        let bytes = resp.encode();
        assert_eq!(bytes[0], TYPE_SEARCH_RESPONSE);
        let decoded = SearchResponse::decode(&bytes[1..]).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn search_error_roundtrip_and_key() {
        let err = SearchError {
            origin_address: NodeAddress(9),
            origin_timestamp: Timestamp(500.0),
        };
        let bytes = err.encode();
        let decoded = SearchError::decode(&bytes[1..]).unwrap();
        assert_eq!(decoded, err);
        assert_eq!(search_error_key(&decoded).origin_address, NodeAddress(9));
    }

    fn resp(addr: u32, dist: i32, hop: u8) -> SearchResponse {
        SearchResponse {
            origin_address: NodeAddress(0),
            origin_timestamp: Timestamp(0.0),
            responder_address: NodeAddress(addr),
            hop_distance: hop,
            planar_distance: 0.0,
            offered_service: OfferedService { service: ServiceId::new("x"), semantic_distance: SemanticDistance(dist) },
        }
    }

    #[test]
    fn select_best_is_empty_on_empty_list() {
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn select_best_orders_by_semantic_distance_then_hop_then_address() {
        let list = vec![resp(1, 5, 1), resp(2, 1, 9), resp(3, 1, 2)];
        assert_eq!(select_best(&list).unwrap().responder_address, NodeAddress(3));
    }

    #[test]
    fn select_best_is_idempotent_and_order_independent() {
        let list = vec![resp(3, 2, 2), resp(1, 2, 1), resp(2, 1, 3)];
        let mut permuted = list.clone();
        permuted.reverse();
        assert_eq!(select_best(&[list[0].clone()]).unwrap(), &list[0]);
        assert_eq!(select_best(&list), select_best(&permuted));
    }
}
