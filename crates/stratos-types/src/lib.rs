//! Shared primitive types for the STRATOS service-discovery protocol.
//!
//! Every other crate in the workspace builds on these: node addresses,
//! planar positions, the request key that names a discovery round, the
//! opaque service identifier, and the semantic-distance metric the ontology
//! oracle hands back.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A node's address on the discovery/service/hello ports.
///
/// Wire-encoded as a plain `u32` (see `stratos-wire`). Ordering is numeric,
/// used as the final tie-breaker in `SelectBest` (spec.md §4.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddress(pub u32);

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

impl From<u32> for NodeAddress {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// A planar position in metres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another position, in metres.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A timestamp expressed as seconds since an agreed epoch, wrapped so it can
/// participate in `Eq`/`Hash`/`Ord` by its bit pattern.
///
/// spec.md §3 requires request keys to be compared bitwise; plain `f64`
/// implements neither `Eq` nor `Hash`, so the key wraps the bits rather than
/// the float.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Timestamp(pub f64);

impl Timestamp {
    /// The current wall-clock time, seconds since `UNIX_EPOCH`.
    ///
    /// Originators MUST use a monotonic or high-resolution timestamp so that
    /// two requests from the same node cannot collide (spec.md §3); wall
    /// clock plus sub-millisecond resolution is adequate for the simulated
    /// network this workspace targets.
    pub fn now() -> Self {
        let dur = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self(dur.as_secs_f64())
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0
    }

    fn bits(&self) -> u64 {
        self.0.to_bits()
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}
impl Eq for Timestamp {}

impl std::hash::Hash for Timestamp {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// `(origin_address, origin_timestamp)` — uniquely identifies a discovery
/// round across the network (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub origin_address: NodeAddress,
    pub origin_timestamp: Timestamp,
}

impl RequestKey {
    pub fn new(origin_address: NodeAddress, origin_timestamp: Timestamp) -> Self {
        Self {
            origin_address,
            origin_timestamp,
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "req({}@{})",
            self.origin_address.0,
            self.origin_timestamp.as_secs_f64()
        )
    }
}

/// An opaque, ontology-defined service identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub String);

impl ServiceId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-negative-by-convention integer distance produced by the ontology
/// oracle; smaller is a closer semantic match. Wire-encoded as `i32`
/// (spec.md §6) even though negative values are never produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SemanticDistance(pub i32);

/// A service offer: the service actually offered plus its semantic distance
/// from the requested service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfferedService {
    pub service: ServiceId,
    pub semantic_distance: SemanticDistance,
}

/// The protocol's tunable constants (spec.md §6), with the spec's defaults.
/// Threaded through every engine at construction rather than hardcoded, so
/// the simulation CLI's `nPackets`/`nSchedule`/etc. overrides reach the
/// protocol core without conditional compilation or global state.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub max_hops: u8,
    pub hello_time: f64,
    pub verify_time: f64,
    pub min_jitter: f64,
    pub max_jitter: f64,
    pub max_times_not_seen: u32,
    pub min_request_distance: f64,
    pub max_request_distance: f64,
    pub packet_length: usize,
    pub max_request_time: f64,
    pub max_schedule_size: usize,
    pub number_of_packets_to_send: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_hops: 4,
            hello_time: 2.0,
            verify_time: 1.0,
            min_jitter: 0.001,
            max_jitter: 0.010,
            max_times_not_seen: 3,
            min_request_distance: 400.0,
            max_request_distance: 600.0,
            packet_length: 256,
            max_request_time: 50.0,
            max_schedule_size: 3,
            number_of_packets_to_send: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_distance_is_euclidean() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn request_key_equality_is_bitwise_on_timestamp() {
        let a = RequestKey::new(NodeAddress(1), Timestamp(10.5));
        let b = RequestKey::new(NodeAddress(1), Timestamp(10.5));
        let c = RequestKey::new(NodeAddress(1), Timestamp(10.5000001));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn node_address_orders_numerically() {
        assert!(NodeAddress(3) > NodeAddress(2));
    }

    #[test]
    fn protocol_config_default_matches_spec_constants() {
        let cfg = ProtocolConfig::default();
        assert_eq!(cfg.max_hops, 4);
        assert_eq!(cfg.max_schedule_size, 3);
        assert_eq!(cfg.number_of_packets_to_send, 10);
        assert_eq!(cfg.packet_length, 256);
    }
}
