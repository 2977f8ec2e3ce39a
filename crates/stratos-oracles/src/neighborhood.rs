//! Neighborhood oracle: "the current set of one-hop neighbours and a
//! membership test, maintained by periodic hello exchange" (spec.md §1, §6).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use stratos_types::NodeAddress;
use tracing::debug;

/// `neighbours()` / `is_neighbour(a)`, updated by hello processing.
pub trait NeighborhoodOracle: Send + Sync {
    fn neighbours(&self) -> HashSet<NodeAddress>;
    fn is_neighbour(&self, addr: NodeAddress) -> bool;
    /// Record that a hello was heard from `addr` at time `now`.
    fn note_hello(&self, addr: NodeAddress, now: f64);
    /// Drop any neighbour not heard from within `max_age` seconds of `now`.
    fn expire_stale(&self, now: f64, max_age: f64);
}

/// Hello-driven neighbour table: a peer is a neighbour as long as it has
/// been heard from within `MAX_TIMES_NOT_SEEN * HELLO_TIME` seconds
/// (spec.md §6).
#[derive(Default)]
pub struct HelloNeighborhood {
    last_seen: RwLock<HashMap<NodeAddress, f64>>,
}

impl HelloNeighborhood {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NeighborhoodOracle for HelloNeighborhood {
    fn neighbours(&self) -> HashSet<NodeAddress> {
        self.last_seen.read().expect("neighborhood lock poisoned").keys().copied().collect()
    }

    fn is_neighbour(&self, addr: NodeAddress) -> bool {
        self.last_seen.read().expect("neighborhood lock poisoned").contains_key(&addr)
    }

    fn note_hello(&self, addr: NodeAddress, now: f64) {
        self.last_seen.write().expect("neighborhood lock poisoned").insert(addr, now);
    }

    fn expire_stale(&self, now: f64, max_age: f64) {
        let mut table = self.last_seen.write().expect("neighborhood lock poisoned");
        table.retain(|addr, seen_at| {
            let keep = now - *seen_at <= max_age;
            if !keep {
                debug!(%addr, "neighbour expired: no hello within max age");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_address_is_not_a_neighbour() {
        let oracle = HelloNeighborhood::new();
        assert!(!oracle.is_neighbour(NodeAddress(1)));
    }

    #[test]
    fn hello_adds_neighbour() {
        let oracle = HelloNeighborhood::new();
        oracle.note_hello(NodeAddress(1), 10.0);
        assert!(oracle.is_neighbour(NodeAddress(1)));
        assert_eq!(oracle.neighbours(), [NodeAddress(1)].into_iter().collect());
    }

    #[test]
    fn stale_neighbour_is_expired() {
        let oracle = HelloNeighborhood::new();
        oracle.note_hello(NodeAddress(1), 0.0);
        oracle.note_hello(NodeAddress(2), 9.0);
        oracle.expire_stale(10.0, 6.0);
        assert!(!oracle.is_neighbour(NodeAddress(1)));
        assert!(oracle.is_neighbour(NodeAddress(2)));
    }
}
