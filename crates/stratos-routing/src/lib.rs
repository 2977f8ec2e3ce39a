//! Route table: destination address -> next-hop address (spec.md §6),
//! installed as a side effect of discovery traffic and read by dialogue
//! traffic.

use std::collections::HashMap;
use std::sync::RwLock;

use stratos_types::NodeAddress;

/// `get(dest)` / `set(next_hop, dest)`.
pub trait RouteTable: Send + Sync {
    /// The next hop toward `dest`, or `None` if no route has been installed
    /// (spec.md's "returns zero/none if absent").
    fn get(&self, dest: NodeAddress) -> Option<NodeAddress>;

    /// Install (or overwrite) the route to `dest` via `next_hop`.
    fn set(&self, dest: NodeAddress, next_hop: NodeAddress);
}

/// `HashMap`-backed route table, single-owner per node per §5.
#[derive(Default)]
pub struct InMemoryRouteTable {
    routes: RwLock<HashMap<NodeAddress, NodeAddress>>,
}

impl InMemoryRouteTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RouteTable for InMemoryRouteTable {
    fn get(&self, dest: NodeAddress) -> Option<NodeAddress> {
        self.routes.read().expect("route table lock poisoned").get(&dest).copied()
    }

    fn set(&self, dest: NodeAddress, next_hop: NodeAddress) {
        self.routes.write().expect("route table lock poisoned").insert(dest, next_hop);
    }
}
