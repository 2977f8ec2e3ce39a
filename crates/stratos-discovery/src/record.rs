//! Per-key discovery state (spec.md §3's "Request record").

use std::collections::HashSet;

use stratos_types::{NodeAddress, Position, RequestKey};
use stratos_wire::discovery::SearchResponse;

/// Tracks one discovery round on one node: who its parent is, how deep it
/// sits in the tree, which children are still expected to answer, and the
/// responses collected so far.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub key: RequestKey,
    /// `None` only at the originator; the neighbour the first admissible
    /// copy arrived from otherwise. Never mutated after admission.
    pub parent_address: Option<NodeAddress>,
    /// The post-increment `current_hops` recorded at admission; invariant
    /// thereafter.
    pub hop_depth: u8,
    pub max_hops_allowed: u8,
    pub origin_position: Position,
    pub pending_children: HashSet<NodeAddress>,
    pub responses: Vec<SearchResponse>,
}

impl RequestRecord {
    pub fn new(
        key: RequestKey,
        parent_address: Option<NodeAddress>,
        hop_depth: u8,
        max_hops_allowed: u8,
        origin_position: Position,
    ) -> Self {
        Self {
            key,
            parent_address,
            hop_depth,
            max_hops_allowed,
            origin_position,
            pending_children: HashSet::new(),
            responses: Vec::new(),
        }
    }
}
