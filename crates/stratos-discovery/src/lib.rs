//! Discovery engine (spec.md §4.1): expanding-ring request flooding, bounded
//! response aggregation, best-response selection, and ancestor/descendant
//! pruning.
//!
//! Every public method is a pure state transition that returns the
//! [`DiscoveryAction`]s the caller must carry out (send a datagram, arm a
//! verify timer, hand responses to the schedule engine). The engine never
//! touches a transport or a timer itself — per the Design Notes in spec.md
//! §9, each engine receives its collaborators at construction and the
//! caller (the per-node dispatcher in `stratos-node`) is the only thing
//! that actually schedules callbacks or sends bytes. This keeps the engine
//! a plain `&mut self` state machine, testable without a runtime.

use std::sync::Arc;
use std::time::Duration;

use stratos_oracles::{NeighborhoodOracle, OntologyOracle, PositionOracle};
use stratos_results::ResultsCollector;
use stratos_routing::RouteTable;
use stratos_types::{NodeAddress, ProtocolConfig, RequestKey, ServiceId, Timestamp};
use stratos_wire::discovery::{
    search_error_key, search_request_key, search_response_key, select_best, SearchError,
    SearchRequest, SearchResponse,
};
use tracing::{debug, trace, warn};

mod record;

pub use record::RequestRecord;

/// Something the dispatcher must do as a result of a discovery transition.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryAction {
    /// Broadcast `request` on the discovery port, after send jitter.
    Broadcast(SearchRequest),
    /// Unicast `response` to `to` on the discovery port.
    UnicastResponse { to: NodeAddress, response: SearchResponse },
    /// Unicast `error` to `to` on the discovery port.
    UnicastError { to: NodeAddress, error: SearchError },
    /// Arm a one-shot verify callback for `key`, `after` from now.
    ScheduleVerify { key: RequestKey, after: Duration },
    /// This node is the originator and verify has concluded: hand the
    /// collected responses to the schedule engine.
    HandToSchedule { key: RequestKey, responses: Vec<SearchResponse> },
}

/// Runs one node's discovery protocol instance.
pub struct DiscoveryEngine {
    my_address: NodeAddress,
    config: ProtocolConfig,
    neighborhood: Arc<dyn NeighborhoodOracle>,
    ontology: Arc<dyn OntologyOracle>,
    position: Arc<dyn PositionOracle>,
    routes: Arc<dyn RouteTable>,
    results: Arc<dyn ResultsCollector>,
    requests: std::collections::HashMap<RequestKey, RequestRecord>,
}

impl DiscoveryEngine {
    pub fn new(
        my_address: NodeAddress,
        config: ProtocolConfig,
        neighborhood: Arc<dyn NeighborhoodOracle>,
        ontology: Arc<dyn OntologyOracle>,
        position: Arc<dyn PositionOracle>,
        routes: Arc<dyn RouteTable>,
        results: Arc<dyn ResultsCollector>,
    ) -> Self {
        Self {
            my_address,
            config,
            neighborhood,
            ontology,
            position,
            routes,
            results,
            requests: std::collections::HashMap::new(),
        }
    }

    /// The local trigger: construct a request and enter the tree as its
    /// root (spec.md §4.1, control-flow step 1).
    pub fn initiate(&mut self, now: f64, requested_service: ServiceId, max_distance_allowed: f64) -> (RequestKey, Vec<DiscoveryAction>) {
        let key = RequestKey::new(self.my_address, Timestamp(now));
        self.results.on_request(key, self.my_address);
        let request = SearchRequest {
            origin_address: self.my_address,
            origin_timestamp: Timestamp(now),
            origin_position: self.position.position(),
            requested_service,
            max_hops_allowed: self.config.max_hops,
            current_hops: 0,
            max_distance_allowed,
        };
        let actions = self.admit(key, None, &request, now);
        (key, actions)
    }

    /// An inbound `SearchRequest` heard from `sender` on the discovery port.
    pub fn on_search_request(&mut self, sender: NodeAddress, request: SearchRequest, now: f64) -> Vec<DiscoveryAction> {
        let key = search_request_key(&request);

        if let Some(record) = self.requests.get_mut(&key) {
            let incoming_hops = request.current_hops + 1;
            let d = record.hop_depth;
            if incoming_hops < d {
                debug!(%sender, key = %key, "possible ancestor heard us after a different parent was chosen");
                return vec![DiscoveryAction::UnicastError {
                    to: sender,
                    error: SearchError { origin_address: key.origin_address, origin_timestamp: key.origin_timestamp },
                }];
            }
            if incoming_hops == d + 2 {
                debug!(%sender, key = %key, "possible child added to pending_children");
                record.pending_children.insert(sender);
                return vec![];
            }
            trace!(%sender, key = %key, "duplicate request silently dropped");
            return vec![];
        }

        if request.current_hops > request.max_hops_allowed {
            trace!(%sender, key = %key, "request rejected: hop budget exceeded");
            return vec![];
        }
        let distance = self.position.position().distance_to(&request.origin_position);
        if distance > request.max_distance_allowed {
            trace!(%sender, key = %key, "request rejected: out of max distance");
            return vec![];
        }

        self.admit(key, Some(sender), &request, now)
    }

    /// First-time admission, shared by origination and forwarded receipt.
    fn admit(&mut self, key: RequestKey, sender: Option<NodeAddress>, request: &SearchRequest, now: f64) -> Vec<DiscoveryAction> {
        let current_hops = if sender.is_some() { request.current_hops + 1 } else { request.current_hops };

        self.routes.set(key.origin_address, sender.unwrap_or(self.my_address));

        let mut record = RequestRecord::new(key, sender, current_hops, request.max_hops_allowed, request.origin_position);

        if let Some(offer) = self.ontology.best_offered_for(&request.requested_service) {
            let response = SearchResponse {
                origin_address: key.origin_address,
                origin_timestamp: key.origin_timestamp,
                responder_address: self.my_address,
                hop_distance: current_hops,
                planar_distance: request.origin_position.distance_to(&self.position.position()),
                offered_service: offer,
            };
            record.responses.push(response);
        }

        let mut actions = Vec::new();
        let rebroadcast = SearchRequest { current_hops, ..request.clone() };
        actions.push(DiscoveryAction::Broadcast(rebroadcast));

        if current_hops == request.max_hops_allowed {
            self.requests.insert(key, record);
            actions.extend(self.run_verify_inner(key, now));
        } else {
            self.requests.insert(key, record);
            actions.push(DiscoveryAction::ScheduleVerify { key, after: Duration::from_secs_f64(self.config.verify_time) });
        }
        actions
    }

    /// An inbound `SearchResponse` from `sender`.
    pub fn on_search_response(&mut self, sender: NodeAddress, response: SearchResponse) -> Vec<DiscoveryAction> {
        let key = search_response_key(&response);
        self.routes.set(response.responder_address, sender);
        if let Some(record) = self.requests.get_mut(&key) {
            record.pending_children.remove(&sender);
            record.responses.push(response);
        }
        vec![]
    }

    /// An inbound `SearchError` from `sender`.
    pub fn on_search_error(&mut self, sender: NodeAddress, error: SearchError) -> Vec<DiscoveryAction> {
        let key = search_error_key(&error);
        if let Some(record) = self.requests.get_mut(&key) {
            record.pending_children.remove(&sender);
        }
        vec![]
    }

    /// The verify tick for `key`, fired by the dispatcher's timer.
    pub fn run_verify(&mut self, key: RequestKey, now: f64) -> Vec<DiscoveryAction> {
        if !self.requests.contains_key(&key) {
            return vec![];
        }
        self.run_verify_inner(key, now)
    }

    fn run_verify_inner(&mut self, key: RequestKey, now: f64) -> Vec<DiscoveryAction> {
        let neighbours = self.neighborhood.neighbours();
        let record = match self.requests.get_mut(&key) {
            Some(r) => r,
            None => return vec![],
        };
        record.pending_children.retain(|addr| neighbours.contains(addr));

        let elapsed = now - key.origin_timestamp.as_secs_f64();
        let budget = (record.max_hops_allowed.saturating_sub(record.hop_depth)) as f64 * self.config.verify_time;

        if record.pending_children.is_empty() || elapsed >= budget {
            self.condense_and_forward(key)
        } else {
            vec![DiscoveryAction::ScheduleVerify { key, after: Duration::from_secs_f64(self.config.verify_time) }]
        }
    }

    fn condense_and_forward(&mut self, key: RequestKey) -> Vec<DiscoveryAction> {
        let record = match self.requests.get(&key) {
            Some(r) => r,
            None => return vec![],
        };

        if record.responses.is_empty() {
            if key.origin_address == self.my_address {
                debug!(key = %key, "no responses by verify deadline, terminating silently");
                return vec![];
            }
            return vec![];
        }

        if key.origin_address == self.my_address {
            return vec![DiscoveryAction::HandToSchedule { key, responses: record.responses.clone() }];
        }

        let best = select_best(&record.responses).expect("non-empty responses checked above").clone();
        match record.parent_address {
            Some(parent) => vec![DiscoveryAction::UnicastResponse { to: parent, response: best }],
            None => {
                warn!(key = %key, "non-origin request has no parent to condense toward");
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratos_oracles::{HelloNeighborhood, SimPositionOracle, StaticOntology};
    use stratos_results::ChannelResultsCollector;
    use stratos_routing::InMemoryRouteTable;
    use stratos_types::{OfferedService, Position, SemanticDistance};
    use std::collections::HashMap;

    fn catalogue() -> HashMap<ServiceId, i32> {
        [(ServiceId::new("printing"), 0), (ServiceId::new("weather"), 10)].into_iter().collect()
    }

    fn engine(addr: u32, offers: Vec<ServiceId>, pos: Position, neighbours: &[u32]) -> DiscoveryEngine {
        let neighborhood = HelloNeighborhood::new();
        for n in neighbours {
            neighborhood.note_hello(NodeAddress(*n), 0.0);
        }
        DiscoveryEngine::new(
            NodeAddress(addr),
            ProtocolConfig::default(),
            Arc::new(neighborhood),
            Arc::new(StaticOntology::new(catalogue(), offers)),
            Arc::new(SimPositionOracle::new(pos)),
            Arc::new(InMemoryRouteTable::new()),
            Arc::new(ChannelResultsCollector::new(16)),
        )
    }

    #[test]
    fn single_hop_neighbour_responds() {
        let mut a = engine(1, vec![], Position::new(0.0, 0.0), &[2]);
        let (key, actions) = a.initiate(10.0, ServiceId::new("printing"), 600.0);
        assert!(matches!(actions[0], DiscoveryAction::Broadcast(_)));

        let mut b = engine(2, vec![ServiceId::new("printing")], Position::new(100.0, 0.0), &[1]);
        let request = match &actions[0] {
            DiscoveryAction::Broadcast(r) => r.clone(),
            _ => unreachable!(),
        };
        let b_actions = b.on_search_request(NodeAddress(1), request, 10.0);
        let response = b_actions.iter().find_map(|act| match act {
            DiscoveryAction::UnicastResponse { response, .. } => Some(response.clone()),
            _ => None,
        });
        assert!(response.is_none(), "leaf response only flows back through verify, not immediately");

        // B is a leaf at hop 1? No: max_hops=4, hop=1 != max, so B schedules verify.
        let verify_actions = b.run_verify(key, 10.0 + ProtocolConfig::default().verify_time);
        // no pending children, so condense_and_forward fires, and B is not origin -> unicasts to parent A.
        let to_a = verify_actions.iter().find_map(|act| match act {
            DiscoveryAction::UnicastResponse { to, response } if *to == NodeAddress(1) => Some(response.clone()),
            _ => None,
        });
        let resp = to_a.expect("B forwards its self-response to A");
        assert_eq!(resp.hop_distance, 1);
        assert_eq!(resp.offered_service.semantic_distance, SemanticDistance(0));

        let a_actions = a.on_search_response(NodeAddress(2), resp);
        assert!(a_actions.is_empty());
        let final_actions = a.run_verify(key, 10.0 + ProtocolConfig::default().verify_time);
        let schedule_call = final_actions.iter().find_map(|act| match act {
            DiscoveryAction::HandToSchedule { responses, .. } => Some(responses.clone()),
            _ => None,
        });
        let responses = schedule_call.expect("A hands responses to schedule");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].responder_address, NodeAddress(2));
    }

    #[test]
    fn isolated_originator_terminates_silently() {
        let mut a = engine(1, vec![], Position::new(0.0, 0.0), &[]);
        let (key, _actions) = a.initiate(10.0, ServiceId::new("weather"), 600.0);
        let verify_actions = a.run_verify(key, 11.0);
        assert!(verify_actions.is_empty());
    }

    #[test]
    fn duplicate_with_smaller_hop_triggers_search_error() {
        let mut b = engine(2, vec![], Position::new(0.0, 0.0), &[1, 3]);
        let req_from_a = SearchRequest {
            origin_address: NodeAddress(9),
            origin_timestamp: Timestamp(5.0),
            origin_position: Position::new(0.0, 0.0),
            requested_service: ServiceId::new("printing"),
            max_hops_allowed: 4,
            current_hops: 1,
            max_distance_allowed: 600.0,
        };
        let _ = b.on_search_request(NodeAddress(1), req_from_a.clone(), 5.0);
        // B's hop_depth is now 2. A second arrival with current_hops (pre-increment) = 0
        // increments to 1 < 2, classifying the sender as a possible ancestor.
        let mut ancestor_copy = req_from_a;
        ancestor_copy.current_hops = 0;
        let actions = b.on_search_request(NodeAddress(3), ancestor_copy, 5.0);
        assert!(matches!(actions[0], DiscoveryAction::UnicastError { to: NodeAddress(3), .. }));
    }

    #[test]
    fn select_best_is_idempotent_and_order_independent() {
        let mk = |addr: u32, dist: i32, hop: u8| SearchResponse {
            origin_address: NodeAddress(0),
            origin_timestamp: Timestamp(0.0),
            responder_address: NodeAddress(addr),
            hop_distance: hop,
            planar_distance: 0.0,
            offered_service: OfferedService { service: ServiceId::new("x"), semantic_distance: SemanticDistance(dist) },
        };
        let single = vec![mk(1, 3, 1)];
        assert_eq!(select_best(&single).unwrap(), &single[0]);

        let list = vec![mk(3, 2, 2), mk(1, 2, 1), mk(2, 1, 3)];
        let mut permuted = list.clone();
        permuted.reverse();
        assert_eq!(select_best(&list), select_best(&permuted));
        assert_eq!(select_best(&list).unwrap().responder_address, NodeAddress(2));
    }
}
