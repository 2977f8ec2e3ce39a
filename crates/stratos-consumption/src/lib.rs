//! Consumption engine (spec.md §4.3, §4.4, §4.5): the three-phase
//! START → DO (×N) → STOP dialogue, run independently per peer on both the
//! requester and provider side, plus route-and-forward for dialogue
//! datagrams that are not addressed to this node.
//!
//! As with `stratos-discovery`'s `DiscoveryEngine` and `stratos-schedule`'s
//! `ScheduleEngine`, every public method is a pure `&mut self` transition
//! returning the [`ConsumptionAction`]s the dispatcher must carry out.
//! Completion on the requester side is reported back as
//! [`ConsumptionAction::DialogueComplete`] rather than by calling into the
//! schedule engine directly, so `stratos-consumption` never depends on
//! `stratos-schedule` (spec.md §9's Design Notes).

use std::collections::HashMap;
use std::sync::Arc;

use stratos_oracles::{NeighborhoodOracle, OntologyOracle};
use stratos_results::ResultsCollector;
use stratos_routing::RouteTable;
use stratos_types::{NodeAddress, ProtocolConfig, RequestKey, ServiceId};
use stratos_wire::service::{DialogueFlag, ServiceError, ServiceRequestResponse};
use tracing::{debug, warn};

mod dialogue;

pub use dialogue::{DialogueStatus, ProviderDialogue, RequesterDialogue, Role};

type DialogueKey = (NodeAddress, ServiceId);

/// What the dispatcher must do as a result of a consumption transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumptionAction {
    /// Send `packet` to `to` (already resolved to the next hop). `role`
    /// says which wire tag the dispatcher must encode it with:
    /// `Requester` packets (START/DO/STOP) go out as `ServiceRequest`,
    /// `Provider` packets (STARTED/DO/STOPPED) go out as `ServiceResponse`.
    Unicast { to: NodeAddress, role: Role, packet: ServiceRequestResponse },
    /// Send `error` to `to` (already resolved to the next hop).
    UnicastError { to: NodeAddress, error: ServiceError },
    /// Arm a one-shot `HELLO_TIME` keepalive for `(peer, service)` on the
    /// given side.
    ArmKeepalive { role: Role, peer: NodeAddress, service: ServiceId },
    /// Cancel the keepalive for `(peer, service)` on the given side.
    CancelKeepalive { role: Role, peer: NodeAddress, service: ServiceId },
    /// Requester-side dialogue finished or aborted: advance the schedule.
    DialogueComplete { key: RequestKey },
}

/// Runs one node's dialogue state, both sides at once (a node is commonly
/// both a requester for some services and a provider for others).
pub struct ConsumptionEngine {
    my_address: NodeAddress,
    config: ProtocolConfig,
    routes: Arc<dyn RouteTable>,
    neighborhood: Arc<dyn NeighborhoodOracle>,
    ontology: Arc<dyn OntologyOracle>,
    results: Arc<dyn ResultsCollector>,
    requester: HashMap<DialogueKey, RequesterDialogue>,
    provider: HashMap<DialogueKey, ProviderDialogue>,
}

impl ConsumptionEngine {
    pub fn new(
        my_address: NodeAddress,
        config: ProtocolConfig,
        routes: Arc<dyn RouteTable>,
        neighborhood: Arc<dyn NeighborhoodOracle>,
        ontology: Arc<dyn OntologyOracle>,
        results: Arc<dyn ResultsCollector>,
    ) -> Self {
        Self {
            my_address,
            config,
            routes,
            neighborhood,
            ontology,
            results,
            requester: HashMap::new(),
            provider: HashMap::new(),
        }
    }

    fn next_hop(&self, destination: NodeAddress) -> Option<NodeAddress> {
        self.routes.get(destination).filter(|hop| self.neighborhood.is_neighbour(*hop))
    }

    /// Route-and-forward (spec.md §4.5): `packet.destination_address` is not
    /// local, so either retransmit toward the next hop or bounce a
    /// `ServiceError` back toward the packet's logical sender. `role` names
    /// the direction the packet is travelling in (`Requester` for a request
    /// still heading toward its provider, `Provider` for a response heading
    /// back), so the dispatcher can re-encode it with the same wire tag it
    /// arrived under.
    fn forward(&self, link_from: NodeAddress, role: Role, service: ServiceId, packet: ServiceRequestResponse) -> Vec<ConsumptionAction> {
        match self.next_hop(packet.destination_address) {
            Some(next_hop) => vec![ConsumptionAction::Unicast { to: next_hop, role, packet }],
            None => {
                debug!(from = %link_from, dest = %packet.destination_address, "no route to forward dialogue packet, bouncing error");
                vec![ConsumptionAction::UnicastError {
                    to: packet.sender_address,
                    error: ServiceError::bounce(packet.sender_address, packet.destination_address, service),
                }]
            }
        }
    }

    /// Send `packet` toward `destination`, or — if the next hop is no
    /// longer a neighbour — abort the dialogue named by `dialogue_key` on
    /// the given `role` and report that upward.
    fn send_or_abort(&mut self, role: Role, dialogue_key: DialogueKey, destination: NodeAddress, packet: ServiceRequestResponse) -> Vec<ConsumptionAction> {
        if let Some(next_hop) = self.next_hop(destination) {
            return vec![ConsumptionAction::Unicast { to: next_hop, role, packet }];
        }
        warn!(peer = %destination, ?role, "next hop no longer a neighbour, aborting dialogue");
        self.abort(role, dialogue_key)
    }

    fn abort(&mut self, role: Role, dialogue_key: DialogueKey) -> Vec<ConsumptionAction> {
        let mut actions = vec![ConsumptionAction::CancelKeepalive {
            role,
            peer: dialogue_key.0,
            service: dialogue_key.1.clone(),
        }];
        match role {
            Role::Requester => {
                if let Some(record) = self.requester.remove(&dialogue_key) {
                    actions.push(ConsumptionAction::DialogueComplete { key: record.key });
                }
            }
            Role::Provider => {
                self.provider.remove(&dialogue_key);
            }
        }
        actions
    }

    // ---- Requester side (spec.md §4.3) -----------------------------------

    /// `create_and_send_request(peer, service, n)`: the schedule engine has
    /// just told us to engage `peer` for `service` with `n` DO packets.
    pub fn create_and_send_request(&mut self, key: RequestKey, peer: NodeAddress, service: ServiceId, packets: u32) -> Vec<ConsumptionAction> {
        let dialogue_key = (peer, service.clone());
        self.requester.insert(
            dialogue_key.clone(),
            RequesterDialogue { key, status: DialogueStatus::Start, max_packets: packets, packets_received: 0 },
        );

        let wire = ServiceRequestResponse {
            sender_address: self.my_address,
            destination_address: peer,
            service: service.clone(),
            flag: DialogueFlag::Start,
        };
        let mut actions = self.send_or_abort(Role::Requester, dialogue_key, peer, wire);
        if !matches!(actions.last(), Some(ConsumptionAction::DialogueComplete { .. })) {
            actions.push(ConsumptionAction::ArmKeepalive { role: Role::Requester, peer, service });
        }
        actions
    }

    /// An inbound `ServiceResponse` datagram, heard on the link from `link_from`.
    pub fn on_service_response(&mut self, link_from: NodeAddress, packet: ServiceRequestResponse, now: f64) -> Vec<ConsumptionAction> {
        if packet.destination_address != self.my_address {
            return self.forward(link_from, Role::Provider, packet.service.clone(), packet);
        }

        let dialogue_key = (packet.sender_address, packet.service.clone());
        let mut actions = vec![ConsumptionAction::CancelKeepalive {
            role: Role::Requester,
            peer: packet.sender_address,
            service: packet.service.clone(),
        }];

        let status = match self.requester.get(&dialogue_key) {
            Some(record) => record.status,
            None => {
                actions.push(ConsumptionAction::UnicastError {
                    to: packet.sender_address,
                    error: ServiceError::bounce(packet.sender_address, self.my_address, packet.service.clone()),
                });
                return actions;
            }
        };

        match (status, packet.flag) {
            (DialogueStatus::Start, DialogueFlag::Started) => {
                self.requester.get_mut(&dialogue_key).expect("checked above").status = DialogueStatus::Do;
                let wire = ServiceRequestResponse { sender_address: self.my_address, destination_address: packet.sender_address, service: packet.service.clone(), flag: DialogueFlag::Do };
                actions.extend(self.send_or_abort(Role::Requester, dialogue_key.clone(), packet.sender_address, wire));
                actions.push(ConsumptionAction::ArmKeepalive { role: Role::Requester, peer: packet.sender_address, service: packet.service });
            }
            (DialogueStatus::Do, DialogueFlag::Do) => {
                let record = self.requester.get_mut(&dialogue_key).expect("checked above");
                if record.packets_received + 1 <= record.max_packets {
                    record.packets_received += 1;
                    self.results.on_packet(now);
                    let wire = ServiceRequestResponse { sender_address: self.my_address, destination_address: packet.sender_address, service: packet.service.clone(), flag: DialogueFlag::Do };
                    actions.extend(self.send_or_abort(Role::Requester, dialogue_key.clone(), packet.sender_address, wire));
                } else {
                    record.status = DialogueStatus::Stop;
                    let wire = ServiceRequestResponse { sender_address: self.my_address, destination_address: packet.sender_address, service: packet.service.clone(), flag: DialogueFlag::Stop };
                    actions.extend(self.send_or_abort(Role::Requester, dialogue_key.clone(), packet.sender_address, wire));
                }
                actions.push(ConsumptionAction::ArmKeepalive { role: Role::Requester, peer: packet.sender_address, service: packet.service });
            }
            (_, DialogueFlag::Stopped) => {
                if let Some(record) = self.requester.remove(&dialogue_key) {
                    actions.push(ConsumptionAction::DialogueComplete { key: record.key });
                }
            }
            _ => {
                debug!(peer = %packet.sender_address, ?status, flag = ?packet.flag, "out-of-state dialogue response");
                actions.push(ConsumptionAction::UnicastError {
                    to: packet.sender_address,
                    error: ServiceError::bounce(packet.sender_address, self.my_address, packet.service.clone()),
                });
            }
        }
        actions
    }

    /// The requester-side keepalive for `(peer, service)` fired before the
    /// next response arrived: equivalent to receiving STOPPED.
    pub fn on_requester_keepalive_timeout(&mut self, peer: NodeAddress, service: ServiceId) -> Vec<ConsumptionAction> {
        let dialogue_key = (peer, service);
        match self.requester.remove(&dialogue_key) {
            Some(record) => vec![ConsumptionAction::DialogueComplete { key: record.key }],
            None => vec![],
        }
    }

    // ---- Provider side (spec.md §4.4) ------------------------------------

    /// An inbound `ServiceRequest` datagram, heard on the link from `link_from`.
    pub fn on_service_request(&mut self, link_from: NodeAddress, packet: ServiceRequestResponse) -> Vec<ConsumptionAction> {
        if packet.destination_address != self.my_address {
            return self.forward(link_from, Role::Requester, packet.service.clone(), packet);
        }

        if !self.ontology.provides(&packet.service) {
            return vec![ConsumptionAction::UnicastError {
                to: packet.sender_address,
                error: ServiceError::bounce(packet.sender_address, self.my_address, packet.service.clone()),
            }];
        }

        let dialogue_key = (packet.sender_address, packet.service.clone());
        let mut actions = vec![ConsumptionAction::CancelKeepalive {
            role: Role::Provider,
            peer: packet.sender_address,
            service: packet.service.clone(),
        }];

        let status = self.provider.get(&dialogue_key).map(|r| r.status).unwrap_or(DialogueStatus::Null);

        match (status, packet.flag) {
            (DialogueStatus::Null, DialogueFlag::Start) => {
                self.provider.insert(dialogue_key.clone(), ProviderDialogue { status: DialogueStatus::Do, packets_sent: 0 });
                let wire = ServiceRequestResponse { sender_address: self.my_address, destination_address: packet.sender_address, service: packet.service.clone(), flag: DialogueFlag::Started };
                actions.extend(self.send_or_abort(Role::Provider, dialogue_key.clone(), packet.sender_address, wire));
                actions.push(ConsumptionAction::ArmKeepalive { role: Role::Provider, peer: packet.sender_address, service: packet.service });
            }
            (DialogueStatus::Do, DialogueFlag::Do) => {
                let record = self.provider.get_mut(&dialogue_key).expect("checked above");
                if record.packets_sent < self.config.number_of_packets_to_send {
                    record.packets_sent += 1;
                    let wire = ServiceRequestResponse { sender_address: self.my_address, destination_address: packet.sender_address, service: packet.service.clone(), flag: DialogueFlag::Do };
                    actions.extend(self.send_or_abort(Role::Provider, dialogue_key.clone(), packet.sender_address, wire));
                } else {
                    record.status = DialogueStatus::Stopped;
                    let wire = ServiceRequestResponse { sender_address: self.my_address, destination_address: packet.sender_address, service: packet.service.clone(), flag: DialogueFlag::Stopped };
                    actions.extend(self.send_or_abort(Role::Provider, dialogue_key.clone(), packet.sender_address, wire));
                }
                actions.push(ConsumptionAction::ArmKeepalive { role: Role::Provider, peer: packet.sender_address, service: packet.service });
            }
            (_, DialogueFlag::Stop) => {
                if let Some(record) = self.provider.get_mut(&dialogue_key) {
                    record.status = DialogueStatus::Stopped;
                }
                let wire = ServiceRequestResponse { sender_address: self.my_address, destination_address: packet.sender_address, service: packet.service.clone(), flag: DialogueFlag::Stopped };
                actions.extend(self.send_or_abort(Role::Provider, dialogue_key.clone(), packet.sender_address, wire));
                self.provider.remove(&dialogue_key);
            }
            _ => {
                debug!(peer = %packet.sender_address, ?status, flag = ?packet.flag, "out-of-state dialogue request");
                actions.push(ConsumptionAction::UnicastError {
                    to: packet.sender_address,
                    error: ServiceError::bounce(packet.sender_address, self.my_address, packet.service.clone()),
                });
            }
        }
        actions
    }

    /// The provider-side keepalive for `(peer, service)` fired: the
    /// requester has gone silent, drop the dialogue.
    pub fn on_provider_keepalive_timeout(&mut self, peer: NodeAddress, service: ServiceId) -> Vec<ConsumptionAction> {
        self.provider.remove(&(peer, service));
        vec![]
    }

    /// An inbound `ServiceError` on either side: prune whichever side of
    /// the dialogue still has state for `(peer, service)`.
    pub fn on_service_error(&mut self, link_from: NodeAddress, error: ServiceError) -> Vec<ConsumptionAction> {
        if error.destination_address != self.my_address {
            return self.forward_error(link_from, error);
        }
        let dialogue_key = (error.sender_address, error.service.clone());
        let mut actions = Vec::new();
        if let Some(record) = self.requester.remove(&dialogue_key) {
            actions.push(ConsumptionAction::CancelKeepalive { role: Role::Requester, peer: dialogue_key.0, service: dialogue_key.1.clone() });
            actions.push(ConsumptionAction::DialogueComplete { key: record.key });
        }
        if self.provider.remove(&dialogue_key).is_some() {
            actions.push(ConsumptionAction::CancelKeepalive { role: Role::Provider, peer: dialogue_key.0, service: dialogue_key.1 });
        }
        actions
    }

    fn forward_error(&self, link_from: NodeAddress, error: ServiceError) -> Vec<ConsumptionAction> {
        match self.next_hop(error.destination_address) {
            Some(next_hop) => vec![ConsumptionAction::UnicastError { to: next_hop, error }],
            None => {
                debug!(from = %link_from, dest = %error.destination_address, "dropping undeliverable service error, no route");
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratos_oracles::{HelloNeighborhood, StaticOntology};
    use stratos_results::ChannelResultsCollector;
    use stratos_routing::InMemoryRouteTable;
    use stratos_types::Timestamp;
    use std::collections::HashMap as Map;

    fn key() -> RequestKey {
        RequestKey::new(NodeAddress(1), Timestamp(0.0))
    }

    fn engine(addr: u32, neighbours: &[u32], route_next_hops: &[(u32, u32)], offers: Vec<ServiceId>) -> ConsumptionEngine {
        let neighborhood = HelloNeighborhood::new();
        for n in neighbours {
            neighborhood.note_hello(NodeAddress(*n), 0.0);
        }
        let routes = InMemoryRouteTable::new();
        for (dest, hop) in route_next_hops {
            routes.set(NodeAddress(*dest), NodeAddress(*hop));
        }
        let catalogue: Map<ServiceId, i32> = [(ServiceId::new("printing"), 0)].into_iter().collect();
        ConsumptionEngine::new(
            NodeAddress(addr),
            ProtocolConfig::default(),
            Arc::new(routes),
            Arc::new(neighborhood),
            Arc::new(StaticOntology::new(catalogue, offers)),
            Arc::new(ChannelResultsCollector::new(16)),
        )
    }

    #[test]
    fn requester_start_then_started_then_do_cycle_then_stopped_completes() {
        let mut requester = engine(1, &[2], &[(2, 2)], vec![]);
        let actions = requester.create_and_send_request(key(), NodeAddress(2), ServiceId::new("printing"), 1);
        assert!(actions.iter().any(|a| matches!(a, ConsumptionAction::Unicast { to: NodeAddress(2), .. })));

        let started = ServiceRequestResponse { sender_address: NodeAddress(2), destination_address: NodeAddress(1), service: ServiceId::new("printing"), flag: DialogueFlag::Started };
        let actions = requester.on_service_response(NodeAddress(2), started, 0.0);
        assert!(actions.iter().any(|a| matches!(a, ConsumptionAction::Unicast { packet, .. } if packet.flag == DialogueFlag::Do)));

        let do1 = ServiceRequestResponse { sender_address: NodeAddress(2), destination_address: NodeAddress(1), service: ServiceId::new("printing"), flag: DialogueFlag::Do };
        let actions = requester.on_service_response(NodeAddress(2), do1.clone(), 0.0);
        assert!(actions.iter().any(|a| matches!(a, ConsumptionAction::Unicast { packet, .. } if packet.flag == DialogueFlag::Do)));

        let do2 = do1;
        let actions = requester.on_service_response(NodeAddress(2), do2, 0.0);
        assert!(actions.iter().any(|a| matches!(a, ConsumptionAction::Unicast { packet, .. } if packet.flag == DialogueFlag::Stop)), "second DO exceeds max_packets=1, requester must STOP");

        let stopped = ServiceRequestResponse { sender_address: NodeAddress(2), destination_address: NodeAddress(1), service: ServiceId::new("printing"), flag: DialogueFlag::Stopped };
        let actions = requester.on_service_response(NodeAddress(2), stopped, 0.0);
        assert!(actions.iter().any(|a| matches!(a, ConsumptionAction::DialogueComplete { .. })));
    }

    #[test]
    fn requester_keepalive_timeout_completes_dialogue() {
        let mut requester = engine(1, &[2], &[(2, 2)], vec![]);
        requester.create_and_send_request(key(), NodeAddress(2), ServiceId::new("printing"), 5);
        let actions = requester.on_requester_keepalive_timeout(NodeAddress(2), ServiceId::new("printing"));
        assert_eq!(actions, vec![ConsumptionAction::DialogueComplete { key: key() }]);
    }

    #[test]
    fn provider_rejects_unoffered_service() {
        let mut provider = engine(2, &[1], &[(1, 1)], vec![]);
        let request = ServiceRequestResponse { sender_address: NodeAddress(1), destination_address: NodeAddress(2), service: ServiceId::new("printing"), flag: DialogueFlag::Start };
        let actions = provider.on_service_request(NodeAddress(1), request);
        assert!(matches!(actions[0], ConsumptionAction::UnicastError { .. }));
    }

    #[test]
    fn provider_starts_and_responds_with_started() {
        let mut provider = engine(2, &[1], &[(1, 1)], vec![ServiceId::new("printing")]);
        let request = ServiceRequestResponse { sender_address: NodeAddress(1), destination_address: NodeAddress(2), service: ServiceId::new("printing"), flag: DialogueFlag::Start };
        let actions = provider.on_service_request(NodeAddress(1), request);
        assert!(actions.iter().any(|a| matches!(a, ConsumptionAction::Unicast { packet, .. } if packet.flag == DialogueFlag::Started)));
    }

    #[test]
    fn dialogue_with_no_route_aborts_immediately() {
        let mut requester = engine(1, &[], &[], vec![]);
        let actions = requester.create_and_send_request(key(), NodeAddress(2), ServiceId::new("printing"), 3);
        assert!(actions.iter().any(|a| matches!(a, ConsumptionAction::DialogueComplete { .. })));
    }
}
