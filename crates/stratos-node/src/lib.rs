//! Per-node dispatcher (spec.md §5's "single per-node logical actor that
//! owns all mutable tables"). A [`Node`] owns one `DiscoveryEngine`, one
//! `ScheduleEngine` and one `ConsumptionEngine`; it never runs protocol
//! logic itself, only decodes/encodes datagrams at the three port
//! boundaries and carries out the [`DiscoveryAction`]/[`ScheduleAction`]/
//! [`ConsumptionAction`] values those engines return.
//!
//! Running one `tokio` task per simulated node, with every table reachable
//! only from inside that task, is exactly how SPEC_FULL.md §5 realizes the
//! spec's single-threaded-per-node model on a multi-threaded runtime: no
//! lock is needed because nothing outside the task ever touches this
//! struct's fields. The one piece of genuinely shared state is the
//! [`SimBus`] each node holds a cheap `Clone` of.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stratos_consumption::{ConsumptionAction, ConsumptionEngine, Role};
use stratos_discovery::{DiscoveryAction, DiscoveryEngine};
use stratos_net::{Datagram, NodeMailbox, Port, SimBus};
use stratos_oracles::{HelloNeighborhood, NeighborhoodOracle, OntologyOracle, PositionOracle};
use stratos_results::ResultsCollector;
use stratos_routing::RouteTable;
use stratos_schedule::{ScheduleAction, ScheduleEngine};
use stratos_time::{jitter, EventScheduler, TimerHandle};
use stratos_types::{NodeAddress, ProtocolConfig, RequestKey, ServiceId};
use stratos_wire::service::{TYPE_SERVICE_REQUEST, TYPE_SERVICE_RESPONSE};
use stratos_wire::{hello, Packet};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Self-addressed events: a fired timer loops back through this channel
/// rather than mutating engine state from inside the scheduler's own
/// callback, so every mutation still happens on the node's own task.
#[derive(Debug)]
enum NodeEvent {
    Verify(RequestKey),
    RequesterKeepalive(NodeAddress, ServiceId),
    ProviderKeepalive(NodeAddress, ServiceId),
    SendHello,
}

/// External trigger delivered to a running node's dispatch loop. The only
/// command today is `initiate()` itself (spec.md §4.1 control-flow step 1);
/// a simulation harness holds the paired sender and calls it whenever its
/// own request-generation policy (e.g. "every `nRequesters`-th node, every
/// few seconds") decides a node should originate a discovery round.
#[derive(Debug, Clone)]
pub enum NodeCommand {
    Initiate { requested_service: ServiceId, max_distance_allowed: f64 },
}

type KeepaliveKey = (NodeAddress, ServiceId);

/// Runs one simulated node: the three protocol engines, their collaborator
/// handles, and the bookkeeping needed to arm/cancel the timers those
/// engines ask for.
pub struct Node {
    address: NodeAddress,
    config: ProtocolConfig,
    bus: SimBus,
    scheduler: Arc<dyn EventScheduler>,
    neighborhood: Arc<HelloNeighborhood>,
    discovery: DiscoveryEngine,
    schedule: ScheduleEngine,
    consumption: ConsumptionEngine,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    commands_rx: mpsc::UnboundedReceiver<NodeCommand>,
    commands_open: bool,
    verify_timers: HashMap<RequestKey, TimerHandle>,
    requester_keepalives: HashMap<KeepaliveKey, TimerHandle>,
    provider_keepalives: HashMap<KeepaliveKey, TimerHandle>,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        address: NodeAddress,
        config: ProtocolConfig,
        bus: SimBus,
        scheduler: Arc<dyn EventScheduler>,
        neighborhood: Arc<HelloNeighborhood>,
        ontology: Arc<dyn OntologyOracle>,
        position: Arc<dyn PositionOracle>,
        routes: Arc<dyn RouteTable>,
        results: Arc<dyn ResultsCollector>,
    ) -> (Self, mpsc::UnboundedReceiver<NodeEvent>, mpsc::UnboundedSender<NodeCommand>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let discovery = DiscoveryEngine::new(
            address,
            config,
            neighborhood.clone(),
            ontology.clone(),
            position,
            routes.clone(),
            results.clone(),
        );
        let schedule = ScheduleEngine::new(config, results.clone());
        let consumption = ConsumptionEngine::new(address, config, routes, neighborhood.clone(), ontology, results);

        let node = Self {
            address,
            config,
            bus,
            scheduler,
            neighborhood,
            discovery,
            schedule,
            consumption,
            events_tx,
            commands_rx,
            commands_open: true,
            verify_timers: HashMap::new(),
            requester_keepalives: HashMap::new(),
            provider_keepalives: HashMap::new(),
        };
        (node, events_rx, commands_tx)
    }

    /// The local trigger (spec.md §4.1 control-flow step 1): construct a
    /// request for `requested_service` and enter the discovery tree as its
    /// root. Returns the fresh [`RequestKey`] naming the round.
    pub fn initiate(&mut self, requested_service: ServiceId, max_distance_allowed: f64) -> RequestKey {
        let now = self.scheduler.now();
        let (key, actions) = self.discovery.initiate(now, requested_service, max_distance_allowed);
        self.apply_discovery_actions(actions);
        key
    }

    /// Runs the node's dispatch loop until both its mailbox and its
    /// internal timer channel are exhausted (in practice: until the
    /// simulation harness drops the node's handles at shutdown).
    pub async fn run(mut self, mut mailbox: NodeMailbox, mut events_rx: mpsc::UnboundedReceiver<NodeEvent>) {
        info!(node = %self.address, "node dispatch loop starting");
        self.arm_hello_cycle();
        loop {
            tokio::select! {
                datagram = mailbox.discovery.recv() => {
                    match datagram {
                        Some(d) => self.on_discovery_datagram(d),
                        None => break,
                    }
                }
                datagram = mailbox.service.recv() => {
                    match datagram {
                        Some(d) => self.on_service_datagram(d),
                        None => break,
                    }
                }
                datagram = mailbox.hello.recv() => {
                    match datagram {
                        Some(d) => self.on_hello_datagram(d),
                        None => break,
                    }
                }
                event = events_rx.recv() => {
                    match event {
                        Some(e) => self.on_event(e),
                        None => break,
                    }
                }
                command = self.commands_rx.recv(), if self.commands_open => {
                    match command {
                        Some(NodeCommand::Initiate { requested_service, max_distance_allowed }) => {
                            let _ = self.initiate(requested_service, max_distance_allowed);
                        }
                        None => self.commands_open = false,
                    }
                }
            }
        }
        info!(node = %self.address, "node dispatch loop stopped");
    }

    // ---- Port-boundary decode/dispatch ------------------------------------

    fn on_discovery_datagram(&mut self, dgram: Datagram) {
        match Packet::decode(&dgram.bytes) {
            Ok(Packet::SearchRequest(req)) => {
                let now = self.scheduler.now();
                let actions = self.discovery.on_search_request(dgram.from, req, now);
                self.apply_discovery_actions(actions);
            }
            Ok(Packet::SearchResponse(resp)) => {
                let actions = self.discovery.on_search_response(dgram.from, resp);
                self.apply_discovery_actions(actions);
            }
            Ok(Packet::SearchError(err)) => {
                let actions = self.discovery.on_search_error(dgram.from, err);
                self.apply_discovery_actions(actions);
            }
            Ok(_) => debug!(node = %self.address, from = %dgram.from, "unexpected packet type on discovery port"),
            Err(e) => debug!(node = %self.address, from = %dgram.from, error = %e, "malformed discovery datagram dropped"),
        }
    }

    fn on_service_datagram(&mut self, dgram: Datagram) {
        match Packet::decode(&dgram.bytes) {
            Ok(Packet::ServiceRequest(req)) => {
                let actions = self.consumption.on_service_request(dgram.from, req);
                self.apply_consumption_actions(actions);
            }
            Ok(Packet::ServiceResponse(resp)) => {
                let now = self.scheduler.now();
                let actions = self.consumption.on_service_response(dgram.from, resp, now);
                self.apply_consumption_actions(actions);
            }
            Ok(Packet::ServiceError(err)) => {
                let actions = self.consumption.on_service_error(dgram.from, err);
                self.apply_consumption_actions(actions);
            }
            Ok(_) => debug!(node = %self.address, from = %dgram.from, "unexpected packet type on service port"),
            Err(e) => debug!(node = %self.address, from = %dgram.from, error = %e, "malformed service datagram dropped"),
        }
    }

    fn on_hello_datagram(&mut self, dgram: Datagram) {
        self.neighborhood.note_hello(dgram.from, self.scheduler.now());
    }

    fn on_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Verify(key) => {
                self.verify_timers.remove(&key);
                let now = self.scheduler.now();
                let actions = self.discovery.run_verify(key, now);
                self.apply_discovery_actions(actions);
            }
            NodeEvent::RequesterKeepalive(peer, service) => {
                self.requester_keepalives.remove(&(peer, service.clone()));
                let actions = self.consumption.on_requester_keepalive_timeout(peer, service);
                self.apply_consumption_actions(actions);
            }
            NodeEvent::ProviderKeepalive(peer, service) => {
                self.provider_keepalives.remove(&(peer, service.clone()));
                let actions = self.consumption.on_provider_keepalive_timeout(peer, service);
                self.apply_consumption_actions(actions);
            }
            NodeEvent::SendHello => {
                self.send_hello();
                let max_age = self.config.max_times_not_seen as f64 * self.config.hello_time;
                self.neighborhood.expire_stale(self.scheduler.now(), max_age);
                self.arm_hello_cycle();
            }
        }
    }

    // ---- Action fan-out, cross-engine wiring ------------------------------

    fn apply_discovery_actions(&mut self, actions: Vec<DiscoveryAction>) {
        for action in actions {
            match action {
                DiscoveryAction::Broadcast(request) => {
                    self.send_broadcast(Port::Discovery, Packet::SearchRequest(request).encode());
                }
                DiscoveryAction::UnicastResponse { to, response } => {
                    self.send_unicast(to, Port::Discovery, Packet::SearchResponse(response).encode());
                }
                DiscoveryAction::UnicastError { to, error } => {
                    self.send_unicast(to, Port::Discovery, Packet::SearchError(error).encode());
                }
                DiscoveryAction::ScheduleVerify { key, after } => {
                    self.arm_verify(key, after);
                }
                DiscoveryAction::HandToSchedule { key, responses } => {
                    let actions = self.schedule.build_and_execute(key, responses);
                    self.apply_schedule_actions(actions);
                }
            }
        }
    }

    fn apply_schedule_actions(&mut self, actions: Vec<ScheduleAction>) {
        for action in actions {
            match action {
                ScheduleAction::StartDialogue { key, peer, service, packets } => {
                    let actions = self.consumption.create_and_send_request(key, peer, service, packets);
                    self.apply_consumption_actions(actions);
                }
                ScheduleAction::Exhausted { key } => {
                    info!(node = %self.address, key = %key, "consumption schedule exhausted");
                }
            }
        }
    }

    fn apply_consumption_actions(&mut self, actions: Vec<ConsumptionAction>) {
        for action in actions {
            match action {
                ConsumptionAction::Unicast { to, role, packet } => {
                    let tag = match role {
                        Role::Requester => TYPE_SERVICE_REQUEST,
                        Role::Provider => TYPE_SERVICE_RESPONSE,
                    };
                    self.send_unicast(to, Port::Service, packet.encode(tag));
                }
                ConsumptionAction::UnicastError { to, error } => {
                    self.send_unicast(to, Port::Service, Packet::ServiceError(error).encode());
                }
                ConsumptionAction::ArmKeepalive { role, peer, service } => {
                    self.arm_keepalive(role, peer, service);
                }
                ConsumptionAction::CancelKeepalive { role, peer, service } => {
                    self.cancel_keepalive(role, peer, service);
                }
                ConsumptionAction::DialogueComplete { key } => {
                    let actions = self.schedule.continue_schedule(key);
                    self.apply_schedule_actions(actions);
                }
            }
        }
    }

    // ---- Transport: jittered send (spec.md §6) ----------------------------

    fn send_broadcast(&self, port: Port, bytes: Vec<u8>) {
        let bus = self.bus.clone();
        let me = self.address;
        let delay = jitter(
            Duration::from_secs_f64(self.config.min_jitter),
            Duration::from_secs_f64(self.config.max_jitter),
        );
        // One-shot send: the handle is discarded deliberately, there is
        // nothing later that would need to cancel an outbound send.
        let _ = self.scheduler.schedule_at(
            delay,
            Box::new(move || {
                tokio::spawn(async move { bus.broadcast(me, port, bytes).await });
            }),
        );
    }

    fn send_unicast(&self, to: NodeAddress, port: Port, bytes: Vec<u8>) {
        let bus = self.bus.clone();
        let me = self.address;
        let delay = jitter(
            Duration::from_secs_f64(self.config.min_jitter),
            Duration::from_secs_f64(self.config.max_jitter),
        );
        let _ = self.scheduler.schedule_at(
            delay,
            Box::new(move || {
                tokio::spawn(async move {
                    if bus.unicast(me, to, port, bytes).await.is_err() {
                        debug!(%to, "unicast dropped: destination not registered on bus");
                    }
                });
            }),
        );
    }

    fn send_hello(&self) {
        self.send_broadcast(Port::Hello, hello::encode());
    }

    // ---- Timer bookkeeping (spec.md §5: cancel-before-rearm) --------------

    fn arm_verify(&mut self, key: RequestKey, after: Duration) {
        if let Some(old) = self.verify_timers.remove(&key) {
            old.cancel();
        }
        let tx = self.events_tx.clone();
        let handle = self.scheduler.schedule_at(after, Box::new(move || {
            let _ = tx.send(NodeEvent::Verify(key));
        }));
        self.verify_timers.insert(key, handle);
    }

    fn arm_hello_cycle(&mut self) {
        let tx = self.events_tx.clone();
        let delay = Duration::from_secs_f64(self.config.hello_time);
        let _ = self.scheduler.schedule_at(delay, Box::new(move || {
            let _ = tx.send(NodeEvent::SendHello);
        }));
    }

    fn arm_keepalive(&mut self, role: Role, peer: NodeAddress, service: ServiceId) {
        let key = (peer, service.clone());
        let delay = Duration::from_secs_f64(self.config.hello_time);
        match role {
            Role::Requester => {
                if let Some(old) = self.requester_keepalives.remove(&key) {
                    old.cancel();
                }
                let tx = self.events_tx.clone();
                let handle = self.scheduler.schedule_at(delay, Box::new(move || {
                    let _ = tx.send(NodeEvent::RequesterKeepalive(peer, service));
                }));
                self.requester_keepalives.insert(key, handle);
            }
            Role::Provider => {
                if let Some(old) = self.provider_keepalives.remove(&key) {
                    old.cancel();
                }
                let tx = self.events_tx.clone();
                let handle = self.scheduler.schedule_at(delay, Box::new(move || {
                    let _ = tx.send(NodeEvent::ProviderKeepalive(peer, service));
                }));
                self.provider_keepalives.insert(key, handle);
            }
        }
    }

    fn cancel_keepalive(&mut self, role: Role, peer: NodeAddress, service: ServiceId) {
        let key = (peer, service);
        match role {
            Role::Requester => {
                if let Some(h) = self.requester_keepalives.remove(&key) {
                    h.cancel();
                }
            }
            Role::Provider => {
                if let Some(h) = self.provider_keepalives.remove(&key) {
                    h.cancel();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use stratos_oracles::{SimPositionOracle, StaticOntology};
    use stratos_results::{ChannelResultsCollector, Summary};
    use stratos_routing::InMemoryRouteTable;
    use stratos_time::TokioScheduler;
    use stratos_types::Position;

    fn fast_config() -> ProtocolConfig {
        ProtocolConfig {
            verify_time: 0.02,
            hello_time: 0.05,
            min_jitter: 0.001,
            max_jitter: 0.003,
            number_of_packets_to_send: 2,
            ..ProtocolConfig::default()
        }
    }

    /// End-to-end: A broadcasts a request, neighbour B is the only
    /// responder, A's verify condenses and hands to Schedule, Schedule
    /// starts a dialogue with B, and the requester side accrues the full
    /// packet count at the results collector (spec.md §8 scenario 1).
    #[tokio::test(flavor = "multi_thread")]
    async fn single_hop_discovery_leads_to_completed_dialogue() {
        let config = fast_config();
        let bus = SimBus::new();
        let results = Arc::new(ChannelResultsCollector::new(64));
        let mut summary_rx = results.subscribe();

        let catalogue: Map<ServiceId, i32> = [(ServiceId::new("printing"), 0)].into_iter().collect();

        let neighborhood_a = Arc::new(HelloNeighborhood::new());
        neighborhood_a.note_hello(NodeAddress(2), 0.0);
        let neighborhood_b = Arc::new(HelloNeighborhood::new());
        neighborhood_b.note_hello(NodeAddress(1), 0.0);

        let mailbox_a = bus.register(NodeAddress(1)).await;
        let mailbox_b = bus.register(NodeAddress(2)).await;

        let (mut node_a, events_a, _commands_a) = Node::new(
            NodeAddress(1),
            config,
            bus.clone(),
            Arc::new(TokioScheduler::new()),
            neighborhood_a,
            Arc::new(StaticOntology::new(catalogue.clone(), vec![])),
            Arc::new(SimPositionOracle::new(Position::new(0.0, 0.0))),
            Arc::new(InMemoryRouteTable::new()),
            results.clone(),
        );
        let (node_b, events_b, _commands_b) = Node::new(
            NodeAddress(2),
            config,
            bus.clone(),
            Arc::new(TokioScheduler::new()),
            neighborhood_b,
            Arc::new(StaticOntology::new(catalogue, vec![ServiceId::new("printing")])),
            Arc::new(SimPositionOracle::new(Position::new(10.0, 0.0))),
            Arc::new(InMemoryRouteTable::new()),
            results.clone(),
        );

        tokio::spawn(node_b.run(mailbox_b, events_b));
        let key = node_a.initiate(ServiceId::new("printing"), 600.0);
        tokio::spawn(node_a.run(mailbox_a, events_a));

        let mut summary = Summary::default();
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
        loop {
            tokio::select! {
                event = summary_rx.recv() => {
                    if let Ok(event) = event {
                        summary.record(&event);
                        if summary.packets_received >= 2 {
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        assert_eq!(summary.requests_issued, 1);
        assert_eq!(summary.packets_received, 2, "requester must accrue both DO packets from B");
        let _ = key;
    }
}
