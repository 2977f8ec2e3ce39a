//! Simulation harness (SPEC_FULL.md §4.15): places `nMobile` nodes at random
//! positions on a bounded plane, gives each a slice of a shared service
//! catalogue, wires every node to one [`SimBus`], runs a random-waypoint
//! mobility stepper on the same event scheduler the protocol engines use,
//! and periodically triggers `initiate()` on `nRequesters` of the nodes.
//!
//! This is "necessary for any runnable artifact" (spec.md treats neighbour
//! discovery, ontology, position and the simulation driver as external
//! collaborators) but is not itself part of the protocol core — it only
//! assembles the core's actual collaborators (`stratos-oracles`,
//! `stratos-net`, `stratos-node`) into something that can be run end to end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use stratos_net::SimBus;
use stratos_node::{Node, NodeCommand};
use stratos_oracles::{HelloNeighborhood, SimPositionOracle, StaticOntology};
use stratos_results::{ChannelResultsCollector, Summary};
use stratos_routing::InMemoryRouteTable;
use stratos_time::{EventScheduler, TokioScheduler};
use stratos_types::{NodeAddress, Position, ProtocolConfig, ServiceId};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::SimConfig;

const MOBILITY_TICK: Duration = Duration::from_millis(500);
const WAYPOINT_ARRIVAL_EPSILON_M: f64 = 1.0;

/// One node's mobility state: the harness moves its [`SimPositionOracle`]
/// toward `target`, picking a fresh random target on arrival.
struct MobileNode {
    position: Arc<SimPositionOracle>,
    target: Position,
}

/// Assembles and runs one simulated STRATOS network.
pub struct Harness {
    config: SimConfig,
    protocol: ProtocolConfig,
    bus: SimBus,
    scheduler: Arc<dyn EventScheduler>,
    results: Arc<ChannelResultsCollector>,
    mobility: Mutex<Vec<MobileNode>>,
}

impl Harness {
    pub fn new(config: SimConfig) -> Arc<Self> {
        let protocol = ProtocolConfig {
            number_of_packets_to_send: config.n_packets.unwrap_or(ProtocolConfig::default().number_of_packets_to_send),
            max_schedule_size: config.n_schedule.unwrap_or(ProtocolConfig::default().max_schedule_size),
            ..ProtocolConfig::default()
        };
        Arc::new(Self {
            config,
            protocol,
            bus: SimBus::new(),
            scheduler: Arc::new(TokioScheduler::new()),
            results: Arc::new(ChannelResultsCollector::new(4096)),
            mobility: Mutex::new(Vec::new()),
        })
    }

    /// Places every node, starts its dispatch loop, starts the mobility
    /// stepper and the requester-triggering schedule, runs for
    /// `config.duration_secs`, then returns the aggregated [`Summary`].
    pub async fn run(self: Arc<Self>) -> Summary {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let catalogue = build_catalogue(self.config.n_services);
        let catalogue_keys: Vec<ServiceId> = catalogue.keys().cloned().collect();

        let mut commands: HashMap<NodeAddress, mpsc::UnboundedSender<NodeCommand>> = HashMap::new();

        for i in 1..=self.config.n_mobile {
            let addr = NodeAddress(i);
            let start = random_point(&mut rng, self.config.plane_side);
            let offered = pick_offered(&catalogue_keys, self.config.n_services, &mut rng);

            let neighborhood = Arc::new(HelloNeighborhood::new());
            let ontology = Arc::new(StaticOntology::new(catalogue.clone(), offered));
            let position = Arc::new(SimPositionOracle::new(start));
            let routes = Arc::new(InMemoryRouteTable::new());

            let mailbox = self.bus.register(addr).await;
            let (node, events_rx, commands_tx) = Node::new(
                addr,
                self.protocol,
                self.bus.clone(),
                self.scheduler.clone(),
                neighborhood,
                ontology,
                position.clone(),
                routes,
                self.results.clone(),
            );
            commands.insert(addr, commands_tx);
            self.mobility.lock().expect("mobility lock poisoned").push(MobileNode {
                position,
                target: random_point(&mut rng, self.config.plane_side),
            });

            tokio::spawn(node.run(mailbox, events_rx));
        }

        info!(n_mobile = self.config.n_mobile, n_requesters = self.config.n_requesters, "simulation nodes started");

        self.clone().arm_mobility_tick();

        let requesters = choose_requesters(self.config.n_mobile, self.config.n_requesters, &mut rng);
        for addr in requesters {
            let harness = self.clone();
            let tx = commands.get(&addr).expect("node registered above").clone();
            let seed = self.config.seed ^ (addr.0 as u64).wrapping_mul(0x9E3779B97F4A7C15);
            let catalogue_keys = catalogue_keys.clone();
            tokio::spawn(async move {
                harness.requester_loop(addr, tx, catalogue_keys, seed).await;
            });
        }

        let mut summary_rx = self.results.subscribe();
        let summary = Arc::new(Mutex::new(Summary::default()));
        let summary_writer = summary.clone();
        let drain = tokio::spawn(async move {
            while let Ok(event) = summary_rx.recv().await {
                summary_writer.lock().expect("summary lock poisoned").record(&event);
            }
        });

        tokio::time::sleep(Duration::from_secs_f64(self.config.duration_secs)).await;
        drain.abort();

        let final_summary = summary.lock().expect("summary lock poisoned").clone();
        info!(?final_summary, "simulation run complete");
        final_summary
    }

    /// Periodically issues discovery requests from node `addr`, at an
    /// interval jittered around `request_interval_secs` so requesters don't
    /// all fire in lockstep.
    async fn requester_loop(
        &self,
        addr: NodeAddress,
        tx: mpsc::UnboundedSender<NodeCommand>,
        catalogue_keys: Vec<ServiceId>,
        seed: u64,
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        loop {
            let jitter = self.config.request_interval_secs * rng.gen_range(0.5..1.5);
            tokio::time::sleep(Duration::from_secs_f64(jitter)).await;

            let service = catalogue_keys.choose(&mut rng).cloned().unwrap_or_else(|| ServiceId::new("service-0"));
            let max_distance = rng.gen_range(self.protocol.min_request_distance..=self.protocol.max_request_distance);
            debug!(%addr, %service, max_distance, "requester issuing discovery round");
            if tx.send(NodeCommand::Initiate { requested_service: service, max_distance_allowed: max_distance }).is_err() {
                break;
            }
        }
    }

    /// Re-arms itself on the shared event scheduler every [`MOBILITY_TICK`],
    /// exactly the way `stratos-node`'s hello cycle re-arms itself — the
    /// simulated environment runs on the same discrete-time clock as the
    /// protocol it drives (SPEC_FULL.md §4.15).
    fn arm_mobility_tick(self: Arc<Self>) {
        let next = self.clone();
        self.scheduler.schedule_at(
            MOBILITY_TICK,
            Box::new(move || {
                next.step_mobility(MOBILITY_TICK.as_secs_f64());
                next.clone().arm_mobility_tick();
            }),
        );
    }

    fn step_mobility(&self, dt: f64) {
        let mut rng = rand::thread_rng();
        let mut nodes = self.mobility.lock().expect("mobility lock poisoned");
        for node in nodes.iter_mut() {
            let here = node.position.position();
            let dx = node.target.x - here.x;
            let dy = node.target.y - here.y;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist <= WAYPOINT_ARRIVAL_EPSILON_M {
                node.target = random_point(&mut rng, self.config.plane_side);
                continue;
            }
            let step = self.config.speed_mps * dt;
            if step >= dist {
                node.position.set_position(node.target);
            } else {
                node.position.set_position(Position::new(here.x + dx / dist * step, here.y + dy / dist * step));
            }
        }
    }
}

fn random_point(rng: &mut impl Rng, plane_side: f64) -> Position {
    Position::new(rng.gen_range(0.0..plane_side), rng.gen_range(0.0..plane_side))
}

/// `nRequesters` distinct addresses out of `1..=n_mobile`, chosen without
/// replacement (capped at `n_mobile` if the count exceeds the population).
fn choose_requesters(n_mobile: u32, n_requesters: u32, rng: &mut impl Rng) -> Vec<NodeAddress> {
    let mut pool: Vec<NodeAddress> = (1..=n_mobile).map(NodeAddress).collect();
    pool.shuffle(rng);
    let take = (n_requesters as usize).min(pool.len());
    pool.into_iter().take(take).collect()
}

/// A shared catalogue large enough to give `best_offered_for` interesting
/// ties to break: four coordinates per offered-service slot, floored at 16.
fn build_catalogue(n_services: u32) -> HashMap<ServiceId, i32> {
    let size = (n_services * 4).max(16);
    (0..size).map(|i| (ServiceId(format!("service-{i}")), i as i32)).collect()
}

/// `n_services` distinct offers for one node, drawn from the shared
/// catalogue without replacement.
fn pick_offered(catalogue_keys: &[ServiceId], n_services: u32, rng: &mut impl Rng) -> Vec<ServiceId> {
    let take = (n_services as usize).min(catalogue_keys.len());
    catalogue_keys.choose_multiple(rng, take).cloned().collect()
}
