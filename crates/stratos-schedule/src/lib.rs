//! Schedule engine (spec.md §4.2): turns an originator's collected discovery
//! responses into an ordered, bounded list of peers and drives them one at
//! a time through the consumption engine.
//!
//! Like [`stratos_discovery::DiscoveryEngine`], this is a plain `&mut self`
//! state machine: it never calls into the consumption engine directly
//! (spec.md §9's Design Notes rule out index-based or implicit cross-engine
//! lookups), it returns [`ScheduleAction`]s for the per-node dispatcher to
//! act on. This also sidesteps a circular crate dependency between
//! `stratos-schedule` and `stratos-consumption`: neither depends on the
//! other, both depend only downward on `stratos-types`/`stratos-wire`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use stratos_results::ResultsCollector;
use stratos_types::{NodeAddress, ProtocolConfig, RequestKey, ServiceId};
use stratos_wire::discovery::{select_best, SearchResponse};
use tracing::info;

/// What the dispatcher must do as a result of a schedule transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleAction {
    /// Start a dialogue with `peer` for `service`, sending `packets` DO
    /// messages over its lifetime.
    StartDialogue { key: RequestKey, peer: NodeAddress, service: ServiceId, packets: u32 },
    /// The schedule for `key` is exhausted; nothing more to do.
    Exhausted { key: RequestKey },
}

struct Schedule {
    remaining: VecDeque<SearchResponse>,
    per_node: u32,
}

/// Runs one node's consumption schedule across all of its in-flight
/// discovery rounds (a node may be a requester for more than one request
/// at a time, each tracked independently by [`RequestKey`]).
pub struct ScheduleEngine {
    config: ProtocolConfig,
    results: Arc<dyn ResultsCollector>,
    schedules: HashMap<RequestKey, Schedule>,
}

impl ScheduleEngine {
    pub fn new(config: ProtocolConfig, results: Arc<dyn ResultsCollector>) -> Self {
        Self { config, results, schedules: HashMap::new() }
    }

    /// `build_schedule(responses)` (spec.md §4.2, steps 1-3).
    fn build_schedule(&self, mut working: Vec<SearchResponse>) -> Vec<SearchResponse> {
        let mut schedule = Vec::new();
        let best = match select_best(&working) {
            Some(b) => b.clone(),
            None => return schedule,
        };
        let best_index = working.iter().position(|r| r == &best).expect("best came from working");
        working.remove(best_index);
        self.results.on_response_distance(best.offered_service.semantic_distance);
        schedule.push(best.clone());

        while schedule.len() < self.config.max_schedule_size && !working.is_empty() {
            let candidate = select_best(&working).expect("working non-empty").clone();
            if candidate.offered_service.semantic_distance < best.offered_service.semantic_distance {
                break;
            }
            let idx = working.iter().position(|r| r == &candidate).expect("candidate came from working");
            working.remove(idx);
            schedule.push(candidate);
        }
        schedule
    }

    /// `build_schedule` + `execute(schedule)`: the originator's discovery
    /// verify has just handed us the full response list for `key`.
    pub fn build_and_execute(&mut self, key: RequestKey, responses: Vec<SearchResponse>) -> Vec<ScheduleAction> {
        let schedule = self.build_schedule(responses);
        if schedule.is_empty() {
            return vec![ScheduleAction::Exhausted { key }];
        }

        let total_packets = self.config.number_of_packets_to_send;
        let per_node = total_packets / schedule.len() as u32;
        let first_extra = total_packets % schedule.len() as u32;

        let mut remaining: VecDeque<SearchResponse> = schedule.into_iter().collect();
        let head = remaining.pop_front().expect("schedule non-empty");
        info!(key = %key, peer = %head.responder_address, len = remaining.len() + 1, "schedule built");
        self.schedules.insert(key, Schedule { remaining, per_node });

        vec![ScheduleAction::StartDialogue {
            key,
            peer: head.responder_address,
            service: head.offered_service.service,
            packets: per_node + first_extra,
        }]
    }

    /// `continue()`: callback from consumption on dialogue completion or
    /// abort. Advances to the next scheduled peer, if any.
    pub fn continue_schedule(&mut self, key: RequestKey) -> Vec<ScheduleAction> {
        let done = {
            let schedule = match self.schedules.get_mut(&key) {
                Some(s) => s,
                None => return vec![],
            };
            let next = schedule.remaining.pop_front();
            match next {
                Some(peer) => {
                    return vec![ScheduleAction::StartDialogue {
                        key,
                        peer: peer.responder_address,
                        service: peer.offered_service.service,
                        packets: schedule.per_node,
                    }]
                }
                None => true,
            }
        };
        if done {
            self.schedules.remove(&key);
        }
        vec![ScheduleAction::Exhausted { key }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratos_results::ChannelResultsCollector;
    use stratos_types::{OfferedService, SemanticDistance, Timestamp};

    fn resp(addr: u32, service: &str, dist: i32) -> SearchResponse {
        SearchResponse {
            origin_address: NodeAddress(0),
            origin_timestamp: Timestamp(0.0),
            responder_address: NodeAddress(addr),
            hop_distance: 1,
            planar_distance: 0.0,
            offered_service: OfferedService { service: ServiceId::new(service), semantic_distance: SemanticDistance(dist) },
        }
    }

    fn key() -> RequestKey {
        RequestKey::new(NodeAddress(1), Timestamp(10.0))
    }

    #[test]
    fn schedule_is_bounded_to_equal_best_distance() {
        let mut engine = ScheduleEngine::new(ProtocolConfig::default(), Arc::new(ChannelResultsCollector::new(16)));
        let responses = vec![resp(2, "a", 1), resp(3, "b", 1), resp(4, "c", 5)];
        let actions = engine.build_and_execute(key(), responses);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ScheduleAction::StartDialogue { peer, .. } => assert!(*peer == NodeAddress(2) || *peer == NodeAddress(3)),
            _ => panic!("expected a start action"),
        }
    }

    #[test]
    fn continue_advances_to_next_peer_with_per_node_packets() {
        let mut engine = ScheduleEngine::new(ProtocolConfig::default(), Arc::new(ChannelResultsCollector::new(16)));
        let responses = vec![resp(2, "a", 1), resp(3, "a", 1)];
        let first = engine.build_and_execute(key(), responses);
        let first_packets = match &first[0] {
            ScheduleAction::StartDialogue { packets, .. } => *packets,
            _ => panic!("expected start"),
        };
        // 10 packets over 2 peers: head gets 5 (no remainder).
        assert_eq!(first_packets, 5);

        let second = engine.continue_schedule(key());
        match &second[0] {
            ScheduleAction::StartDialogue { packets, .. } => assert_eq!(*packets, 5),
            _ => panic!("expected start"),
        }

        let third = engine.continue_schedule(key());
        assert_eq!(third, vec![ScheduleAction::Exhausted { key: key() }]);
    }

    #[test]
    fn empty_responses_yield_exhausted() {
        let mut engine = ScheduleEngine::new(ProtocolConfig::default(), Arc::new(ChannelResultsCollector::new(16)));
        let actions = engine.build_and_execute(key(), vec![]);
        assert_eq!(actions, vec![ScheduleAction::Exhausted { key: key() }]);
    }
}
