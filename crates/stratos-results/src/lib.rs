//! Results collector (spec.md §6): `on_request` / `on_packet` /
//! `on_response_distance`, forwarded as events over a broadcast channel so
//! the simulation harness's summary task can aggregate them without the
//! protocol engines knowing anything about aggregation.

use stratos_types::{NodeAddress, RequestKey, SemanticDistance};
use tokio::sync::broadcast;

/// One observation worth aggregating.
#[derive(Debug, Clone)]
pub enum ResultEvent {
    /// A request was issued by `origin` under `key`.
    Request { key: RequestKey, origin: NodeAddress },
    /// One dialogue data packet was received, at simulated time `at`.
    Packet { at: f64 },
    /// The semantic distance of the response `build_schedule` selected as
    /// best for a completed discovery round.
    ResponseDistance { distance: SemanticDistance },
}

/// `on_request(key, origin)` / `on_packet(ts)` / `on_response_distance(d)`.
pub trait ResultsCollector: Send + Sync {
    fn on_request(&self, key: RequestKey, origin: NodeAddress);
    fn on_packet(&self, at: f64);
    fn on_response_distance(&self, distance: SemanticDistance);
}

/// Broadcasts every observation to whatever is subscribed; the discovery,
/// schedule and consumption engines never hold a receiver, only a sender.
#[derive(Clone)]
pub struct ChannelResultsCollector {
    sender: broadcast::Sender<ResultEvent>,
}

impl ChannelResultsCollector {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResultEvent> {
        self.sender.subscribe()
    }
}

impl ResultsCollector for ChannelResultsCollector {
    fn on_request(&self, key: RequestKey, origin: NodeAddress) {
        let _ = self.sender.send(ResultEvent::Request { key, origin });
    }

    fn on_packet(&self, at: f64) {
        let _ = self.sender.send(ResultEvent::Packet { at });
    }

    fn on_response_distance(&self, distance: SemanticDistance) {
        let _ = self.sender.send(ResultEvent::ResponseDistance { distance });
    }
}

/// Aggregates a stream of [`ResultEvent`]s into the summary printed at the
/// end of a simulation run.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct Summary {
    pub requests_issued: u64,
    pub packets_received: u64,
    pub response_distances: Vec<i32>,
}

impl Summary {
    pub fn record(&mut self, event: &ResultEvent) {
        match event {
            ResultEvent::Request { .. } => self.requests_issued += 1,
            ResultEvent::Packet { .. } => self.packets_received += 1,
            ResultEvent::ResponseDistance { distance } => {
                self.response_distances.push(distance.0);
            }
        }
    }

    pub fn mean_response_distance(&self) -> Option<f64> {
        if self.response_distances.is_empty() {
            return None;
        }
        let sum: i64 = self.response_distances.iter().map(|d| *d as i64).sum();
        Some(sum as f64 / self.response_distances.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratos_types::Timestamp;

    #[test]
    fn emitted_events_are_received() {
        let collector = ChannelResultsCollector::new(16);
        let mut rx = collector.subscribe();
        collector.on_request(
            RequestKey::new(NodeAddress(1), Timestamp(0.0)),
            NodeAddress(1),
        );
        collector.on_packet(1.5);
        collector.on_response_distance(SemanticDistance(3));

        assert!(matches!(rx.try_recv().unwrap(), ResultEvent::Request { .. }));
        assert!(matches!(rx.try_recv().unwrap(), ResultEvent::Packet { at } if at == 1.5));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ResultEvent::ResponseDistance { distance: SemanticDistance(3) }
        ));
    }

    #[test]
    fn summary_aggregates_mean_distance() {
        let mut summary = Summary::default();
        summary.record(&ResultEvent::ResponseDistance { distance: SemanticDistance(2) });
        summary.record(&ResultEvent::ResponseDistance { distance: SemanticDistance(4) });
        assert_eq!(summary.mean_response_distance(), Some(3.0));
    }

    #[test]
    fn empty_summary_has_no_mean_distance() {
        assert_eq!(Summary::default().mean_response_distance(), None);
    }
}
