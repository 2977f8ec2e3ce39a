//! # stratos-net
//!
//! The three ports spec.md §6 describes — discovery, service, hello — as an
//! in-process, broadcast-capable, unreliable datagram medium. A real
//! deployment would bind these to UDP sockets; this workspace's simulation
//! harness instead wires every node to one shared [`SimBus`], because
//! link-level radio range is explicitly not part of the protocol's own
//! contract (spec.md §1 scopes "reliable transport" out, and the
//! admissibility test's `max_distance_allowed` check is the only distance
//! gate the protocol itself performs). Broadcast delivery is therefore
//! modelled as "every other registered node receives the datagram", per
//! SPEC_FULL.md §4.15.
//!
//! Each registered node gets one [`NodeMailbox`] per port, so the per-node
//! dispatcher in `stratos-node` can `select!` over three independent
//! channels exactly as it would over three real sockets.

use std::collections::HashMap;
use std::sync::Arc;

use stratos_types::NodeAddress;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Which of the three ports a datagram arrived on or is bound for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    Discovery,
    Service,
    Hello,
}

/// One inbound datagram: the sender's address (the link-layer "heard from",
/// not necessarily the packet's logical origin) plus its encoded bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct Datagram {
    pub from: NodeAddress,
    pub bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("node {0} is not registered on this bus")]
    UnknownNode(NodeAddress),
}

struct Mailboxes {
    discovery: mpsc::UnboundedSender<Datagram>,
    service: mpsc::UnboundedSender<Datagram>,
    hello: mpsc::UnboundedSender<Datagram>,
}

/// A registered node's three receive queues, handed back by
/// [`SimBus::register`].
pub struct NodeMailbox {
    pub discovery: mpsc::UnboundedReceiver<Datagram>,
    pub service: mpsc::UnboundedReceiver<Datagram>,
    pub hello: mpsc::UnboundedReceiver<Datagram>,
}

/// The shared in-process medium. Cheap to clone; every node and the
/// simulation harness hold a handle to the same underlying table.
#[derive(Clone)]
pub struct SimBus {
    nodes: Arc<Mutex<HashMap<NodeAddress, Mailboxes>>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self { nodes: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register `addr` on the bus, returning its three inbound queues.
    /// Re-registering an address replaces its mailboxes (used by the
    /// simulation harness's per-run node re-creation, never by the
    /// protocol core itself).
    pub async fn register(&self, addr: NodeAddress) -> NodeMailbox {
        let (dtx, drx) = mpsc::unbounded_channel();
        let (stx, srx) = mpsc::unbounded_channel();
        let (htx, hrx) = mpsc::unbounded_channel();
        self.nodes.lock().await.insert(addr, Mailboxes { discovery: dtx, service: stx, hello: htx });
        NodeMailbox { discovery: drx, service: srx, hello: hrx }
    }

    /// Remove `addr` from the bus; further sends to it are silently
    /// undeliverable (mirrors a real link simply going quiet).
    pub async fn unregister(&self, addr: NodeAddress) {
        self.nodes.lock().await.remove(&addr);
    }

    /// Fan `bytes` out to every other registered node on `port`, as if
    /// broadcast on the shared radio medium. The admissibility test in
    /// `stratos-discovery` is what actually bounds reachability
    /// (`max_hops_allowed`, `max_distance_allowed`), not this transport.
    pub async fn broadcast(&self, from: NodeAddress, port: Port, bytes: Vec<u8>) {
        let nodes = self.nodes.lock().await;
        for (&addr, mailboxes) in nodes.iter() {
            if addr == from {
                continue;
            }
            let datagram = Datagram { from, bytes: bytes.clone() };
            let sender = match port {
                Port::Discovery => &mailboxes.discovery,
                Port::Service => &mailboxes.service,
                Port::Hello => &mailboxes.hello,
            };
            if sender.send(datagram).is_err() {
                trace!(%addr, "broadcast dropped: receiver gone");
            }
        }
    }

    /// Deliver `bytes` to exactly `to`, as a direct unicast. Used by the
    /// discovery engine's `UnicastResponse`/`UnicastError` actions and by
    /// every consumption-dialogue datagram, all of which are already
    /// resolved to their next hop by the caller.
    pub async fn unicast(&self, from: NodeAddress, to: NodeAddress, port: Port, bytes: Vec<u8>) -> Result<(), NetError> {
        let nodes = self.nodes.lock().await;
        let mailboxes = nodes.get(&to).ok_or(NetError::UnknownNode(to))?;
        let datagram = Datagram { from, bytes };
        let sender = match port {
            Port::Discovery => &mailboxes.discovery,
            Port::Service => &mailboxes.service,
            Port::Hello => &mailboxes.hello,
        };
        if sender.send(datagram).is_err() {
            trace!(%to, "unicast dropped: receiver gone");
        }
        Ok(())
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_other_registered_node() {
        let bus = SimBus::new();
        let mut a = bus.register(NodeAddress(1)).await;
        let mut b = bus.register(NodeAddress(2)).await;
        let mut c = bus.register(NodeAddress(3)).await;

        bus.broadcast(NodeAddress(1), Port::Discovery, vec![7]).await;

        assert!(a.discovery.try_recv().is_err(), "sender does not receive its own broadcast");
        assert_eq!(b.discovery.try_recv().unwrap().bytes, vec![7]);
        assert_eq!(c.discovery.try_recv().unwrap().bytes, vec![7]);
    }

    #[tokio::test]
    async fn unicast_reaches_only_target() {
        let bus = SimBus::new();
        let mut a = bus.register(NodeAddress(1)).await;
        let mut b = bus.register(NodeAddress(2)).await;

        bus.unicast(NodeAddress(1), NodeAddress(2), Port::Service, vec![9]).await.unwrap();

        assert!(a.service.try_recv().is_err());
        assert_eq!(b.service.try_recv().unwrap().bytes, vec![9]);
    }

    #[tokio::test]
    async fn unicast_to_unregistered_node_errors() {
        let bus = SimBus::new();
        let result = bus.unicast(NodeAddress(1), NodeAddress(99), Port::Hello, vec![]).await;
        assert!(matches!(result, Err(NetError::UnknownNode(NodeAddress(99)))));
    }

    #[tokio::test]
    async fn unregistered_node_silently_drops_broadcast() {
        let bus = SimBus::new();
        let mut a = bus.register(NodeAddress(1)).await;
        bus.unregister(NodeAddress(1)).await;
        bus.broadcast(NodeAddress(2), Port::Hello, vec![1]).await;
        assert!(a.discovery.try_recv().is_err());
    }
}
