//! Per-peer dialogue state (spec.md §3's "Dialogue record").

use stratos_types::RequestKey;

/// Which side of a dialogue a record belongs to; also names which of the
/// dispatcher's two keepalive-timer tables a timer action applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Requester,
    Provider,
}

/// `status ∈ {NULL, START, DO, STOP, STOPPED}` (spec.md §3, §4.3, §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialogueStatus {
    Null,
    Start,
    Do,
    Stop,
    Stopped,
}

/// Requester-side record: `packets_sent` in spec.md's generic record is
/// `packets_received` here, since the requester counts arrivals, not sends.
#[derive(Clone, Debug)]
pub struct RequesterDialogue {
    /// The discovery round this dialogue belongs to, so completion can be
    /// reported back to the schedule engine via its `RequestKey`.
    pub key: RequestKey,
    pub status: DialogueStatus,
    pub max_packets: u32,
    pub packets_received: u32,
}

/// Provider-side record.
#[derive(Clone, Debug)]
pub struct ProviderDialogue {
    pub status: DialogueStatus,
    pub packets_sent: u32,
}
