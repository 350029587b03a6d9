// Shared types for the relay analysis engine
//
// Everything that crosses a module boundary lives here: the parsed relay
// event, the per-node and per-message records kept by the event store, and
// the unit constants used when turning raw counters into reported figures.

use serde::Serialize;

// nanoseconds since the unix epoch, as written by the nodes
pub type Timestamp = i64;

// abbreviated peer identifier, e.g. "16U*96opVg"
pub type PeerKey = String;
pub type MessageHash = String;

// canonical logical node id, e.g. "node_12"
pub type NodeId = String;

// ============================================================================
// Constants
// ============================================================================

/// Separator placed between the head and tail of an abbreviated peer id
pub const PEER_KEY_SEPARATOR: char = '*';
pub const PEER_KEY_PREFIX_LEN: usize = 3;
pub const PEER_KEY_SUFFIX_LEN: usize = 6;

pub const NANOS_PER_MILLI: f64 = 1_000_000.0;
pub const MILLIS_PER_SECOND: f64 = 1_000.0;
pub const BYTES_PER_MB: f64 = 1_048_576.0;

/// Status the load generator records for an accepted injection
pub const HTTP_OK: u16 = 200;

// ============================================================================
// Relay Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayDirection {
    Publish,
    Receive,
}

impl RelayDirection {
    /// Name of the timestamp field carried by lines of this direction
    pub fn timestamp_field(self) -> &'static str {
        match self {
            RelayDirection::Publish => "publishTime",
            RelayDirection::Receive => "receivedTime",
        }
    }
}

/// One relay line, parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEvent {
    pub direction: RelayDirection,
    pub timestamp: Timestamp,
    /// Quoted, space separated topic list, stored as written
    pub topic_set: String,
    pub pubsub_topic: String,
    pub message_hash: MessageHash,
    pub peer_key: PeerKey,
}

// ============================================================================
// Store Records
// ============================================================================

/// A publish or receive as seen from the node that logged it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    pub timestamp: Timestamp,
    pub topic_set: String,
    pub pubsub_topic: String,
    pub message_hash: MessageHash,
}

/// A publish or receive as seen from the message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub ts: Timestamp,
    pub peer_key: PeerKey,
}

/// History of one logical node
///
/// Created from the topology before any log is read and only ever appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub container_name: String,
    pub published: Vec<NodeEntry>,
    pub received: Vec<NodeEntry>,
}

impl NodeRecord {
    pub fn new(node_id: impl Into<NodeId>, container_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            container_name: container_name.into(),
            published: Vec::new(),
            received: Vec::new(),
        }
    }
}

/// Every observation of one message hash, across all nodes
///
/// Exactly one publish is expected. Additional publishes are kept and the
/// first one is canonical. `published` may be empty while ingestion is still
/// running, since containers are not read in global time order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageRecord {
    pub published: Vec<Observation>,
    pub received: Vec<Observation>,
    /// Filled by `ra_delivery::compute_latencies`
    pub latencies: Vec<i64>,
}

impl MessageRecord {
    pub fn canonical_publish(&self) -> Option<&Observation> {
        self.published.first()
    }

    pub fn has_multiple_publishers(&self) -> bool {
        self.published.len() > 1
    }

    /// Fold another partial record for the same hash into this one
    ///
    /// Sequences are concatenated, never replaced.
    pub fn absorb(&mut self, other: MessageRecord) {
        self.published.extend(other.published);
        self.received.extend(other.received);
        self.latencies.extend(other.latencies);
    }
}

// ============================================================================
// Peer Key Abbreviation
// ============================================================================

/// Abbreviate a full peer id to the form nodes print in their relay logs
///
/// First three characters, the separator, then the last six characters.
/// Ids shorter than that overlap, exactly like slicing the string would.
pub fn abbreviate_peer_id(peer_id: &str) -> PeerKey {
    let chars: Vec<char> = peer_id.chars().collect();
    let head: String = chars.iter().take(PEER_KEY_PREFIX_LEN).collect();
    let tail_start = chars.len().saturating_sub(PEER_KEY_SUFFIX_LEN);
    let tail: String = chars[tail_start..].iter().collect();

    format!("{}{}{}", head, PEER_KEY_SEPARATOR, tail)
}
