// Node/Message Event Store
//
// Two tables filled by the ingestion pass:
// - nodes: one NodeRecord per peer key, created from the topology up front
// - messages: one MessageRecord per hash, created on first sight
//
// Both are append-only. Publishes and receives for a hash may arrive in any
// order, so a message can sit with an empty `published` list for a while.

use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};
use serde::Serialize;

use crate::ra_inputs::Topology;
use crate::ra_interface::{
    abbreviate_peer_id, MessageHash, MessageRecord, NodeEntry, NodeRecord, Observation, PeerKey,
    RelayDirection, RelayEvent, Timestamp,
};

/// Counters for anomalies the store recovers from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreDiagnostics {
    /// Events logged by a peer key missing from the node table
    pub unknown_peer_events: usize,
    /// Topology nodes whose abbreviated key was already taken
    pub peer_key_collisions: usize,
    /// Topology nodes no container lists; they get no node record
    pub unlisted_topology_nodes: usize,
}

impl StoreDiagnostics {
    pub fn merge(&mut self, other: &StoreDiagnostics) {
        self.unknown_peer_events += other.unknown_peer_events;
        self.peer_key_collisions += other.peer_key_collisions;
        self.unlisted_topology_nodes += other.unlisted_topology_nodes;
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventStore {
    pub nodes: IndexMap<PeerKey, NodeRecord>,
    pub messages: IndexMap<MessageHash, MessageRecord>,
    /// Pubsub topics in first-seen order
    pub topics: IndexSet<String>,
    pub diagnostics: StoreDiagnostics,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the node table for every node of the topology
    pub fn from_topology(topology: &Topology) -> Self {
        let mut store = Self::new();
        for (container_name, container) in &topology.containers {
            for node_id in &container.nodes {
                let Some(node) = topology.nodes.get(node_id) else {
                    warn!(
                        "Container {} lists node {} which is absent from the topology",
                        container_name, node_id
                    );
                    continue;
                };
                store.add_node(&abbreviate_peer_id(&node.peer_id), node_id, container_name);
            }
        }

        for (node_id, node) in &topology.nodes {
            let listed = topology
                .containers
                .values()
                .any(|container| container.nodes.contains(node_id));
            if !listed {
                warn!(
                    "Node {} (peer {}) is not listed by any container, its events will count as unknown",
                    node_id,
                    abbreviate_peer_id(&node.peer_id)
                );
                store.diagnostics.unlisted_topology_nodes += 1;
            }
        }
        store
    }

    /// Register a node under its peer key
    ///
    /// A key that is already present keeps its first owner.
    pub fn add_node(&mut self, peer_key: &str, node_id: &str, container_name: &str) -> bool {
        if let Some(existing) = self.nodes.get(peer_key) {
            warn!(
                "Peer key {} of node {} collides with node {}, which keeps the key",
                peer_key, node_id, existing.node_id
            );
            self.diagnostics.peer_key_collisions += 1;
            return false;
        }
        self.nodes.insert(
            peer_key.to_string(),
            NodeRecord::new(node_id, container_name),
        );
        true
    }

    /// Empty copy of the node table, used as a per-container partial store
    pub fn partition(&self) -> Self {
        let nodes = self
            .nodes
            .iter()
            .map(|(key, node)| (key.clone(), NodeRecord::new(&node.node_id, &node.container_name)))
            .collect();
        Self {
            nodes,
            ..Self::default()
        }
    }

    pub fn record(&mut self, event: &RelayEvent) {
        match event.direction {
            RelayDirection::Publish => self.record_publish(
                &event.peer_key,
                &event.message_hash,
                event.timestamp,
                &event.pubsub_topic,
                &event.topic_set,
            ),
            RelayDirection::Receive => self.record_receive(
                &event.peer_key,
                &event.message_hash,
                event.timestamp,
                &event.pubsub_topic,
                &event.topic_set,
            ),
        }
    }

    pub fn record_publish(
        &mut self,
        peer_key: &str,
        hash: &str,
        ts: Timestamp,
        topic: &str,
        topic_set: &str,
    ) {
        if let Some(entry) = self.node_entry(peer_key, hash, ts, topic, topic_set) {
            if let Some(node) = self.nodes.get_mut(peer_key) {
                node.published.push(entry);
            }
        }

        let message = self.messages.entry(hash.to_string()).or_default();
        message.published.push(Observation {
            ts,
            peer_key: peer_key.to_string(),
        });
        if message.has_multiple_publishers() {
            debug!(
                "Message {} now has {} publishers",
                hash,
                message.published.len()
            );
        }
    }

    pub fn record_receive(
        &mut self,
        peer_key: &str,
        hash: &str,
        ts: Timestamp,
        topic: &str,
        topic_set: &str,
    ) {
        if let Some(entry) = self.node_entry(peer_key, hash, ts, topic, topic_set) {
            if let Some(node) = self.nodes.get_mut(peer_key) {
                node.received.push(entry);
            }
        }

        self.messages
            .entry(hash.to_string())
            .or_default()
            .received
            .push(Observation {
                ts,
                peer_key: peer_key.to_string(),
            });
    }

    // Shared bookkeeping for both directions; None when the peer is unknown
    fn node_entry(
        &mut self,
        peer_key: &str,
        hash: &str,
        ts: Timestamp,
        topic: &str,
        topic_set: &str,
    ) -> Option<NodeEntry> {
        if !self.topics.contains(topic) {
            self.topics.insert(topic.to_string());
        }

        if !self.nodes.contains_key(peer_key) {
            warn!(
                "Peer {} is not in the node table, message {} kept without node history",
                peer_key, hash
            );
            self.diagnostics.unknown_peer_events += 1;
            return None;
        }

        Some(NodeEntry {
            timestamp: ts,
            topic_set: topic_set.to_string(),
            pubsub_topic: topic.to_string(),
            message_hash: hash.to_string(),
        })
    }

    /// Append another partial store onto this one
    ///
    /// Sequences are concatenated in argument order, so merging per-container
    /// partials in container order reproduces a sequential pass exactly.
    pub fn merge(&mut self, other: EventStore) {
        for (key, node) in other.nodes {
            match self.nodes.get_mut(&key) {
                Some(existing) => {
                    existing.published.extend(node.published);
                    existing.received.extend(node.received);
                }
                None => {
                    self.nodes.insert(key, node);
                }
            }
        }

        for (hash, message) in other.messages {
            self.messages.entry(hash).or_default().absorb(message);
        }

        self.topics.extend(other.topics);
        self.diagnostics.merge(&other.diagnostics);
    }

    /// Published and received counts per node id
    pub fn node_activity(&self) -> IndexMap<String, (usize, usize)> {
        self.nodes
            .values()
            .map(|node| {
                (
                    node.node_id.clone(),
                    (node.published.len(), node.received.len()),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HASH: &str = "0x122071785e0803dafa9cdd288ed7db0d32277f7cab110b798f631d0fcd2d58dd7463";

    fn store_with(peers: &[&str]) -> EventStore {
        let mut store = EventStore::new();
        for peer in peers {
            store.add_node(peer, peer, "test");
        }
        store
    }

    #[test]
    fn test_record_publish_first_time() {
        let mut store = store_with(&["16U*96opVg"]);
        store.record_publish("16U*96opVg", HASH, 1681806690147236096, "topic_C", "waku node");

        let node = &store.nodes["16U*96opVg"];
        assert_eq!(node.published[0].pubsub_topic, "topic_C");
        assert_eq!(node.published[0].message_hash, HASH);

        let message = &store.messages[HASH];
        assert_eq!(
            message.published,
            vec![Observation {
                ts: 1681806690147236096,
                peer_key: "16U*96opVg".into()
            }]
        );
        assert!(message.received.is_empty());
    }

    #[test]
    fn test_record_publish_second_time_appends() {
        let mut store = store_with(&["16U*96opVg"]);
        store.record_publish("16U*96opVg", HASH, 1681806690147236096, "topic_C", "waku node");
        store.record_publish("16U*96opVg", HASH, 1681806690147236097, "topic_C", "waku node");

        assert_eq!(store.nodes["16U*96opVg"].published.len(), 2);
        let message = &store.messages[HASH];
        assert_eq!(message.published.len(), 2);
        assert_eq!(message.published[1].ts, 1681806690147236097);
        assert!(message.has_multiple_publishers());
    }

    #[test]
    fn test_receive_before_publish() {
        let mut store = store_with(&["16U*96opVg"]);
        store.record_receive("16U*96opVg", HASH, 20, "topic_C", "waku node");

        let message = &store.messages[HASH];
        assert!(message.published.is_empty());
        assert_eq!(message.received.len(), 1);

        store.record_publish("16U*96opVg", HASH, 10, "topic_C", "waku node");
        assert_eq!(store.messages[HASH].published.len(), 1);
        assert_eq!(store.messages.len(), 1);
    }

    #[test]
    fn test_unknown_peer_still_feeds_message_table() {
        let mut store = store_with(&["16U*96opVg"]);
        store.record_receive("abc*zzzzzz", HASH, 20, "topic_C", "waku node");

        assert_eq!(store.diagnostics.unknown_peer_events, 1);
        assert_eq!(store.messages[HASH].received.len(), 1);
        assert!(store.nodes["16U*96opVg"].received.is_empty());
    }

    #[test]
    fn test_peer_key_collision_keeps_first() {
        let mut store = EventStore::new();
        assert!(store.add_node("16U*96opVg", "node_0", "c0"));
        assert!(!store.add_node("16U*96opVg", "node_1", "c1"));

        assert_eq!(store.nodes["16U*96opVg"].node_id, "node_0");
        assert_eq!(store.diagnostics.peer_key_collisions, 1);
    }

    #[test]
    fn test_topics_first_seen_order() {
        let mut store = store_with(&["A"]);
        store.record_receive("A", "h1", 1, "topic_B", "x");
        store.record_receive("A", "h2", 2, "topic_A", "x");
        store.record_publish("A", "h3", 3, "topic_B", "x");

        let topics: Vec<&str> = store.topics.iter().map(|t| t.as_str()).collect();
        assert_eq!(topics, vec!["topic_B", "topic_A"]);
    }

    #[test]
    fn test_merge_concatenates() {
        let base = store_with(&["A", "B"]);
        let mut left = base.partition();
        let mut right = base.partition();

        left.record_publish("A", HASH, 10, "t", "x");
        right.record_receive("B", HASH, 20, "t", "x");
        right.record_publish("B", HASH, 30, "t", "x");

        let mut merged = base.partition();
        merged.merge(left);
        merged.merge(right);

        let message = &merged.messages[HASH];
        assert_eq!(message.published.len(), 2);
        assert_eq!(message.published[0].peer_key, "A");
        assert_eq!(message.received.len(), 1);
        assert_eq!(merged.nodes["B"].published.len(), 1);
        assert_eq!(merged.node_activity()["A"], (1, 0));
        assert_eq!(merged.node_activity()["B"], (1, 1));
    }

    #[test]
    fn test_from_topology() {
        let json = r#"{
            "containers": {
                "cid_0": { "nodes": ["node_0", "node_1"], "kurtosis_ip": "10.0.0.1" }
            },
            "nodes": {
                "node_0": { "peer_id": "16Uiu2HAmQE6V8eaDg7SBtwxV1Bp9vi3vJNjfRQKjCbNWRe96opVg", "node_config": "node-0.toml", "image": "nim-waku" },
                "node_1": { "peer_id": "16Uiu2HAm7zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz92yDon", "node_config": "node-1.toml", "image": "nim-waku" }
            }
        }"#;
        let topology: Topology = serde_json::from_str(json).unwrap();
        let store = EventStore::from_topology(&topology);

        assert_eq!(store.nodes.len(), 2);
        assert_eq!(store.nodes["16U*96opVg"].node_id, "node_0");
        assert_eq!(store.nodes["16U*92yDon"].container_name, "cid_0");
        assert_eq!(store.diagnostics.unlisted_topology_nodes, 0);
    }

    #[test]
    fn test_unlisted_topology_node_is_reported() {
        let json = r#"{
            "containers": {
                "cid_0": { "nodes": ["node_0"] }
            },
            "nodes": {
                "node_0": { "peer_id": "16Uiu2HAmQE6V8eaDg7SBtwxV1Bp9vi3vJNjfRQKjCbNWRe96opVg" },
                "node_1": { "peer_id": "16Uiu2HAm7zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz92yDon" }
            }
        }"#;
        let topology: Topology = serde_json::from_str(json).unwrap();
        let mut store = EventStore::from_topology(&topology);

        assert_eq!(store.nodes.len(), 1);
        assert_eq!(store.diagnostics.unlisted_topology_nodes, 1);

        store.record_receive("16U*92yDon", HASH, 10, "t", "x");
        assert_eq!(store.diagnostics.unknown_peer_events, 1);
        assert_eq!(store.messages[HASH].received.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_record_is_append_only(ops in prop::collection::vec((any::<bool>(), 0i64..1_000), 0..100)) {
            let mut store = store_with(&["A"]);
            for (publish, ts) in &ops {
                if *publish {
                    store.record_publish("A", HASH, *ts, "t", "x");
                } else {
                    store.record_receive("A", HASH, *ts, "t", "x");
                }
            }

            let expected_pub: Vec<i64> = ops.iter().filter(|(p, _)| *p).map(|(_, ts)| *ts).collect();
            let expected_recv: Vec<i64> = ops.iter().filter(|(p, _)| !*p).map(|(_, ts)| *ts).collect();

            let (published, received) = match store.messages.get(HASH) {
                Some(m) => (
                    m.published.iter().map(|o| o.ts).collect::<Vec<_>>(),
                    m.received.iter().map(|o| o.ts).collect::<Vec<_>>(),
                ),
                None => (vec![], vec![]),
            };
            prop_assert_eq!(published, expected_pub);
            prop_assert_eq!(received, expected_recv);
        }
    }
}
