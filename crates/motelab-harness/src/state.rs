//! Per-node state store
//!
//! Script-defined counters and flags keyed by node. The store belongs to a
//! single run and is handed to every handler; reads before the first write
//! return `None`, which scripts use to tell "never reported" from "reported
//! zero".

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use motelab_core::NodeId;

/// A stored value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Flag(bool),
    Seqno(u32),
}

impl Value {
    /// Numeric view (flags have none)
    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(v),
            Value::Seqno(s) => Some(i64::from(s)),
            Value::Flag(_) => None,
        }
    }

    pub fn as_flag(self) -> Option<bool> {
        match self {
            Value::Flag(b) => Some(b),
            _ => None,
        }
    }
}

/// Mapping `node -> key -> value` for one run
#[derive(Clone, Debug, Default)]
pub struct NodeStateStore {
    table: HashMap<NodeId, HashMap<String, Value>>,
}

impl NodeStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId, key: &str) -> Option<Value> {
        self.table.get(&node)?.get(key).copied()
    }

    pub fn put(&mut self, node: NodeId, key: impl Into<String>, value: Value) {
        self.table.entry(node).or_default().insert(key.into(), value);
    }

    pub fn remove(&mut self, node: NodeId, key: &str) -> Option<Value> {
        let entries = self.table.get_mut(&node)?;
        let removed = entries.remove(key);
        if entries.is_empty() {
            self.table.remove(&node);
        }
        removed
    }

    /// Add one to a counter, creating it at 1. Returns the new value.
    pub fn increment(&mut self, node: NodeId, key: &str) -> i64 {
        self.add(node, key, 1)
    }

    /// Add `delta` to a counter, treating absent or flag values as 0
    pub fn add(&mut self, node: NodeId, key: &str, delta: i64) -> i64 {
        let current = self.get(node, key).and_then(Value::as_int).unwrap_or(0);
        let next = current.saturating_add(delta);
        self.put(node, key, Value::Int(next));
        next
    }

    pub fn int(&self, node: NodeId, key: &str) -> Option<i64> {
        self.get(node, key).and_then(Value::as_int)
    }

    pub fn flag(&self, node: NodeId, key: &str) -> Option<bool> {
        self.get(node, key).and_then(Value::as_flag)
    }

    /// Readiness scan: every node has `key` present and at least `floor`.
    ///
    /// An empty node set is never ready.
    pub fn all_at_least(&self, nodes: &[NodeId], key: &str, floor: i64) -> bool {
        !nodes.is_empty()
            && nodes
                .iter()
                .all(|&node| self.int(node, key).map_or(false, |v| v >= floor))
    }

    /// Nodes from `nodes` that are not yet at `floor` for `key`
    pub fn not_ready(&self, nodes: &[NodeId], key: &str, floor: i64) -> Vec<NodeId> {
        nodes
            .iter()
            .copied()
            .filter(|&node| self.int(node, key).map_or(true, |v| v < floor))
            .collect()
    }

    /// Nodes that have any state at all
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.table.keys().copied().collect();
        nodes.sort();
        nodes
    }

    /// Ordered snapshot, for diagnostics
    pub fn snapshot(&self) -> BTreeMap<NodeId, BTreeMap<String, Value>> {
        self.table
            .iter()
            .map(|(node, entries)| {
                let entries = entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
                (*node, entries)
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}

// ============================================================================
// RENDEZVOUS
// ============================================================================

/// Multi-node synchronization point over a counter key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendezvous {
    pub nodes: Vec<NodeId>,
    pub key: String,
    pub floor: i64,
}

impl Rendezvous {
    pub fn new(nodes: Vec<NodeId>, key: impl Into<String>, floor: i64) -> Self {
        Rendezvous {
            nodes,
            key: key.into(),
            floor,
        }
    }

    pub fn is_ready(&self, store: &NodeStateStore) -> bool {
        store.all_at_least(&self.nodes, &self.key, self.floor)
    }

    pub fn waiting_on(&self, store: &NodeStateStore) -> Vec<NodeId> {
        store.not_ready(&self.nodes, &self.key, self.floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_is_not_zero() {
        let mut store = NodeStateStore::new();
        let node = NodeId::new(1);

        assert_eq!(store.get(node, "recv"), None);
        store.put(node, "recv", Value::Int(0));
        assert_eq!(store.get(node, "recv"), Some(Value::Int(0)));
    }

    #[test]
    fn test_increment_creates_lazily() {
        let mut store = NodeStateStore::new();
        let node = NodeId::new(4);

        assert_eq!(store.increment(node, "sent"), 1);
        assert_eq!(store.increment(node, "sent"), 2);
        assert_eq!(store.int(node, "sent"), Some(2));
        assert_eq!(store.int(NodeId::new(5), "sent"), None);
    }

    #[test]
    fn test_flags_and_seqnos() {
        let mut store = NodeStateStore::new();
        let node = NodeId::new(2);

        store.put(node, "booted", Value::Flag(true));
        store.put(node, "seqno", Value::Seqno(17));
        assert_eq!(store.flag(node, "booted"), Some(true));
        assert_eq!(store.int(node, "booted"), None);
        assert_eq!(store.int(node, "seqno"), Some(17));
    }

    #[test]
    fn test_remove_cleans_up() {
        let mut store = NodeStateStore::new();
        let node = NodeId::new(2);
        store.put(node, "x", Value::Int(1));

        assert_eq!(store.remove(node, "x"), Some(Value::Int(1)));
        assert!(store.nodes().is_empty());
        assert_eq!(store.remove(node, "x"), None);
    }

    #[test]
    fn test_rendezvous_readiness() {
        let nodes = NodeId::range(3);
        let rendezvous = Rendezvous::new(nodes.clone(), "recv", 2);
        let mut store = NodeStateStore::new();

        for &node in &nodes {
            store.put(node, "recv", Value::Int(2));
        }
        assert!(rendezvous.is_ready(&store));

        // Removing any single node's counter reverts readiness
        for &node in &nodes {
            let mut partial = store.clone();
            partial.remove(node, "recv");
            assert!(!rendezvous.is_ready(&partial));
            assert_eq!(rendezvous.waiting_on(&partial), vec![node]);
        }

        store.put(NodeId::new(2), "recv", Value::Int(1));
        assert!(!rendezvous.is_ready(&store));
    }

    #[test]
    fn test_empty_node_set_never_ready() {
        let store = NodeStateStore::new();
        assert!(!store.all_at_least(&[], "recv", 0));
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let mut store = NodeStateStore::new();
        store.put(NodeId::new(3), "b", Value::Int(1));
        store.put(NodeId::new(1), "a", Value::Flag(false));

        let snapshot = store.snapshot();
        let nodes: Vec<_> = snapshot.keys().copied().collect();
        assert_eq!(nodes, vec![NodeId::new(1), NodeId::new(3)]);
    }
}
