// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory nodestore.
//!
//! A `DashMap` of shared node snapshots. Borrows hand out `Arc` clones, so
//! a replace never invalidates a node another thread is still reading.
//! Borrow and release counters make leaked borrows visible in tests.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use crate::error::{UaError, UaResult};
use crate::node::Node;
use crate::types::{NodeId, NodeIdentifier};

use super::Nodestore;

/// First identifier handed out for nodes inserted without an id.
const FIRST_ASSIGNED_ID: u32 = 50_000;

/// Thread-safe in-memory [`Nodestore`].
#[derive(Debug)]
pub struct MemoryNodestore {
    nodes: DashMap<NodeId, Arc<Node>>,
    next_id: AtomicU32,
    borrowed: AtomicU64,
    released: AtomicU64,
}

impl MemoryNodestore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            next_id: AtomicU32::new(FIRST_ASSIGNED_ID),
            borrowed: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Borrows handed out minus borrows released.
    pub fn outstanding_borrows(&self) -> u64 {
        self.borrowed
            .load(Ordering::Acquire)
            .saturating_sub(self.released.load(Ordering::Acquire))
    }

    /// Total number of borrows handed out.
    pub fn total_borrows(&self) -> u64 {
        self.borrowed.load(Ordering::Acquire)
    }

    fn assign_id(&self, namespace_index: u16) -> NodeId {
        loop {
            let candidate = NodeId::numeric(
                namespace_index,
                self.next_id.fetch_add(1, Ordering::Relaxed),
            );
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

impl Default for MemoryNodestore {
    fn default() -> Self {
        Self::new()
    }
}

impl Nodestore for MemoryNodestore {
    fn get_node(&self, node_id: &NodeId) -> Option<Arc<Node>> {
        let node = self.nodes.get(node_id).map(|entry| Arc::clone(entry.value()))?;
        self.borrowed.fetch_add(1, Ordering::AcqRel);
        Some(node)
    }

    fn release_node(&self, node: Arc<Node>) {
        self.released.fetch_add(1, Ordering::AcqRel);
        drop(node);
    }

    fn get_node_copy(&self, node_id: &NodeId) -> UaResult<Node> {
        self.nodes
            .get(node_id)
            .map(|entry| Node::clone(entry.value()))
            .ok_or_else(|| UaError::node_id_unknown(node_id))
    }

    fn insert_node(&self, mut node: Node) -> UaResult<NodeId> {
        if matches!(node.node_id.identifier, NodeIdentifier::Numeric(0)) {
            node.node_id = self.assign_id(node.node_id.namespace_index);
        }
        let node_id = node.node_id.clone();
        match self.nodes.entry(node_id.clone()) {
            Entry::Occupied(_) => Err(UaError::node_id_exists(&node_id)),
            Entry::Vacant(slot) => {
                node.version = 0;
                slot.insert(Arc::new(node));
                trace!(node_id = %node_id, "Inserted node");
                Ok(node_id)
            }
        }
    }

    fn replace_node(&self, mut node: Node) -> UaResult<()> {
        match self.nodes.entry(node.node_id.clone()) {
            Entry::Vacant(_) => Err(UaError::node_id_unknown(&node.node_id)),
            Entry::Occupied(mut slot) => {
                if slot.get().version != node.version {
                    return Err(UaError::internal(format!(
                        "node {} was modified concurrently",
                        node.node_id
                    )));
                }
                node.version += 1;
                slot.insert(Arc::new(node));
                Ok(())
            }
        }
    }

    fn remove_node(&self, node_id: &NodeId) -> UaResult<()> {
        self.nodes
            .remove(node_id)
            .map(|_| trace!(node_id = %node_id, "Removed node"))
            .ok_or_else(|| UaError::node_id_unknown(node_id))
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use crate::nodestore::NodeGuard;
    use crate::types::NodeClass;

    #[test]
    fn test_insert_and_get() {
        let store = MemoryNodestore::new();
        let node = Node::new(NodeClass::Object).with_id(NodeId::string(1, "Pump"));
        let id = store.insert_node(node).unwrap();
        assert_eq!(id, NodeId::string(1, "Pump"));
        assert_eq!(store.node_count(), 1);

        let copy = store.get_node_copy(&id).unwrap();
        assert_eq!(copy.node_class(), NodeClass::Object);
    }

    #[test]
    fn test_insert_assigns_id() {
        let store = MemoryNodestore::new();
        let first = store
            .insert_node(Node::new(NodeClass::Object).with_id(NodeId::numeric(2, 0)))
            .unwrap();
        let second = store.insert_node(Node::new(NodeClass::Object)).unwrap();
        assert_eq!(first.namespace_index, 2);
        assert_ne!(first.as_numeric(), Some(0));
        assert_ne!(second.as_numeric(), Some(0));
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let store = MemoryNodestore::new();
        let node = Node::new(NodeClass::Object).with_id(NodeId::numeric(1, 5));
        store.insert_node(node.clone()).unwrap();
        let err = store.insert_node(node).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadNodeIdExists);
    }

    #[test]
    fn test_guard_releases_once() {
        let store = MemoryNodestore::new();
        let id = store
            .insert_node(Node::new(NodeClass::Object).with_id(NodeId::numeric(1, 1)))
            .unwrap();
        {
            let _a = NodeGuard::checkout(&store, &id).unwrap();
            let _b = NodeGuard::checkout(&store, &id).unwrap();
            assert_eq!(store.outstanding_borrows(), 2);
        }
        assert_eq!(store.outstanding_borrows(), 0);
        assert_eq!(store.total_borrows(), 2);
        assert!(NodeGuard::checkout(&store, &NodeId::numeric(1, 99)).is_none());
    }

    #[test]
    fn test_replace_detects_conflict() {
        let store = MemoryNodestore::new();
        let id = store
            .insert_node(Node::new(NodeClass::Object).with_id(NodeId::numeric(1, 1)))
            .unwrap();
        let first = store.get_node_copy(&id).unwrap();
        let second = store.get_node_copy(&id).unwrap();

        store.replace_node(first).unwrap();
        let err = store.replace_node(second).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadInternalError);
    }

    #[test]
    fn test_remove_node() {
        let store = MemoryNodestore::new();
        let id = store
            .insert_node(Node::new(NodeClass::Object).with_id(NodeId::numeric(1, 1)))
            .unwrap();
        store.remove_node(&id).unwrap();
        assert!(store.remove_node(&id).is_err());
        assert!(store.get_node(&id).is_none());
    }
}
