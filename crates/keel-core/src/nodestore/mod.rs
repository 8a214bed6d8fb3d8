// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Nodestore contract consumed by the server core.
//!
//! The nodestore owns node storage and its concurrency control. The core
//! never assumes exclusive access: it checks a node out, reads or copies it,
//! and releases it.
//!
//! # Design Principles
//!
//! - **Borrow / release pairing**: every node handed out by
//!   [`Nodestore::get_node`] is released exactly once. [`NodeGuard`] makes
//!   that pairing structural.
//! - **Copies are owned**: [`Nodestore::get_node_copy`] and
//!   [`Nodestore::new_node`] return values the caller owns until it inserts,
//!   replaces or deletes them.
//! - **Backend agnostic**: a hash map, a B-tree or an external database can
//!   sit behind the trait.
//!
//! # Example
//!
//! ```
//! use keel_core::nodestore::{MemoryNodestore, NodeGuard, Nodestore};
//! use keel_core::types::{NodeClass, NodeId};
//!
//! let store = MemoryNodestore::new();
//! let node = store.new_node(NodeClass::Object).with_id(NodeId::numeric(1, 10));
//! let id = store.insert_node(node).unwrap();
//!
//! let guard = NodeGuard::checkout(&store, &id).unwrap();
//! assert_eq!(guard.node_class(), NodeClass::Object);
//! drop(guard); // released here
//! ```

mod memory;

pub use memory::MemoryNodestore;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::UaResult;
use crate::node::Node;
use crate::types::{NodeClass, NodeId};

// =============================================================================
// Nodestore
// =============================================================================

/// Storage backend for the address space.
pub trait Nodestore: Send + Sync + fmt::Debug {
    /// Borrows a node. `None` if the id is unknown.
    ///
    /// The returned handle must be passed to [`Nodestore::release_node`]
    /// exactly once. Prefer [`NodeGuard::checkout`].
    fn get_node(&self, node_id: &NodeId) -> Option<Arc<Node>>;

    /// Releases a node obtained from [`Nodestore::get_node`].
    fn release_node(&self, node: Arc<Node>) {
        drop(node);
    }

    /// Returns an owned copy of a node.
    fn get_node_copy(&self, node_id: &NodeId) -> UaResult<Node>;

    /// Creates a fresh, uninserted node of the given class.
    fn new_node(&self, class: NodeClass) -> Node {
        Node::new(class)
    }

    /// Inserts a node and returns its id.
    ///
    /// A numeric identifier of 0 asks the store to assign an unused id in
    /// the node's namespace.
    fn insert_node(&self, node: Node) -> UaResult<NodeId>;

    /// Replaces a node with an edited copy.
    ///
    /// Fails with `BadInternalError` when the node changed since the copy
    /// was taken, and with `BadNodeIdUnknown` when it was removed.
    fn replace_node(&self, node: Node) -> UaResult<()>;

    /// Frees a copy that will not be inserted.
    fn delete_node(&self, node: Node) {
        drop(node);
    }

    /// Removes a node from the store.
    fn remove_node(&self, node_id: &NodeId) -> UaResult<()>;

    /// Number of stored nodes.
    fn node_count(&self) -> usize;
}

// =============================================================================
// NodeGuard
// =============================================================================

/// A borrowed node that is released when the guard drops.
pub struct NodeGuard<'a> {
    store: &'a dyn Nodestore,
    node: Option<Arc<Node>>,
}

impl<'a> NodeGuard<'a> {
    /// Borrows `node_id` from `store`.
    pub fn checkout(store: &'a dyn Nodestore, node_id: &NodeId) -> Option<Self> {
        store.get_node(node_id).map(|node| Self {
            store,
            node: Some(node),
        })
    }

    /// Clones the shared handle, for data that must outlive the guard.
    pub fn share(&self) -> Arc<Node> {
        match &self.node {
            Some(node) => Arc::clone(node),
            None => unreachable!("node guard used after release"),
        }
    }
}

impl Deref for NodeGuard<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        match &self.node {
            Some(node) => node,
            None => unreachable!("node guard used after release"),
        }
    }
}

impl Drop for NodeGuard<'_> {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            self.store.release_node(node);
        }
    }
}

impl fmt::Debug for NodeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeGuard")
            .field("node_id", &self.node.as_ref().map(|n| &n.node_id))
            .finish()
    }
}
