// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Mock collaborators that record what the server does to them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keel_core::{
    MemoryNodestore, Node, NodeClass, NodeId, Nodestore, StatusCode, UaError, UaResult,
};
use keel_server::subscription::{ItemNotice, SubscriptionNotice};
use keel_server::{
    Clock, DiscoveryListener, ItemHooks, Server, SubscriptionHooks, TransportListener,
};
use parking_lot::Mutex;

// =============================================================================
// EventLog
// =============================================================================

/// An ordered, shareable list of labels.
///
/// Clones append to the same list, which makes it easy to hand one to a
/// callback running on a worker thread.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a label.
    pub fn push(&self, label: impl Into<String>) {
        self.entries.lock().push(label.into());
    }

    /// Copy of all labels in order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Number of labels equal to `label`.
    pub fn count(&self, label: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == label).count()
    }

    /// Position of the first `label`.
    pub fn position(&self, label: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == label)
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Subscription hooks logging `label` on deletion and
    /// `label:<status>` on a status change.
    pub fn subscription_hooks(&self, label: &str) -> SubscriptionHooks {
        let on_delete = self.clone();
        let on_status = self.clone();
        let deleted = label.to_string();
        let changed = label.to_string();
        SubscriptionHooks {
            context: None,
            on_delete: Some(Arc::new(move |_: &SubscriptionNotice<'_>| {
                on_delete.push(deleted.clone());
            })),
            on_status_change: Some(Arc::new(move |_: &SubscriptionNotice<'_>, status: StatusCode| {
                on_status.push(format!("{changed}:{status:?}"));
            })),
        }
    }

    /// Item hooks logging `label` on deletion.
    pub fn item_hooks(&self, label: &str) -> ItemHooks {
        let log = self.clone();
        let label = label.to_string();
        ItemHooks {
            context: None,
            on_delete: Some(Arc::new(move |_: &ItemNotice<'_>| log.push(label.clone()))),
        }
    }
}

// =============================================================================
// MockListener
// =============================================================================

#[derive(Debug, Default)]
struct ListenerCounters {
    starts: AtomicUsize,
    listens: AtomicUsize,
    stops: AtomicUsize,
    hostname: Mutex<Option<String>>,
    waited: Mutex<Duration>,
}

/// A transport listener without a socket.
///
/// `listen` lets the configured clock sleep for the whole timeout, so a
/// server driven by a [`keel_server::ManualClock`] advances exactly as far
/// as it asked to wait. Clones share their counters.
#[derive(Debug, Clone)]
pub struct MockListener {
    name: String,
    fail_start: bool,
    clock: Option<Arc<dyn Clock>>,
    counters: Arc<ListenerCounters>,
}

impl MockListener {
    /// A listener that starts successfully.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_start: false,
            clock: None,
            counters: Arc::new(ListenerCounters::default()),
        }
    }

    /// A listener whose `start` fails.
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            fail_start: true,
            ..Self::new(name)
        }
    }

    /// Sleeps on `clock` inside `listen`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Number of `start` calls.
    pub fn starts(&self) -> usize {
        self.counters.starts.load(Ordering::SeqCst)
    }

    /// Number of `listen` calls.
    pub fn listens(&self) -> usize {
        self.counters.listens.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls.
    pub fn stops(&self) -> usize {
        self.counters.stops.load(Ordering::SeqCst)
    }

    /// Hostname passed to the last `start`.
    pub fn hostname(&self) -> Option<String> {
        self.counters.hostname.lock().clone()
    }

    /// Sum of all `listen` timeouts.
    pub fn total_wait(&self) -> Duration {
        *self.counters.waited.lock()
    }
}

impl TransportListener for MockListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, hostname: Option<&str>) -> UaResult<()> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        *self.counters.hostname.lock() = hostname.map(str::to_string);
        if self.fail_start {
            return Err(UaError::internal(format!("{}: address already in use", self.name)));
        }
        Ok(())
    }

    fn listen(&self, _server: &Server, timeout: Duration) {
        self.counters.listens.fetch_add(1, Ordering::SeqCst);
        *self.counters.waited.lock() += timeout;
        if let Some(clock) = &self.clock {
            clock.sleep(timeout);
        }
    }

    fn stop(&self, _server: &Server) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// MockDiscoveryListener
// =============================================================================

/// A discovery announcer that only records its state.
#[derive(Debug, Clone, Default)]
pub struct MockDiscoveryListener {
    running: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
}

impl MockDiscoveryListener {
    /// Creates a stopped announcer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of `start` calls.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl DiscoveryListener for MockDiscoveryListener {
    fn start(&self, _server: &Server) -> UaResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self, _server: &Server) {
        self.running.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// TrackingNodestore
// =============================================================================

/// A [`MemoryNodestore`] that logs releases of watched nodes.
#[derive(Debug)]
pub struct TrackingNodestore {
    inner: MemoryNodestore,
    watched: Mutex<Vec<NodeId>>,
    log: EventLog,
}

impl TrackingNodestore {
    /// Wraps an empty memory store; releases are logged to `log`.
    pub fn new(log: EventLog) -> Self {
        Self {
            inner: MemoryNodestore::new(),
            watched: Mutex::new(Vec::new()),
            log,
        }
    }

    /// Logs `release:<id>` whenever `node_id` is released.
    pub fn watch(&self, node_id: NodeId) {
        self.watched.lock().push(node_id);
    }

    /// Label logged when `node_id` is released.
    pub fn release_label(node_id: &NodeId) -> String {
        format!("release:{node_id}")
    }
}

impl Nodestore for TrackingNodestore {
    fn get_node(&self, node_id: &NodeId) -> Option<Arc<Node>> {
        self.inner.get_node(node_id)
    }

    fn release_node(&self, node: Arc<Node>) {
        if self.watched.lock().contains(&node.node_id) {
            self.log.push(Self::release_label(&node.node_id));
        }
        self.inner.release_node(node);
    }

    fn get_node_copy(&self, node_id: &NodeId) -> UaResult<Node> {
        self.inner.get_node_copy(node_id)
    }

    fn new_node(&self, class: NodeClass) -> Node {
        self.inner.new_node(class)
    }

    fn insert_node(&self, node: Node) -> UaResult<NodeId> {
        self.inner.insert_node(node)
    }

    fn replace_node(&self, node: Node) -> UaResult<()> {
        self.inner.replace_node(node)
    }

    fn remove_node(&self, node_id: &NodeId) -> UaResult<()> {
        self.inner.remove_node(node_id)
    }

    fn node_count(&self) -> usize {
        self.inner.node_count()
    }
}
