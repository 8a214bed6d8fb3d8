// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server lifecycle.
//!
//! A [`Server`] is a cheap handle over shared state. It owns the timer, the
//! work queue, the channel, session and subscription managers, the
//! namespace table, the endpoints and the nodestore handle, and drives them
//! from [`iterate`](Server::iterate).
//!
//! # Lifecycle
//!
//! ```text
//! ServerBuilder::build ──► Created ──startup──► Running ──shutdown──► Stopped
//!   populate ns0               │                   │
//!   bootstrap hook             │                   └── iterate / run
//!   cleanup callback           └── listeners, workers, discovery
//! ```
//!
//! # Iterate
//!
//! 1. Process the timer and dispatch due callbacks through the work queue.
//! 2. Bound the wait by the next due time and `max_iterate_wait`.
//! 3. Poll every running listener for at most that long.
//! 4. Single-threaded: run the delayed jobs whose barrier has passed.
//! 5. Return the time until the next callback is due.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use keel_config::{ApplicationType, ConcurrencyMode, ServerConfig};
use keel_core::types::ids;
use keel_core::{
    check_value_for_node, edit_node, BuiltinType, DataValue, MemoryNodestore, Node, NodeId,
    Nodestore, SecurityMode, SecurityPolicy, UaError, UaResult, Variant,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::bootstrap::populate_ns0;
use crate::channel::{
    ChannelId, ChannelLimits, ChannelManager, ChannelRequest, SecureChannel, SecurityToken,
};
use crate::clock::{Clock, MonotonicClock};
use crate::discovery::{DiscoveryListener, DiscoveryRegistry, RegisteredServer};
use crate::endpoint::{select_endpoint, swap_certificate, Certificate, Endpoint, EndpointRegistry};
use crate::error::{ServerError, ServerResult};
use crate::namespace::NamespaceTable;
use crate::session::{
    AuthenticationToken, Session, SessionContext, SessionId, SessionLimits, SessionManager,
};
use crate::stats::{ServerStatistics, StatisticsSnapshot};
use crate::subscription::{
    ItemCallback, ItemHooks, MonitoredItemId, MonitoredItemInfo, MonitoredItemRequest,
    RevisedSubscription, SubscriptionEngine, SubscriptionHooks, SubscriptionId, SubscriptionRequest,
};
use crate::timer::{CallbackId, RepeatedCallback, Timer};
use crate::transport::{
    ListenerOutcome, ListenerSlot, ListenerState, StartupReport, TransportListener,
};
use crate::workqueue::WorkQueue;

/// Runs once after the standard namespace is populated, before `build`
/// returns.
pub type BootstrapHook = Box<dyn FnOnce(&Server) -> UaResult<()> + Send>;

// =============================================================================
// Types
// =============================================================================

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServerState {
    /// Built, not started.
    Created,
    /// Listeners and workers are running.
    Running,
    /// Shut down; may be started again.
    Stopped,
}

/// Which entities a certificate rotation closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationPolicy {
    /// Close sessions carried by channels that use the old certificate.
    pub close_sessions: bool,
    /// Close channels negotiated with the old certificate.
    pub close_channels: bool,
}

impl RotationPolicy {
    /// Close both sessions and channels.
    pub const CLOSE_ALL: Self = Self {
        close_sessions: true,
        close_channels: true,
    };
}

/// Result of a certificate rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RotationReport {
    /// Endpoints that now present the new certificate.
    pub endpoints_updated: usize,
    /// Sessions closed.
    pub sessions_closed: usize,
    /// Channels closed.
    pub channels_closed: usize,
}

/// A client's request to open a secure channel.
#[derive(Debug, Clone)]
pub struct OpenChannelRequest {
    /// Endpoint URL the client connected to.
    pub endpoint_url: String,
    /// Requested security policy.
    pub security_policy: SecurityPolicy,
    /// Requested message security mode.
    pub security_mode: SecurityMode,
    /// Requested token lifetime; zero asks for the maximum.
    pub requested_lifetime: Duration,
}

impl OpenChannelRequest {
    /// An unsecured request at `endpoint_url`.
    pub fn unsecured(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            security_policy: SecurityPolicy::None,
            security_mode: SecurityMode::None,
            requested_lifetime: Duration::ZERO,
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    nodestore: Option<Arc<dyn Nodestore>>,
    clock: Option<Arc<dyn Clock>>,
    endpoints: Option<Vec<Endpoint>>,
    listeners: Vec<Box<dyn TransportListener>>,
    discovery_listener: Option<Box<dyn DiscoveryListener>>,
    bootstrap: Option<BootstrapHook>,
    seed: Option<u64>,
}

impl ServerBuilder {
    /// Starts from a configuration snapshot.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            nodestore: None,
            clock: None,
            endpoints: None,
            listeners: Vec::new(),
            discovery_listener: None,
            bootstrap: None,
            seed: None,
        }
    }

    /// Uses `nodestore` instead of a fresh in-memory store.
    pub fn nodestore(mut self, nodestore: Arc<dyn Nodestore>) -> Self {
        self.nodestore = Some(nodestore);
        self
    }

    /// Uses `clock` instead of the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses in-memory endpoints instead of reading certificates named in the
    /// configuration.
    pub fn endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Adds a transport listener.
    pub fn listener(mut self, listener: impl TransportListener + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Sets the discovery announcer; started only for discovery servers.
    pub fn discovery_listener(mut self, listener: impl DiscoveryListener + 'static) -> Self {
        self.discovery_listener = Some(Box::new(listener));
        self
    }

    /// Sets the application bootstrap hook.
    pub fn bootstrap(
        mut self,
        hook: impl FnOnce(&Server) -> UaResult<()> + Send + 'static,
    ) -> Self {
        self.bootstrap = Some(Box::new(hook));
        self
    }

    /// Fixes the random seed used for session ids and tokens.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validates the configuration and builds the server.
    ///
    /// A failure to populate the standard namespace or a failing bootstrap
    /// hook tears the partial server down and returns
    /// [`ServerError::Bootstrap`].
    pub fn build(self) -> ServerResult<Server> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock));
        let nodestore = self
            .nodestore
            .unwrap_or_else(|| Arc::new(MemoryNodestore::new()));
        let endpoints = match self.endpoints {
            Some(endpoints) => EndpointRegistry::new(endpoints),
            None => EndpointRegistry::from_config(&config.endpoints)?,
        };
        let random_seed = self.seed.unwrap_or_else(rand::random);

        let stats = Arc::new(ServerStatistics::new());
        let timer = Arc::new(Timer::new(Arc::clone(&clock)));
        let workqueue = match config.concurrency.mode {
            ConcurrencyMode::SingleThreaded => WorkQueue::inline(),
            ConcurrencyMode::Pooled => WorkQueue::pooled(config.concurrency.worker_count),
        };
        let limits = &config.limits;
        let channels = ChannelManager::new(
            ChannelLimits {
                max_channels: limits.max_secure_channels,
                max_token_lifetime: limits.max_security_token_lifetime,
            },
            (random_seed >> 32) as u32,
            Arc::clone(&clock),
            Arc::clone(&stats),
        );
        let sessions = SessionManager::new(
            SessionLimits {
                max_sessions: limits.max_sessions,
                max_timeout: limits.max_session_timeout,
            },
            random_seed,
            Arc::clone(&clock),
            Arc::clone(&stats),
        );
        let subscriptions = SubscriptionEngine::new(
            limits.clone(),
            config.subscriptions.sampling_mode,
            Arc::clone(&timer),
            Arc::clone(&nodestore),
            Arc::clone(&clock),
            Arc::clone(&stats),
        );
        let discovery = DiscoveryRegistry::new(
            config.maintenance.discovery_cleanup_timeout,
            Arc::clone(&clock),
            Arc::clone(&stats),
        );

        let server = Server {
            inner: Arc::new(ServerInner {
                namespaces: NamespaceTable::new(config.application.application_uri.clone()),
                admin_session: Session::admin(clock.now()),
                listeners: self.listeners.into_iter().map(ListenerSlot::new).collect(),
                discovery_listener: self.discovery_listener,
                discovery_started: AtomicBool::new(false),
                state: Mutex::new(ServerState::Created),
                start_time: Mutex::new(None),
                cleanup_callback: Mutex::new(None),
                config,
                random_seed,
                clock,
                nodestore,
                endpoints,
                timer,
                workqueue,
                channels,
                sessions,
                subscriptions,
                discovery,
                stats,
            }),
        };

        if let Err(source) = server.bootstrap(self.bootstrap) {
            error!(error = %source, "Server bootstrap failed");
            server.teardown();
            return Err(ServerError::bootstrap(source));
        }

        info!(
            application_uri = %server.inner.config.application.application_uri,
            endpoints = server.inner.endpoints.len(),
            listeners = server.inner.listeners.len(),
            concurrent = server.inner.workqueue.is_concurrent(),
            "Server created"
        );
        Ok(server)
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("application_uri", &self.config.application.application_uri)
            .field("listeners", &self.listeners.len())
            .field("has_bootstrap", &self.bootstrap.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Server
// =============================================================================

struct ServerInner {
    config: ServerConfig,
    random_seed: u64,
    admin_session: Session,
    clock: Arc<dyn Clock>,
    nodestore: Arc<dyn Nodestore>,
    namespaces: NamespaceTable,
    endpoints: EndpointRegistry,
    timer: Arc<Timer<Server>>,
    workqueue: WorkQueue,
    channels: ChannelManager,
    sessions: SessionManager,
    subscriptions: SubscriptionEngine,
    discovery: DiscoveryRegistry,
    listeners: Vec<ListenerSlot>,
    discovery_listener: Option<Box<dyn DiscoveryListener>>,
    discovery_started: AtomicBool,
    stats: Arc<ServerStatistics>,
    state: Mutex<ServerState>,
    start_time: Mutex<Option<DateTime<Utc>>>,
    cleanup_callback: Mutex<Option<CallbackId>>,
}

/// Handle to a running server. Clones share the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Shorthand for [`ServerBuilder::new`].
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    fn bootstrap(&self, hook: Option<BootstrapHook>) -> UaResult<()> {
        let inner = &self.inner;
        populate_ns0(inner.nodestore.as_ref(), &inner.namespaces.snapshot())?;
        if let Some(hook) = hook {
            hook(self)?;
        }
        let id = inner.timer.add_repeated_callback(
            inner.config.maintenance.cleanup_interval,
            Arc::new(|server: &Server| server.run_cleanup()),
        )?;
        *inner.cleanup_callback.lock() = Some(id);
        Ok(())
    }

    /// Releases everything except listeners, which need a running server to
    /// stop.
    fn teardown(&self) {
        self.inner.teardown();
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts listeners, workers and discovery, and records the start time.
    ///
    /// A listener that fails to start is logged and reported; the others
    /// keep running.
    pub fn startup(&self) -> ServerResult<StartupReport> {
        let inner = &self.inner;
        let previous = {
            let mut state = inner.state.lock();
            if *state == ServerState::Running {
                return Err(UaError::invalid_argument("server", "already running").into());
            }
            std::mem::replace(&mut *state, ServerState::Running)
        };

        let mut report = StartupReport::default();
        if inner.endpoints.is_empty() {
            warn!("No endpoint configured, clients cannot connect");
            report.missing_endpoints = true;
        }

        let start_time = inner.clock.utc_now();
        let started = self
            .write_internal(
                &NodeId::numeric(0, ids::SERVER_SERVER_STATUS_START_TIME),
                Variant::from(start_time),
            )
            .map_err(ServerError::from)
            .and_then(|()| inner.workqueue.start());
        if let Err(e) = started {
            *inner.state.lock() = previous;
            error!(error = %e, "Server startup failed");
            return Err(e);
        }
        *inner.start_time.lock() = Some(start_time);

        let hostname = inner.config.custom_hostname.as_deref();
        for slot in &inner.listeners {
            let name = slot.listener.name().to_string();
            match slot.listener.start(hostname) {
                Ok(()) => {
                    slot.set_state(ListenerState::Running);
                    info!(listener = %name, "Listener started");
                    report.listeners.push(ListenerOutcome { name, error: None });
                }
                Err(e) => {
                    slot.set_state(ListenerState::Failed);
                    inner.stats.record_listener_failure();
                    warn!(listener = %name, error = %e, "Listener failed to start");
                    report.listeners.push(ListenerOutcome {
                        name,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if inner.config.application.application_type == ApplicationType::DiscoveryServer {
            if let Some(listener) = &inner.discovery_listener {
                match listener.start(self) {
                    Ok(()) => {
                        inner.discovery_started.store(true, Ordering::Release);
                        report.discovery_started = true;
                        info!("Discovery listener started");
                    }
                    Err(e) => warn!(error = %e, "Discovery listener failed to start"),
                }
            }
        }

        info!(
            listeners = report.started(),
            failed = report.failed(),
            start_time = %start_time,
            "Server started"
        );
        Ok(report)
    }

    /// Runs one iteration of the server loop.
    ///
    /// With `wait_internal` the listeners (or the clock, if no listener
    /// runs) wait up to the time until the next callback is due, bounded by
    /// `max_iterate_wait`. Returns the time until the next callback is due,
    /// with the same bound.
    pub fn iterate(&self, wait_internal: bool) -> Duration {
        let inner = &self.inner;
        let max_wait = inner.config.maintenance.max_iterate_wait;

        let now = inner.clock.now();
        let next_due = inner
            .timer
            .process(now, |id, callback| self.dispatch(id, callback));
        let timeout = if wait_internal {
            ceil_millis(bounded_wait(next_due, now, max_wait))
        } else {
            Duration::ZERO
        };

        let mut polled = false;
        for slot in inner.listeners.iter().filter(|s| s.is_running()) {
            slot.listener.listen(self, timeout);
            polled = true;
        }
        if !polled && !timeout.is_zero() {
            inner.clock.sleep(timeout);
        }

        if !inner.workqueue.is_concurrent() {
            inner.workqueue.manually_process_delayed();
        }

        let now = inner.clock.now();
        bounded_wait(inner.timer.next_due(), now, max_wait)
    }

    fn dispatch(&self, id: CallbackId, callback: RepeatedCallback<Server>) {
        self.inner.stats.record_callback_fired();
        let weak: Weak<ServerInner> = Arc::downgrade(&self.inner);
        let result = self.inner.workqueue.enqueue(move || {
            if let Some(inner) = weak.upgrade() {
                callback(&Server { inner });
            }
        });
        if let Err(e) = result {
            debug!(callback_id = id, error = %e, "Callback not dispatched");
        }
    }

    /// Stops listeners, workers and discovery, then flushes deferred work.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if *state != ServerState::Running {
                return;
            }
            *state = ServerState::Stopped;
        }

        for slot in inner.listeners.iter().filter(|s| s.is_running()) {
            slot.listener.stop(self);
            slot.set_state(ListenerState::Idle);
            debug!(listener = slot.listener.name(), "Listener stopped");
        }
        inner.workqueue.stop();
        if inner.discovery_started.swap(false, Ordering::AcqRel) {
            if let Some(listener) = &inner.discovery_listener {
                listener.stop(self);
            }
        }
        let flushed = inner.workqueue.cleanup();
        info!(flushed, "Server stopped");
    }

    /// Starts the server, iterates while `running` is set, then shuts down.
    pub fn run(&self, running: &AtomicBool) -> ServerResult<()> {
        self.startup()?;
        while running.load(Ordering::Acquire) {
            self.iterate(true);
        }
        self.shutdown();
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.inner.state.lock()
    }

    /// Returns `true` between `startup` and `shutdown`.
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Wall-clock time of the last `startup`.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        *self.inner.start_time.lock()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Removes timed-out sessions (with their subscriptions) and channels,
    /// and expired discovery registrations. Runs on the cleanup interval.
    pub fn run_cleanup(&self) {
        let inner = &self.inner;
        let now = inner.clock.now();

        let sessions = inner.sessions.cleanup_timed_out(now);
        for session in &sessions {
            inner.subscriptions.delete_session_subscriptions(&session.id);
            if let Some(channel_id) = session.channel_id {
                inner.channels.detach_session(channel_id, &session.id);
            }
        }

        let channels = inner.channels.cleanup_timed_out(now);
        for channel in &channels {
            inner.sessions.detach_channel(channel.id, &channel.sessions);
        }

        let registrations = inner.discovery.cleanup(now);
        debug!(
            sessions = sessions.len(),
            channels = channels.len(),
            registrations = registrations.len(),
            "Cleanup sweep finished"
        );
    }

    /// Releases a borrowed node once all work queued before this call has
    /// finished.
    ///
    /// If the work queue rejects the release, the node is released before
    /// the error is returned.
    pub fn release_node_deferred(&self, node: Arc<Node>) -> ServerResult<()> {
        let slot = Arc::new(Mutex::new(Some(node)));
        let store = Arc::clone(&self.inner.nodestore);
        let queued = Arc::clone(&slot);
        let result = self.inner.workqueue.enqueue_delayed(move || {
            if let Some(node) = queued.lock().take() {
                store.release_node(node);
            }
        });
        if result.is_err() {
            if let Some(node) = slot.lock().take() {
                debug!(node_id = %node.node_id, "Deferred release rejected, releasing now");
                self.inner.nodestore.release_node(node);
            }
        }
        result
    }

    // =========================================================================
    // Namespaces
    // =========================================================================

    /// Adds a namespace and returns its index. Adding a known URI returns
    /// the existing index.
    pub fn add_namespace(&self, uri: &str) -> UaResult<u16> {
        let before = self.inner.namespaces.len();
        let index = self.inner.namespaces.add(uri)?;
        if self.inner.namespaces.len() != before {
            self.write_namespace_array()?;
        }
        Ok(index)
    }

    /// Index of a namespace URI.
    pub fn get_namespace_by_name(&self, uri: &str) -> UaResult<u16> {
        self.inner.namespaces.index_of(uri)
    }

    /// URI of a namespace index.
    pub fn get_namespace_by_index(&self, index: u16) -> UaResult<String> {
        self.inner.namespaces.uri_at(index)
    }

    /// Copy of the namespace table.
    pub fn namespace_array(&self) -> Vec<String> {
        self.inner.namespaces.snapshot()
    }

    fn write_namespace_array(&self) -> UaResult<()> {
        let uris = self
            .inner
            .namespaces
            .snapshot()
            .into_iter()
            .map(Variant::from)
            .collect();
        self.write_internal(
            &NodeId::numeric(0, ids::SERVER_NAMESPACE_ARRAY),
            Variant::array(BuiltinType::String, uris)?,
        )
    }

    // =========================================================================
    // Repeated callbacks
    // =========================================================================

    /// Registers a callback fired every `interval`, first at now + interval.
    pub fn add_repeated_callback(
        &self,
        interval: Duration,
        callback: impl Fn(&Server) + Send + Sync + 'static,
    ) -> UaResult<CallbackId> {
        self.inner.timer.add_repeated_callback(interval, Arc::new(callback))
    }

    /// Changes the interval of a repeated callback.
    pub fn change_repeated_callback_interval(
        &self,
        id: CallbackId,
        interval: Duration,
    ) -> UaResult<()> {
        self.inner.timer.change_interval(id, interval)
    }

    /// Removes a repeated callback.
    pub fn remove_repeated_callback(&self, id: CallbackId) -> UaResult<()> {
        self.inner.timer.remove_callback(id)
    }

    // =========================================================================
    // Secure channels
    // =========================================================================

    /// Accepts a channel at a matching endpoint and opens it.
    ///
    /// Holds the endpoint read lock while the certificate is copied into the
    /// channel, so a concurrent rotation cannot hand out the old one.
    pub fn open_secure_channel(&self, request: &OpenChannelRequest) -> UaResult<SecureChannel> {
        let inner = &self.inner;
        let (channel, purged) = {
            let endpoints = inner.endpoints.read();
            let endpoint = select_endpoint(
                &endpoints,
                &request.endpoint_url,
                request.security_policy,
                request.security_mode,
            )?;
            inner.channels.open_channel(ChannelRequest {
                security_policy: request.security_policy,
                security_mode: request.security_mode,
                certificate: Arc::clone(endpoint.certificate()),
                requested_lifetime: request.requested_lifetime,
            })?
        };
        if let Some(purged) = purged {
            inner.sessions.detach_channel(purged.id, &purged.sessions);
        }
        inner.channels.mark_open(channel.id)?;
        inner.channels.validate(channel.id)
    }

    /// Issues a new security token for an open channel.
    pub fn renew_security_token(
        &self,
        id: ChannelId,
        requested_lifetime: Duration,
    ) -> UaResult<SecurityToken> {
        self.inner.channels.renew_security_token(id, requested_lifetime)
    }

    /// Closes a channel. Its sessions stay alive until they time out or are
    /// activated on another channel.
    pub fn close_secure_channel(&self, id: ChannelId) -> UaResult<()> {
        let closed = self.inner.channels.close_channel(id)?;
        self.inner.sessions.detach_channel(closed.id, &closed.sessions);
        Ok(())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Creates a session on a valid channel.
    pub fn create_session(
        &self,
        channel_id: ChannelId,
        name: impl Into<String>,
        requested_timeout: Duration,
        context: Option<SessionContext>,
    ) -> UaResult<Session> {
        let inner = &self.inner;
        inner.channels.validate(channel_id)?;
        let session = inner
            .sessions
            .create_session(channel_id, name, requested_timeout, context)?;
        if let Err(e) = inner.channels.attach_session(channel_id, session.id) {
            inner.sessions.remove_session(&session.id);
            return Err(e);
        }
        Ok(session)
    }

    /// Activates a session on `channel_id`, moving it off its previous
    /// channel if needed.
    pub fn activate_session(
        &self,
        token: &AuthenticationToken,
        channel_id: ChannelId,
    ) -> UaResult<Session> {
        let inner = &self.inner;
        inner.channels.validate(channel_id)?;
        let pending = inner
            .sessions
            .get_by_token(token)
            .ok_or_else(|| UaError::session_invalid("unknown token"))?;
        let already_bound = pending.channel_id == Some(channel_id);

        // Bind first so a channel closed in between leaves the session as it was.
        inner.channels.attach_session(channel_id, pending.id)?;
        let (session, previous) = match inner.sessions.activate_session(token, channel_id) {
            Ok(activated) => activated,
            Err(e) => {
                if !already_bound {
                    inner.channels.detach_session(channel_id, &pending.id);
                }
                return Err(e);
            }
        };
        if let Some(previous) = previous {
            inner.channels.detach_session(previous, &session.id);
        }
        Ok(session)
    }

    /// Validates a service call and refreshes the session deadline.
    pub fn touch_session(
        &self,
        token: &AuthenticationToken,
        channel_id: ChannelId,
    ) -> UaResult<SessionId> {
        self.inner.channels.validate(channel_id)?;
        self.inner.sessions.touch_session(token, channel_id)
    }

    /// Closes a session and deletes its subscriptions.
    pub fn close_session(&self, token: &AuthenticationToken) -> UaResult<()> {
        let session = self.inner.sessions.close_session(token)?;
        self.drop_session(&session);
        Ok(())
    }

    fn drop_session(&self, session: &Session) {
        self.inner.subscriptions.delete_session_subscriptions(&session.id);
        if let Some(channel_id) = session.channel_id {
            self.inner.channels.detach_session(channel_id, &session.id);
        }
    }

    /// The server's own session.
    pub fn admin_session(&self) -> &Session {
        &self.inner.admin_session
    }

    fn check_session(&self, session_id: &SessionId) -> UaResult<()> {
        if session_id.is_admin() || self.inner.sessions.get(session_id).is_some() {
            Ok(())
        } else {
            Err(UaError::session_invalid(session_id))
        }
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    /// Replaces `old` with a new certificate and key on every endpoint that
    /// presents it, closing sessions and channels per `policy`.
    ///
    /// The endpoint write lock is held from the sweep to the swap, so no
    /// channel can be negotiated with `old` in between. Subscriptions of
    /// closed sessions are deleted after the lock is released.
    pub fn update_certificate(
        &self,
        old: &[u8],
        certificate: Certificate,
        private_key: Certificate,
        policy: RotationPolicy,
    ) -> UaResult<RotationReport> {
        let inner = &self.inner;
        let mut report = RotationReport::default();
        let mut closed_sessions = Vec::new();
        {
            let mut endpoints = inner.endpoints.write();
            let affected = inner.channels.channels_using(old);

            if policy.close_sessions {
                for id in inner.sessions.sessions_on(&affected) {
                    if let Some(session) = inner.sessions.remove_session(&id) {
                        info!(session_id = %id, "Session closed by certificate rotation");
                        closed_sessions.push(session);
                    }
                }
            }
            if policy.close_channels {
                for id in affected {
                    if let Ok(closed) = inner.channels.close_channel(id) {
                        inner.sessions.detach_channel(closed.id, &closed.sessions);
                        report.channels_closed += 1;
                    }
                }
            }
            report.endpoints_updated =
                swap_certificate(&mut endpoints, old, &certificate, &private_key);
        }

        report.sessions_closed = closed_sessions.len();
        for session in &closed_sessions {
            inner.stats.record_session_closed();
            self.drop_session(session);
        }
        info!(
            endpoints = report.endpoints_updated,
            sessions = report.sessions_closed,
            channels = report.channels_closed,
            "Certificate rotated"
        );
        Ok(report)
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Reads the value of a variable node.
    pub fn read_value(&self, node_id: &NodeId) -> UaResult<DataValue> {
        if node_id.is_ns0(ids::SERVER_SERVER_STATUS_CURRENT_TIME) {
            let now = self.inner.clock.utc_now();
            return Ok(DataValue::new(now).with_server_timestamp(now));
        }
        let node = self.inner.nodestore.get_node_copy(node_id)?;
        node.variable()
            .map(|v| v.value.clone())
            .ok_or_else(|| UaError::AttributeIdInvalid {
                node_id: node_id.to_string(),
                attribute: "Value".to_string(),
            })
    }

    /// Writes the value of a variable node after checking it against the
    /// declared data type, value rank and array dimensions.
    pub fn write_value(&self, node_id: &NodeId, value: impl Into<Variant>) -> UaResult<()> {
        let value = value.into();
        let store = self.inner.nodestore.as_ref();
        let now = self.inner.clock.utc_now();
        edit_node(store, node_id, |node| {
            check_value_for_node(store, node, &value)?;
            if let Some(attributes) = node.variable_mut() {
                attributes.value = DataValue::new(value.clone())
                    .with_source_timestamp(now)
                    .with_server_timestamp(now);
            }
            Ok(())
        })
    }

    fn write_internal(&self, node_id: &NodeId, value: Variant) -> UaResult<()> {
        let now = self.inner.clock.utc_now();
        edit_node(self.inner.nodestore.as_ref(), node_id, |node| {
            let attributes = node
                .variable_mut()
                .ok_or_else(|| UaError::internal(format!("{node_id} is not a variable")))?;
            attributes.value = DataValue::new(value.clone()).with_server_timestamp(now);
            Ok(())
        })
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Creates a subscription for an existing session.
    pub fn create_subscription(
        &self,
        session_id: &SessionId,
        request: &SubscriptionRequest,
        hooks: SubscriptionHooks,
    ) -> UaResult<(SubscriptionId, RevisedSubscription)> {
        self.check_session(session_id)?;
        self.inner
            .subscriptions
            .create_subscription(*session_id, request, hooks)
    }

    /// Deletes a subscription.
    pub fn delete_subscription(&self, session_id: &SessionId, id: SubscriptionId) -> UaResult<()> {
        self.inner.subscriptions.delete_subscription(session_id, id)
    }

    /// Creates a monitored item in a subscription of `session_id`.
    pub fn create_monitored_item(
        &self,
        session_id: &SessionId,
        subscription_id: SubscriptionId,
        request: MonitoredItemRequest,
        hooks: ItemHooks,
    ) -> UaResult<MonitoredItemInfo> {
        self.check_session(session_id)?;
        self.inner
            .subscriptions
            .create_monitored_item(session_id, subscription_id, request, hooks)
    }

    /// Creates a server-local monitored item.
    pub fn create_local_monitored_item(
        &self,
        request: MonitoredItemRequest,
        callback: ItemCallback,
        hooks: ItemHooks,
    ) -> UaResult<MonitoredItemId> {
        self.inner
            .subscriptions
            .create_local_monitored_item(request, callback, hooks)
    }

    /// Deletes a server-local monitored item.
    pub fn delete_local_monitored_item(&self, id: MonitoredItemId) -> UaResult<()> {
        self.inner.subscriptions.delete_local_monitored_item(id)
    }

    /// Emits an event from `source`.
    pub fn trigger_event(&self, source: &NodeId, fields: &[Variant]) -> usize {
        self.inner.subscriptions.trigger_event(source, fields)
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Records a `RegisterServer` announcement. Only discovery servers
    /// accept registrations.
    pub fn register_server(&self, server: RegisteredServer) -> UaResult<()> {
        if self.inner.config.application.application_type != ApplicationType::DiscoveryServer {
            return Err(UaError::invalid_argument(
                "application_type",
                "registrations need a discovery server",
            ));
        }
        self.inner.discovery.register(server)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The configuration snapshot.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Seed of the session id and token generator.
    pub fn random_seed(&self) -> u64 {
        self.inner.random_seed
    }

    /// The clock deadlines are computed against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// The nodestore.
    pub fn nodestore(&self) -> &Arc<dyn Nodestore> {
        &self.inner.nodestore
    }

    /// The endpoints.
    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.inner.endpoints
    }

    /// The repeated-callback timer.
    pub fn timer(&self) -> &Timer<Server> {
        &self.inner.timer
    }

    /// The work queue.
    pub fn workqueue(&self) -> &WorkQueue {
        &self.inner.workqueue
    }

    /// The channel manager.
    pub fn channels(&self) -> &ChannelManager {
        &self.inner.channels
    }

    /// The session manager.
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// The subscription engine.
    pub fn subscriptions(&self) -> &SubscriptionEngine {
        &self.inner.subscriptions
    }

    /// The discovery registry.
    pub fn discovery(&self) -> &DiscoveryRegistry {
        &self.inner.discovery
    }

    /// Snapshot of the lifecycle counters.
    pub fn stats(&self) -> StatisticsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("application_uri", &self.inner.config.application.application_uri)
            .field("state", &self.state())
            .field("channels", &self.inner.channels.len())
            .field("sessions", &self.inner.sessions.len())
            .field("subscriptions", &self.inner.subscriptions.len())
            .finish()
    }
}

impl ServerInner {
    fn teardown(&self) {
        self.workqueue.stop();
        if let Some(id) = self.cleanup_callback.lock().take() {
            let _ = self.timer.remove_callback(id);
        }
        self.subscriptions.delete_all();
        self.sessions.close_all();
        self.channels.close_all();
        self.discovery.clear();
        self.timer.clear();
        self.workqueue.cleanup();
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        if *self.state.get_mut() == ServerState::Running {
            warn!("Server dropped while running; listeners were not stopped");
        }
        self.teardown();
    }
}

fn bounded_wait(next_due: Option<Instant>, now: Instant, max_wait: Duration) -> Duration {
    next_due
        .map_or(max_wait, |due| due.saturating_duration_since(now))
        .min(max_wait)
}

fn ceil_millis(duration: Duration) -> Duration {
    let millis = duration.as_nanos().div_ceil(1_000_000);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

// =============================================================================
// Tests
// =============================================================================
