// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # keel-server
//!
//! Runtime core of an OPC UA server.
//!
//! This crate keeps track of connected clients and drives the periodic work
//! of a server:
//!
//! - **Timer**: drift-free repeated callbacks
//! - **WorkQueue**: inline or pooled execution with deferred deletion
//! - **Channels and Sessions**: the two nested connection lifecycles, with
//!   periodic expiry sweeps and certificate rotation
//! - **Subscriptions**: monitored-item sampling, FIFO notification queues,
//!   keep-alives and lifetime expiry
//! - **Server**: startup, the iterate loop, shutdown
//!
//! The address space itself lives behind the `Nodestore` trait of
//! `keel-core`; transports plug in through [`TransportListener`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use keel_config::ServerConfig;
//! use keel_server::{Server, ShutdownCoordinator};
//!
//! let server = Server::builder(ServerConfig::minimal("opc.tcp://0.0.0.0:4840"))
//!     .listener(my_tcp_listener)
//!     .build()?;
//! let ns = server.add_namespace("urn:example")?;
//! server.add_repeated_callback(Duration::from_secs(1), |server| {
//!     tracing::info!(sessions = server.sessions().len(), "tick");
//! })?;
//!
//! let shutdown = ShutdownCoordinator::new();
//! server.run(&shutdown.running_flag())?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Scheduling
// =============================================================================

pub mod clock;
pub mod timer;
pub mod workqueue;

// =============================================================================
// Connections
// =============================================================================

pub mod channel;
pub mod endpoint;
pub mod session;

// =============================================================================
// Address Space and Subscriptions
// =============================================================================

pub mod bootstrap;
pub mod namespace;
pub mod subscription;

// =============================================================================
// Server
// =============================================================================

pub mod discovery;
pub mod error;
pub mod logging;
pub mod server;
pub mod shutdown;
pub mod stats;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use channel::{ChannelId, ChannelManager, ChannelState, SecureChannel, SecurityToken};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use discovery::{DiscoveryListener, DiscoveryRegistry, RegisteredServer};
pub use endpoint::{Certificate, Endpoint, EndpointRegistry};
pub use error::{ServerError, ServerResult};
pub use namespace::NamespaceTable;
pub use server::{
    BootstrapHook, OpenChannelRequest, RotationPolicy, RotationReport, Server, ServerBuilder,
    ServerState,
};
pub use session::{AuthenticationToken, Session, SessionId, SessionManager, SessionState};
pub use shutdown::ShutdownCoordinator;
pub use stats::{ServerStatistics, StatisticsSnapshot};
pub use subscription::{
    DataChangeFilter, ItemCallback, ItemHooks, MonitoredItemRequest, MonitoringMode,
    NotificationMessage, SubscriptionEngine, SubscriptionHooks, SubscriptionId, SubscriptionRequest,
};
pub use timer::{CallbackId, Timer};
pub use transport::{ListenerOutcome, StartupReport, TransportListener};
pub use workqueue::{WorkQueue, WorkQueueStats};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
