// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Discovery registry.
//!
//! A discovery server keeps the servers that announced themselves through
//! `RegisterServer`. Every announcement refreshes the entry; the maintenance
//! sweep drops entries not refreshed within the cleanup timeout. A zero
//! timeout keeps registrations forever.
//!
//! Multicast announcement is a plug-in: a [`DiscoveryListener`] is started
//! and stopped together with a discovery server.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use keel_core::{UaError, UaResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::server::Server;
use crate::stats::ServerStatistics;

/// A server announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredServer {
    /// Application URI of the announcing server; the registry key.
    pub server_uri: String,
    /// Product URI.
    pub product_uri: String,
    /// Human-readable name.
    pub server_name: String,
    /// URLs at which the server answers discovery requests.
    pub discovery_urls: Vec<String>,
    /// `false` unregisters the server.
    pub is_online: bool,
}

impl RegisteredServer {
    /// An online announcement with one discovery URL.
    pub fn online(server_uri: impl Into<String>, discovery_url: impl Into<String>) -> Self {
        Self {
            server_uri: server_uri.into(),
            product_uri: String::new(),
            server_name: String::new(),
            discovery_urls: vec![discovery_url.into()],
            is_online: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Registration {
    server: RegisteredServer,
    last_seen: Instant,
}

/// Servers known to a discovery server.
pub struct DiscoveryRegistry {
    entries: RwLock<HashMap<String, Registration>>,
    cleanup_timeout: Duration,
    clock: Arc<dyn Clock>,
    stats: Arc<ServerStatistics>,
}

impl DiscoveryRegistry {
    /// Creates an empty registry.
    pub fn new(
        cleanup_timeout: Duration,
        clock: Arc<dyn Clock>,
        stats: Arc<ServerStatistics>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cleanup_timeout,
            clock,
            stats,
        }
    }

    /// Records or refreshes an announcement. An offline announcement removes
    /// the entry.
    pub fn register(&self, server: RegisteredServer) -> UaResult<()> {
        if server.server_uri.trim().is_empty() {
            return Err(UaError::invalid_argument("server_uri", "cannot be empty"));
        }
        let mut entries = self.entries.write();
        if !server.is_online {
            if entries.remove(&server.server_uri).is_some() {
                info!(server_uri = %server.server_uri, "Server unregistered");
            }
            return Ok(());
        }

        entries
            .try_reserve(1)
            .map_err(|_| UaError::out_of_memory("discovery registry"))?;
        let uri = server.server_uri.clone();
        let fresh = entries
            .insert(
                uri.clone(),
                Registration {
                    server,
                    last_seen: self.clock.now(),
                },
            )
            .is_none();
        if fresh {
            info!(server_uri = %uri, "Server registered");
        } else {
            debug!(server_uri = %uri, "Server registration refreshed");
        }
        Ok(())
    }

    /// Drops registrations not refreshed within the cleanup timeout.
    pub fn cleanup(&self, now: Instant) -> Vec<String> {
        if self.cleanup_timeout.is_zero() {
            return Vec::new();
        }
        let mut entries = self.entries.write();
        let stale: Vec<String> = entries
            .values()
            .filter(|r| now.saturating_duration_since(r.last_seen) > self.cleanup_timeout)
            .map(|r| r.server.server_uri.clone())
            .collect();
        for uri in &stale {
            entries.remove(uri);
            self.stats.record_registration_expired();
            info!(server_uri = %uri, "Server registration expired");
        }
        stale
    }

    /// Copy of every registered server, ordered by URI.
    pub fn servers(&self) -> Vec<RegisteredServer> {
        let mut servers: Vec<_> = self
            .entries
            .read()
            .values()
            .map(|r| r.server.clone())
            .collect();
        servers.sort_by(|a, b| a.server_uri.cmp(&b.server_uri));
        servers
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl fmt::Debug for DiscoveryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryRegistry")
            .field("registrations", &self.len())
            .field("cleanup_timeout", &self.cleanup_timeout)
            .finish()
    }
}

/// Auxiliary discovery announcer, such as a multicast responder.
pub trait DiscoveryListener: Send + Sync + fmt::Debug {
    /// Starts announcing the server.
    fn start(&self, server: &Server) -> UaResult<()>;

    /// Stops announcing.
    fn stop(&self, server: &Server);
}
