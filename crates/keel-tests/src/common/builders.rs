// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Builder for [`TestServer`].

use std::sync::Arc;
use std::time::Duration;

use keel_config::{ConcurrencyConfig, ServerConfig};
use keel_core::{Nodestore, UaResult};
use keel_server::{Clock, Endpoint, ManualClock, Server, ServerResult};

use super::fixtures::server_config;
use super::harness::TestServer;
use super::mocks::{MockDiscoveryListener, MockListener};

type Hook = Box<dyn FnOnce(&Server) -> UaResult<()> + Send>;

/// Assembles a server on a [`ManualClock`].
///
/// Mock listeners added here are wired to the same clock, so their `listen`
/// advances simulated time.
pub struct TestServerBuilder {
    config: ServerConfig,
    listeners: Vec<MockListener>,
    discovery: Option<MockDiscoveryListener>,
    nodestore: Option<Arc<dyn Nodestore>>,
    endpoints: Option<Vec<Endpoint>>,
    bootstrap: Option<Hook>,
    seed: u64,
}

impl TestServerBuilder {
    /// Starts from [`server_config`] with a fixed seed.
    pub fn new() -> Self {
        Self {
            config: server_config(),
            listeners: Vec::new(),
            discovery: None,
            nodestore: None,
            endpoints: None,
            bootstrap: None,
            seed: 0x5eed_0000_0000_0001,
        }
    }

    /// Replaces the configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs callbacks on `workers` threads.
    pub fn pooled(mut self, workers: usize) -> Self {
        self.config.concurrency = ConcurrencyConfig::pooled(workers);
        self
    }

    /// Sets the cleanup sweep interval.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance.cleanup_interval = interval;
        self
    }

    /// Caps revised session timeouts.
    pub fn max_session_timeout(mut self, timeout: Duration) -> Self {
        self.config.limits.max_session_timeout = timeout;
        self
    }

    /// Caps the number of open channels.
    pub fn max_channels(mut self, limit: usize) -> Self {
        self.config.limits.max_secure_channels = limit;
        self
    }

    /// Sets the hostname hint for listeners.
    pub fn custom_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.custom_hostname = Some(hostname.into());
        self
    }

    /// Adds a mock listener.
    pub fn listener(mut self, listener: MockListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Adds a mock discovery announcer.
    pub fn discovery_listener(mut self, listener: MockDiscoveryListener) -> Self {
        self.discovery = Some(listener);
        self
    }

    /// Uses a custom nodestore.
    pub fn nodestore(mut self, nodestore: Arc<dyn Nodestore>) -> Self {
        self.nodestore = Some(nodestore);
        self
    }

    /// Adds an in-memory endpoint. Once called, configured endpoints are
    /// ignored.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.get_or_insert_with(Vec::new).push(endpoint);
        self
    }

    /// Runs `hook` during bootstrap.
    pub fn bootstrap(
        mut self,
        hook: impl FnOnce(&Server) -> UaResult<()> + Send + 'static,
    ) -> Self {
        self.bootstrap = Some(Box::new(hook));
        self
    }

    /// Builds the server.
    pub fn build(self) -> ServerResult<TestServer> {
        let clock = ManualClock::new();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());

        let listeners: Vec<MockListener> = self
            .listeners
            .into_iter()
            .map(|l| l.with_clock(Arc::clone(&shared)))
            .collect();

        let mut builder = Server::builder(self.config)
            .clock(Arc::clone(&shared))
            .seed(self.seed);
        for listener in &listeners {
            builder = builder.listener(listener.clone());
        }
        if let Some(discovery) = &self.discovery {
            builder = builder.discovery_listener(discovery.clone());
        }
        if let Some(nodestore) = self.nodestore {
            builder = builder.nodestore(nodestore);
        }
        if let Some(endpoints) = self.endpoints {
            builder = builder.endpoints(endpoints);
        }
        if let Some(hook) = self.bootstrap {
            builder = builder.bootstrap(hook);
        }

        Ok(TestServer::new(builder.build()?, clock, listeners))
    }
}

impl Default for TestServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
