// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! A server driven by simulated time.

use std::time::{Duration, Instant};

use keel_core::UaResult;
use keel_server::{
    ManualClock, OpenChannelRequest, SecureChannel, Server, ServerResult, Session, StartupReport,
};

use super::fixtures::TEST_ENDPOINT_URL;
use super::mocks::MockListener;

/// A client connection: an open channel plus an activated session.
#[derive(Debug, Clone)]
pub struct TestConnection {
    /// The secure channel.
    pub channel: SecureChannel,
    /// The activated session.
    pub session: Session,
}

/// A server, its manual clock and the mock listeners it was built with.
pub struct TestServer {
    server: Server,
    clock: ManualClock,
    listeners: Vec<MockListener>,
}

impl TestServer {
    pub(crate) fn new(server: Server, clock: ManualClock, listeners: Vec<MockListener>) -> Self {
        Self {
            server,
            clock,
            listeners,
        }
    }

    /// The server handle.
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// The clock shared with the server.
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Mock listener at `index`, in the order they were added.
    pub fn listener(&self, index: usize) -> &MockListener {
        &self.listeners[index]
    }

    /// Starts the server.
    pub fn startup(&self) -> ServerResult<StartupReport> {
        self.server.startup()
    }

    /// Moves simulated time forward without iterating.
    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Current simulated time.
    pub fn now(&self) -> Instant {
        use keel_server::Clock;
        self.clock.now()
    }

    /// Iterates with internal waiting until `duration` of simulated time
    /// has passed. Returns the number of iterations.
    pub fn run_for(&self, duration: Duration) -> usize {
        let start = self.now();
        let mut iterations = 0;
        while self.now().saturating_duration_since(start) < duration {
            let before = self.now();
            self.server.iterate(true);
            iterations += 1;
            if self.now() == before {
                // A zero timeout means work was due; keep time moving.
                self.clock.advance(Duration::from_millis(1));
            }
        }
        iterations
    }

    /// Opens a channel on the test endpoint and creates and activates a
    /// session on it.
    pub fn connect(&self, name: &str, session_timeout: Duration) -> UaResult<TestConnection> {
        self.connect_with(&OpenChannelRequest::unsecured(TEST_ENDPOINT_URL), name, session_timeout)
    }

    /// [`TestServer::connect`] with an explicit channel request.
    pub fn connect_with(
        &self,
        request: &OpenChannelRequest,
        name: &str,
        session_timeout: Duration,
    ) -> UaResult<TestConnection> {
        let channel = self.server.open_secure_channel(request)?;
        let created = self
            .server
            .create_session(channel.id, name, session_timeout, None)?;
        let session = self.server.activate_session(&created.token, channel.id)?;
        Ok(TestConnection { channel, session })
    }

    /// Shuts the server down.
    pub fn shutdown(&self) {
        self.server.shutdown();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}
