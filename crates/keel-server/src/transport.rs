// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport listener interface.
//!
//! The server treats every listener the same way: start it once with the
//! hostname hint, poll it from each `iterate` for at most the computed
//! timeout, and stop it at shutdown. What a listener does with the bytes it
//! receives is its own business; it reaches the runtime through the
//! [`Server`] handle it is given.

use std::fmt;
use std::time::Duration;

use keel_core::UaResult;
use parking_lot::Mutex;

use crate::server::Server;

/// A network listener driven by the server loop.
pub trait TransportListener: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Binds the listener. `hostname` overrides the host advertised in
    /// endpoint URLs when set.
    fn start(&self, hostname: Option<&str>) -> UaResult<()>;

    /// Processes pending network events, waiting at most `timeout` for the
    /// first one.
    fn listen(&self, server: &Server, timeout: Duration);

    /// Closes every connection and releases the socket.
    fn stop(&self, server: &Server);
}

/// Where a listener is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerState {
    Idle,
    Running,
    Failed,
}

/// A listener plus its lifecycle state.
#[derive(Debug)]
pub(crate) struct ListenerSlot {
    pub(crate) listener: Box<dyn TransportListener>,
    state: Mutex<ListenerState>,
}

impl ListenerSlot {
    pub(crate) fn new(listener: Box<dyn TransportListener>) -> Self {
        Self {
            listener,
            state: Mutex::new(ListenerState::Idle),
        }
    }

    pub(crate) fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ListenerState) {
        *self.state.lock() = state;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == ListenerState::Running
    }
}

/// Result of starting one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOutcome {
    /// Listener name.
    pub name: String,
    /// `None` when the listener started.
    pub error: Option<String>,
}

/// What `startup` achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// One entry per configured listener, in registration order.
    pub listeners: Vec<ListenerOutcome>,
    /// Set when no endpoint was configured.
    pub missing_endpoints: bool,
    /// Whether the discovery listener was started.
    pub discovery_started: bool,
}

impl StartupReport {
    /// Number of listeners that started.
    pub fn started(&self) -> usize {
        self.listeners.iter().filter(|l| l.error.is_none()).count()
    }

    /// Number of listeners that failed to start.
    pub fn failed(&self) -> usize {
        self.listeners.len() - self.started()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let report = StartupReport {
            listeners: vec![
                ListenerOutcome {
                    name: "tcp".into(),
                    error: None,
                },
                ListenerOutcome {
                    name: "ws".into(),
                    error: Some("address in use".into()),
                },
            ],
            ..StartupReport::default()
        };
        assert_eq!(report.started(), 1);
        assert_eq!(report.failed(), 1);
    }
}
