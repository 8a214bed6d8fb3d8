// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shutdown coordination.
//!
//! [`Server::run`](crate::Server::run) loops while a liveness flag is set.
//! The coordinator owns that flag, clears it on request or on an OS signal,
//! and notifies async subscribers through a broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

/// Owns the running flag of a server loop.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator in the running state.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The flag handed to [`Server::run`](crate::Server::run).
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Subscribes to the shutdown notification.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Clears the running flag and notifies subscribers. Idempotent.
    pub fn initiate_shutdown(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Shutdown initiated");
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` once shutdown was initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }

    /// Waits for SIGTERM, SIGINT or SIGQUIT (Ctrl+C elsewhere), or for a
    /// manual [`initiate_shutdown`](Self::initiate_shutdown), then clears
    /// the running flag.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown_initiated() {
            return;
        }
        let mut manual = self.subscribe();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (Ok(mut sigterm), Ok(mut sigint), Ok(mut sigquit)) = (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
                signal(SignalKind::quit()),
            ) else {
                warn!("Failed to register signal handlers, waiting for manual shutdown");
                let _ = manual.recv().await;
                return;
            };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = sigquit.recv() => info!("Received SIGQUIT"),
                _ = manual.recv() => return,
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_err() {
                        warn!("Failed to listen for Ctrl+C");
                    } else {
                        info!("Received Ctrl+C");
                    }
                }
                _ = manual.recv() => return,
            }
        }

        self.initiate_shutdown();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_initiate_clears_running_flag() {
        let coordinator = ShutdownCoordinator::new();
        let flag = coordinator.running_flag();
        let mut rx = coordinator.subscribe();
        assert!(flag.load(Ordering::SeqCst));

        coordinator.initiate_shutdown();
        assert!(!flag.load(Ordering::SeqCst));
        assert!(coordinator.is_shutdown_initiated());
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_returns_on_manual_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let trigger = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.initiate_shutdown();
        });
        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_shutdown())
            .await
            .unwrap();
        assert!(coordinator.is_shutdown_initiated());
    }

    #[tokio::test]
    async fn test_double_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate_shutdown();
        coordinator.initiate_shutdown();
        assert!(coordinator.is_shutdown_initiated());
    }
}
