// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Time sources.
//!
//! All deadlines in the runtime (timer due times, token and session expiry,
//! discovery registrations) are computed against a [`Clock`]. Production
//! code uses [`MonotonicClock`]; tests drive a [`ManualClock`] so scenarios
//! that span seconds of server time run instantly and deterministically.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Abstraction over monotonic and wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic instant used for every deadline comparison.
    fn now(&self) -> Instant;

    /// Wall-clock time used for timestamps visible to clients.
    fn utc_now(&self) -> DateTime<Utc>;

    /// Blocks the calling thread for `duration` of this clock's time.
    fn sleep(&self, duration: Duration);
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[derive(Debug)]
struct ManualState {
    instant: Instant,
    utc: DateTime<Utc>,
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle while the
/// server owns another. `sleep` advances the clock instead of blocking.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    /// Creates a clock frozen at the current system time.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                instant: Instant::now(),
                utc: Utc::now(),
            })),
        }
    }

    /// Moves both time bases forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.instant += duration;
        state.utc += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state.lock().instant
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.state.lock().utc
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
