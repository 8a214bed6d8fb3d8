// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Repeated-callback scheduler.
//!
//! The timer keeps an ordered schedule of `(due, id)` pairs next to the
//! callback entries. [`Timer::process`] takes every due entry out of the
//! schedule, reschedules it on its own phase (`due + k * interval`) and
//! only then hands the callbacks to the caller, with the lock released.
//! A callback may therefore change its own interval or remove itself while
//! it runs; the change applies to the next computation of due times.
//!
//! # Design Principles
//!
//! - **No drift**: a callback is rescheduled relative to its due time, not
//!   to the time `process` happened to run.
//! - **Exactly once per pass**: one `process` call fires a due callback once
//!   even if it is several intervals late; missed ticks are skipped.
//! - **Dispatcher agnostic**: `process` does not run callbacks itself, the
//!   caller routes them (inline or through a worker pool).

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use keel_core::{UaError, UaResult};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::Clock;

/// Identifier of a repeated callback.
pub type CallbackId = u64;

/// A repeated callback. Application data is captured by the closure.
pub type RepeatedCallback<C> = Arc<dyn Fn(&C) + Send + Sync>;

struct Entry<C> {
    callback: RepeatedCallback<C>,
    interval: Duration,
    /// Last due time, or the registration time before the first firing.
    anchor: Instant,
    next_due: Instant,
}

struct Schedule<C> {
    entries: HashMap<CallbackId, Entry<C>>,
    order: BTreeSet<(Instant, CallbackId)>,
}

/// Schedule of repeated callbacks over a context `C`.
pub struct Timer<C> {
    clock: Arc<dyn Clock>,
    schedule: Mutex<Schedule<C>>,
    next_id: AtomicU64,
}

impl<C: 'static> Timer<C> {
    /// Creates an empty timer reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            schedule: Mutex::new(Schedule {
                entries: HashMap::new(),
                order: BTreeSet::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `callback` to fire every `interval`, first at now + interval.
    pub fn add_repeated_callback(
        &self,
        interval: Duration,
        callback: RepeatedCallback<C>,
    ) -> UaResult<CallbackId> {
        check_interval(interval)?;
        let now = self.clock.now();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let next_due = now + interval;

        let mut schedule = self.schedule.lock();
        schedule
            .entries
            .try_reserve(1)
            .map_err(|_| UaError::out_of_memory("timer schedule"))?;
        schedule.entries.insert(
            id,
            Entry {
                callback,
                interval,
                anchor: now,
                next_due,
            },
        );
        schedule.order.insert((next_due, id));
        debug!(
            callback_id = id,
            interval_ms = interval.as_millis() as u64,
            "Added repeated callback"
        );
        Ok(id)
    }

    /// Changes the interval of a callback.
    ///
    /// The next due time becomes the last due time plus the new interval.
    pub fn change_interval(&self, id: CallbackId, interval: Duration) -> UaResult<()> {
        check_interval(interval)?;
        let mut schedule = self.schedule.lock();
        let Schedule { entries, order } = &mut *schedule;
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| UaError::not_found("repeated callback", id.to_string()))?;

        order.remove(&(entry.next_due, id));
        entry.interval = interval;
        entry.next_due = entry.anchor + interval;
        order.insert((entry.next_due, id));
        debug!(
            callback_id = id,
            interval_ms = interval.as_millis() as u64,
            "Changed callback interval"
        );
        Ok(())
    }

    /// Removes a callback. Safe to call from within the callback itself.
    pub fn remove_callback(&self, id: CallbackId) -> UaResult<()> {
        let mut schedule = self.schedule.lock();
        let entry = schedule
            .entries
            .remove(&id)
            .ok_or_else(|| UaError::not_found("repeated callback", id.to_string()))?;
        schedule.order.remove(&(entry.next_due, id));
        debug!(callback_id = id, "Removed repeated callback");
        Ok(())
    }

    /// Fires every callback due at `now` through `dispatch`.
    ///
    /// Callbacks are handed out in due-time order after the schedule has been
    /// updated and unlocked. Returns the earliest due time once dispatch is
    /// done, so changes made by inline callbacks are reflected.
    pub fn process(
        &self,
        now: Instant,
        mut dispatch: impl FnMut(CallbackId, RepeatedCallback<C>),
    ) -> Option<Instant> {
        let due = {
            let mut schedule = self.schedule.lock();
            let Schedule { entries, order } = &mut *schedule;

            let mut due = Vec::new();
            while let Some(&(at, id)) = order.first() {
                if at > now {
                    break;
                }
                order.pop_first();
                let Some(entry) = entries.get_mut(&id) else {
                    continue;
                };

                // Skip missed ticks while keeping the phase.
                let late = now.duration_since(at);
                let skipped = late.as_nanos() / entry.interval.as_nanos();
                let steps = u32::try_from(skipped + 1).unwrap_or(u32::MAX);
                entry.anchor = at + entry.interval * (steps - 1);
                entry.next_due = entry.anchor + entry.interval;
                order.insert((entry.next_due, id));
                due.push((id, Arc::clone(&entry.callback)));
            }
            due
        };

        for (id, callback) in due {
            trace!(callback_id = id, "Dispatching repeated callback");
            dispatch(id, callback);
        }
        self.next_due()
    }

    /// Earliest due time of all registered callbacks.
    pub fn next_due(&self) -> Option<Instant> {
        self.schedule.lock().order.first().map(|&(at, _)| at)
    }

    /// Current interval of a callback.
    pub fn interval(&self, id: CallbackId) -> Option<Duration> {
        self.schedule.lock().entries.get(&id).map(|e| e.interval)
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.schedule.lock().entries.len()
    }

    /// Returns `true` if no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every callback.
    pub fn clear(&self) {
        let mut schedule = self.schedule.lock();
        schedule.entries.clear();
        schedule.order.clear();
    }
}

impl<C> fmt::Debug for Timer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schedule = self.schedule.lock();
        f.debug_struct("Timer")
            .field("callbacks", &schedule.entries.len())
            .field("next_due", &schedule.order.first().map(|&(at, _)| at))
            .finish()
    }
}

fn check_interval(interval: Duration) -> UaResult<()> {
    if interval.is_zero() {
        return Err(UaError::invalid_argument("interval", "must be positive"));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
