// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Runtime statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lifecycle counters shared by every manager of one server.
#[derive(Debug, Default)]
pub struct ServerStatistics {
    channels_opened: AtomicU64,
    channels_closed: AtomicU64,
    channels_expired: AtomicU64,
    channels_purged: AtomicU64,
    tokens_renewed: AtomicU64,

    sessions_created: AtomicU64,
    sessions_activated: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_expired: AtomicU64,

    subscriptions_created: AtomicU64,
    subscriptions_deleted: AtomicU64,
    subscriptions_expired: AtomicU64,
    monitored_items_created: AtomicU64,
    monitored_items_deleted: AtomicU64,

    notifications_queued: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_discarded: AtomicU64,
    keep_alives_sent: AtomicU64,

    callbacks_fired: AtomicU64,
    listener_failures: AtomicU64,
    registrations_expired: AtomicU64,
}

macro_rules! counter {
    ($($(#[$doc:meta])* $name:ident => $field:ident;)*) => {
        $(
            $(#[$doc])*
            #[inline]
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl ServerStatistics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        /// A secure channel was opened.
        record_channel_opened => channels_opened;
        /// A secure channel was closed on request.
        record_channel_closed => channels_closed;
        /// A secure channel expired.
        record_channel_expired => channels_expired;
        /// A secure channel was purged to make room.
        record_channel_purged => channels_purged;
        /// A security token was renewed.
        record_token_renewed => tokens_renewed;
        /// A session was created.
        record_session_created => sessions_created;
        /// A session was activated.
        record_session_activated => sessions_activated;
        /// A session was closed on request.
        record_session_closed => sessions_closed;
        /// A session timed out.
        record_session_expired => sessions_expired;
        /// A subscription was created.
        record_subscription_created => subscriptions_created;
        /// A subscription was deleted on request or with its session.
        record_subscription_deleted => subscriptions_deleted;
        /// A subscription ran out of lifetime.
        record_subscription_expired => subscriptions_expired;
        /// A monitored item was created.
        record_monitored_item_created => monitored_items_created;
        /// A monitored item was deleted.
        record_monitored_item_deleted => monitored_items_deleted;
        /// A notification entered a queue.
        record_notification_queued => notifications_queued;
        /// A keep-alive was produced.
        record_keep_alive => keep_alives_sent;
        /// A repeated callback was dispatched.
        record_callback_fired => callbacks_fired;
        /// A transport listener failed to start.
        record_listener_failure => listener_failures;
        /// A discovery registration expired.
        record_registration_expired => registrations_expired;
    }

    /// `count` notifications were handed to a client.
    pub fn record_notifications_delivered(&self, count: u64) {
        self.notifications_delivered.fetch_add(count, Ordering::Relaxed);
    }

    /// A notification was dropped by a queue overflow.
    pub fn record_notification_discarded(&self) {
        self.notifications_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatisticsSnapshot {
            channels_opened: load(&self.channels_opened),
            channels_closed: load(&self.channels_closed),
            channels_expired: load(&self.channels_expired),
            channels_purged: load(&self.channels_purged),
            tokens_renewed: load(&self.tokens_renewed),
            sessions_created: load(&self.sessions_created),
            sessions_activated: load(&self.sessions_activated),
            sessions_closed: load(&self.sessions_closed),
            sessions_expired: load(&self.sessions_expired),
            subscriptions_created: load(&self.subscriptions_created),
            subscriptions_deleted: load(&self.subscriptions_deleted),
            subscriptions_expired: load(&self.subscriptions_expired),
            monitored_items_created: load(&self.monitored_items_created),
            monitored_items_deleted: load(&self.monitored_items_deleted),
            notifications_queued: load(&self.notifications_queued),
            notifications_delivered: load(&self.notifications_delivered),
            notifications_discarded: load(&self.notifications_discarded),
            keep_alives_sent: load(&self.keep_alives_sent),
            callbacks_fired: load(&self.callbacks_fired),
            listener_failures: load(&self.listener_failures),
            registrations_expired: load(&self.registrations_expired),
        }
    }
}

/// Point-in-time copy of [`ServerStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct StatisticsSnapshot {
    pub channels_opened: u64,
    pub channels_closed: u64,
    pub channels_expired: u64,
    pub channels_purged: u64,
    pub tokens_renewed: u64,
    pub sessions_created: u64,
    pub sessions_activated: u64,
    pub sessions_closed: u64,
    pub sessions_expired: u64,
    pub subscriptions_created: u64,
    pub subscriptions_deleted: u64,
    pub subscriptions_expired: u64,
    pub monitored_items_created: u64,
    pub monitored_items_deleted: u64,
    pub notifications_queued: u64,
    pub notifications_delivered: u64,
    pub notifications_discarded: u64,
    pub keep_alives_sent: u64,
    pub callbacks_fired: u64,
    pub listener_failures: u64,
    pub registrations_expired: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let stats = ServerStatistics::new();
        stats.record_channel_opened();
        stats.record_channel_opened();
        stats.record_notifications_delivered(5);
        stats.record_notification_discarded();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.channels_opened, 2);
        assert_eq!(snapshot.notifications_delivered, 5);
        assert_eq!(snapshot.notifications_discarded, 1);
        assert_eq!(snapshot.sessions_created, 0);

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["channels_opened"], 2);
    }
}
