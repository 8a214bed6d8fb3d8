// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription engine.
//!
//! Subscriptions belong to sessions and own monitored items. Each item is
//! sampled either on its own repeated callback or at the start of its
//! subscription's publishing cycle, depending on [`SamplingMode`]. Accepted
//! samples enter the subscription's FIFO queue, bounded per item by the
//! item's queue size. A publish request drains the queue.
//!
//! # Publishing Cycle
//!
//! ```text
//! every publishing interval:
//!   sample items (publishing mode)
//!   lifetime_counter -= 1 ──► 0: expire (status BadTimeout, delete callbacks)
//!   nothing to report ──► keep_alive_counter += 1 ──► max: keep-alive due
//!
//! publish:
//!   lifetime_counter = lifetime_count
//!   drain up to max_notifications_per_publish, or send the due keep-alive
//! ```
//!
//! Server-local monitored items live outside any subscription. They are
//! always timer-sampled and report straight to their callback, with the
//! admin session and subscription id 0.
//!
//! Lock order is registry, then subscription. Application callbacks run
//! with no engine lock held.

mod filter;
mod monitored_item;

pub use filter::{DataChangeFilter, DataChangeTrigger, Deadband, StandardFilter};
pub use monitored_item::{
    read_attribute, DataChangeCallback, EventCallback, ItemCallback, ItemContext,
    ItemDeleteCallback, ItemHooks, ItemKind, ItemNotice, ModifyItemRequest, MonitoredItem,
    MonitoredItemId, MonitoredItemInfo, MonitoredItemRequest, MonitoringMode,
    DEFAULT_SAMPLING_INTERVAL_MS,
};

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_config::{LimitsConfig, SamplingMode};
use keel_core::{DataValue, Nodestore, StatusCode, UaError, UaResult, Variant};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use self::monitored_item::millis_to_duration;
use crate::clock::Clock;
use crate::server::Server;
use crate::session::SessionId;
use crate::stats::ServerStatistics;
use crate::timer::{CallbackId, Timer};

/// Identifier of a subscription.
pub type SubscriptionId = u32;

/// Subscription id reported for server-local monitored items.
pub const LOCAL_SUBSCRIPTION_ID: SubscriptionId = 0;

// =============================================================================
// Requests and callbacks
// =============================================================================

/// Requested subscription parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubscriptionRequest {
    /// Publishing interval.
    pub publishing_interval: Duration,
    /// Publishing cycles without a publish request before expiry.
    pub lifetime_count: u32,
    /// Empty publishing cycles before a keep-alive.
    pub max_keep_alive_count: u32,
    /// Notifications per publish; 0 asks for the server maximum.
    pub max_notifications_per_publish: u32,
    /// Whether notifications are sent.
    pub publishing_enabled: bool,
    /// Relative priority among the session's subscriptions.
    pub priority: u8,
}

impl Default for SubscriptionRequest {
    fn default() -> Self {
        Self {
            publishing_interval: Duration::from_millis(500),
            lifetime_count: 10_000,
            max_keep_alive_count: 10,
            max_notifications_per_publish: 0,
            publishing_enabled: true,
            priority: 0,
        }
    }
}

/// Parameters after revision against the server limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevisedSubscription {
    /// Publishing interval.
    pub publishing_interval: Duration,
    /// Lifetime count, at least three keep-alive counts.
    pub lifetime_count: u32,
    /// Keep-alive count.
    pub max_keep_alive_count: u32,
    /// Notifications per publish; 0 is unlimited.
    pub max_notifications_per_publish: u32,
    /// Whether notifications are sent.
    pub publishing_enabled: bool,
    /// Priority.
    pub priority: u8,
}

/// Identifies the subscription a callback is about.
#[derive(Clone, Copy)]
pub struct SubscriptionNotice<'a> {
    /// Owning session.
    pub session_id: &'a SessionId,
    /// Subscription id.
    pub subscription_id: SubscriptionId,
    /// Subscription context.
    pub context: Option<&'a ItemContext>,
}

/// Invoked exactly once when a subscription is removed.
pub type SubscriptionCallback = Arc<dyn Fn(&SubscriptionNotice<'_>) + Send + Sync>;

/// Invoked when a subscription changes status outside a publish.
pub type StatusChangeCallback = Arc<dyn Fn(&SubscriptionNotice<'_>, StatusCode) + Send + Sync>;

/// Application hooks of a subscription.
#[derive(Clone, Default)]
pub struct SubscriptionHooks {
    /// Context handed back in callbacks.
    pub context: Option<ItemContext>,
    /// Deletion callback.
    pub on_delete: Option<SubscriptionCallback>,
    /// Status-change callback.
    pub on_status_change: Option<StatusChangeCallback>,
}

impl fmt::Debug for SubscriptionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHooks")
            .field("context", &self.context.is_some())
            .field("on_delete", &self.on_delete.is_some())
            .field("on_status_change", &self.on_status_change.is_some())
            .finish()
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Content of a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NotificationPayload {
    /// A sampled value.
    DataChange(DataValue),
    /// Event fields.
    Event(Vec<Variant>),
}

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Item that produced it.
    pub monitored_item_id: MonitoredItemId,
    /// Client handle of the item.
    pub client_handle: u32,
    /// Content.
    pub payload: NotificationPayload,
    /// Set when the item's queue overflowed while queueing this entry.
    pub overflow: bool,
}

/// Response to a publish request. An empty message is a keep-alive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationMessage {
    /// Sequence number; a keep-alive carries the next one without using it.
    pub sequence_number: u32,
    /// Publish time.
    pub publish_time: DateTime<Utc>,
    /// Notifications in queue order.
    pub notifications: Vec<Notification>,
    /// More notifications remain queued.
    pub more_notifications: bool,
}

impl NotificationMessage {
    /// Returns `true` for a keep-alive.
    pub fn is_keep_alive(&self) -> bool {
        self.notifications.is_empty()
    }
}

/// Point-in-time view of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    /// Subscription id.
    pub id: SubscriptionId,
    /// Owning session.
    pub session_id: SessionId,
    /// Revised parameters.
    pub parameters: RevisedSubscription,
    /// Number of monitored items.
    pub monitored_items: usize,
    /// Queued notifications.
    pub queued: usize,
    /// Remaining publishing cycles before expiry.
    pub lifetime_counter: u32,
    /// Consecutive empty cycles.
    pub keep_alive_counter: u32,
    /// Last used sequence number.
    pub sequence_number: u32,
}

// =============================================================================
// Subscription
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemovalReason {
    Deleted,
    Expired,
}

struct Subscription {
    id: SubscriptionId,
    session_id: SessionId,
    params: RevisedSubscription,
    hooks: SubscriptionHooks,
    items: BTreeMap<MonitoredItemId, MonitoredItem>,
    queue: VecDeque<Notification>,
    lifetime_counter: u32,
    keep_alive_counter: u32,
    keep_alive_due: bool,
    sequence_number: u32,
    next_item_id: MonitoredItemId,
    timer_id: Option<CallbackId>,
    deleted: bool,
}

impl Subscription {
    fn enqueue(
        &mut self,
        item_id: MonitoredItemId,
        payload: NotificationPayload,
        stats: &ServerStatistics,
    ) -> bool {
        let Some(item) = self.items.get_mut(&item_id) else {
            return false;
        };

        let mut overflow = false;
        if item.queued >= item.queue_size as usize {
            item.discarded += 1;
            stats.record_notification_discarded();
            if !item.discard_oldest {
                trace!(
                    subscription_id = self.id,
                    monitored_item_id = item_id,
                    "Queue full, dropped newest"
                );
                return false;
            }
            if let Some(pos) = self.queue.iter().position(|n| n.monitored_item_id == item_id) {
                self.queue.remove(pos);
                item.queued -= 1;
            }
            overflow = true;
        }

        self.queue.push_back(Notification {
            monitored_item_id: item_id,
            client_handle: item.client_handle,
            payload,
            overflow,
        });
        item.queued += 1;
        stats.record_notification_queued();
        true
    }

    fn is_reporting(&self, notification: &Notification) -> bool {
        self.items
            .get(&notification.monitored_item_id)
            .is_some_and(|item| item.mode == MonitoringMode::Reporting)
    }

    fn has_reportable(&self) -> bool {
        self.queue.iter().any(|n| self.is_reporting(n))
    }

    /// Removes the oldest reportable notifications, up to `max`.
    fn drain_reportable(&mut self, max: usize) -> (Vec<Notification>, bool) {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        let mut more = false;
        for notification in std::mem::take(&mut self.queue) {
            if self.is_reporting(&notification) {
                if taken.len() < max {
                    if let Some(item) = self.items.get_mut(&notification.monitored_item_id) {
                        item.queued = item.queued.saturating_sub(1);
                    }
                    taken.push(notification);
                    continue;
                }
                more = true;
            }
            kept.push_back(notification);
        }
        self.queue = kept;
        (taken, more)
    }

    /// Drops queued entries of one item, oldest first, until `keep` remain.
    fn trim_item(&mut self, item_id: MonitoredItemId, keep: usize) -> usize {
        let Some(item) = self.items.get_mut(&item_id) else {
            return 0;
        };
        let mut dropped = 0;
        while item.queued > keep {
            match self.queue.iter().position(|n| n.monitored_item_id == item_id) {
                Some(pos) => {
                    self.queue.remove(pos);
                    item.queued -= 1;
                    dropped += 1;
                }
                None => {
                    item.queued = 0;
                    break;
                }
            }
        }
        dropped
    }

    fn next_sequence_number(&self) -> u32 {
        match self.sequence_number.wrapping_add(1) {
            0 => 1,
            n => n,
        }
    }

    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            session_id: self.session_id,
            parameters: self.params,
            monitored_items: self.items.len(),
            queued: self.queue.len(),
            lifetime_counter: self.lifetime_counter,
            keep_alive_counter: self.keep_alive_counter,
            sequence_number: self.sequence_number,
        }
    }
}

struct SubscriptionCell {
    session_id: SessionId,
    state: Mutex<Subscription>,
}

#[derive(Default)]
struct Registry {
    subscriptions: HashMap<SubscriptionId, Arc<SubscriptionCell>>,
    by_session: HashMap<SessionId, BTreeSet<SubscriptionId>>,
}

// =============================================================================
// SubscriptionEngine
// =============================================================================

/// Owns every subscription and server-local monitored item.
pub struct SubscriptionEngine {
    limits: LimitsConfig,
    sampling_mode: SamplingMode,
    registry: RwLock<Registry>,
    local_items: Mutex<BTreeMap<MonitoredItemId, MonitoredItem>>,
    next_subscription_id: AtomicU32,
    next_local_item_id: AtomicU32,
    timer: Arc<Timer<Server>>,
    nodestore: Arc<dyn Nodestore>,
    clock: Arc<dyn Clock>,
    stats: Arc<ServerStatistics>,
}

impl SubscriptionEngine {
    /// Creates an engine that schedules its sampling and publishing cycles
    /// on `timer`.
    pub fn new(
        limits: LimitsConfig,
        sampling_mode: SamplingMode,
        timer: Arc<Timer<Server>>,
        nodestore: Arc<dyn Nodestore>,
        clock: Arc<dyn Clock>,
        stats: Arc<ServerStatistics>,
    ) -> Self {
        Self {
            limits,
            sampling_mode,
            registry: RwLock::new(Registry::default()),
            local_items: Mutex::new(BTreeMap::new()),
            next_subscription_id: AtomicU32::new(1),
            next_local_item_id: AtomicU32::new(1),
            timer,
            nodestore,
            clock,
            stats,
        }
    }

    /// Sampling mode of subscription items.
    pub fn sampling_mode(&self) -> SamplingMode {
        self.sampling_mode
    }

    // =========================================================================
    // Revision
    // =========================================================================

    /// Revises requested parameters against the configured ranges.
    pub fn revise(&self, request: &SubscriptionRequest) -> RevisedSubscription {
        let limits = &self.limits;
        let max_keep_alive_count = limits.keep_alive_count.clamp(request.max_keep_alive_count);
        let lifetime_count = limits
            .lifetime_count
            .clamp(request.lifetime_count)
            .max(max_keep_alive_count.saturating_mul(3));
        let server_max = limits.max_notifications_per_publish;
        let max_notifications_per_publish = if request.max_notifications_per_publish == 0
            || (server_max != 0 && request.max_notifications_per_publish > server_max)
        {
            server_max
        } else {
            request.max_notifications_per_publish
        };
        RevisedSubscription {
            publishing_interval: limits.publishing_interval.clamp(request.publishing_interval),
            lifetime_count,
            max_keep_alive_count,
            max_notifications_per_publish,
            publishing_enabled: request.publishing_enabled,
            priority: request.priority,
        }
    }

    fn revise_sampling_interval(
        &self,
        requested: f64,
        publishing_interval: Option<Duration>,
    ) -> Duration {
        let range = &self.limits.sampling_interval;
        if requested < 0.0 {
            if let Some(interval) = publishing_interval {
                return range.clamp(interval);
            }
        }
        millis_to_duration(requested, range.min, range.max)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Creates a subscription owned by `session_id`.
    pub fn create_subscription(
        &self,
        session_id: SessionId,
        request: &SubscriptionRequest,
        hooks: SubscriptionHooks,
    ) -> UaResult<(SubscriptionId, RevisedSubscription)> {
        let params = self.revise(request);
        let id = {
            let mut registry = self.registry.write();
            let owned = registry.by_session.get(&session_id).map_or(0, BTreeSet::len);
            let limit = self.limits.max_subscriptions_per_session;
            if owned >= limit {
                return Err(UaError::TooManySubscriptions { limit });
            }
            registry
                .subscriptions
                .try_reserve(1)
                .map_err(|_| UaError::out_of_memory("subscription table"))?;

            let id = self.allocate_subscription_id(&registry);
            let subscription = Subscription {
                id,
                session_id,
                params,
                hooks,
                items: BTreeMap::new(),
                queue: VecDeque::new(),
                lifetime_counter: params.lifetime_count,
                keep_alive_counter: 0,
                keep_alive_due: false,
                sequence_number: 0,
                next_item_id: 1,
                timer_id: None,
                deleted: false,
            };
            registry.subscriptions.insert(
                id,
                Arc::new(SubscriptionCell {
                    session_id,
                    state: Mutex::new(subscription),
                }),
            );
            registry.by_session.entry(session_id).or_default().insert(id);
            id
        };

        let timer_id = self.timer.add_repeated_callback(
            params.publishing_interval,
            Arc::new(move |server: &Server| server.subscriptions().publishing_cycle(id)),
        );
        let timer_id = match timer_id {
            Ok(timer_id) => timer_id,
            Err(e) => {
                self.remove(id, RemovalReason::Deleted);
                return Err(e);
            }
        };
        if let Some(cell) = self.cell(id) {
            cell.state.lock().timer_id = Some(timer_id);
        }

        self.stats.record_subscription_created();
        info!(
            subscription_id = id,
            session_id = %session_id,
            interval_ms = params.publishing_interval.as_millis() as u64,
            lifetime_count = params.lifetime_count,
            "Subscription created"
        );
        Ok((id, params))
    }

    fn allocate_subscription_id(&self, registry: &Registry) -> SubscriptionId {
        loop {
            let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
            if id != LOCAL_SUBSCRIPTION_ID && !registry.subscriptions.contains_key(&id) {
                return id;
            }
        }
    }

    fn cell(&self, id: SubscriptionId) -> Option<Arc<SubscriptionCell>> {
        self.registry.read().subscriptions.get(&id).cloned()
    }

    fn owned_cell(
        &self,
        session_id: &SessionId,
        id: SubscriptionId,
    ) -> UaResult<Arc<SubscriptionCell>> {
        self.cell(id)
            .filter(|cell| cell.session_id == *session_id)
            .ok_or(UaError::SubscriptionIdInvalid { subscription_id: id })
    }

    /// Changes the parameters of a subscription.
    pub fn modify_subscription(
        &self,
        session_id: &SessionId,
        id: SubscriptionId,
        request: &SubscriptionRequest,
    ) -> UaResult<RevisedSubscription> {
        let cell = self.owned_cell(session_id, id)?;
        let mut sub = cell.state.lock();
        let params = RevisedSubscription {
            publishing_enabled: sub.params.publishing_enabled,
            ..self.revise(request)
        };
        if params.publishing_interval != sub.params.publishing_interval {
            if let Some(timer_id) = sub.timer_id {
                self.timer.change_interval(timer_id, params.publishing_interval)?;
            }
        }
        sub.params = params;
        sub.lifetime_counter = params.lifetime_count;
        debug!(subscription_id = id, "Subscription modified");
        Ok(params)
    }

    /// Enables or disables publishing.
    pub fn set_publishing_mode(
        &self,
        session_id: &SessionId,
        id: SubscriptionId,
        enabled: bool,
    ) -> UaResult<()> {
        let cell = self.owned_cell(session_id, id)?;
        let mut sub = cell.state.lock();
        sub.params.publishing_enabled = enabled;
        debug!(subscription_id = id, enabled, "Publishing mode set");
        Ok(())
    }

    /// Deletes a subscription and its monitored items.
    pub fn delete_subscription(&self, session_id: &SessionId, id: SubscriptionId) -> UaResult<()> {
        self.owned_cell(session_id, id)?;
        if self.remove(id, RemovalReason::Deleted) {
            Ok(())
        } else {
            Err(UaError::SubscriptionIdInvalid { subscription_id: id })
        }
    }

    /// Deletes every subscription of a session. Returns how many were removed.
    pub fn delete_session_subscriptions(&self, session_id: &SessionId) -> usize {
        let ids: Vec<SubscriptionId> = self
            .registry
            .read()
            .by_session
            .get(session_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.into_iter()
            .filter(|&id| self.remove(id, RemovalReason::Deleted))
            .count()
    }

    /// Deletes every subscription and server-local item.
    pub fn delete_all(&self) {
        let ids: Vec<SubscriptionId> = self.registry.read().subscriptions.keys().copied().collect();
        for id in ids {
            self.remove(id, RemovalReason::Deleted);
        }
        let local_ids: Vec<MonitoredItemId> = self.local_items.lock().keys().copied().collect();
        for id in local_ids {
            // Concurrent removal is fine here.
            let _ = self.delete_local_monitored_item(id);
        }
    }

    /// Unregisters a subscription and runs its teardown.
    fn remove(&self, id: SubscriptionId, reason: RemovalReason) -> bool {
        let cell = {
            let mut registry = self.registry.write();
            let Some(cell) = registry.subscriptions.remove(&id) else {
                return false;
            };
            if let Some(ids) = registry.by_session.get_mut(&cell.session_id) {
                ids.remove(&id);
                if ids.is_empty() {
                    registry.by_session.remove(&cell.session_id);
                }
            }
            cell
        };

        let (items, hooks, session_id) = {
            let mut sub = cell.state.lock();
            sub.deleted = true;
            sub.queue.clear();
            if let Some(timer_id) = sub.timer_id.take() {
                let _ = self.timer.remove_callback(timer_id);
            }
            (std::mem::take(&mut sub.items), sub.hooks.clone(), sub.session_id)
        };

        let notice = SubscriptionNotice {
            session_id: &session_id,
            subscription_id: id,
            context: hooks.context.as_ref(),
        };
        if reason == RemovalReason::Expired {
            if let Some(on_status_change) = &hooks.on_status_change {
                on_status_change(&notice, StatusCode::BadTimeout);
            }
        }
        for item in items.values() {
            if let Some(timer_id) = item.timer_id {
                let _ = self.timer.remove_callback(timer_id);
            }
            item.notify_deleted(&session_id, id, hooks.context.as_ref());
            self.stats.record_monitored_item_deleted();
        }
        if let Some(on_delete) = &hooks.on_delete {
            on_delete(&notice);
        }

        match reason {
            RemovalReason::Deleted => {
                self.stats.record_subscription_deleted();
                info!(
                    subscription_id = id,
                    session_id = %session_id,
                    items = items.len(),
                    "Subscription deleted"
                );
            }
            RemovalReason::Expired => {
                self.stats.record_subscription_expired();
                warn!(
                    subscription_id = id,
                    session_id = %session_id,
                    "Subscription lifetime expired"
                );
            }
        }
        true
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Runs one publishing cycle. Called by the subscription's timer.
    pub fn publishing_cycle(&self, id: SubscriptionId) {
        let Some(cell) = self.cell(id) else {
            return;
        };
        let expired = {
            let mut sub = cell.state.lock();
            if sub.deleted {
                return;
            }
            if self.sampling_mode == SamplingMode::Publishing {
                let item_ids: Vec<MonitoredItemId> = sub.items.keys().copied().collect();
                for item_id in item_ids {
                    self.sample_locked(&mut sub, item_id);
                }
            }

            sub.lifetime_counter = sub.lifetime_counter.saturating_sub(1);
            if sub.lifetime_counter == 0 {
                true
            } else {
                if sub.params.publishing_enabled && sub.has_reportable() {
                    sub.keep_alive_counter = 0;
                } else {
                    sub.keep_alive_counter += 1;
                    if sub.keep_alive_counter >= sub.params.max_keep_alive_count {
                        sub.keep_alive_counter = 0;
                        sub.keep_alive_due = true;
                        self.stats.record_keep_alive();
                        trace!(subscription_id = id, "Keep-alive due");
                    }
                }
                false
            }
        };
        if expired {
            self.remove(id, RemovalReason::Expired);
        }
    }

    /// Answers a publish request for one subscription.
    ///
    /// Returns `None` when there is neither a notification nor a due
    /// keep-alive to send.
    pub fn publish(
        &self,
        session_id: &SessionId,
        id: SubscriptionId,
    ) -> UaResult<Option<NotificationMessage>> {
        let cell = self.owned_cell(session_id, id)?;
        let mut sub = cell.state.lock();
        sub.lifetime_counter = sub.params.lifetime_count;
        let publish_time = self.clock.utc_now();

        if sub.params.publishing_enabled && sub.has_reportable() {
            let max = match sub.params.max_notifications_per_publish {
                0 => usize::MAX,
                n => n as usize,
            };
            let (notifications, more_notifications) = sub.drain_reportable(max);
            sub.sequence_number = sub.next_sequence_number();
            sub.keep_alive_counter = 0;
            sub.keep_alive_due = false;
            self.stats.record_notifications_delivered(notifications.len() as u64);
            debug!(
                subscription_id = id,
                count = notifications.len(),
                more_notifications,
                "Published notifications"
            );
            return Ok(Some(NotificationMessage {
                sequence_number: sub.sequence_number,
                publish_time,
                notifications,
                more_notifications,
            }));
        }

        if sub.keep_alive_due {
            sub.keep_alive_due = false;
            return Ok(Some(NotificationMessage {
                sequence_number: sub.next_sequence_number(),
                publish_time,
                notifications: Vec::new(),
                more_notifications: false,
            }));
        }
        Ok(None)
    }

    /// Answers a session-level publish request from the highest-priority
    /// subscription that has something to send.
    pub fn publish_any(
        &self,
        session_id: &SessionId,
    ) -> Option<(SubscriptionId, NotificationMessage)> {
        let mut candidates: Vec<(u8, SubscriptionId)> = {
            let registry = self.registry.read();
            registry
                .by_session
                .get(session_id)
                .into_iter()
                .flatten()
                .filter_map(|id| registry.subscriptions.get(id).map(|cell| (id, cell)))
                .map(|(&id, cell)| (cell.state.lock().params.priority, id))
                .collect()
        };
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        candidates
            .into_iter()
            .find_map(|(_, id)| self.publish(session_id, id).ok().flatten().map(|m| (id, m)))
    }

    // =========================================================================
    // Monitored items
    // =========================================================================

    /// Creates a monitored item in a subscription.
    pub fn create_monitored_item(
        &self,
        session_id: &SessionId,
        subscription_id: SubscriptionId,
        request: MonitoredItemRequest,
        hooks: ItemHooks,
    ) -> UaResult<MonitoredItemInfo> {
        let cell = self.owned_cell(session_id, subscription_id)?;
        let mut sub = cell.state.lock();
        let limit = self.limits.max_monitored_items_per_subscription;
        if sub.items.len() >= limit {
            return Err(UaError::TooManyMonitoredItems { limit });
        }

        let sampling_interval = self.revise_sampling_interval(
            request.sampling_interval,
            Some(sub.params.publishing_interval),
        );
        let queue_size = self.limits.queue_size.clamp(request.queue_size);
        let item_id = sub.next_item_id;
        sub.next_item_id = sub.next_item_id.wrapping_add(1).max(1);

        let mut item =
            MonitoredItem::new(item_id, request, sampling_interval, queue_size, hooks, None);
        if self.sampling_mode == SamplingMode::Timer && item.samples() {
            item.timer_id = Some(self.schedule_item(subscription_id, item_id, sampling_interval)?);
        }
        let sample_now = item.samples();
        sub.items.insert(item_id, item);
        if sample_now {
            self.sample_locked(&mut sub, item_id);
        }

        self.stats.record_monitored_item_created();
        debug!(
            subscription_id,
            monitored_item_id = item_id,
            sampling_ms = sampling_interval.as_millis() as u64,
            queue_size,
            "Monitored item created"
        );
        sub.items
            .get(&item_id)
            .map(MonitoredItem::info)
            .ok_or_else(|| UaError::internal("monitored item vanished during creation"))
    }

    fn schedule_item(
        &self,
        subscription_id: SubscriptionId,
        item_id: MonitoredItemId,
        interval: Duration,
    ) -> UaResult<CallbackId> {
        self.timer.add_repeated_callback(
            interval,
            Arc::new(move |server: &Server| {
                server.subscriptions().sample_item(subscription_id, item_id)
            }),
        )
    }

    /// Samples one item of a subscription. Called by the item's timer.
    pub fn sample_item(&self, subscription_id: SubscriptionId, item_id: MonitoredItemId) {
        let Some(cell) = self.cell(subscription_id) else {
            return;
        };
        let mut sub = cell.state.lock();
        if !sub.deleted {
            self.sample_locked(&mut sub, item_id);
        }
    }

    fn sample_locked(&self, sub: &mut Subscription, item_id: MonitoredItemId) {
        let Some(item) = sub.items.get_mut(&item_id) else {
            return;
        };
        if !item.samples() {
            return;
        }
        let value = read_attribute(self.nodestore.as_ref(), &item.node_id, item.attribute_id)
            .with_server_timestamp(self.clock.utc_now());
        if let Some(value) = item.accept(value) {
            trace!(subscription_id = sub.id, monitored_item_id = item_id, "Sampled change");
            sub.enqueue(item_id, NotificationPayload::DataChange(value), &self.stats);
        }
    }

    /// Changes the parameters of a monitored item.
    pub fn modify_monitored_item(
        &self,
        session_id: &SessionId,
        subscription_id: SubscriptionId,
        item_id: MonitoredItemId,
        request: ModifyItemRequest,
    ) -> UaResult<MonitoredItemInfo> {
        let cell = self.owned_cell(session_id, subscription_id)?;
        let mut sub = cell.state.lock();
        let publishing_interval = sub.params.publishing_interval;
        let item = sub
            .items
            .get_mut(&item_id)
            .ok_or(UaError::MonitoredItemIdInvalid { monitored_item_id: item_id })?;

        if let Some(requested) = request.sampling_interval {
            let interval = self.revise_sampling_interval(requested, Some(publishing_interval));
            if interval != item.sampling_interval {
                if let Some(timer_id) = item.timer_id {
                    self.timer.change_interval(timer_id, interval)?;
                }
                item.sampling_interval = interval;
            }
        }
        if let Some(discard_oldest) = request.discard_oldest {
            item.discard_oldest = discard_oldest;
        }
        if let Some(filter) = request.filter {
            item.filter = filter;
        }
        if let Some(requested) = request.queue_size {
            let queue_size = self.limits.queue_size.clamp(requested);
            item.queue_size = queue_size;
            let dropped = sub.trim_item(item_id, queue_size as usize);
            if let Some(item) = sub.items.get_mut(&item_id) {
                item.discarded += dropped as u64;
            }
        }
        debug!(subscription_id, monitored_item_id = item_id, "Monitored item modified");
        sub.items
            .get(&item_id)
            .map(MonitoredItem::info)
            .ok_or(UaError::MonitoredItemIdInvalid { monitored_item_id: item_id })
    }

    /// Changes the monitoring mode of an item.
    pub fn set_monitoring_mode(
        &self,
        session_id: &SessionId,
        subscription_id: SubscriptionId,
        item_id: MonitoredItemId,
        mode: MonitoringMode,
    ) -> UaResult<()> {
        let cell = self.owned_cell(session_id, subscription_id)?;
        let mut sub = cell.state.lock();
        let item = sub
            .items
            .get_mut(&item_id)
            .ok_or(UaError::MonitoredItemIdInvalid { monitored_item_id: item_id })?;
        let previous = item.mode;
        if previous == mode {
            return Ok(());
        }
        item.mode = mode;

        if mode == MonitoringMode::Disabled {
            if let Some(timer_id) = item.timer_id.take() {
                let _ = self.timer.remove_callback(timer_id);
            }
            item.last_value = None;
            sub.trim_item(item_id, 0);
        } else if previous == MonitoringMode::Disabled && item.samples() {
            if self.sampling_mode == SamplingMode::Timer {
                let interval = item.sampling_interval;
                let timer_id = self.schedule_item(subscription_id, item_id, interval)?;
                if let Some(item) = sub.items.get_mut(&item_id) {
                    item.timer_id = Some(timer_id);
                }
            }
            self.sample_locked(&mut sub, item_id);
        }
        debug!(subscription_id, monitored_item_id = item_id, ?mode, "Monitoring mode set");
        Ok(())
    }

    /// Deletes a monitored item.
    pub fn delete_monitored_item(
        &self,
        session_id: &SessionId,
        subscription_id: SubscriptionId,
        item_id: MonitoredItemId,
    ) -> UaResult<()> {
        let cell = self.owned_cell(session_id, subscription_id)?;
        let (item, context) = {
            let mut sub = cell.state.lock();
            sub.trim_item(item_id, 0);
            let item = sub
                .items
                .remove(&item_id)
                .ok_or(UaError::MonitoredItemIdInvalid { monitored_item_id: item_id })?;
            (item, sub.hooks.context.clone())
        };
        if let Some(timer_id) = item.timer_id {
            let _ = self.timer.remove_callback(timer_id);
        }
        item.notify_deleted(session_id, subscription_id, context.as_ref());
        self.stats.record_monitored_item_deleted();
        debug!(subscription_id, monitored_item_id = item_id, "Monitored item deleted");
        Ok(())
    }

    // =========================================================================
    // Server-local monitored items
    // =========================================================================

    /// Creates a monitored item that reports straight to `callback`.
    pub fn create_local_monitored_item(
        &self,
        request: MonitoredItemRequest,
        callback: ItemCallback,
        hooks: ItemHooks,
    ) -> UaResult<MonitoredItemId> {
        let sampling_interval = self.revise_sampling_interval(request.sampling_interval, None);
        let queue_size = self.limits.queue_size.clamp(request.queue_size);
        let id = self.next_local_item_id.fetch_add(1, Ordering::Relaxed);

        let mut item =
            MonitoredItem::new(id, request, sampling_interval, queue_size, hooks, Some(callback));
        if item.samples() {
            item.timer_id = Some(self.timer.add_repeated_callback(
                sampling_interval,
                Arc::new(move |server: &Server| server.subscriptions().sample_local_item(id)),
            )?);
        }
        let sample_now = item.samples();
        self.local_items.lock().insert(id, item);
        self.stats.record_monitored_item_created();
        debug!(monitored_item_id = id, "Local monitored item created");
        if sample_now {
            self.sample_local_item(id);
        }
        Ok(id)
    }

    /// Samples a server-local item and reports a change to its callback.
    pub fn sample_local_item(&self, id: MonitoredItemId) {
        let delivery = {
            let mut local = self.local_items.lock();
            let Some(item) = local.get_mut(&id) else {
                return;
            };
            if !item.samples() {
                return;
            }
            let value = read_attribute(self.nodestore.as_ref(), &item.node_id, item.attribute_id)
                .with_server_timestamp(self.clock.utc_now());
            let Some(value) = item.accept(value) else {
                return;
            };
            if item.mode != MonitoringMode::Reporting {
                return;
            }
            match &item.callback {
                Some(ItemCallback::DataChange(callback)) => {
                    (Arc::clone(callback), item.hooks.context.clone(), value)
                }
                _ => return,
            }
        };
        let (callback, context, value) = delivery;
        callback(&local_notice(id, context.as_ref()), &value);
        self.stats.record_notifications_delivered(1);
    }

    /// Changes the monitoring mode of a server-local item.
    pub fn set_local_monitoring_mode(
        &self,
        id: MonitoredItemId,
        mode: MonitoringMode,
    ) -> UaResult<()> {
        let resample = {
            let mut local = self.local_items.lock();
            let item = local
                .get_mut(&id)
                .ok_or(UaError::MonitoredItemIdInvalid { monitored_item_id: id })?;
            let previous = item.mode;
            item.mode = mode;
            if mode == MonitoringMode::Disabled {
                if let Some(timer_id) = item.timer_id.take() {
                    let _ = self.timer.remove_callback(timer_id);
                }
                item.last_value = None;
                false
            } else if previous == MonitoringMode::Disabled && item.samples() {
                item.timer_id = Some(self.timer.add_repeated_callback(
                    item.sampling_interval,
                    Arc::new(move |server: &Server| server.subscriptions().sample_local_item(id)),
                )?);
                true
            } else {
                false
            }
        };
        if resample {
            self.sample_local_item(id);
        }
        Ok(())
    }

    /// Deletes a server-local item.
    pub fn delete_local_monitored_item(&self, id: MonitoredItemId) -> UaResult<()> {
        let item = self
            .local_items
            .lock()
            .remove(&id)
            .ok_or(UaError::MonitoredItemIdInvalid { monitored_item_id: id })?;
        if let Some(timer_id) = item.timer_id {
            let _ = self.timer.remove_callback(timer_id);
        }
        item.notify_deleted(&SessionId::ADMIN, LOCAL_SUBSCRIPTION_ID, None);
        self.stats.record_monitored_item_deleted();
        debug!(monitored_item_id = id, "Local monitored item deleted");
        Ok(())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Delivers an event emitted by `source` to every event item watching it.
    /// Returns the number of items that received it.
    pub fn trigger_event(&self, source: &keel_core::NodeId, fields: &[Variant]) -> usize {
        let mut delivered = 0;
        {
            let registry = self.registry.read();
            for cell in registry.subscriptions.values() {
                let mut sub = cell.state.lock();
                let targets: Vec<MonitoredItemId> = sub
                    .items
                    .values()
                    .filter(|i| {
                        i.kind == ItemKind::Event
                            && i.mode != MonitoringMode::Disabled
                            && i.node_id == *source
                    })
                    .map(|i| i.id)
                    .collect();
                for item_id in targets {
                    let payload = NotificationPayload::Event(fields.to_vec());
                    if sub.enqueue(item_id, payload, &self.stats) {
                        delivered += 1;
                    }
                }
            }
        }

        let local: Vec<(MonitoredItemId, EventCallback, Option<ItemContext>)> = self
            .local_items
            .lock()
            .values()
            .filter(|i| i.mode == MonitoringMode::Reporting && i.node_id == *source)
            .filter_map(|i| match &i.callback {
                Some(ItemCallback::Event(callback)) => {
                    Some((i.id, Arc::clone(callback), i.hooks.context.clone()))
                }
                _ => None,
            })
            .collect();
        for (id, callback, context) in local {
            callback(&local_notice(id, context.as_ref()), fields);
            delivered += 1;
        }
        trace!(source = %source, delivered, "Event triggered");
        delivered
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Snapshot of a subscription.
    pub fn subscription_info(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.cell(id).map(|cell| cell.state.lock().info())
    }

    /// Snapshot of a monitored item.
    pub fn monitored_item_info(
        &self,
        subscription_id: SubscriptionId,
        item_id: MonitoredItemId,
    ) -> Option<MonitoredItemInfo> {
        let cell = self.cell(subscription_id)?;
        let sub = cell.state.lock();
        sub.items.get(&item_id).map(MonitoredItem::info)
    }

    /// Snapshot of a server-local item.
    pub fn local_item_info(&self, id: MonitoredItemId) -> Option<MonitoredItemInfo> {
        self.local_items.lock().get(&id).map(MonitoredItem::info)
    }

    /// Subscriptions owned by a session.
    pub fn subscriptions_of(&self, session_id: &SessionId) -> Vec<SubscriptionId> {
        self.registry
            .read()
            .by_session
            .get(session_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.registry.read().subscriptions.len()
    }

    /// Returns `true` if there is no subscription.
    pub fn is_empty(&self) -> bool {
        self.registry.read().subscriptions.is_empty()
    }

    /// Number of server-local items.
    pub fn local_item_count(&self) -> usize {
        self.local_items.lock().len()
    }
}

fn local_notice(id: MonitoredItemId, context: Option<&ItemContext>) -> ItemNotice<'_> {
    ItemNotice {
        session_id: &SessionId::ADMIN,
        subscription_id: LOCAL_SUBSCRIPTION_ID,
        subscription_context: None,
        monitored_item_id: id,
        monitored_item_context: context,
    }
}

impl fmt::Debug for SubscriptionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("subscriptions", &self.len())
            .field("local_items", &self.local_item_count())
            .field("sampling_mode", &self.sampling_mode)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use keel_core::{
        edit_node, MemoryNodestore, Node, NodeAttributes, NodeClass, NodeId, VariableAttributes,
    };
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        engine: SubscriptionEngine,
        store: Arc<MemoryNodestore>,
        timer: Arc<Timer<Server>>,
        node: NodeId,
        session: SessionId,
    }

    fn fixture(sampling_mode: SamplingMode) -> Fixture {
        let clock = ManualClock::new();
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let store = Arc::new(MemoryNodestore::new());
        let node = store
            .insert_node(
                Node::new(NodeClass::Variable)
                    .with_id(NodeId::numeric(1, 500))
                    .with_attributes(NodeAttributes::Variable(VariableAttributes {
                        value: DataValue::new(0.0),
                        ..VariableAttributes::default()
                    })),
            )
            .unwrap();
        let timer = Arc::new(Timer::new(Arc::clone(&clock)));
        let engine = SubscriptionEngine::new(
            LimitsConfig::default(),
            sampling_mode,
            Arc::clone(&timer),
            store.clone(),
            clock,
            Arc::new(ServerStatistics::new()),
        );
        Fixture {
            engine,
            store,
            timer,
            node,
            session: SessionId::new_random(),
        }
    }

    impl Fixture {
        fn subscribe(&self, request: &SubscriptionRequest) -> SubscriptionId {
            let hooks = SubscriptionHooks::default();
            let (id, _) = self.engine.create_subscription(self.session, request, hooks).unwrap();
            id
        }

        fn watch(&self, sid: SubscriptionId, request: MonitoredItemRequest) -> MonitoredItemInfo {
            self.engine
                .create_monitored_item(&self.session, sid, request, ItemHooks::default())
                .unwrap()
        }

        fn value_request(&self) -> MonitoredItemRequest {
            MonitoredItemRequest::data_change(self.node.clone())
        }
    }

    fn write(store: &MemoryNodestore, node: &NodeId, value: f64) {
        edit_node(store, node, |n| {
            if let Some(v) = n.variable_mut() {
                v.value = DataValue::new(value);
            }
            Ok(())
        })
        .unwrap();
    }

    fn counter() -> (Arc<AtomicUsize>, SubscriptionCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let callback: SubscriptionCallback = Arc::new(move |_: &SubscriptionNotice<'_>| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    fn values(message: &NotificationMessage) -> Vec<Variant> {
        message
            .notifications
            .iter()
            .map(|n| match &n.payload {
                NotificationPayload::DataChange(v) => v.value.clone(),
                NotificationPayload::Event(_) => Variant::Empty,
            })
            .collect()
    }

    #[test]
    fn test_revision() {
        let f = fixture(SamplingMode::Timer);
        let revised = f.engine.revise(&SubscriptionRequest {
            publishing_interval: Duration::from_millis(1),
            lifetime_count: 5,
            max_keep_alive_count: 10,
            max_notifications_per_publish: 0,
            ..SubscriptionRequest::default()
        });
        assert_eq!(revised.publishing_interval, Duration::from_millis(100));
        assert_eq!(revised.lifetime_count, 30);
        assert_eq!(revised.max_notifications_per_publish, 1000);
    }

    #[test]
    fn test_create_registers_publishing_timer() {
        let f = fixture(SamplingMode::Timer);
        let hooks = SubscriptionHooks::default();
        let (id, revised) = f
            .engine
            .create_subscription(f.session, &SubscriptionRequest::default(), hooks)
            .unwrap();
        assert_ne!(id, LOCAL_SUBSCRIPTION_ID);
        assert_eq!(revised.publishing_interval, Duration::from_millis(500));
        assert_eq!(f.timer.len(), 1);

        f.watch(id, f.value_request());
        assert_eq!(f.timer.len(), 2);

        f.engine.delete_subscription(&f.session, id).unwrap();
        assert!(f.timer.is_empty());
    }

    #[test]
    fn test_discard_oldest_keeps_most_recent() {
        let f = fixture(SamplingMode::Timer);
        let sid = f.subscribe(&SubscriptionRequest::default());
        let request = MonitoredItemRequest::data_change(f.node.clone()).with_queue(3, true);
        let item = f.watch(sid, request);
        // The initial sample (0.0) is the first notification.
        for v in 1..=6 {
            write(&f.store, &f.node, f64::from(v));
            f.engine.sample_item(sid, item.id);
        }

        let info = f.engine.monitored_item_info(sid, item.id).unwrap();
        assert_eq!(info.queued, 3);
        assert_eq!(info.discarded, 4);

        let message = f.engine.publish(&f.session, sid).unwrap().unwrap();
        assert_eq!(
            values(&message),
            vec![Variant::Double(4.0), Variant::Double(5.0), Variant::Double(6.0)]
        );
        assert!(message.notifications[0].overflow);
    }

    #[test]
    fn test_discard_newest_keeps_oldest() {
        let f = fixture(SamplingMode::Timer);
        let sid = f.subscribe(&SubscriptionRequest::default());
        let request = MonitoredItemRequest::data_change(f.node.clone()).with_queue(2, false);
        let item = f.watch(sid, request);
        for v in 1..=3 {
            write(&f.store, &f.node, f64::from(v));
            f.engine.sample_item(sid, item.id);
        }
        assert_eq!(f.engine.monitored_item_info(sid, item.id).unwrap().discarded, 2);
        let message = f.engine.publish(&f.session, sid).unwrap().unwrap();
        assert_eq!(values(&message), vec![Variant::Double(0.0), Variant::Double(1.0)]);
    }

    #[test]
    fn test_lifetime_expiry_fires_callbacks_once() {
        let f = fixture(SamplingMode::Timer);
        let (deleted, on_delete) = counter();
        let status = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&status);
        let hooks = SubscriptionHooks {
            context: None,
            on_delete: Some(on_delete),
            on_status_change: Some(Arc::new(move |_: &SubscriptionNotice<'_>, code: StatusCode| {
                s.lock().push(code)
            })),
        };
        let request = SubscriptionRequest {
            lifetime_count: 3,
            max_keep_alive_count: 1,
            ..SubscriptionRequest::default()
        };
        let (sid, revised) = f.engine.create_subscription(f.session, &request, hooks).unwrap();
        assert_eq!(revised.lifetime_count, 3);

        let item_deleted = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&item_deleted);
        let item_hooks = ItemHooks {
            context: None,
            on_delete: Some(Arc::new(move |_: &ItemNotice<'_>| {
                d.fetch_add(1, Ordering::SeqCst);
            })),
        };
        f.engine
            .create_monitored_item(&f.session, sid, f.value_request(), item_hooks)
            .unwrap();

        for _ in 0..5 {
            f.engine.publishing_cycle(sid);
        }
        assert!(f.engine.subscription_info(sid).is_none());
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert_eq!(item_deleted.load(Ordering::SeqCst), 1);
        assert_eq!(*status.lock(), vec![StatusCode::BadTimeout]);
        assert!(f.engine.publish(&f.session, sid).is_err());
        assert!(f.timer.is_empty());
    }

    #[test]
    fn test_publish_resets_lifetime() {
        let f = fixture(SamplingMode::Timer);
        let request = SubscriptionRequest {
            lifetime_count: 3,
            max_keep_alive_count: 1,
            ..SubscriptionRequest::default()
        };
        let sid = f.subscribe(&request);
        for _ in 0..10 {
            f.engine.publishing_cycle(sid);
            f.engine.publish(&f.session, sid).unwrap();
        }
        assert!(f.engine.subscription_info(sid).is_some());
    }

    #[test]
    fn test_keep_alive_after_empty_cycles() {
        let f = fixture(SamplingMode::Timer);
        let request = SubscriptionRequest {
            max_keep_alive_count: 3,
            ..SubscriptionRequest::default()
        };
        let sid = f.subscribe(&request);
        f.engine.publishing_cycle(sid);
        f.engine.publishing_cycle(sid);
        assert_eq!(f.engine.publish(&f.session, sid).unwrap(), None);
        f.engine.publishing_cycle(sid);
        let keep_alive = f.engine.publish(&f.session, sid).unwrap().unwrap();
        assert!(keep_alive.is_keep_alive());
        assert_eq!(keep_alive.sequence_number, 1);
        assert_eq!(f.engine.publish(&f.session, sid).unwrap(), None);
    }

    #[test]
    fn test_max_notifications_per_publish() {
        let f = fixture(SamplingMode::Timer);
        let request = SubscriptionRequest {
            max_notifications_per_publish: 2,
            ..SubscriptionRequest::default()
        };
        let sid = f.subscribe(&request);
        let item = f
            .engine
            .create_monitored_item(
                &f.session,
                sid,
                MonitoredItemRequest::data_change(f.node.clone()).with_queue(10, true),
                ItemHooks::default(),
            )
            .unwrap();
        for v in 1..=4 {
            write(&f.store, &f.node, f64::from(v));
            f.engine.sample_item(sid, item.id);
        }
        let first = f.engine.publish(&f.session, sid).unwrap().unwrap();
        assert_eq!(first.notifications.len(), 2);
        assert!(first.more_notifications);
        let second = f.engine.publish(&f.session, sid).unwrap().unwrap();
        assert_eq!(second.sequence_number, first.sequence_number + 1);
        let third = f.engine.publish(&f.session, sid).unwrap().unwrap();
        assert!(!third.more_notifications);
        assert_eq!(third.notifications.len(), 1);
    }

    #[test]
    fn test_disabled_publishing_only_keeps_alive() {
        let f = fixture(SamplingMode::Timer);
        let request = SubscriptionRequest {
            max_keep_alive_count: 1,
            ..SubscriptionRequest::default()
        };
        let sid = f.subscribe(&request);
        f.watch(sid, f.value_request());
        f.engine.set_publishing_mode(&f.session, sid, false).unwrap();
        f.engine.publishing_cycle(sid);
        let message = f.engine.publish(&f.session, sid).unwrap().unwrap();
        assert!(message.is_keep_alive());
        assert_eq!(f.engine.subscription_info(sid).unwrap().queued, 1);
    }

    #[test]
    fn test_sampling_mode_queues_without_reporting() {
        let f = fixture(SamplingMode::Timer);
        let sid = f.subscribe(&SubscriptionRequest::default());
        let item = f.watch(sid, f.value_request().with_mode(MonitoringMode::Sampling));
        assert_eq!(f.engine.publish(&f.session, sid).unwrap(), None);
        f.engine
            .set_monitoring_mode(&f.session, sid, item.id, MonitoringMode::Reporting)
            .unwrap();
        let message = f.engine.publish(&f.session, sid).unwrap().unwrap();
        assert_eq!(message.notifications.len(), 1);

        f.engine
            .set_monitoring_mode(&f.session, sid, item.id, MonitoringMode::Disabled)
            .unwrap();
        write(&f.store, &f.node, 7.0);
        f.engine.sample_item(sid, item.id);
        assert_eq!(f.engine.subscription_info(sid).unwrap().queued, 0);
    }

    #[test]
    fn test_publishing_sampling_mode() {
        let f = fixture(SamplingMode::Publishing);
        let sid = f.subscribe(&SubscriptionRequest::default());
        f.engine
            .create_monitored_item(
                &f.session,
                sid,
                MonitoredItemRequest::data_change(f.node.clone()).with_queue(5, true),
                ItemHooks::default(),
            )
            .unwrap();
        // Only the publishing callback is scheduled.
        assert_eq!(f.timer.len(), 1);
        write(&f.store, &f.node, 3.0);
        f.engine.publishing_cycle(sid);
        assert_eq!(f.engine.subscription_info(sid).unwrap().queued, 2);
    }

    #[test]
    fn test_ownership_is_checked() {
        let f = fixture(SamplingMode::Timer);
        let sid = f.subscribe(&SubscriptionRequest::default());
        let other = SessionId::new_random();
        let err = f.engine.publish(&other, sid).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadSubscriptionIdInvalid);
        assert!(f.engine.delete_subscription(&other, sid).is_err());
    }

    #[test]
    fn test_session_teardown_removes_subscriptions() {
        let f = fixture(SamplingMode::Timer);
        let (deleted, on_delete) = counter();
        for _ in 0..3 {
            let hooks = SubscriptionHooks {
                on_delete: Some(Arc::clone(&on_delete)),
                ..SubscriptionHooks::default()
            };
            f.engine
                .create_subscription(f.session, &SubscriptionRequest::default(), hooks)
                .unwrap();
        }
        assert_eq!(f.engine.delete_session_subscriptions(&f.session), 3);
        assert_eq!(deleted.load(Ordering::SeqCst), 3);
        assert!(f.engine.is_empty());
        assert_eq!(f.engine.delete_session_subscriptions(&f.session), 0);
    }

    #[test]
    fn test_subscription_limit() {
        let f = fixture(SamplingMode::Timer);
        let limits = LimitsConfig {
            max_subscriptions_per_session: 1,
            ..LimitsConfig::default()
        };
        let engine = SubscriptionEngine::new(
            limits,
            SamplingMode::Timer,
            Arc::clone(&f.timer),
            f.store.clone(),
            Arc::new(ManualClock::new()),
            Arc::new(ServerStatistics::new()),
        );
        let request = SubscriptionRequest::default();
        engine
            .create_subscription(f.session, &request, SubscriptionHooks::default())
            .unwrap();
        let err = engine
            .create_subscription(f.session, &request, SubscriptionHooks::default())
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadTooManySubscriptions);
    }

    #[test]
    fn test_local_data_change_item() {
        let f = fixture(SamplingMode::Timer);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let on_change = move |notice: &ItemNotice<'_>, value: &DataValue| {
            assert!(notice.session_id.is_admin());
            assert_eq!(notice.subscription_id, LOCAL_SUBSCRIPTION_ID);
            s.lock().push(value.value.clone());
        };
        let callback = ItemCallback::DataChange(Arc::new(on_change));
        let id = f
            .engine
            .create_local_monitored_item(f.value_request(), callback, ItemHooks::default())
            .unwrap();
        write(&f.store, &f.node, 2.0);
        f.engine.sample_local_item(id);
        f.engine.sample_local_item(id);
        assert_eq!(*seen.lock(), vec![Variant::Double(0.0), Variant::Double(2.0)]);

        f.engine.delete_local_monitored_item(id).unwrap();
        assert_eq!(f.engine.local_item_count(), 0);
        assert!(f.timer.is_empty());
    }

    #[test]
    fn test_trigger_event() {
        let f = fixture(SamplingMode::Timer);
        let source = NodeId::numeric(0, keel_core::types::ids::SERVER);
        let sid = f.subscribe(&SubscriptionRequest::default());
        f.engine
            .create_monitored_item(
                &f.session,
                sid,
                MonitoredItemRequest::event(source.clone()).with_queue(10, true),
                ItemHooks::default(),
            )
            .unwrap();

        let local_hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&local_hits);
        f.engine
            .create_local_monitored_item(
                MonitoredItemRequest::event(source.clone()),
                ItemCallback::Event(Arc::new(move |_: &ItemNotice<'_>, fields: &[Variant]| {
                    assert_eq!(fields.len(), 2);
                    h.fetch_add(1, Ordering::SeqCst);
                })),
                ItemHooks::default(),
            )
            .unwrap();

        let fields = vec![Variant::from("Overheat"), Variant::from(500u32)];
        assert_eq!(f.engine.trigger_event(&source, &fields), 2);
        assert_eq!(f.engine.trigger_event(&NodeId::numeric(1, 1), &fields), 0);
        assert_eq!(local_hits.load(Ordering::SeqCst), 1);

        let message = f.engine.publish(&f.session, sid).unwrap().unwrap();
        assert_eq!(message.notifications[0].payload, NotificationPayload::Event(fields));
    }
}
