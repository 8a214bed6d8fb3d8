// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription engine integration tests.
//!
//! Subscriptions are driven by the server's timer on a manual clock, so
//! publishing cycles happen exactly every publishing interval of simulated
//! time.
//!
//! ## Test Categories
//!
//! - Queueing: overflow handling and publish order
//! - Lifetime: expiry, keep-alives and publish resets
//! - Deletion: callback order and publishing after removal
//! - Local items: server-side data-change and event callbacks
//! - Events: delivery to subscribed event items

use std::sync::Arc;
use std::time::Duration;

use keel_core::types::ids;
use keel_core::{DataValue, NodeId, StatusCode, Variant};
use keel_server::subscription::{ItemNotice, NotificationPayload};
use keel_server::{ItemCallback, ItemHooks, MonitoredItemRequest, SessionId, SubscriptionRequest};
use keel_tests::prelude::*;

const IDLE_SAMPLING_MS: f64 = 3_600_000.0;

struct Fixture {
    test: TestServer,
    session: SessionId,
    node: NodeId,
    log: EventLog,
}

impl Fixture {
    fn new() -> Self {
        init_test_logging();
        let test = TestServerBuilder::new().build().unwrap();
        test.startup().unwrap();
        let node =
            insert_double_variable(test.server().nodestore().as_ref(), 1, "Pressure", 0.0).unwrap();
        let session = test.connect("subscriber", Duration::from_secs(600)).unwrap().session.id;
        Self {
            test,
            session,
            node,
            log: EventLog::new(),
        }
    }

    fn subscribe(&self, request: &SubscriptionRequest, label: &str) -> u32 {
        let (id, _) = self
            .test
            .server()
            .create_subscription(&self.session, request, self.log.subscription_hooks(label))
            .unwrap();
        id
    }

    /// Adds a data-change item on the fixture variable that is only sampled
    /// when the test asks for it.
    fn watch(&self, subscription: u32, queue_size: u32, discard_oldest: bool, label: &str) -> u32 {
        let request = MonitoredItemRequest::data_change(self.node.clone())
            .with_sampling_interval(IDLE_SAMPLING_MS)
            .with_queue(queue_size, discard_oldest);
        self.test
            .server()
            .create_monitored_item(&self.session, subscription, request, self.log.item_hooks(label))
            .unwrap()
            .id
    }

    fn write_and_sample(&self, subscription: u32, item: u32, value: f64) {
        self.test.server().write_value(&self.node, value).unwrap();
        self.test.server().subscriptions().sample_item(subscription, item);
    }

    fn publish(&self, subscription: u32) -> Option<keel_server::NotificationMessage> {
        self.test
            .server()
            .subscriptions()
            .publish(&self.session, subscription)
            .unwrap()
    }
}

fn doubles(notifications: &[keel_server::subscription::Notification]) -> Vec<f64> {
    notifications
        .iter()
        .map(|n| match &n.payload {
            NotificationPayload::DataChange(DataValue {
                value: Variant::Double(v),
                ..
            }) => *v,
            other => panic!("unexpected payload {other:?}"),
        })
        .collect()
}

// =============================================================================
// Queueing
// =============================================================================

#[test]
fn test_discard_oldest_keeps_most_recent_values() {
    let fx = Fixture::new();
    let sub = fx.subscribe(&fast_subscription(), "sub");
    // Creation samples the initial 0.0.
    let item = fx.watch(sub, 4, true, "item");

    for value in 1..=9 {
        fx.write_and_sample(sub, item, value as f64);
    }

    let info = fx.test.server().subscriptions().monitored_item_info(sub, item).unwrap();
    assert_eq!(info.queued, 4);
    assert_eq!(info.discarded, 6);

    let message = fx.publish(sub).unwrap();
    assert_eq!(doubles(&message.notifications), vec![6.0, 7.0, 8.0, 9.0]);
    assert!(!message.more_notifications);
    assert!(message.notifications.iter().any(|n| n.overflow));
    assert_eq!(fx.test.server().stats().notifications_discarded, 6);
}

#[test]
fn test_discard_newest_keeps_first_values() {
    let fx = Fixture::new();
    let sub = fx.subscribe(&fast_subscription(), "sub");
    let item = fx.watch(sub, 3, false, "item");

    for value in 1..=5 {
        fx.write_and_sample(sub, item, value as f64);
    }

    let message = fx.publish(sub).unwrap();
    assert_eq!(doubles(&message.notifications), vec![0.0, 1.0, 2.0]);
    let info = fx.test.server().subscriptions().monitored_item_info(sub, item).unwrap();
    assert_eq!(info.discarded, 3);
    assert_eq!(info.queued, 0);
}

#[test]
fn test_unchanged_value_is_not_queued() {
    let fx = Fixture::new();
    let sub = fx.subscribe(&fast_subscription(), "sub");
    let item = fx.watch(sub, 10, true, "item");

    fx.write_and_sample(sub, item, 0.0);
    fx.write_and_sample(sub, item, 2.5);
    fx.write_and_sample(sub, item, 2.5);

    let message = fx.publish(sub).unwrap();
    assert_eq!(doubles(&message.notifications), vec![0.0, 2.5]);
}

#[test]
fn test_publish_respects_notification_limit() {
    let fx = Fixture::new();
    let request = SubscriptionRequest {
        max_notifications_per_publish: 2,
        ..fast_subscription()
    };
    let sub = fx.subscribe(&request, "sub");
    let item = fx.watch(sub, 10, true, "item");
    for value in 1..=3 {
        fx.write_and_sample(sub, item, value as f64);
    }

    let first = fx.publish(sub).unwrap();
    assert_eq!(doubles(&first.notifications), vec![0.0, 1.0]);
    assert!(first.more_notifications);

    let second = fx.publish(sub).unwrap();
    assert_eq!(doubles(&second.notifications), vec![2.0, 3.0]);
    assert!(!second.more_notifications);
    assert_eq!(second.sequence_number, first.sequence_number + 1);

    assert!(fx.publish(sub).is_none());
}

#[test]
fn test_publish_any_prefers_higher_priority() {
    let fx = Fixture::new();
    let low = fx.subscribe(&fast_subscription(), "low");
    let high = fx.subscribe(
        &SubscriptionRequest {
            priority: 200,
            ..fast_subscription()
        },
        "high",
    );
    fx.watch(low, 1, true, "low-item");
    fx.watch(high, 1, true, "high-item");

    let engine = fx.test.server().subscriptions();
    let (first, _) = engine.publish_any(&fx.session).unwrap();
    let (second, _) = engine.publish_any(&fx.session).unwrap();
    assert_eq!((first, second), (high, low));
    assert!(engine.publish_any(&fx.session).is_none());
}

#[test]
fn test_disabled_publishing_holds_notifications() {
    let fx = Fixture::new();
    let sub = fx.subscribe(&fast_subscription(), "sub");
    fx.watch(sub, 5, true, "item");

    let engine = fx.test.server().subscriptions();
    engine.set_publishing_mode(&fx.session, sub, false).unwrap();
    assert!(fx.publish(sub).is_none());

    engine.set_publishing_mode(&fx.session, sub, true).unwrap();
    assert_eq!(fx.publish(sub).unwrap().notifications.len(), 1);
}

// =============================================================================
// Lifetime
// =============================================================================

#[test]
fn test_unpublished_subscription_expires_once() {
    let fx = Fixture::new();
    let sub = fx.subscribe(&fast_subscription(), "sub");
    fx.watch(sub, 5, true, "item");

    fx.test.run_for(Duration::from_millis(2_500));
    let info = fx.test.server().subscriptions().subscription_info(sub).unwrap();
    assert!(info.lifetime_counter > 0 && info.lifetime_counter < 30);

    fx.test.run_for(Duration::from_millis(1_000));

    assert!(fx.test.server().subscriptions().subscription_info(sub).is_none());
    assert_eq!(fx.log.entries(), vec!["sub:BadTimeout", "item", "sub"]);

    let queued = fx.test.server().stats().notifications_queued;
    fx.test.server().write_value(&fx.node, 42.0).unwrap();
    fx.test.run_for(Duration::from_millis(1_000));
    assert_eq!(fx.test.server().stats().notifications_queued, queued);
    assert_eq!(fx.log.len(), 3);

    let err = fx
        .test
        .server()
        .subscriptions()
        .publish(&fx.session, sub)
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BadSubscriptionIdInvalid);
    assert_eq!(fx.test.server().stats().subscriptions_expired, 1);
}

#[test]
fn test_publish_resets_lifetime() {
    let fx = Fixture::new();
    let sub = fx.subscribe(&fast_subscription(), "sub");
    fx.watch(sub, 5, true, "item");

    fx.test.run_for(Duration::from_millis(2_500));
    assert!(fx.publish(sub).is_some());
    fx.test.run_for(Duration::from_millis(2_500));

    let info = fx.test.server().subscriptions().subscription_info(sub).unwrap();
    assert!(info.lifetime_counter > 0);
    assert!(fx.log.is_empty());
}

#[test]
fn test_keep_alive_after_idle_cycles() {
    let fx = Fixture::new();
    let sub = fx.subscribe(&fast_subscription(), "sub");
    assert!(fx.publish(sub).is_none());

    fx.test.run_for(Duration::from_millis(350));

    let message = fx.publish(sub).unwrap();
    assert!(message.is_keep_alive());
    assert_eq!(message.sequence_number, 1);
    assert!(fx.publish(sub).is_none());
    assert!(fx.test.server().stats().keep_alives_sent >= 1);
}

#[test]
fn test_modify_subscription_revises_parameters() {
    let fx = Fixture::new();
    let sub = fx.subscribe(&fast_subscription(), "sub");

    let revised = fx
        .test
        .server()
        .subscriptions()
        .modify_subscription(
            &fx.session,
            sub,
            &SubscriptionRequest {
                publishing_interval: Duration::from_millis(1),
                lifetime_count: 1_000_000,
                ..fast_subscription()
            },
        )
        .unwrap();
    assert_eq!(revised.publishing_interval, Duration::from_millis(100));
    assert!(revised.lifetime_count <= 15_000);
}

// =============================================================================
// Deletion
// =============================================================================

#[test]
fn test_delete_subscription_runs_callbacks_once() {
    let fx = Fixture::new();
    let sub = fx.subscribe(&fast_subscription(), "sub");
    fx.watch(sub, 1, true, "first");
    fx.watch(sub, 1, true, "second");

    fx.test.server().delete_subscription(&fx.session, sub).unwrap();

    assert_eq!(fx.log.entries(), vec!["first", "second", "sub"]);
    assert!(fx.test.server().delete_subscription(&fx.session, sub).is_err());
    assert_eq!(fx.log.len(), 3);
    let stats = fx.test.server().stats();
    assert_eq!(stats.subscriptions_deleted, 1);
    assert_eq!(stats.monitored_items_deleted, 2);
}

#[test]
fn test_other_session_cannot_touch_subscription() {
    let fx = Fixture::new();
    let sub = fx.subscribe(&fast_subscription(), "sub");
    let other = fx.test.connect("intruder", Duration::from_secs(600)).unwrap().session.id;

    let err = fx.test.server().delete_subscription(&other, sub).unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BadSubscriptionIdInvalid);
    assert!(fx
        .test
        .server()
        .subscriptions()
        .publish(&other, sub)
        .is_err());
    assert_eq!(fx.test.server().subscriptions().len(), 1);
}

// =============================================================================
// Local items
// =============================================================================

#[test]
fn test_local_item_reports_changes_until_deleted() {
    let fx = Fixture::new();
    let seen = EventLog::new();
    let sink = seen.clone();
    let on_change = move |notice: &ItemNotice<'_>, value: &DataValue| {
        assert_eq!(notice.subscription_id, 0);
        sink.push(format!("{:?}", value.value));
    };
    let callback = ItemCallback::DataChange(Arc::new(on_change));

    let item = fx
        .test
        .server()
        .create_local_monitored_item(
            MonitoredItemRequest::data_change(fx.node.clone()).with_sampling_interval(100.0),
            callback,
            fx.log.item_hooks("local"),
        )
        .unwrap();
    assert_eq!(seen.len(), 1, "initial sample");

    fx.test.server().write_value(&fx.node, 5.0).unwrap();
    fx.test.run_for(Duration::from_millis(150));
    assert_eq!(seen.entries(), vec!["Double(0.0)", "Double(5.0)"]);

    fx.test.server().delete_local_monitored_item(item).unwrap();
    assert_eq!(fx.log.entries(), vec!["local"]);
    assert_eq!(fx.test.server().subscriptions().local_item_count(), 0);

    fx.test.server().write_value(&fx.node, 6.0).unwrap();
    fx.test.run_for(Duration::from_millis(300));
    assert_eq!(seen.len(), 2);
    assert!(fx.test.server().delete_local_monitored_item(item).is_err());
}

// =============================================================================
// Events
// =============================================================================

#[test]
fn test_trigger_event_reaches_subscribed_and_local_items() {
    let fx = Fixture::new();
    let source = NodeId::numeric(0, ids::SERVER);
    let sub = fx.subscribe(&fast_subscription(), "sub");
    let item = fx
        .test
        .server()
        .create_monitored_item(
            &fx.session,
            sub,
            MonitoredItemRequest::event(source.clone()).with_queue(10, true),
            ItemHooks::default(),
        )
        .unwrap()
        .id;

    let local_events = EventLog::new();
    let sink = local_events.clone();
    fx.test
        .server()
        .create_local_monitored_item(
            MonitoredItemRequest::event(source.clone()),
            ItemCallback::Event(Arc::new(move |_: &ItemNotice<'_>, fields: &[Variant]| {
                sink.push(format!("{} fields", fields.len()));
            })),
            ItemHooks::default(),
        )
        .unwrap();

    let fields = [Variant::from("overheat"), Variant::from(3.0)];
    assert_eq!(fx.test.server().trigger_event(&source, &fields), 2);
    assert_eq!(fx.test.server().trigger_event(&fx.node, &fields), 0);

    assert_eq!(local_events.entries(), vec!["2 fields"]);
    let message = fx.publish(sub).unwrap();
    assert_eq!(message.notifications.len(), 1);
    assert_eq!(message.notifications[0].monitored_item_id, item);
    assert_eq!(
        message.notifications[0].payload,
        NotificationPayload::Event(fields.to_vec())
    );
}
