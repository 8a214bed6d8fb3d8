// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Channel and session integration tests.
//!
//! ## Test Categories
//!
//! - Expiry: session and channel sweeps, subscription cleanup
//! - Binding: activation, migration, channel close
//! - Limits: channel purge, session cap
//! - Certificates: rotation closes what used the old certificate

use std::sync::Arc;
use std::time::Duration;

use keel_core::{SecurityMode, SecurityPolicy, StatusCode};
use keel_server::{
    Certificate, Endpoint, MonitoredItemRequest, OpenChannelRequest, RotationPolicy, SessionState,
};
use keel_tests::prelude::*;

const SECURE_URL: &str = "opc.tcp://localhost:4843";

fn secured_request() -> OpenChannelRequest {
    OpenChannelRequest {
        security_policy: SecurityPolicy::Basic256Sha256,
        security_mode: SecurityMode::SignAndEncrypt,
        ..OpenChannelRequest::unsecured(SECURE_URL)
    }
}

fn cert(bytes: &[u8]) -> Certificate {
    Arc::from(bytes)
}

// =============================================================================
// Expiry
// =============================================================================

#[test]
fn test_expired_session_removed_with_subscriptions() {
    init_test_logging();
    let test = TestServerBuilder::new().build().unwrap();
    let server = test.server();
    let log = EventLog::new();

    let ns = server.add_namespace(TEST_NAMESPACE_URI).unwrap();
    let node = insert_double_variable(server.nodestore().as_ref(), ns, "Pressure", 1.0).unwrap();

    let conn = test.connect("client", Duration::from_secs(1)).unwrap();
    let request = fast_subscription();
    let (sub_a, _) = server
        .create_subscription(&conn.session.id, &request, log.subscription_hooks("sub-a"))
        .unwrap();
    let (sub_b, _) = server
        .create_subscription(&conn.session.id, &request, log.subscription_hooks("sub-b"))
        .unwrap();
    server
        .create_monitored_item(
            &conn.session.id,
            sub_a,
            MonitoredItemRequest::data_change(node),
            log.item_hooks("item"),
        )
        .unwrap();
    server.assert_subscriptions_of(&conn.session.id, &[sub_a, sub_b]);

    test.advance(Duration::from_millis(1_500));
    server.run_cleanup();

    server.assert_session_count(0);
    assert!(server.subscriptions().is_empty());
    assert!(server.subscriptions().subscriptions_of(&conn.session.id).is_empty());
    assert_eq!(log.count("sub-a"), 1);
    assert_eq!(log.count("sub-b"), 1);
    assert_eq!(log.count("item"), 1);
    assert!(
        log.position("item") < log.position("sub-a"),
        "items are deleted before their subscription: {:?}",
        log.entries()
    );

    let channel = server.channels().get(conn.channel.id).unwrap();
    assert!(channel.sessions.is_empty());
    assert_eq!(server.stats().sessions_expired, 1);
}

#[test]
fn test_session_expires_through_cleanup_callback() {
    let test = TestServerBuilder::new()
        .cleanup_interval(Duration::from_millis(500))
        .build()
        .unwrap();
    let conn = test.connect("client", Duration::from_secs(1)).unwrap();
    test.startup().unwrap();

    test.run_for(Duration::from_millis(800));
    test.server().assert_session_count(1);

    test.run_for(Duration::from_millis(1_000));
    test.server().assert_session_count(0);
    assert!(test.server().sessions().get(&conn.session.id).is_none());
}

#[test]
fn test_touch_keeps_session_alive() {
    let test = TestServerBuilder::new().build().unwrap();
    let server = test.server();
    let conn = test.connect("client", Duration::from_secs(1)).unwrap();

    for _ in 0..5 {
        test.advance(Duration::from_millis(600));
        server
            .touch_session(&conn.session.token, conn.channel.id)
            .unwrap();
        server.run_cleanup();
    }
    server.assert_session_count(1);

    test.advance(Duration::from_millis(1_000));
    let err = server
        .touch_session(&conn.session.token, conn.channel.id)
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BadSessionIdInvalid);
}

#[test]
fn test_expired_channel_detaches_sessions() {
    let test = TestServerBuilder::new().build().unwrap();
    let server = test.server();
    let request = OpenChannelRequest {
        requested_lifetime: Duration::from_secs(1),
        ..OpenChannelRequest::unsecured(TEST_ENDPOINT_URL)
    };
    let conn = test
        .connect_with(&request, "client", Duration::from_secs(3_600))
        .unwrap();

    test.advance(Duration::from_secs(2));
    server.run_cleanup();

    server.assert_channel_count(0);
    let session = server.sessions().get(&conn.session.id).unwrap();
    assert_eq!(session.channel_id, None);
    assert_eq!(server.stats().channels_expired, 1);
}

// =============================================================================
// Binding
// =============================================================================

#[test]
fn test_session_requires_open_channel() {
    let test = TestServerBuilder::new().build().unwrap();
    let err = test
        .server()
        .create_session(4_242, "client", Duration::from_secs(60), None)
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BadSecureChannelIdInvalid);
    test.server().assert_session_count(0);
}

#[test]
fn test_activation_migrates_session_between_channels() {
    let test = TestServerBuilder::new().build().unwrap();
    let server = test.server();
    let conn = test.connect("client", Duration::from_secs(60)).unwrap();
    assert_eq!(conn.session.state, SessionState::Activated);

    let second = server
        .open_secure_channel(&OpenChannelRequest::unsecured(TEST_ENDPOINT_URL))
        .unwrap();
    let moved = server
        .activate_session(&conn.session.token, second.id)
        .unwrap();
    assert_eq!(moved.channel_id, Some(second.id));

    assert!(server.channels().get(conn.channel.id).unwrap().sessions.is_empty());
    assert!(server
        .channels()
        .get(second.id)
        .unwrap()
        .sessions
        .contains(&conn.session.id));

    assert!(server
        .touch_session(&conn.session.token, conn.channel.id)
        .is_err());
    assert_eq!(
        server.touch_session(&conn.session.token, second.id).unwrap(),
        conn.session.id
    );
}

#[test]
fn test_failed_activation_leaves_bindings_unchanged() {
    let test = TestServerBuilder::new().build().unwrap();
    let server = test.server();
    let conn = test.connect("client", Duration::from_secs(1)).unwrap();
    let second = server
        .open_secure_channel(&OpenChannelRequest::unsecured(TEST_ENDPOINT_URL))
        .unwrap();

    test.advance(Duration::from_millis(1_500));
    let err = server
        .activate_session(&conn.session.token, second.id)
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BadSessionIdInvalid);

    assert!(server.channels().get(second.id).unwrap().sessions.is_empty());
    assert!(server
        .channels()
        .get(conn.channel.id)
        .unwrap()
        .sessions
        .contains(&conn.session.id));
    let session = server.sessions().get(&conn.session.id).unwrap();
    assert_eq!(session.channel_id, Some(conn.channel.id));

    let closed = test.connect("closed", Duration::from_secs(60)).unwrap();
    server.close_session(&closed.session.token).unwrap();
    let unknown = server
        .activate_session(&closed.session.token, second.id)
        .unwrap_err();
    assert_eq!(unknown.status_code(), StatusCode::BadSessionIdInvalid);
    assert!(server.channels().get(second.id).unwrap().sessions.is_empty());
}

#[test]
fn test_closing_channel_keeps_session_for_reactivation() {
    let test = TestServerBuilder::new().build().unwrap();
    let server = test.server();
    let conn = test.connect("client", Duration::from_secs(60)).unwrap();

    server.close_secure_channel(conn.channel.id).unwrap();
    server.assert_channel_count(0);
    assert_eq!(server.sessions().get(&conn.session.id).unwrap().channel_id, None);

    let channel = server
        .open_secure_channel(&OpenChannelRequest::unsecured(TEST_ENDPOINT_URL))
        .unwrap();
    let session = server.activate_session(&conn.session.token, channel.id).unwrap();
    assert_eq!(session.channel_id, Some(channel.id));
}

#[test]
fn test_close_session_deletes_subscriptions() {
    let test = TestServerBuilder::new().build().unwrap();
    let server = test.server();
    let log = EventLog::new();
    let conn = test.connect("client", Duration::from_secs(60)).unwrap();
    server
        .create_subscription(&conn.session.id, &fast_subscription(), log.subscription_hooks("sub"))
        .unwrap();

    server.close_session(&conn.session.token).unwrap();

    server.assert_session_count(0);
    assert!(server.subscriptions().is_empty());
    assert_eq!(log.entries(), vec!["sub"]);
    assert!(server.channels().get(conn.channel.id).unwrap().sessions.is_empty());
    assert!(server.close_session(&conn.session.token).is_err());
}

#[test]
fn test_subscription_needs_live_session() {
    let test = TestServerBuilder::new().build().unwrap();
    let server = test.server();
    let conn = test.connect("client", Duration::from_secs(60)).unwrap();
    server.close_session(&conn.session.token).unwrap();

    let err = server
        .create_subscription(&conn.session.id, &fast_subscription(), Default::default())
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BadSessionIdInvalid);

    // The admin session is always valid.
    let admin = server.admin_session().id;
    assert!(server
        .create_subscription(&admin, &fast_subscription(), Default::default())
        .is_ok());
}

// =============================================================================
// Limits
// =============================================================================

#[test]
fn test_channel_limit_purges_idle_channel() {
    let test = TestServerBuilder::new().max_channels(2).build().unwrap();
    let server = test.server();
    let request = OpenChannelRequest::unsecured(TEST_ENDPOINT_URL);

    let busy = test.connect("client", Duration::from_secs(60)).unwrap();
    test.advance(Duration::from_millis(10));
    let idle = server.open_secure_channel(&request).unwrap();
    test.advance(Duration::from_millis(10));
    let newest = server.open_secure_channel(&request).unwrap();

    server.assert_channel_count(2);
    assert!(server.channels().get(idle.id).is_none());
    assert!(server.channels().get(busy.channel.id).is_some());
    assert!(server.channels().get(newest.id).is_some());
    assert_eq!(server.stats().channels_purged, 1);

    server.create_session(newest.id, "second", Duration::from_secs(60), None).unwrap();
    let err = server.open_secure_channel(&request).unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BadMaxConnectionsReached);
}

#[test]
fn test_session_limit() {
    let mut config = server_config();
    config.limits.max_sessions = 1;
    let test = TestServerBuilder::new().config(config).build().unwrap();

    test.connect("first", Duration::from_secs(60)).unwrap();
    let err = test.connect("second", Duration::from_secs(60)).unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BadTooManySessions);
}

#[test]
fn test_session_timeout_is_revised() {
    let test = TestServerBuilder::new()
        .max_session_timeout(Duration::from_secs(30))
        .build()
        .unwrap();
    let conn = test.connect("client", Duration::from_secs(600)).unwrap();
    assert_eq!(conn.session.timeout, Duration::from_secs(30));
    let conn = test.connect("client-2", Duration::ZERO).unwrap();
    assert_eq!(conn.session.timeout, Duration::from_secs(30));
}

// =============================================================================
// Certificates
// =============================================================================

#[test]
fn test_certificate_rotation_closes_affected_connections() {
    init_test_logging();
    let test = TestServerBuilder::new()
        .endpoint(Endpoint::unsecured(TEST_ENDPOINT_URL))
        .endpoint(Endpoint::new(
            SECURE_URL,
            SecurityPolicy::Basic256Sha256,
            SecurityMode::SignAndEncrypt,
            b"old-cert".to_vec(),
            b"old-key".to_vec(),
        ))
        .build()
        .unwrap();
    let server = test.server();
    let log = EventLog::new();

    let plain = test.connect("plain", Duration::from_secs(60)).unwrap();
    let secure = test
        .connect_with(&secured_request(), "secure", Duration::from_secs(60))
        .unwrap();
    assert_eq!(secure.channel.certificate.as_ref(), b"old-cert");
    let hooks = log.subscription_hooks("secure-sub");
    server
        .create_subscription(&secure.session.id, &fast_subscription(), hooks)
        .unwrap();

    let report = server
        .update_certificate(
            b"old-cert",
            cert(b"new-cert"),
            cert(b"new-key"),
            RotationPolicy::CLOSE_ALL,
        )
        .unwrap();
    assert_eq!(report.endpoints_updated, 1);
    assert_eq!(report.sessions_closed, 1);
    assert_eq!(report.channels_closed, 1);

    assert!(server.sessions().get(&secure.session.id).is_none());
    assert!(server.channels().get(secure.channel.id).is_none());
    assert_eq!(log.entries(), vec!["secure-sub"]);
    assert!(server.sessions().get(&plain.session.id).is_some());
    assert!(server.channels().get(plain.channel.id).is_some());

    let fresh = server.open_secure_channel(&secured_request()).unwrap();
    assert_eq!(fresh.certificate.as_ref(), b"new-cert");
}

#[test]
fn test_rotation_can_keep_sessions() {
    let test = TestServerBuilder::new()
        .endpoint(Endpoint::new(
            SECURE_URL,
            SecurityPolicy::Basic256Sha256,
            SecurityMode::SignAndEncrypt,
            b"old-cert".to_vec(),
            b"old-key".to_vec(),
        ))
        .build()
        .unwrap();
    let server = test.server();
    let conn = test
        .connect_with(&secured_request(), "secure", Duration::from_secs(60))
        .unwrap();

    let policy = RotationPolicy {
        close_sessions: false,
        close_channels: true,
    };
    let report = server
        .update_certificate(b"old-cert", cert(b"new-cert"), cert(b"new-key"), policy)
        .unwrap();
    assert_eq!(report.sessions_closed, 0);
    assert_eq!(report.channels_closed, 1);

    let session = server.sessions().get(&conn.session.id).unwrap();
    assert_eq!(session.channel_id, None);

    let channel = server.open_secure_channel(&secured_request()).unwrap();
    server.activate_session(&conn.session.token, channel.id).unwrap();
}
