// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Assertion extensions.

use keel_server::{Server, SessionId, SubscriptionId};

/// Assertions on the state of a server.
pub trait ServerAssertions {
    /// Asserts the number of stored sessions.
    fn assert_session_count(&self, expected: usize);

    /// Asserts the number of open channels.
    fn assert_channel_count(&self, expected: usize);

    /// Asserts the subscriptions owned by `session`.
    fn assert_subscriptions_of(&self, session: &SessionId, expected: &[SubscriptionId]);

    /// Asserts that `uri` is registered at `index`.
    fn assert_namespace(&self, uri: &str, index: u16);
}

impl ServerAssertions for Server {
    fn assert_session_count(&self, expected: usize) {
        let actual = self.sessions().len();
        assert_eq!(actual, expected, "expected {expected} sessions, found {actual}");
    }

    fn assert_channel_count(&self, expected: usize) {
        let actual = self.channels().len();
        assert_eq!(actual, expected, "expected {expected} channels, found {actual}");
    }

    fn assert_subscriptions_of(&self, session: &SessionId, expected: &[SubscriptionId]) {
        let mut actual = self.subscriptions().subscriptions_of(session);
        actual.sort_unstable();
        let mut expected = expected.to_vec();
        expected.sort_unstable();
        assert_eq!(actual, expected, "subscriptions of session {session}");
    }

    fn assert_namespace(&self, uri: &str, index: u16) {
        match self.get_namespace_by_name(uri) {
            Ok(actual) => assert_eq!(
                actual, index,
                "namespace '{uri}' has index {actual}, expected {index}"
            ),
            Err(e) => panic!("namespace '{uri}' not registered: {e}"),
        }
    }
}

/// Asserts `actual` is within `tolerance` of `expected`.
pub fn assert_near(actual: usize, expected: usize, tolerance: usize) {
    assert!(
        actual.abs_diff(expected) <= tolerance,
        "expected {expected} ± {tolerance}, got {actual}"
    );
}
