// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session manager.
//!
//! # State Machine
//!
//! ```text
//! create_session ──► Created ──activate_session──► Activated ◄──┐
//!                                                   │   touch ───┘ (deadline refreshed)
//!                                                   ▼
//!                              close / timeout ──► (removed)
//! ```
//!
//! Sessions are indexed by id and, through a secondary index, by
//! authentication token. A session may migrate to another channel by being
//! activated again on it. When its channel closes, the session is detached
//! and must be re-activated before it can make service calls.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use keel_core::{NodeId, UaError, UaResult};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::ChannelId;
use crate::clock::Clock;
use crate::stats::ServerStatistics;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// The fixed id of the server's admin session.
    pub const ADMIN: SessionId =
        SessionId(Uuid::from_u128(0x0000_0001_0000_0000_0000_0000_0000_0000));

    /// Wraps a UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// A random id.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The id as a GUID node id in namespace 1.
    pub fn node_id(&self) -> NodeId {
        NodeId::guid(1, self.0)
    }

    /// Returns `true` for the admin session.
    pub fn is_admin(&self) -> bool {
        *self == Self::ADMIN
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Secret token a client presents with every request.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthenticationToken(Uuid);

impl AuthenticationToken {
    /// Wraps a UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for AuthenticationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthenticationToken(..)")
    }
}

/// Application data attached to a session.
pub type SessionContext = Arc<dyn Any + Send + Sync>;

// =============================================================================
// Session
// =============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// Created, not yet activated.
    Created,
    /// Activated; may make service calls.
    Activated,
}

/// An application-level session.
#[derive(Clone)]
pub struct Session {
    /// Session id.
    pub id: SessionId,
    /// Authentication token.
    pub token: AuthenticationToken,
    /// Client-supplied name.
    pub name: String,
    /// Lifecycle state.
    pub state: SessionState,
    /// Channel currently carrying the session.
    pub channel_id: Option<ChannelId>,
    /// Revised inactivity timeout.
    pub timeout: Duration,
    /// Inactivity deadline; `None` never expires.
    pub deadline: Option<Instant>,
    /// Creation time.
    pub created_at: Instant,
    /// Application data.
    pub context: Option<SessionContext>,
}

impl Session {
    /// The server's own session. It is never stored in the manager and never
    /// times out.
    pub fn admin(now: Instant) -> Self {
        Self {
            id: SessionId::ADMIN,
            token: AuthenticationToken(Uuid::nil()),
            name: "Administrator".to_string(),
            state: SessionState::Activated,
            channel_id: None,
            timeout: Duration::MAX,
            deadline: None,
            created_at: now,
            context: None,
        }
    }

    /// Returns `true` once the deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    fn refresh(&mut self, now: Instant) {
        if self.deadline.is_some() {
            self.deadline = Some(now + self.timeout);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("channel_id", &self.channel_id)
            .field("timeout", &self.timeout)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

// =============================================================================
// SessionManager
// =============================================================================

/// Limits applied by the session manager.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Maximum number of sessions.
    pub max_sessions: usize,
    /// Upper bound of the revised timeout.
    pub max_timeout: Duration,
}

/// Tracks every client session of a server.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Session>>,
    by_token: DashMap<AuthenticationToken, SessionId>,
    limits: SessionLimits,
    rng: Mutex<StdRng>,
    clock: Arc<dyn Clock>,
    stats: Arc<ServerStatistics>,
}

impl SessionManager {
    /// Creates a manager whose ids and tokens derive from `seed`.
    pub fn new(
        limits: SessionLimits,
        seed: u64,
        clock: Arc<dyn Clock>,
        stats: Arc<ServerStatistics>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            by_token: DashMap::new(),
            limits,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            clock,
            stats,
        }
    }

    /// Revised timeout for a requested one; zero asks for the maximum.
    pub fn revise_timeout(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.limits.max_timeout
        } else {
            requested.min(self.limits.max_timeout)
        }
    }

    fn random_uuid(&self) -> Uuid {
        let bytes: [u8; 16] = self.rng.lock().gen();
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    /// Creates a session bound to `channel_id`.
    pub fn create_session(
        &self,
        channel_id: ChannelId,
        name: impl Into<String>,
        requested_timeout: Duration,
        context: Option<SessionContext>,
    ) -> UaResult<Session> {
        let now = self.clock.now();
        let timeout = self.revise_timeout(requested_timeout);

        let mut sessions = self.sessions.write();
        if sessions.len() >= self.limits.max_sessions {
            return Err(UaError::TooManySessions {
                limit: self.limits.max_sessions,
            });
        }
        sessions
            .try_reserve(1)
            .map_err(|_| UaError::out_of_memory("session table"))?;

        let session = Session {
            id: SessionId(self.random_uuid()),
            token: AuthenticationToken(self.random_uuid()),
            name: name.into(),
            state: SessionState::Created,
            channel_id: Some(channel_id),
            timeout,
            deadline: Some(now + timeout),
            created_at: now,
            context,
        };
        sessions.insert(session.id, session.clone());
        self.by_token.insert(session.token, session.id);
        self.stats.record_session_created();
        info!(
            session_id = %session.id,
            channel_id,
            timeout_ms = timeout.as_millis() as u64,
            "Session created"
        );
        Ok(session)
    }

    /// Activates a session on `channel_id`.
    ///
    /// Returns the session and, if it migrated, the channel it left.
    pub fn activate_session(
        &self,
        token: &AuthenticationToken,
        channel_id: ChannelId,
    ) -> UaResult<(Session, Option<ChannelId>)> {
        let now = self.clock.now();
        let id = self.resolve(token)?;
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&id)
            .filter(|s| !s.is_expired(now))
            .ok_or_else(|| UaError::session_invalid(id))?;

        let previous = session.channel_id.filter(|&c| c != channel_id);
        session.channel_id = Some(channel_id);
        session.state = SessionState::Activated;
        session.refresh(now);
        self.stats.record_session_activated();
        info!(session_id = %id, channel_id, migrated = previous.is_some(), "Session activated");
        Ok((session.clone(), previous))
    }

    /// Refreshes the deadline of an activated session used on `channel_id`.
    pub fn touch_session(
        &self,
        token: &AuthenticationToken,
        channel_id: ChannelId,
    ) -> UaResult<SessionId> {
        let now = self.clock.now();
        let id = self.resolve(token)?;
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&id)
            .filter(|s| {
                s.state == SessionState::Activated
                    && s.channel_id == Some(channel_id)
                    && !s.is_expired(now)
            })
            .ok_or_else(|| UaError::session_invalid(id))?;
        session.refresh(now);
        Ok(id)
    }

    fn resolve(&self, token: &AuthenticationToken) -> UaResult<SessionId> {
        self.by_token
            .get(token)
            .map(|entry| *entry.value())
            .ok_or_else(|| UaError::session_invalid("unknown token"))
    }

    /// Closes a session on client request.
    pub fn close_session(&self, token: &AuthenticationToken) -> UaResult<Session> {
        let id = self.resolve(token)?;
        let session = self
            .remove_session(&id)
            .ok_or_else(|| UaError::session_invalid(id))?;
        self.stats.record_session_closed();
        info!(session_id = %id, "Session closed");
        Ok(session)
    }

    /// Removes a session by id.
    pub fn remove_session(&self, id: &SessionId) -> Option<Session> {
        let session = self.sessions.write().remove(id)?;
        self.by_token.remove(&session.token);
        Some(session)
    }

    /// Clears the channel binding of every listed session.
    pub fn detach_channel(&self, channel_id: ChannelId, ids: &[SessionId]) {
        let mut sessions = self.sessions.write();
        for id in ids {
            if let Some(session) = sessions.get_mut(id) {
                if session.channel_id == Some(channel_id) {
                    session.channel_id = None;
                    debug!(session_id = %id, channel_id, "Session detached from channel");
                }
            }
        }
    }

    /// Removes every session whose deadline passed before `now`.
    pub fn cleanup_timed_out(&self, now: Instant) -> Vec<Session> {
        let expired: Vec<SessionId> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id)
            .collect();

        expired
            .iter()
            .filter_map(|id| self.remove_session(id))
            .inspect(|s| {
                self.stats.record_session_expired();
                info!(session_id = %s.id, "Session timed out");
            })
            .collect()
    }

    /// Ids of sessions currently bound to any of `channels`.
    pub fn sessions_on(&self, channels: &[ChannelId]) -> Vec<SessionId> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.channel_id.is_some_and(|c| channels.contains(&c)))
            .map(|s| s.id)
            .collect()
    }

    /// Copy of one session.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    /// Copy of the session owning `token`.
    pub fn get_by_token(&self, token: &AuthenticationToken) -> Option<Session> {
        let id = self.resolve(token).ok()?;
        self.get(&id)
    }

    /// Ids of all sessions.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().copied().collect()
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if there is no session.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Removes every session.
    pub fn close_all(&self) -> Vec<Session> {
        let mut sessions = self.sessions.write();
        self.by_token.clear();
        sessions.drain().map(|(_, s)| s).collect()
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.len())
            .field("limits", &self.limits)
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
    use keel_core::StatusCode;

    fn manager(max_sessions: usize) -> (ManualClock, SessionManager) {
        let clock = ManualClock::new();
        let manager = SessionManager::new(
            SessionLimits {
                max_sessions,
                max_timeout: Duration::from_secs(3_600),
            },
            7,
            Arc::new(clock.clone()),
            Arc::new(ServerStatistics::new()),
        );
        (clock, manager)
    }

    #[test]
    fn test_admin_session_id() {
        assert_eq!(
            SessionId::ADMIN.to_string(),
            "00000001-0000-0000-0000-000000000000"
        );
        let admin = Session::admin(Instant::now());
        assert!(!admin.is_expired(Instant::now() + Duration::from_secs(1_000_000)));
    }

    #[test]
    fn test_create_activate_touch() {
        let (clock, manager) = manager(10);
        let session = manager
            .create_session(1, "client", Duration::from_secs(10), None)
            .unwrap();
        assert_eq!(session.state, SessionState::Created);

        // Service calls need an activated session.
        let err = manager.touch_session(&session.token, 1).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadSessionIdInvalid);

        manager.activate_session(&session.token, 1).unwrap();
        clock.advance(Duration::from_secs(9));
        manager.touch_session(&session.token, 1).unwrap();
        clock.advance(Duration::from_secs(9));
        assert!(manager.cleanup_timed_out(clock.now()).is_empty());

        clock.advance(Duration::from_secs(1));
        let removed = manager.cleanup_timed_out(clock.now());
        assert_eq!(removed.len(), 1);
        assert!(manager.get_by_token(&session.token).is_none());
    }

    #[test]
    fn test_timeout_revision() {
        let (_, manager) = manager(10);
        assert_eq!(manager.revise_timeout(Duration::ZERO), Duration::from_secs(3_600));
        assert_eq!(manager.revise_timeout(Duration::from_secs(86_400)), Duration::from_secs(3_600));
        assert_eq!(manager.revise_timeout(Duration::from_secs(30)), Duration::from_secs(30));
    }

    #[test]
    fn test_session_limit() {
        let (_, manager) = manager(1);
        manager.create_session(1, "a", Duration::ZERO, None).unwrap();
        let err = manager.create_session(1, "b", Duration::ZERO, None).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadTooManySessions);
    }

    #[test]
    fn test_migration_and_detach() {
        let (_, manager) = manager(10);
        let session = manager.create_session(1, "client", Duration::ZERO, None).unwrap();
        let (_, previous) = manager.activate_session(&session.token, 1).unwrap();
        assert_eq!(previous, None);
        let (_, previous) = manager.activate_session(&session.token, 2).unwrap();
        assert_eq!(previous, Some(1));
        assert!(manager.touch_session(&session.token, 1).is_err());
        assert!(manager.touch_session(&session.token, 2).is_ok());

        manager.detach_channel(2, &[session.id]);
        assert!(manager.touch_session(&session.token, 2).is_err());
        manager.activate_session(&session.token, 3).unwrap();
        assert_eq!(manager.sessions_on(&[3]), vec![session.id]);
    }

    #[test]
    fn test_close_session() {
        let (_, manager) = manager(10);
        let session = manager.create_session(1, "client", Duration::ZERO, None).unwrap();
        manager.close_session(&session.token).unwrap();
        assert!(manager.is_empty());
        assert!(manager.close_session(&session.token).is_err());
    }

    #[test]
    fn test_seeded_ids_are_distinct() {
        let (_, manager) = manager(10);
        let a = manager.create_session(1, "a", Duration::ZERO, None).unwrap();
        let b = manager.create_session(1, "b", Duration::ZERO, None).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.token, b.token);
    }
}
