// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channel manager.
//!
//! # State Machine
//!
//! ```text
//! open_channel ──► Opening ──mark_open──► Open ──close / expiry──► Closing ──► (removed)
//!                                          │
//!                                          └── renew_security_token (Open only)
//! ```
//!
//! A channel expires when its current security token outlives its revised
//! lifetime. Closing a channel hands the ids of the sessions it carried back
//! to the caller, which detaches them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use keel_core::{SecurityMode, SecurityPolicy, UaError, UaResult};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::endpoint::Certificate;
use crate::session::SessionId;
use crate::stats::ServerStatistics;

/// Identifier of a secure channel.
pub type ChannelId = u32;

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelState {
    /// The open request was accepted, the response is in flight.
    Opening,
    /// The channel carries traffic.
    Open,
    /// The channel is being torn down.
    Closing,
}

/// The security token of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityToken {
    /// Owning channel.
    pub channel_id: ChannelId,
    /// Token id, incremented on renewal.
    pub token_id: u32,
    /// Issue time.
    pub created_at: Instant,
    /// Lifetime granted to the client.
    pub revised_lifetime: Duration,
}

impl SecurityToken {
    /// Returns `true` once the token's lifetime has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.created_at + self.revised_lifetime
    }
}

/// A transport-level secure channel.
#[derive(Debug, Clone)]
pub struct SecureChannel {
    /// Channel id.
    pub id: ChannelId,
    /// Lifecycle state.
    pub state: ChannelState,
    /// Current security token.
    pub token: SecurityToken,
    /// Negotiated policy.
    pub security_policy: SecurityPolicy,
    /// Negotiated mode.
    pub security_mode: SecurityMode,
    /// Server certificate the channel was negotiated with.
    pub certificate: Certificate,
    /// Sessions currently bound to this channel.
    pub sessions: HashSet<SessionId>,
    /// Creation time.
    pub created_at: Instant,
}

/// Limits applied by the channel manager.
#[derive(Debug, Clone, Copy)]
pub struct ChannelLimits {
    /// Maximum number of channels.
    pub max_channels: usize,
    /// Upper bound of the revised token lifetime.
    pub max_token_lifetime: Duration,
}

/// Parameters of a channel open request.
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    /// Requested policy.
    pub security_policy: SecurityPolicy,
    /// Requested mode.
    pub security_mode: SecurityMode,
    /// Certificate of the endpoint that accepted the request.
    pub certificate: Certificate,
    /// Requested token lifetime; zero asks for the maximum.
    pub requested_lifetime: Duration,
}

/// A channel removed by a close, purge or expiry.
#[derive(Debug, Clone)]
pub struct ClosedChannel {
    /// Channel id.
    pub id: ChannelId,
    /// Sessions that were bound to it.
    pub sessions: Vec<SessionId>,
}

/// Tracks every secure channel of a server.
#[derive(Debug)]
pub struct ChannelManager {
    channels: RwLock<HashMap<ChannelId, SecureChannel>>,
    limits: ChannelLimits,
    next_id: AtomicU32,
    clock: Arc<dyn Clock>,
    stats: Arc<ServerStatistics>,
}

impl ChannelManager {
    /// Creates a manager. Channel ids start after `first_id`.
    pub fn new(
        limits: ChannelLimits,
        first_id: u32,
        clock: Arc<dyn Clock>,
        stats: Arc<ServerStatistics>,
    ) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            limits,
            next_id: AtomicU32::new(first_id),
            clock,
            stats,
        }
    }

    /// Revised token lifetime for a requested one.
    pub fn revise_lifetime(&self, requested: Duration) -> Duration {
        if requested.is_zero() || requested > self.limits.max_token_lifetime {
            self.limits.max_token_lifetime
        } else {
            requested
        }
    }

    /// Creates a channel in the `Opening` state.
    ///
    /// At the limit the oldest channel without sessions is purged first; the
    /// purged channel is returned alongside the new one.
    pub fn open_channel(
        &self,
        request: ChannelRequest,
    ) -> UaResult<(SecureChannel, Option<ClosedChannel>)> {
        let now = self.clock.now();
        let mut channels = self.channels.write();

        let mut purged = None;
        if channels.len() >= self.limits.max_channels {
            let victim = channels
                .values()
                .filter(|c| c.sessions.is_empty())
                .min_by_key(|c| (c.created_at, c.id))
                .map(|c| c.id);
            match victim.and_then(|id| channels.remove(&id)) {
                Some(channel) => {
                    warn!(channel_id = channel.id, "Purged idle channel to make room");
                    self.stats.record_channel_purged();
                    purged = Some(ClosedChannel {
                        id: channel.id,
                        sessions: Vec::new(),
                    });
                }
                None => {
                    return Err(UaError::TooManySecureChannels {
                        limit: self.limits.max_channels,
                    })
                }
            }
        }

        channels
            .try_reserve(1)
            .map_err(|_| UaError::out_of_memory("channel table"))?;
        let id = self.allocate_id(&channels);
        let channel = SecureChannel {
            id,
            state: ChannelState::Opening,
            token: SecurityToken {
                channel_id: id,
                token_id: 1,
                created_at: now,
                revised_lifetime: self.revise_lifetime(request.requested_lifetime),
            },
            security_policy: request.security_policy,
            security_mode: request.security_mode,
            certificate: request.certificate,
            sessions: HashSet::new(),
            created_at: now,
        };
        channels.insert(id, channel.clone());
        self.stats.record_channel_opened();
        info!(
            channel_id = id,
            policy = %channel.security_policy,
            lifetime_ms = channel.token.revised_lifetime.as_millis() as u64,
            "Secure channel opening"
        );
        Ok((channel, purged))
    }

    fn allocate_id(&self, channels: &HashMap<ChannelId, SecureChannel>) -> ChannelId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 && !channels.contains_key(&id) {
                return id;
            }
        }
    }

    /// Moves a channel from `Opening` to `Open`.
    pub fn mark_open(&self, id: ChannelId) -> UaResult<()> {
        let mut channels = self.channels.write();
        let channel = channels
            .get_mut(&id)
            .ok_or(UaError::SecureChannelIdInvalid { channel_id: id })?;
        match channel.state {
            ChannelState::Opening => {
                channel.state = ChannelState::Open;
                debug!(channel_id = id, "Secure channel open");
                Ok(())
            }
            ChannelState::Open => Ok(()),
            ChannelState::Closing => Err(UaError::SecureChannelIdInvalid { channel_id: id }),
        }
    }

    /// Issues a new token for an open channel.
    pub fn renew_security_token(
        &self,
        id: ChannelId,
        requested_lifetime: Duration,
    ) -> UaResult<SecurityToken> {
        let now = self.clock.now();
        let mut channels = self.channels.write();
        let channel = channels
            .get_mut(&id)
            .filter(|c| c.state == ChannelState::Open)
            .ok_or(UaError::SecureChannelIdInvalid { channel_id: id })?;

        if channel.token.is_expired(now) {
            return Err(UaError::SecureChannelIdInvalid { channel_id: id });
        }
        channel.token = SecurityToken {
            channel_id: id,
            token_id: channel.token.token_id.wrapping_add(1).max(1),
            created_at: now,
            revised_lifetime: self.revise_lifetime(requested_lifetime),
        };
        self.stats.record_token_renewed();
        debug!(channel_id = id, token_id = channel.token.token_id, "Security token renewed");
        Ok(channel.token.clone())
    }

    /// Returns the channel if it is usable for service calls.
    pub fn validate(&self, id: ChannelId) -> UaResult<SecureChannel> {
        let now = self.clock.now();
        self.channels
            .read()
            .get(&id)
            .filter(|c| c.state != ChannelState::Closing && !c.token.is_expired(now))
            .cloned()
            .ok_or(UaError::SecureChannelIdInvalid { channel_id: id })
    }

    /// Closes and removes a channel.
    pub fn close_channel(&self, id: ChannelId) -> UaResult<ClosedChannel> {
        let closed = self
            .remove(id)
            .ok_or(UaError::SecureChannelIdInvalid { channel_id: id })?;
        self.stats.record_channel_closed();
        info!(channel_id = id, sessions = closed.sessions.len(), "Secure channel closed");
        Ok(closed)
    }

    fn remove(&self, id: ChannelId) -> Option<ClosedChannel> {
        let mut channels = self.channels.write();
        let channel = channels.get_mut(&id)?;
        channel.state = ChannelState::Closing;
        let channel = channels.remove(&id)?;
        Some(ClosedChannel {
            id,
            sessions: channel.sessions.into_iter().collect(),
        })
    }

    /// Removes every channel whose token expired before `now`.
    pub fn cleanup_timed_out(&self, now: Instant) -> Vec<ClosedChannel> {
        let expired: Vec<ChannelId> = self
            .channels
            .read()
            .values()
            .filter(|c| c.token.is_expired(now))
            .map(|c| c.id)
            .collect();

        let closed: Vec<ClosedChannel> = expired
            .into_iter()
            .filter_map(|id| self.remove(id))
            .inspect(|c| {
                self.stats.record_channel_expired();
                info!(channel_id = c.id, "Secure channel expired");
            })
            .collect();
        if !closed.is_empty() {
            debug!(count = closed.len(), "Channel sweep removed expired channels");
        }
        closed
    }

    /// Binds a session to a channel.
    pub fn attach_session(&self, id: ChannelId, session: SessionId) -> UaResult<()> {
        let mut channels = self.channels.write();
        let channel = channels
            .get_mut(&id)
            .filter(|c| c.state != ChannelState::Closing)
            .ok_or(UaError::SecureChannelIdInvalid { channel_id: id })?;
        channel.sessions.insert(session);
        Ok(())
    }

    /// Unbinds a session from a channel. Unknown ids are ignored.
    pub fn detach_session(&self, id: ChannelId, session: &SessionId) {
        if let Some(channel) = self.channels.write().get_mut(&id) {
            channel.sessions.remove(session);
        }
    }

    /// Ids of the channels negotiated with `certificate`.
    pub fn channels_using(&self, certificate: &[u8]) -> Vec<ChannelId> {
        self.channels
            .read()
            .values()
            .filter(|c| *c.certificate == *certificate)
            .map(|c| c.id)
            .collect()
    }

    /// Certificate a channel was negotiated with.
    pub fn certificate_of(&self, id: ChannelId) -> Option<Certificate> {
        self.channels.read().get(&id).map(|c| Arc::clone(&c.certificate))
    }

    /// Copy of one channel.
    pub fn get(&self, id: ChannelId) -> Option<SecureChannel> {
        self.channels.read().get(&id).cloned()
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Returns `true` if no channel is open.
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Removes every channel.
    pub fn close_all(&self) -> Vec<ClosedChannel> {
        let ids: Vec<ChannelId> = self.channels.read().keys().copied().collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
