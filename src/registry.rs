//! Session registry: the waiting → bound state machine.
//!
//! The web tier registers a *waiting* session when it issues a signed
//! token (`AUTH_SESSION`); the WebSocket gateway later *promotes* it by
//! presenting the matching token within the validity window, binding
//! the browser's reply channel to the username.
//!
//! Per-username lifecycle: `none → waiting → bound → none`.
//!
//! Waiting sessions expire lazily: the check happens at promotion time
//! only, and an expired entry is discarded as a side effect of the
//! failed attempt. Bound sessions never time out; they are removed only
//! by an explicit [`SessionRegistry::unbind`] when the WebSocket
//! disconnects.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::identifiers::ChannelId;

// ============================================================================
// Session
// ============================================================================

/// One session record, waiting or bound.
#[derive(Debug, Clone)]
pub struct Session {
    /// Username the session belongs to.
    pub username: String,

    /// The signed token presented at promotion.
    pub token: String,

    /// When the registration arrived.
    pub connected_at: Instant,

    /// Promotion deadline; meaningless once bound.
    pub expires_at: Instant,

    /// `false` while waiting, `true` once bound.
    pub auth: bool,

    /// Registration payload, carried for downstream consumers.
    pub data: Value,
}

impl Session {
    /// Returns `true` if the promotion window has passed.
    #[inline]
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

// ============================================================================
// SessionRegistry
// ============================================================================

/// Registry of waiting and bound sessions.
///
/// Shared between the server dispatch path (registrations) and the
/// handshake path (promotions), which run concurrently; all state sits
/// behind one mutex held only across map mutation.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Waiting sessions keyed by username; at most one per user.
    waiting: FxHashMap<String, Session>,

    /// Bound sessions keyed by reply channel (primary index).
    bound: FxHashMap<ChannelId, Session>,

    /// Username → reply channel (secondary index, cleanup only).
    bound_users: FxHashMap<String, ChannelId>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiting session for `username`.
    ///
    /// Always succeeds. Any prior waiting entry for the same username
    /// is overwritten, invalidating its token.
    pub fn register_waiting(
        &self,
        username: impl Into<String>,
        token: impl Into<String>,
        validity: Duration,
        data: Value,
    ) {
        let username = username.into();
        let now = Instant::now();
        let session = Session {
            username: username.clone(),
            token: token.into(),
            connected_at: now,
            expires_at: now + validity,
            auth: false,
            data,
        };

        let replaced = self.inner.lock().waiting.insert(username.clone(), session);
        debug!(
            username = %username,
            validity_secs = validity.as_secs(),
            replaced = replaced.is_some(),
            "Waiting session registered"
        );
    }

    /// Promotes the waiting session matching `token` and `username`,
    /// binding it to `channel`.
    ///
    /// Returns `None` when no waiting session exists for the username,
    /// the token mismatches, or the promotion window has passed —
    /// expired entries are discarded as a side effect. Succeeds at most
    /// once per registration.
    #[must_use]
    pub fn promote(&self, token: &str, channel: ChannelId, username: &str) -> Option<Session> {
        self.promote_at(Instant::now(), token, channel, username)
    }

    /// Promotion with an explicit clock, for expiry tests.
    pub(crate) fn promote_at(
        &self,
        now: Instant,
        token: &str,
        channel: ChannelId,
        username: &str,
    ) -> Option<Session> {
        let mut inner = self.inner.lock();

        let waiting = inner.waiting.get(username)?;
        if waiting.token != token {
            debug!(username = %username, "Promotion refused: token mismatch");
            return None;
        }
        if waiting.is_expired_at(now) {
            inner.waiting.remove(username);
            debug!(username = %username, "Promotion refused: session expired");
            return None;
        }

        let mut session = inner.waiting.remove(username)?;
        session.auth = true;

        inner.bound.insert(channel, session.clone());
        inner.bound_users.insert(username.to_string(), channel);

        debug!(username = %username, channel = %channel, "Session bound");
        Some(session)
    }

    /// Returns `true` if a bound session exists for `channel`.
    #[inline]
    #[must_use]
    pub fn has_session(&self, channel: ChannelId) -> bool {
        self.inner.lock().bound.contains_key(&channel)
    }

    /// Returns the bound session for `channel`, if any.
    #[must_use]
    pub fn get_session(&self, channel: ChannelId) -> Option<Session> {
        self.inner.lock().bound.get(&channel).cloned()
    }

    /// Removes the bound session for `channel` from both indexes.
    ///
    /// Returns the removed session, if any.
    pub fn unbind(&self, channel: ChannelId) -> Option<Session> {
        let mut inner = self.inner.lock();
        let session = inner.bound.remove(&channel)?;

        // The secondary index may already point at a newer binding for
        // the same username; only remove it if it is ours.
        if inner.bound_users.get(&session.username) == Some(&channel) {
            inner.bound_users.remove(&session.username);
        }

        debug!(username = %session.username, channel = %channel, "Session unbound");
        Some(session)
    }

    /// Number of waiting sessions.
    #[inline]
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Number of bound sessions.
    #[inline]
    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.inner.lock().bound.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
