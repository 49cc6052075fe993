//! WebSocket handshake validation glue.
//!
//! The WebSocket gateway terminates browser connections elsewhere;
//! what lives here is the decision it delegates: given the handshake
//! query string and the browser's session cookie, may this connection
//! be bound to a username?
//!
//! # Checks, in order
//!
//! 1. `username` and `messengerid` query parameters present and
//!    pattern-valid
//! 2. session cookie resolves to a user id ([`AuthBackend`])
//! 3. user id maps to an active user whose username matches
//! 4. token signature valid and younger than the max age (15 s)
//! 5. token equals the server-stored expected token for that user
//! 6. the waiting session promotes ([`SessionRegistry::promote`])
//!
//! Every failure yields `{"accept": false}`; no error ever reaches the
//! browser. On success the reply channel joins the default broadcast
//! group.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tracing::debug;
use url::form_urlencoded;

use crate::config::MessengerConfig;
use crate::identifiers::ChannelId;
use crate::registry::{Session, SessionRegistry};
use crate::token::TokenSigner;
use crate::transport::{BroadcastGroup, ReplySender};

// ============================================================================
// Validation Patterns
// ============================================================================

static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]{3,100}$").expect("valid pattern"));

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_\-:]{50,100}$").expect("valid pattern"));

// ============================================================================
// AuthBackend
// ============================================================================

/// Seam to the web framework's session and user stores.
///
/// The hosting application implements this against its session cookie
/// store and user table; all methods return `None` for "not found /
/// not valid", which the handshake maps to a rejection.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Resolves a session cookie to a user id.
    async fn resolve_session(&self, session_cookie: &str) -> Option<u64>;

    /// Returns the username of an *active* user, if any.
    async fn active_username(&self, user_id: u64) -> Option<String>;

    /// Returns the server-stored expected token for the user.
    async fn expected_token(&self, user_id: u64) -> Option<String>;
}

// ============================================================================
// HandshakeReply
// ============================================================================

/// The gateway's reply to the browser.
///
/// # Format
///
/// ```json
/// {"accept": true}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HandshakeReply {
    /// Whether the connection was bound.
    pub accept: bool,
}

impl HandshakeReply {
    /// An accepting reply.
    #[inline]
    #[must_use]
    pub const fn accepted() -> Self {
        Self { accept: true }
    }

    /// A rejecting reply.
    #[inline]
    #[must_use]
    pub const fn rejected() -> Self {
        Self { accept: false }
    }

    /// Serializes the reply to JSON text.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"accept\":false}"))
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Handshake validator consumed by the WebSocket gateway.
pub struct Handshake {
    registry: Arc<SessionRegistry>,
    broadcast: Arc<BroadcastGroup>,
    signer: TokenSigner,
    backend: Arc<dyn AuthBackend>,
    signature_max_age: Duration,
}

impl Handshake {
    /// Creates a handshake validator.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        broadcast: Arc<BroadcastGroup>,
        signer: TokenSigner,
        backend: Arc<dyn AuthBackend>,
        config: &MessengerConfig,
    ) -> Self {
        Self {
            registry,
            broadcast,
            signer,
            backend,
            signature_max_age: config.signature_max_age,
        }
    }

    /// Decides one browser handshake.
    ///
    /// `query` is the raw WebSocket URL query string; `sender` is the
    /// reply channel the gateway will drain into the browser. The
    /// sender only joins the broadcast group on acceptance.
    pub async fn authorize(
        &self,
        query: &str,
        session_cookie: Option<&str>,
        channel: ChannelId,
        sender: ReplySender,
    ) -> HandshakeReply {
        let Some((username, token)) = parse_query(query) else {
            debug!("Handshake rejected: malformed query");
            return HandshakeReply::rejected();
        };

        if !USERNAME_PATTERN.is_match(&username) {
            debug!("Handshake rejected: invalid username format");
            return HandshakeReply::rejected();
        }
        if !TOKEN_PATTERN.is_match(&token) {
            debug!("Handshake rejected: invalid token format");
            return HandshakeReply::rejected();
        }

        let Some(cookie) = session_cookie else {
            debug!(username = %username, "Handshake rejected: no session cookie");
            return HandshakeReply::rejected();
        };
        let Some(user_id) = self.backend.resolve_session(cookie).await else {
            debug!(username = %username, "Handshake rejected: unknown session");
            return HandshakeReply::rejected();
        };

        let Some(resolved) = self.backend.active_username(user_id).await else {
            debug!(user_id, "Handshake rejected: user not active");
            return HandshakeReply::rejected();
        };
        if resolved != username {
            debug!(user_id, "Handshake rejected: username mismatch");
            return HandshakeReply::rejected();
        }

        if let Err(e) = self.signer.verify(&token, self.signature_max_age) {
            debug!(username = %username, error = %e, "Handshake rejected: bad token");
            return HandshakeReply::rejected();
        }

        match self.backend.expected_token(user_id).await {
            Some(expected) if expected == token => {}
            _ => {
                debug!(username = %username, "Handshake rejected: token not expected");
                return HandshakeReply::rejected();
            }
        }

        if self.registry.promote(&token, channel, &username).is_none() {
            debug!(username = %username, "Handshake rejected: promotion failed");
            return HandshakeReply::rejected();
        }

        self.broadcast.join(channel, sender);
        debug!(username = %username, channel = %channel, "Handshake accepted");
        HandshakeReply::accepted()
    }

    /// Tears down a bound connection on WebSocket disconnect.
    ///
    /// Removes the channel from the broadcast group and unbinds the
    /// session. Safe to call for channels that never bound.
    pub fn release(&self, channel: ChannelId) -> Option<Session> {
        self.broadcast.leave(channel);
        self.registry.unbind(channel)
    }
}

/// Extracts `(username, messengerid)` from the query string.
fn parse_query(query: &str) -> Option<(String, String)> {
    let mut username = None;
    let mut token = None;

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "username" => username = Some(value.into_owned()),
            "messengerid" => token = Some(value.into_owned()),
            _ => {}
        }
    }

    Some((username?, token?))
}

// ============================================================================
// Tests
// ============================================================================
