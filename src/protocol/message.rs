//! Typed payload schemas.
//!
//! Payloads travel as JSON inside frames. The relay only inspects two
//! of them structurally — invalidations (for the de-duplication key)
//! and session registrations — so those get typed views; presence
//! events carry a bare username.
//!
//! # Schemas
//!
//! | Command | Payload |
//! |---------|---------|
//! | `CacheInvalidation` | `{"category": string, "name": string, ...}` |
//! | `AuthSession` | `{"username": string, "messengerid": string, "validity": seconds}` |
//! | `Online` / `Offline` | `{"username": string}` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::CommandType;

// ============================================================================
// CacheInvalidation
// ============================================================================

/// A cache invalidation event from a web worker.
///
/// `(category, name)` identifies the invalidated entity; any extra
/// fields are carried through to the browser untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInvalidation {
    /// Entity category (e.g. a model or cache namespace).
    pub category: String,

    /// Entity name within the category.
    pub name: String,

    /// Additional fields forwarded verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CacheInvalidation {
    /// Creates an invalidation with no extra fields.
    #[inline]
    #[must_use]
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }

    /// Returns the de-duplication key for one dispatch batch.
    #[inline]
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!("{}__{}", self.category, self.name)
    }
}

// ============================================================================
// AuthSession
// ============================================================================

/// A session registration from a web worker.
///
/// Sent when the web tier issues a signed token so the server can hold
/// a waiting session until the browser's WebSocket handshake claims it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Username the token was issued for.
    pub username: String,

    /// The signed handshake token.
    pub messengerid: String,

    /// Seconds the waiting session stays promotable.
    pub validity: u64,
}

impl AuthSession {
    /// Creates a session registration.
    #[inline]
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        messengerid: impl Into<String>,
        validity: u64,
    ) -> Self {
        Self {
            username: username.into(),
            messengerid: messengerid.into(),
            validity,
        }
    }
}

// ============================================================================
// Presence
// ============================================================================

/// A presence event (`Online` / `Offline`) from a web worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// User whose presence changed.
    pub username: String,
}

impl Presence {
    /// Creates a presence event.
    #[inline]
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

// ============================================================================
// BroadcastEnvelope
// ============================================================================

/// The JSON text pushed to every bound browser channel.
///
/// # Format
///
/// ```json
/// {"command": "cache_invalidation", "data": { ... }}
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastEnvelope {
    /// Command name (see [`CommandType::name`]).
    pub command: &'static str,

    /// Original payload, forwarded verbatim.
    pub data: Value,
}

impl BroadcastEnvelope {
    /// Wraps a payload for broadcast.
    #[inline]
    #[must_use]
    pub const fn new(command: CommandType, data: Value) -> Self {
        Self {
            command: command.name(),
            data,
        }
    }

    /// Serializes the envelope to JSON text.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

// ============================================================================
// Tests
// ============================================================================
