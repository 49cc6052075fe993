//! Messenger relay - real-time notification fan-out for web applications.
//!
//! This library propagates cache-invalidation and presence events from
//! any application-server process to every connected browser, and
//! binds a browser's WebSocket connection to an authenticated web
//! session through a short-lived signed token.
//!
//! # Architecture
//!
//! ```text
//! web worker ──MessengerClient──► MessengerServer ──BroadcastGroup──► browsers
//!                (framed TCP)        │
//!                                    ▼
//!                              SessionRegistry ◄── Handshake ◄── WebSocket
//!                                                               gateway
//! ```
//!
//! Key design principles:
//!
//! - One background task per connection; callers never touch sockets
//! - [`MessengerClient::send`] is non-blocking and best-effort: a
//!   failed connect discards the queue and retries forever
//! - Session binding is a one-shot state machine: a waiting session
//!   promotes at most once, inside its validity window
//! - Protocol failures never cross connection boundaries
//!
//! # Quick Start
//!
//! ```no_run
//! use messenger_relay::{MessengerConfig, MessengerService, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let service = MessengerService::start(MessengerConfig::new()).await?;
//!     service.run_until_signal().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Relay configuration and defaults |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`handshake`] | WebSocket handshake validation glue |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire framing and payload schemas |
//! | [`registry`] | Waiting/bound session state machine |
//! | [`service`] | Start/stop lifecycle and signal handling |
//! | [`token`] | Signed handshake tokens |
//! | [`transport`] | TCP server, client and broadcast fan-out |

// ============================================================================
// Modules
// ============================================================================

/// Relay configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// WebSocket handshake validation glue.
pub mod handshake;

/// Type-safe identifiers for relay entities.
pub mod identifiers;

/// Wire protocol: framing, byte accumulation, payload schemas.
pub mod protocol;

/// Session registry: the waiting → bound state machine.
pub mod registry;

/// Relay lifecycle.
pub mod service;

/// Signed handshake tokens.
pub mod token;

/// TCP transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::MessengerConfig;

// Error types
pub use error::{Error, Result};

// Handshake types
pub use handshake::{AuthBackend, Handshake, HandshakeReply};

// Identifier types
pub use identifiers::{ChannelId, ConnectionId};

// Protocol types
pub use protocol::{AuthSession, CacheInvalidation, CommandType, Frame, FrameBuffer, Presence};

// Registry types
pub use registry::{Session, SessionRegistry};

// Service types
pub use service::MessengerService;

// Token types
pub use token::TokenSigner;

// Transport types
pub use transport::{BroadcastGroup, ClientState, MessengerClient, MessengerServer, ReplySender};
