//! TCP transport layer.
//!
//! This module carries frames between web workers and the messenger
//! server, and fans broadcasts out to bound browser channels.
//!
//! ```text
//! ┌──────────────┐                      ┌──────────────────┐
//! │ web worker   │   framed TCP         │ MessengerServer  │
//! │ Messenger-   │─────────────────────►│  decode/dispatch │
//! │ Client       │   localhost:8888     │        │         │
//! └──────────────┘                      │        ▼         │
//!      (one per process,               │  BroadcastGroup  │──► bound
//!       auto-reconnecting)             └──────────────────┘    channels
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `broadcast` | Default broadcast group fan-out |
//! | `client` | Reconnecting per-worker client |
//! | `connection` | Server-side per-connection loop (internal) |
//! | `server` | Accept loop and connection lifecycle |

// ============================================================================
// Submodules
// ============================================================================

/// Broadcast group fan-out.
pub mod broadcast;

/// Persistent reconnecting messenger client.
pub mod client;

/// Per-connection read/parse/dispatch/send loop.
pub(crate) mod connection;

/// Messenger TCP server.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use broadcast::{BroadcastGroup, DEFAULT_GROUP, ReplySender};
pub use client::{ClientState, MessengerClient};
pub use server::MessengerServer;
