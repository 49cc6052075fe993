//! Wire protocol: framing, byte accumulation, payload schemas.
//!
//! Every message between a web worker and the messenger server is one
//! length-prefixed binary frame carrying a UTF-8 JSON payload:
//!
//! ```text
//! ┌────────┬─────────┬────────────────┬──────────────────┐
//! │ 0x00   │ command │ length (u16 LE)│ JSON payload     │
//! │ 1 byte │ 1 byte  │ 2 bytes        │ `length` bytes   │
//! └────────┴─────────┴────────────────┴──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `buffer` | Byte accumulator assembling frames from socket reads |
//! | `frame` | Frame type, command discriminators, encode/decode |
//! | `message` | Typed payload schemas and the broadcast envelope |

// ============================================================================
// Submodules
// ============================================================================

/// Byte accumulator for frame reassembly.
pub mod buffer;

/// Frame encoding and incremental decoding.
pub mod frame;

/// Typed payload schemas.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use buffer::FrameBuffer;
pub use frame::{CommandType, Frame, HEADER_SIZE, MAX_PAYLOAD_SIZE, decode, encode};
pub use message::{AuthSession, BroadcastEnvelope, CacheInvalidation, Presence};
