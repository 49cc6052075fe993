//! Error types for the messenger relay.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use messenger_relay::{Result, MessengerService, MessengerConfig};
//!
//! async fn example() -> Result<()> {
//!     let service = MessengerService::start(MessengerConfig::new()).await?;
//!     service.run_until_signal().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidMarker`], [`Error::PayloadTooLarge`] |
//! | Token | [`Error::TokenMalformed`], [`Error::TokenSignature`], [`Error::TokenExpired`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when relay configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection failed or misbehaved.
    ///
    /// Returned when a TCP connection cannot be established or used.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed.
    ///
    /// Returned when the peer is gone or a send targets a dead connection.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation.
    ///
    /// Returned when a frame violates the wire format.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Invalid frame marker byte.
    ///
    /// The first byte of every frame must be `0x00`. A corrupt marker
    /// cannot be resynchronized, so the connection is terminated.
    #[error("Invalid frame marker: 0x{marker:02x}")]
    InvalidMarker {
        /// The marker byte that was received.
        marker: u8,
    },

    /// Payload exceeds the u16 length field.
    ///
    /// Returned at encode time when a payload cannot be framed.
    #[error("Payload too large: {length} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual payload length in bytes.
        length: usize,
        /// Maximum representable payload length.
        max: usize,
    },

    // ========================================================================
    // Token Errors
    // ========================================================================
    /// Signed token is structurally invalid.
    ///
    /// Returned when a token does not split into value, timestamp and
    /// signature segments.
    #[error("Token malformed: {message}")]
    TokenMalformed {
        /// Description of the malformation.
        message: String,
    },

    /// Signed token signature mismatch.
    #[error("Token signature mismatch")]
    TokenSignature,

    /// Signed token is older than the allowed maximum age.
    #[error("Token expired: age {age_secs}s exceeds max {max_age_secs}s")]
    TokenExpired {
        /// Age of the token in seconds.
        age_secs: u64,
        /// Maximum allowed age in seconds.
        max_age_secs: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid marker error.
    #[inline]
    pub fn invalid_marker(marker: u8) -> Self {
        Self::InvalidMarker { marker }
    }

    /// Creates a payload too large error.
    #[inline]
    pub fn payload_too_large(length: usize, max: usize) -> Self {
        Self::PayloadTooLarge { length, max }
    }

    /// Creates a malformed token error.
    #[inline]
    pub fn token_malformed(message: impl Into<String>) -> Self {
        Self::TokenMalformed {
            message: message.into(),
        }
    }

    /// Creates a token expired error.
    #[inline]
    pub fn token_expired(age_secs: u64, max_age_secs: u64) -> Self {
        Self::TokenExpired {
            age_secs,
            max_age_secs,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::Io(_)
        )
    }

    /// Returns `true` if this is a protocol error.
    ///
    /// Protocol errors terminate only the offending connection.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::InvalidMarker { .. } | Self::PayloadTooLarge { .. }
        )
    }

    /// Returns `true` if this is a token verification error.
    ///
    /// Token errors are always mapped to a handshake rejection,
    /// never surfaced to the browser.
    #[inline]
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::TokenMalformed { .. } | Self::TokenSignature | Self::TokenExpired { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing listen address");
        assert_eq!(
            err.to_string(),
            "Configuration error: missing listen address"
        );
    }

    #[test]
    fn test_invalid_marker_display() {
        let err = Error::invalid_marker(0x7f);
        assert_eq!(err.to_string(), "Invalid frame marker: 0x7f");
    }

    #[test]
    fn test_is_connection_error() {
        let conn_err = Error::connection("test");
        let closed_err = Error::ConnectionClosed;
        let other_err = Error::config("test");

        assert!(conn_err.is_connection_error());
        assert!(closed_err.is_connection_error());
        assert!(!other_err.is_connection_error());
    }

    #[test]
    fn test_is_protocol_error() {
        let marker_err = Error::invalid_marker(0x01);
        let size_err = Error::payload_too_large(70_000, 65_535);
        let other_err = Error::ConnectionClosed;

        assert!(marker_err.is_protocol_error());
        assert!(size_err.is_protocol_error());
        assert!(!other_err.is_protocol_error());
    }

    #[test]
    fn test_is_token_error() {
        let expired = Error::token_expired(16, 15);
        let signature = Error::TokenSignature;
        let other = Error::protocol("test");

        assert!(expired.is_token_error());
        assert!(signature.is_token_error());
        assert!(!other.is_token_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
