//! Relay configuration.
//!
//! Provides a type-safe interface for configuring the messenger server,
//! the embedded worker client, and the handshake token rules.
//!
//! # Example
//!
//! ```ignore
//! use messenger_relay::MessengerConfig;
//!
//! let config = MessengerConfig::new()
//!     .with_listen_addr("0.0.0.0:9999".parse()?)
//!     .with_token_length(64);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default port the messenger server listens on and clients connect to.
pub const DEFAULT_PORT: u16 = 8888;

/// Default length of the random value segment of a signed token.
pub const DEFAULT_TOKEN_LENGTH: usize = 50;

/// Default maximum age of a token signature (15s per handshake contract).
pub const DEFAULT_SIGNATURE_MAX_AGE: Duration = Duration::from_secs(15);

/// Default delay between client reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default bound on readiness waits in the server accept loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// MessengerConfig
// ============================================================================

/// Configuration for the messenger relay.
///
/// One instance covers all three roles: the server (listen side), the
/// per-worker client (connect side), and the signed-token handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessengerConfig {
    /// Address the server listens on.
    pub listen_addr: SocketAddr,

    /// Address worker clients connect to.
    pub connect_addr: SocketAddr,

    /// Length of the random value segment of issued tokens.
    pub token_length: usize,

    /// Maximum accepted age of a token signature.
    pub signature_max_age: Duration,

    /// Delay between client reconnect attempts.
    pub reconnect_delay: Duration,

    /// Bound on readiness waits in the accept loop.
    pub poll_interval: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl MessengerConfig {
    /// Creates a configuration with default settings.
    ///
    /// Server listens on `0.0.0.0:8888`, clients connect to
    /// `127.0.0.1:8888`.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            connect_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            token_length: DEFAULT_TOKEN_LENGTH,
            signature_max_age: DEFAULT_SIGNATURE_MAX_AGE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl MessengerConfig {
    /// Sets the server listen address.
    #[inline]
    #[must_use]
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Sets the client connect address.
    #[inline]
    #[must_use]
    pub fn with_connect_addr(mut self, addr: SocketAddr) -> Self {
        self.connect_addr = addr;
        self
    }

    /// Sets the token value length.
    #[inline]
    #[must_use]
    pub fn with_token_length(mut self, length: usize) -> Self {
        self.token_length = length;
        self
    }

    /// Sets the maximum token signature age.
    #[inline]
    #[must_use]
    pub fn with_signature_max_age(mut self, max_age: Duration) -> Self {
        self.signature_max_age = max_age;
        self
    }

    /// Sets the client reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the accept-loop poll interval.
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
