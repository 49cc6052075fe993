//! Relay lifecycle.
//!
//! [`MessengerService`] is the explicitly constructed entry point the
//! hosting application starts from its startup hook and stops on
//! shutdown — there are no process-wide globals. It owns the session
//! registry, the broadcast group, and the TCP server, and hands shared
//! references to whichever gateway consumes them.
//!
//! # Example
//!
//! ```ignore
//! let service = MessengerService::start(MessengerConfig::new()).await?;
//!
//! // ... hand service.registry() / service.broadcast() to the gateway ...
//!
//! service.run_until_signal().await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::signal;
use tracing::info;

use crate::config::MessengerConfig;
use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::transport::{BroadcastGroup, MessengerServer};

// ============================================================================
// MessengerService
// ============================================================================

/// Owns the relay's shared state and the running server.
pub struct MessengerService {
    config: MessengerConfig,
    registry: Arc<SessionRegistry>,
    broadcast: Arc<BroadcastGroup>,
    server: Arc<MessengerServer>,
}

impl MessengerService {
    /// Builds the shared state and starts the TCP server.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the listener cannot bind.
    pub async fn start(config: MessengerConfig) -> Result<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let broadcast = Arc::new(BroadcastGroup::new());
        let server =
            MessengerServer::start(&config, Arc::clone(&registry), Arc::clone(&broadcast)).await?;

        Ok(Self {
            config,
            registry,
            broadcast,
            server,
        })
    }

    /// Returns the active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    /// Shared session registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Shared broadcast group.
    #[inline]
    #[must_use]
    pub fn broadcast(&self) -> Arc<BroadcastGroup> {
        Arc::clone(&self.broadcast)
    }

    /// The running server.
    #[inline]
    #[must_use]
    pub fn server(&self) -> Arc<MessengerServer> {
        Arc::clone(&self.server)
    }

    /// Stops accepting and closes every connection.
    pub fn shutdown(&self) {
        self.server.shutdown();
    }

    /// Blocks until SIGINT or SIGTERM, then shuts down.
    ///
    /// The listener is closed before this returns so the hosting
    /// process can exit cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if signal handlers cannot be
    /// installed.
    pub async fn run_until_signal(&self) -> Result<()> {
        wait_for_signal().await?;
        info!("Termination signal received");
        self.shutdown();
        Ok(())
    }
}

// ============================================================================
// Signals
// ============================================================================

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal as unix_signal};

    let mut terminate = unix_signal(SignalKind::terminate())?;

    tokio::select! {
        result = signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    signal::ctrl_c().await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
