//! Messenger TCP server.
//!
//! Accepts persistent connections from application-server processes
//! and spawns one connection task per peer.
//!
//! # Connection Flow
//!
//! 1. A web worker's [`MessengerClient`](super::MessengerClient)
//!    connects to the listen address (default `0.0.0.0:8888`)
//! 2. The worker streams length-prefixed frames; the server decodes
//!    and dispatches them (registry registrations, broadcasts)
//! 3. A clean disconnect or protocol violation tears down only that
//!    connection; reconnecting is the client's responsibility

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::MessengerConfig;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Frame;
use crate::registry::SessionRegistry;

use super::BroadcastGroup;
use super::connection::{self, Dispatcher};

// ============================================================================
// MessengerServer
// ============================================================================

/// The relay's TCP server.
///
/// Holds the live connection set so frames can be pushed to individual
/// application servers, and owns the shutdown signal observed by the
/// accept loop and every connection task.
pub struct MessengerServer {
    /// Address the listener is bound to.
    local_addr: SocketAddr,

    /// Outbound channels of live connections.
    connections: Mutex<FxHashMap<ConnectionId, mpsc::UnboundedSender<Frame>>>,

    /// Dispatch shared by all connections.
    dispatcher: Dispatcher,

    /// Accept-loop poll bound.
    poll_interval: Duration,

    /// Shutdown flag for the accept loop.
    shutdown: AtomicBool,

    /// Shutdown signal for connection tasks.
    shutdown_tx: watch::Sender<bool>,
}

// ============================================================================
// MessengerServer - Constructor
// ============================================================================

impl MessengerServer {
    /// Binds the listener and starts the accept loop.
    ///
    /// Use port 0 in `config.listen_addr` to let the OS pick a port;
    /// the bound address is available via [`Self::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn start(
        config: &MessengerConfig,
        registry: Arc<SessionRegistry>,
        broadcast: Arc<BroadcastGroup>,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, _) = watch::channel(false);

        let server = Arc::new(Self {
            local_addr,
            connections: Mutex::new(FxHashMap::default()),
            dispatcher: Dispatcher::new(registry, broadcast),
            poll_interval: config.poll_interval,
            shutdown: AtomicBool::new(false),
            shutdown_tx,
        });

        let accept_server = Arc::clone(&server);
        tokio::spawn(async move {
            accept_server.accept_loop(listener).await;
        });

        info!(addr = %local_addr, "Messenger server started");
        Ok(server)
    }
}

// ============================================================================
// MessengerServer - Public API
// ============================================================================

impl MessengerServer {
    /// Returns the bound listen address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live application-server connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// IDs of the live connections, unordered.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.lock().keys().copied().collect()
    }

    /// Queues a frame for one connection.
    ///
    /// Frames are sent FIFO, one per connection-loop iteration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection is gone.
    pub fn send_to(&self, id: ConnectionId, frame: Frame) -> Result<()> {
        let connections = self.connections.lock();
        let sender = connections.get(&id).ok_or(Error::ConnectionClosed)?;
        sender.send(frame).map_err(|_| Error::ConnectionClosed)
    }

    /// Shuts down the server: stops accepting and closes every
    /// connection.
    pub fn shutdown(&self) {
        info!(addr = %self.local_addr, "Messenger server shutting down");

        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let dropped = {
            let mut connections = self.connections.lock();
            let count = connections.len();
            connections.clear();
            count
        };

        if dropped > 0 {
            debug!(count = dropped, "Connections dropped during shutdown");
        }
    }
}

// ============================================================================
// MessengerServer - Accept Loop
// ============================================================================

impl MessengerServer {
    /// Background task accepting new connections.
    ///
    /// The accept wait is bounded so the shutdown flag is observed
    /// even while idle.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            match timeout(self.poll_interval, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    self.spawn_connection(stream, addr);
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => {
                    // Readiness wait elapsed; re-check the shutdown flag.
                    continue;
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Registers and spawns the task for one accepted connection.
    fn spawn_connection(self: &Arc<Self>, stream: tokio::net::TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(?addr, error = %e, "set_nodelay failed");
        }

        let id = ConnectionId::next();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.connections.lock().insert(id, outbound_tx);

        info!(id = %id, ?addr, "Connection accepted");

        let server = Arc::clone(self);
        let dispatcher = server.dispatcher.clone();
        let shutdown_rx = server.shutdown_tx.subscribe();

        tokio::spawn(async move {
            connection::run(id, stream, addr, outbound_rx, shutdown_rx, dispatcher).await;
            server.connections.lock().remove(&id);
            debug!(id = %id, "Connection removed");
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
