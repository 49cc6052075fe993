//! Persistent reconnecting messenger client.
//!
//! One `MessengerClient` lives in every web worker process. It keeps a
//! single TCP connection to the messenger server alive in a background
//! task and exposes a non-blocking [`send`](MessengerClient::send):
//! callers only ever enqueue, the network task does all I/O.
//!
//! # State Machine
//!
//! ```text
//! Idle ──send()──► Starting ──connected──► Connected
//!   ▲                  ▲                       │
//!   │                  └──────connection lost──┘
//!   └───────── disconnect() via Stopping ◄─────┘
//! ```
//!
//! A failed connect attempt discards everything queued so far and
//! retries after a fixed delay, forever, until explicitly stopped.
//! Inbound frames are decoded and parked in a local queue for protocol
//! symmetry; nothing in the relay consumes them.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::config::MessengerConfig;
use crate::protocol::{
    AuthSession, CacheInvalidation, CommandType, Frame, FrameBuffer, Presence, frame,
};

// ============================================================================
// Constants
// ============================================================================

/// Socket read chunk size.
const READ_CHUNK_SIZE: usize = 4096;

// ============================================================================
// ClientState
// ============================================================================

/// Lifecycle states of the background connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    /// No background task running.
    Idle = 0,
    /// Task started, connection not yet established.
    Starting = 1,
    /// Connected to the messenger server.
    Connected = 2,
    /// Stop requested; task winding down.
    Stopping = 3,
}

impl ClientState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Connected,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

// ============================================================================
// MessengerClient
// ============================================================================

/// Reconnecting client embedded in each web worker.
///
/// # Example
///
/// ```ignore
/// let client = MessengerClient::new(&config);
/// client.send_invalidation("party", "rec42");
/// ```
pub struct MessengerClient {
    /// Server address to connect to.
    connect_addr: SocketAddr,

    /// Delay between reconnect attempts.
    reconnect_delay: Duration,

    /// Current [`ClientState`].
    state: AtomicU8,

    /// Pending outbound frames (FIFO).
    outbound: Mutex<VecDeque<Frame>>,

    /// Wakes the network task when outbound frames are queued.
    outbound_pending: Notify,

    /// Decoded inbound frames; kept for protocol symmetry.
    inbound: Mutex<Vec<Frame>>,

    /// Wakes the network task for cooperative stop.
    stop: Notify,

    /// Background task handle.
    task: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// MessengerClient - Constructor
// ============================================================================

impl MessengerClient {
    /// Creates an idle client; no task runs until the first send.
    #[must_use]
    pub fn new(config: &MessengerConfig) -> Arc<Self> {
        Arc::new(Self {
            connect_addr: config.connect_addr,
            reconnect_delay: config.reconnect_delay,
            state: AtomicU8::new(ClientState::Idle as u8),
            outbound: Mutex::new(VecDeque::new()),
            outbound_pending: Notify::new(),
            inbound: Mutex::new(Vec::new()),
            stop: Notify::new(),
            task: Mutex::new(None),
        })
    }
}

// ============================================================================
// MessengerClient - Public API
// ============================================================================

impl MessengerClient {
    /// Enqueues a frame and lazily starts the connection task.
    ///
    /// Never blocks on network I/O and never fails: delivery is
    /// best-effort by design, queued frames are dropped whenever a
    /// connect attempt fails.
    pub fn send(self: &Arc<Self>, command: CommandType, payload: Value) {
        self.outbound.lock().push_back(Frame::new(command, payload));
        self.outbound_pending.notify_one();
        self.ensure_started();
    }

    /// Sends a cache invalidation event.
    pub fn send_invalidation(self: &Arc<Self>, category: &str, name: &str) {
        let payload = serde_json::to_value(CacheInvalidation::new(category, name))
            .unwrap_or(Value::Null);
        self.send(CommandType::CacheInvalidation, payload);
    }

    /// Registers a waiting session for a freshly issued token.
    pub fn send_auth_session(self: &Arc<Self>, auth: &AuthSession) {
        let payload = serde_json::to_value(auth).unwrap_or(Value::Null);
        self.send(CommandType::AuthSession, payload);
    }

    /// Announces a user as online.
    pub fn send_online(self: &Arc<Self>, username: &str) {
        let payload = serde_json::to_value(Presence::new(username)).unwrap_or(Value::Null);
        self.send(CommandType::Online, payload);
    }

    /// Announces a user as offline.
    pub fn send_offline(self: &Arc<Self>, username: &str) {
        let payload = serde_json::to_value(Presence::new(username)).unwrap_or(Value::Null);
        self.send(CommandType::Offline, payload);
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns `true` iff the client is connected.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Number of frames waiting to be sent.
    #[inline]
    #[must_use]
    pub fn pending_outbound(&self) -> usize {
        self.outbound.lock().len()
    }

    /// Removes and returns all inbound frames received so far.
    #[must_use]
    pub fn drain_inbound(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.inbound.lock())
    }

    /// Requests a cooperative stop and waits for the task to finish.
    pub async fn disconnect(self: &Arc<Self>) {
        self.state
            .store(ClientState::Stopping as u8, Ordering::SeqCst);
        self.stop.notify_one();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.state.store(ClientState::Idle as u8, Ordering::SeqCst);
        debug!("Client stopped");
    }
}

// ============================================================================
// MessengerClient - Connection Task
// ============================================================================

impl MessengerClient {
    /// Starts the background task on the Idle → Starting transition.
    fn ensure_started(self: &Arc<Self>) {
        let started = self.state.compare_exchange(
            ClientState::Idle as u8,
            ClientState::Starting as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        if started.is_ok() {
            let client = Arc::clone(self);
            let handle = tokio::spawn(async move {
                client.run_loop().await;
            });
            *self.task.lock() = Some(handle);
            debug!(addr = %self.connect_addr, "Client task started");
        }
    }

    /// Connect/retry loop; runs until a stop is requested.
    async fn run_loop(self: Arc<Self>) {
        loop {
            if self.state() == ClientState::Stopping {
                break;
            }

            match TcpStream::connect(self.connect_addr).await {
                Ok(stream) => {
                    // A stop may have been requested while the connect
                    // was in flight; only Starting may become Connected.
                    let connected = self.state.compare_exchange(
                        ClientState::Starting as u8,
                        ClientState::Connected as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                    if connected.is_err() {
                        break;
                    }
                    info!(addr = %self.connect_addr, "Connected to messenger server");

                    self.connected_loop(stream).await;

                    if self.state() == ClientState::Stopping {
                        break;
                    }
                    self.state
                        .store(ClientState::Starting as u8, Ordering::SeqCst);
                    debug!("Connection lost, reconnecting");
                }
                Err(e) => {
                    // Pending frames are not retried across attempts.
                    let discarded = {
                        let mut outbound = self.outbound.lock();
                        let count = outbound.len();
                        outbound.clear();
                        count
                    };
                    debug!(
                        addr = %self.connect_addr,
                        error = %e,
                        discarded,
                        "Connect failed, retrying"
                    );

                    tokio::select! {
                        () = sleep(self.reconnect_delay) => {}
                        () = self.stop.notified() => {}
                    }
                }
            }
        }

        self.state.store(ClientState::Idle as u8, Ordering::SeqCst);
        debug!("Client task terminated");
    }

    /// I/O loop over one live connection.
    ///
    /// Mirrors the server connection loop minus dispatch: reads feed
    /// the frame buffer, decoded frames land in the inbound queue, and
    /// at most one outbound frame is sent per iteration.
    async fn connected_loop(&self, stream: TcpStream) {
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = FrameBuffer::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            if self.state() == ClientState::Stopping {
                let _ = writer.shutdown().await;
                return;
            }

            // One outbound frame per iteration, FIFO.
            let next = self.outbound.lock().pop_front();
            if let Some(frame) = next {
                let bytes = match frame.encode() {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "Outbound frame rejected");
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(&bytes).await {
                    warn!(error = %e, "Write failed");
                    return;
                }
                trace!(command = ?frame.command, "Frame sent");
            }

            if !self.outbound.lock().is_empty() {
                continue;
            }

            tokio::select! {
                result = reader.read(&mut chunk) => match result {
                    Ok(0) => {
                        debug!("Server closed connection");
                        return;
                    }
                    Ok(n) => {
                        buf.write(&chunk[..n]);
                        if !self.drain_into_inbound(&mut buf) {
                            return;
                        }
                    }
                    Err(e) if is_transient(&e) => {
                        trace!(error = %e, "Transient read error, skipped");
                    }
                    Err(e) => {
                        warn!(error = %e, "Read failed");
                        return;
                    }
                },
                () = self.outbound_pending.notified() => {}
                () = self.stop.notified() => {
                    let _ = writer.shutdown().await;
                    return;
                }
            }
        }
    }

    /// Decodes buffered frames into the inbound queue.
    ///
    /// Returns `false` on a wire-format violation; the connection is
    /// then dropped and reestablished.
    fn drain_into_inbound(&self, buf: &mut FrameBuffer) -> bool {
        loop {
            match frame::decode(buf) {
                Ok(Some(f)) => self.inbound.lock().push(f),
                Ok(None) => return true,
                Err(e) => {
                    warn!(error = %e, "Protocol violation from server");
                    return false;
                }
            }
        }
    }
}

/// Read errors that only skip the current iteration.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
    )
}

// ============================================================================
// Tests
// ============================================================================
