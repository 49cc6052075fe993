//! Per-connection read/parse/dispatch/send loop.
//!
//! Each accepted application-server connection gets one task running
//! [`run`]. The loop interleaves three concerns per iteration:
//!
//! - drain socket reads into the connection's [`FrameBuffer`]
//! - decode and dispatch every complete inbound frame, in receipt order
//! - send at most one pending outbound frame (FIFO)
//!
//! A clean zero-byte read or a wire-format violation closes only this
//! connection; one malformed peer never affects the others. A final
//! parse and dispatch pass flushes buffered data before teardown.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashSet;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::identifiers::ConnectionId;
use crate::protocol::{
    AuthSession, BroadcastEnvelope, CacheInvalidation, CommandType, Frame, FrameBuffer, frame,
};
use crate::registry::SessionRegistry;

use super::BroadcastGroup;

// ============================================================================
// Constants
// ============================================================================

/// Socket read chunk size.
const READ_CHUNK_SIZE: usize = 4096;

// ============================================================================
// Dispatcher
// ============================================================================

/// Command dispatch shared by every server connection.
///
/// One arm per [`CommandType`]; adding behavior for a command never
/// touches the parse loop.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    registry: Arc<SessionRegistry>,
    broadcast: Arc<BroadcastGroup>,
}

impl Dispatcher {
    /// Creates a dispatcher over the shared registry and group.
    pub(crate) fn new(registry: Arc<SessionRegistry>, broadcast: Arc<BroadcastGroup>) -> Self {
        Self {
            registry,
            broadcast,
        }
    }

    /// Dispatches one batch of frames in receipt order.
    ///
    /// Invalidations are de-duplicated by `(category, name)` within
    /// the batch: only the first occurrence broadcasts.
    pub(crate) fn dispatch_batch(&self, frames: Vec<Frame>) {
        let mut seen = FxHashSet::default();

        for frame in frames {
            match frame.command {
                CommandType::CacheInvalidation => self.on_invalidation(frame.payload, &mut seen),
                CommandType::AuthSession => self.on_auth_session(frame.payload),
                CommandType::Online | CommandType::Offline => {
                    self.on_presence(frame.command, frame.payload);
                }
            }
        }
    }

    /// Broadcasts one invalidation per unique key per batch.
    fn on_invalidation(&self, payload: serde_json::Value, seen: &mut FxHashSet<String>) {
        let invalidation = match serde_json::from_value::<CacheInvalidation>(payload.clone()) {
            Ok(inv) => inv,
            Err(e) => {
                warn!(error = %e, "Invalidation payload missing category/name, dropped");
                return;
            }
        };

        if !seen.insert(invalidation.dedup_key()) {
            trace!(key = %invalidation.dedup_key(), "Duplicate invalidation in batch, skipped");
            return;
        }

        let envelope = BroadcastEnvelope::new(CommandType::CacheInvalidation, payload);
        let delivered = self.broadcast.broadcast(&envelope.to_json());
        trace!(
            key = %invalidation.dedup_key(),
            delivered,
            "Invalidation broadcast"
        );
    }

    /// Registers a waiting session, overwriting any prior entry.
    fn on_auth_session(&self, payload: serde_json::Value) {
        let auth = match serde_json::from_value::<AuthSession>(payload.clone()) {
            Ok(auth) => auth,
            Err(e) => {
                warn!(error = %e, "Auth session payload malformed, dropped");
                return;
            }
        };

        self.registry.register_waiting(
            auth.username,
            auth.messengerid,
            Duration::from_secs(auth.validity),
            payload,
        );
    }

    /// Presence events are recognized but carry no behavior yet.
    fn on_presence(&self, command: CommandType, _payload: serde_json::Value) {
        trace!(command = command.name(), "Presence event received");
    }
}

// ============================================================================
// Connection Loop
// ============================================================================

/// Runs one connection to completion.
pub(crate) async fn run(
    id: ConnectionId,
    stream: TcpStream,
    addr: SocketAddr,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    mut shutdown_rx: watch::Receiver<bool>,
    dispatcher: Dispatcher,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = FrameBuffer::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut open = true;
    let mut violated = false;

    debug!(id = %id, ?addr, "Connection loop started");

    while open {
        tokio::select! {
            result = reader.read(&mut chunk) => match result {
                Ok(0) => {
                    debug!(id = %id, "Peer closed connection");
                    open = false;
                }
                Ok(n) => {
                    buf.write(&chunk[..n]);
                    let (frames, fatal) = drain_frames(id, &mut buf);
                    dispatcher.dispatch_batch(frames);
                    if fatal {
                        violated = true;
                        open = false;
                    }
                }
                Err(e) if is_transient(&e) => {
                    trace!(id = %id, error = %e, "Transient read error, skipped");
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Read failed");
                    open = false;
                }
            },

            maybe = outbound_rx.recv() => match maybe {
                Some(frame) => {
                    if !send_frame(id, &mut writer, &frame).await {
                        open = false;
                    }
                }
                None => {
                    debug!(id = %id, "Outbound channel closed");
                    open = false;
                }
            },

            _ = shutdown_rx.changed() => {
                debug!(id = %id, "Shutdown requested");
                open = false;
            }
        }
    }

    // Flush whatever complete frames are still buffered.
    if !violated {
        let (frames, _) = drain_frames(id, &mut buf);
        if !frames.is_empty() {
            debug!(id = %id, count = frames.len(), "Final dispatch pass");
            dispatcher.dispatch_batch(frames);
        }
    }

    debug!(id = %id, "Connection loop terminated");
}

/// Decodes every complete frame currently buffered.
///
/// Returns the frames plus a fatality flag: a wire-format violation
/// keeps the frames decoded before it but requires the connection to
/// close.
fn drain_frames(id: ConnectionId, buf: &mut FrameBuffer) -> (Vec<Frame>, bool) {
    let mut frames = Vec::new();
    loop {
        match frame::decode(buf) {
            Ok(Some(f)) => frames.push(f),
            Ok(None) => return (frames, false),
            Err(e) => {
                warn!(id = %id, error = %e, "Protocol violation, closing connection");
                return (frames, true);
            }
        }
    }
}

/// Sends one frame, full-buffer. Returns `false` on failure.
async fn send_frame(id: ConnectionId, writer: &mut OwnedWriteHalf, frame: &Frame) -> bool {
    let bytes = match frame.encode() {
        Ok(b) => b,
        Err(e) => {
            warn!(id = %id, error = %e, "Outbound frame rejected");
            return true;
        }
    };

    match writer.write_all(&bytes).await {
        Ok(()) => {
            trace!(id = %id, command = ?frame.command, "Frame sent");
            true
        }
        Err(e) => {
            warn!(id = %id, error = %e, "Write failed");
            false
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

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    use crate::identifiers::ChannelId;

    fn dispatcher() -> (Dispatcher, Arc<SessionRegistry>, Arc<BroadcastGroup>) {
        let registry = Arc::new(SessionRegistry::new());
        let broadcast = Arc::new(BroadcastGroup::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&broadcast));
        (dispatcher, registry, broadcast)
    }

    fn invalidation(category: &str, name: &str) -> Frame {
        Frame::new(
            CommandType::CacheInvalidation,
            json!({"category": category, "name": name}),
        )
    }

    #[test]
    fn test_batch_dedup_single_broadcast() {
        let (dispatcher, _registry, broadcast) = dispatcher();
        let (tx, mut rx) = unbounded_channel();
        broadcast.join(ChannelId::generate(), tx);

        dispatcher.dispatch_batch(vec![
            invalidation("party", "rec42"),
            invalidation("party", "rec42"),
        ]);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "duplicate must not broadcast");
    }

    #[test]
    fn test_distinct_keys_broadcast_separately() {
        let (dispatcher, _registry, broadcast) = dispatcher();
        let (tx, mut rx) = unbounded_channel();
        broadcast.join(ChannelId::generate(), tx);

        dispatcher.dispatch_batch(vec![
            invalidation("party", "rec42"),
            invalidation("party", "rec43"),
            invalidation("invoice", "rec42"),
        ]);

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn test_dedup_scope_is_one_batch() {
        let (dispatcher, _registry, broadcast) = dispatcher();
        let (tx, mut rx) = unbounded_channel();
        broadcast.join(ChannelId::generate(), tx);

        dispatcher.dispatch_batch(vec![invalidation("party", "rec42")]);
        dispatcher.dispatch_batch(vec![invalidation("party", "rec42")]);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok(), "new batch broadcasts again");
    }

    #[test]
    fn test_broadcast_envelope_carries_payload() {
        let (dispatcher, _registry, broadcast) = dispatcher();
        let (tx, mut rx) = unbounded_channel();
        broadcast.join(ChannelId::generate(), tx);

        dispatcher.dispatch_batch(vec![Frame::new(
            CommandType::CacheInvalidation,
            json!({"category": "party", "name": "rec42", "op": "write"}),
        )]);

        let text = rx.try_recv().expect("broadcast");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["command"], "cache_invalidation");
        assert_eq!(value["data"]["op"], "write");
    }

    #[test]
    fn test_auth_session_registers_waiting() {
        let (dispatcher, registry, _broadcast) = dispatcher();

        dispatcher.dispatch_batch(vec![Frame::new(
            CommandType::AuthSession,
            json!({"username": "alice", "messengerid": "tok-1", "validity": 15}),
        )]);

        assert_eq!(registry.waiting_count(), 1);
        let session = registry
            .promote("tok-1", ChannelId::generate(), "alice")
            .expect("promotable");
        assert_eq!(session.username, "alice");
    }

    #[test]
    fn test_malformed_payloads_dropped() {
        let (dispatcher, registry, broadcast) = dispatcher();
        let (tx, mut rx) = unbounded_channel();
        broadcast.join(ChannelId::generate(), tx);

        dispatcher.dispatch_batch(vec![
            Frame::new(CommandType::CacheInvalidation, json!({"category": "party"})),
            Frame::new(CommandType::AuthSession, json!({"username": "alice"})),
        ]);

        assert!(rx.try_recv().is_err());
        assert_eq!(registry.waiting_count(), 0);
    }

    #[test]
    fn test_presence_is_noop() {
        let (dispatcher, registry, broadcast) = dispatcher();
        let (tx, mut rx) = unbounded_channel();
        broadcast.join(ChannelId::generate(), tx);

        dispatcher.dispatch_batch(vec![
            Frame::new(CommandType::Online, json!({"username": "bob"})),
            Frame::new(CommandType::Offline, json!({"username": "bob"})),
        ]);

        assert!(rx.try_recv().is_err());
        assert_eq!(registry.waiting_count(), 0);
        assert_eq!(registry.bound_count(), 0);
    }

    #[test]
    fn test_drain_frames_keeps_frames_before_violation() {
        let id = ConnectionId::next();
        let mut buf = FrameBuffer::new();

        let good = invalidation("party", "rec42").encode().expect("encode");
        buf.write(&good);
        buf.write(&[0x99, 0, 0, 0]);

        let (frames, fatal) = drain_frames(id, &mut buf);
        assert_eq!(frames.len(), 1);
        assert!(fatal);
    }
}
