//! Broadcast group fan-out.
//!
//! All bound WebSocket sessions belong to the single `"default"`
//! group. Invalidation events are pushed as JSON text to every member's
//! reply channel; delivery is best-effort and unordered across
//! channels.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::identifiers::ChannelId;

// ============================================================================
// Constants
// ============================================================================

/// Name of the single broadcast group.
pub const DEFAULT_GROUP: &str = "default";

// ============================================================================
// Types
// ============================================================================

/// Sender half of one browser reply channel.
///
/// The WebSocket gateway owns the receiving half and forwards each
/// message to its browser as a text frame.
pub type ReplySender = mpsc::UnboundedSender<String>;

// ============================================================================
// BroadcastGroup
// ============================================================================

/// Membership and fan-out for the default broadcast group.
///
/// Thread-safe; joined from the handshake path and drained from the
/// server dispatch path concurrently.
#[derive(Debug, Default)]
pub struct BroadcastGroup {
    /// Live reply channels keyed by channel ID.
    channels: RwLock<FxHashMap<ChannelId, ReplySender>>,
}

impl BroadcastGroup {
    /// Creates an empty group.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reply channel to the group.
    ///
    /// A re-join under the same ID replaces the previous sender.
    pub fn join(&self, channel: ChannelId, sender: ReplySender) {
        self.channels.write().insert(channel, sender);
        debug!(channel = %channel, group = DEFAULT_GROUP, "Channel joined");
    }

    /// Removes a reply channel from the group.
    pub fn leave(&self, channel: ChannelId) {
        if self.channels.write().remove(&channel).is_some() {
            debug!(channel = %channel, group = DEFAULT_GROUP, "Channel left");
        }
    }

    /// Returns `true` if `channel` is a member.
    #[inline]
    #[must_use]
    pub fn contains(&self, channel: ChannelId) -> bool {
        self.channels.read().contains_key(&channel)
    }

    /// Number of member channels.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Returns `true` if the group has no members.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Sends `text` to every member channel.
    ///
    /// Channels whose receiver is gone are pruned. Returns the number
    /// of channels the message was delivered to.
    pub fn broadcast(&self, text: &str) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0;

        {
            let channels = self.channels.read();
            for (id, sender) in channels.iter() {
                if sender.send(text.to_string()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut channels = self.channels.write();
            for id in &dead {
                channels.remove(id);
            }
            debug!(pruned = dead.len(), "Dead reply channels pruned");
        }

        trace!(delivered, group = DEFAULT_GROUP, "Broadcast dispatched");
        delivered
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let group = BroadcastGroup::new();
        let id = ChannelId::generate();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(group.is_empty());
        group.join(id, tx);
        assert!(group.contains(id));
        assert_eq!(group.len(), 1);

        group.leave(id);
        assert!(!group.contains(id));
        assert!(group.is_empty());
    }

    #[test]
    fn test_broadcast_reaches_all_members() {
        let group = BroadcastGroup::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        group.join(ChannelId::generate(), tx_a);
        group.join(ChannelId::generate(), tx_b);

        let delivered = group.broadcast("{\"command\":\"cache_invalidation\"}");
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_prunes_dead_channels() {
        let group = BroadcastGroup::new();
        let live_id = ChannelId::generate();
        let dead_id = ChannelId::generate();

        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        drop(dead_rx);

        group.join(live_id, live_tx);
        group.join(dead_id, dead_tx);

        let delivered = group.broadcast("hello");
        assert_eq!(delivered, 1);
        assert_eq!(group.len(), 1);
        assert!(!group.contains(dead_id));
        assert_eq!(live_rx.try_recv().expect("delivered"), "hello");
    }

    #[test]
    fn test_rejoin_replaces_sender() {
        let group = BroadcastGroup::new();
        let id = ChannelId::generate();

        let (old_tx, old_rx) = mpsc::unbounded_channel();
        drop(old_rx);
        group.join(id, old_tx);

        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        group.join(id, new_tx);
        assert_eq!(group.len(), 1);

        assert_eq!(group.broadcast("msg"), 1);
        assert_eq!(new_rx.try_recv().expect("delivered"), "msg");
    }
}
