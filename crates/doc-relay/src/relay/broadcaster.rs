use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::registry::Recipient;
use super::{ConnectionId, ConnectionRegistry};
use crate::protocol::{Payload, ServerMessage};

/// Counters describing relay traffic since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    /// Changes accepted for fan-out
    pub messages_relayed: u64,
    /// Copies handed to a recipient channel
    pub deliveries: u64,
    /// Copies dropped because the recipient channel was closed
    pub deliveries_failed: u64,
}

#[derive(Default)]
struct AtomicBroadcastStats {
    messages_relayed: AtomicU64,
    deliveries: AtomicU64,
    deliveries_failed: AtomicU64,
}

/// Fans a change out to every other member of a room
///
/// Holds no membership of its own; each call works on a snapshot of the registry.
pub struct RoomBroadcaster {
    registry: Arc<ConnectionRegistry>,
    stats: AtomicBroadcastStats,
}

impl RoomBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: AtomicBroadcastStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver `payload` to everyone in `room_id` except `sender`
    ///
    /// Returns the number of recipients the change was handed to. A room with no
    /// other members is not an error.
    pub async fn broadcast_change(
        &self,
        sender: ConnectionId,
        room_id: &str,
        payload: Payload,
    ) -> usize {
        let recipients = self.registry.recipients(room_id, sender).await;
        self.deliver(sender, room_id, recipients, payload)
    }

    /// Deliver `payload` to the other members of whatever room `sender` is in
    pub async fn relay_change(&self, sender: ConnectionId, payload: Payload) -> usize {
        match self.registry.room_recipients(sender).await {
            Some((room_id, recipients)) => self.deliver(sender, &room_id, recipients, payload),
            None => {
                debug!(
                    "Connection {} sent changes without joining a room, dropping",
                    sender
                );
                0
            }
        }
    }

    fn deliver(
        &self,
        sender: ConnectionId,
        room_id: &str,
        recipients: Vec<Recipient>,
        payload: Payload,
    ) -> usize {
        self.stats.messages_relayed.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Relaying {} byte change from {} to {} member(s) of room '{}'",
            payload.len(),
            sender,
            recipients.len(),
            room_id
        );

        if recipients.is_empty() {
            return 0;
        }

        let message = ServerMessage::ReceiveChanges { payload };
        let mut delivered = 0;

        for recipient in recipients {
            if recipient.sender.send(message.clone()).is_err() {
                warn!("Failed to send change to connection {}", recipient.id);
                self.stats.deliveries_failed.fetch_add(1, Ordering::Relaxed);
            } else {
                delivered += 1;
            }
        }

        self.stats
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Snapshot of the traffic counters
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_relayed: self.stats.messages_relayed.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            deliveries_failed: self.stats.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}
