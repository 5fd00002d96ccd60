use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ConnectionId, MessageSender};
use crate::{RelayError, RelayResult};

struct ConnectionEntry {
    sender: MessageSender,
    room: Option<String>,
}

/// Connection table plus the room index derived from it.
///
/// Both maps live behind the same lock so a member is never visible in a room
/// after its connection entry is gone.
#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn remove_member(&mut self, id: &ConnectionId, room_id: &str) {
        if let Some(members) = self.rooms.get_mut(room_id) {
            members.remove(id);
            if members.is_empty() {
                self.rooms.remove(room_id);
            }
        }
    }

    fn recipients(&self, room_id: &str, except: ConnectionId) -> Vec<Recipient> {
        let Some(members) = self.rooms.get(room_id) else {
            return Vec::new();
        };

        members
            .iter()
            .filter(|id| **id != except)
            .filter_map(|id| {
                self.connections.get(id).map(|entry| Recipient {
                    id: *id,
                    sender: entry.sender.clone(),
                })
            })
            .collect()
    }
}

/// A room member that should receive a broadcast
pub(crate) struct Recipient {
    pub(crate) id: ConnectionId,
    pub(crate) sender: MessageSender,
}

/// Tracks live connections and the single room each one has joined
///
/// The registry is the only shared mutable state of the relay. Every operation takes
/// the lock once and finishes its mutation before releasing it.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    max_room_id_len: Option<usize>,
}

impl ConnectionRegistry {
    /// Create an empty registry that accepts any non-empty room id
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            max_room_id_len: None,
        }
    }

    /// Create an empty registry that also rejects room ids longer than `max_room_id_len` bytes
    pub fn with_max_room_id_len(max_room_id_len: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            max_room_id_len: Some(max_room_id_len),
        }
    }

    /// Admit a new connection with no room membership
    pub async fn connect(&self, sender: MessageSender) -> ConnectionId {
        let id = ConnectionId::new();
        self.state.write().await.connections.insert(
            id,
            ConnectionEntry {
                sender,
                room: None,
            },
        );
        info!("Registered connection: {}", id);
        id
    }

    /// Check a room id before it is used as a key
    pub fn validate_room_id(&self, room_id: &str) -> RelayResult<()> {
        if room_id.is_empty() {
            return Err(RelayError::InvalidRoom {
                room_id: room_id.to_string(),
                reason: "room id is empty".to_string(),
            });
        }

        if let Some(max_len) = self.max_room_id_len {
            if room_id.len() > max_len {
                return Err(RelayError::InvalidRoom {
                    room_id: room_id.chars().take(32).collect(),
                    reason: format!("room id exceeds {} bytes", max_len),
                });
            }
        }

        Ok(())
    }

    /// Put a connection into a room, leaving the room it was in before
    ///
    /// Returns `false` when the connection already was a member of `room_id`.
    pub async fn join_room(&self, id: ConnectionId, room_id: &str) -> RelayResult<bool> {
        self.validate_room_id(room_id)?;

        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&id)
            .ok_or_else(|| RelayError::ConnectionNotFound { id: id.to_string() })?;

        if entry.room.as_deref() == Some(room_id) {
            debug!("Connection {} already in room '{}'", id, room_id);
            return Ok(false);
        }

        let previous = entry.room.replace(room_id.to_string());
        if let Some(previous) = previous {
            state.remove_member(&id, &previous);
            debug!("Connection {} left room '{}'", id, previous);
        }

        state
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(id);

        info!("Connection {} joined room '{}'", id, room_id);
        Ok(true)
    }

    /// Clear a connection's room membership
    ///
    /// Returns the room it left, if any.
    pub async fn leave_room(&self, id: ConnectionId) -> Option<String> {
        let mut state = self.state.write().await;
        let previous = state.connections.get_mut(&id)?.room.take()?;
        state.remove_member(&id, &previous);

        info!("Connection {} left room '{}'", id, previous);
        Some(previous)
    }

    /// Remove a connection and its membership
    ///
    /// Returns `false` if the connection was not registered, which makes repeated
    /// calls harmless.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let mut state = self.state.write().await;
        let removed = state.connections.remove(&id);

        match removed {
            Some(entry) => {
                if let Some(room_id) = entry.room {
                    state.remove_member(&id, &room_id);
                }
                info!("Unregistered connection: {}", id);
                true
            }
            None => {
                debug!("Attempted to unregister unknown connection: {}", id);
                false
            }
        }
    }

    /// The room a connection is currently in
    pub async fn room_of(&self, id: ConnectionId) -> Option<String> {
        self.state
            .read()
            .await
            .connections
            .get(&id)
            .and_then(|entry| entry.room.clone())
    }

    /// Connections currently in a room
    pub async fn room_members(&self, room_id: &str) -> Vec<ConnectionId> {
        self.state
            .read()
            .await
            .rooms
            .get(room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.state.read().await.connections.contains_key(&id)
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Number of rooms with at least one member
    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    /// Snapshot of everyone in `room_id` except `except`
    pub(crate) async fn recipients(&self, room_id: &str, except: ConnectionId) -> Vec<Recipient> {
        self.state.read().await.recipients(room_id, except)
    }

    /// The sender's current room and everyone else in it, taken from one snapshot
    pub(crate) async fn room_recipients(
        &self,
        sender: ConnectionId,
    ) -> Option<(String, Vec<Recipient>)> {
        let state = self.state.read().await;
        let room_id = state.connections.get(&sender)?.room.clone()?;
        let recipients = state.recipients(&room_id, sender);
        Some((room_id, recipients))
    }

    /// Drop every connection and room, returning how many connections were removed
    ///
    /// Dropping the senders ends each connection's outbound stream.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.write().await;
        let count = state.connections.len();
        state.connections.clear();
        state.rooms.clear();

        info!("Cleared registry, dropped {} connections", count);
        count
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
