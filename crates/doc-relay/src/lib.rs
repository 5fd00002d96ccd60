//! # doc-relay
//!
//! A room-scoped change relay for collaborative editors.
//!
//! Clients open a WebSocket, join a document room and publish opaque change payloads.
//! Each change is forwarded verbatim to every other member of the sender's room. The
//! relay keeps no document state: it only tracks which connection is in which room.

pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;

#[cfg(feature = "axum")]
pub mod server;

// Re-exports for convenience
pub use config::Config;
pub use error::{RelayError, RelayResult};
pub use protocol::{ClientMessage, Framing, Payload, ServerMessage};
pub use relay::{BroadcastStats, ConnectionId, ConnectionRegistry, RoomBroadcaster};

#[cfg(feature = "axum")]
pub use server::{app, router_with_relay, RelayState, WebSocketHandler};
