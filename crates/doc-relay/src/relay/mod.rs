pub mod broadcaster;
pub mod connection;
pub mod registry;

pub use broadcaster::{BroadcastStats, RoomBroadcaster};
pub use connection::{ConnectionId, MessageSender};
pub use registry::ConnectionRegistry;
