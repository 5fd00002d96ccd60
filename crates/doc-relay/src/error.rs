use thiserror::Error;

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur in relay operations
///
/// None of these are ever reported back to a client; the transport layer logs them
/// and carries on with the next frame.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Unknown event: {event}")]
    UnknownEvent { event: String },

    #[error("Invalid room id '{room_id}': {reason}")]
    InvalidRoom { room_id: String, reason: String },

    #[error("Connection not found: {id}")]
    ConnectionNotFound { id: String },

    #[error("Configuration error: {0}")]
    Config(#[from] envy::Error),
}
