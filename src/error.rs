use thiserror::Error;

use crate::relay::JoinError;

/// Custom error types for the relay server
#[derive(Debug, Error)]
pub enum RelayError {
    /// Handshake errors
    #[error("Invalid handshake: {0}")]
    Handshake(String),

    #[error("Handshake not received within {0} seconds")]
    HandshakeTimeout(u64),

    #[error("Handshake exceeds {0} bytes")]
    HandshakeTooLarge(usize),

    /// Room errors
    #[error(transparent)]
    Join(#[from] JoinError),

    #[error("No viewer joined room {0} in time")]
    RendezvousTimeout(String),

    #[error("Room {0} closed before a viewer arrived")]
    RoomClosed(String),

    #[error("No free room code after {0} attempts")]
    CodeSpaceExhausted(usize),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Network errors
    #[error("Relay I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Status responder error: {0}")]
    StatusServer(#[from] warp::Error),
}

/// Convenience type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Helper to create handshake errors with context
    pub fn handshake(msg: impl Into<String>) -> Self {
        RelayError::Handshake(msg.into())
    }

    /// Helper to create configuration errors
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::InvalidConfiguration(msg.into())
    }

    /// Whether the peer should receive a structured error before the socket closes
    pub fn is_viewer_facing(&self) -> bool {
        matches!(self, RelayError::Join(_))
    }
}
