//! Common error types for vrcast.

use thiserror::Error;

/// Result type alias using vrcast's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for signaling and negotiation.
#[derive(Debug, Error)]
pub enum Error {
    /// Send attempted on a torn-down signaling channel.
    #[error("signaling channel closed")]
    ChannelClosed,

    /// A message arrived that the receiver does not expect in its current state,
    /// or it could not be understood at all.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The media engine rejected a description or a candidate.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The peer went away before negotiation completed.
    #[error("peer lost")]
    PeerLost,

    /// A paired session already has both members.
    #[error("session full: {0}")]
    SessionFull(String),

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying transport (WebSocket, TCP) failed
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error (file, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a protocol violation from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::ProtocolViolation(msg.to_string())
    }

    /// Create a negotiation failure from any displayable type.
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::NegotiationFailed(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a timeout error from any displayable type.
    pub fn timeout(msg: impl std::fmt::Display) -> Self {
        Self::Timeout(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
