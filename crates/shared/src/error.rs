//! Error types for the realtime layer

use thiserror::Error;

use crate::types::ConnectionId;

/// Failure taxonomy for presence and event fanout
///
/// None of these are fatal to the hosting process: the worst outcome is a
/// single connection being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    /// Handshake rejected; the connection is closed and not retried.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Subscribe to a topic the connection may not see; request ignored.
    #[error("Not authorized for topic {topic}")]
    Authorization { topic: String },

    /// One recipient could not be reached; logged and swallowed.
    #[error("Delivery to {connection_id} failed: {reason}")]
    Delivery {
        connection_id: ConnectionId,
        reason: String,
    },

    /// Connection-level failure; triggers unregister.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Unknown role: {0}")]
    InvalidRole(String),
}

impl RealtimeError {
    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION_FAILED",
            Self::Authorization { .. } => "FORBIDDEN_TOPIC",
            Self::Delivery { .. } => "DELIVERY_FAILED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::InvalidTopic(_) => "INVALID_TOPIC",
            Self::InvalidRole(_) => "INVALID_ROLE",
        }
    }
}
