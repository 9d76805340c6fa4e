//! Error taxonomy of the real-time layer.

use std::time::Duration;

use thiserror::Error;

use spacelink_core::error::{AppError, ErrorKind};
use spacelink_core::types::SpaceId;

use crate::message::payload::RemoteError;

/// Errors produced by connections and sessions.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    /// The transport handshake did not complete within the configured timeout.
    #[error("handshake did not complete within {timeout:?}")]
    HandshakeTimeout {
        /// The configured handshake timeout.
        timeout: Duration,
    },
    /// The transport failed to open, closed remotely, or hit a local I/O error.
    #[error("transport error: {0}")]
    Transport(String),
    /// A frame was sent while no live transport exists for the space.
    #[error("space {space_id} has no live connection")]
    NotConnected {
        /// Target space.
        space_id: SpaceId,
    },
    /// A session operation was attempted while the session is disconnected.
    #[error("session for space {space_id} is not connected")]
    SessionDisconnected {
        /// Session's space.
        space_id: SpaceId,
    },
    /// An inbound frame or payload could not be decoded.
    #[error("malformed frame: {0}")]
    MessageDecode(String),
    /// Reconnection attempts were exhausted.
    #[error("gave up after {attempts} reconnection attempts")]
    GiveUp {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// The server reported an error frame.
    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(RemoteError),
    /// The space was detached while an attach was still in flight.
    #[error("space {space_id} was detached")]
    Detached {
        /// Detached space.
        space_id: SpaceId,
    },
}

impl RealtimeError {
    /// Whether the reconnection machinery recovers from this condition on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::HandshakeTimeout { .. } | Self::Transport(_))
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::MessageDecode(err.to_string())
    }
}

impl From<RealtimeError> for AppError {
    fn from(err: RealtimeError) -> Self {
        let kind = match &err {
            RealtimeError::HandshakeTimeout { .. }
            | RealtimeError::Transport(_)
            | RealtimeError::NotConnected { .. }
            | RealtimeError::GiveUp { .. }
            | RealtimeError::Detached { .. } => ErrorKind::Connection,
            RealtimeError::SessionDisconnected { .. } => ErrorKind::Session,
            RealtimeError::MessageDecode(_) => ErrorKind::Serialization,
            RealtimeError::Remote(_) => ErrorKind::Remote,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}
