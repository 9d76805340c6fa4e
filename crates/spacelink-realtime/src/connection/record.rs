//! Per-space connection record, state machine states, and status snapshots.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use spacelink_core::types::SpaceId;

use crate::error::RealtimeError;
use crate::session::Session;

use super::heartbeat::HeartbeatMonitor;
use super::reconnect::ReconnectController;

/// Lifecycle state of one connection.
///
/// `connecting → connected → disconnected → connecting (retry) → connected | gave_up`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Handshake in flight.
    Connecting,
    /// Transport open, heartbeat active.
    Connected,
    /// Transport lost; a retry may be pending.
    Disconnected,
    /// Reconnection attempts exhausted. Terminal.
    GaveUp,
}

impl ConnectionState {
    /// Converts to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::GaveUp => "gave_up",
        }
    }

    /// Whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::GaveUp)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of connection info (serializable)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Space
    pub space_id: SpaceId,
    /// Lifecycle state
    pub state: ConnectionState,
    /// Consecutive reconnection attempts since the last successful connect
    pub reconnect_attempts: u32,
    /// Most recent failure
    pub last_error: Option<String>,
    /// Latest heartbeat round trip
    pub latency: Option<Duration>,
    /// When the current transport was established
    pub connected_at: Option<DateTime<Utc>>,
}

/// Lifecycle notification published by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// Space the event concerns.
    pub space_id: SpaceId,
    /// What happened.
    pub kind: LifecycleKind,
}

/// Kinds of lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleKind {
    /// A handshake started; `attempt` is 0 for the initial attach.
    Connecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// The handshake completed.
    Connected,
    /// The transport was lost or a handshake failed.
    Disconnected {
        /// Why.
        reason: String,
    },
    /// A retry was armed.
    ReconnectScheduled {
        /// Attempt the timer fires for.
        attempt: u32,
        /// Backoff delay.
        delay: Duration,
    },
    /// Attempts exhausted; no further retries.
    GaveUp {
        /// Attempts made.
        attempts: u32,
    },
    /// The space was detached.
    Detached,
}

/// Outcome of the first handshake of an attachment; `None` while in flight.
pub(crate) type AttachOutcome = Option<Result<(), RealtimeError>>;

/// The connection of one space. Owned by the manager's registry.
#[derive(Debug)]
pub(crate) struct ConnectionRecord {
    /// Distinguishes this attachment from earlier ones of the same space.
    pub attach_id: Uuid,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub latency: Option<Duration>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Writer side of the live transport; `None` unless connected.
    pub outbound: Option<mpsc::Sender<String>>,
    pub heartbeat: Option<Arc<HeartbeatMonitor>>,
    pub reconnect: Arc<ReconnectController>,
    /// Stops the driver and inbound pump of this attachment.
    pub cancel: CancellationToken,
    pub session: Session,
    /// Resolves once the first handshake settles; shared by concurrent attaches.
    pub ready: watch::Receiver<AttachOutcome>,
}

impl ConnectionRecord {
    pub fn status(&self, space_id: &SpaceId) -> ConnectionStatus {
        ConnectionStatus {
            space_id: space_id.clone(),
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            last_error: self.last_error.clone(),
            latency: self.latency,
            connected_at: self.connected_at,
        }
    }

    /// Cancels timers and tasks and drops the transport writer.
    pub fn release(&mut self) {
        self.cancel.cancel();
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        self.reconnect.cancel();
        self.outbound = None;
    }
}
