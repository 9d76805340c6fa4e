//! Typed session events.

use std::fmt;

use serde_json::Value;

use crate::error::RealtimeError;
use crate::message::envelope::Envelope;
use crate::message::payload::{ChangeRecord, CollaborationCursor, MemberEvent, PresenceInfo};

/// An event delivered to session listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The underlying connection became live.
    Connected,
    /// The underlying connection was lost.
    Disconnected {
        /// Why the connection was lost.
        reason: String,
    },
    /// The session was closed; no further events follow.
    Closed,
    /// A remote error, a malformed frame, or a give-up notification.
    Error(RealtimeError),
    /// A change record.
    Delta(ChangeRecord),
    /// A participant joined.
    MemberJoined(MemberEvent),
    /// A participant left; already removed from presence and cursor tables.
    MemberLeft(MemberEvent),
    /// Telemetry payload, unchanged.
    Telemetry(Value),
    /// A participant's cursor moved; already stored in the cursor table.
    CursorUpdate(CollaborationCursor),
    /// A participant's presence changed; already stored in the presence table.
    PresenceUpdate(PresenceInfo),
    /// A state snapshot.
    Snapshot(Value),
    /// An acknowledgement.
    Ack(Value),
    /// A server-initiated heartbeat.
    Heartbeat(Value),
    /// A reply to one of this client's heartbeat probes.
    HeartbeatResponse(Value),
    /// A frame of a type this client does not interpret.
    Message(Envelope),
}

impl SessionEvent {
    /// Event tag used for listener registration.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Closed => EventKind::Closed,
            Self::Error(_) => EventKind::Error,
            Self::Delta(_) => EventKind::Delta,
            Self::MemberJoined(_) => EventKind::MemberJoined,
            Self::MemberLeft(_) => EventKind::MemberLeft,
            Self::Telemetry(_) => EventKind::Telemetry,
            Self::CursorUpdate(_) => EventKind::CursorUpdate,
            Self::PresenceUpdate(_) => EventKind::PresenceUpdate,
            Self::Snapshot(_) => EventKind::Snapshot,
            Self::Ack(_) => EventKind::Ack,
            Self::Heartbeat(_) => EventKind::Heartbeat,
            Self::HeartbeatResponse(_) => EventKind::HeartbeatResponse,
            Self::Message(_) => EventKind::Message,
        }
    }
}

/// Closed set of event tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`SessionEvent::Connected`].
    Connected,
    /// See [`SessionEvent::Disconnected`].
    Disconnected,
    /// See [`SessionEvent::Closed`].
    Closed,
    /// See [`SessionEvent::Error`].
    Error,
    /// See [`SessionEvent::Delta`].
    Delta,
    /// See [`SessionEvent::MemberJoined`].
    MemberJoined,
    /// See [`SessionEvent::MemberLeft`].
    MemberLeft,
    /// See [`SessionEvent::Telemetry`].
    Telemetry,
    /// See [`SessionEvent::CursorUpdate`].
    CursorUpdate,
    /// See [`SessionEvent::PresenceUpdate`].
    PresenceUpdate,
    /// See [`SessionEvent::Snapshot`].
    Snapshot,
    /// See [`SessionEvent::Ack`].
    Ack,
    /// See [`SessionEvent::Heartbeat`].
    Heartbeat,
    /// See [`SessionEvent::HeartbeatResponse`].
    HeartbeatResponse,
    /// See [`SessionEvent::Message`].
    Message,
}

impl EventKind {
    /// Converts to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
            Self::Error => "error",
            Self::Delta => "delta",
            Self::MemberJoined => "member_joined",
            Self::MemberLeft => "member_left",
            Self::Telemetry => "telemetry",
            Self::CursorUpdate => "cursor_update",
            Self::PresenceUpdate => "presence_update",
            Self::Snapshot => "snapshot",
            Self::Ack => "ack",
            Self::Heartbeat => "heartbeat",
            Self::HeartbeatResponse => "heartbeat_response",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
