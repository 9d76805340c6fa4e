//! The typed wire unit exchanged over a space connection.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use spacelink_core::types::SpaceId;

/// Envelope `type` tag.
///
/// Tags the server may send are the closed set below; `snapshot_request`
/// and `leave` are only ever sent by the client. Unknown tags are kept
/// verbatim in [`MessageType::Other`] so newer servers stay compatible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Opaque change record.
    Delta,
    /// A participant joined the space.
    MemberJoined,
    /// A participant left the space.
    MemberLeft,
    /// Application telemetry passed through unchanged.
    Telemetry,
    /// Cursor position of a participant.
    CursorUpdate,
    /// Presence of a participant.
    PresenceUpdate,
    /// Full state snapshot.
    Snapshot,
    /// Server-side error.
    Error,
    /// Acknowledgement.
    Ack,
    /// Liveness probe.
    Heartbeat,
    /// Reply to a liveness probe.
    HeartbeatResponse,
    /// Client request for a snapshot.
    SnapshotRequest,
    /// Client is leaving the space.
    Leave,
    /// Any tag this client does not know.
    Other(String),
}

impl MessageType {
    /// Returns the wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Delta => "delta",
            Self::MemberJoined => "member_joined",
            Self::MemberLeft => "member_left",
            Self::Telemetry => "telemetry",
            Self::CursorUpdate => "cursor_update",
            Self::PresenceUpdate => "presence_update",
            Self::Snapshot => "snapshot",
            Self::Error => "error",
            Self::Ack => "ack",
            Self::Heartbeat => "heartbeat",
            Self::HeartbeatResponse => "heartbeat_response",
            Self::SnapshotRequest => "snapshot_request",
            Self::Leave => "leave",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "delta" => Self::Delta,
            "member_joined" => Self::MemberJoined,
            "member_left" => Self::MemberLeft,
            "telemetry" => Self::Telemetry,
            "cursor_update" => Self::CursorUpdate,
            "presence_update" => Self::PresenceUpdate,
            "snapshot" => Self::Snapshot,
            "error" => Self::Error,
            "ack" => Self::Ack,
            "heartbeat" => Self::Heartbeat,
            "heartbeat_response" => Self::HeartbeatResponse,
            "snapshot_request" => Self::SnapshotRequest,
            "leave" => Self::Leave,
            _ => Self::Other(tag),
        }
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> String {
        match kind {
            MessageType::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single application-level frame.
///
/// Immutable once built: fields are only readable, and every constructor
/// stamps the creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(rename = "spaceId", default, skip_serializing_if = "Option::is_none")]
    space_id: Option<SpaceId>,
    #[serde(default = "empty_object")]
    data: Value,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Build an envelope addressed to a space, stamped now.
    pub fn new(kind: MessageType, space_id: SpaceId, data: Value) -> Self {
        Self {
            kind,
            space_id: Some(space_id),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Build an envelope with every field given explicitly.
    pub fn from_parts(
        kind: MessageType,
        space_id: Option<SpaceId>,
        data: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            space_id,
            data,
            timestamp,
        }
    }

    /// The `type` tag.
    pub fn kind(&self) -> &MessageType {
        &self.kind
    }

    /// Space the frame belongs to, when the sender included it.
    pub fn space_id(&self) -> Option<&SpaceId> {
        self.space_id.as_ref()
    }

    /// Type-specific payload.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Time the frame was produced.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Consumes the envelope, returning its payload.
    pub fn into_data(self) -> Value {
        self.data
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
