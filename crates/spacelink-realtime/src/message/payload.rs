//! Typed payloads decoded from envelope `data`.
//!
//! Wire payloads use camelCase keys. Each type is decoded through a lenient
//! wire struct so that optional fields fall back to values taken from the
//! surrounding envelope (timestamp) instead of failing the frame.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use spacelink_core::types::ParticipantId;

use crate::error::RealtimeError;

use super::envelope::Envelope;

/// Normalized change record built from a `delta` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Change identifier (generated when the server omits it).
    pub id: String,
    /// Opaque change payload, interpreted by a higher layer.
    pub changes: Value,
    /// Participant that authored the change.
    pub author: Option<ParticipantId>,
    /// When the change was produced.
    pub timestamp: DateTime<Utc>,
}

/// Membership change built from `member_joined` / `member_left`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEvent {
    /// Participant that joined or left.
    pub participant_id: ParticipantId,
    /// Display name, when provided.
    pub display_name: Option<String>,
    /// When the membership changed.
    pub timestamp: DateTime<Utc>,
}

/// Presence of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceInfo {
    /// Participant.
    pub participant_id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Whether the participant is online.
    pub online: bool,
    /// Free-form activity, e.g. `"editing"`.
    pub activity: Option<String>,
    /// Last time the participant was seen.
    pub last_seen: DateTime<Utc>,
}

/// 2-D cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

/// Collaboration cursor of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationCursor {
    /// Participant.
    pub participant_id: ParticipantId,
    /// Pointer position.
    pub position: CursorPosition,
    /// Display color.
    pub color: String,
    /// When the position was reported.
    pub timestamp: DateTime<Utc>,
}

/// Error reported by the server in an `error` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Additional details.
    pub details: Option<Value>,
}

const DEFAULT_CURSOR_COLOR: &str = "#3b82f6";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeltaWire {
    id: Option<String>,
    changes: Option<Value>,
    #[serde(alias = "userId")]
    author: Option<ParticipantId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberWire {
    #[serde(alias = "userId")]
    participant_id: ParticipantId,
    #[serde(alias = "userName")]
    display_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceWire {
    #[serde(alias = "userId")]
    participant_id: ParticipantId,
    #[serde(alias = "userName")]
    display_name: Option<String>,
    online: Option<bool>,
    activity: Option<String>,
    last_seen: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorWire {
    #[serde(alias = "userId")]
    participant_id: ParticipantId,
    position: CursorPosition,
    color: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ErrorWire {
    code: Option<Value>,
    message: Option<String>,
    details: Option<Value>,
}

fn decode_data<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, RealtimeError> {
    T::deserialize(envelope.data()).map_err(|e| {
        RealtimeError::MessageDecode(format!("invalid {} payload: {e}", envelope.kind()))
    })
}

impl ChangeRecord {
    /// Normalizes a `delta` frame.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, RealtimeError> {
        let wire: DeltaWire = decode_data(envelope)?;
        Ok(Self {
            id: wire.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            changes: wire.changes.unwrap_or_else(|| envelope.data().clone()),
            author: wire.author,
            timestamp: envelope.timestamp(),
        })
    }
}

impl MemberEvent {
    /// Decodes a `member_joined` / `member_left` frame.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, RealtimeError> {
        let wire: MemberWire = decode_data(envelope)?;
        Ok(Self {
            participant_id: wire.participant_id,
            display_name: wire.display_name,
            timestamp: envelope.timestamp(),
        })
    }
}

impl PresenceInfo {
    /// Decodes a `presence_update` frame.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, RealtimeError> {
        let wire: PresenceWire = decode_data(envelope)?;
        Ok(Self {
            display_name: wire
                .display_name
                .unwrap_or_else(|| wire.participant_id.to_string()),
            participant_id: wire.participant_id,
            online: wire.online.unwrap_or(true),
            activity: wire.activity,
            last_seen: wire.last_seen.unwrap_or_else(|| envelope.timestamp()),
        })
    }
}

impl CollaborationCursor {
    /// Decodes a `cursor_update` frame.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, RealtimeError> {
        let wire: CursorWire = decode_data(envelope)?;
        Ok(Self {
            participant_id: wire.participant_id,
            position: wire.position,
            color: wire
                .color
                .unwrap_or_else(|| DEFAULT_CURSOR_COLOR.to_string()),
            timestamp: wire.timestamp.unwrap_or_else(|| envelope.timestamp()),
        })
    }
}

impl RemoteError {
    /// Decodes an `error` frame. Numeric codes are kept in their decimal form.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, RealtimeError> {
        let wire: ErrorWire = decode_data(envelope)?;
        let code = match wire.code {
            Some(Value::String(code)) => code,
            Some(Value::Null) | None => "UNKNOWN".to_string(),
            Some(other) => other.to_string(),
        };
        Ok(Self {
            code,
            message: wire.message.unwrap_or_default(),
            details: wire.details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::envelope::MessageType;
    use serde_json::json;

    fn envelope(kind: MessageType, data: Value) -> Envelope {
        Envelope::from_parts(kind, None, data, Utc::now())
    }

    #[test]
    fn test_delta_without_changes_keeps_whole_payload() {
        let env = envelope(MessageType::Delta, json!({"op": "insert", "userId": "u1"}));
        let record = ChangeRecord::from_envelope(&env).expect("delta");
        assert_eq!(record.changes, json!({"op": "insert", "userId": "u1"}));
        assert_eq!(record.author, Some(ParticipantId::from("u1")));
        assert!(!record.id.is_empty());
        assert_eq!(record.timestamp, env.timestamp());
    }

    #[test]
    fn test_presence_defaults() {
        let env = envelope(MessageType::PresenceUpdate, json!({"participantId": "p1"}));
        let info = PresenceInfo::from_envelope(&env).expect("presence");
        assert_eq!(info.display_name, "p1");
        assert!(info.online);
        assert_eq!(info.last_seen, env.timestamp());
    }

    #[test]
    fn test_cursor_requires_position() {
        let env = envelope(MessageType::CursorUpdate, json!({"participantId": "p1"}));
        let err = CollaborationCursor::from_envelope(&env).unwrap_err();
        assert!(matches!(err, RealtimeError::MessageDecode(msg) if msg.contains("cursor_update")));
    }

    #[test]
    fn test_remote_error_numeric_code() {
        let env = envelope(
            MessageType::Error,
            json!({"code": 4403, "message": "forbidden", "details": {"scope": "write"}}),
        );
        let err = RemoteError::from_envelope(&env).expect("error");
        assert_eq!(err.code, "4403");
        assert_eq!(err.message, "forbidden");
        assert_eq!(err.details, Some(json!({"scope": "write"})));
    }
}
