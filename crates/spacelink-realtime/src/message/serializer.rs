//! JSON frame codec for envelopes.

use crate::error::RealtimeError;

use super::envelope::Envelope;
use super::validator::validate_frame;

/// Serialize an envelope into a text frame.
pub fn encode(envelope: &Envelope) -> Result<String, RealtimeError> {
    serde_json::to_string(envelope)
        .map_err(|e| RealtimeError::MessageDecode(format!("failed to encode {}: {e}", envelope.kind())))
}

/// Validate and deserialize a text frame into an envelope.
pub fn decode(raw: &str) -> Result<Envelope, RealtimeError> {
    validate_frame(raw)?;
    Ok(serde_json::from_str(raw)?)
}
