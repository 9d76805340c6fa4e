//! Frame validation rules applied before parsing.

use crate::error::RealtimeError;

/// Maximum accepted inbound frame size in bytes.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Validates a raw inbound frame.
pub fn validate_frame(raw: &str) -> Result<(), RealtimeError> {
    if raw.len() > MAX_FRAME_SIZE {
        return Err(RealtimeError::MessageDecode(format!(
            "frame of {} bytes exceeds maximum size of {MAX_FRAME_SIZE} bytes",
            raw.len()
        )));
    }

    if raw.trim().is_empty() {
        return Err(RealtimeError::MessageDecode("empty frame".to_string()));
    }

    Ok(())
}
