//! Wire message types, frame codec, and validation.

pub mod envelope;
pub mod payload;
pub mod serializer;
pub mod validator;

pub use envelope::{Envelope, MessageType};
pub use payload::{
    ChangeRecord, CollaborationCursor, CursorPosition, MemberEvent, PresenceInfo, RemoteError,
};
