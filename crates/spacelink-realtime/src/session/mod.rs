//! Per-space sessions: typed events, listeners, presence and cursor tables.

pub mod event;
pub mod handle;
pub mod listeners;

pub use event::{EventKind, SessionEvent};
pub use handle::{Session, SessionStats};
pub use listeners::{Listener, ListenerId};
