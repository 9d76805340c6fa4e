//! # spacelink-realtime
//!
//! Client-side real-time layer for collaborative spaces. Provides:
//!
//! - One managed connection per space with handshake timeout
//! - Heartbeat probes with round-trip latency measurement
//! - Exponential-backoff reconnection with a bounded attempt budget
//! - Typed session events with ordered, re-entrant listener dispatch
//! - Presence and cursor tables kept in step with inbound frames

pub mod connection;
pub mod error;
pub mod message;
pub mod metrics;
pub mod presence;
pub mod session;

mod sync;

pub use connection::manager::ConnectionManager;
pub use connection::transport::{Connector, TransportEvent, TransportLink};
pub use error::RealtimeError;
pub use message::envelope::{Envelope, MessageType};
pub use session::{EventKind, Session, SessionEvent};
