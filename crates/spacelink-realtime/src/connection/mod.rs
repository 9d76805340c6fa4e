//! Per-space connection lifecycle and transport.

pub(crate) mod driver;
pub mod heartbeat;
pub mod manager;
pub mod reconnect;
pub mod record;
pub mod transport;
pub mod websocket;

pub use heartbeat::{HeartbeatMonitor, HeartbeatTracker};
pub use manager::ConnectionManager;
pub use reconnect::{BackoffPolicy, ReconnectController, RetryTimer};
pub use record::{ConnectionState, ConnectionStatus, LifecycleEvent, LifecycleKind};
pub use transport::{Connector, TransportEvent, TransportLink};
pub use websocket::WebSocketConnector;
