//! Transport seam between the connection manager and the network.

use async_trait::async_trait;
use tokio::sync::mpsc;

use spacelink_core::types::SpaceId;

use crate::error::RealtimeError;

/// Something that happened on an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Frame(String),
    /// A frame arrived that cannot be read as text.
    Malformed(String),
    /// The remote side closed the transport.
    Closed {
        /// Close reason, when the peer sent one.
        reason: Option<String>,
    },
    /// The transport failed.
    Error(String),
}

/// An open duplex transport, expressed as a pair of channels.
///
/// Dropping `outbound` asks the transport to close. The transport reports
/// closure or failure at most once on `inbound` and then ends the stream.
#[derive(Debug)]
pub struct TransportLink {
    /// Encoded frames to write.
    pub outbound: mpsc::Sender<String>,
    /// Frames and lifecycle notifications read from the peer.
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens transports to spaces.
///
/// Implementations perform the transport-level handshake; the connection
/// manager bounds the call with the configured handshake timeout.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Opens a transport to `space_id`, authenticating with `token`.
    async fn connect(&self, space_id: &SpaceId, token: &str)
    -> Result<TransportLink, RealtimeError>;
}
