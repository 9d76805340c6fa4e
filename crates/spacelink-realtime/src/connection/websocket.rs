//! WebSocket transport built on tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use spacelink_core::config::RealtimeConfig;
use spacelink_core::types::SpaceId;

use crate::error::RealtimeError;

use super::transport::{Connector, TransportEvent, TransportLink};

/// Opens `wss://<host>/spaces/{spaceId}?token={token}` connections.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
    buffer_size: usize,
}

impl WebSocketConnector {
    /// Creates a connector for the configured endpoint.
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            buffer_size: config.outbound_buffer_size,
        }
    }

    /// Builds the connection URL for a space.
    pub fn url_for(&self, space_id: &SpaceId, token: &str) -> String {
        format!(
            "{}/spaces/{}?token={}",
            self.endpoint,
            utf8_percent_encode(space_id.as_str(), NON_ALPHANUMERIC),
            utf8_percent_encode(token, NON_ALPHANUMERIC)
        )
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        space_id: &SpaceId,
        token: &str,
    ) -> Result<TransportLink, RealtimeError> {
        let url = self.url_for(space_id, token);
        debug!(space_id = %space_id, endpoint = %self.endpoint, "Opening WebSocket");

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| RealtimeError::Transport(format!("WebSocket connect failed: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.buffer_size);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(self.buffer_size);

        let writer_space = space_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    warn!(space_id = %writer_space, error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
            debug!(space_id = %writer_space, "WebSocket writer finished");
        });

        let reader_space = space_id.clone();
        tokio::spawn(async move {
            let terminal = loop {
                let event = match source.next().await {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(e) => TransportEvent::Malformed(format!(
                            "binary frame is not valid UTF-8: {e}"
                        )),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break TransportEvent::Closed {
                            reason: frame.map(|f| f.reason.as_str().to_owned()),
                        };
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break TransportEvent::Error(e.to_string()),
                    None => break TransportEvent::Closed { reason: None },
                };
                if in_tx.send(event).await.is_err() {
                    return;
                }
            };
            let _ = in_tx.send(terminal).await;
            debug!(space_id = %reader_space, "WebSocket reader finished");
        });

        info!(space_id = %space_id, "WebSocket connected");
        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encodes_space_and_token() {
        let config = RealtimeConfig {
            endpoint: "wss://collab.example.com/".to_string(),
            ..RealtimeConfig::default()
        };
        let connector = WebSocketConnector::new(&config);
        let url = connector.url_for(&SpaceId::from("team space"), "a+b/c=");
        assert_eq!(
            url,
            "wss://collab.example.com/spaces/team%20space?token=a%2Bb%2Fc%3D"
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_error() {
        let config = RealtimeConfig {
            endpoint: "ws://127.0.0.1:9".to_string(),
            ..RealtimeConfig::default()
        };
        let connector = WebSocketConnector::new(&config);
        let err = connector
            .connect(&SpaceId::from("s1"), "token")
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Transport(_)));
    }
}
