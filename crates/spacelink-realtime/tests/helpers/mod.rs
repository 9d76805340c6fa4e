//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;

use spacelink_core::config::RealtimeConfig;
use spacelink_core::types::SpaceId;
use spacelink_realtime::{
    Connector, RealtimeError, Session, SessionEvent, TransportEvent, TransportLink,
};

/// What the scripted connector does on one `connect` call.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Open a transport and hand its server end to the test.
    Accept,
    /// Like `Accept`, with these raw frames already queued before the
    /// handshake completes.
    AcceptWith(Vec<String>),
    /// Fail the handshake.
    Refuse(String),
    /// Never complete the handshake.
    Hang,
}

/// Server side of one accepted transport.
#[derive(Debug)]
pub struct ServerEnd {
    /// Frames written by the client.
    pub sent: mpsc::Receiver<String>,
    /// Feed for frames and lifecycle notifications towards the client.
    pub inbound: mpsc::Sender<TransportEvent>,
}

impl ServerEnd {
    /// Pushes a well-formed frame of `kind` to the client.
    pub async fn push(&self, kind: &str, data: Value) {
        self.push_raw(&frame(kind, data)).await;
    }

    /// Pushes a raw text frame to the client.
    pub async fn push_raw(&self, raw: &str) {
        self.inbound
            .send(TransportEvent::Frame(raw.to_string()))
            .await
            .expect("client pump alive");
    }

    /// Closes the transport from the server side.
    pub fn close(&self, reason: &str) {
        let _ = self.inbound.try_send(TransportEvent::Closed {
            reason: Some(reason.to_string()),
        });
    }

    /// Next frame written by the client, parsed as JSON.
    pub async fn next_frame(&mut self) -> Option<Value> {
        let raw = self.sent.recv().await?;
        Some(serde_json::from_str(&raw).expect("client frames are JSON"))
    }
}

/// Connector that follows a per-attempt script.
#[derive(Debug)]
pub struct ScriptedConnector {
    plans: Mutex<VecDeque<Plan>>,
    fallback: Plan,
    servers: mpsc::UnboundedSender<ServerEnd>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedConnector {
    /// Runs `plans` in order, then `fallback` for every further attempt.
    pub fn new(
        plans: impl IntoIterator<Item = Plan>,
        fallback: Plan,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            plans: Mutex::new(plans.into_iter().collect()),
            fallback,
            servers,
            attempts: Mutex::new(Vec::new()),
        });
        (connector, accepted)
    }

    /// When each `connect` call started.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    /// Number of `connect` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _space_id: &SpaceId,
        _token: &str,
    ) -> Result<TransportLink, RealtimeError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match plan {
            Plan::Accept => self.accept(Vec::new()),
            Plan::AcceptWith(held) => self.accept(held),
            Plan::Refuse(reason) => Err(RealtimeError::Transport(reason)),
            Plan::Hang => std::future::pending().await,
        }
    }
}

impl ScriptedConnector {
    fn accept(&self, held: Vec<String>) -> Result<TransportLink, RealtimeError> {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        for raw in held {
            in_tx
                .try_send(TransportEvent::Frame(raw))
                .expect("held frames fit the buffer");
        }
        let _ = self.servers.send(ServerEnd {
            sent: out_rx,
            inbound: in_tx,
        });
        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// A well-formed server frame of `kind` for space `s1`.
pub fn frame(kind: &str, data: Value) -> String {
    json!({
        "type": kind,
        "spaceId": "s1",
        "data": data,
        "timestamp": "2026-01-01T00:00:00Z",
    })
    .to_string()
}

/// Settings for tests: heartbeat off, 3 attempts, 1 s base backoff, 5 s handshake.
pub fn test_config() -> RealtimeConfig {
    RealtimeConfig {
        max_reconnect_attempts: 3,
        reconnect_base_delay_ms: 1000,
        reconnect_max_delay_ms: 30_000,
        heartbeat_interval_ms: 0,
        connection_timeout_ms: 5000,
        ..RealtimeConfig::default()
    }
}

/// Forwards every session event into a channel.
pub fn record(session: &Session) -> mpsc::UnboundedReceiver<SessionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.on_any(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Waits for the first event matching `pred`, skipping others.
pub async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = events.recv().await.expect("session event stream open");
        if pred(&event) {
            return event;
        }
    }
}
