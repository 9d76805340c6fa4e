//! Per-space connection driver.
//!
//! One task per attachment owns the state machine of its space. Transport
//! loss, heartbeat expiry and retry timers are funnelled into a single event
//! channel, so handshakes are serialized and transitions never race. Events
//! carry the transport generation they belong to; stale ones are dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use spacelink_core::types::SpaceId;

use crate::error::RealtimeError;
use crate::message::envelope::MessageType;
use crate::message::serializer;
use crate::metrics::RealtimeMetrics;
use crate::session::Session;

use super::heartbeat::HeartbeatMonitor;
use super::manager::ManagerInner;
use super::reconnect::ReconnectController;
use super::record::{AttachOutcome, ConnectionRecord, ConnectionState, LifecycleEvent, LifecycleKind};
use super::transport::{Connector, TransportEvent, TransportLink};

const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout";

/// Inputs to the driver loop.
#[derive(Debug)]
pub(crate) enum DriverEvent {
    /// The transport of `generation` closed or failed.
    TransportLost { generation: u64, reason: String },
    /// The heartbeat of `generation` went unanswered.
    HeartbeatExpired { generation: u64 },
    /// The backoff timer for `attempt` elapsed.
    RetryDue { attempt: u32 },
}

/// What follows a lost or failed transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextAttempt {
    Retry(u32),
    Exhausted,
}

pub(crate) struct ConnectionDriver {
    manager: Weak<ManagerInner>,
    connector: Arc<dyn Connector>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    metrics: Arc<RealtimeMetrics>,
    space_id: SpaceId,
    attach_id: Uuid,
    token: String,
    session: Session,
    cancel: CancellationToken,
    reconnect: Arc<ReconnectController>,
    connection_timeout: Duration,
    heartbeat_interval: Option<Duration>,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    events_rx: mpsc::UnboundedReceiver<DriverEvent>,
    generation: u64,
    link_cancel: Option<CancellationToken>,
}

impl ConnectionDriver {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        manager: &Arc<ManagerInner>,
        space_id: SpaceId,
        attach_id: Uuid,
        token: String,
        session: Session,
        cancel: CancellationToken,
        reconnect: Arc<ReconnectController>,
        events_tx: mpsc::UnboundedSender<DriverEvent>,
        events_rx: mpsc::UnboundedReceiver<DriverEvent>,
    ) -> Self {
        Self {
            manager: Arc::downgrade(manager),
            connector: manager.connector.clone(),
            lifecycle: manager.lifecycle.clone(),
            metrics: manager.metrics.clone(),
            space_id,
            attach_id,
            token,
            session,
            cancel,
            reconnect,
            connection_timeout: manager.config.connection_timeout(),
            heartbeat_interval: manager.config.heartbeat_interval(),
            events_tx,
            events_rx,
            generation: 0,
            link_cancel: None,
        }
    }

    /// Runs until detach, give-up, or failure of the first handshake.
    ///
    /// `ready` receives the outcome of the first handshake. Dropping it
    /// unresolved tells waiting attaches the space was detached.
    pub(crate) async fn run(mut self, ready: watch::Sender<AttachOutcome>) {
        let mut ready = Some(ready);
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            self.update(|record| record.state = ConnectionState::Connecting);
            self.publish(LifecycleKind::Connecting { attempt });

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                outcome = self.handshake() => outcome,
            };

            match outcome {
                Ok(link) => {
                    if !self.go_live(link) {
                        return;
                    }
                    if let Some(ready) = ready.take() {
                        ready.send_replace(Some(Ok(())));
                    }
                    let Some(reason) = self.wait_for_loss().await else {
                        return;
                    };
                    if !self.go_down(&reason) {
                        return;
                    }
                }
                Err(err) => {
                    if let Some(ready) = ready.take() {
                        self.abandon();
                        ready.send_replace(Some(Err(err)));
                        return;
                    }
                    warn!(
                        space_id = %self.space_id,
                        attempt,
                        error = %err,
                        "Reconnection attempt failed"
                    );
                    if !self.go_down(&err.to_string()) {
                        return;
                    }
                }
            }

            match self.next_attempt() {
                Some(NextAttempt::Retry(next)) => attempt = next,
                Some(NextAttempt::Exhausted) => {
                    self.give_up();
                    return;
                }
                None => return,
            }
            if !self.wait_for_retry(attempt).await {
                return;
            }
        }
    }

    async fn handshake(&self) -> Result<TransportLink, RealtimeError> {
        let connect = self.connector.connect(&self.space_id, &self.token);
        match tokio::time::timeout(self.connection_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::HandshakeTimeout {
                timeout: self.connection_timeout,
            }),
        }
    }

    /// Unregisters an attachment whose first handshake failed and closes its
    /// session, so no caller is left holding a session that never connects.
    fn abandon(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.abandon(&self.space_id, self.attach_id);
        }
        self.session.mark_closed();
    }

    /// Installs a fresh transport. Returns `false` if the attachment is gone.
    fn go_live(&mut self, link: TransportLink) -> bool {
        self.generation += 1;
        let generation = self.generation;
        let TransportLink { outbound, inbound } = link;

        let heartbeat = self.heartbeat_interval.map(|interval| {
            let events = self.events_tx.clone();
            Arc::new(HeartbeatMonitor::start(
                self.space_id.clone(),
                interval,
                outbound.clone(),
                move || {
                    let _ = events.send(DriverEvent::HeartbeatExpired { generation });
                },
            ))
        });

        let link_cancel = self.cancel.child_token();
        tokio::spawn(pump_inbound(InboundPump {
            manager: self.manager.clone(),
            metrics: self.metrics.clone(),
            space_id: self.space_id.clone(),
            attach_id: self.attach_id,
            session: self.session.clone(),
            heartbeat: heartbeat.clone(),
            events: self.events_tx.clone(),
            generation,
            cancel: link_cancel.clone(),
            inbound,
        }));
        self.link_cancel = Some(link_cancel);

        let installed = self.update(|record| {
            record.state = ConnectionState::Connected;
            record.reconnect_attempts = 0;
            record.last_error = None;
            record.latency = None;
            record.connected_at = Some(Utc::now());
            record.outbound = Some(outbound);
            record.heartbeat = heartbeat.clone();
        });
        if installed.is_none() {
            if let Some(heartbeat) = heartbeat {
                heartbeat.stop();
            }
            if let Some(link_cancel) = self.link_cancel.take() {
                link_cancel.cancel();
            }
            return false;
        }

        self.metrics.connection_opened();
        info!(space_id = %self.space_id, generation, "Connection established");
        self.publish(LifecycleKind::Connected);
        self.session.mark_connected();
        true
    }

    /// Waits for the current transport to fail. `None` means detached.
    async fn wait_for_loss(&mut self) -> Option<String> {
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                event = self.events_rx.recv() => event?,
            };
            match event {
                DriverEvent::TransportLost { generation, reason }
                    if generation == self.generation =>
                {
                    return Some(reason);
                }
                DriverEvent::HeartbeatExpired { generation } if generation == self.generation => {
                    return Some(HEARTBEAT_TIMEOUT_REASON.to_string());
                }
                stale => debug!(space_id = %self.space_id, event = ?stale, "Stale driver event ignored"),
            }
        }
    }

    /// Tears down the current transport, if any, and records `reason`.
    ///
    /// Returns `false` without notifying anyone if the attachment is gone.
    fn go_down(&mut self, reason: &str) -> bool {
        if let Some(link_cancel) = self.link_cancel.take() {
            link_cancel.cancel();
        }
        if self.cancel.is_cancelled() {
            return false;
        }
        // Published under the record lock so it cannot trail a `Detached`.
        let was_connected = self.update(|record| {
            let was_connected = record.state == ConnectionState::Connected;
            record.state = ConnectionState::Disconnected;
            record.last_error = Some(reason.to_string());
            record.outbound = None;
            record.connected_at = None;
            if let Some(heartbeat) = record.heartbeat.take() {
                heartbeat.stop();
            }
            self.publish(LifecycleKind::Disconnected {
                reason: reason.to_string(),
            });
            was_connected
        });
        let Some(was_connected) = was_connected else {
            return false;
        };

        if was_connected {
            warn!(space_id = %self.space_id, reason, "Connection lost");
        }
        self.session.mark_disconnected(reason);
        true
    }

    /// Claims the next attempt number. `None` means the attachment is gone.
    fn next_attempt(&self) -> Option<NextAttempt> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let policy = *self.reconnect.policy();
        self.update(|record| {
            if policy.allows(record.reconnect_attempts) {
                record.reconnect_attempts += 1;
                NextAttempt::Retry(record.reconnect_attempts)
            } else {
                NextAttempt::Exhausted
            }
        })
    }

    /// Arms the backoff timer and waits for it. `false` means detached.
    async fn wait_for_retry(&mut self, attempt: u32) -> bool {
        let events = self.events_tx.clone();
        let timer = self.reconnect.schedule_retry(attempt, move || {
            let _ = events.send(DriverEvent::RetryDue { attempt });
        });
        self.metrics.reconnect_scheduled();
        info!(
            space_id = %self.space_id,
            attempt = timer.attempt(),
            delay_ms = timer.delay().as_millis() as u64,
            "Reconnect scheduled"
        );
        self.publish(LifecycleKind::ReconnectScheduled {
            attempt,
            delay: timer.delay(),
        });

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    timer.cancel();
                    return false;
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => return false,
                },
            };
            match event {
                DriverEvent::RetryDue { attempt: due } if due == attempt => return true,
                stale => debug!(space_id = %self.space_id, event = ?stale, "Stale driver event ignored"),
            }
        }
    }

    fn give_up(&self) {
        let Some(attempts) = self.update(|record| {
            record.state = ConnectionState::GaveUp;
            self.publish(LifecycleKind::GaveUp {
                attempts: record.reconnect_attempts,
            });
            record.reconnect_attempts
        }) else {
            return;
        };
        self.metrics.gave_up();
        warn!(space_id = %self.space_id, attempts, "Giving up on reconnection");
        self.session.report_error(RealtimeError::GiveUp { attempts });
    }

    fn update<R>(&self, f: impl FnOnce(&mut ConnectionRecord) -> R) -> Option<R> {
        self.manager
            .upgrade()?
            .with_record(&self.space_id, self.attach_id, f)
    }

    fn publish(&self, kind: LifecycleKind) {
        let _ = self.lifecycle.send(LifecycleEvent {
            space_id: self.space_id.clone(),
            kind,
        });
    }
}

struct InboundPump {
    manager: Weak<ManagerInner>,
    metrics: Arc<RealtimeMetrics>,
    space_id: SpaceId,
    attach_id: Uuid,
    session: Session,
    heartbeat: Option<Arc<HeartbeatMonitor>>,
    events: mpsc::UnboundedSender<DriverEvent>,
    generation: u64,
    cancel: CancellationToken,
    inbound: mpsc::Receiver<TransportEvent>,
}

/// Decodes frames of one transport and hands them to the session in order.
async fn pump_inbound(mut pump: InboundPump) {
    let reason = loop {
        let event = tokio::select! {
            biased;
            () = pump.cancel.cancelled() => return,
            event = pump.inbound.recv() => event,
        };
        match event {
            Some(TransportEvent::Frame(raw)) => match serializer::decode(&raw) {
                Ok(envelope) => {
                    pump.metrics.frame_received();
                    if envelope.kind() == &MessageType::HeartbeatResponse {
                        pump.record_latency(envelope.data());
                    }
                    pump.session.deliver(envelope);
                }
                Err(err) => {
                    pump.metrics.decode_failed();
                    warn!(space_id = %pump.space_id, error = %err, "Dropping malformed frame");
                    pump.session.deliver_failure(err);
                }
            },
            Some(TransportEvent::Malformed(reason)) => {
                pump.metrics.decode_failed();
                warn!(space_id = %pump.space_id, reason = %reason, "Dropping undecodable frame");
                pump.session.deliver_failure(RealtimeError::MessageDecode(reason));
            }
            Some(TransportEvent::Closed { reason }) => {
                break reason
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "closed by peer".to_string());
            }
            Some(TransportEvent::Error(err)) => break err,
            None => break "transport ended".to_string(),
        }
    };

    debug!(space_id = %pump.space_id, generation = pump.generation, reason = %reason, "Transport ended");
    let _ = pump.events.send(DriverEvent::TransportLost {
        generation: pump.generation,
        reason,
    });
}

impl InboundPump {
    fn record_latency(&self, data: &serde_json::Value) {
        let Some(latency) = self
            .heartbeat
            .as_ref()
            .and_then(|heartbeat| heartbeat.record_response(data))
        else {
            return;
        };
        if let Some(manager) = self.manager.upgrade() {
            manager.with_record(&self.space_id, self.attach_id, |record| {
                record.latency = Some(latency);
            });
        }
    }
}
