//! Connection manager: attaches spaces, routes outbound frames, tears down.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use spacelink_core::config::RealtimeConfig;
use spacelink_core::types::SpaceId;

use crate::error::RealtimeError;
use crate::message::envelope::{Envelope, MessageType};
use crate::message::serializer;
use crate::metrics::{MetricsSnapshot, RealtimeMetrics};
use crate::session::Session;

use super::driver::ConnectionDriver;
use super::reconnect::{BackoffPolicy, ReconnectController};
use super::record::{
    AttachOutcome, ConnectionRecord, ConnectionState, ConnectionStatus, LifecycleEvent,
    LifecycleKind,
};
use super::transport::Connector;
use super::websocket::WebSocketConnector;

const LIFECYCLE_CAPACITY: usize = 256;

/// Owns at most one connection per space.
///
/// Cheap to clone; clones share the same registry. Dropping the last clone
/// stops every connection it owns.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

#[derive(Debug)]
pub(crate) struct ManagerInner {
    pub(crate) config: RealtimeConfig,
    pub(crate) connector: Arc<dyn Connector>,
    connections: DashMap<SpaceId, ConnectionRecord>,
    pub(crate) lifecycle: broadcast::Sender<LifecycleEvent>,
    pub(crate) metrics: Arc<RealtimeMetrics>,
}

/// What a freshly registered attachment needs to start its driver.
struct DriverLaunch {
    attach_id: Uuid,
    cancel: CancellationToken,
    reconnect: Arc<ReconnectController>,
    ready: watch::Sender<AttachOutcome>,
}

impl ConnectionManager {
    /// Creates a manager that opens transports through `connector`.
    pub fn new(config: RealtimeConfig, connector: Arc<dyn Connector>) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                connector,
                connections: DashMap::new(),
                lifecycle,
                metrics: Arc::new(RealtimeMetrics::new()),
            }),
        }
    }

    /// Creates a manager backed by [`WebSocketConnector`].
    pub fn websocket(config: RealtimeConfig) -> Self {
        let connector = Arc::new(WebSocketConnector::new(&config));
        Self::new(config, connector)
    }

    /// Attaches to `space_id` and resolves once the first handshake completes.
    ///
    /// Same as [`ConnectionManager::attach_with`] with no setup.
    pub async fn attach(
        &self,
        space_id: impl Into<SpaceId>,
        token: impl Into<String>,
    ) -> Result<Session, RealtimeError> {
        self.attach_with(space_id, token, |_| {}).await
    }

    /// Attaches to `space_id`, running `setup` on the session before any
    /// event can be dispatched on it.
    ///
    /// Listeners registered in `setup` observe `Connected` and every frame
    /// held while the handshake was in flight. A space that is already
    /// attached (and has not given up) shares the existing session and the
    /// outcome of its first handshake. Re-attaching a space that gave up
    /// starts a fresh connection and reuses the same session, so its
    /// listeners carry over. A failed or timed-out first handshake is
    /// returned as an error to every caller, closes the session and leaves
    /// nothing registered.
    pub async fn attach_with<F>(
        &self,
        space_id: impl Into<SpaceId>,
        token: impl Into<String>,
        setup: F,
    ) -> Result<Session, RealtimeError>
    where
        F: FnOnce(&Session),
    {
        let space_id = space_id.into();

        let (session, mut ready, launch) = match self.inner.connections.entry(space_id.clone()) {
            Entry::Occupied(existing) if !existing.get().state.is_terminal() => {
                debug!(space_id = %space_id, "Space already attached, sharing session");
                let record = existing.get();
                (record.session.clone(), record.ready.clone(), None)
            }
            Entry::Occupied(mut exhausted) => {
                let session = exhausted.get().session.clone();
                let (record, launch) = self.new_record(session.clone());
                let ready = record.ready.clone();
                exhausted.insert(record).release();
                (session, ready, Some(launch))
            }
            Entry::Vacant(vacant) => {
                let session = Session::new(
                    space_id.clone(),
                    Arc::downgrade(&self.inner),
                    self.inner.config.pending_queue_capacity,
                );
                let (record, launch) = self.new_record(session.clone());
                let ready = record.ready.clone();
                vacant.insert(record);
                (session, ready, Some(launch))
            }
        };

        setup(&session);

        if let Some(launch) = launch {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let driver = ConnectionDriver::new(
                &self.inner,
                space_id.clone(),
                launch.attach_id,
                token.into(),
                session.clone(),
                launch.cancel,
                launch.reconnect,
                events_tx,
                events_rx,
            );
            tokio::spawn(driver.run(launch.ready));
        }

        let outcome = ready
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone())
            .ok()
            .flatten();
        match outcome {
            Some(Ok(())) => {
                info!(space_id = %space_id, "Space attached");
                Ok(session)
            }
            Some(Err(err)) => {
                warn!(space_id = %space_id, error = %err, "Attach failed");
                Err(err)
            }
            None => Err(RealtimeError::Detached { space_id }),
        }
    }

    fn new_record(&self, session: Session) -> (ConnectionRecord, DriverLaunch) {
        let attach_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let reconnect = Arc::new(ReconnectController::new(BackoffPolicy::from_config(
            &self.inner.config,
        )));
        let (ready_tx, ready_rx) = watch::channel(None);

        let record = ConnectionRecord {
            attach_id,
            state: ConnectionState::Connecting,
            reconnect_attempts: 0,
            last_error: None,
            latency: None,
            connected_at: None,
            outbound: None,
            heartbeat: None,
            reconnect: reconnect.clone(),
            cancel: cancel.clone(),
            session,
            ready: ready_rx,
        };
        let launch = DriverLaunch {
            attach_id,
            cancel,
            reconnect,
            ready: ready_tx,
        };
        (record, launch)
    }

    /// Closes the connection of `space_id`. Idempotent.
    pub fn detach(&self, space_id: &SpaceId) {
        self.inner.detach(space_id);
    }

    /// Detaches every attached space.
    pub fn detach_all(&self) {
        for space_id in self.spaces() {
            self.inner.detach(&space_id);
        }
    }

    /// Encodes `envelope` and writes it to the live transport of `space_id`.
    pub fn send(&self, space_id: &SpaceId, envelope: &Envelope) -> Result<(), RealtimeError> {
        self.inner.send(space_id, envelope)
    }

    /// Status snapshot of `space_id`, if attached.
    pub fn status(&self, space_id: &SpaceId) -> Option<ConnectionStatus> {
        self.inner
            .connections
            .get(space_id)
            .map(|record| record.status(space_id))
    }

    /// Spaces currently registered, in no particular order.
    pub fn spaces(&self) -> Vec<SpaceId> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Subscribes to connection lifecycle notifications of every space.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Settings this manager was built with.
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<ManagerInner> {
        &self.inner
    }
}

impl ManagerInner {
    /// Mutates the record of `space_id` if it still belongs to `attach_id`.
    ///
    /// `f` runs under the registry shard lock and must not call into sessions.
    pub(crate) fn with_record<R>(
        &self,
        space_id: &SpaceId,
        attach_id: Uuid,
        f: impl FnOnce(&mut ConnectionRecord) -> R,
    ) -> Option<R> {
        let mut record = self.connections.get_mut(space_id)?;
        if record.attach_id != attach_id {
            return None;
        }
        Some(f(&mut record))
    }

    /// Drops the attachment `attach_id` of `space_id` after its first
    /// handshake failed. A newer attachment of the same space is left alone.
    pub(crate) fn abandon(&self, space_id: &SpaceId, attach_id: Uuid) {
        if let Some((_, mut record)) = self
            .connections
            .remove_if(space_id, |_, record| record.attach_id == attach_id)
        {
            record.release();
        }
    }

    pub(crate) fn publish(&self, space_id: &SpaceId, kind: LifecycleKind) {
        // No subscribers is not an error.
        let _ = self.lifecycle.send(LifecycleEvent {
            space_id: space_id.clone(),
            kind,
        });
    }

    pub(crate) fn send(&self, space_id: &SpaceId, envelope: &Envelope) -> Result<(), RealtimeError> {
        let not_connected = || RealtimeError::NotConnected {
            space_id: space_id.clone(),
        };
        let outbound = {
            let record = self.connections.get(space_id).ok_or_else(not_connected)?;
            if record.state != ConnectionState::Connected {
                return Err(not_connected());
            }
            record.outbound.clone().ok_or_else(not_connected)?
        };

        let frame = serializer::encode(envelope)?;
        outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RealtimeError::Transport("outbound buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => not_connected(),
        })?;
        self.metrics.frame_sent();
        Ok(())
    }

    pub(crate) fn detach(&self, space_id: &SpaceId) {
        let Some((_, mut record)) = self.connections.remove(space_id) else {
            debug!(space_id = %space_id, "Detach of unknown space ignored");
            return;
        };

        if let Some(outbound) = &record.outbound {
            let leave = Envelope::new(MessageType::Leave, space_id.clone(), json!({}));
            match serializer::encode(&leave) {
                Ok(frame) => {
                    if outbound.try_send(frame).is_ok() {
                        self.metrics.frame_sent();
                    }
                }
                Err(e) => warn!(space_id = %space_id, error = %e, "Failed to encode leave frame"),
            }
        }
        record.release();

        info!(space_id = %space_id, "Space detached");
        self.publish(space_id, LifecycleKind::Detached);
        record.session.mark_closed();
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        for mut record in self.connections.iter_mut() {
            record.release();
        }
    }
}
