//! The per-space session handle handed to application code.
//!
//! Inbound envelopes are turned into [`SessionEvent`]s under the state lock and
//! queued on an outbox. Exactly one caller drains the outbox at a time, with no
//! lock held while listeners run, so listeners may call back into the session
//! and still observe events in arrival order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use spacelink_core::types::{ParticipantId, SpaceId};

use crate::connection::manager::ManagerInner;
use crate::error::RealtimeError;
use crate::message::envelope::{Envelope, MessageType};
use crate::message::payload::{
    ChangeRecord, CollaborationCursor, CursorPosition, MemberEvent, PresenceInfo, RemoteError,
};
use crate::presence::PresenceTracker;
use crate::sync::lock;

use super::event::{EventKind, SessionEvent};
use super::listeners::{ListenerId, ListenerRegistry};

/// Dispatch counters of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Events handed to listeners.
    pub dispatched: u64,
    /// Inbound frames held while disconnected.
    pub buffered: u64,
    /// Held frames discarded because the pending queue was full.
    pub dropped: u64,
}

/// Inbound item held while the session is not connected.
#[derive(Debug)]
enum Inbound {
    Frame(Envelope),
    Undecodable(RealtimeError),
}

#[derive(Debug)]
struct SessionState {
    connected: bool,
    closed: bool,
    pending: VecDeque<Inbound>,
    pending_capacity: usize,
    tables: PresenceTracker,
    last_ack: Option<DateTime<Utc>>,
    stats: SessionStats,
    outbox: VecDeque<SessionEvent>,
    draining: bool,
}

impl SessionState {
    fn hold(&mut self, space_id: &SpaceId, item: Inbound) {
        if self.pending.len() >= self.pending_capacity {
            self.pending.pop_front();
            self.stats.dropped += 1;
            warn!(
                space_id = %space_id,
                capacity = self.pending_capacity,
                "Pending queue full, oldest frame dropped"
            );
        }
        self.pending.push_back(item);
        self.stats.buffered += 1;
    }

    /// Applies table side effects and produces the event for one inbound item.
    fn interpret(&mut self, item: Inbound) -> SessionEvent {
        let envelope = match item {
            Inbound::Frame(envelope) => envelope,
            Inbound::Undecodable(err) => return SessionEvent::Error(err),
        };

        let decoded = match envelope.kind() {
            MessageType::Delta => ChangeRecord::from_envelope(&envelope).map(SessionEvent::Delta),
            MessageType::MemberJoined => {
                MemberEvent::from_envelope(&envelope).map(SessionEvent::MemberJoined)
            }
            MessageType::MemberLeft => MemberEvent::from_envelope(&envelope).map(|member| {
                self.tables.remove_participant(&member.participant_id);
                SessionEvent::MemberLeft(member)
            }),
            MessageType::CursorUpdate => {
                CollaborationCursor::from_envelope(&envelope).map(|cursor| {
                    self.tables.upsert_cursor(cursor.clone());
                    SessionEvent::CursorUpdate(cursor)
                })
            }
            MessageType::PresenceUpdate => PresenceInfo::from_envelope(&envelope).map(|info| {
                self.tables.upsert_presence(info.clone());
                SessionEvent::PresenceUpdate(info)
            }),
            MessageType::Error => RemoteError::from_envelope(&envelope)
                .map(|remote| SessionEvent::Error(RealtimeError::Remote(remote))),
            MessageType::Ack => {
                self.last_ack = Some(envelope.timestamp());
                Ok(SessionEvent::Ack(envelope.into_data()))
            }
            MessageType::Telemetry => Ok(SessionEvent::Telemetry(envelope.into_data())),
            MessageType::Snapshot => Ok(SessionEvent::Snapshot(envelope.into_data())),
            MessageType::Heartbeat => Ok(SessionEvent::Heartbeat(envelope.into_data())),
            MessageType::HeartbeatResponse => {
                Ok(SessionEvent::HeartbeatResponse(envelope.into_data()))
            }
            MessageType::SnapshotRequest | MessageType::Leave | MessageType::Other(_) => {
                Ok(SessionEvent::Message(envelope))
            }
        };

        decoded.unwrap_or_else(SessionEvent::Error)
    }

    fn enqueue(&mut self, item: Inbound) {
        let event = self.interpret(item);
        self.outbox.push_back(event);
    }
}

#[derive(Debug)]
struct SessionInner {
    space_id: SpaceId,
    manager: Weak<ManagerInner>,
    state: Mutex<SessionState>,
    listeners: Mutex<ListenerRegistry>,
}

/// Handle to one attached space.
///
/// Cheap to clone; every clone refers to the same session. Remains usable
/// across reconnects: listeners and tables survive until [`Session::close`].
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        space_id: SpaceId,
        manager: Weak<ManagerInner>,
        pending_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                space_id,
                manager,
                state: Mutex::new(SessionState {
                    connected: false,
                    closed: false,
                    pending: VecDeque::new(),
                    pending_capacity: pending_capacity.max(1),
                    tables: PresenceTracker::new(),
                    last_ack: None,
                    stats: SessionStats::default(),
                    outbox: VecDeque::new(),
                    draining: false,
                }),
                listeners: Mutex::new(ListenerRegistry::default()),
            }),
        }
    }

    /// Space this session is attached to.
    pub fn space_id(&self) -> &SpaceId {
        &self.inner.space_id
    }

    /// Whether the underlying connection is live.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state).connected
    }

    /// Whether the session was closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Publishes a change proposal as a `delta` frame.
    pub fn propose_change(&self, changes: Value) -> Result<(), RealtimeError> {
        self.send(MessageType::Delta, json!({ "changes": changes }))
    }

    /// Publishes this participant's cursor position.
    pub fn update_cursor(&self, position: CursorPosition) -> Result<(), RealtimeError> {
        self.send(
            MessageType::CursorUpdate,
            json!({ "position": { "x": position.x, "y": position.y } }),
        )
    }

    /// Publishes this participant's activity and free-form metadata.
    pub fn update_presence(
        &self,
        activity: Option<&str>,
        metadata: Value,
    ) -> Result<(), RealtimeError> {
        self.send(
            MessageType::PresenceUpdate,
            json!({ "activity": activity, "metadata": metadata }),
        )
    }

    /// Asks the server for a snapshot; it arrives later as a `snapshot` event.
    pub fn request_snapshot(&self) -> Result<(), RealtimeError> {
        self.send(MessageType::SnapshotRequest, json!({}))
    }

    /// Sends an arbitrary frame on this session's connection.
    pub fn send(&self, kind: MessageType, data: Value) -> Result<(), RealtimeError> {
        let disconnected = || RealtimeError::SessionDisconnected {
            space_id: self.inner.space_id.clone(),
        };
        if !self.is_connected() {
            return Err(disconnected());
        }
        let manager = self.inner.manager.upgrade().ok_or_else(disconnected)?;
        manager.send(
            &self.inner.space_id,
            &Envelope::new(kind, self.inner.space_id.clone(), data),
        )
    }

    // ── Listeners ────────────────────────────────────────────────

    /// Registers `listener` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        lock(&self.inner.listeners).add(Some(kind), Arc::new(listener))
    }

    /// Registers `listener` for every event.
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        lock(&self.inner.listeners).add(None, Arc::new(listener))
    }

    /// Unregisters a listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        lock(&self.inner.listeners).remove(id)
    }

    // ── Tables ───────────────────────────────────────────────────

    /// Copy of the presence table.
    pub fn presence(&self) -> HashMap<ParticipantId, PresenceInfo> {
        lock(&self.inner.state).tables.presence()
    }

    /// Copy of the cursor table.
    pub fn cursors(&self) -> HashMap<ParticipantId, CollaborationCursor> {
        lock(&self.inner.state).tables.cursors()
    }

    /// Timestamp of the most recent `ack`.
    pub fn last_ack(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.state).last_ack
    }

    /// Dispatch counters.
    pub fn stats(&self) -> SessionStats {
        lock(&self.inner.state).stats
    }

    /// Detaches the space. Idempotent; emits `Closed` once.
    pub fn close(&self) {
        match self.inner.manager.upgrade() {
            Some(manager) => manager.detach(&self.inner.space_id),
            None => self.mark_closed(),
        }
    }

    // ── Driven by the connection layer ───────────────────────────

    pub(crate) fn deliver(&self, envelope: Envelope) {
        self.accept(Inbound::Frame(envelope));
    }

    pub(crate) fn deliver_failure(&self, err: RealtimeError) {
        self.accept(Inbound::Undecodable(err));
    }

    fn accept(&self, item: Inbound) {
        {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return;
            }
            if !state.connected {
                state.hold(&self.inner.space_id, item);
                return;
            }
            state.enqueue(item);
        }
        self.drain();
    }

    /// Emits `Connected`, then replays held frames in arrival order.
    pub(crate) fn mark_connected(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.closed || state.connected {
                return;
            }
            state.connected = true;
            state.outbox.push_back(SessionEvent::Connected);
            let held = std::mem::take(&mut state.pending);
            if !held.is_empty() {
                debug!(
                    space_id = %self.inner.space_id,
                    count = held.len(),
                    "Replaying frames held while disconnected"
                );
            }
            for item in held {
                state.enqueue(item);
            }
        }
        self.drain();
    }

    pub(crate) fn mark_disconnected(&self, reason: &str) {
        {
            let mut state = lock(&self.inner.state);
            if state.closed || !state.connected {
                return;
            }
            state.connected = false;
            state.outbox.push_back(SessionEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
        self.drain();
    }

    pub(crate) fn report_error(&self, err: RealtimeError) {
        {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return;
            }
            state.outbox.push_back(SessionEvent::Error(err));
        }
        self.drain();
    }

    pub(crate) fn mark_closed(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return;
            }
            state.closed = true;
            state.connected = false;
            state.pending.clear();
            state.outbox.push_back(SessionEvent::Closed);
        }
        self.drain();
    }

    /// Hands queued events to listeners until the outbox is empty.
    ///
    /// A call made while another drain is running (including from inside a
    /// listener) only queues; the running drain delivers.
    fn drain(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.draining {
                return;
            }
            state.draining = true;
        }
        let _guard = DrainGuard(&self.inner.state);

        loop {
            let event = {
                let mut state = lock(&self.inner.state);
                match state.outbox.pop_front() {
                    Some(event) => {
                        state.stats.dispatched += 1;
                        event
                    }
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            let listeners = lock(&self.inner.listeners).matching(event.kind());
            for listener in listeners {
                listener(&event);
            }
        }
    }
}

/// Releases the drain flag if a listener panics mid-drain.
struct DrainGuard<'a>(&'a Mutex<SessionState>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.0).draining = false;
        }
    }
}
