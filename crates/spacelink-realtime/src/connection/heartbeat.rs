//! Heartbeat probes and round-trip latency measurement.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use spacelink_core::config::realtime::MAX_HEARTBEAT_INTERVAL_MS;
use spacelink_core::types::SpaceId;

use crate::message::envelope::{Envelope, MessageType};
use crate::message::serializer;
use crate::sync::lock;

/// Bookkeeping for outstanding probes.
///
/// Only the most recent probe is matched for latency. Liveness is judged
/// from the oldest probe that has not seen *any* response since it was sent.
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    latest: Option<(u64, Instant)>,
    awaiting_since: Option<Instant>,
}

impl HeartbeatTracker {
    /// Records a probe sent at `now` carrying `client_time`.
    pub fn begin_probe(&mut self, client_time: u64, now: Instant) {
        self.latest = Some((client_time, now));
        self.awaiting_since.get_or_insert(now);
    }

    /// Records a response echoing `client_time`; returns the round-trip time
    /// when it answers the latest probe.
    pub fn on_response(&mut self, client_time: u64, now: Instant) -> Option<Duration> {
        self.awaiting_since = None;
        match self.latest {
            Some((sent_time, sent_at)) if sent_time == client_time => {
                self.latest = None;
                Some(now.saturating_duration_since(sent_at))
            }
            _ => None,
        }
    }

    /// Whether an unanswered probe is older than `timeout`.
    pub fn is_overdue(&self, now: Instant, timeout: Duration) -> bool {
        self.awaiting_since
            .is_some_and(|since| now.saturating_duration_since(since) >= timeout)
    }
}

/// Periodic liveness probe for one transport.
///
/// Sends a `heartbeat` frame every `interval`. If no `heartbeat_response`
/// arrives within `2 × interval` of an unanswered probe, `on_expired` runs
/// once and the loop ends. Stopping is synchronous and idempotent; a stopped
/// monitor never calls `on_expired` and drops its transport sender.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    space_id: SpaceId,
    tracker: Arc<Mutex<HeartbeatTracker>>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Spawns the probe loop.
    pub fn start<F>(
        space_id: SpaceId,
        interval: Duration,
        outbound: mpsc::Sender<String>,
        on_expired: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let tracker = Arc::new(Mutex::new(HeartbeatTracker::default()));
        let cancel = CancellationToken::new();

        tokio::spawn(run_heartbeat(
            space_id.clone(),
            interval,
            outbound,
            tracker.clone(),
            cancel.clone(),
            on_expired,
        ));

        Self {
            space_id,
            tracker,
            cancel,
        }
    }

    /// Feeds a `heartbeat_response` payload; returns the measured latency.
    pub fn record_response(&self, data: &Value) -> Option<Duration> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let client_time = data.get("clientTime").and_then(Value::as_u64)?;
        let latency = lock(&self.tracker).on_response(client_time, Instant::now());
        if let Some(latency) = latency {
            debug!(
                space_id = %self.space_id,
                latency_ms = latency.as_millis() as u64,
                "Heartbeat round trip"
            );
        }
        latency
    }

    /// Stops probing.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether [`HeartbeatMonitor::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_heartbeat<F>(
    space_id: SpaceId,
    interval: Duration,
    outbound: mpsc::Sender<String>,
    tracker: Arc<Mutex<HeartbeatTracker>>,
    cancel: CancellationToken,
    on_expired: F,
) where
    F: FnOnce() + Send + 'static,
{
    let interval = interval.min(Duration::from_millis(MAX_HEARTBEAT_INTERVAL_MS));
    let epoch = Instant::now();
    let mut ticker = time::interval_at(epoch + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let timeout = interval * 2;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        if lock(&tracker).is_overdue(now, timeout) {
            // Stop and expire are mutually exclusive: check under the same flag.
            if !cancel.is_cancelled() {
                cancel.cancel();
                warn!(
                    space_id = %space_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Heartbeat response overdue"
                );
                on_expired();
            }
            break;
        }

        let client_time = now.duration_since(epoch).as_millis() as u64;
        let probe = Envelope::new(
            MessageType::Heartbeat,
            space_id.clone(),
            json!({
                "timestamp": Utc::now().timestamp_millis(),
                "clientTime": client_time,
            }),
        );
        let frame = match serializer::encode(&probe) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(space_id = %space_id, error = %e, "Failed to encode heartbeat");
                continue;
            }
        };

        lock(&tracker).begin_probe(client_time, now);
        match outbound.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(space_id = %space_id, "Outbound buffer full, heartbeat skipped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(space_id = %space_id, "Transport closed, heartbeat loop ending");
                break;
            }
        }
    }

    debug!(space_id = %space_id, "Heartbeat loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn client_time_of(frame: &str) -> u64 {
        let envelope = serializer::decode(frame).expect("heartbeat frame");
        assert_eq!(envelope.kind(), &MessageType::Heartbeat);
        envelope.data()["clientTime"].as_u64().expect("clientTime")
    }

    #[test]
    fn test_latency_of_matching_response() {
        let t0 = Instant::now();
        let mut tracker = HeartbeatTracker::default();
        tracker.begin_probe(100, t0);
        let latency = tracker.on_response(100, t0 + Duration::from_millis(40));
        assert_eq!(latency, Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_only_latest_probe_is_matched() {
        let t0 = Instant::now();
        let mut tracker = HeartbeatTracker::default();
        tracker.begin_probe(100, t0);
        tracker.begin_probe(200, t0 + Duration::from_millis(10));
        assert_eq!(tracker.on_response(100, t0 + Duration::from_millis(30)), None);
        assert!(!tracker.is_overdue(t0 + Duration::from_secs(60), Duration::from_secs(1)));
    }

    #[test]
    fn test_overdue_measured_from_oldest_unanswered_probe() {
        let t0 = Instant::now();
        let mut tracker = HeartbeatTracker::default();
        tracker.begin_probe(1, t0);
        tracker.begin_probe(2, t0 + Duration::from_millis(500));
        let timeout = Duration::from_millis(1000);
        assert!(!tracker.is_overdue(t0 + Duration::from_millis(999), timeout));
        assert!(tracker.is_overdue(t0 + Duration::from_millis(1000), timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_and_latency_report() {
        let (tx, mut rx) = mpsc::channel(8);
        let monitor = HeartbeatMonitor::start(
            SpaceId::from("s1"),
            Duration::from_millis(1000),
            tx,
            || {},
        );

        let frame = rx.recv().await.expect("first probe");
        let client_time = client_time_of(&frame);
        assert_eq!(client_time, 1000);

        time::advance(Duration::from_millis(40)).await;
        let latency = monitor.record_response(&json!({"clientTime": client_time, "timestamp": 0}));
        assert_eq!(latency, Some(Duration::from_millis(40)));
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_two_intervals_without_response() {
        let (tx, mut rx) = mpsc::channel(8);
        let (expired_tx, expired_rx) = oneshot::channel();
        let started = Instant::now();
        let _monitor = HeartbeatMonitor::start(
            SpaceId::from("s1"),
            Duration::from_millis(1000),
            tx,
            move || {
                let _ = expired_tx.send(Instant::now());
            },
        );

        let expired_at = expired_rx.await.expect("expiry");
        assert_eq!(expired_at - started, Duration::from_millis(3000));

        let mut probes = 0;
        while rx.recv().await.is_some() {
            probes += 1;
        }
        assert_eq!(probes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_suppresses_expiry() {
        let (tx, mut rx) = mpsc::channel(8);
        let (expired_tx, mut expired_rx) = oneshot::channel::<()>();
        let monitor = HeartbeatMonitor::start(
            SpaceId::from("s1"),
            Duration::from_millis(1000),
            tx,
            move || {
                let _ = expired_tx.send(());
            },
        );

        assert!(rx.recv().await.is_some());
        monitor.stop();
        monitor.stop();
        assert!(monitor.is_stopped());

        time::sleep(Duration::from_secs(10)).await;
        assert!(rx.recv().await.is_none());
        assert!(expired_rx.try_recv().is_err());
        assert_eq!(monitor.record_response(&json!({"clientTime": 1000})), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_interval_is_clamped() {
        let (tx, mut rx) = mpsc::channel(8);
        let started = Instant::now();
        let monitor = HeartbeatMonitor::start(SpaceId::from("s1"), Duration::MAX, tx, || {});

        assert!(rx.recv().await.is_some());
        assert_eq!(
            started.elapsed(),
            Duration::from_millis(MAX_HEARTBEAT_INTERVAL_MS)
        );
        assert!(!monitor.is_stopped());
        monitor.stop();
    }
}
