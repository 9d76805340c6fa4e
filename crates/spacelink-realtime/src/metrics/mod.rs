//! Connection-layer metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters shared by every connection of one manager.
#[derive(Debug, Default)]
pub struct RealtimeMetrics {
    /// Frames handed to a transport
    frames_sent: AtomicU64,
    /// Frames decoded from a transport
    frames_received: AtomicU64,
    /// Frames that failed to decode
    decode_failures: AtomicU64,
    /// Transports opened (initial and reconnects)
    connections_opened: AtomicU64,
    /// Reconnection attempts scheduled
    reconnect_attempts: AtomicU64,
    /// Connections that exhausted their attempts
    give_ups: AtomicU64,
}

impl RealtimeMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reconnect_scheduled(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn gave_up(&self) {
        self.give_ups.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            give_ups: self.give_ups.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Frames handed to a transport
    pub frames_sent: u64,
    /// Frames decoded from a transport
    pub frames_received: u64,
    /// Frames that failed to decode
    pub decode_failures: u64,
    /// Transports opened
    pub connections_opened: u64,
    /// Reconnection attempts scheduled
    pub reconnect_attempts: u64,
    /// Connections that gave up
    pub give_ups: u64,
}
