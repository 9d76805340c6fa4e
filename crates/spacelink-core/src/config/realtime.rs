//! Real-time connection and session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Real-time (WebSocket) connection configuration.
///
/// Keys are snake_case in TOML; the camelCase option names used by the
/// collaboration service's client libraries are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Base URL of the real-time service, e.g. `wss://collab.example.com`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Reconnection attempts before a connection gives up.
    #[serde(default = "default_max_reconnect_attempts", alias = "maxReconnectAttempts")]
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt, in milliseconds.
    #[serde(default = "default_reconnect_base_delay", alias = "reconnectBaseDelayMs")]
    pub reconnect_base_delay_ms: u64,
    /// Upper bound for the exponential backoff delay, in milliseconds.
    #[serde(default = "default_reconnect_max_delay", alias = "reconnectMaxDelayMs")]
    pub reconnect_max_delay_ms: u64,
    /// Heartbeat probe interval in milliseconds. `0` disables heartbeats.
    #[serde(default = "default_heartbeat_interval", alias = "heartbeatIntervalMs")]
    pub heartbeat_interval_ms: u64,
    /// Handshake timeout in milliseconds.
    #[serde(default = "default_connection_timeout", alias = "connectionTimeoutMs")]
    pub connection_timeout_ms: u64,
    /// Frames a session buffers while not yet connected.
    #[serde(default = "default_pending_queue_capacity")]
    pub pending_queue_capacity: usize,
    /// Capacity of the per-transport outbound and inbound frame channels.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer_size: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            connection_timeout_ms: default_connection_timeout(),
            pending_queue_capacity: default_pending_queue_capacity(),
            outbound_buffer_size: default_outbound_buffer(),
        }
    }
}

impl RealtimeConfig {
    /// Delay before the first reconnection attempt.
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Backoff ceiling.
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Heartbeat interval, or `None` when heartbeats are disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Handshake timeout.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Checks the settings for combinations the connection layer cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.reconnect_base_delay_ms == 0 {
            return Err(AppError::validation(
                "reconnect_base_delay_ms must be greater than zero",
            ));
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(AppError::validation(format!(
                "reconnect_max_delay_ms ({}) is below reconnect_base_delay_ms ({})",
                self.reconnect_max_delay_ms, self.reconnect_base_delay_ms
            )));
        }
        if self.connection_timeout_ms == 0 {
            return Err(AppError::validation(
                "connection_timeout_ms must be greater than zero",
            ));
        }
        if self.heartbeat_interval_ms > MAX_HEARTBEAT_INTERVAL_MS {
            return Err(AppError::validation(format!(
                "heartbeat_interval_ms ({}) exceeds {MAX_HEARTBEAT_INTERVAL_MS}",
                self.heartbeat_interval_ms
            )));
        }
        if self.pending_queue_capacity == 0 || self.outbound_buffer_size == 0 {
            return Err(AppError::validation(
                "pending_queue_capacity and outbound_buffer_size must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Upper bound for `heartbeat_interval_ms` (one hour).
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 3_600_000;

fn default_endpoint() -> String {
    "wss://localhost".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay() -> u64 {
    1000
}

fn default_reconnect_max_delay() -> u64 {
    30_000
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_connection_timeout() -> u64 {
    10_000
}

fn default_pending_queue_capacity() -> usize {
    1024
}

fn default_outbound_buffer() -> usize {
    256
}
