//! Exponential backoff scheduling for one connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::debug;

use spacelink_core::config::RealtimeConfig;

use crate::sync::lock;

/// Deterministic backoff: attempt `k` waits `min(base * 2^(k-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay of the first attempt.
    pub base: Duration,
    /// Ceiling for any attempt.
    pub max: Duration,
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Builds the policy from real-time settings.
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self {
            base: config.reconnect_base_delay(),
            max: config.reconnect_max_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before attempt `attempt` (1-based; 0 is treated as 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Whether another attempt may follow `attempts_made` failed ones.
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

#[derive(Debug)]
struct TimerState {
    /// Set once, by whichever of fire/cancel gets there first.
    settled: Arc<AtomicBool>,
    abort: AbortHandle,
}

/// A scheduled reconnection attempt that can be cancelled.
#[derive(Debug, Clone)]
pub struct RetryTimer {
    attempt: u32,
    delay: Duration,
    state: Arc<TimerState>,
}

impl RetryTimer {
    /// Attempt number this timer fires for.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the timer was armed with.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancels the timer. Returns `true` if this call prevented the callback.
    ///
    /// Idempotent; once the callback has started, cancelling has no effect.
    pub fn cancel(&self) -> bool {
        let prevented = !self.state.settled.swap(true, Ordering::SeqCst);
        self.state.abort.abort();
        prevented
    }

    /// Whether the timer fired or was cancelled.
    pub fn is_settled(&self) -> bool {
        self.state.settled.load(Ordering::SeqCst)
    }
}

/// Owns the retry timer of one connection.
#[derive(Debug)]
pub struct ReconnectController {
    policy: BackoffPolicy,
    current: Mutex<Option<RetryTimer>>,
}

impl ReconnectController {
    /// Creates a controller with no timer armed.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: Mutex::new(None),
        }
    }

    /// Backoff policy in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Arms a timer for `attempt`, replacing (and cancelling) any previous one.
    ///
    /// `on_fire` runs on the runtime after the backoff delay unless the timer
    /// is cancelled first. Must be called from within a tokio runtime.
    pub fn schedule_retry<F>(&self, attempt: u32, on_fire: F) -> RetryTimer
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = self.policy.delay_for(attempt);
        let settled = Arc::new(AtomicBool::new(false));
        let fire_flag = settled.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !fire_flag.swap(true, Ordering::SeqCst) {
                on_fire();
            }
        });

        let state = Arc::new(TimerState {
            settled,
            abort: task.abort_handle(),
        });
        let timer = RetryTimer {
            attempt,
            delay,
            state,
        };

        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect timer armed");

        if let Some(previous) = lock(&self.current).replace(timer.clone()) {
            previous.cancel();
        }
        timer
    }

    /// Cancels the armed timer, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(timer) = lock(&self.current).take() {
            timer.cancel();
        }
    }
}
