//! Shared connection and trading health state.
//!
//! One instance is created at startup and handed to every service. The feed
//! task is the only writer of the stream-health flags; the REST bootstrap
//! owns `api_connected`; the relay and engine only read. `trading_enabled`
//! is always the conjunction of stream and REST health, while
//! `auto_trading_enabled` is operator intent and survives outages.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backoff doubles per failed attempt and caps at base * 2^5
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Serializable view of the connection state for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub connected: bool,
    pub api_connected: bool,
    pub trading_enabled: bool,
    pub auto_trading_enabled: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
}

/// Thread-safe connection state shared across services
#[derive(Debug, Clone)]
pub struct ConnectionState {
    inner: Arc<ConnectionStateInner>,
}

#[derive(Debug)]
struct ConnectionStateInner {
    connected: AtomicBool,
    api_connected: AtomicBool,
    trading_enabled: AtomicBool,
    auto_trading_enabled: AtomicBool,
    /// Epoch millis of the last stream message, 0 = none yet
    last_message_at_ms: AtomicI64,
    reconnect_attempts: AtomicU32,
    /// Epoch millis of the last failed connect attempt, 0 = none yet
    last_failure_at_ms: AtomicI64,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ConnectionStateInner {
                connected: AtomicBool::new(false),
                api_connected: AtomicBool::new(false),
                trading_enabled: AtomicBool::new(false),
                auto_trading_enabled: AtomicBool::new(false),
                last_message_at_ms: AtomicI64::new(0),
                reconnect_attempts: AtomicU32::new(0),
                last_failure_at_ms: AtomicI64::new(0),
            }),
        }
    }

    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    pub fn api_connected(&self) -> bool {
        self.inner.api_connected.load(Ordering::Relaxed)
    }

    pub fn trading_enabled(&self) -> bool {
        self.inner.trading_enabled.load(Ordering::Relaxed)
    }

    pub fn auto_trading_enabled(&self) -> bool {
        self.inner.auto_trading_enabled.load(Ordering::Relaxed)
    }

    /// Stream health changed. Trading capability follows from stream + REST.
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::Relaxed);
        self.recompute_trading_enabled();
    }

    /// REST health changed (bootstrap ping, auth failures)
    pub fn set_api_connected(&self, api_connected: bool) {
        self.inner.api_connected.store(api_connected, Ordering::Relaxed);
        self.recompute_trading_enabled();
    }

    fn recompute_trading_enabled(&self) {
        let enabled = self.connected() && self.api_connected();
        self.inner.trading_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Flip operator intent and return the state actually in effect
    pub fn set_auto_trading(&self, enabled: bool) -> bool {
        self.inner.auto_trading_enabled.store(enabled, Ordering::Relaxed);
        self.auto_trading_enabled()
    }

    /// Record that a stream message arrived just now
    pub fn mark_message(&self) {
        self.inner
            .last_message_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Time since the last stream message, None before the first one
    pub fn last_message_age(&self) -> Option<Duration> {
        let last = self.inner.last_message_at_ms.load(Ordering::Relaxed);
        if last == 0 {
            return None;
        }
        let age_ms = (Utc::now().timestamp_millis() - last).max(0) as u64;
        Some(Duration::from_millis(age_ms))
    }

    /// Size this attempt up against the end of the previous failed one. An
    /// attempt starting long after that is a fresh outage, so the ladder
    /// starts over.
    pub fn begin_reconnect_attempt(&self, base: Duration) -> u32 {
        let last = self.inner.last_failure_at_ms.load(Ordering::Relaxed);

        if last != 0 {
            let now = Utc::now().timestamp_millis();
            let gap = Duration::from_millis((now - last).max(0) as u64);
            let attempts = self.inner.reconnect_attempts.load(Ordering::Relaxed);
            let reset = attempts_after_gap(attempts, gap, Self::max_reconnect_delay(base));
            if reset != attempts {
                self.inner.reconnect_attempts.store(reset, Ordering::Relaxed);
            }
        }

        self.inner.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Count a failed attempt. The gap feeding the reset rule is measured
    /// from this completion, not from when the attempt began, so a slow
    /// failure cannot pass for a quiet period.
    pub fn record_reconnect_failure(&self) -> u32 {
        self.inner
            .last_failure_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.inner.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_reconnect_attempts(&self) {
        self.inner.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    /// Delay before the next attempt: base * 2^min(attempts, 5)
    pub fn reconnect_delay(&self, base: Duration) -> Duration {
        let attempts = self.inner.reconnect_attempts.load(Ordering::Relaxed);
        base * 2u32.pow(attempts.min(MAX_BACKOFF_EXPONENT))
    }

    pub fn max_reconnect_delay(base: Duration) -> Duration {
        base * 2u32.pow(MAX_BACKOFF_EXPONENT)
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let last_ms = self.inner.last_message_at_ms.load(Ordering::Relaxed);
        let last_message_at = if last_ms == 0 {
            None
        } else {
            Utc.timestamp_millis_opt(last_ms).single()
        };

        ConnectionSnapshot {
            connected: self.connected(),
            api_connected: self.api_connected(),
            trading_enabled: self.trading_enabled(),
            auto_trading_enabled: self.auto_trading_enabled(),
            last_message_at,
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// A gap longer than the maximum backoff delay means the previous outage is
/// over, so the attempt counter goes back to zero.
fn attempts_after_gap(attempts: u32, gap: Duration, max_delay: Duration) -> u32 {
    if gap > max_delay {
        0
    } else {
        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trading_enabled_requires_stream_and_api() {
        let state = ConnectionState::new();
        assert!(!state.trading_enabled());

        state.set_connected(true);
        assert!(!state.trading_enabled());

        state.set_api_connected(true);
        assert!(state.trading_enabled());

        state.set_connected(false);
        assert!(!state.trading_enabled());
    }

    #[test]
    fn auto_trading_survives_disconnect() {
        let state = ConnectionState::new();
        state.set_connected(true);
        state.set_api_connected(true);
        assert!(state.set_auto_trading(true));

        state.set_connected(false);
        assert!(!state.trading_enabled());
        assert!(state.auto_trading_enabled());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let state = ConnectionState::new();
        let base = Duration::from_secs(1);

        let mut delays = Vec::new();
        for _ in 0..8 {
            delays.push(state.reconnect_delay(base).as_secs());
            state.record_reconnect_failure();
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 32, 32]);

        state.reset_reconnect_attempts();
        assert_eq!(state.reconnect_delay(base), base);
    }

    #[test]
    fn long_gap_resets_attempt_counter() {
        let max = Duration::from_secs(32);
        assert_eq!(attempts_after_gap(4, Duration::from_secs(33), max), 0);
        assert_eq!(attempts_after_gap(4, Duration::from_secs(32), max), 4);
        assert_eq!(attempts_after_gap(0, Duration::from_secs(100), max), 0);
    }

    #[tokio::test]
    async fn slow_failed_attempt_does_not_reset_the_ladder() {
        let state = ConnectionState::new();
        // base 5ms puts the maximum delay at 160ms
        let base = Duration::from_millis(5);

        state.begin_reconnect_attempt(base);
        // The attempt itself outlasts the maximum backoff delay before
        // failing; only time after the failure may count as a gap.
        tokio::time::sleep(Duration::from_millis(250)).await;
        state.record_reconnect_failure();

        assert_eq!(state.begin_reconnect_attempt(base), 1);
    }

    #[tokio::test]
    async fn quiet_period_after_a_failure_resets_the_ladder() {
        let state = ConnectionState::new();
        let base = Duration::from_millis(5);

        for _ in 0..3 {
            state.record_reconnect_failure();
        }
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(state.begin_reconnect_attempt(base), 0);
    }

    #[test]
    fn snapshot_reports_message_age() {
        let state = ConnectionState::new();
        assert!(state.last_message_age().is_none());
        assert!(state.snapshot().last_message_at.is_none());

        state.mark_message();
        assert!(state.last_message_age().unwrap() < Duration::from_secs(1));
        assert!(state.snapshot().last_message_at.is_some());
    }
}
