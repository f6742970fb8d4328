//! Per-symbol gates serializing the engine's trading checks.
//!
//! Three gates run in order before a check may start: a throttle between
//! checks, exclusion of concurrent checks for the same symbol, and a
//! cooldown after a committed trade. All three are lock-free so the engine
//! loop never parks while screening a price event.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Gate state for one trading pair
pub struct SymbolGate {
    check_interval: Duration,
    cooldown: Duration,
    /// Epoch millis of the last check that passed all gates, 0 = never
    last_check_at_ms: AtomicI64,
    /// Epoch millis of the last committed trade, 0 = never
    last_trade_at_ms: AtomicI64,
    checking: AtomicBool,
}

impl SymbolGate {
    pub fn new(check_interval: Duration, cooldown: Duration) -> Self {
        Self {
            check_interval,
            cooldown,
            last_check_at_ms: AtomicI64::new(0),
            last_trade_at_ms: AtomicI64::new(0),
            checking: AtomicBool::new(false),
        }
    }

    /// Run the gates in order. On pass, advances the throttle clock and
    /// returns a permit that frees the symbol when dropped. Any gate
    /// failing is a silent no-op for the caller.
    pub fn try_begin_check(self: &Arc<Self>) -> Option<CheckPermit> {
        let now = Utc::now().timestamp_millis();

        if !window_elapsed(
            self.last_check_at_ms.load(Ordering::Relaxed),
            now,
            self.check_interval,
        ) {
            return None;
        }

        if self.checking.swap(true, Ordering::AcqRel) {
            return None;
        }

        if !window_elapsed(
            self.last_trade_at_ms.load(Ordering::Relaxed),
            now,
            self.cooldown,
        ) {
            self.checking.store(false, Ordering::Release);
            return None;
        }

        self.last_check_at_ms.store(now, Ordering::Relaxed);
        Some(CheckPermit {
            gate: Arc::clone(self),
        })
    }
}

/// Exclusive right to run one check for one symbol.
/// Dropping it reopens the symbol, whatever the check's outcome was.
pub struct CheckPermit {
    gate: Arc<SymbolGate>,
}

impl CheckPermit {
    /// Start the post-trade cooldown. Called only once a trade committed,
    /// so failed executions stay retryable on the next qualifying event.
    pub fn mark_trade(&self) {
        self.gate
            .last_trade_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

impl Drop for CheckPermit {
    fn drop(&mut self) {
        self.gate.checking.store(false, Ordering::Release);
    }
}

/// Whether enough time has passed since `last_ms` (0 meaning never)
fn window_elapsed(last_ms: i64, now_ms: i64, window: Duration) -> bool {
    last_ms == 0 || now_ms - last_ms >= window.as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_gate() -> Arc<SymbolGate> {
        Arc::new(SymbolGate::new(Duration::ZERO, Duration::ZERO))
    }

    #[test]
    fn throttle_blocks_back_to_back_checks() {
        let gate = Arc::new(SymbolGate::new(Duration::from_secs(10), Duration::ZERO));

        let first = gate.try_begin_check();
        assert!(first.is_some());
        drop(first);

        assert!(gate.try_begin_check().is_none());
    }

    #[test]
    fn concurrent_checks_are_exclusive() {
        let gate = open_gate();

        let held = gate.try_begin_check().expect("first check should pass");
        assert!(gate.try_begin_check().is_none());

        drop(held);
        assert!(gate.try_begin_check().is_some());
    }

    #[test]
    fn cooldown_blocks_checks_after_a_trade() {
        let gate = Arc::new(SymbolGate::new(Duration::ZERO, Duration::from_secs(180)));

        let permit = gate.try_begin_check().expect("gate starts open");
        permit.mark_trade();
        drop(permit);

        assert!(gate.try_begin_check().is_none());
    }

    #[test]
    fn blocked_check_does_not_advance_the_throttle() {
        let gate = Arc::new(SymbolGate::new(Duration::ZERO, Duration::from_secs(180)));

        // Fresh trade arms the cooldown; sentinel makes a re-stamp visible.
        gate.last_trade_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        gate.last_check_at_ms.store(12_345, Ordering::Relaxed);

        assert!(gate.try_begin_check().is_none());
        assert_eq!(gate.last_check_at_ms.load(Ordering::Relaxed), 12_345);
        assert!(!gate.checking.load(Ordering::Relaxed));
    }

    #[test]
    fn window_elapsed_semantics() {
        let window = Duration::from_secs(10);
        assert!(window_elapsed(0, 1_000, window));
        assert!(window_elapsed(1_000, 11_000, window));
        assert!(!window_elapsed(1_000, 10_999, window));
    }
}
