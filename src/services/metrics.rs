//! Metrics collection for monitoring bot activity

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Collected metrics for the trading bot
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Stream messages processed
    pub stream_messages: u64,
    /// Stream reconnect attempts
    pub stream_reconnects: u64,
    /// Auto-trading checks that passed all guards
    pub checks_run: u64,
    /// Order outcomes
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_failed: u64,
}

/// Thread-safe metrics collector
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    stream_messages: AtomicU64,
    stream_reconnects: AtomicU64,
    checks_run: AtomicU64,
    orders_submitted: AtomicU64,
    orders_filled: AtomicU64,
    orders_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                stream_messages: AtomicU64::new(0),
                stream_reconnects: AtomicU64::new(0),
                checks_run: AtomicU64::new(0),
                orders_submitted: AtomicU64::new(0),
                orders_filled: AtomicU64::new(0),
                orders_failed: AtomicU64::new(0),
            }),
        }
    }

    pub fn inc_stream_messages(&self) {
        self.inner.stream_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stream_reconnects(&self) {
        self.inner.stream_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_checks_run(&self) {
        self.inner.checks_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orders_submitted(&self) {
        self.inner.orders_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orders_filled(&self) {
        self.inner.orders_filled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orders_failed(&self) {
        self.inner.orders_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            stream_messages: self.inner.stream_messages.load(Ordering::Relaxed),
            stream_reconnects: self.inner.stream_reconnects.load(Ordering::Relaxed),
            checks_run: self.inner.checks_run.load(Ordering::Relaxed),
            orders_submitted: self.inner.orders_submitted.load(Ordering::Relaxed),
            orders_filled: self.inner.orders_filled.load(Ordering::Relaxed),
            orders_failed: self.inner.orders_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
