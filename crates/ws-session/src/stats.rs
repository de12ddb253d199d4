//! Connection statistics: monotonic counters shared across threads.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Cross-thread counters updated by the I/O thread and read by any thread.
///
/// Counters only ever reset when the engine that owns them is recreated.
#[derive(Debug, Default)]
pub struct StatsInner {
    total_messages_sent: AtomicU64,
    total_messages_received: AtomicU64,
    total_bytes_sent: AtomicU64,
    total_bytes_received: AtomicU64,
    current_send_queue_size: AtomicI64,
}

/// A shared handle to one engine's statistics.
#[derive(Debug, Clone, Default)]
pub struct Stats(Arc<StatsInner>);

impl Stats {
    pub fn new() -> Self {
        Self(Arc::new(StatsInner::default()))
    }

    pub fn record_sent(&self, bytes: usize) {
        self.0.total_messages_sent.fetch_add(1, Ordering::Relaxed);
        self.0
            .total_bytes_sent
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.0
            .total_messages_received
            .fetch_add(1, Ordering::Relaxed);
        self.0
            .total_bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn queue_incremented(&self) {
        self.0.current_send_queue_size.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_decremented(&self) {
        self.0.current_send_queue_size.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            total_messages_sent: self.0.total_messages_sent.load(Ordering::Relaxed),
            total_messages_received: self.0.total_messages_received.load(Ordering::Relaxed),
            total_bytes_sent: self.0.total_bytes_sent.load(Ordering::Relaxed),
            total_bytes_received: self.0.total_bytes_received.load(Ordering::Relaxed),
            current_send_queue_size: self.0.current_send_queue_size.load(Ordering::Relaxed).max(0) as u64,
        }
    }
}

/// A point-in-time snapshot of a session's statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub total_messages_sent: u64,
    pub total_messages_received: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub current_send_queue_size: u64,
}
