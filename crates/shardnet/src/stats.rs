//! Per-connection traffic counters.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters, shared between the tick context and the I/O tasks.
///
/// Counters are reset on every connect.
#[derive(Debug, Default)]
pub struct NetStatistics {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_sent: AtomicU64,
    connected_at: Mutex<Option<Instant>>,
}

/// A point-in-time copy of [`NetStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Bytes read from the transport.
    pub bytes_received: u64,
    /// Bytes written to the transport.
    pub bytes_sent: u64,
    /// Packets framed by the dispatcher, handled or not.
    pub packets_received: u64,
    /// Messages queued with `send`.
    pub packets_sent: u64,
    /// Time since the last successful connect.
    pub uptime: Option<Duration>,
}

impl NetStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            uptime: self.connected_at().map(|at| at.elapsed()),
        }
    }

    /// Zeroes every counter and starts the uptime clock.
    pub(crate) fn reset(&self) {
        self.bytes_received.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.packets_received.store(0, Ordering::Relaxed);
        self.packets_sent.store(0, Ordering::Relaxed);
        *self.slot() = Some(Instant::now());
    }

    pub(crate) fn stop_clock(&self) {
        *self.slot() = None;
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_packets_received(&self, count: usize) {
        self.packets_received.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn connected_at(&self) -> Option<Instant> {
        *self.slot()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.connected_at
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = NetStatistics::new();
        stats.record_received(10);
        stats.record_received(5);
        stats.record_sent(3);
        stats.record_packets_received(2);
        stats.record_packet_sent();

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_received, 15);
        assert_eq!(snap.bytes_sent, 3);
        assert_eq!(snap.packets_received, 2);
        assert_eq!(snap.packets_sent, 1);
        assert_eq!(snap.uptime, None);
    }

    #[test]
    fn test_reset_zeroes_and_starts_clock() {
        let stats = NetStatistics::new();
        stats.record_sent(99);
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_sent, 0);
        assert!(snap.uptime.is_some());

        stats.stop_clock();
        assert!(stats.snapshot().uptime.is_none());
    }
}
