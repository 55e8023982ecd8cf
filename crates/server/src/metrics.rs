//! Lock-free server counters.
//!
//! The tick thread, the saver and the connection tasks update these with
//! relaxed atomics; the periodic status line reads them through
//! [`Metrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

use lowcraft_engine::world::SaveReport;

pub struct Metrics {
    // Monotonic counters
    ticks: AtomicU64,
    lag_ticks: AtomicU64,
    tick_ns_sum: AtomicU64,
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    protocol_errors: AtomicU64,
    chunks_saved: AtomicU64,
    save_failures: AtomicU64,

    // Tick duration histogram
    hist_under_10ms: AtomicU64,
    hist_10_25ms: AtomicU64,
    hist_25_50ms: AtomicU64,
    hist_50_100ms: AtomicU64,
    hist_over_100ms: AtomicU64,

    // Gauges
    players_connected: AtomicU64,

    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            lag_ticks: AtomicU64::new(0),
            tick_ns_sum: AtomicU64::new(0),
            connections_accepted: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            chunks_saved: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
            hist_under_10ms: AtomicU64::new(0),
            hist_10_25ms: AtomicU64::new(0),
            hist_25_50ms: AtomicU64::new(0),
            hist_50_100ms: AtomicU64::new(0),
            hist_over_100ms: AtomicU64::new(0),
            players_connected: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Called once per tick with its work time and the timer's lag total.
    pub fn record_tick(&self, duration: Duration, lag_ticks: u64) {
        self.ticks.fetch_add(1, Relaxed);
        self.lag_ticks.store(lag_ticks, Relaxed);
        self.tick_ns_sum.fetch_add(duration.as_nanos() as u64, Relaxed);

        let bucket = match duration.as_millis() {
            0..=9 => &self.hist_under_10ms,
            10..=24 => &self.hist_10_25ms,
            25..=49 => &self.hist_25_50ms,
            50..=99 => &self.hist_50_100ms,
            _ => &self.hist_over_100ms,
        };
        bucket.fetch_add(1, Relaxed);
    }

    pub fn record_save(&self, report: &SaveReport) {
        self.chunks_saved.fetch_add(report.saved as u64, Relaxed);
        self.save_failures.fetch_add(report.failed as u64, Relaxed);
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Relaxed);
    }

    pub fn player_joined(&self) {
        self.players_connected.fetch_add(1, Relaxed);
    }

    pub fn player_left(&self) {
        self.players_connected.fetch_sub(1, Relaxed);
    }

    /// Read all counters into a serializable snapshot.
    pub fn snapshot(&self, chunks_loaded: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            ticks: self.ticks.load(Relaxed),
            lag_ticks: self.lag_ticks.load(Relaxed),
            tick_ns_sum: self.tick_ns_sum.load(Relaxed),
            connections_accepted: self.connections_accepted.load(Relaxed),
            connections_rejected: self.connections_rejected.load(Relaxed),
            protocol_errors: self.protocol_errors.load(Relaxed),
            chunks_saved: self.chunks_saved.load(Relaxed),
            save_failures: self.save_failures.load(Relaxed),
            chunks_loaded,
            players: self.players_connected.load(Relaxed),
            hist: [
                self.hist_under_10ms.load(Relaxed),
                self.hist_10_25ms.load(Relaxed),
                self.hist_25_50ms.load(Relaxed),
                self.hist_50_100ms.load(Relaxed),
                self.hist_over_100ms.load(Relaxed),
            ],
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub ticks: u64,
    pub lag_ticks: u64,
    pub tick_ns_sum: u64,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub protocol_errors: u64,
    pub chunks_saved: u64,
    pub save_failures: u64,
    pub chunks_loaded: u64,
    pub players: u64,
    /// `[<10ms, 10-25ms, 25-50ms, 50-100ms, >100ms]`
    pub hist: [u64; 5],
}

impl MetricsSnapshot {
    /// Mean tick work time, or zero before the first tick.
    pub fn mean_tick(&self) -> Duration {
        if self.ticks == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.tick_ns_sum / self.ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_histogram_buckets() {
        let m = Metrics::new();
        m.record_tick(Duration::from_millis(3), 0);
        m.record_tick(Duration::from_millis(30), 0);
        m.record_tick(Duration::from_millis(250), 1);
        let snap = m.snapshot(7);
        assert_eq!(snap.ticks, 3);
        assert_eq!(snap.lag_ticks, 1);
        assert_eq!(snap.hist, [1, 0, 1, 0, 1]);
        assert_eq!(snap.chunks_loaded, 7);
        assert_eq!(snap.mean_tick(), Duration::from_nanos(283_000_000 / 3));
    }

    #[test]
    fn save_reports_accumulate() {
        let m = Metrics::new();
        m.record_save(&SaveReport { saved: 4, failed: 1 });
        m.record_save(&SaveReport { saved: 2, failed: 0 });
        let snap = m.snapshot(0);
        assert_eq!(snap.chunks_saved, 6);
        assert_eq!(snap.save_failures, 1);
    }
}
