//! Per-bridge operational metrics.
//!
//! One `Metrics` instance is owned by each bridge (never a process-global
//! singleton), matching the "global metrics -> per-bridge struct" design
//! note. Latency is tracked as a running exponential mean rather than a
//! retained sample buffer, the way the connection manager this is adapted
//! from tracks its own query latency.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Snapshot of bridge metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub queries_total: u64,
    pub queries_succeeded: u64,
    pub queries_failed: u64,
    pub slow_queries: u64,
    pub avg_query_time_ms: f64,
    pub connections_acquired: u64,
    pub connections_released: u64,
    pub connection_errors: u64,
    pub vectors_inserted: u64,
    pub vectors_updated: u64,
    pub vectors_deleted: u64,
    pub searches_performed: u64,
    pub last_query_time: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self, prefix: &str) -> String {
        format!(
            "# TYPE {prefix}_queries_total counter\n\
             {prefix}_queries_total {}\n\
             # TYPE {prefix}_queries_succeeded counter\n\
             {prefix}_queries_succeeded {}\n\
             # TYPE {prefix}_queries_failed counter\n\
             {prefix}_queries_failed {}\n\
             # TYPE {prefix}_slow_queries counter\n\
             {prefix}_slow_queries {}\n\
             # TYPE {prefix}_avg_query_time_ms gauge\n\
             {prefix}_avg_query_time_ms {:.3}\n\
             # TYPE {prefix}_connections_acquired counter\n\
             {prefix}_connections_acquired {}\n\
             # TYPE {prefix}_connections_released counter\n\
             {prefix}_connections_released {}\n\
             # TYPE {prefix}_connection_errors counter\n\
             {prefix}_connection_errors {}\n\
             # TYPE {prefix}_vectors_inserted counter\n\
             {prefix}_vectors_inserted {}\n\
             # TYPE {prefix}_vectors_updated counter\n\
             {prefix}_vectors_updated {}\n\
             # TYPE {prefix}_vectors_deleted counter\n\
             {prefix}_vectors_deleted {}\n\
             # TYPE {prefix}_searches_performed counter\n\
             {prefix}_searches_performed {}\n\
             # TYPE {prefix}_uptime_secs gauge\n\
             {prefix}_uptime_secs {}\n",
            self.queries_total,
            self.queries_succeeded,
            self.queries_failed,
            self.slow_queries,
            self.avg_query_time_ms,
            self.connections_acquired,
            self.connections_released,
            self.connection_errors,
            self.vectors_inserted,
            self.vectors_updated,
            self.vectors_deleted,
            self.searches_performed,
            self.uptime_secs,
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Running query-latency average computed with an exponential moving
/// average, matching the reference crate's `LatencyStats::record`
/// approximation rather than a percentile sketch.
#[derive(Debug)]
struct RunningAverage {
    bits: AtomicU64,
}

impl RunningAverage {
    fn new() -> Self {
        Self { bits: AtomicU64::new(0.0f64.to_bits()) }
    }

    fn record(&self, sample_ms: f64) {
        loop {
            let current_bits = self.bits.load(Ordering::Relaxed);
            let current = f64::from_bits(current_bits);
            let updated = if current == 0.0 {
                sample_ms
            } else {
                (current * 9.0 + sample_ms) / 10.0
            };
            if self
                .bits
                .compare_exchange_weak(
                    current_bits,
                    updated.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Thread-safe counters and running latency average owned by one bridge.
pub struct Metrics {
    queries_total: AtomicU64,
    queries_succeeded: AtomicU64,
    queries_failed: AtomicU64,
    slow_queries: AtomicU64,
    connections_acquired: AtomicU64,
    connections_released: AtomicU64,
    connection_errors: AtomicU64,
    vectors_inserted: AtomicU64,
    vectors_updated: AtomicU64,
    vectors_deleted: AtomicU64,
    searches_performed: AtomicU64,
    /// Milliseconds since the Unix epoch; `0` means no query has run yet.
    last_query_time_ms: AtomicI64,
    avg_query_time_ms: RunningAverage,
    slow_query_threshold_ms: u64,
    started_at: Instant,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("snapshot", &self.snapshot()).finish()
    }
}

impl Metrics {
    pub fn new(slow_query_threshold_ms: u64) -> Self {
        Self {
            queries_total: AtomicU64::new(0),
            queries_succeeded: AtomicU64::new(0),
            queries_failed: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
            connections_acquired: AtomicU64::new(0),
            connections_released: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            vectors_inserted: AtomicU64::new(0),
            vectors_updated: AtomicU64::new(0),
            vectors_deleted: AtomicU64::new(0),
            searches_performed: AtomicU64::new(0),
            last_query_time_ms: AtomicI64::new(0),
            avg_query_time_ms: RunningAverage::new(),
            slow_query_threshold_ms,
            started_at: Instant::now(),
        }
    }

    pub fn record_query_success(&self, elapsed_ms: u64) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        self.queries_succeeded.fetch_add(1, Ordering::Relaxed);
        self.avg_query_time_ms.record(elapsed_ms as f64);
        self.last_query_time_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        if elapsed_ms >= self.slow_query_threshold_ms {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_query_failure(&self) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
        self.last_query_time_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_connection_acquired(&self) {
        self.connections_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_released(&self) {
        self.connections_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vectors_inserted(&self, count: u64) {
        self.vectors_inserted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_vectors_updated(&self, count: u64) {
        self.vectors_updated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_vectors_deleted(&self, count: u64) {
        self.vectors_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_search_performed(&self) {
        self.searches_performed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_slow(&self, elapsed_ms: u64) -> bool {
        elapsed_ms >= self.slow_query_threshold_ms
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_query_ms = self.last_query_time_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            queries_total: self.queries_total.load(Ordering::Relaxed),
            queries_succeeded: self.queries_succeeded.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            avg_query_time_ms: self.avg_query_time_ms.get(),
            connections_acquired: self.connections_acquired.load(Ordering::Relaxed),
            connections_released: self.connections_released.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            vectors_inserted: self.vectors_inserted.load(Ordering::Relaxed),
            vectors_updated: self.vectors_updated.load(Ordering::Relaxed),
            vectors_deleted: self.vectors_deleted.load(Ordering::Relaxed),
            searches_performed: self.searches_performed.load(Ordering::Relaxed),
            last_query_time: if last_query_ms == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(last_query_ms).single()
            },
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    pub fn reset(&self) {
        self.queries_total.store(0, Ordering::Relaxed);
        self.queries_succeeded.store(0, Ordering::Relaxed);
        self.queries_failed.store(0, Ordering::Relaxed);
        self.slow_queries.store(0, Ordering::Relaxed);
        self.connections_acquired.store(0, Ordering::Relaxed);
        self.connections_released.store(0, Ordering::Relaxed);
        self.connection_errors.store(0, Ordering::Relaxed);
        self.vectors_inserted.store(0, Ordering::Relaxed);
        self.vectors_updated.store(0, Ordering::Relaxed);
        self.vectors_deleted.store(0, Ordering::Relaxed);
        self.searches_performed.store(0, Ordering::Relaxed);
        self.last_query_time_ms.store(0, Ordering::Relaxed);
        self.avg_query_time_ms.record(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_failure_counts() {
        let metrics = Metrics::new(1000);
        metrics.record_query_success(10);
        metrics.record_query_failure();
        let snap = metrics.snapshot();
        assert_eq!(snap.queries_total, 2);
        assert_eq!(snap.queries_succeeded, 1);
        assert_eq!(snap.queries_failed, 1);
        assert_eq!(snap.queries_succeeded + snap.queries_failed, snap.queries_total);
    }

    #[test]
    fn slow_query_counted_above_threshold() {
        let metrics = Metrics::new(100);
        metrics.record_query_success(50);
        metrics.record_query_success(150);
        let snap = metrics.snapshot();
        assert_eq!(snap.slow_queries, 1);
    }

    #[test]
    fn running_average_converges_toward_samples() {
        let metrics = Metrics::new(1000);
        for _ in 0..50 {
            metrics.record_query_success(20);
        }
        let snap = metrics.snapshot();
        assert!((snap.avg_query_time_ms - 20.0).abs() < 1.0);
    }

    #[test]
    fn prometheus_export_contains_all_series() {
        let metrics = Metrics::new(1000);
        metrics.record_query_success(5);
        let text = metrics.snapshot().to_prometheus("ruvector");
        assert!(text.contains("ruvector_queries_total 1"));
        assert!(text.contains("ruvector_avg_query_time_ms"));
        assert!(text.contains("ruvector_vectors_inserted"));
    }

    #[test]
    fn last_query_time_set_after_first_query() {
        let metrics = Metrics::new(1000);
        assert!(metrics.snapshot().last_query_time.is_none());
        metrics.record_query_success(5);
        assert!(metrics.snapshot().last_query_time.is_some());
    }

    #[test]
    fn vector_counters_accumulate() {
        let metrics = Metrics::new(1000);
        metrics.record_vectors_inserted(3);
        metrics.record_vectors_updated(1);
        metrics.record_vectors_deleted(2);
        metrics.record_search_performed();
        let snap = metrics.snapshot();
        assert_eq!(snap.vectors_inserted, 3);
        assert_eq!(snap.vectors_updated, 1);
        assert_eq!(snap.vectors_deleted, 2);
        assert_eq!(snap.searches_performed, 1);
    }
}
