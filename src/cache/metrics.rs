//! Cache Metrics Collection
//!
//! Counters for monitoring how requests are being served.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Store lookups
    hits: AtomicU64,
    misses: AtomicU64,

    // Foreground network
    network_fetches: AtomicU64,
    network_failures: AtomicU64,

    // Background revalidation
    background_refreshes: AtomicU64,
    background_failures: AtomicU64,

    // Degraded responses
    offline_responses: AtomicU64,
    fallback_responses: AtomicU64,

    // Store writes refused by the backend
    write_rejections: AtomicU64,

    // Requests passed straight through
    bypassed: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_fetch(&self) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_failure(&self) {
        self.network_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_refresh(&self) {
        self.background_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_failure(&self) {
        self.background_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offline_response(&self) {
        self.offline_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_response(&self) {
        self.fallback_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_rejection(&self) {
        self.write_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn network_fetches(&self) -> u64 {
        self.network_fetches.load(Ordering::Relaxed)
    }

    pub fn background_failures(&self) -> u64 {
        self.background_failures.load(Ordering::Relaxed)
    }

    pub fn write_rejections(&self) -> u64 {
        self.write_rejections.load(Ordering::Relaxed)
    }

    /// Fraction of store lookups that found an entry
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            network_fetches: self.network_fetches(),
            network_failures: self.network_failures.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
            background_failures: self.background_failures(),
            offline_responses: self.offline_responses.load(Ordering::Relaxed),
            fallback_responses: self.fallback_responses.load(Ordering::Relaxed),
            write_rejections: self.write_rejections(),
            bypassed: self.bypassed.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.network_fetches.store(0, Ordering::Relaxed);
        self.network_failures.store(0, Ordering::Relaxed);
        self.background_refreshes.store(0, Ordering::Relaxed);
        self.background_failures.store(0, Ordering::Relaxed);
        self.offline_responses.store(0, Ordering::Relaxed);
        self.fallback_responses.store(0, Ordering::Relaxed);
        self.write_rejections.store(0, Ordering::Relaxed);
        self.bypassed.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub network_fetches: u64,
    pub network_failures: u64,
    pub background_refreshes: u64,
    pub background_failures: u64,
    pub offline_responses: u64,
    pub fallback_responses: u64,
    pub write_rejections: u64,
    pub bypassed: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();

        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
        assert!((metrics.hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_network_fetch();
        metrics.record_background_failure();
        metrics.record_write_rejection();
        metrics.record_bypass();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.network_fetches, 1);
        assert_eq!(snapshot.background_failures, 1);
        assert_eq!(snapshot.write_rejections, 1);
        assert_eq!(snapshot.bypassed, 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["bypassed"], 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
