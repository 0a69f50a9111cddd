//! Engine counters
//!
//! - Counters only, monotonic
//! - Reset only when the engine is rebuilt
//! - Thread-safe, lock-free

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters shared by the caches and the write engine
///
/// # Thread Safety
///
/// All counters use atomic operations with Relaxed ordering; readers may see
/// slightly stale values.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Pooled cursors handed to a reader
    pool_hits: AtomicU64,
    /// Deep reads that found no reusable cursor
    pool_misses: AtomicU64,
    /// Cursors opened by background population
    cursors_created: AtomicU64,
    /// Population jobs dropped because the queue was full
    population_rejected: AtomicU64,
    /// Pages answered from a cached window
    range_hits: AtomicU64,
    /// Range cache lookups that missed
    range_misses: AtomicU64,
    /// Cached windows dropped by writes
    range_invalidations: AtomicU64,
    /// Writes that kept their result
    writes_committed: AtomicU64,
    /// Writes undone after a failed version check
    rollbacks: AtomicU64,
    /// Rollback writes that failed
    rollback_failures: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // Cursor pool

    pub fn increment_pool_hits(&self) {
        self.pool_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pool_misses(&self) {
        self.pool_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cursors_created(&self) {
        self.cursors_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_population_rejected(&self) {
        self.population_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // Range cache

    pub fn increment_range_hits(&self) {
        self.range_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_range_misses(&self) {
        self.range_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds the number of windows dropped by one invalidation
    pub fn add_range_invalidations(&self, count: u64) {
        self.range_invalidations.fetch_add(count, Ordering::Relaxed);
    }

    // Writes

    pub fn increment_writes_committed(&self) {
        self.writes_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rollback_failures(&self) {
        self.rollback_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.pool_misses.load(Ordering::Relaxed),
            cursors_created: self.cursors_created.load(Ordering::Relaxed),
            population_rejected: self.population_rejected.load(Ordering::Relaxed),
            range_hits: self.range_hits.load(Ordering::Relaxed),
            range_misses: self.range_misses.load(Ordering::Relaxed),
            range_invalidations: self.range_invalidations.load(Ordering::Relaxed),
            writes_committed: self.writes_committed.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub pool_hits: u64,
    pub pool_misses: u64,
    pub cursors_created: u64,
    pub population_rejected: u64,
    pub range_hits: u64,
    pub range_misses: u64,
    pub range_invalidations: u64,
    pub writes_committed: u64,
    pub rollbacks: u64,
    pub rollback_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        assert_eq!(EngineMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_increment_counters() {
        let metrics = EngineMetrics::new();

        metrics.increment_pool_hits();
        metrics.increment_pool_hits();
        metrics.increment_pool_misses();
        metrics.increment_cursors_created();
        metrics.increment_population_rejected();
        metrics.increment_range_hits();
        metrics.increment_range_misses();
        metrics.add_range_invalidations(3);
        metrics.increment_writes_committed();
        metrics.increment_rollbacks();
        metrics.increment_rollback_failures();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pool_hits, 2);
        assert_eq!(snapshot.pool_misses, 1);
        assert_eq!(snapshot.cursors_created, 1);
        assert_eq!(snapshot.population_rejected, 1);
        assert_eq!(snapshot.range_hits, 1);
        assert_eq!(snapshot.range_misses, 1);
        assert_eq!(snapshot.range_invalidations, 3);
        assert_eq!(snapshot.writes_committed, 1);
        assert_eq!(snapshot.rollbacks, 1);
        assert_eq!(snapshot.rollback_failures, 1);
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(EngineMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..250 {
                        metrics.increment_range_hits();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot().range_hits, 1000);
    }
}
