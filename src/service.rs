//! Engine wiring
//!
//! `Engine` builds every component once from an `EngineConfig` and a store,
//! sharing the caches and counters between the read and write paths.
//! Callers hold the engine (or an `Arc` of it) instead of global state.

use std::sync::Arc;

use tracing::info;

use crate::cache::{CursorPool, RangeResultCache};
use crate::config::{ConfigResult, EngineConfig};
use crate::observability::{EngineMetrics, MetricsSnapshot};
use crate::read::CollectionReader;
use crate::store::DocumentStore;
use crate::write::{BulkWriteCoordinator, CacheInvalidator, OptimisticWriteEngine};

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    metrics: Arc<EngineMetrics>,
    range_cache: Arc<RangeResultCache>,
    cursor_pool: Arc<CursorPool>,
    reader: CollectionReader,
    writer: OptimisticWriteEngine,
    bulk: BulkWriteCoordinator,
}

impl Engine {
    /// Validates `config` and builds the engine around `store`.
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> ConfigResult<Self> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let range_cache = Arc::new(RangeResultCache::new(
            &config.range_cache,
            Arc::clone(&metrics),
        ));
        let cursor_pool = Arc::new(CursorPool::new(
            Arc::clone(&store),
            config.cursor_pool.clone(),
            config.query.clone(),
            Arc::clone(&metrics),
        ));
        let invalidator = CacheInvalidator::new(Arc::clone(&range_cache), Arc::clone(&cursor_pool));

        let reader = CollectionReader::new(
            Arc::clone(&store),
            Arc::clone(&cursor_pool),
            Arc::clone(&range_cache),
            config.query.clone(),
        );
        let writer = OptimisticWriteEngine::new(
            Arc::clone(&store),
            invalidator.clone(),
            config.write.clone(),
            Arc::clone(&metrics),
        );
        let bulk = BulkWriteCoordinator::new(
            Arc::clone(&store),
            invalidator,
            config.write.clone(),
            Arc::clone(&metrics),
        );

        info!(
            pool_size = config.cursor_pool.pool_size,
            range_cache = config.range_cache.enabled,
            populator_threads = config.cursor_pool.populator_threads,
            "engine started"
        );

        Ok(Self {
            config,
            store,
            metrics,
            range_cache,
            cursor_pool,
            reader,
            writer,
            bulk,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn reader(&self) -> &CollectionReader {
        &self.reader
    }

    pub fn writer(&self) -> &OptimisticWriteEngine {
        &self.writer
    }

    pub fn bulk(&self) -> &BulkWriteCoordinator {
        &self.bulk
    }

    pub fn cursor_pool(&self) -> &Arc<CursorPool> {
        &self.cursor_pool
    }

    pub fn range_cache(&self) -> &Arc<RangeResultCache> {
        &self.range_cache
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_engine_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.cursor_pool.slice_width = 0;

        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        assert!(Engine::new(store, config).is_err());
    }

    #[test]
    fn test_engine_starts_with_zeroed_metrics() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let engine = Engine::new(store, EngineConfig::default()).unwrap();

        assert_eq!(engine.metrics(), MetricsSnapshot::default());
        assert!(engine.range_cache().is_enabled());
        assert_eq!(engine.cursor_pool().entry_count(), 0);
    }
}
