//! Range result cache
//!
//! Caches materialized windows of query results. A window `[from, to)`
//! answers any page inside it; an exhausted window (one that reached the end
//! of the results) also answers pages running past its end. Windows are
//! dropped after a short TTL and whenever their namespace is written.
//!
//! Equal windows may be cached more than once; each entry gets its own id.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::generation::Generations;
use super::keys::RangeKey;
use crate::config::RangeCacheConfig;
use crate::model::{Document, Namespace};
use crate::observability::EngineMetrics;

/// A cached window of results
pub type Window = Arc<Vec<Document>>;

/// Cache of result windows
pub struct RangeResultCache {
    cache: Option<Cache<RangeKey, Window>>,
    next_entry_id: AtomicU64,
    /// Serializes guarded inserts with invalidation
    generations: Mutex<Generations>,
    metrics: Arc<EngineMetrics>,
}

impl RangeResultCache {
    pub fn new(config: &RangeCacheConfig, metrics: Arc<EngineMetrics>) -> Self {
        let cache = config.enabled.then(|| {
            Cache::builder()
                .max_capacity(config.size)
                .time_to_live(config.ttl())
                .build()
        });

        Self {
            cache,
            next_entry_id: AtomicU64::new(1),
            generations: Mutex::new(Generations::default()),
            metrics,
        }
    }

    /// False when disabled by configuration; a disabled cache never hits.
    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Caches `window` under `key`.
    pub fn put(&self, key: RangeKey, window: Vec<Document>) {
        let _guard = self.generations.lock();
        self.insert(key, window);
    }

    /// Invalidation generation of `namespace`, to be read before querying
    /// the store for a window that may be passed to `put_if_current`.
    pub fn generation(&self, namespace: &Namespace) -> u64 {
        self.generations.lock().current(namespace)
    }

    /// Caches `window` unless its namespace was invalidated since
    /// `generation` was read. Returns whether the window was cached.
    pub fn put_if_current(&self, key: RangeKey, window: Vec<Document>, generation: u64) -> bool {
        let mut generations = self.generations.lock();
        if generations.current(key.shape().namespace()) != generation {
            debug!(
                namespace = %key.shape().namespace(),
                from = key.from(),
                "namespace invalidated during read, window discarded"
            );
            return false;
        }
        self.insert(key, window)
    }

    fn insert(&self, key: RangeKey, window: Vec<Document>) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };

        trace!(
            namespace = %key.shape().namespace(),
            from = key.from(),
            to = key.to(),
            exhausted = key.is_exhausted(),
            "caching result window"
        );
        let entry_id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
        cache.insert(key.with_entry_id(entry_id), Arc::new(window));
        true
    }

    /// First cached window able to answer `requested`.
    pub fn find(&self, requested: &RangeKey) -> Option<(Arc<RangeKey>, Window)> {
        let cache = self.cache.as_ref()?;

        let found = cache.iter().find(|(cached, _)| cached.covers(requested));

        match &found {
            Some((cached, _)) => {
                self.metrics.increment_range_hits();
                debug!(
                    namespace = %requested.shape().namespace(),
                    from = requested.from(),
                    to = requested.to(),
                    cached_from = cached.from(),
                    cached_to = cached.to(),
                    "range cache hit"
                );
            }
            None => {
                self.metrics.increment_range_misses();
                debug!(
                    namespace = %requested.shape().namespace(),
                    from = requested.from(),
                    to = requested.to(),
                    "range cache miss"
                );
            }
        }

        found
    }

    /// Window of the first entry answering `requested`
    pub fn get(&self, requested: &RangeKey) -> Option<Window> {
        self.find(requested).map(|(_, window)| window)
    }

    /// Removes and returns the first entry answering `requested`.
    pub fn remove(&self, requested: &RangeKey) -> Option<(Arc<RangeKey>, Window)> {
        let cache = self.cache.as_ref()?;
        let (key, _) = cache.iter().find(|(cached, _)| cached.covers(requested))?;
        cache.remove(key.as_ref()).map(|window| (key, window))
    }

    /// Drops the entry stored under exactly `key`.
    pub fn invalidate(&self, key: &RangeKey) {
        if let Some(cache) = &self.cache {
            cache.invalidate(key);
        }
    }

    /// Drops every window over `namespace`, returning how many.
    pub fn invalidate_namespace(&self, namespace: &Namespace) -> usize {
        self.invalidate_where(|ns| ns == namespace)
    }

    /// Drops every window over any collection of `database`.
    pub fn invalidate_database(&self, database: &str) -> usize {
        self.invalidate_where(|ns| ns.database() == database)
    }

    fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Namespace) -> bool,
    {
        let mut generations = self.generations.lock();
        generations.bump_where(&predicate);

        let Some(cache) = &self.cache else {
            return 0;
        };

        let stale: Vec<Arc<RangeKey>> = cache
            .iter()
            .filter(|(key, _)| predicate(key.shape().namespace()))
            .map(|(key, _)| key)
            .collect();

        for key in &stale {
            cache.invalidate(key.as_ref());
        }

        if !stale.is_empty() {
            self.metrics.add_range_invalidations(stale.len() as u64);
        }
        stale.len()
    }

    /// Live cached windows
    pub fn entry_count(&self) -> usize {
        self.cache.as_ref().map(|c| c.iter().count()).unwrap_or(0)
    }

    /// Live windows grouped by query shape, for diagnostics
    pub fn group_sizes(&self) -> BTreeMap<String, usize> {
        let mut groups = BTreeMap::new();
        if let Some(cache) = &self.cache {
            for (key, _) in cache.iter() {
                *groups.entry(key.shape().to_string()).or_insert(0) += 1;
            }
        }
        groups
    }
}

/// Part of a window cached from `cached_from` that falls in `[from, to)`.
///
/// Bounds are clamped to the window, so a request past the end of an
/// exhausted window yields a short or empty page.
pub fn window_slice(window: &[Document], cached_from: u64, from: u64, to: u64) -> Vec<Document> {
    let offset = |position: u64| -> usize {
        usize::try_from(position.saturating_sub(cached_from))
            .unwrap_or(usize::MAX)
            .min(window.len())
    };

    let start = offset(from);
    let end = offset(to).max(start);
    window[start..end].to_vec()
}
