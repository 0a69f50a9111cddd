//! Cursor pool
//!
//! Holds query cursors that were opened with a native skip and never read.
//! A deep page request (skip of tens of thousands) can take a cursor
//! positioned slightly before it and iterate the short remainder instead of
//! paying for the full native skip again.
//!
//! Cursors are single-use: `get` removes the cursor it returns. Entries
//! expire after an idle period shorter than the server's own cursor timeout,
//! so a pooled cursor is never dead on the server when handed out.
//!
//! A population job discards what it opened once the namespace has been
//! invalidated since the job started.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::generation::Generations;
use super::keys::{PoolKey, QueryShape};
use super::policy::AllocationPolicy;
use super::populator::Populator;
use crate::config::{CursorPoolConfig, QueryConfig};
use crate::model::Namespace;
use crate::observability::EngineMetrics;
use crate::store::{DocumentCursor, DocumentStore, FindOptions, StoreResult};

/// Capacity of the collection-size estimate cache
const COLLECTION_SIZES_CAPACITY: u64 = 100;

/// A cursor taken from the pool with the number of results it already
/// skipped.
pub struct SkippedCursor {
    cursor: Box<dyn DocumentCursor>,
    already_skipped: u64,
}

impl SkippedCursor {
    pub fn already_skipped(&self) -> u64 {
        self.already_skipped
    }

    pub fn cursor_mut(&mut self) -> &mut dyn DocumentCursor {
        self.cursor.as_mut()
    }

    pub fn into_parts(self) -> (Box<dyn DocumentCursor>, u64) {
        (self.cursor, self.already_skipped)
    }
}

/// Cache value wrapping a live cursor. The cursor is taken exactly once.
struct PooledCursor {
    cursor: Mutex<Option<Box<dyn DocumentCursor>>>,
}

impl PooledCursor {
    fn new(cursor: Box<dyn DocumentCursor>) -> Self {
        Self {
            cursor: Mutex::new(Some(cursor)),
        }
    }

    fn take(&self) -> Option<Box<dyn DocumentCursor>> {
        self.cursor.lock().take()
    }
}

/// State shared with background population jobs
struct PoolShared {
    store: Arc<dyn DocumentStore>,
    config: CursorPoolConfig,
    query: QueryConfig,
    cursors: Cache<PoolKey, Arc<PooledCursor>>,
    collection_sizes: Cache<(Namespace, String), u64>,
    next_entry_id: AtomicU64,
    metrics: Arc<EngineMetrics>,
    /// Serializes selection, guarded inserts and invalidation
    selection: Mutex<Generations>,
}

impl PoolShared {
    fn insert(&self, shape: Arc<QueryShape>, skipped: u64, cursor: Box<dyn DocumentCursor>) {
        let entry_id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
        let key = PoolKey::with_entry_id(shape, skipped, entry_id);
        self.cursors.insert(key, Arc::new(PooledCursor::new(cursor)));
    }

    /// Inserts unless `shape`'s namespace moved past `generation`.
    fn insert_if_current(
        &self,
        generation: u64,
        shape: &Arc<QueryShape>,
        skipped: u64,
        cursor: Box<dyn DocumentCursor>,
    ) -> bool {
        let mut selection = self.selection.lock();
        if selection.current(shape.namespace()) != generation {
            return false;
        }
        self.insert(Arc::clone(shape), skipped, cursor);
        true
    }

    fn count_at(&self, shape: &QueryShape, skipped: u64) -> usize {
        self.cursors
            .iter()
            .filter(|(key, _)| key.skipped() == skipped && key.shape().as_ref() == shape)
            .count()
    }

    fn open_cursor(&self, shape: &QueryShape, skip: u64) -> StoreResult<Box<dyn DocumentCursor>> {
        let mut options = FindOptions::new()
            .with_filter(shape.filter().clone())
            .with_sort(shape.sort().clone())
            .with_projection(shape.projection().clone())
            .with_hint(shape.hint().clone())
            .with_skip(skip)
            .with_batch_size(self.query.cursor_batch_size);
        if let Some(max_time) = self.query.max_time() {
            options = options.with_max_time(max_time);
        }

        // Opening the cursor makes the store apply the skip
        self.store.find(shape.session(), shape.namespace(), options)
    }

    fn collection_size(&self, shape: &QueryShape) -> StoreResult<u64> {
        let key = (shape.namespace().clone(), shape.filter_fingerprint());
        self.collection_sizes
            .try_get_with(key, || {
                self.store
                    .count_documents(shape.session(), shape.namespace(), shape.filter())
            })
            .map_err(|e| (*e).clone())
    }

    fn populate(&self, key: &PoolKey, policy: AllocationPolicy) -> StoreResult<usize> {
        let generation = self.selection.lock().current(key.shape().namespace());

        let size = if policy.needs_collection_size() {
            Some(self.collection_size(key.shape())?)
        } else {
            None
        };

        let started = Instant::now();
        let mut opened = 0;

        'plan: for target in policy.plan(&self.config, key.skipped(), size) {
            if size.map(|s| target.skip >= s).unwrap_or(false) {
                continue;
            }

            let existing = self.count_at(key.shape(), target.skip);
            for _ in existing..target.height {
                let cursor = self.open_cursor(key.shape(), target.skip)?;
                if !self.insert_if_current(generation, key.shape(), target.skip, cursor) {
                    debug!(
                        namespace = %key.shape().namespace(),
                        skip = target.skip,
                        "namespace invalidated during population, cursor discarded"
                    );
                    break 'plan;
                }
                self.metrics.increment_cursors_created();
                opened += 1;

                trace!(
                    namespace = %key.shape().namespace(),
                    skip = target.skip,
                    "new pooled cursor"
                );
            }
        }

        if opened > 0 {
            debug!(
                namespace = %key.shape().namespace(),
                policy = %policy,
                opened,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "cursor pool populated"
            );
        }

        Ok(opened)
    }
}

/// Pool of pre-positioned cursors
pub struct CursorPool {
    shared: Arc<PoolShared>,
    populator: Populator,
}

impl CursorPool {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: CursorPoolConfig,
        query: QueryConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let cursors = Cache::builder()
            .max_capacity(config.pool_size)
            .time_to_idle(config.ttl())
            .build();

        let collection_sizes = Cache::builder()
            .max_capacity(COLLECTION_SIZES_CAPACITY)
            .time_to_live(config.collection_size_ttl())
            .build();

        let populator = Populator::new(config.populator_threads, Arc::clone(&metrics));

        Self {
            shared: Arc::new(PoolShared {
                store,
                config,
                query,
                cursors,
                collection_sizes,
                next_entry_id: AtomicU64::new(1),
                metrics,
                selection: Mutex::new(Generations::default()),
            }),
            populator,
        }
    }

    pub fn config(&self) -> &CursorPoolConfig {
        &self.shared.config
    }

    /// Takes the best cursor for a request at `key.skipped()`.
    ///
    /// Requests shallower than one slice width, and requests without a
    /// policy, never use the pool. Otherwise the cursor with the largest skip
    /// not beyond the requested one is chosen, provided the remaining gap is
    /// within the reuse tolerance. A candidate that expired meanwhile is
    /// passed over for the next closest.
    pub fn get(&self, key: &PoolKey, policy: AllocationPolicy) -> Option<SkippedCursor> {
        let config = &self.shared.config;
        if policy == AllocationPolicy::None || key.skipped() < config.slice_width {
            return None;
        }

        let requested = key.skipped();
        let max_gap = (requested as f64 * config.reuse_tolerance) as u64;

        let _guard = self.shared.selection.lock();

        let mut candidates: Vec<Arc<PoolKey>> = self
            .shared
            .cursors
            .iter()
            .filter(|(cached, _)| {
                cached.shape() == key.shape()
                    && cached.skipped() <= requested
                    && requested - cached.skipped() <= max_gap
            })
            .map(|(cached, _)| cached)
            .collect();
        candidates.sort_by_key(|cached| Reverse(cached.skipped()));

        let found = candidates.into_iter().find_map(|cached| {
            let pooled = self.shared.cursors.remove(cached.as_ref())?;
            pooled.take().map(|cursor| SkippedCursor {
                cursor,
                already_skipped: cached.skipped(),
            })
        });

        match &found {
            Some(hit) => {
                self.shared.metrics.increment_pool_hits();
                debug!(
                    namespace = %key.shape().namespace(),
                    requested,
                    pooled = hit.already_skipped,
                    "cursor pool hit"
                );
            }
            None => {
                self.shared.metrics.increment_pool_misses();
                debug!(namespace = %key.shape().namespace(), requested, "cursor pool miss");
            }
        }

        found
    }

    /// Schedules background population around `key` under `policy`.
    ///
    /// Returns false when nothing was scheduled: no policy, a linear request
    /// shallower than a slice, or a full population queue.
    pub fn populate(&self, key: &PoolKey, policy: AllocationPolicy) -> bool {
        match policy {
            AllocationPolicy::None => return false,
            AllocationPolicy::Linear if key.skipped() < self.shared.config.slice_width => {
                return false
            }
            _ => {}
        }

        let shared = Arc::clone(&self.shared);
        let key = key.clone();

        self.populator.submit(Box::new(move || {
            if let Err(e) = shared.populate(&key, policy) {
                warn!(
                    namespace = %key.shape().namespace(),
                    error = %e,
                    "cursor pool population failed"
                );
            }
        }))
    }

    /// Populates synchronously, returning the number of cursors opened.
    pub fn populate_now(&self, key: &PoolKey, policy: AllocationPolicy) -> StoreResult<usize> {
        self.shared.populate(key, policy)
    }

    /// Adds a positioned cursor to the pool.
    pub fn put(&self, key: &PoolKey, cursor: Box<dyn DocumentCursor>) {
        let _guard = self.shared.selection.lock();
        self.shared
            .insert(Arc::clone(key.shape()), key.skipped(), cursor);
    }

    /// Cursors of `shape` currently pooled at `skipped`
    pub fn slice_height(&self, shape: &QueryShape, skipped: u64) -> usize {
        self.shared.count_at(shape, skipped)
    }

    /// Pooled cursors of `shape`, grouped by skip
    pub fn slice_sizes(&self, shape: &QueryShape) -> BTreeMap<u64, usize> {
        let mut sizes = BTreeMap::new();
        for (key, _) in self.shared.cursors.iter() {
            if key.shape().as_ref() == shape {
                *sizes.entry(key.skipped()).or_insert(0) += 1;
            }
        }
        sizes
    }

    /// Live pooled cursors
    pub fn entry_count(&self) -> usize {
        self.shared.cursors.iter().count()
    }

    /// Drops every pooled cursor over `namespace`. Population jobs already
    /// running for it keep nothing they open.
    pub fn invalidate_namespace(&self, namespace: &Namespace) -> usize {
        let mut selection = self.shared.selection.lock();
        selection.bump(namespace);

        let stale: Vec<Arc<PoolKey>> = self
            .shared
            .cursors
            .iter()
            .filter(|(key, _)| key.shape().namespace() == namespace)
            .map(|(key, _)| key)
            .collect();

        for key in &stale {
            self.shared.cursors.invalidate(key.as_ref());
        }

        let sizes: Vec<_> = self
            .shared
            .collection_sizes
            .iter()
            .filter(|(key, _)| &key.0 == namespace)
            .map(|(key, _)| key)
            .collect();
        for key in sizes {
            self.shared.collection_sizes.invalidate(key.as_ref());
        }

        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Document;
    use crate::query::SortSpec;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn ns() -> Namespace {
        Namespace::new("db", "items")
    }

    fn store_with(count: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for n in 0..count {
            let doc: Document = json!({"_id": n, "n": n}).as_object().cloned().unwrap();
            store.insert_one(None, &ns(), doc).unwrap();
        }
        store
    }

    fn pool(store: Arc<MemoryStore>) -> CursorPool {
        CursorPool::new(
            store,
            CursorPoolConfig::default(),
            QueryConfig::default(),
            Arc::new(EngineMetrics::new()),
        )
    }

    fn shape() -> Arc<QueryShape> {
        Arc::new(QueryShape::new(ns()).with_sort(SortSpec::asc("n")))
    }

    #[test]
    fn test_get_below_slice_width_is_none() {
        let pool = pool(store_with(10));
        let cursor = pool.shared.open_cursor(&shape(), 900).unwrap();
        pool.put(&PoolKey::new(shape(), 900), cursor);

        assert!(pool.get(&PoolKey::new(shape(), 999), AllocationPolicy::Linear).is_none());
        assert_eq!(pool.entry_count(), 1);
    }

    #[test]
    fn test_get_without_policy_is_none() {
        let pool = pool(store_with(10));
        let cursor = pool.shared.open_cursor(&shape(), 5_000).unwrap();
        pool.put(&PoolKey::new(shape(), 5_000), cursor);

        assert!(pool.get(&PoolKey::new(shape(), 5_000), AllocationPolicy::None).is_none());
    }

    #[test]
    fn test_get_picks_closest_within_tolerance_and_removes_it() {
        let pool = pool(store_with(10));
        for skip in [3_000, 4_600, 4_900] {
            let cursor = pool.shared.open_cursor(&shape(), skip).unwrap();
            pool.put(&PoolKey::new(shape(), skip), cursor);
        }

        let hit = pool
            .get(&PoolKey::new(shape(), 5_000), AllocationPolicy::Linear)
            .unwrap();
        assert_eq!(hit.already_skipped(), 4_900);
        assert_eq!(pool.entry_count(), 2);

        // 4600 is within 10% of 5000, 3000 is not
        let hit = pool
            .get(&PoolKey::new(shape(), 5_000), AllocationPolicy::Linear)
            .unwrap();
        assert_eq!(hit.already_skipped(), 4_600);
        assert!(pool.get(&PoolKey::new(shape(), 5_000), AllocationPolicy::Linear).is_none());
    }

    #[test]
    fn test_get_falls_back_when_best_candidate_is_gone() {
        let pool = pool(store_with(10));
        let cursor = pool.shared.open_cursor(&shape(), 4_800).unwrap();
        pool.put(&PoolKey::new(shape(), 4_800), cursor);

        // an entry whose cursor was already taken, as left by an expiry race
        let spent = pool.shared.open_cursor(&shape(), 4_900).unwrap();
        let spent = Arc::new(PooledCursor::new(spent));
        spent.take();
        pool.shared
            .cursors
            .insert(PoolKey::with_entry_id(shape(), 4_900, 999), spent);

        let hit = pool
            .get(&PoolKey::new(shape(), 5_000), AllocationPolicy::Linear)
            .unwrap();
        assert_eq!(hit.already_skipped(), 4_800);
    }

    #[test]
    fn test_insert_refused_after_invalidation() {
        let pool = pool(store_with(10));
        let generation = pool.shared.selection.lock().current(&ns());
        let cursor = pool.shared.open_cursor(&shape(), 2_900).unwrap();

        pool.invalidate_namespace(&ns());

        assert!(!pool.shared.insert_if_current(generation, &shape(), 2_900, cursor));
        assert_eq!(pool.entry_count(), 0);
    }

    #[test]
    fn test_get_ignores_other_shapes_and_deeper_cursors() {
        let pool = pool(store_with(10));
        let other = Arc::new(QueryShape::new(ns()).with_sort(SortSpec::desc("n")));

        let cursor = pool.shared.open_cursor(&other, 4_950).unwrap();
        pool.put(&PoolKey::new(Arc::clone(&other), 4_950), cursor);
        let cursor = pool.shared.open_cursor(&shape(), 5_100).unwrap();
        pool.put(&PoolKey::new(shape(), 5_100), cursor);

        assert!(pool.get(&PoolKey::new(shape(), 5_000), AllocationPolicy::Linear).is_none());
    }

    #[test]
    fn test_linear_population_is_topped_up_not_duplicated() {
        let pool = pool(store_with(10));
        let key = PoolKey::new(shape(), 2_500);

        assert_eq!(pool.populate_now(&key, AllocationPolicy::Linear).unwrap(), 7);
        assert_eq!(pool.slice_height(&shape(), 1_900), 4);
        assert_eq!(pool.slice_height(&shape(), 2_900), 2);
        assert_eq!(pool.slice_height(&shape(), 3_900), 1);

        assert_eq!(pool.populate_now(&key, AllocationPolicy::Linear).unwrap(), 0);
    }

    #[test]
    fn test_random_population_one_cursor_per_slice() {
        let pool = pool(store_with(3_500));
        let key = PoolKey::new(shape(), 0);

        assert_eq!(pool.populate_now(&key, AllocationPolicy::Random).unwrap(), 3);
        let sizes = pool.slice_sizes(&shape());
        assert_eq!(sizes.keys().copied().collect::<Vec<_>>(), vec![1_000, 2_000, 3_000]);

        assert_eq!(pool.populate_now(&key, AllocationPolicy::Random).unwrap(), 0);
    }

    #[test]
    fn test_invalidate_namespace() {
        let pool = pool(store_with(10));
        pool.populate_now(&PoolKey::new(shape(), 2_500), AllocationPolicy::Linear)
            .unwrap();

        assert_eq!(pool.invalidate_namespace(&ns()), 7);
        assert_eq!(pool.entry_count(), 0);
    }
}
