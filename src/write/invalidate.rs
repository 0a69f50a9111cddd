//! Cache invalidation after writes

use std::sync::Arc;

use tracing::debug;

use crate::cache::{CursorPool, RangeResultCache};
use crate::model::Namespace;

/// Drops every cached window and pooled cursor of a namespace.
///
/// Pooled cursors are dropped too: they were opened before the write and
/// would keep serving the old result set.
#[derive(Clone)]
pub struct CacheInvalidator {
    range_cache: Arc<RangeResultCache>,
    cursor_pool: Arc<CursorPool>,
}

impl CacheInvalidator {
    pub fn new(range_cache: Arc<RangeResultCache>, cursor_pool: Arc<CursorPool>) -> Self {
        Self {
            range_cache,
            cursor_pool,
        }
    }

    pub fn invalidate_namespace(&self, namespace: &Namespace) {
        // pool first, so a read that sees the new range generation can no
        // longer take a cursor opened before the write
        let cursors = self.cursor_pool.invalidate_namespace(namespace);
        let windows = self.range_cache.invalidate_namespace(namespace);

        if windows > 0 || cursors > 0 {
            debug!(
                namespace = %namespace,
                windows,
                cursors,
                "invalidated cached reads"
            );
        }
    }
}
