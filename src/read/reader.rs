//! Collection reads through the caches

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::debug;

use super::errors::{ReadError, ReadResult};
use super::request::PageRequest;
use crate::cache::{
    window_slice, AllocationPolicy, CursorPool, PoolKey, QueryShape, RangeKey, RangeResultCache,
    SkippedCursor,
};
use crate::config::QueryConfig;
use crate::model::{id_filter, Document, Namespace, SessionHandle, ETAG_FIELD};
use crate::store::{DocumentCursor, DocumentStore, FindOptions};

/// Reads pages of a collection.
///
/// A page is answered, in order of preference, from a cached result window,
/// from a pooled cursor close to the page, or from a fresh query. Fresh and
/// pooled reads capture the rest of the cursor's current batch into the
/// range cache, and every non-cached read schedules pool population. A
/// capture is dropped when the namespace was written during the read.
pub struct CollectionReader {
    store: Arc<dyn DocumentStore>,
    cursor_pool: Arc<CursorPool>,
    range_cache: Arc<RangeResultCache>,
    config: QueryConfig,
}

impl CollectionReader {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cursor_pool: Arc<CursorPool>,
        range_cache: Arc<RangeResultCache>,
        config: QueryConfig,
    ) -> Self {
        Self {
            store,
            cursor_pool,
            range_cache,
            config,
        }
    }

    /// Returns one page of results.
    pub fn get_collection_data(&self, request: &PageRequest) -> ReadResult<Vec<Document>> {
        if request.page == 0 {
            return Err(ReadError::InvalidPage(request.page));
        }
        if request.pagesize == 0 {
            return Ok(Vec::new());
        }

        let skip = request.skip();
        let to = skip.saturating_add(request.pagesize);
        let shape = Arc::new(request.shape());
        let capture = (request.use_cache && self.range_cache.is_enabled())
            .then(|| self.range_cache.generation(shape.namespace()));

        if capture.is_some() {
            let requested = RangeKey::request(Arc::clone(&shape), skip, to);
            if let Some((cached, window)) = self.range_cache.find(&requested) {
                return Ok(window_slice(&window, cached.from(), skip, to));
            }
        }

        let policy = request.allocation_policy;
        let pool_key = PoolKey::new(Arc::clone(&shape), skip);

        let page = match self.cursor_pool.get(&pool_key, policy) {
            Some(pooled) => self.read_pooled(pooled, &shape, skip, request.pagesize, capture)?,
            None => self.read_fresh(&shape, skip, request.pagesize, capture)?,
        };

        if policy != AllocationPolicy::None {
            self.cursor_pool.populate(&pool_key, policy);
        }

        Ok(page)
    }

    fn read_fresh(
        &self,
        shape: &Arc<QueryShape>,
        skip: u64,
        pagesize: u64,
        capture: Option<u64>,
    ) -> ReadResult<Vec<Document>> {
        let page_len = usize::try_from(pagesize).unwrap_or(usize::MAX);
        let batch_size = self.config.cursor_batch_size.max(page_len);

        let mut options = FindOptions::new()
            .with_filter(shape.filter().clone())
            .with_sort(shape.sort().clone())
            .with_projection(shape.projection().clone())
            .with_hint(shape.hint().clone())
            .with_skip(skip)
            .with_batch_size(batch_size);
        if capture.is_none() {
            options = options.with_limit(pagesize);
        }
        if let Some(max_time) = self.config.max_time() {
            options = options.with_max_time(max_time);
        }

        let started = Instant::now();
        let mut cursor = self.store.find(shape.session(), shape.namespace(), options)?;
        let (page, _) = read_page(cursor.as_mut(), page_len)?;

        debug!(
            namespace = %shape.namespace(),
            skip,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fresh query"
        );

        if let Some(generation) = capture {
            let mut window = page.clone();
            window.extend(cursor.drain_buffered()?);
            let exhausted = window.len() < batch_size;
            self.capture(shape, skip, window, exhausted, generation);
        }

        Ok(page)
    }

    fn read_pooled(
        &self,
        pooled: SkippedCursor,
        shape: &Arc<QueryShape>,
        skip: u64,
        pagesize: u64,
        capture: Option<u64>,
    ) -> ReadResult<Vec<Document>> {
        let (mut cursor, already_skipped) = pooled.into_parts();
        let remaining = skip.saturating_sub(already_skipped);

        let started = Instant::now();
        cursor.advance(remaining)?;
        debug!(
            namespace = %shape.namespace(),
            skip,
            iterated = remaining,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "advanced pooled cursor"
        );

        let page_len = usize::try_from(pagesize).unwrap_or(usize::MAX);
        let (page, reached_end) = read_page(cursor.as_mut(), page_len)?;

        if let Some(generation) = capture {
            let mut window = page.clone();
            window.extend(cursor.drain_buffered()?);
            self.capture(shape, skip, window, reached_end, generation);
        }

        Ok(page)
    }

    fn capture(
        &self,
        shape: &Arc<QueryShape>,
        from: u64,
        window: Vec<Document>,
        exhausted: bool,
        generation: u64,
    ) {
        let to = from + window.len() as u64;
        let key = RangeKey::new(Arc::clone(shape), from, to, exhausted);
        self.range_cache.put_if_current(key, window, generation);
    }

    /// Number of documents matching `filter`
    pub fn collection_size(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
    ) -> ReadResult<u64> {
        Ok(self.store.count_documents(session, namespace, filter)?)
    }

    /// Current version token of a document, `None` if the document is
    /// missing. A document without a token yields `Some(Value::Null)`.
    pub fn get_document_etag(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        id: &Value,
    ) -> ReadResult<Option<Value>> {
        let mut projection = Document::new();
        projection.insert(ETAG_FIELD.to_string(), json!(1));

        let found = self
            .store
            .find_one(session, namespace, &id_filter(id), &projection)?;

        Ok(found.map(|doc| doc.get(ETAG_FIELD).cloned().unwrap_or(Value::Null)))
    }
}

/// Reads up to `count` results; the flag is true when the cursor ran out.
fn read_page(cursor: &mut dyn DocumentCursor, count: usize) -> ReadResult<(Vec<Document>, bool)> {
    let mut page = Vec::with_capacity(count.min(1024));
    while page.len() < count {
        match cursor.next_document()? {
            Some(doc) => page.push(doc),
            None => return Ok((page, true)),
        }
    }
    Ok((page, false))
}
