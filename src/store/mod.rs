//! # Document Store
//!
//! The backing store the caches and the write engine sit in front of.
//!
//! The engine needs a small capability set from the store: filtered, sorted,
//! projected iteration with a native skip; counting; atomic single-document
//! insert/upsert/replace/delete returning the affected document; unordered
//! bulk writes; and collection creation. `DocumentStore` captures exactly
//! that. `MemoryStore` is the in-process implementation.
//!
//! Every operation takes the caller's session (or none) so drivers can run
//! it inside that session.

mod errors;
mod memory;
mod update;

use std::time::Duration;

use serde_json::Value;

use crate::model::{Document, Namespace, SessionHandle};
use crate::query::SortSpec;

pub use errors::{
    StoreError, StoreResult, BAD_VALUE_ERROR, DUPLICATE_KEY_ERROR, FAILED_TO_PARSE_ERROR,
    ID_INDEX, INTERNAL_ERROR, NAMESPACE_EXISTS_ERROR,
};
pub use memory::{MemoryCursor, MemoryStore, MemoryStoreStats};
pub use update::apply_update;

/// A live, forward-only query cursor.
///
/// Cursors fetch results in batches. `buffered` reports how many results of
/// the current batch are already client-side, so callers can take exactly
/// those without triggering another round trip.
pub trait DocumentCursor: Send {
    /// Next result, fetching a new batch when the buffer is empty.
    fn next_document(&mut self) -> StoreResult<Option<Document>>;

    /// Results already fetched and not yet returned.
    fn buffered(&self) -> usize;

    /// Returns every buffered result without fetching more.
    fn drain_buffered(&mut self) -> StoreResult<Vec<Document>> {
        let mut drained = Vec::with_capacity(self.buffered());
        while self.buffered() > 0 {
            match self.next_document()? {
                Some(doc) => drained.push(doc),
                None => break,
            }
        }
        Ok(drained)
    }

    /// Advances by `count` results, returning how many were actually skipped.
    fn advance(&mut self, count: u64) -> StoreResult<u64> {
        let mut advanced = 0;
        while advanced < count {
            if self.next_document()?.is_none() {
                break;
            }
            advanced += 1;
        }
        Ok(advanced)
    }
}

/// Options for `find`
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Document,
    pub sort: SortSpec,
    pub projection: Document,
    pub hint: Document,
    /// Native skip applied by the store before the first result
    pub skip: u64,
    pub limit: Option<u64>,
    /// Results per batch; 0 lets the store choose
    pub batch_size: usize,
    pub max_time: Option<Duration>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_hint(mut self, hint: Document) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

/// One operation of a bulk write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    ReplaceOne {
        filter: Document,
        replacement: Document,
        upsert: bool,
    },
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    UpdateMany {
        filter: Document,
        update: Document,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

/// Result of a single-document replace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Value>,
}

/// Id assigned by an upserting bulk item
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertedId {
    /// Position in the submitted batch
    pub index: usize,
    pub id: Value,
}

/// Failure of one bulk item
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemError {
    /// Position in the submitted batch
    pub index: usize,
    pub error: StoreError,
}

/// Aggregate result of a bulk write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteOutcome {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserted: Vec<UpsertedId>,
    pub errors: Vec<BulkItemError>,
}

impl BulkWriteOutcome {
    /// True when no item failed
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Capabilities the engine needs from a document store.
pub trait DocumentStore: Send + Sync {
    /// Opens a cursor. The store applies `options.skip` natively.
    fn find(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        options: FindOptions,
    ) -> StoreResult<Box<dyn DocumentCursor>>;

    /// First matching document
    fn find_one(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
        projection: &Document,
    ) -> StoreResult<Option<Document>> {
        let options = FindOptions::new()
            .with_filter(filter.clone())
            .with_projection(projection.clone())
            .with_limit(1)
            .with_batch_size(1);
        let mut cursor = self.find(session, namespace, options)?;
        cursor.next_document()
    }

    fn count_documents(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
    ) -> StoreResult<u64>;

    /// Inserts a document, returning its id. A missing `_id` is generated.
    fn insert_one(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        document: Document,
    ) -> StoreResult<Value>;

    /// Applies an operator update to the first match and returns the
    /// document after the update.
    fn find_one_and_update(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>>;

    /// Replaces the first match and returns the document after the replace.
    fn find_one_and_replace(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
        replacement: &Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>>;

    fn replace_one(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
        replacement: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome>;

    /// Deletes the first match and returns it.
    fn find_one_and_delete(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
    ) -> StoreResult<Option<Document>>;

    /// Executes a batch. Unordered batches keep going after a failed item.
    fn bulk_write(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
        models: Vec<WriteModel>,
        ordered: bool,
    ) -> StoreResult<BulkWriteOutcome>;

    /// Creates the collection; fails with `NamespaceExists` if present.
    fn create_collection(
        &self,
        session: Option<&SessionHandle>,
        namespace: &Namespace,
    ) -> StoreResult<()>;
}
