//! In-process `DocumentStore`
//!
//! Collections are vectors of documents in insertion order behind one
//! `RwLock`, so every single-document operation is atomic. Cursors are
//! snapshots taken when the query is opened and hand results out in batches
//! like a remote cursor would.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use super::errors::{StoreError, StoreResult};
use super::update::apply_update;
use super::{
    BulkItemError, BulkWriteOutcome, DocumentCursor, DocumentStore, FindOptions, UpdateOutcome,
    UpsertedId, WriteModel,
};
use crate::model::{generate_id, set_path, Document, Namespace, SessionHandle, ID_FIELD};
use crate::query::{FilterEvaluator, Projection};

/// Results per batch when the caller leaves the batch size to the store
const DEFAULT_BATCH_SIZE: usize = 101;

/// Point-in-time copy of the store's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// Queries opened
    pub find_calls: u64,
    /// Sum of native skips requested by opened queries
    pub skipped_positions: u64,
    /// Single-document and bulk item writes attempted
    pub writes: u64,
}

#[derive(Default)]
struct StoreCounters {
    find_calls: AtomicU64,
    skipped_positions: AtomicU64,
    writes: AtomicU64,
}

/// Cursor over a snapshot of query results
pub struct MemoryCursor {
    remaining: VecDeque<Document>,
    buffer: VecDeque<Document>,
    batch_size: usize,
}

impl MemoryCursor {
    fn open(results: Vec<Document>, batch_size: usize) -> Self {
        let mut cursor = Self {
            remaining: results.into(),
            buffer: VecDeque::new(),
            batch_size: if batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                batch_size
            },
        };
        cursor.fetch_batch();
        cursor
    }

    fn fetch_batch(&mut self) {
        let take = self.batch_size.min(self.remaining.len());
        self.buffer.extend(self.remaining.drain(..take));
    }
}

impl DocumentCursor for MemoryCursor {
    fn next_document(&mut self) -> StoreResult<Option<Document>> {
        if self.buffer.is_empty() {
            self.fetch_batch();
        }
        Ok(self.buffer.pop_front())
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// In-memory document store
pub struct MemoryStore {
    collections: RwLock<HashMap<Namespace, Vec<Document>>>,
    counters: StoreCounters,
    fail_next_replace: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            counters: StoreCounters::default(),
            fail_next_replace: AtomicBool::new(false),
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            find_calls: self.counters.find_calls.load(Ordering::Relaxed),
            skipped_positions: self.counters.skipped_positions.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }

    /// Every document of a collection, in insertion order
    pub fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        self.collections
            .read()
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    pub fn collection_exists(&self, namespace: &Namespace) -> bool {
        self.collections.read().contains_key(namespace)
    }

    /// Makes the next `replace_one` fail with a backend error.
    pub fn fail_next_replace(&self) {
        self.fail_next_replace.store(true, Ordering::SeqCst);
    }

    fn record_write(&self) {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn position(docs: &[Document], filter: &Document) -> Option<usize> {
        docs.iter().position(|d| FilterEvaluator::matches(d, filter))
    }

    fn duplicate_key(namespace: &Namespace, id: &Value) -> StoreError {
        StoreError::duplicate_id(namespace, format!("{{ _id: {} }}", id))
    }

    fn check_unique(namespace: &Namespace, docs: &[Document], candidate: &Document) -> StoreResult<()> {
        if let Some(id) = candidate.get(ID_FIELD) {
            if docs.iter().any(|d| d.get(ID_FIELD) == Some(id)) {
                return Err(Self::duplicate_key(namespace, id));
            }
        }
        Ok(())
    }

    /// Seeds an upserted document with the equality conditions of a filter.
    fn seed_from_filter(target: &mut Document, filter: &Document) {
        for (key, condition) in filter {
            if key == "$and" {
                if let Some(parts) = condition.as_array() {
                    for part in parts.iter().filter_map(Value::as_object) {
                        Self::seed_from_filter(target, part);
                    }
                }
                continue;
            }
            if key.starts_with('$') {
                continue;
            }

            let value = match condition {
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    match ops.get("$eq") {
                        Some(v) if ops.len() == 1 => v.clone(),
                        _ => continue,
                    }
                }
                other => other.clone(),
            };
            let _ = set_path(target, key, value);
        }
    }

    fn check_replacement(replacement: &Document) -> StoreResult<()> {
        if replacement.keys().any(|k| k.starts_with('$')) {
            return Err(StoreError::invalid_update(
                "replacement document must not contain update operators",
            ));
        }
        Ok(())
    }

    fn replace_at(docs: &mut [Document], pos: usize, replacement: &Document) -> StoreResult<Document> {
        let mut replaced = replacement.clone();
        match (docs[pos].get(ID_FIELD), replaced.get(ID_FIELD)) {
            (Some(existing), Some(incoming)) if existing != incoming => {
                return Err(StoreError::invalid_update(
                    "the _id field cannot be changed by a replacement",
                ));
            }
            (Some(existing), None) => {
                let existing = existing.clone();
                replaced.insert(ID_FIELD.to_string(), existing);
            }
            _ => {}
        }
        docs[pos] = replaced.clone();
        Ok(replaced)
    }

    fn upsert_replacement(
        namespace: &Namespace,
        docs: &mut Vec<Document>,
        filter: &Document,
        replacement: &Document,
    ) -> StoreResult<Document> {
        let mut created = replacement.clone();
        if !created.contains_key(ID_FIELD) {
            let mut seed = Document::new();
            Self::seed_from_filter(&mut seed, filter);
            let id = seed.remove(ID_FIELD).unwrap_or_else(generate_id);
            created.insert(ID_FIELD.to_string(), id);
        }
        Self::check_unique(namespace, docs, &created)?;
        docs.push(created.clone());
        Ok(created)
    }

    fn upsert_update(
        namespace: &Namespace,
        docs: &mut Vec<Document>,
        filter: &Document,
        update: &Document,
    ) -> StoreResult<Document> {
        let mut created = Document::new();
        Self::seed_from_filter(&mut created, filter);
        apply_update(&mut created, update, true)?;
        if !created.contains_key(ID_FIELD) {
            created.insert(ID_FIELD.to_string(), generate_id());
        }
        Self::check_unique(namespace, docs, &created)?;
        docs.push(created.clone());
        Ok(created)
    }

    fn insert_into(namespace: &Namespace, docs: &mut Vec<Document>, mut document: Document) -> StoreResult<Value> {
        let id = match document.get(ID_FIELD) {
            Some(id) => id.clone(),
            None => {
                let id = generate_id();
                document.insert(ID_FIELD.to_string(), id.clone());
                id
            }
        };
        Self::check_unique(namespace, docs, &document)?;
        docs.push(document);
        Ok(id)
    }

    fn apply_model(
        &self,
        namespace: &Namespace,
        index: usize,
        model: WriteModel,
        outcome: &mut BulkWriteOutcome,
    ) -> StoreResult<()> {
        self.record_write();
        let mut collections = self.collections.write();
        let docs = collections.entry(namespace.clone()).or_default();

        match model {
            WriteModel::InsertOne { document } => {
                Self::insert_into(namespace, docs, document)?;
                outcome.inserted += 1;
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                Self::check_replacement(&replacement)?;
                match Self::position(docs, &filter) {
                    Some(pos) => {
                        let before = docs[pos].clone();
                        let after = Self::replace_at(docs, pos, &replacement)?;
                        outcome.matched += 1;
                        if before != after {
                            outcome.modified += 1;
                        }
                    }
                    None if upsert => {
                        let created = Self::upsert_replacement(namespace, docs, &filter, &replacement)?;
                        outcome.upserted.push(UpsertedId {
                            index,
                            id: created.get(ID_FIELD).cloned().unwrap_or(Value::Null),
                        });
                    }
                    None => {}
                }
            }
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => match Self::position(docs, &filter) {
                Some(pos) => {
                    let mut updated = docs[pos].clone();
                    apply_update(&mut updated, &update, false)?;
                    outcome.matched += 1;
                    if updated != docs[pos] {
                        outcome.modified += 1;
                        docs[pos] = updated;
                    }
                }
                None if upsert => {
                    let created = Self::upsert_update(namespace, docs, &filter, &update)?;
                    outcome.upserted.push(UpsertedId {
                        index,
                        id: created.get(ID_FIELD).cloned().unwrap_or(Value::Null),
                    });
                }
                None => {}
            },
            WriteModel::UpdateMany { filter, update } => {
                let mut updated_docs = docs.clone();
                for doc in updated_docs
                    .iter_mut()
                    .filter(|d| FilterEvaluator::matches(d, &filter))
                {
                    let before = doc.clone();
                    apply_update(doc, &update, false)?;
                    outcome.matched += 1;
                    if *doc != before {
                        outcome.modified += 1;
                    }
                }
                *docs = updated_docs;
            }
            WriteModel::DeleteOne { filter } => {
                if let Some(pos) = Self::position(docs, &filter) {
                    docs.remove(pos);
                    outcome.deleted += 1;
                }
            }
            WriteModel::DeleteMany { filter } => {
                let before = docs.len();
                docs.retain(|d| !FilterEvaluator::matches(d, &filter));
                outcome.deleted += (before - docs.len()) as u64;
            }
        }

        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn find(
        &self,
        _session: Option<&SessionHandle>,
        namespace: &Namespace,
        options: FindOptions,
    ) -> StoreResult<Box<dyn DocumentCursor>> {
        self.counters.find_calls.fetch_add(1, Ordering::Relaxed);
        self.counters
            .skipped_positions
            .fetch_add(options.skip, Ordering::Relaxed);

        let mut matching: Vec<Document> = {
            let collections = self.collections.read();
            collections
                .get(namespace)
                .map(|docs| {
                    docs.iter()
                        .filter(|d| FilterEvaluator::matches(d, &options.filter))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        options.sort.sort(&mut matching);

        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = match options.limit {
            Some(limit) if limit > 0 => usize::try_from(limit).unwrap_or(usize::MAX),
            _ => usize::MAX,
        };

        let results: Vec<Document> = matching
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|d| Projection::apply(&d, &options.projection))
            .collect();

        trace!(
            namespace = %namespace,
            skip = options.skip,
            results = results.len(),
            "memory store query opened"
        );

        Ok(Box::new(MemoryCursor::open(results, options.batch_size)))
    }

    fn count_documents(
        &self,
        _session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
    ) -> StoreResult<u64> {
        let collections = self.collections.read();
        Ok(collections
            .get(namespace)
            .map(|docs| docs.iter().filter(|d| FilterEvaluator::matches(d, filter)).count() as u64)
            .unwrap_or(0))
    }

    fn insert_one(
        &self,
        _session: Option<&SessionHandle>,
        namespace: &Namespace,
        document: Document,
    ) -> StoreResult<Value> {
        self.record_write();
        let mut collections = self.collections.write();
        let docs = collections.entry(namespace.clone()).or_default();
        Self::insert_into(namespace, docs, document)
    }

    fn find_one_and_update(
        &self,
        _session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        self.record_write();
        let mut collections = self.collections.write();

        if let Some(docs) = collections.get_mut(namespace) {
            if let Some(pos) = Self::position(docs, filter) {
                let mut updated = docs[pos].clone();
                apply_update(&mut updated, update, false)?;
                docs[pos] = updated.clone();
                return Ok(Some(updated));
            }
        }

        if !upsert {
            return Ok(None);
        }

        let docs = collections.entry(namespace.clone()).or_default();
        Self::upsert_update(namespace, docs, filter, update).map(Some)
    }

    fn find_one_and_replace(
        &self,
        _session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
        replacement: &Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        Self::check_replacement(replacement)?;
        self.record_write();
        let mut collections = self.collections.write();

        if let Some(docs) = collections.get_mut(namespace) {
            if let Some(pos) = Self::position(docs, filter) {
                return Self::replace_at(docs, pos, replacement).map(Some);
            }
        }

        if !upsert {
            return Ok(None);
        }

        let docs = collections.entry(namespace.clone()).or_default();
        Self::upsert_replacement(namespace, docs, filter, replacement).map(Some)
    }

    fn replace_one(
        &self,
        _session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
        replacement: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        if self.fail_next_replace.swap(false, Ordering::SeqCst) {
            return Err(StoreError::backend("injected replace failure"));
        }

        let mut outcome = BulkWriteOutcome::default();
        self.apply_model(
            namespace,
            0,
            WriteModel::ReplaceOne {
                filter: filter.clone(),
                replacement: replacement.clone(),
                upsert,
            },
            &mut outcome,
        )?;

        Ok(UpdateOutcome {
            matched: outcome.matched,
            modified: outcome.modified,
            upserted_id: outcome.upserted.into_iter().next().map(|u| u.id),
        })
    }

    fn find_one_and_delete(
        &self,
        _session: Option<&SessionHandle>,
        namespace: &Namespace,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        self.record_write();
        let mut collections = self.collections.write();
        Ok(collections.get_mut(namespace).and_then(|docs| {
            Self::position(docs, filter).map(|pos| docs.remove(pos))
        }))
    }

    fn bulk_write(
        &self,
        _session: Option<&SessionHandle>,
        namespace: &Namespace,
        models: Vec<WriteModel>,
        ordered: bool,
    ) -> StoreResult<BulkWriteOutcome> {
        let mut outcome = BulkWriteOutcome::default();

        for (index, model) in models.into_iter().enumerate() {
            if let Err(error) = self.apply_model(namespace, index, model, &mut outcome) {
                outcome.errors.push(BulkItemError { index, error });
                if ordered {
                    break;
                }
            }
        }

        Ok(outcome)
    }

    fn create_collection(
        &self,
        _session: Option<&SessionHandle>,
        namespace: &Namespace,
    ) -> StoreResult<()> {
        let mut collections = self.collections.write();
        if collections.contains_key(namespace) {
            return Err(StoreError::NamespaceExists(namespace.clone()));
        }
        collections.insert(namespace.clone(), Vec::new());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortSpec;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn ns() -> Namespace {
        Namespace::new("db", "items")
    }

    fn seeded(count: i64) -> MemoryStore {
        let store = MemoryStore::new();
        for n in 0..count {
            store
                .insert_one(None, &ns(), doc(json!({"_id": n, "n": n})))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_find_sort_skip_limit() {
        let store = seeded(10);
        let options = FindOptions::new()
            .with_sort(SortSpec::desc("n"))
            .with_skip(2)
            .with_limit(3);
        let mut cursor = store.find(None, &ns(), options).unwrap();

        let mut seen = Vec::new();
        while let Some(d) = cursor.next_document().unwrap() {
            seen.push(d["n"].as_i64().unwrap());
        }
        assert_eq!(seen, vec![7, 6, 5]);
        assert_eq!(store.stats().skipped_positions, 2);
    }

    #[test]
    fn test_cursor_batches_and_drain() {
        let store = seeded(10);
        let mut cursor = store
            .find(None, &ns(), FindOptions::new().with_batch_size(4))
            .unwrap();

        assert_eq!(cursor.buffered(), 4);
        cursor.next_document().unwrap();
        let drained = cursor.drain_buffered().unwrap();
        assert_eq!(drained.len(), 3);
        assert_eq!(cursor.buffered(), 0);

        // Next call fetches a new batch
        assert!(cursor.next_document().unwrap().is_some());
        assert_eq!(cursor.buffered(), 3);
    }

    #[test]
    fn test_insert_duplicate_id() {
        let store = seeded(1);
        let err = store
            .insert_one(None, &ns(), doc(json!({"_id": 0})))
            .unwrap_err();
        assert!(err.is_duplicate_id());
    }

    #[test]
    fn test_upsert_seeds_from_filter() {
        let store = MemoryStore::new();
        let filter = doc(json!({"$and": [{"_id": "a"}, {"kind": {"$eq": "x"}}]}));
        let created = store
            .find_one_and_update(None, &ns(), &filter, &doc(json!({"$set": {"v": 1}})), true)
            .unwrap()
            .unwrap();
        assert_eq!(Value::Object(created), json!({"_id": "a", "kind": "x", "v": 1}));
    }

    #[test]
    fn test_replace_keeps_id_and_rejects_operators() {
        let store = seeded(1);
        let replaced = store
            .find_one_and_replace(None, &ns(), &doc(json!({"_id": 0})), &doc(json!({"x": 1})), false)
            .unwrap()
            .unwrap();
        assert_eq!(Value::Object(replaced), json!({"_id": 0, "x": 1}));

        let err = store
            .find_one_and_replace(None, &ns(), &doc(json!({"_id": 0})), &doc(json!({"$set": {}})), false)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate(_)));
    }

    #[test]
    fn test_unordered_bulk_continues_after_failure() {
        let store = seeded(1);
        let models = vec![
            WriteModel::InsertOne { document: doc(json!({"_id": 0})) },
            WriteModel::InsertOne { document: doc(json!({"_id": 1})) },
            WriteModel::DeleteMany { filter: doc(json!({"n": 0})) },
        ];
        let outcome = store.bulk_write(None, &ns(), models, false).unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 0);
    }

    #[test]
    fn test_create_collection_twice() {
        let store = MemoryStore::new();
        store.create_collection(None, &ns()).unwrap();
        let err = store.create_collection(None, &ns()).unwrap_err();
        assert!(matches!(err, StoreError::NamespaceExists(_)));
    }

    #[test]
    fn test_injected_replace_failure_fires_once() {
        let store = seeded(1);
        store.fail_next_replace();
        let filter = doc(json!({"_id": 0}));
        assert!(store.replace_one(None, &ns(), &filter, &doc(json!({"a": 1})), false).is_err());
        assert!(store.replace_one(None, &ns(), &filter, &doc(json!({"a": 1})), false).is_ok());
    }
}
