//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use aerocache::model::{Document, Namespace};
use aerocache::store::{DocumentStore, MemoryStore};
use aerocache::{Engine, EngineConfig};

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("test document must be an object")
}

pub fn items() -> Namespace {
    Namespace::new("shop", "items")
}

/// Engine over a fresh memory store, returning both.
pub fn engine_with(config: EngineConfig) -> (Engine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn DocumentStore> = store.clone();
    let engine = Engine::new(dyn_store, config).expect("valid config");
    (engine, store)
}

pub fn engine() -> (Engine, Arc<MemoryStore>) {
    engine_with(EngineConfig::default())
}

/// Inserts `count` documents `{_id: n, n: n}` for n in 0..count.
pub fn seed(store: &MemoryStore, namespace: &Namespace, count: i64) {
    for n in 0..count {
        store
            .insert_one(None, namespace, doc(json!({"_id": n, "n": n})))
            .expect("seed insert");
    }
}

/// Stored document with the given id
pub fn stored(store: &MemoryStore, namespace: &Namespace, id: &Value) -> Option<Document> {
    store
        .documents(namespace)
        .into_iter()
        .find(|d| d.get("_id") == Some(id))
}

/// Values of `n` in a page
pub fn numbers(page: &[Document]) -> Vec<i64> {
    page.iter()
        .filter_map(|d| d.get("n").and_then(Value::as_i64))
        .collect()
}
