//! Shared fixtures for integration tests.
#![allow(dead_code)]

pub mod strategies;

use doc_migrate::config::TraversalConfigPatch;
use doc_migrate::store::memory::{CollectionRef, MemoryStore};
use doc_migrate::store::{DocumentData, DocumentRef, DocumentSnapshot, SetOptions};
use doc_migrate::traverser::Traverser;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const COLLECTION: &str = "projects";

pub fn object(value: Value) -> DocumentData {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture must be a JSON object, got {other}"),
    }
}

/// Document seeded at position `index`
pub fn fixture_document(index: usize) -> DocumentData {
    object(json!({
        "string1": format!("abc-{index}"),
        "string2": "def",
        "number": index,
        "nested": { "flag": index % 2 == 0 },
    }))
}

pub fn doc_id(index: usize) -> String {
    format!("doc-{index:03}")
}

/// Seed `count` documents into a fresh store and return it with the collection handle.
pub async fn seeded_store(count: usize) -> (MemoryStore, CollectionRef) {
    let store = MemoryStore::new();
    let collection = store.collection(COLLECTION);
    for index in 0..count {
        collection
            .doc(doc_id(index))
            .set(fixture_document(index), SetOptions::Overwrite)
            .await
            .expect("seeding must succeed");
    }
    (store, collection)
}

pub fn traverser(collection: &CollectionRef, patch: TraversalConfigPatch) -> Traverser<CollectionRef> {
    Traverser::new(collection.clone())
        .with_config(patch)
        .expect("test configuration must be valid")
}

/// Current data of every document in the collection, in id order.
pub fn documents(collection: &CollectionRef, count: usize) -> Vec<Option<DocumentData>> {
    (0..count)
        .map(|index| {
            collection
                .doc(doc_id(index))
                .get()
                .map(|snapshot| snapshot.data().clone())
        })
        .collect()
}

/// Tracks how many batch callbacks run at once.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            gauge: Arc::clone(self),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard {
    gauge: Arc<InFlightGauge>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Thread-safe append-only log for values observed inside callbacks.
#[derive(Debug)]
pub struct Recorder<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, entry: T) {
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<T> {
        self.entries.lock().clone()
    }
}
