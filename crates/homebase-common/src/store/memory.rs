//! In-memory document store.
//!
//! All data is lost when the process exits. A single async mutex guards the
//! whole map, which makes every batch and transaction trivially serializable.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::{DocPath, DocumentStore, Fields, TransactionFn, Write, WriteBatch};
use crate::StoreError;

type Collections = HashMap<String, BTreeMap<String, Fields>>;

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .await
            .get(collection)
            .map_or(0, |docs| docs.len())
    }
}

/// Validate and apply a batch. Writes are staged first so a failing write
/// leaves the collections untouched.
fn apply_writes(collections: &mut Collections, writes: Vec<Write>) -> Result<(), StoreError> {
    let mut staged: BTreeMap<DocPath, Option<Fields>> = BTreeMap::new();

    for write in writes {
        let path = write.path().clone();
        let current = match staged.get(&path) {
            Some(doc) => doc.clone(),
            None => collections
                .get(path.collection())
                .and_then(|docs| docs.get(path.id()))
                .cloned(),
        };

        let next = match write {
            Write::Set(_, fields) => Some(fields),
            Write::Update(_, update) => {
                let mut doc = current.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                update.apply_to(&mut doc);
                Some(doc)
            }
            Write::Upsert(_, defaults, update) => {
                let mut doc = current.unwrap_or(defaults);
                update.apply_to(&mut doc);
                Some(doc)
            }
            Write::Delete(_) => None,
        };
        staged.insert(path, next);
    }

    for (path, doc) in staged {
        match doc {
            Some(fields) => {
                collections
                    .entry(path.collection().to_string())
                    .or_default()
                    .insert(path.id().to_string(), fields);
            }
            None => {
                if let Some(docs) = collections.get_mut(path.collection()) {
                    docs.remove(path.id());
                }
            }
        }
    }

    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Fields>, StoreError> {
        Ok(self
            .collections
            .lock()
            .await
            .get(path.collection())
            .and_then(|docs| docs.get(path.id()))
            .cloned())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Fields)>, StoreError> {
        Ok(self
            .collections
            .lock()
            .await
            .get(collection)
            .map(|docs| docs.iter().map(|(id, f)| (id.clone(), f.clone())).collect())
            .unwrap_or_default())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().await;
        apply_writes(&mut collections, batch.into_writes())
    }

    async fn transaction(&self, path: &DocPath, body: TransactionFn) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().await;
        let current = collections
            .get(path.collection())
            .and_then(|docs| docs.get(path.id()))
            .cloned();
        let batch = body(current)?;
        apply_writes(&mut collections, batch.into_writes())
    }
}
