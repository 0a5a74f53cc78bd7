//! Document store interface.
//!
//! Documents are JSON objects addressed by `collection/id`. Sub-collections
//! are ordinary collections whose name is the parent path, so a member of an
//! organization lives at `idaosEtherlink/0xOrg.../members/0xMember...`.
//!
//! Two backends implement [`DocumentStore`]: [`MemoryStore`] for dry runs
//! and tests, and [`PgDocumentStore`] backed by a single JSONB table.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::StoreError;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

/// Top-level fields of a document
pub type Fields = serde_json::Map<String, Value>;

/// Serialize a value into document fields. Fails unless it serializes to a JSON object.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::InvalidDocument(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    collection: String,
    id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Path of a document in a sub-collection of this document
    pub fn child(&self, sub_collection: &str, id: impl Into<String>) -> Self {
        Self::new(format!("{}/{}/{}", self.collection, self.id, sub_collection), id)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    /// Append each value not already present in the array
    ArrayUnion(Vec<Value>),
    /// Remove every occurrence of each value
    ArrayRemove(Vec<Value>),
}

/// Partial update addressed by dotted field paths (`statusHistory.queued`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<(String, FieldOp)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push((path.into(), FieldOp::Set(value.into())));
        self
    }

    pub fn array_union(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push((path.into(), FieldOp::ArrayUnion(vec![value.into()])));
        self
    }

    pub fn array_remove(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push((path.into(), FieldOp::ArrayRemove(vec![value.into()])));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every operation in order. Intermediate maps on a dotted path are
    /// created when missing and replaced when they hold a non-object value.
    pub fn apply_to(&self, doc: &mut Fields) {
        for (path, op) in &self.ops {
            let mut segments: Vec<&str> = path.split('.').collect();
            let Some(leaf) = segments.pop() else { continue };

            let mut target = &mut *doc;
            for segment in segments {
                let entry = target
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Fields::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Fields::new());
                }
                target = match entry {
                    Value::Object(map) => map,
                    _ => unreachable!("entry was just replaced with an object"),
                };
            }

            match op {
                FieldOp::Set(value) => {
                    target.insert(leaf.to_string(), value.clone());
                }
                FieldOp::ArrayUnion(values) => {
                    let entry = target
                        .entry(leaf.to_string())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if !entry.is_array() {
                        *entry = Value::Array(Vec::new());
                    }
                    if let Value::Array(items) = entry {
                        for value in values {
                            if !items.contains(value) {
                                items.push(value.clone());
                            }
                        }
                    }
                }
                FieldOp::ArrayRemove(values) => {
                    if let Some(Value::Array(items)) = target.get_mut(leaf) {
                        items.retain(|item| !values.contains(item));
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Set(DocPath, Fields),
    Update(DocPath, Update),
    /// Create the document from the defaults when absent, then apply the update
    Upsert(DocPath, Fields, Update),
    Delete(DocPath),
}

impl Write {
    pub fn path(&self) -> &DocPath {
        match self {
            Write::Set(path, _)
            | Write::Update(path, _)
            | Write::Upsert(path, _, _)
            | Write::Delete(path) => path,
        }
    }
}

/// Ordered writes that commit atomically: all of them or none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: DocPath, fields: Fields) -> &mut Self {
        self.writes.push(Write::Set(path, fields));
        self
    }

    pub fn update(&mut self, path: DocPath, update: Update) -> &mut Self {
        self.writes.push(Write::Update(path, update));
        self
    }

    pub fn delete(&mut self, path: DocPath) -> &mut Self {
        self.writes.push(Write::Delete(path));
        self
    }

    pub fn upsert(&mut self, path: DocPath, defaults: Fields, update: Update) -> &mut Self {
        self.writes.push(Write::Upsert(path, defaults, update));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Read-modify-write body of a single-document transaction. Receives the
/// document as it is while the store holds it exclusively and returns the
/// writes to commit before the hold is released.
pub type TransactionFn = Box<dyn FnOnce(Option<Fields>) -> Result<WriteBatch, StoreError> + Send>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Fields>, StoreError>;

    /// All documents of one collection, ordered by id
    async fn list(&self, collection: &str) -> Result<Vec<(String, Fields)>, StoreError>;

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    async fn transaction(&self, path: &DocPath, body: TransactionFn) -> Result<(), StoreError>;

    async fn exists(&self, path: &DocPath) -> Result<bool, StoreError> {
        Ok(self.get(path).await?.is_some())
    }

    async fn set(&self, path: &DocPath, fields: Fields) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.set(path.clone(), fields);
        self.commit(batch).await
    }

    /// Fails with [`StoreError::NotFound`] when the document does not exist
    async fn update(&self, path: &DocPath, update: Update) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.update(path.clone(), update);
        self.commit(batch).await
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(path.clone());
        self.commit(batch).await
    }
}
