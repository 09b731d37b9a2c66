//! In-process document store with optimistic concurrency.
//!
//! Transactions stage their writes locally and validate at commit: if any
//! document they looked at changed, or if they scanned a collection that
//! another transaction committed to in the meantime, commit fails with
//! [`StoreError::TransactionAborted`].

use super::{
    Collection, DocumentStore, Filter, Mutation, Projection, StoreError, StoreTransaction,
    StoredDocument,
};
use crate::domain::DocumentId;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Versioned {
    seq: u64,
    version: u64,
    body: Value,
}

#[derive(Debug, Default)]
struct CollectionState {
    docs: HashMap<DocumentId, Versioned>,
    /// Bumped by every commit that writes to this collection.
    generation: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<Collection, CollectionState>,
    next_seq: u64,
    next_version: u64,
}

/// Shared in-memory store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed documents in `collection`.
    pub fn len(&self, collection: Collection) -> usize {
        self.state
            .lock()
            .collections
            .get(&collection)
            .map_or(0, |c| c.docs.len())
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn begin(&self, collection: Collection) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            collection,
            observed: HashMap::new(),
            scanned_at: None,
            writes: HashMap::new(),
        }))
    }
}

#[derive(Debug, Clone)]
enum Staged {
    Upsert { seq: u64, body: Value },
    Deleted,
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    collection: Collection,
    /// Committed versions this transaction has read.
    observed: HashMap<DocumentId, u64>,
    /// Collection generation at the first predicate scan.
    scanned_at: Option<u64>,
    writes: HashMap<DocumentId, Staged>,
}

impl MemoryTransaction {
    /// Committed data overlaid with this transaction's staged writes,
    /// filtered and in insertion order.
    fn matching(&mut self, filter: &Filter) -> Vec<(DocumentId, Value)> {
        let mut state = self.state.lock();
        let committed = state.collections.entry(self.collection).or_default();

        if !matches!(filter, Filter::Id(_)) && self.scanned_at.is_none() {
            self.scanned_at = Some(committed.generation);
        }

        let mut view: Vec<(u64, DocumentId, Value)> = Vec::new();
        for (id, doc) in &committed.docs {
            match self.writes.get(id) {
                Some(Staged::Deleted) => {}
                Some(Staged::Upsert { body, .. }) => {
                    if filter.matches(*id, body) {
                        view.push((doc.seq, *id, body.clone()));
                    }
                }
                None => {
                    if filter.matches(*id, &doc.body) {
                        self.observed.insert(*id, doc.version);
                        view.push((doc.seq, *id, doc.body.clone()));
                    }
                }
            }
        }
        for (id, staged) in &self.writes {
            if let Staged::Upsert { seq, body } = staged {
                if !committed.docs.contains_key(id) && filter.matches(*id, body) {
                    view.push((*seq, *id, body.clone()));
                }
            }
        }
        drop(state);

        view.sort_by_key(|(seq, _, _)| *seq);
        view.into_iter().map(|(_, id, body)| (id, body)).collect()
    }

    fn seq_of(&self, id: DocumentId) -> u64 {
        if let Some(Staged::Upsert { seq, .. }) = self.writes.get(&id) {
            return *seq;
        }
        self.state
            .lock()
            .collections
            .get(&self.collection)
            .and_then(|c| c.docs.get(&id))
            .map_or(0, |doc| doc.seq)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert(&mut self, body: Value) -> Result<DocumentId, StoreError> {
        if !body.is_object() {
            return Err(StoreError::NotAnObject);
        }
        let seq = {
            let mut state = self.state.lock();
            state.next_seq += 1;
            state.next_seq
        };
        let id = DocumentId::new();
        self.writes.insert(id, Staged::Upsert { seq, body });
        Ok(id)
    }

    async fn find_one(
        &mut self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self
            .matching(filter)
            .into_iter()
            .next()
            .map(|(id, mut body)| {
                projection.apply(&mut body);
                StoredDocument { id, body }
            }))
    }

    async fn find_many(
        &mut self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        Ok(self
            .matching(filter)
            .into_iter()
            .map(|(id, mut body)| {
                projection.apply(&mut body);
                StoredDocument { id, body }
            })
            .collect())
    }

    async fn update_one(
        &mut self,
        filter: &Filter,
        mutation: &Mutation,
    ) -> Result<bool, StoreError> {
        let Some((id, mut body)) = self.matching(filter).into_iter().next() else {
            return Ok(false);
        };
        mutation.apply(&mut body)?;
        let seq = self.seq_of(id);
        self.writes.insert(id, Staged::Upsert { seq, body });
        Ok(true)
    }

    async fn delete_one(&mut self, filter: &Filter) -> Result<bool, StoreError> {
        let Some((id, _)) = self.matching(filter).into_iter().next() else {
            return Ok(false);
        };
        self.writes.insert(id, Staged::Deleted);
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            state: shared,
            collection,
            observed,
            scanned_at,
            writes,
        } = *self;
        if writes.is_empty() {
            return Ok(());
        }
        let mut state = shared.lock();
        let mut version = state.next_version;
        let committed = state.collections.entry(collection).or_default();

        let stale_doc = observed
            .iter()
            .any(|(id, seen)| committed.docs.get(id).map(|d| d.version) != Some(*seen));
        let stale_scan = scanned_at.is_some_and(|g| g != committed.generation);
        if stale_doc || stale_scan {
            return Err(StoreError::TransactionAborted);
        }

        for (id, staged) in writes {
            match staged {
                Staged::Deleted => {
                    committed.docs.remove(&id);
                }
                Staged::Upsert { seq, body } => {
                    version += 1;
                    committed.docs.insert(id, Versioned { seq, version, body });
                }
            }
        }
        committed.generation += 1;
        state.next_version = version;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
