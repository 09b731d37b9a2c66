//! Transactional handle to one collection with an identity pin.

use super::{Collection, DocumentStore, Filter, Mutation, Projection, StoreError, StoreTransaction};
use crate::domain::DocumentId;
use crate::error::Retryable;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

/// Attempts used by services when retrying an aborted scope.
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;

/// One transactional scope over one collection.
///
/// `create` and a successful `read` pin the touched document; while pinned,
/// `read`, `update` and `delete` ignore their filter and target the pin.
/// Dropping the unit without [`commit`](Self::commit) rolls everything back.
pub struct UnitOfWork {
    collection: Collection,
    tx: Box<dyn StoreTransaction>,
    pinned: Option<DocumentId>,
}

impl UnitOfWork {
    pub async fn open(store: &dyn DocumentStore, collection: Collection) -> Result<Self, StoreError> {
        let tx = store.begin(collection).await?;
        debug!(collection = %collection, "unit of work opened");
        Ok(Self {
            collection,
            tx,
            pinned: None,
        })
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn pinned(&self) -> Option<DocumentId> {
        self.pinned
    }

    /// Insert a document and pin it.
    pub async fn create(&mut self, body: Value) -> Result<DocumentId, StoreError> {
        if !body.is_object() {
            return Err(StoreError::NotAnObject);
        }
        let id = self.tx.insert(body).await?;
        self.pinned = Some(id);
        Ok(id)
    }

    pub async fn create_from<T: Serialize>(&mut self, value: &T) -> Result<DocumentId, StoreError> {
        self.create(serde_json::to_value(value)?).await
    }

    /// Read one document, by pin if set, by `filter` otherwise.
    pub async fn read(
        &mut self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Option<Value>, StoreError> {
        let target = self.target(Some(filter))?;
        let found = self.tx.find_one(&target, projection).await?;
        Ok(found.map(|doc| {
            self.pinned = Some(doc.id);
            doc.body
        }))
    }

    pub async fn read_as<T: DeserializeOwned>(
        &mut self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Option<T>, StoreError> {
        match self.read(filter, projection).await? {
            Some(body) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }

    /// Apply `mutation` to the pinned document, or to the first match.
    pub async fn update(
        &mut self,
        mutation: &Mutation,
        filter: Option<&Filter>,
    ) -> Result<bool, StoreError> {
        let target = self.target(filter)?;
        self.tx.update_one(&target, mutation).await
    }

    /// Delete the pinned document, or the first match. Clears the pin.
    pub async fn delete(&mut self, filter: Option<&Filter>) -> Result<bool, StoreError> {
        let target = self.target(filter)?;
        let deleted = self.tx.delete_one(&target).await?;
        if deleted && matches!(target, Filter::Id(id) if Some(id) == self.pinned) {
            self.pinned = None;
        }
        Ok(deleted)
    }

    /// Identity of the first match. Never pins and ignores any pin.
    pub async fn find_identity(&mut self, filter: &Filter) -> Result<Option<DocumentId>, StoreError> {
        let found = self.tx.find_one(filter, &Projection::full()).await?;
        Ok(found.map(|doc| doc.id))
    }

    /// Every match, in insertion order. Never pins.
    pub async fn find_all(
        &mut self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<Value>, StoreError> {
        let docs = self.tx.find_many(filter, projection).await?;
        Ok(docs.into_iter().map(|doc| doc.body).collect())
    }

    pub async fn find_all_as<T: DeserializeOwned>(
        &mut self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<T>, StoreError> {
        self.find_all(filter, projection)
            .await?
            .into_iter()
            .map(|body| serde_json::from_value(body).map_err(StoreError::from))
            .collect()
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        let collection = self.collection;
        self.tx.commit().await?;
        debug!(collection = %collection, "unit of work committed");
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await
    }

    fn target(&self, filter: Option<&Filter>) -> Result<Filter, StoreError> {
        match (self.pinned, filter) {
            (Some(id), _) => Ok(Filter::Id(id)),
            (None, Some(filter)) => Ok(filter.clone()),
            (None, None) => Err(StoreError::Unpinned),
        }
    }
}

/// Re-run a whole transactional scope while it fails with a retryable error.
///
/// `scope` must open its own [`UnitOfWork`] on every call; single operations
/// are never retried in isolation.
pub async fn retry_on_abort<T, E, F, Fut>(attempts: usize, mut scope: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match scope().await {
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(attempt, max = attempts, error = %err, "scope aborted, retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}
