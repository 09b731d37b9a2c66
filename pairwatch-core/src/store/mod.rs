//! Document store: backends, transactions and the unit of work.
//!
//! A backend hands out one [`StoreTransaction`] per [`Collection`]; all
//! entity code goes through [`UnitOfWork`], which adds the identity pin on
//! top of the raw transaction.

pub mod document;
pub mod memory;
pub mod postgres;
pub mod unit_of_work;

pub use document::{Filter, Mutation, Projection};
pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;
pub use unit_of_work::{retry_on_abort, UnitOfWork, DEFAULT_RETRY_ATTEMPTS};

use crate::domain::DocumentId;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Named document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Users,
    Pairs,
    /// Reference data snapshots (quote currencies, asset list).
    Reference,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Pairs => "pairs",
            Collection::Reference => "other",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction aborted by a concurrent write")]
    TransactionAborted,

    #[error("update or delete needs a filter or a pinned document")]
    Unpinned,

    #[error("invalid mutation at '{path}': {reason}")]
    InvalidMutation { path: String, reason: String },

    #[error("document body must be a JSON object")]
    NotAnObject,

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database: {0}")]
    Database(#[source] sqlx::Error),
}

/// A document as it leaves the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub body: Value,
}

/// A store backend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Begin one transaction scoped to `collection`.
    async fn begin(&self, collection: Collection) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One open transaction over one collection.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// every write made through it. Reads return documents in insertion order.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert(&mut self, body: Value) -> Result<DocumentId, StoreError>;

    async fn find_one(
        &mut self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Option<StoredDocument>, StoreError>;

    async fn find_many(
        &mut self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<StoredDocument>, StoreError>;

    /// Apply `mutation` to the first matching document.
    async fn update_one(&mut self, filter: &Filter, mutation: &Mutation)
        -> Result<bool, StoreError>;

    /// Delete the first matching document.
    async fn delete_one(&mut self, filter: &Filter) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
