//! PostgreSQL backend: every collection lives in one JSONB table.
//!
//! Transactions run at SERIALIZABLE; serialization failures and deadlocks
//! surface as [`StoreError::TransactionAborted`] so callers can retry the
//! whole unit of work.

use super::{
    Collection, DocumentStore, Filter, Mutation, Projection, StoreError, StoreTransaction,
    StoredDocument,
};
use crate::domain::DocumentId;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|c| c.into_owned());
        match code.as_deref() {
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => StoreError::TransactionAborted,
            _ => StoreError::Database(err),
        }
    }
}

/// Document store backed by a `documents` table.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections, "connected to document database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the documents table and its containment index.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id UUID NOT NULL,
                seq BIGSERIAL,
                body JSONB NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS documents_body_idx ON documents USING GIN (body jsonb_path_ops)",
        )
        .execute(&self.pool)
        .await?;

        info!("documents table ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn begin(&self, collection: Collection) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTransaction { tx, collection }))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    collection: Collection,
}

/// SELECT over one collection, in insertion order.
fn select_query(
    collection: Collection,
    filter: &Filter,
    limit_one: bool,
    for_update: bool,
) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("SELECT id, body FROM documents WHERE collection = ");
    query.push_bind(collection.name());
    match filter {
        Filter::All => {}
        Filter::Id(id) => {
            query.push(" AND id = ").push_bind(id.0);
        }
        Filter::Matches(pattern) => {
            query.push(" AND body @> ").push_bind(Json(pattern.clone()));
        }
    }
    query.push(" ORDER BY seq");
    if limit_one {
        query.push(" LIMIT 1");
    }
    if for_update {
        query.push(" FOR UPDATE");
    }
    query
}

fn decode_row(row: &PgRow, projection: &Projection) -> Result<StoredDocument, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let Json(mut body): Json<Value> = row.try_get("body")?;
    projection.apply(&mut body);
    Ok(StoredDocument {
        id: DocumentId(id),
        body,
    })
}

impl PgTransaction {
    async fn first(
        &mut self,
        filter: &Filter,
        for_update: bool,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let row = select_query(self.collection, filter, true, for_update)
            .build()
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|row| decode_row(&row, &Projection::full())).transpose()
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn insert(&mut self, body: Value) -> Result<DocumentId, StoreError> {
        if !body.is_object() {
            return Err(StoreError::NotAnObject);
        }
        let id = DocumentId::new();
        sqlx::query("INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3)")
            .bind(self.collection.name())
            .bind(id.0)
            .bind(Json(body))
            .execute(&mut *self.tx)
            .await?;
        debug!(collection = %self.collection, %id, "document inserted");
        Ok(id)
    }

    async fn find_one(
        &mut self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let row = select_query(self.collection, filter, true, false)
            .build()
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|row| decode_row(&row, projection)).transpose()
    }

    async fn find_many(
        &mut self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let rows = select_query(self.collection, filter, false, false)
            .build()
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(|row| decode_row(row, projection)).collect()
    }

    async fn update_one(
        &mut self,
        filter: &Filter,
        mutation: &Mutation,
    ) -> Result<bool, StoreError> {
        let Some(mut doc) = self.first(filter, true).await? else {
            return Ok(false);
        };
        mutation.apply(&mut doc.body)?;
        sqlx::query("UPDATE documents SET body = $1 WHERE collection = $2 AND id = $3")
            .bind(Json(doc.body))
            .bind(self.collection.name())
            .bind(doc.id.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(true)
    }

    async fn delete_one(&mut self, filter: &Filter) -> Result<bool, StoreError> {
        let Some(doc) = self.first(filter, true).await? else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(self.collection.name())
            .bind(doc.id.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
