//! Reference data catalog: the provider's quote currencies and asset list.
//!
//! Stored as two named documents in the reference collection, each replaced
//! wholesale on refresh.

use super::provider::MarketDataProvider;
use crate::domain::Pair;
use crate::error::PairwatchError;
use crate::store::{
    retry_on_abort, Collection, DocumentStore, Filter, Mutation, Projection, StoreError,
    UnitOfWork, DEFAULT_RETRY_ATTEMPTS,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const VS_CURRENCIES_DOC: &str = "supported_vs_currencies";
pub const COINS_LIST_DOC: &str = "coins_list";

/// Sizes of the snapshot written by a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub vs_currencies: usize,
    pub coins: usize,
}

/// Answers "is this pair valid" from the stored reference documents.
#[derive(Clone)]
pub struct ReferenceCatalog {
    store: Arc<dyn DocumentStore>,
}

impl ReferenceCatalog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Pull both reference lists from the provider and store them.
    pub async fn refresh(
        &self,
        provider: &dyn MarketDataProvider,
    ) -> Result<CatalogSnapshot, PairwatchError> {
        let vs_currencies = provider.supported_vs_currencies().await?;
        let coins = provider.coins_list().await?;
        let snapshot = CatalogSnapshot {
            vs_currencies: vs_currencies.len(),
            coins: coins.len(),
        };

        let coins = serde_json::to_value(&coins).map_err(StoreError::from)?;
        self.replace(VS_CURRENCIES_DOC, json!(vs_currencies)).await?;
        self.replace(COINS_LIST_DOC, coins).await?;

        info!(
            vs_currencies = snapshot.vs_currencies,
            coins = snapshot.coins,
            provider = provider.name(),
            "reference catalog refreshed"
        );
        Ok(snapshot)
    }

    async fn replace(&self, name: &str, data: Value) -> Result<(), PairwatchError> {
        let store = self.store.as_ref();
        let body = json!({ "name": name, "data": data });
        retry_on_abort(DEFAULT_RETRY_ATTEMPTS, || {
            let body = body.clone();
            async move {
                let mut uow = UnitOfWork::open(store, Collection::Reference).await?;
                let existing = uow
                    .read(
                        &Filter::Matches(json!({ "name": name })),
                        &Projection::full().exclude("data"),
                    )
                    .await?;
                if existing.is_some() {
                    uow.update(&Mutation::Replace(body), None).await?;
                } else {
                    uow.create(body).await?;
                }
                uow.commit().await?;
                Ok::<_, PairwatchError>(())
            }
        })
        .await?;
        debug!(document = name, "reference document replaced");
        Ok(())
    }

    /// Quote currency first, then asset id.
    pub async fn validate_pair(&self, pair: &Pair) -> Result<(), PairwatchError> {
        let mut uow = UnitOfWork::open(self.store.as_ref(), Collection::Reference).await?;

        let vs_filter = Filter::Matches(json!({
            "name": VS_CURRENCIES_DOC,
            "data": [pair.vs_currency],
        }));
        if uow.find_identity(&vs_filter).await?.is_none() {
            return Err(PairwatchError::VsCurrencyIncorrect {
                vs_currency: pair.vs_currency.clone(),
            });
        }

        let coin_filter = Filter::Matches(json!({
            "name": COINS_LIST_DOC,
            "data": [{ "id": pair.coin_id }],
        }));
        if uow.find_identity(&coin_filter).await?.is_none() {
            return Err(PairwatchError::CoinIdIncorrect {
                coin_id: pair.coin_id.clone(),
            });
        }

        uow.rollback().await?;
        Ok(())
    }
}
