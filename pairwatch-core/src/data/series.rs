//! Per-pair price series: wholesale refresh and windowed reads.

use super::provider::MarketDataProvider;
use crate::domain::{Pair, PricePoint, SeriesRecord, SAMPLES_PER_DAY};
use crate::error::PairwatchError;
use crate::store::{
    retry_on_abort, Collection, DocumentStore, Filter, Mutation, Projection, StoreError,
    UnitOfWork, DEFAULT_RETRY_ATTEMPTS,
};
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// History fetched on every refresh.
pub const LOOKBACK_DAYS: i64 = 89;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    Inserted,
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub pair_name: String,
    pub kind: RefreshKind,
    pub samples: usize,
    pub data_hash: String,
}

fn by_name(pair_name: &str) -> Filter {
    Filter::Matches(json!({ "pair_name": pair_name }))
}

/// Last `days * 24` samples, without market caps or volumes.
pub fn window_projection(days: u32) -> Projection {
    Projection::full()
        .last("data.prices", days as usize * SAMPLES_PER_DAY)
        .exclude("data.market_caps")
        .exclude("data.total_volumes")
}

/// One record per pair in the `pairs` collection.
#[derive(Clone)]
pub struct PairSeriesStore {
    store: Arc<dyn DocumentStore>,
}

impl PairSeriesStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Fetch the lookback window and replace (or create) the pair's record.
    ///
    /// Nothing is written when the provider has no prices for the pair.
    pub async fn refresh(
        &self,
        provider: &dyn MarketDataProvider,
        pair: &Pair,
    ) -> Result<RefreshOutcome, PairwatchError> {
        let pair_name = pair.name();
        let to = Utc::now();
        let from = to - Duration::days(LOOKBACK_DAYS);

        let chart = provider.market_chart_range(pair, from, to).await?;
        if chart.prices.is_empty() {
            return Err(PairwatchError::ProviderDataEmpty { pair: pair_name });
        }

        let record = SeriesRecord::fetched(pair_name.clone(), chart, to);
        let samples = record.sample_count();
        let data_hash = record.data_hash.clone().unwrap_or_default();
        let body = serde_json::to_value(&record).map_err(StoreError::from)?;

        let store = self.store.as_ref();
        let kind = retry_on_abort(DEFAULT_RETRY_ATTEMPTS, || {
            let body = body.clone();
            let filter = by_name(&pair_name);
            async move {
                let mut uow = UnitOfWork::open(store, Collection::Pairs).await?;
                let existing = uow
                    .read(&filter, &Projection::full().exclude("data"))
                    .await?;
                let kind = if existing.is_some() {
                    uow.update(&Mutation::Replace(body), None).await?;
                    RefreshKind::Replaced
                } else {
                    uow.create(body).await?;
                    RefreshKind::Inserted
                };
                uow.commit().await?;
                Ok::<_, PairwatchError>(kind)
            }
        })
        .await?;

        info!(pair = %pair_name, samples, kind = ?kind, "pair series refreshed");
        Ok(RefreshOutcome {
            pair_name,
            kind,
            samples,
            data_hash,
        })
    }

    /// The pair's record trimmed to the last `days` of samples.
    pub async fn windowed(
        &self,
        pair_name: &str,
        days: u32,
    ) -> Result<Option<SeriesRecord>, PairwatchError> {
        let mut uow = UnitOfWork::open(self.store.as_ref(), Collection::Pairs).await?;
        let record = uow
            .read_as::<SeriesRecord>(&by_name(pair_name), &window_projection(days))
            .await?;
        uow.rollback().await?;
        Ok(record)
    }

    /// Windowed samples alone; the pair must be stored.
    pub async fn prices(&self, pair: &Pair, days: u32) -> Result<Vec<PricePoint>, PairwatchError> {
        let pair_name = pair.name();
        match self.windowed(&pair_name, days).await? {
            Some(record) => Ok(record.data.prices),
            None => Err(PairwatchError::PairNotInDataBase { pair: pair_name }),
        }
    }

    /// Names of every stored pair.
    pub async fn distinct_pairs(&self) -> Result<BTreeSet<String>, PairwatchError> {
        let mut uow = UnitOfWork::open(self.store.as_ref(), Collection::Pairs).await?;
        let docs = uow
            .find_all(&Filter::All, &Projection::full().exclude("data"))
            .await?;
        uow.rollback().await?;
        Ok(docs
            .iter()
            .filter_map(|doc| doc.get("pair_name").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect())
    }
}
