//! Market-data provider trait and structured error types.
//!
//! The provider trait abstracts over the remote market-data API so the
//! series store and sync job can run against a mock in tests.

use crate::domain::{MarketChart, Pair};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured provider errors, displayable in CLI output and admin messages.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("provider returned no price data for '{pair}'")]
    DataEmpty { pair: String },

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("provider error: {0}")]
    Other(String),
}

/// One entry of the provider's asset list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinEntry {
    pub id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
}

impl CoinEntry {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            name: name.into(),
        }
    }
}

/// A remote market-data source.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Price history for `pair` between `from` and `to`.
    ///
    /// A payload without prices is [`ProviderError::DataEmpty`].
    async fn market_chart_range(
        &self,
        pair: &Pair,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MarketChart, ProviderError>;

    /// Quote currencies the provider can price in.
    async fn supported_vs_currencies(&self) -> Result<Vec<String>, ProviderError>;

    /// Every asset the provider knows.
    async fn coins_list(&self) -> Result<Vec<CoinEntry>, ProviderError>;

    /// False while the provider is rate-limited or blocked.
    fn is_available(&self) -> bool;
}
