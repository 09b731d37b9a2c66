//! Market data: provider client, circuit breaker, reference catalog and
//! the pair series store.

pub mod catalog;
pub mod circuit_breaker;
pub mod coingecko;
pub mod mock;
pub mod provider;
pub mod series;

pub use catalog::{CatalogSnapshot, ReferenceCatalog, COINS_LIST_DOC, VS_CURRENCIES_DOC};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use coingecko::CoinGeckoProvider;
pub use mock::MockProvider;
pub use provider::{CoinEntry, MarketDataProvider, ProviderError};
pub use series::{PairSeriesStore, RefreshKind, RefreshOutcome, LOOKBACK_DAYS};
