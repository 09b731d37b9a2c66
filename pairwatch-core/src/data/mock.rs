//! Mock market-data provider for tests and offline development.

use super::provider::{CoinEntry, MarketDataProvider, ProviderError};
use crate::domain::{MarketChart, Pair, PricePoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

const HOUR_MS: i64 = 60 * 60 * 1000;

/// Serves canned charts and catalog data; records every chart request.
pub struct MockProvider {
    charts: HashMap<String, MarketChart>,
    vs_currencies: Vec<String>,
    coins: Vec<CoinEntry>,
    available: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            charts: HashMap::new(),
            vs_currencies: Vec::new(),
            coins: Vec::new(),
            available: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chart(mut self, pair_name: impl Into<String>, chart: MarketChart) -> Self {
        self.charts.insert(pair_name.into(), chart);
        self
    }

    /// Answer `pair_name` with a payload that has no prices.
    pub fn with_empty(self, pair_name: impl Into<String>) -> Self {
        self.with_chart(pair_name, MarketChart::default())
    }

    pub fn with_catalog(mut self, vs_currencies: &[&str], coins: &[&str]) -> Self {
        self.vs_currencies = vs_currencies.iter().map(|s| s.to_string()).collect();
        self.coins = coins
            .iter()
            .map(|id| CoinEntry::new(*id, id.chars().take(3).collect::<String>(), *id))
            .collect();
        self
    }

    /// Simulate a tripped circuit breaker.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Pair names requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// `samples` hourly prices starting at `start_price`, rising by one per hour.
    pub fn hourly_chart(samples: usize, start_price: f64) -> MarketChart {
        let start_ms = 1_680_000_000_000;
        let prices = (0..samples)
            .map(|i| PricePoint(start_ms + i as i64 * HOUR_MS, start_price + i as f64))
            .collect::<Vec<_>>();
        let market_caps = prices
            .iter()
            .map(|p| PricePoint(p.timestamp_ms(), p.value() * 1_000.0))
            .collect();
        let total_volumes = prices
            .iter()
            .map(|p| PricePoint(p.timestamp_ms(), 42.0))
            .collect();
        MarketChart {
            prices,
            market_caps,
            total_volumes,
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn market_chart_range(
        &self,
        pair: &Pair,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<MarketChart, ProviderError> {
        if !self.is_available() {
            return Err(ProviderError::CircuitBreakerTripped);
        }
        let name = pair.name();
        self.calls.lock().push(name.clone());
        match self.charts.get(&name) {
            Some(chart) if !chart.prices.is_empty() => Ok(chart.clone()),
            _ => Err(ProviderError::DataEmpty { pair: name }),
        }
    }

    async fn supported_vs_currencies(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.vs_currencies.clone())
    }

    async fn coins_list(&self) -> Result<Vec<CoinEntry>, ProviderError> {
        Ok(self.coins.clone())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
