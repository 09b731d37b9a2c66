//! CoinGecko-compatible market-data provider.
//!
//! Fetches price history and the reference catalog over HTTP. Handles rate
//! limiting, retries with exponential backoff, response parsing, and the
//! circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{CoinEntry, MarketDataProvider, ProviderError};
use crate::domain::{MarketChart, Pair};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// HTTP client for a CoinGecko-compatible API.
pub struct CoinGeckoProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl CoinGeckoProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("pairwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            circuit_breaker,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    fn chart_url(&self, pair: &Pair) -> String {
        format!("{}/coins/{}/market_chart/range", self.base_url, pair.coin_id)
    }

    /// GET with retry and circuit breaker logic. `None` means 404.
    async fn get_body(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<Option<String>, ProviderError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(ProviderError::CircuitBreakerTripped);
        }

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                debug!(what, attempt, delay_ms = delay.as_millis() as u64, "retrying provider request");
                tokio::time::sleep(delay).await;
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(ProviderError::CircuitBreakerTripped);
            }

            let mut request = self
                .client
                .get(url)
                .query(query)
                .header(reqwest::header::ACCEPT, "application/json");
            if let Some(key) = &self.api_key {
                request = request.header(API_KEY_HEADER, key);
            }

            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(ProviderError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(ProviderError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();

            if status == StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(ProviderError::CircuitBreakerTripped);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!(what, retry_after, "provider rate limit hit");
                last_error = Some(ProviderError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(ProviderError::AuthenticationRequired(format!(
                    "provider rejected the API key for {what}"
                )));
            }

            if status == StatusCode::NOT_FOUND {
                self.circuit_breaker.record_success();
                return Ok(None);
            }

            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(ProviderError::Other(format!("HTTP {status} for {what}")));
                continue;
            }

            let body = resp
                .text()
                .await
                .map_err(|e| ProviderError::NetworkUnreachable(e.to_string()))?;
            self.circuit_breaker.record_success();
            return Ok(Some(body));
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Other("max retries exceeded".into())))
    }
}

/// A range payload must decode and carry at least one price.
pub fn parse_market_chart(pair_name: &str, body: &str) -> Result<MarketChart, ProviderError> {
    let empty = || ProviderError::DataEmpty {
        pair: pair_name.to_string(),
    };
    let chart: MarketChart = serde_json::from_str(body).map_err(|_| empty())?;
    if chart.prices.is_empty() {
        return Err(empty());
    }
    Ok(chart)
}

pub fn parse_vs_currencies(body: &str) -> Result<Vec<String>, ProviderError> {
    serde_json::from_str(body).map_err(|e| {
        ProviderError::ResponseFormatChanged(format!("supported_vs_currencies: {e}"))
    })
}

pub fn parse_coins_list(body: &str) -> Result<Vec<CoinEntry>, ProviderError> {
    serde_json::from_str(body)
        .map_err(|e| ProviderError::ResponseFormatChanged(format!("coins list: {e}")))
}

#[async_trait]
impl MarketDataProvider for CoinGeckoProvider {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn market_chart_range(
        &self,
        pair: &Pair,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MarketChart, ProviderError> {
        let pair_name = pair.name();
        let query = [
            ("vs_currency", pair.vs_currency.clone()),
            ("from", from.timestamp().to_string()),
            ("to", to.timestamp().to_string()),
        ];
        let body = self
            .get_body(&self.chart_url(pair), &query, &pair_name)
            .await?
            .unwrap_or_default();
        parse_market_chart(&pair_name, &body)
    }

    async fn supported_vs_currencies(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/simple/supported_vs_currencies", self.base_url);
        let body = self
            .get_body(&url, &[], "supported_vs_currencies")
            .await?
            .ok_or_else(|| ProviderError::ResponseFormatChanged("supported_vs_currencies: 404".into()))?;
        parse_vs_currencies(&body)
    }

    async fn coins_list(&self) -> Result<Vec<CoinEntry>, ProviderError> {
        let url = format!("{}/coins/list", self.base_url);
        let body = self
            .get_body(&url, &[], "coins_list")
            .await?
            .ok_or_else(|| ProviderError::ResponseFormatChanged("coins list: 404".into()))?;
        parse_coins_list(&body)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_range_payload() {
        let body = r#"{
            "prices": [[1680724852129, 28276.7], [1680728452129, 28301.1]],
            "market_caps": [[1680724852129, 546000000000.0]],
            "total_volumes": [[1680724852129, 17000000000.0]]
        }"#;
        let chart = parse_market_chart("bitcoin-usd", body).unwrap();
        assert_eq!(chart.prices.len(), 2);
        assert_eq!(chart.prices[1].value(), 28301.1);
        assert_eq!(chart.total_volumes.len(), 1);
    }

    #[test]
    fn empty_prices_are_data_empty() {
        let err = parse_market_chart("ethereum-eur", r#"{"prices": []}"#).unwrap_err();
        assert!(matches!(err, ProviderError::DataEmpty { ref pair } if pair == "ethereum-eur"));
    }

    #[test]
    fn error_body_is_data_empty() {
        for body in [r#"{"error": "coin not found"}"#, "", "<html>", "[]"] {
            let err = parse_market_chart("nope-usd", body).unwrap_err();
            assert!(matches!(err, ProviderError::DataEmpty { .. }), "body {body:?}");
        }
    }

    #[test]
    fn parses_catalog_payloads() {
        let currencies = parse_vs_currencies(r#"["btc", "usd", "eur"]"#).unwrap();
        assert_eq!(currencies, vec!["btc", "usd", "eur"]);

        let coins = parse_coins_list(
            r#"[{"id": "bitcoin", "symbol": "btc", "name": "Bitcoin"}, {"id": "usd-coin"}]"#,
        )
        .unwrap();
        assert_eq!(coins[0], CoinEntry::new("bitcoin", "btc", "Bitcoin"));
        assert_eq!(coins[1].id, "usd-coin");
        assert!(coins[1].symbol.is_empty());
    }

    #[test]
    fn malformed_catalog_is_format_change() {
        assert!(matches!(
            parse_vs_currencies(r#"{"status": "down"}"#),
            Err(ProviderError::ResponseFormatChanged(_))
        ));
    }

    #[test]
    fn chart_url_uses_coin_id() {
        let provider = CoinGeckoProvider::new(Arc::new(CircuitBreaker::default_provider()))
            .unwrap()
            .with_base_url("http://localhost:9000/api/v3/");
        assert_eq!(
            provider.chart_url(&Pair::new("usd-coin", "eur")),
            "http://localhost:9000/api/v3/coins/usd-coin/market_chart/range"
        );
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let provider = CoinGeckoProvider::new(Arc::new(CircuitBreaker::default_provider()))
            .unwrap()
            .with_api_key(Some(String::new()));
        assert!(provider.api_key.is_none());
    }

    #[tokio::test]
    async fn tripped_breaker_short_circuits() {
        let breaker = Arc::new(CircuitBreaker::default_provider());
        breaker.trip();
        let provider = CoinGeckoProvider::new(Arc::clone(&breaker))
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        assert!(!provider.is_available());
        let err = provider.coins_list().await.unwrap_err();
        assert!(matches!(err, ProviderError::CircuitBreakerTripped));
    }
}
