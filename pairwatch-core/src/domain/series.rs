//! Historical price series for one pair, as stored in the `pairs` collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Samples are hourly, so a window of N days holds at most `N * 24` points.
pub const SAMPLES_PER_DAY: usize = 24;

/// One `[timestamp_ms, value]` sample, serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint(pub i64, pub f64);

impl PricePoint {
    pub fn timestamp_ms(&self) -> i64 {
        self.0
    }

    pub fn value(&self) -> f64 {
        self.1
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

/// Provider market chart payload.
///
/// Windowed reads strip `market_caps` and `total_volumes`, which then
/// deserialize as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketChart {
    #[serde(default)]
    pub prices: Vec<PricePoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub market_caps: Vec<PricePoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub total_volumes: Vec<PricePoint>,
}

impl MarketChart {
    /// BLAKE3 hex digest of the price samples.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for point in &self.prices {
            hasher.update(&point.0.to_le_bytes());
            hasher.update(&point.1.to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Stored series record, one per distinct pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub pair_name: String,
    pub data: MarketChart,
    #[serde(default)]
    pub data_hash: Option<String>,
    #[serde(default)]
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl SeriesRecord {
    /// Build a freshly fetched record, stamping hash and refresh time.
    pub fn fetched(pair_name: impl Into<String>, data: MarketChart, at: DateTime<Utc>) -> Self {
        let data_hash = data.content_hash();
        Self {
            pair_name: pair_name.into(),
            data,
            data_hash: Some(data_hash),
            refreshed_at: Some(at),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.data.prices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_point_round_trips_as_array() {
        let point = PricePoint(1_680_724_852_129, 28_276.70);
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(json, "[1680724852129,28276.7]");
        let back: PricePoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }

    #[test]
    fn chart_without_volumes_deserializes() {
        let chart: MarketChart =
            serde_json::from_str(r#"{"prices": [[1, 2.0], [2, 3.0]]}"#).unwrap();
        assert_eq!(chart.prices.len(), 2);
        assert!(chart.market_caps.is_empty());
        assert!(chart.total_volumes.is_empty());
    }

    #[test]
    fn content_hash_depends_only_on_prices() {
        let a = MarketChart {
            prices: vec![PricePoint(1, 1.0), PricePoint(2, 2.0)],
            ..Default::default()
        };
        let mut b = a.clone();
        b.total_volumes = vec![PricePoint(1, 99.0)];
        assert_eq!(a.content_hash(), b.content_hash());

        b.prices[1].1 = 2.5;
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn datetime_from_millis() {
        let point = PricePoint(0, 1.0);
        assert_eq!(point.datetime().unwrap().timestamp(), 0);
    }
}
