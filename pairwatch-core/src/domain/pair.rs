//! Tracked market pair: an asset id quoted in a currency.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors parsing a canonical "asset-quote" pair name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairParseError {
    #[error("pair '{0}' must look like 'asset-quote' (e.g. bitcoin-usd)")]
    MissingSeparator(String),

    #[error("pair '{0}' has an empty asset id or quote currency")]
    EmptyComponent(String),
}

/// An (asset id, quote-currency) tuple.
///
/// The canonical name is `"{coin_id}-{vs_currency}"`. Asset ids may contain
/// hyphens (`usd-coin`), quote currencies never do, so parsing splits on the
/// last hyphen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pair {
    pub coin_id: String,
    pub vs_currency: String,
}

impl Pair {
    pub fn new(coin_id: impl Into<String>, vs_currency: impl Into<String>) -> Self {
        Self {
            coin_id: coin_id.into(),
            vs_currency: vs_currency.into(),
        }
    }

    /// Canonical pair name used as the series key and in users' pair lists.
    pub fn name(&self) -> String {
        format!("{}-{}", self.coin_id, self.vs_currency)
    }
}

impl FromStr for Pair {
    type Err = PairParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (coin_id, vs_currency) = trimmed
            .rsplit_once('-')
            .ok_or_else(|| PairParseError::MissingSeparator(s.to_string()))?;

        if coin_id.is_empty() || vs_currency.is_empty() {
            return Err(PairParseError::EmptyComponent(s.to_string()));
        }

        Ok(Self::new(coin_id, vs_currency))
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.coin_id, self.vs_currency)
    }
}
