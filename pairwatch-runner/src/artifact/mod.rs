//! Artifact cache and delivery.
//!
//! A request first looks up its cache key; a hit is re-sent by token with no
//! generation. A miss runs the access checks, renders a transient image,
//! uploads it, and caches the returned token for the TTL.

pub mod cache;
pub mod delivery;
pub mod render;

pub use cache::{CacheError, MemoryTokenCache, RedisTokenCache, TokenCache};
pub use delivery::{DeliveryError, DeliveryReceipt, Messenger, TelegramMessenger};
pub use render::{ArtifactRenderer, CommandRenderer, RenderError, RenderRequest};

use crate::access::AccessValidator;
use pairwatch_core::domain::{Pair, UserId};
use pairwatch_core::PairwatchError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Forecast plots show this many horizons of history.
pub const FORECAST_HISTORY_FACTOR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Chart,
    Forecast,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Chart => "chart",
            ArtifactKind::Forecast => "forecast",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to draw.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactSpec {
    /// Price history over the last `days`.
    Chart { days: u32 },
    /// Model forecast over `horizon_days`, drawn against recent history.
    Forecast {
        horizon_days: u32,
        forecast: serde_json::Value,
    },
}

impl ArtifactSpec {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactSpec::Chart { .. } => ArtifactKind::Chart,
            ArtifactSpec::Forecast { .. } => ArtifactKind::Forecast,
        }
    }

    /// Window or horizon, as used in the cache key.
    pub fn window(&self) -> u32 {
        match self {
            ArtifactSpec::Chart { days } => *days,
            ArtifactSpec::Forecast { horizon_days, .. } => *horizon_days,
        }
    }

    /// Days of stored history the image needs.
    pub fn history_days(&self) -> u32 {
        match self {
            ArtifactSpec::Chart { days } => *days,
            ArtifactSpec::Forecast { horizon_days, .. } => {
                horizon_days.saturating_mul(FORECAST_HISTORY_FACTOR)
            }
        }
    }
}

/// Cache key: `"{pair} {window} {kind}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(pair_name: &str, window: u32, kind: ArtifactKind) -> Self {
        Self(format!("{pair_name} {window} {kind}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
    Cached,
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub key: CacheKey,
    pub token: String,
    pub source: DeliverySource,
    pub receipt: DeliveryReceipt,
}

pub struct ArtifactService {
    validator: AccessValidator,
    cache: Arc<dyn TokenCache>,
    messenger: Arc<dyn Messenger>,
    renderer: Arc<dyn ArtifactRenderer>,
    ttl: Duration,
    work_dir: PathBuf,
}

impl ArtifactService {
    pub fn new(
        validator: AccessValidator,
        cache: Arc<dyn TokenCache>,
        messenger: Arc<dyn Messenger>,
        renderer: Arc<dyn ArtifactRenderer>,
    ) -> Self {
        Self {
            validator,
            cache,
            messenger,
            renderer,
            ttl: DEFAULT_TTL,
            work_dir: std::env::temp_dir(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Deliver the artifact to the user's chat, from cache when possible.
    pub async fn deliver(
        &self,
        user_id: UserId,
        pair: &Pair,
        spec: &ArtifactSpec,
    ) -> Result<DeliveryOutcome, PairwatchError> {
        let pair_name = pair.name();
        let key = CacheKey::new(&pair_name, spec.window(), spec.kind());

        match self.cache.get(key.as_str()).await {
            Ok(Some(token)) => {
                let receipt = self
                    .messenger
                    .send_token(user_id, &token)
                    .await
                    .map_err(|e| PairwatchError::DeliveryFailed {
                        reason: e.to_string(),
                    })?;
                info!(user_id, key = %key, "artifact delivered from cache");
                return Ok(DeliveryOutcome {
                    key,
                    token,
                    source: DeliverySource::Cached,
                    receipt,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "token cache read failed, treating as miss"),
        }

        let series = self
            .validator
            .check_access(user_id, pair, spec.history_days())
            .await?;

        let request = RenderRequest {
            kind: spec.kind(),
            pair: pair_name,
            window_days: spec.history_days(),
            prices: series.data.prices,
            forecast: match spec {
                ArtifactSpec::Forecast { forecast, .. } => Some(forecast.clone()),
                ArtifactSpec::Chart { .. } => None,
            },
        };

        // Removed on drop, whichever way delivery goes.
        let image = tempfile::Builder::new()
            .prefix(&format!("{user_id}-"))
            .suffix(".png")
            .tempfile_in(&self.work_dir)
            .map_err(|e| PairwatchError::GenerationFailed {
                reason: format!("creating temp file: {e}"),
            })?
            .into_temp_path();

        self.renderer
            .render(&request, &image)
            .await
            .map_err(|e| PairwatchError::GenerationFailed {
                reason: e.to_string(),
            })?;

        let receipt = self
            .messenger
            .send_file(user_id, &image)
            .await
            .map_err(|e| PairwatchError::DeliveryFailed {
                reason: e.to_string(),
            })?;

        if let Err(e) = image.close() {
            warn!(error = %e, "failed to remove artifact file");
        }

        let token = receipt.token.clone();
        if let Err(e) = self.cache.set(key.as_str(), &token, self.ttl).await {
            warn!(key = %key, error = %e, "token cache write failed");
        }

        info!(user_id, key = %key, "artifact generated and delivered");
        Ok(DeliveryOutcome {
            key,
            token,
            source: DeliverySource::Fresh,
            receipt,
        })
    }
}
