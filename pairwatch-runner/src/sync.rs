//! Bulk synchronization: refresh every tracked pair under the provider's
//! rate limit, reporting each failure.

use crate::access::parse_pair;
use crate::artifact::Messenger;
use async_trait::async_trait;
use chrono::Utc;
use pairwatch_core::data::{MarketDataProvider, PairSeriesStore, ProviderError, RefreshOutcome};
use pairwatch_core::domain::User;
use pairwatch_core::store::{Collection, DocumentStore, Filter, Projection, UnitOfWork};
use pairwatch_core::PairwatchError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_DELAY: Duration = Duration::from_secs(10);

/// What a failed pair does to the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Continue,
    Abort,
}

/// Pairs to process, snapshotted once at the start of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Pairs that already have a stored series.
    pub refresh: BTreeSet<String>,
    /// Pairs tracked by some user but not stored yet.
    pub insert: BTreeSet<String>,
}

impl SyncPlan {
    pub fn len(&self) -> usize {
        self.refresh.len() + self.insert.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refreshes first, then inserts.
    pub fn pairs(&self) -> impl Iterator<Item = &String> {
        self.refresh.iter().chain(self.insert.iter())
    }
}

/// Progress callbacks for a sync run.
pub trait SyncProgress: Send + Sync {
    fn on_start(&self, pair: &str, index: usize, total: usize);

    fn on_complete(
        &self,
        pair: &str,
        index: usize,
        total: usize,
        result: &Result<RefreshOutcome, PairwatchError>,
    );

    fn on_batch_complete(&self, summary: &SyncSummary);
}

/// Reports progress through `tracing`.
pub struct TracingProgress;

impl SyncProgress for TracingProgress {
    fn on_start(&self, pair: &str, index: usize, total: usize) {
        info!(pair, "[{}/{total}] refreshing", index + 1);
    }

    fn on_complete(
        &self,
        pair: &str,
        index: usize,
        total: usize,
        result: &Result<RefreshOutcome, PairwatchError>,
    ) {
        match result {
            Ok(outcome) => info!(
                pair,
                samples = outcome.samples,
                kind = ?outcome.kind,
                "[{}/{total}] done",
                index + 1
            ),
            Err(e) => warn!(pair, code = e.code(), error = %e, "[{}/{total}] failed", index + 1),
        }
    }

    fn on_batch_complete(&self, summary: &SyncSummary) {
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            aborted = summary.aborted,
            "sync run complete"
        );
    }
}

/// Invoked once for every pair that fails.
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn on_failure(&self, pair: &str, error: &PairwatchError);
}

/// Logs failures only.
pub struct LogNotifier;

#[async_trait]
impl FailureNotifier for LogNotifier {
    async fn on_failure(&self, pair: &str, error: &PairwatchError) {
        error!(pair, code = error.code(), error = %error, "pair update failed");
    }
}

/// Messages an administrator chat about each failure.
pub struct AdminNotifier {
    messenger: Arc<dyn Messenger>,
    chat_id: i64,
}

impl AdminNotifier {
    pub fn new(messenger: Arc<dyn Messenger>, chat_id: i64) -> Self {
        Self { messenger, chat_id }
    }

    pub fn message(pair: &str) -> String {
        format!(
            "Updating pairs fail at {}: {pair}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

#[async_trait]
impl FailureNotifier for AdminNotifier {
    async fn on_failure(&self, pair: &str, error: &PairwatchError) {
        error!(pair, code = error.code(), error = %error, "pair update failed");
        if let Err(e) = self
            .messenger
            .send_text(self.chat_id, &Self::message(pair))
            .await
        {
            warn!(pair, error = %e, "failed to notify admin");
        }
    }
}

/// Result of one sync run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<(String, PairwatchError)>,
    /// True when the abort policy stopped the run early.
    pub aborted: bool,
}

impl SyncSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn failed_pairs(&self) -> Vec<&str> {
        self.errors.iter().map(|(pair, _)| pair.as_str()).collect()
    }
}

/// Refreshes the distinct set of stored and tracked pairs.
pub struct BulkSync {
    store: Arc<dyn DocumentStore>,
    series: PairSeriesStore,
    provider: Arc<dyn MarketDataProvider>,
    notifier: Arc<dyn FailureNotifier>,
    delay: Duration,
    policy: FailurePolicy,
}

impl BulkSync {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn MarketDataProvider>,
        notifier: Arc<dyn FailureNotifier>,
    ) -> Self {
        Self {
            series: PairSeriesStore::new(Arc::clone(&store)),
            store,
            provider,
            notifier,
            delay: DEFAULT_DELAY,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stored pairs, plus every user's pairs that are not stored yet.
    pub async fn plan(&self) -> Result<SyncPlan, PairwatchError> {
        let refresh = self.series.distinct_pairs().await?;

        let mut uow = UnitOfWork::open(self.store.as_ref(), Collection::Users).await?;
        let users: Vec<User> = uow.find_all_as(&Filter::All, &Projection::full()).await?;
        uow.rollback().await?;

        let insert = users
            .into_iter()
            .flat_map(|u| u.pairs)
            .filter(|p| !refresh.contains(p))
            .collect();
        Ok(SyncPlan { refresh, insert })
    }

    pub async fn run(&self, progress: &dyn SyncProgress) -> Result<SyncSummary, PairwatchError> {
        let plan = self.plan().await?;
        info!(
            refresh = plan.refresh.len(),
            insert = plan.insert.len(),
            provider = self.provider.name(),
            "sync run starting"
        );
        Ok(self.execute(&plan, progress).await)
    }

    /// Process `plan` sequentially, pausing after every provider call.
    pub async fn execute(&self, plan: &SyncPlan, progress: &dyn SyncProgress) -> SyncSummary {
        let pairs: Vec<&String> = plan.pairs().collect();
        let total = pairs.len();
        let mut summary = SyncSummary {
            total,
            ..Default::default()
        };

        for (i, name) in pairs.iter().enumerate() {
            // Bail out once the provider has blocked us.
            if !self.provider.is_available() {
                warn!(remaining = total - i, "provider unavailable, skipping remaining pairs");
                for rest in &pairs[i..] {
                    let err = PairwatchError::Provider(ProviderError::CircuitBreakerTripped);
                    self.notifier.on_failure(rest, &err).await;
                    summary.errors.push((rest.to_string(), err));
                    summary.failed += 1;
                }
                break;
            }

            progress.on_start(name, i, total);

            let mut called_provider = false;
            let result = match parse_pair(name) {
                Ok(pair) => {
                    called_provider = true;
                    self.series.refresh(self.provider.as_ref(), &pair).await
                }
                Err(e) => Err(e),
            };
            progress.on_complete(name, i, total, &result);

            let mut stop = false;
            match result {
                Ok(_) => summary.succeeded += 1,
                Err(e) => {
                    self.notifier.on_failure(name, &e).await;
                    summary.errors.push((name.to_string(), e));
                    summary.failed += 1;
                    stop = self.policy == FailurePolicy::Abort;
                }
            }

            if called_provider {
                tokio::time::sleep(self.delay).await;
            }
            if stop {
                summary.aborted = true;
                warn!(pair = %name, "abort policy: stopping sync run");
                break;
            }
        }

        progress.on_batch_complete(&summary);
        summary
    }
}
