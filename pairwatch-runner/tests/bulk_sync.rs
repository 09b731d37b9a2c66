//! Bulk sync: planning, rate-limit pacing, failure reporting and policies.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{seed_series, seed_user, RecordingMessenger};
use pairwatch_core::data::{CoinEntry, MarketDataProvider, MockProvider, PairSeriesStore, ProviderError};
use pairwatch_core::domain::{MarketChart, Pair, User};
use pairwatch_core::store::MemoryStore;
use pairwatch_core::PairwatchError;
use pairwatch_runner::{
    AdminNotifier, BulkSync, FailureNotifier, FailurePolicy, SyncPlan, SyncScheduler,
    TracingProgress,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const ADMIN: i64 = -1001;
const DELAY: Duration = Duration::from_secs(10);

#[derive(Default)]
struct RecordingNotifier {
    failed: Mutex<Vec<(String, u16)>>,
}

impl RecordingNotifier {
    fn failed(&self) -> Vec<(String, u16)> {
        self.failed.lock().clone()
    }
}

#[async_trait]
impl FailureNotifier for RecordingNotifier {
    async fn on_failure(&self, pair: &str, error: &PairwatchError) {
        self.failed.lock().push((pair.to_string(), error.code()));
    }
}

/// Serves one request, then behaves like a tripped breaker.
struct TripsAfterFirstCall {
    inner: MockProvider,
}

#[async_trait]
impl MarketDataProvider for TripsAfterFirstCall {
    fn name(&self) -> &str {
        "trips"
    }

    async fn market_chart_range(
        &self,
        pair: &Pair,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MarketChart, ProviderError> {
        let result = self.inner.market_chart_range(pair, from, to).await;
        self.inner.set_available(false);
        result
    }

    async fn supported_vs_currencies(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.supported_vs_currencies().await
    }

    async fn coins_list(&self) -> Result<Vec<CoinEntry>, ProviderError> {
        self.inner.coins_list().await
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn seed_tracker(store: &MemoryStore, user_id: i64, pairs: &[&str]) {
    let mut user = User::new(user_id, None, 5);
    user.pairs = pairs.iter().map(|p| p.to_string()).collect();
    seed_user(store, &user).await;
}

#[tokio::test(start_paused = true)]
async fn empty_payload_is_reported_and_others_refresh() {
    let store = Arc::new(MemoryStore::new());
    seed_series(&store, &["bitcoin-usd", "ethereum-eur"], 48).await;
    let provider = Arc::new(
        MockProvider::new()
            .with_chart("bitcoin-usd", MockProvider::hourly_chart(96, 200.0))
            .with_empty("ethereum-eur"),
    );
    let messenger = Arc::new(RecordingMessenger::new());
    let notifier = Arc::new(AdminNotifier::new(messenger.clone(), ADMIN));
    let sync = BulkSync::new(store.clone(), provider.clone(), notifier).with_delay(DELAY);

    let summary = sync.run(&TracingProgress).await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed_pairs(), vec!["ethereum-eur"]);
    assert_eq!(summary.errors[0].1.code(), 438);

    let texts = messenger.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Updating pairs fail at "));
    assert!(texts[0].ends_with(": ethereum-eur"));

    let series = PairSeriesStore::new(store.clone());
    let btc = series.prices(&Pair::new("bitcoin", "usd"), 89).await.unwrap();
    assert_eq!(btc.len(), 96);
    // The failed pair keeps its previous record.
    let eth = series.prices(&Pair::new("ethereum", "eur"), 89).await.unwrap();
    assert_eq!(eth.len(), 48);
}

#[tokio::test(start_paused = true)]
async fn pauses_after_every_provider_call() {
    let store = Arc::new(MemoryStore::new());
    seed_tracker(&store, 1, &["bitcoin-usd", "ethereum-eur", "usd-coin-usd"]).await;
    let provider = Arc::new(
        MockProvider::new()
            .with_chart("bitcoin-usd", MockProvider::hourly_chart(24, 1.0))
            .with_chart("ethereum-eur", MockProvider::hourly_chart(24, 1.0))
            .with_empty("usd-coin-usd"),
    );
    let sync = BulkSync::new(store.clone(), provider.clone(), Arc::new(RecordingNotifier::default()))
        .with_delay(DELAY);

    let started = Instant::now();
    let summary = sync.run(&TracingProgress).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(provider.calls().len(), 3);
    assert_eq!(started.elapsed(), DELAY * 3);
}

#[tokio::test(start_paused = true)]
async fn invalid_stored_name_fails_without_a_provider_call() {
    let store = Arc::new(MemoryStore::new());
    seed_tracker(&store, 1, &["bitcoin", "bitcoin-usd"]).await;
    let provider = Arc::new(
        MockProvider::new().with_chart("bitcoin-usd", MockProvider::hourly_chart(24, 1.0)),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let sync = BulkSync::new(store.clone(), provider.clone(), notifier.clone()).with_delay(DELAY);

    let started = Instant::now();
    let summary = sync.run(&TracingProgress).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(notifier.failed(), vec![("bitcoin".to_string(), 431)]);
    assert_eq!(provider.calls(), vec!["bitcoin-usd"]);
    assert_eq!(started.elapsed(), DELAY);
}

#[tokio::test(start_paused = true)]
async fn abort_policy_stops_after_first_failure() {
    let store = Arc::new(MemoryStore::new());
    seed_tracker(&store, 1, &["bitcoin-usd", "ethereum-eur", "usd-coin-usd"]).await;
    let provider = Arc::new(
        MockProvider::new()
            .with_empty("bitcoin-usd")
            .with_chart("ethereum-eur", MockProvider::hourly_chart(24, 1.0))
            .with_chart("usd-coin-usd", MockProvider::hourly_chart(24, 1.0)),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let sync = BulkSync::new(store.clone(), provider.clone(), notifier.clone())
        .with_delay(DELAY)
        .with_policy(FailurePolicy::Abort);

    let summary = sync.run(&TracingProgress).await.unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(provider.calls(), vec!["bitcoin-usd"]);
    assert_eq!(notifier.failed(), vec![("bitcoin-usd".to_string(), 438)]);
}

#[tokio::test(start_paused = true)]
async fn continue_policy_visits_every_pair() {
    let store = Arc::new(MemoryStore::new());
    seed_tracker(&store, 1, &["bitcoin-usd", "ethereum-eur"]).await;
    let provider = Arc::new(
        MockProvider::new()
            .with_empty("bitcoin-usd")
            .with_empty("ethereum-eur"),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let sync = BulkSync::new(store.clone(), provider.clone(), notifier.clone()).with_delay(DELAY);

    let summary = sync.run(&TracingProgress).await.unwrap();

    assert!(!summary.aborted);
    assert_eq!(summary.failed, 2);
    assert_eq!(notifier.failed().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn tripped_breaker_skips_the_rest() {
    let store = Arc::new(MemoryStore::new());
    seed_tracker(&store, 1, &["bitcoin-usd", "ethereum-eur", "usd-coin-usd"]).await;
    let provider = Arc::new(TripsAfterFirstCall {
        inner: MockProvider::new()
            .with_chart("bitcoin-usd", MockProvider::hourly_chart(24, 1.0))
            .with_chart("ethereum-eur", MockProvider::hourly_chart(24, 1.0))
            .with_chart("usd-coin-usd", MockProvider::hourly_chart(24, 1.0)),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let sync = BulkSync::new(store.clone(), provider.clone(), notifier.clone()).with_delay(DELAY);

    let started = Instant::now();
    let summary = sync.run(&TracingProgress).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(provider.inner.calls(), vec!["bitcoin-usd"]);
    assert!(notifier.failed().iter().all(|(_, code)| *code == 502));
    assert_eq!(started.elapsed(), DELAY);
}

#[tokio::test]
async fn plan_unions_stored_and_tracked_pairs() {
    let store = Arc::new(MemoryStore::new());
    seed_series(&store, &["bitcoin-usd", "ethereum-eur"], 24).await;
    seed_tracker(&store, 1, &["bitcoin-usd", "usd-coin-usd"]).await;
    seed_tracker(&store, 2, &["usd-coin-usd", "ethereum-usd"]).await;
    let sync = BulkSync::new(
        store.clone(),
        Arc::new(MockProvider::new()),
        Arc::new(RecordingNotifier::default()),
    );

    let plan = sync.plan().await.unwrap();

    assert_eq!(
        plan,
        SyncPlan {
            refresh: names(&["bitcoin-usd", "ethereum-eur"]),
            insert: names(&["ethereum-usd", "usd-coin-usd"]),
        }
    );
    let order: Vec<&String> = plan.pairs().collect();
    assert_eq!(
        order,
        vec!["bitcoin-usd", "ethereum-eur", "ethereum-usd", "usd-coin-usd"]
    );
}

#[tokio::test(start_paused = true)]
async fn inserted_pairs_are_stored_after_a_run() {
    let store = Arc::new(MemoryStore::new());
    seed_tracker(&store, 1, &["ethereum-eur"]).await;
    let provider = Arc::new(
        MockProvider::new().with_chart("ethereum-eur", MockProvider::hourly_chart(48, 1.0)),
    );
    let sync = BulkSync::new(store.clone(), provider, Arc::new(RecordingNotifier::default()))
        .with_delay(DELAY);

    assert!(sync.run(&TracingProgress).await.unwrap().all_succeeded());

    let plan = sync.plan().await.unwrap();
    assert_eq!(plan.refresh, names(&["ethereum-eur"]));
    assert!(plan.insert.is_empty());
}

#[tokio::test(start_paused = true)]
async fn scheduler_runs_immediately_then_every_period() {
    let store = Arc::new(MemoryStore::new());
    seed_tracker(&store, 1, &["bitcoin-usd"]).await;
    let provider = Arc::new(
        MockProvider::new().with_chart("bitcoin-usd", MockProvider::hourly_chart(24, 1.0)),
    );
    let sync = BulkSync::new(store.clone(), provider.clone(), Arc::new(RecordingNotifier::default()))
        .with_delay(DELAY);
    let scheduler = SyncScheduler::new(Duration::from_secs(12 * 3600));

    let runs = scheduler
        .run_until(
            &sync,
            &TracingProgress,
            tokio::time::sleep(Duration::from_secs(25 * 3600)),
        )
        .await;

    assert_eq!(runs, 3);
    assert_eq!(provider.calls().len(), 3);
}
