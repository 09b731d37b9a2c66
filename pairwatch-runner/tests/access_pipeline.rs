//! Access pipeline: user exists, pair tracked, series present, in that order.

mod common;

use common::{seed_series, seed_user, store_with_catalog};
use pairwatch_core::domain::{Pair, User};
use pairwatch_core::PairwatchError;
use pairwatch_runner::AccessValidator;

fn tracking(user_id: i64, pairs: &[&str]) -> User {
    let mut user = User::new(user_id, Some("alice".into()), 3);
    user.pairs = pairs.iter().map(|p| p.to_string()).collect();
    user
}

#[tokio::test]
async fn missing_user_fails_first() {
    let store = store_with_catalog().await;
    let validator = AccessValidator::new(store.clone());

    let err = validator
        .check_access(7, &Pair::new("bitcoin", "usd"), 7)
        .await
        .unwrap_err();
    assert!(matches!(err, PairwatchError::UserNotFound { user_id: 7 }));
    assert_eq!(err.code(), 435);
}

#[tokio::test]
async fn untracked_pair_is_rejected_even_when_stored() {
    let store = store_with_catalog().await;
    seed_user(&store, &tracking(7, &["ethereum-eur"])).await;
    seed_series(&store, &["bitcoin-usd"], 48).await;
    let validator = AccessValidator::new(store.clone());

    let err = validator
        .check_access(7, &Pair::new("bitcoin", "usd"), 7)
        .await
        .unwrap_err();
    assert_eq!(err.code(), 437);
}

#[tokio::test]
async fn tracked_pair_without_series_is_not_in_database() {
    let store = store_with_catalog().await;
    seed_user(&store, &tracking(7, &["bitcoin-usd"])).await;
    let validator = AccessValidator::new(store.clone());

    let err = validator
        .check_access(7, &Pair::new("bitcoin", "usd"), 7)
        .await
        .unwrap_err();
    assert!(matches!(err, PairwatchError::PairNotInDataBase { ref pair } if pair == "bitcoin-usd"));
}

#[tokio::test]
async fn success_returns_windowed_prices() {
    let store = store_with_catalog().await;
    seed_user(&store, &tracking(7, &["bitcoin-usd"])).await;
    seed_series(&store, &["bitcoin-usd"], 24 * 30).await;
    let validator = AccessValidator::new(store.clone());

    let series = validator
        .check_access(7, &Pair::new("bitcoin", "usd"), 7)
        .await
        .unwrap();
    assert_eq!(series.pair_name, "bitcoin-usd");
    assert_eq!(series.data.prices.len(), 7 * 24);
    assert!(series.data.market_caps.is_empty());
    assert!(series.data.total_volumes.is_empty());
    // The window keeps the most recent samples.
    let last = series.data.prices.last().unwrap().value();
    assert_eq!(last, 100.0 + (24 * 30 - 1) as f64);
}

#[tokio::test]
async fn validate_pair_checks_quote_before_asset() {
    let store = store_with_catalog().await;
    let validator = AccessValidator::new(store.clone());

    validator
        .validate_pair(&Pair::new("usd-coin", "eur"))
        .await
        .unwrap();
    let err = validator
        .validate_pair(&Pair::new("dogecoin", "rub"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 432);
    let err = validator
        .validate_pair(&Pair::new("dogecoin", "usd"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 433);
}
