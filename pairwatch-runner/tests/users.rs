//! User service: creation, quotas and the tracked pair list.

mod common;

use common::{seed_user, store_with_catalog};
use pairwatch_core::domain::{Pair, User};
use pairwatch_core::PairwatchError;
use pairwatch_runner::UserService;

#[tokio::test]
async fn add_pair_to_fresh_user() {
    let store = store_with_catalog().await;
    let users = UserService::new(store.clone());
    users.create_user(1, Some("u".into()), None).await.unwrap();

    let outcome = users.add_pair(1, &Pair::new("bitcoin", "usd")).await.unwrap();

    assert!(outcome.added);
    assert_eq!(outcome.user.pairs, vec!["bitcoin-usd"]);
    assert_eq!(outcome.remaining, 2);
    assert_eq!(users.get_user(1).await.unwrap().pairs, vec!["bitcoin-usd"]);
}

#[tokio::test]
async fn full_list_rejects_another_pair() {
    let store = store_with_catalog().await;
    let mut user = User::new(2, None, 1);
    user.pairs = vec!["bitcoin-usd".into()];
    seed_user(&store, &user).await;
    let users = UserService::new(store.clone());

    let err = users
        .add_pair(2, &Pair::new("ethereum", "usd"))
        .await
        .unwrap_err();

    assert!(matches!(err, PairwatchError::PairListIsOver { user_id: 2, quota: 1 }));
    assert_eq!(err.code(), 439);
    assert_eq!(users.get_user(2).await.unwrap().pairs, vec!["bitcoin-usd"]);
}

#[tokio::test]
async fn adding_tracked_pair_is_a_no_op() {
    let store = store_with_catalog().await;
    let users = UserService::new(store.clone());
    users.create_user(3, None, None).await.unwrap();
    users.add_pair(3, &Pair::new("bitcoin", "usd")).await.unwrap();

    let again = users.add_pair(3, &Pair::new("bitcoin", "usd")).await.unwrap();
    assert!(!again.added);
    assert_eq!(again.user.pairs.len(), 1);
    assert_eq!(again.remaining, 2);
}

#[tokio::test]
async fn catalog_is_checked_before_the_user() {
    let store = store_with_catalog().await;
    let users = UserService::new(store.clone());

    let err = users
        .add_pair(404, &Pair::new("bitcoin", "rub"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 432);

    let err = users
        .add_pair(404, &Pair::new("bitcoin", "usd"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 435);
}

#[tokio::test]
async fn duplicate_user_is_rejected() {
    let store = store_with_catalog().await;
    let users = UserService::new(store.clone());
    users.create_user(5, None, None).await.unwrap();

    let err = users.create_user(5, None, None).await.unwrap_err();
    assert_eq!(err.code(), 434);

    let err = users.create_user(6, None, Some(2)).await.unwrap_err();
    assert_eq!(err.code(), 441);
}

#[tokio::test]
async fn quota_cannot_drop_below_tracked_count() {
    let store = store_with_catalog().await;
    let users = UserService::new(store.clone());
    users.create_user(8, None, Some(5)).await.unwrap();
    for coin in ["bitcoin", "ethereum", "usd-coin"] {
        users.add_pair(8, &Pair::new(coin, "usd")).await.unwrap();
    }
    users.add_pair(8, &Pair::new("bitcoin", "eur")).await.unwrap();

    let err = users.set_quota(8, 3).await.unwrap_err();
    assert_eq!(err.code(), 436);
    let err = users.set_quota(8, 2).await.unwrap_err();
    assert_eq!(err.code(), 436);

    let user = users.set_quota(8, 4).await.unwrap();
    assert_eq!(user.n_pairs, 4);
    assert_eq!(user.remaining(), 0);
}

#[tokio::test]
async fn remove_pair_then_delete_user() {
    let store = store_with_catalog().await;
    let users = UserService::new(store.clone());
    users.create_user(9, None, None).await.unwrap();
    users.add_pair(9, &Pair::new("ethereum", "eur")).await.unwrap();

    let err = users.remove_pair(9, "bitcoin-usd").await.unwrap_err();
    assert_eq!(err.code(), 437);

    let user = users.remove_pair(9, "ethereum-eur").await.unwrap();
    assert!(user.pairs.is_empty());

    users.delete_user(9).await.unwrap();
    assert_eq!(users.get_user(9).await.unwrap_err().code(), 435);
    assert_eq!(users.delete_user(9).await.unwrap_err().code(), 435);
    assert_eq!(users.remove_pair(9, "ethereum-eur").await.unwrap_err().code(), 435);
}

#[tokio::test]
async fn users_are_listed_highest_id_first() {
    let store = store_with_catalog().await;
    let users = UserService::new(store.clone());
    for id in [3, 11, 7] {
        users.create_user(id, None, None).await.unwrap();
    }

    let ids: Vec<i64> = users
        .list_users()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.user_id)
        .collect();
    assert_eq!(ids, vec![11, 7, 3]);
}

#[tokio::test]
async fn concurrent_adds_respect_the_quota() {
    let store = store_with_catalog().await;
    let users = UserService::new(store.clone());
    users.create_user(12, None, Some(3)).await.unwrap();
    users.add_pair(12, &Pair::new("bitcoin", "usd")).await.unwrap();
    users.add_pair(12, &Pair::new("ethereum", "usd")).await.unwrap();

    let a = users.clone();
    let b = users.clone();
    let (ra, rb) = tokio::join!(
        async move { a.add_pair(12, &Pair::new("usd-coin", "usd")).await },
        async move { b.add_pair(12, &Pair::new("bitcoin", "eur")).await },
    );

    let successes = [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
    assert_eq!(users.get_user(12).await.unwrap().pairs.len(), 3);
}
