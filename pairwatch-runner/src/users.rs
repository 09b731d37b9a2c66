//! User records and their tracked pair lists.

use crate::access::user_filter;
use pairwatch_core::data::ReferenceCatalog;
use pairwatch_core::domain::{Pair, User, UserId, MIN_PAIR_QUOTA};
use pairwatch_core::store::{
    retry_on_abort, Collection, DocumentStore, Filter, Mutation, Projection, UnitOfWork,
    DEFAULT_RETRY_ATTEMPTS,
};
use pairwatch_core::PairwatchError;
use std::sync::Arc;
use tracing::info;

/// Result of adding a pair to a user's list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddPairOutcome {
    pub user: User,
    /// False when the pair was already tracked.
    pub added: bool,
    pub remaining: u32,
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn DocumentStore>,
    catalog: ReferenceCatalog,
}

impl UserService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            catalog: ReferenceCatalog::new(Arc::clone(&store)),
            store,
        }
    }

    pub async fn create_user(
        &self,
        user_id: UserId,
        user_name: Option<String>,
        n_pairs: Option<u32>,
    ) -> Result<User, PairwatchError> {
        let quota = n_pairs.unwrap_or(MIN_PAIR_QUOTA);
        if quota < MIN_PAIR_QUOTA {
            return Err(PairwatchError::UserCreationError {
                reason: format!("pair quota {quota} is below the minimum of {MIN_PAIR_QUOTA}"),
            });
        }
        let user = User::new(user_id, user_name, quota);

        let store = self.store.as_ref();
        retry_on_abort(DEFAULT_RETRY_ATTEMPTS, || async {
            let mut uow = UnitOfWork::open(store, Collection::Users).await?;
            if uow.find_identity(&user_filter(user_id)).await?.is_some() {
                return Err(PairwatchError::UserAlreadyExists { user_id });
            }
            uow.create_from(&user).await?;
            uow.commit().await?;
            Ok(())
        })
        .await?;

        info!(user_id, quota, "user created");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<User, PairwatchError> {
        let mut uow = UnitOfWork::open(self.store.as_ref(), Collection::Users).await?;
        let user = uow
            .read_as::<User>(&user_filter(user_id), &Projection::full())
            .await?;
        uow.rollback().await?;
        user.ok_or(PairwatchError::UserNotFound { user_id })
    }

    /// Every user, highest id first.
    pub async fn list_users(&self) -> Result<Vec<User>, PairwatchError> {
        let mut uow = UnitOfWork::open(self.store.as_ref(), Collection::Users).await?;
        let mut users: Vec<User> = uow.find_all_as(&Filter::All, &Projection::full()).await?;
        uow.rollback().await?;
        users.sort_by(|a, b| b.user_id.cmp(&a.user_id));
        Ok(users)
    }

    /// Change a user's quota. It may not drop below the minimum or below the
    /// number of pairs already tracked.
    pub async fn set_quota(&self, user_id: UserId, n_pairs: u32) -> Result<User, PairwatchError> {
        if n_pairs < MIN_PAIR_QUOTA {
            return Err(PairwatchError::UserUpdateError {
                reason: format!("pair quota {n_pairs} is below the minimum of {MIN_PAIR_QUOTA}"),
            });
        }

        let store = self.store.as_ref();
        let user = retry_on_abort(DEFAULT_RETRY_ATTEMPTS, || async {
            let mut uow = UnitOfWork::open(store, Collection::Users).await?;
            let mut user: User = uow
                .read_as(&user_filter(user_id), &Projection::full())
                .await?
                .ok_or(PairwatchError::UserNotFound { user_id })?;
            if (n_pairs as usize) < user.pairs.len() {
                return Err(PairwatchError::UserUpdateError {
                    reason: format!(
                        "user {user_id} already tracks {} pairs, quota {n_pairs} is too small",
                        user.pairs.len()
                    ),
                });
            }
            uow.update(&Mutation::set("n_pairs", n_pairs), None).await?;
            uow.commit().await?;
            user.n_pairs = n_pairs;
            Ok(user)
        })
        .await?;

        info!(user_id, n_pairs, "user quota updated");
        Ok(user)
    }

    /// Validate the pair against the catalog, then append it to the user's
    /// list if the quota allows. Adding an already tracked pair is a no-op.
    pub async fn add_pair(&self, user_id: UserId, pair: &Pair) -> Result<AddPairOutcome, PairwatchError> {
        self.catalog.validate_pair(pair).await?;
        let pair_name = pair.name();

        let store = self.store.as_ref();
        let outcome = retry_on_abort(DEFAULT_RETRY_ATTEMPTS, || async {
            let mut uow = UnitOfWork::open(store, Collection::Users).await?;
            let mut user: User = uow
                .read_as(&user_filter(user_id), &Projection::full())
                .await?
                .ok_or(PairwatchError::UserNotFound { user_id })?;

            if user.tracks(&pair_name) {
                uow.rollback().await?;
                let remaining = user.remaining();
                return Ok(AddPairOutcome {
                    user,
                    added: false,
                    remaining,
                });
            }
            if !user.has_capacity() {
                return Err(PairwatchError::PairListIsOver {
                    user_id,
                    quota: user.n_pairs,
                });
            }

            uow.update(&Mutation::push("pairs", pair_name.as_str()), None)
                .await?;
            uow.commit().await?;
            user.pairs.push(pair_name.clone());
            let remaining = user.remaining();
            Ok(AddPairOutcome {
                user,
                added: true,
                remaining,
            })
        })
        .await?;

        if outcome.added {
            info!(user_id, pair = %pair_name, remaining = outcome.remaining, "pair added to user list");
        }
        Ok(outcome)
    }

    pub async fn remove_pair(&self, user_id: UserId, pair_name: &str) -> Result<User, PairwatchError> {
        let store = self.store.as_ref();
        let user = retry_on_abort(DEFAULT_RETRY_ATTEMPTS, || async {
            let mut uow = UnitOfWork::open(store, Collection::Users).await?;
            let mut user: User = uow
                .read_as(&user_filter(user_id), &Projection::full())
                .await?
                .ok_or(PairwatchError::UserNotFound { user_id })?;
            if !user.tracks(pair_name) {
                return Err(PairwatchError::PairNotInUserList {
                    user_id,
                    pair: pair_name.to_string(),
                });
            }
            uow.update(&Mutation::pull("pairs", pair_name), None).await?;
            uow.commit().await?;
            user.pairs.retain(|p| p != pair_name);
            Ok(user)
        })
        .await?;

        info!(user_id, pair = pair_name, "pair removed from user list");
        Ok(user)
    }

    pub async fn delete_user(&self, user_id: UserId) -> Result<(), PairwatchError> {
        let store = self.store.as_ref();
        retry_on_abort(DEFAULT_RETRY_ATTEMPTS, || async {
            let mut uow = UnitOfWork::open(store, Collection::Users).await?;
            if !uow.delete(Some(&user_filter(user_id))).await? {
                return Err(PairwatchError::UserNotFound { user_id });
            }
            uow.commit().await?;
            Ok(())
        })
        .await?;

        info!(user_id, "user deleted");
        Ok(())
    }
}
