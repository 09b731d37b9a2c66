//! Existence and eligibility checks that gate every pair operation.
//!
//! `check_access` runs an ordered list of stages and stops at the first
//! failure: the user must exist, must track the pair, and the pair's series
//! must be stored.

use pairwatch_core::data::{PairSeriesStore, ReferenceCatalog};
use pairwatch_core::domain::{Pair, SeriesRecord, User, UserId};
use pairwatch_core::store::{Collection, DocumentStore, Filter, Projection, UnitOfWork};
use pairwatch_core::PairwatchError;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// One check in the access pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStage {
    UserExists,
    PairTracked,
    SeriesPresent,
}

impl AccessStage {
    pub const DEFAULT_PIPELINE: [AccessStage; 3] = [
        AccessStage::UserExists,
        AccessStage::PairTracked,
        AccessStage::SeriesPresent,
    ];
}

/// Parse a user-supplied pair name.
pub fn parse_pair(name: &str) -> Result<Pair, PairwatchError> {
    name.parse().map_err(|_| PairwatchError::InvalidPair {
        pair: name.to_string(),
    })
}

pub(crate) fn user_filter(user_id: UserId) -> Filter {
    Filter::Matches(json!({ "user_id": user_id }))
}

/// State threaded through the stages.
struct AccessContext<'a> {
    user_id: UserId,
    pair_name: &'a str,
    days: u32,
    user: Option<User>,
    series: Option<SeriesRecord>,
}

#[derive(Clone)]
pub struct AccessValidator {
    store: Arc<dyn DocumentStore>,
    catalog: ReferenceCatalog,
    series: PairSeriesStore,
    stages: Vec<AccessStage>,
}

impl AccessValidator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            catalog: ReferenceCatalog::new(Arc::clone(&store)),
            series: PairSeriesStore::new(Arc::clone(&store)),
            store,
            stages: AccessStage::DEFAULT_PIPELINE.to_vec(),
        }
    }

    pub fn stages(&self) -> &[AccessStage] {
        &self.stages
    }

    pub fn catalog(&self) -> &ReferenceCatalog {
        &self.catalog
    }

    pub fn series(&self) -> &PairSeriesStore {
        &self.series
    }

    /// Quote currency must be supported, then the asset id must be known.
    pub async fn validate_pair(&self, pair: &Pair) -> Result<(), PairwatchError> {
        self.catalog.validate_pair(pair).await
    }

    /// Run the pipeline; on success the windowed series is returned.
    pub async fn check_access(
        &self,
        user_id: UserId,
        pair: &Pair,
        days: u32,
    ) -> Result<SeriesRecord, PairwatchError> {
        let pair_name = pair.name();
        let mut ctx = AccessContext {
            user_id,
            pair_name: &pair_name,
            days,
            user: None,
            series: None,
        };

        for stage in &self.stages {
            self.run_stage(*stage, &mut ctx).await?;
            debug!(user_id, pair = %pair_name, stage = ?stage, "access stage passed");
        }

        match ctx.series {
            Some(series) => Ok(series),
            None => self
                .series
                .windowed(&pair_name, days)
                .await?
                .ok_or(PairwatchError::PairNotInDataBase { pair: pair_name }),
        }
    }

    async fn run_stage(
        &self,
        stage: AccessStage,
        ctx: &mut AccessContext<'_>,
    ) -> Result<(), PairwatchError> {
        match stage {
            AccessStage::UserExists => {
                let mut uow = UnitOfWork::open(self.store.as_ref(), Collection::Users).await?;
                let user = uow
                    .read_as::<User>(&user_filter(ctx.user_id), &Projection::full())
                    .await?;
                uow.rollback().await?;
                ctx.user = Some(user.ok_or(PairwatchError::UserNotFound {
                    user_id: ctx.user_id,
                })?);
            }
            AccessStage::PairTracked => {
                let tracked = ctx.user.as_ref().is_some_and(|u| u.tracks(ctx.pair_name));
                if !tracked {
                    return Err(PairwatchError::PairNotInUserList {
                        user_id: ctx.user_id,
                        pair: ctx.pair_name.to_string(),
                    });
                }
            }
            AccessStage::SeriesPresent => {
                let series = self.series.windowed(ctx.pair_name, ctx.days).await?;
                ctx.series = Some(series.ok_or_else(|| PairwatchError::PairNotInDataBase {
                    pair: ctx.pair_name.to_string(),
                })?);
            }
        }
        Ok(())
    }
}
