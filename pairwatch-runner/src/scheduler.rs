//! Periodic driver for the bulk sync job.

use crate::sync::{BulkSync, SyncProgress};
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

pub struct SyncScheduler {
    period: Duration,
}

impl SyncScheduler {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run `job` now and then once per period until `shutdown` resolves.
    ///
    /// A run in progress is never interrupted; shutdown takes effect before
    /// the next tick. Returns the number of runs started.
    pub async fn run_until<S>(&self, job: &BulkSync, progress: &dyn SyncProgress, shutdown: S) -> usize
    where
        S: Future<Output = ()>,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut runs = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(runs, "sync scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            runs += 1;
            match job.run(progress).await {
                Ok(summary) if summary.all_succeeded() => {
                    info!(run = runs, pairs = summary.total, "scheduled sync finished");
                }
                Ok(summary) => {
                    error!(
                        run = runs,
                        failed = summary.failed,
                        pairs = ?summary.failed_pairs(),
                        "scheduled sync finished with failures"
                    );
                }
                Err(e) => error!(run = runs, code = e.code(), error = %e, "scheduled sync could not start"),
            }
        }
        runs
    }
}
