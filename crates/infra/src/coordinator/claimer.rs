//! Batch claiming loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use batchline_core::JobId;

use super::{CoordinatorConfig, CoordinatorError};
use crate::store::{ClaimOutcome, CoordinationStore};
use crate::workload::ItemWorkload;

/// How a processing loop ended when it ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// No unprocessed items were left.
    Done,
    /// The job was paused, locally or by another instance.
    Interrupted,
}

/// Committed work of one loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopProgress {
    pub batches: u64,
    pub items: u64,
}

/// Repeatedly claims, processes and commits batches for one job.
pub struct BatchClaimer<'a, S: ?Sized> {
    store: &'a S,
    workload: &'a dyn ItemWorkload,
    batch_size: usize,
    timeout: Duration,
}

impl<'a, S> BatchClaimer<'a, S>
where
    S: CoordinationStore + ?Sized,
{
    pub fn new(store: &'a S, workload: &'a dyn ItemWorkload, config: &CoordinatorConfig) -> Self {
        Self {
            store,
            workload,
            batch_size: config.batch_size.max(1),
            timeout: config.transaction_timeout,
        }
    }

    /// Run a single claim transaction.
    ///
    /// Dropping the claim on timeout drops its transaction, which rolls the
    /// batch back.
    pub async fn claim_next(&self, job: JobId) -> Result<ClaimOutcome, CoordinatorError> {
        let claim = self.store.claim_batch(job, self.batch_size, self.workload);

        match tokio::time::timeout(self.timeout, claim).await {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(CoordinatorError::Timeout {
                operation: "claim_batch",
                timeout: self.timeout,
            }),
        }
    }

    /// Loop until the items run out, the job is paused or a batch fails.
    ///
    /// `pause` is checked before every claim; a batch that is already in
    /// flight always runs to commit or rollback. `progress` is updated per
    /// committed batch so it stays accurate when the loop fails.
    pub async fn run(
        &self,
        job: JobId,
        pause: &CancellationToken,
        progress: &mut LoopProgress,
    ) -> Result<LoopOutcome, CoordinatorError> {
        loop {
            if pause.is_cancelled() {
                return Ok(LoopOutcome::Interrupted);
            }

            match self.claim_next(job).await? {
                ClaimOutcome::Claimed(ids) => {
                    progress.batches += 1;
                    progress.items += ids.len() as u64;
                    debug!(job_id = %job, claimed = ids.len(), "batch committed");
                }
                ClaimOutcome::Exhausted => return Ok(LoopOutcome::Done),
                ClaimOutcome::Paused => return Ok(LoopOutcome::Interrupted),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCoordinationStore;
    use crate::workload::SumWorkload;

    fn config(batch_size: usize) -> CoordinatorConfig {
        CoordinatorConfig::default().with_batch_size(batch_size)
    }

    #[tokio::test]
    async fn runs_until_exhausted() {
        let store = InMemoryCoordinationStore::new();
        store.seed_items(&[(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);
        let job = store.start_job().await.unwrap().job_id();
        let claimer = BatchClaimer::new(&store, &SumWorkload, &config(2));
        let mut progress = LoopProgress::default();

        let outcome = claimer
            .run(job, &CancellationToken::new(), &mut progress)
            .await
            .unwrap();

        assert_eq!(outcome, LoopOutcome::Done);
        assert_eq!(progress, LoopProgress { batches: 3, items: 5 });
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_claiming() {
        let store = InMemoryCoordinationStore::new();
        store.seed_items(&[(1, 1)]);
        let job = store.start_job().await.unwrap().job_id();
        let claimer = BatchClaimer::new(&store, &SumWorkload, &config(2));
        let pause = CancellationToken::new();
        pause.cancel();
        let mut progress = LoopProgress::default();

        let outcome = claimer.run(job, &pause, &mut progress).await.unwrap();

        assert_eq!(outcome, LoopOutcome::Interrupted);
        assert_eq!(progress, LoopProgress::default());
        assert_eq!(store.processed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn paused_job_interrupts_loop() {
        let store = InMemoryCoordinationStore::new();
        store.seed_items(&[(1, 1)]);
        let job = store.start_job().await.unwrap().job_id();
        store.pause_active().await.unwrap();
        let claimer = BatchClaimer::new(&store, &SumWorkload, &config(2));
        let mut progress = LoopProgress::default();

        let outcome = claimer
            .run(job, &CancellationToken::new(), &mut progress)
            .await
            .unwrap();

        assert_eq!(outcome, LoopOutcome::Interrupted);
        assert_eq!(store.processed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_batch_size_still_claims_one() {
        let store = InMemoryCoordinationStore::new();
        store.seed_items(&[(1, 1), (2, 2)]);
        let job = store.start_job().await.unwrap().job_id();
        let mut cfg = CoordinatorConfig::default();
        cfg.batch_size = 0;
        let claimer = BatchClaimer::new(&store, &SumWorkload, &cfg);
        let mut progress = LoopProgress::default();

        claimer
            .run(job, &CancellationToken::new(), &mut progress)
            .await
            .unwrap();

        assert_eq!(progress, LoopProgress { batches: 2, items: 2 });
    }
}
