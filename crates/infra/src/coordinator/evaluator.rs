use tracing::warn;

use batchline_core::JobState;

use crate::store::CoordinationStore;

/// Derives the current [`JobState`] from a lock-free ledger read.
///
/// Never fails: an unreadable ledger is reported as `Undefined`.
pub struct JobStateEvaluator<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> JobStateEvaluator<'a, S>
where
    S: CoordinationStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn evaluate(&self) -> JobState {
        match self.store.ledger_view().await {
            Ok(view) => JobState::derive(&view),
            Err(e) => {
                warn!(error = %e, "unable to read the job ledger");
                JobState::Undefined
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCoordinationStore;

    #[tokio::test]
    async fn follows_the_ledger() {
        let store = InMemoryCoordinationStore::new();
        let evaluator = JobStateEvaluator::new(&store);
        assert_eq!(evaluator.evaluate().await, JobState::NeverStarted);

        let job = store.start_job().await.unwrap().job_id();
        assert_eq!(evaluator.evaluate().await, JobState::Running);

        store.pause_active().await.unwrap();
        assert_eq!(evaluator.evaluate().await, JobState::Paused);

        store.resume_paused().await.unwrap();
        store.complete_job(job).await.unwrap();
        assert_eq!(evaluator.evaluate().await, JobState::NotRunning);
    }

    #[tokio::test]
    async fn unreadable_ledger_is_undefined() {
        let store = InMemoryCoordinationStore::new();
        store.set_unavailable(true);

        assert_eq!(
            JobStateEvaluator::new(&store).evaluate().await,
            JobState::Undefined
        );
    }
}
