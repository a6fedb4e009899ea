//! Tracks the processing loops spawned by one instance.
//!
//! Every loop receives a child of the current *pause scope* token. Pausing
//! cancels that scope and installs a fresh one, so loops spawned later (for
//! example after a resume) are not born cancelled. Shutdown cancels the root,
//! which reaches every scope.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use batchline_core::JobId;

use super::{CoordinatorError, LoopOutcome};

/// Reports kept for [`LoopSupervisor::join_all`]; older ones are dropped.
const REPORT_HISTORY: usize = 64;

/// Final account of one processing loop.
#[derive(Debug)]
pub struct LoopReport {
    pub job_id: JobId,
    pub batches: u64,
    pub processed: u64,
    pub result: Result<LoopOutcome, CoordinatorError>,
}

impl LoopReport {
    pub fn is_done(&self) -> bool {
        matches!(self.result, Ok(LoopOutcome::Done))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.result, Ok(LoopOutcome::Interrupted))
    }
}

/// Owner of this instance's processing loops.
pub struct LoopSupervisor {
    root: CancellationToken,
    pause_scope: Mutex<CancellationToken>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    reports: Arc<Mutex<VecDeque<LoopReport>>>,
}

impl LoopSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let pause_scope = Mutex::new(root.child_token());
        Self {
            root,
            pause_scope,
            loops: Mutex::new(Vec::new()),
            reports: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Spawn a loop. `task` gets the token it must check between batches.
    pub fn spawn<F, Fut>(&self, job: JobId, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = LoopReport> + Send + 'static,
    {
        if self.root.is_cancelled() {
            warn!(job_id = %job, "supervisor is shut down, loop not started");
            return;
        }

        let token = lock(&self.pause_scope).child_token();
        let fut = task(token);
        let reports = self.reports.clone();

        let handle = tokio::spawn(async move {
            let report = fut.await;
            let mut reports = lock(&reports);
            if reports.len() == REPORT_HISTORY {
                reports.pop_front();
            }
            reports.push_back(report);
        });

        let mut loops = lock(&self.loops);
        loops.retain(|h| !h.is_finished());
        loops.push(handle);
    }

    /// Interrupt every loop spawned so far. Later loops are unaffected.
    pub fn interrupt_local(&self) {
        let mut scope = lock(&self.pause_scope);
        let previous = std::mem::replace(&mut *scope, self.root.child_token());
        previous.cancel();
    }

    /// Number of loops still running.
    pub fn running(&self) -> usize {
        lock(&self.loops).iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every loop, including ones spawned while waiting, and drain
    /// the collected reports.
    pub async fn join_all(&self) -> Vec<LoopReport> {
        loop {
            let handles = std::mem::take(&mut *lock(&self.loops));
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "processing loop panicked");
                }
            }
        }

        lock(&self.reports).drain(..).collect()
    }

    /// Interrupt all loops for good and wait for them.
    pub async fn shutdown(&self) -> Vec<LoopReport> {
        self.root.cancel();
        self.join_all().await
    }
}

impl Default for LoopSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report(job: JobId, result: Result<LoopOutcome, CoordinatorError>) -> LoopReport {
        LoopReport {
            job_id: job,
            batches: 0,
            processed: 0,
            result,
        }
    }

    fn wait_for_cancel(supervisor: &LoopSupervisor, job: JobId) {
        supervisor.spawn(job, move |token| async move {
            token.cancelled().await;
            report(job, Ok(LoopOutcome::Interrupted))
        });
    }

    #[tokio::test]
    async fn join_all_collects_reports() {
        let supervisor = LoopSupervisor::new();
        let job = JobId::from_raw(1);

        supervisor.spawn(job, move |_| async move { report(job, Ok(LoopOutcome::Done)) });
        supervisor.spawn(job, move |_| async move { report(job, Ok(LoopOutcome::Done)) });

        let reports = supervisor.join_all().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(LoopReport::is_done));
        assert_eq!(supervisor.running(), 0);
    }

    #[tokio::test]
    async fn interrupt_reaches_existing_loops_only() {
        let supervisor = LoopSupervisor::new();
        let job = JobId::from_raw(1);
        wait_for_cancel(&supervisor, job);

        supervisor.interrupt_local();

        let reports = supervisor.join_all().await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_interrupted());

        // A loop spawned after the interrupt gets a live token.
        supervisor.spawn(job, move |token| async move {
            let result = if token.is_cancelled() {
                Ok(LoopOutcome::Interrupted)
            } else {
                Ok(LoopOutcome::Done)
            };
            report(job, result)
        });
        let reports = supervisor.join_all().await;
        assert!(reports[0].is_done());
    }

    #[tokio::test]
    async fn shutdown_cancels_everything_and_refuses_new_loops() {
        let supervisor = LoopSupervisor::new();
        let job = JobId::from_raw(7);
        wait_for_cancel(&supervisor, job);
        wait_for_cancel(&supervisor, job);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(supervisor.running(), 2);

        let reports = supervisor.shutdown().await;
        assert_eq!(reports.len(), 2);

        supervisor.spawn(job, move |_| async move { report(job, Ok(LoopOutcome::Done)) });
        assert_eq!(supervisor.running(), 0);
        assert!(supervisor.join_all().await.is_empty());
    }

    #[tokio::test]
    async fn failed_loops_are_reported() {
        let supervisor = LoopSupervisor::new();
        let job = JobId::from_raw(3);

        supervisor.spawn(job, move |_| async move {
            report(job, Err(CoordinatorError::UndefinedState))
        });

        let reports = supervisor.join_all().await;
        assert!(matches!(
            reports[0].result,
            Err(CoordinatorError::UndefinedState)
        ));
    }
}
