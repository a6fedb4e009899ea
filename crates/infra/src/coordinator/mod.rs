//! Job coordination engine.
//!
//! ## Components
//!
//! - [`JobStateEvaluator`]: derives the job state from a lock-free ledger read
//! - [`Coordinator`]: guarded start/pause/resume transitions, launches loops
//! - [`BatchClaimer`]: claims, processes and commits one batch per iteration
//! - [`LoopSupervisor`]: owns the processing loops spawned by this instance
//! - [`NotificationListener`]: joins the active job when the bus says so
//!
//! ## Concurrency
//!
//! Any number of instances may run a coordinator against the same store, and
//! any number of loops may run per instance. At most one *job* is active at a
//! time (the store enforces it); several *loops* working the same job is
//! correct because claims are skip-locked, it only costs resources.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use batchline_core::{DomainError, JobId, JobState};

use crate::bus::BusError;
use crate::store::{ClaimError, CoordinationStore, StartOutcome, StoreError};
use crate::workload::{ItemWorkload, SumWorkload};

pub mod claimer;
pub mod evaluator;
pub mod listener;
pub mod supervisor;


pub use claimer::{BatchClaimer, LoopOutcome, LoopProgress};
pub use evaluator::JobStateEvaluator;
pub use listener::{ListenerHandle, NotificationListener};
pub use supervisor::{LoopReport, LoopSupervisor};

/// Items claimed per transaction.
///
/// Smaller batches mean more store round-trips but a shorter window in which
/// a crashed instance holds claimed, uncommitted rows.
pub const DEFAULT_BATCH_SIZE: usize = 2;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Items claimed per transaction (at least 1)
    pub batch_size: usize,
    /// Upper bound on a single claim transaction
    pub transaction_timeout: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            transaction_timeout: Duration::from_secs(30),
            name: "coordinator".to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }
}

/// Coordinator error.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("workload failed: {0}")]
    Workload(#[from] DomainError),
    #[error("{operation} exceeded {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("job state could not be determined")]
    UndefinedState,
}

impl From<ClaimError> for CoordinatorError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::Store(e) => Self::Store(e),
            ClaimError::Workload(e) => Self::Workload(e),
        }
    }
}

struct Inner<S> {
    store: S,
    workload: Arc<dyn ItemWorkload>,
    config: CoordinatorConfig,
    supervisor: LoopSupervisor,
}

/// Orchestrates job transitions and the processing loops of one instance.
///
/// Cheap to clone; clones share the store handle and the loop supervisor.
pub struct Coordinator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: CoordinationStore> Coordinator<S> {
    /// Create a coordinator running the default [`SumWorkload`].
    pub fn new(store: S, config: CoordinatorConfig) -> Self {
        Self::with_workload(store, Arc::new(SumWorkload), config)
    }

    pub fn with_workload(
        store: S,
        workload: Arc<dyn ItemWorkload>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                workload,
                config,
                supervisor: LoopSupervisor::new(),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn supervisor(&self) -> &LoopSupervisor {
        &self.inner.supervisor
    }

    /// Current job state; `Undefined` if the ledger cannot be read.
    pub async fn evaluate(&self) -> JobState {
        JobStateEvaluator::new(&self.inner.store).evaluate().await
    }

    /// Start the job, or join the one that is already active.
    ///
    /// Only the call that inserts the job publishes the start notification,
    /// but a call that finds the job active and unpaused still launches a
    /// local loop, so a fresh start also picks up a job whose loops halted on
    /// a failure. A paused job is left alone until it is resumed.
    pub async fn start(&self) -> Result<StartOutcome, CoordinatorError> {
        let outcome = self.inner.store.start_job().await?;

        match outcome {
            StartOutcome::Started(job) => {
                info!(coordinator = %self.inner.config.name, job_id = %job, "job started");
                self.launch(job);
            }
            StartOutcome::AlreadyActive(job) => match self.join_active().await? {
                Some(_) => {
                    info!(coordinator = %self.inner.config.name, job_id = %job, "job already active, joining")
                }
                None => {
                    info!(coordinator = %self.inner.config.name, job_id = %job, "job already active but not running, not joining")
                }
            },
        }

        Ok(outcome)
    }

    /// Pause the running job. A no-op (not an error) if nothing is running.
    ///
    /// Loops of this instance are interrupted right away; loops of other
    /// instances notice the flag at their next claim.
    pub async fn pause(&self) -> Result<Option<JobId>, CoordinatorError> {
        let paused = self.inner.store.pause_active().await?;

        match paused {
            Some(job) => {
                info!(coordinator = %self.inner.config.name, job_id = %job, "job paused");
                self.inner.supervisor.interrupt_local();
            }
            None => info!(coordinator = %self.inner.config.name, "no running job found, nothing to pause"),
        }

        Ok(paused)
    }

    /// Resume the paused job. A no-op (not an error) if nothing is paused.
    pub async fn resume(&self) -> Result<Option<JobId>, CoordinatorError> {
        let resumed = self.inner.store.resume_paused().await?;

        match resumed {
            Some(job) => {
                info!(coordinator = %self.inner.config.name, job_id = %job, "job resumed");
                self.launch(job);
            }
            None => info!(coordinator = %self.inner.config.name, "no paused job found, nothing to resume"),
        }

        Ok(resumed)
    }

    /// Launch a loop for the active, unpaused job if there is one.
    ///
    /// Never creates a job: a stale notification must not restart
    /// processing that already finished.
    pub async fn join_active(&self) -> Result<Option<JobId>, CoordinatorError> {
        let view = self.inner.store.ledger_view().await?;

        match view.active {
            Some(job) if !job.is_paused() => {
                self.launch(job.id);
                Ok(Some(job.id))
            }
            _ => Ok(None),
        }
    }

    /// Join processing at instance boot if a job is running.
    pub async fn rejoin_on_boot(&self) -> Result<JobState, CoordinatorError> {
        let state = self.evaluate().await;

        match state {
            JobState::Undefined => Err(CoordinatorError::UndefinedState),
            JobState::Running => {
                self.join_active().await?;
                Ok(state)
            }
            _ => Ok(state),
        }
    }

    /// Number of processed items.
    pub async fn processed_count(&self) -> Result<u64, CoordinatorError> {
        Ok(self.inner.store.processed_count().await?)
    }

    /// Interrupt every local loop and wait for them.
    pub async fn shutdown(&self) -> Vec<LoopReport> {
        self.inner.supervisor.shutdown().await
    }

    fn launch(&self, job: JobId) {
        let this = self.clone();
        self.inner
            .supervisor
            .spawn(job, move |pause| async move { this.drive(job, pause).await });
    }

    async fn drive(&self, job: JobId, pause: CancellationToken) -> LoopReport {
        let name = &self.inner.config.name;
        let claimer = BatchClaimer::new(
            &self.inner.store,
            self.inner.workload.as_ref(),
            &self.inner.config,
        );
        let mut progress = LoopProgress::default();

        info!(coordinator = %name, job_id = %job, "starting batch processing");
        let result = match claimer.run(job, &pause, &mut progress).await {
            Ok(LoopOutcome::Done) => match self.inner.store.complete_job(job).await {
                Ok(stamped) => {
                    info!(
                        coordinator = %name,
                        job_id = %job,
                        processed = progress.items,
                        stamped,
                        "batch processing is done"
                    );
                    Ok(LoopOutcome::Done)
                }
                Err(e) => {
                    error!(coordinator = %name, job_id = %job, error = %e, "failed to close the job");
                    Err(e.into())
                }
            },
            Ok(LoopOutcome::Interrupted) => {
                info!(
                    coordinator = %name,
                    job_id = %job,
                    processed = progress.items,
                    "batch processing has been interrupted"
                );
                Ok(LoopOutcome::Interrupted)
            }
            Err(e) => {
                // No retry: the job stays active until a later start rejoins it.
                warn!(
                    coordinator = %name,
                    job_id = %job,
                    processed = progress.items,
                    "batch processing halted, job remains active"
                );
                error!(coordinator = %name, job_id = %job, error = %e, "batch failed");
                Err(e)
            }
        };

        LoopReport {
            job_id: job,
            batches: progress.batches,
            processed: progress.items,
            result,
        }
    }
}
