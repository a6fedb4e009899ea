//! Coordination store abstraction.
//!
//! A single relational store holds both the job ledger and the item table.
//! Every operation here is one transaction: it either fully commits or fully
//! rolls back, which is what makes crash recovery implicit (claims that were
//! never committed simply disappear).
//!
//! ## Implementations
//!
//! - [`PostgresCoordinationStore`]: the production store. Claims use
//!   `FOR UPDATE SKIP LOCKED`; start/resume notifications are sent with
//!   `pg_notify` inside the same transaction, so they are delivered on commit.
//! - [`InMemoryCoordinationStore`]: for tests/dev. Shared between several
//!   coordinators it behaves like several instances on one database.

use std::sync::Arc;

use async_trait::async_trait;

use batchline_core::{DomainError, ItemId, JobId, LedgerView};

use crate::workload::ItemWorkload;

pub mod in_memory;
pub mod postgres;
pub mod schema;

pub use in_memory::InMemoryCoordinationStore;
pub use postgres::PostgresCoordinationStore;

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed in {operation}: {message}")]
    Query {
        operation: &'static str,
        message: String,
    },
    #[error("conflict in {operation}: {message}")]
    Conflict {
        operation: &'static str,
        message: String,
    },
    #[error("malformed row in {operation}: {message}")]
    Corrupt {
        operation: &'static str,
        message: String,
    },
}

/// Failure of a claim transaction. Either way the batch is rolled back.
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("workload failed: {0}")]
    Workload(#[from] DomainError),
}

/// Result of a guarded start transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// This call inserted the active job and published the start notification.
    Started(JobId),
    /// An active job already existed; nothing was written.
    AlreadyActive(JobId),
}

impl StartOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            StartOutcome::Started(id) | StartOutcome::AlreadyActive(id) => *id,
        }
    }
}

/// Result of one claim transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// These items were claimed, processed and committed together.
    Claimed(Vec<ItemId>),
    /// No unprocessed, unlocked items were left.
    Exhausted,
    /// The owning job was paused; nothing was claimed.
    Paused,
}

/// Transactional operations the coordinator needs from the shared store.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Read the ledger without taking locks.
    async fn ledger_view(&self) -> Result<LedgerView, StoreError>;

    /// Insert the active job unless one exists. On insert, the start
    /// notification is published in the same transaction.
    async fn start_job(&self) -> Result<StartOutcome, StoreError>;

    /// Stamp `paused` on the active, unpaused job. `None` when there is none.
    async fn pause_active(&self) -> Result<Option<JobId>, StoreError>;

    /// Clear `paused` on the active, paused job and publish the resume
    /// notification in the same transaction. `None` when there is none.
    async fn resume_paused(&self) -> Result<Option<JobId>, StoreError>;

    /// Claim up to `limit` unprocessed items that no concurrent transaction
    /// holds, run `workload` on each and write the results back, all in one
    /// transaction. Checks the owning job's pause flag first.
    async fn claim_batch(
        &self,
        job: JobId,
        limit: usize,
        workload: &dyn ItemWorkload,
    ) -> Result<ClaimOutcome, ClaimError>;

    /// Stamp `ended` on the job. Returns `false` if it was already ended.
    async fn complete_job(&self, job: JobId) -> Result<bool, StoreError>;

    /// Number of items with a non-null result.
    async fn processed_count(&self) -> Result<u64, StoreError>;
}

#[async_trait]
impl<S> CoordinationStore for Arc<S>
where
    S: CoordinationStore + ?Sized,
{
    async fn ledger_view(&self) -> Result<LedgerView, StoreError> {
        (**self).ledger_view().await
    }

    async fn start_job(&self) -> Result<StartOutcome, StoreError> {
        (**self).start_job().await
    }

    async fn pause_active(&self) -> Result<Option<JobId>, StoreError> {
        (**self).pause_active().await
    }

    async fn resume_paused(&self) -> Result<Option<JobId>, StoreError> {
        (**self).resume_paused().await
    }

    async fn claim_batch(
        &self,
        job: JobId,
        limit: usize,
        workload: &dyn ItemWorkload,
    ) -> Result<ClaimOutcome, ClaimError> {
        (**self).claim_batch(job, limit, workload).await
    }

    async fn complete_job(&self, job: JobId) -> Result<bool, StoreError> {
        (**self).complete_job(job).await
    }

    async fn processed_count(&self) -> Result<u64, StoreError> {
        (**self).processed_count().await
    }
}
