//! In-memory coordination store for tests/dev.
//!
//! Mirrors the transactional behavior of the Postgres store:
//! - claims are held only for the lifetime of one `claim_batch` call and are
//!   released if the call fails or its future is dropped (rollback)
//! - claimed items are skipped by concurrent claims (skip-locked)
//! - start and resume notifications are delivered only after the change is
//!   visible (commit)

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use batchline_core::{ItemId, JobId, JobRecord, LedgerView, ProcessableItem};

use super::{ClaimError, ClaimOutcome, CoordinationStore, StartOutcome, StoreError};
use crate::bus::InMemoryNotificationBus;
use crate::workload::ItemWorkload;

#[derive(Debug, Default)]
struct MemoryState {
    jobs: Vec<JobRecord>,
    items: BTreeMap<ItemId, ProcessableItem>,
    claimed: HashSet<ItemId>,
    next_item: i64,
}

impl MemoryState {
    fn active_mut(&mut self) -> Option<&mut JobRecord> {
        self.jobs.iter_mut().find(|j| j.is_active())
    }
}

/// In-memory store shared by any number of coordinators.
#[derive(Debug)]
pub struct InMemoryCoordinationStore {
    state: Mutex<MemoryState>,
    bus: InMemoryNotificationBus,
    unavailable: AtomicBool,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            bus: InMemoryNotificationBus::new(),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// The bus this store publishes start/resume notifications on.
    pub fn bus(&self) -> InMemoryNotificationBus {
        self.bus.clone()
    }

    /// Add unprocessed items; returns their ids in insertion order.
    pub fn seed_items(&self, inputs: &[(i64, i64)]) -> Vec<ItemId> {
        let mut state = self.lock();
        inputs
            .iter()
            .map(|&(first, second)| {
                state.next_item += 1;
                let id = ItemId::from_raw(state.next_item);
                state
                    .items
                    .insert(id, ProcessableItem::pending(id, first, second));
                id
            })
            .collect()
    }

    pub fn item(&self, id: ItemId) -> Option<ProcessableItem> {
        self.lock().items.get(&id).cloned()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.lock().jobs.clone()
    }

    /// Number of items currently held by an in-flight claim.
    pub fn claimed_count(&self) -> usize {
        self.lock().claimed.len()
    }

    /// Simulate losing the store: every operation fails until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{operation}: store offline")));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases claimed rows when dropped, like a rolled-back transaction would.
struct ClaimGuard<'a> {
    store: &'a InMemoryCoordinationStore,
    ids: Vec<ItemId>,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.store.lock();
        for id in &self.ids {
            state.claimed.remove(id);
        }
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn ledger_view(&self) -> Result<LedgerView, StoreError> {
        self.check_available("ledger_view")?;
        let state = self.lock();
        Ok(LedgerView {
            total_jobs: state.jobs.len() as u64,
            active: state.jobs.iter().find(|j| j.is_active()).cloned(),
        })
    }

    async fn start_job(&self) -> Result<StartOutcome, StoreError> {
        self.check_available("start_job")?;
        let mut state = self.lock();

        if let Some(active) = state.jobs.iter().find(|j| j.is_active()) {
            return Ok(StartOutcome::AlreadyActive(active.id));
        }

        let id = JobId::from_raw(state.jobs.len() as i64 + 1);
        state.jobs.push(JobRecord::started(id, Utc::now()));
        self.bus.notify();

        Ok(StartOutcome::Started(id))
    }

    async fn pause_active(&self) -> Result<Option<JobId>, StoreError> {
        self.check_available("pause_active")?;
        let mut state = self.lock();

        match state.active_mut() {
            Some(job) if !job.is_paused() => {
                job.paused_at = Some(Utc::now());
                Ok(Some(job.id))
            }
            _ => Ok(None),
        }
    }

    async fn resume_paused(&self) -> Result<Option<JobId>, StoreError> {
        self.check_available("resume_paused")?;
        let mut state = self.lock();

        let resumed = match state.active_mut() {
            Some(job) if job.is_paused() => {
                job.paused_at = None;
                Some(job.id)
            }
            _ => None,
        };

        if resumed.is_some() {
            self.bus.notify();
        }
        Ok(resumed)
    }

    async fn claim_batch(
        &self,
        job: JobId,
        limit: usize,
        workload: &dyn ItemWorkload,
    ) -> Result<ClaimOutcome, ClaimError> {
        self.check_available("claim_batch")?;

        let batch: Vec<ProcessableItem> = {
            let mut guard = self.lock();
            let state = &mut *guard;

            let paused = state
                .jobs
                .iter()
                .find(|j| j.id == job)
                .is_some_and(|j| j.is_paused());
            if paused {
                return Ok(ClaimOutcome::Paused);
            }

            let batch: Vec<ProcessableItem> = state
                .items
                .values()
                .filter(|i| !i.is_processed() && !state.claimed.contains(&i.id))
                .take(limit)
                .cloned()
                .collect();

            for item in &batch {
                state.claimed.insert(item.id);
            }
            batch
        };

        if batch.is_empty() {
            return Ok(ClaimOutcome::Exhausted);
        }

        let claim = ClaimGuard {
            store: self,
            ids: batch.iter().map(|i| i.id).collect(),
        };

        let mut results = Vec::with_capacity(batch.len());
        for item in &batch {
            results.push((item.id, workload.process(item).await?));
        }

        // Commit.
        self.check_available("claim_batch")?;
        {
            let mut state = self.lock();
            for (id, result) in &results {
                if let Some(item) = state.items.get_mut(id) {
                    item.result = Some(*result);
                }
            }
        }

        let ids = claim.ids.clone();
        drop(claim);
        Ok(ClaimOutcome::Claimed(ids))
    }

    async fn complete_job(&self, job: JobId) -> Result<bool, StoreError> {
        self.check_available("complete_job")?;
        let mut state = self.lock();

        match state.jobs.iter_mut().find(|j| j.id == job) {
            Some(record) if record.ended_at.is_none() => {
                record.ended_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn processed_count(&self) -> Result<u64, StoreError> {
        self.check_available("processed_count")?;
        let state = self.lock();
        Ok(state.items.values().filter(|i| i.is_processed()).count() as u64)
    }
}
