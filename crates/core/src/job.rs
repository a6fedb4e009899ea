//! Job ledger model and state derivation.
//!
//! The ledger holds one row per processing run. The row with `started` set and
//! `ended` unset is the *active job*; at most one such row exists at a time and
//! every state decision in the system is derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::JobId;

/// One row of the job ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Set exactly once, when the job goes from never-started to running.
    pub started_at: Option<DateTime<Utc>>,
    /// Non-null while paused, cleared on resume.
    pub paused_at: Option<DateTime<Utc>>,
    /// Set exactly once, when no unprocessed items remain.
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A freshly started job.
    pub fn started(id: JobId, at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at: Some(at),
            paused_at: None,
            ended_at: None,
        }
    }

    /// Started and not yet ended.
    pub fn is_active(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }
}

/// A consistent read of the ledger, enough to derive a [`JobState`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerView {
    /// Number of job rows ever written.
    pub total_jobs: u64,
    /// The active job, if any.
    pub active: Option<JobRecord>,
}

/// Derived state of the (single, logical) processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Pristine ledger: no job was ever started.
    NeverStarted,
    /// An active job exists and is not paused.
    Running,
    /// An active job exists and is paused.
    Paused,
    /// Jobs exist, but none is active (the last one finished).
    NotRunning,
    /// The ledger could not be read.
    Undefined,
}

impl JobState {
    /// Derive the state from a successful ledger read.
    ///
    /// `Undefined` is never produced here; it is reserved for failed reads.
    pub fn derive(view: &LedgerView) -> Self {
        if view.total_jobs == 0 {
            return JobState::NeverStarted;
        }

        match &view.active {
            None => JobState::NotRunning,
            Some(job) if job.is_paused() => JobState::Paused,
            Some(_) => JobState::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::NeverStarted => "never_started",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::NotRunning => "not_running",
            JobState::Undefined => "undefined",
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
