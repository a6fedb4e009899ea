//! `batchline-core`: domain building blocks for the batch coordinator.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the job ledger model, state derivation and work items.

pub mod error;
pub mod id;
pub mod item;
pub mod job;

pub use error::{DomainError, DomainResult};
pub use id::{ItemId, JobId};
pub use item::ProcessableItem;
pub use job::{JobRecord, JobState, LedgerView};
