//! Per-item workload run inside a claim transaction.

use async_trait::async_trait;

use batchline_core::{DomainResult, ProcessableItem};

/// Computes an item's result.
///
/// Runs while the item's row is locked by the claim transaction; an error
/// rolls back the whole batch.
#[async_trait]
pub trait ItemWorkload: Send + Sync + 'static {
    async fn process(&self, item: &ProcessableItem) -> DomainResult<i64>;
}

/// Adds the item's two inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumWorkload;

#[async_trait]
impl ItemWorkload for SumWorkload {
    async fn process(&self, item: &ProcessableItem) -> DomainResult<i64> {
        item.sum()
    }
}
