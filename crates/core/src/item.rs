//! Units of work.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::ItemId;

/// One row of the item table.
///
/// `result` is the only progress marker: `None` means unprocessed. There is no
/// persisted "claimed" state; claims live only inside a store transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessableItem {
    pub id: ItemId,
    pub first: i64,
    pub second: i64,
    pub result: Option<i64>,
}

impl ProcessableItem {
    pub fn pending(id: ItemId, first: i64, second: i64) -> Self {
        Self {
            id,
            first,
            second,
            result: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.result.is_some()
    }

    /// Sum of the two inputs.
    pub fn sum(&self) -> DomainResult<i64> {
        self.first
            .checked_add(self.second)
            .ok_or(DomainError::Overflow {
                item: self.id.as_raw(),
            })
    }
}
