use serde::Serialize;

use batchline_core::JobState;

/// Body of `GET /stat`.
#[derive(Debug, Serialize)]
pub struct StatResponse {
    /// Items with a result.
    pub count: u64,
    pub state: JobState,
}
