use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Closed,
    Analyzing,
    Done,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Closed => "closed",
            BatchStatus::Analyzing => "analyzing",
            BatchStatus::Done => "done",
            BatchStatus::Failed => "failed",
        }
    }
}

/// A closed, time-aligned window of contiguous segments queued for analysis.
///
/// Status moves `closed -> analyzing -> done` on success, or to `failed` on
/// an unrecoverable stage error. The `closed -> analyzing` transition is a
/// compare-and-swap on the row so only one worker ever claims a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    /// Calendar day of the window start, `YYYY-MM-DD` (UTC).
    pub day: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
}
