use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A fixed-duration slice of captured screen video, deposited by the capture
/// collaborator. Read-only to the pipeline except for the consumed flag,
/// which the batcher sets exactly once when the segment is folded into a
/// batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub file_path: String,
    pub consumed: bool,
    /// Batch that consumed this segment, if any. A segment belongs to at
    /// most one batch.
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Segment {
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }
}
