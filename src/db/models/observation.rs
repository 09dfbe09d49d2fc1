use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Stage-1 output: a short timestamped note anchored inside a batch window.
/// Immutable once written; replaced wholesale only when the batch is
/// reprocessed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: String,
    pub batch_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }
}
