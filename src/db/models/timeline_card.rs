use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of activity categories the card generator may emit. Labels
/// match the prompt contract, so `as_str` returns the wire form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CardCategory {
    Work,
    Learning,
    Entertainment,
    Other,
}

impl CardCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardCategory::Work => "工作",
            CardCategory::Learning => "学习",
            CardCategory::Entertainment => "娱乐",
            CardCategory::Other => "其他",
        }
    }

    /// Unknown labels fold into `Other` rather than failing the batch; the
    /// model occasionally invents categories outside the prompt contract.
    pub fn from_label(label: &str) -> CardCategory {
        match label.trim() {
            "工作" => CardCategory::Work,
            "学习" => CardCategory::Learning,
            "娱乐" => CardCategory::Entertainment,
            _ => CardCategory::Other,
        }
    }

    /// Two categories may share a merged card when equal, or when either is
    /// `Other`.
    pub fn compatible_with(&self, other: CardCategory) -> bool {
        *self == other || *self == CardCategory::Other || other == CardCategory::Other
    }
}

/// Stage-2 output: a human-facing activity entry on the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineCard {
    pub id: String,
    pub batch_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub category: CardCategory,
    pub title: String,
    pub description: String,
    pub video_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TimelineCard {
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }
}
