use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which of the two external calls produced a usage row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Transcribe,
    GenerateCards,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Transcribe => "transcribe",
            RequestKind::GenerateCards => "generate_cards",
        }
    }
}

/// Append-only audit row written for every call that reached the external
/// service. Never mutated; deleted only by the administrative clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageRecord {
    pub id: String,
    pub request_kind: RequestKind,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-day rollup of token usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageSummary {
    pub day: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub request_count: i64,
}
