use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw persisted form of one configuration key. Typed interpretation of
/// `value` happens in the config store against the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub value_type: String,
    pub category: String,
    pub description: Option<String>,
    pub sensitive: bool,
    pub updated_at: DateTime<Utc>,
}
