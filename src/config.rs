//! Runtime configuration store.
//!
//! Schema-driven: every key is declared up front with a type, category and
//! default. Values live in the `config` table and in an in-memory map; every
//! committed write bumps a monotonic version counter, and components re-read
//! on every tick instead of caching, so changes (cadences, model, API key)
//! take effect without a restart.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use log::info;

use crate::db::{models::ConfigEntry, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    String,
    Int,
    Float,
    Bool,
}

impl ConfigKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::String => "string",
            ConfigKind::Int => "int",
            ConfigKind::Float => "float",
            ConfigKind::Bool => "bool",
        }
    }
}

struct SchemaEntry {
    key: &'static str,
    kind: ConfigKind,
    category: &'static str,
    description: &'static str,
    default: &'static str,
    sensitive: bool,
    /// Environment variable consulted when seeding a fresh database.
    env: Option<&'static str>,
}

const CONFIG_SCHEMA: &[SchemaEntry] = &[
    SchemaEntry {
        key: "recording.chunk_duration",
        kind: ConfigKind::Int,
        category: "recording",
        description: "Capture segment duration (seconds)",
        default: "15",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "recording.output_dir",
        kind: ConfigKind::String,
        category: "recording",
        description: "Directory where segment files are deposited",
        default: "./recordings",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "batcher.interval",
        kind: ConfigKind::Int,
        category: "batcher",
        description: "Window close check cadence (seconds)",
        default: "60",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "analysis.interval",
        kind: ConfigKind::Int,
        category: "analysis",
        description: "Analysis pass cadence (minutes)",
        default: "15",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "analysis.batch_duration",
        kind: ConfigKind::Int,
        category: "analysis",
        description: "Batch window size (minutes)",
        default: "15",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "analysis.model",
        kind: ConfigKind::String,
        category: "analysis",
        description: "Inference model identifier",
        default: "doubao-1.5-vision-pro",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "analysis.debug_mode",
        kind: ConfigKind::Bool,
        category: "analysis",
        description: "Bypass the inference service with deterministic placeholders",
        default: "false",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "analysis.min_card_minutes",
        kind: ConfigKind::Int,
        category: "analysis",
        description: "Cards shorter than this merge into a compatible neighbor (minutes)",
        default: "10",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "retention.days",
        kind: ConfigKind::Int,
        category: "retention",
        description: "Days of segments/batches to keep",
        default: "3",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "retention.sweep_interval",
        kind: ConfigKind::Int,
        category: "retention",
        description: "Retention sweep cadence (minutes)",
        default: "60",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "inference.base_url",
        kind: ConfigKind::String,
        category: "inference",
        description: "Chat-completions endpoint base URL",
        default: "https://ark.cn-beijing.volces.com/api/v3",
        sensitive: false,
        env: None,
    },
    SchemaEntry {
        key: "secrets.api_key",
        kind: ConfigKind::String,
        category: "secrets",
        description: "Inference service API key",
        default: "",
        sensitive: true,
        env: Some("DAYLINE_API_KEY"),
    },
];

fn schema_entry(key: &str) -> Option<&'static SchemaEntry> {
    CONFIG_SCHEMA.iter().find(|entry| entry.key == key)
}

fn validate_value(kind: ConfigKind, value: &str) -> Result<()> {
    match kind {
        ConfigKind::String => Ok(()),
        ConfigKind::Int => value
            .parse::<i64>()
            .map(|_| ())
            .with_context(|| format!("'{value}' is not an integer")),
        ConfigKind::Float => value
            .parse::<f64>()
            .map(|_| ())
            .with_context(|| format!("'{value}' is not a number")),
        ConfigKind::Bool => parse_bool(value).map(|_| ()),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(anyhow!("'{other}' is not a boolean")),
    }
}

/// Mask a sensitive value for display: keep four characters at each end.
pub fn mask_value(value: &str) -> String {
    const SHOW: usize = 4;
    if value.len() <= SHOW * 2 {
        return "*".repeat(8);
    }
    let masked = (value.len() - SHOW * 2).min(8);
    format!(
        "{}{}{}",
        &value[..SHOW],
        "*".repeat(masked),
        &value[value.len() - SHOW..]
    )
}

#[derive(Clone)]
struct StoredValue {
    value: String,
    updated_at: DateTime<Utc>,
}

pub struct ConfigStore {
    db: Database,
    values: RwLock<HashMap<String, StoredValue>>,
    version: AtomicU64,
}

impl ConfigStore {
    /// Load configuration from the database, seeding schema defaults (and
    /// environment-provided secrets) on first run.
    pub async fn load(db: Database) -> Result<Self> {
        if db.config_table_is_empty().await? {
            info!("Config table empty, seeding schema defaults");
            let now = Utc::now();
            let entries: Vec<ConfigEntry> = CONFIG_SCHEMA
                .iter()
                .map(|entry| {
                    let value = entry
                        .env
                        .and_then(|var| std::env::var(var).ok())
                        .unwrap_or_else(|| entry.default.to_string());
                    ConfigEntry {
                        key: entry.key.to_string(),
                        value,
                        value_type: entry.kind.as_str().to_string(),
                        category: entry.category.to_string(),
                        description: Some(entry.description.to_string()),
                        sensitive: entry.sensitive,
                        updated_at: now,
                    }
                })
                .collect();
            db.upsert_config_entries(&entries).await?;
        }

        let store = Self {
            db,
            values: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
        };
        store.reload().await?;
        Ok(store)
    }

    /// Re-read the full table into the in-memory map.
    pub async fn reload(&self) -> Result<()> {
        let entries = self.db.load_config_entries().await?;
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            map.insert(
                entry.key,
                StoredValue {
                    value: entry.value,
                    updated_at: entry.updated_at,
                },
            );
        }
        *self.values.write().unwrap_or_else(|p| p.into_inner()) = map;
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Monotonic counter bumped on every committed write.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .map(|stored| stored.value.clone())
    }

    fn get_or_default(&self, key: &str) -> String {
        self.get(key)
            .or_else(|| schema_entry(key).map(|entry| entry.default.to_string()))
            .unwrap_or_default()
    }

    pub fn string(&self, key: &str) -> String {
        self.get_or_default(key)
    }

    pub fn int(&self, key: &str) -> i64 {
        let raw = self.get_or_default(key);
        raw.parse().unwrap_or_else(|_| {
            schema_entry(key)
                .and_then(|entry| entry.default.parse().ok())
                .unwrap_or(0)
        })
    }

    pub fn bool(&self, key: &str) -> bool {
        let raw = self.get_or_default(key);
        parse_bool(&raw).unwrap_or(false)
    }

    /// Validate and commit one value. The in-memory map is updated only
    /// after the row is durably written, and the version bump happens last,
    /// so a reader that observes the new version also observes the value.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let entry = schema_entry(key)
            .ok_or_else(|| anyhow!("unknown config key '{key}'"))?;
        validate_value(entry.kind, value)
            .with_context(|| format!("invalid value for '{key}'"))?;

        // A masked snapshot round-tripped back through set() must not
        // clobber the real secret.
        if entry.sensitive && value.contains('*') {
            bail!("refusing to store masked value for sensitive key '{key}'");
        }

        let now = Utc::now();
        let row = ConfigEntry {
            key: entry.key.to_string(),
            value: value.to_string(),
            value_type: entry.kind.as_str().to_string(),
            category: entry.category.to_string(),
            description: Some(entry.description.to_string()),
            sensitive: entry.sensitive,
            updated_at: now,
        };
        self.db.upsert_config_entries(std::slice::from_ref(&row)).await?;

        {
            let mut map = self.values.write().unwrap_or_else(|p| p.into_inner());
            map.insert(
                row.key.clone(),
                StoredValue {
                    value: row.value.clone(),
                    updated_at: now,
                },
            );
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Commit several keys; failures are collected per key instead of
    /// aborting the whole batch.
    pub async fn set_many(
        &self,
        pairs: &[(String, String)],
    ) -> (Vec<String>, Vec<(String, String)>) {
        let mut updated = Vec::new();
        let mut errors = Vec::new();
        for (key, value) in pairs {
            match self.set(key, value).await {
                Ok(()) => updated.push(key.clone()),
                Err(err) => errors.push((key.clone(), err.to_string())),
            }
        }
        (updated, errors)
    }

    /// Full view of all keys with metadata, sensitive values masked unless
    /// asked otherwise.
    pub fn snapshot(&self, mask_sensitive: bool) -> Vec<ConfigEntry> {
        let map = self.values.read().unwrap_or_else(|p| p.into_inner());
        CONFIG_SCHEMA
            .iter()
            .map(|entry| {
                let stored = map.get(entry.key);
                let raw = stored
                    .map(|s| s.value.clone())
                    .unwrap_or_else(|| entry.default.to_string());
                let value = if entry.sensitive && mask_sensitive && !raw.is_empty() {
                    mask_value(&raw)
                } else {
                    raw
                };
                ConfigEntry {
                    key: entry.key.to_string(),
                    value,
                    value_type: entry.kind.as_str().to_string(),
                    category: entry.category.to_string(),
                    description: Some(entry.description.to_string()),
                    sensitive: entry.sensitive,
                    updated_at: stored.map(|s| s.updated_at).unwrap_or_else(Utc::now),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_keeps_short_values_fully_hidden() {
        assert_eq!(mask_value("secret"), "********");
        assert_eq!(mask_value(""), "********");
    }

    #[test]
    fn mask_shows_ends_of_long_values() {
        let masked = mask_value("sk-abcdefghijklmnop");
        assert!(masked.starts_with("sk-a"));
        assert!(masked.ends_with("mnop"));
        assert!(masked.contains('*'));
    }

    #[test]
    fn bool_parsing_accepts_common_forms() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("FALSE").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn int_values_are_validated() {
        assert!(validate_value(ConfigKind::Int, "42").is_ok());
        assert!(validate_value(ConfigKind::Int, "forty-two").is_err());
    }
}
