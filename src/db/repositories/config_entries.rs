use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_sql_error},
    models::ConfigEntry,
};

fn row_to_config_entry(row: &Row) -> Result<ConfigEntry, rusqlite::Error> {
    let updated_at_str: String = row.get("updated_at")?;

    Ok(ConfigEntry {
        key: row.get("key")?,
        value: row.get("value")?,
        value_type: row.get("value_type")?,
        category: row.get("category")?,
        description: row.get("description")?,
        sensitive: row.get::<_, i64>("sensitive")? != 0,
        updated_at: parse_datetime(&updated_at_str, "updated_at").map_err(to_sql_error)?,
    })
}

impl Database {
    pub async fn load_config_entries(&self) -> Result<Vec<ConfigEntry>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, value_type, category, description, sensitive, updated_at
                 FROM config
                 ORDER BY key ASC",
            )?;
            let entries = stmt
                .query_map([], row_to_config_entry)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }

    /// Upsert a set of config entries in one transaction, so a multi-key
    /// commit becomes visible to readers as a single version step.
    pub async fn upsert_config_entries(&self, entries: &[ConfigEntry]) -> Result<()> {
        let entries = entries.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            for entry in &entries {
                tx.execute(
                    "INSERT INTO config
                        (key, value, value_type, category, description, sensitive, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(key) DO UPDATE SET
                         value = excluded.value,
                         value_type = excluded.value_type,
                         category = excluded.category,
                         description = excluded.description,
                         sensitive = excluded.sensitive,
                         updated_at = excluded.updated_at",
                    params![
                        entry.key,
                        entry.value,
                        entry.value_type,
                        entry.category,
                        entry.description,
                        entry.sensitive as i64,
                        entry.updated_at.to_rfc3339(),
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn config_table_is_empty(&self) -> Result<bool> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM config", [], |row| row.get(0))?;
            Ok(count == 0)
        })
        .await
    }
}
