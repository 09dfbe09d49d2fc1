use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::db::connection::Database;

/// Row counts for the derived-data tables.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCounts {
    pub segments: i64,
    pub batches: i64,
    pub observations: i64,
    pub timeline_cards: i64,
    pub token_usage: i64,
}

/// Outcome of the administrative clear.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    pub deleted: TableCounts,
    pub deleted_files: usize,
    pub failed_files: Vec<String>,
}

fn count_table(conn: &rusqlite::Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

impl Database {
    pub async fn table_counts(&self) -> Result<TableCounts> {
        self.execute(|conn| {
            Ok(TableCounts {
                segments: count_table(conn, "segments")?,
                batches: count_table(conn, "batches")?,
                observations: count_table(conn, "observations")?,
                timeline_cards: count_table(conn, "timeline_cards")?,
                token_usage: count_table(conn, "token_usage")?,
            })
        })
        .await
    }

    /// Administrative wipe of all derived data. Configuration survives;
    /// backing media files are removed unless `keep_files` is set. Bypasses
    /// the retention horizon.
    pub async fn clear_all_data(&self, keep_files: bool) -> Result<ClearReport> {
        let file_paths = if keep_files {
            Vec::new()
        } else {
            self.all_segment_file_paths().await?
        };

        let deleted = self
            .execute(|conn| {
                let counts = TableCounts {
                    segments: count_table(conn, "segments")?,
                    batches: count_table(conn, "batches")?,
                    observations: count_table(conn, "observations")?,
                    timeline_cards: count_table(conn, "timeline_cards")?,
                    token_usage: count_table(conn, "token_usage")?,
                };

                let tx = conn.transaction()?;
                // Child tables first; token_usage references batches too.
                tx.execute("DELETE FROM timeline_cards", [])?;
                tx.execute("DELETE FROM observations", [])?;
                tx.execute("DELETE FROM token_usage", [])?;
                tx.execute("DELETE FROM batches", [])?;
                tx.execute("DELETE FROM segments", [])?;
                tx.commit()?;

                Ok(counts)
            })
            .await?;

        let mut deleted_files = 0;
        let mut failed_files = Vec::new();
        for path in file_paths {
            match std::fs::remove_file(Path::new(&path)) {
                Ok(()) => deleted_files += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    log::warn!("Failed to delete {path}: {err}");
                    failed_files.push(path);
                }
            }
        }

        Ok(ClearReport {
            deleted,
            deleted_files,
            failed_files,
        })
    }
}
