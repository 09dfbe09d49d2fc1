use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{day_of, parse_batch_status, parse_datetime, to_sql_error},
    models::{Batch, BatchStatus},
};

fn row_to_batch(row: &Row) -> Result<Batch, rusqlite::Error> {
    let window_start_str: String = row.get("window_start")?;
    let window_end_str: String = row.get("window_end")?;
    let status_str: String = row.get("status")?;
    let created_at_str: String = row.get("created_at")?;

    Ok(Batch {
        id: row.get("id")?,
        day: row.get("day")?,
        window_start: parse_datetime(&window_start_str, "window_start").map_err(to_sql_error)?,
        window_end: parse_datetime(&window_end_str, "window_end").map_err(to_sql_error)?,
        status: parse_batch_status(&status_str).map_err(to_sql_error)?,
        created_at: parse_datetime(&created_at_str, "created_at").map_err(to_sql_error)?,
    })
}

const BATCH_COLUMNS: &str = "id, day, window_start, window_end, status, created_at";

impl Database {
    /// Close one analysis window atomically: select the unconsumed segments
    /// fully inside `[window_start, window_end]`, and if any exist, create a
    /// `closed` batch and mark those segments consumed in the same
    /// transaction. A window with zero eligible segments is a no-op, which
    /// also makes a duplicate invocation for the same window idempotent.
    pub async fn close_window(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Option<Batch>> {
        let batch = Batch {
            id: format!("bat_{}", Uuid::new_v4()),
            day: day_of(window_start),
            window_start,
            window_end,
            status: BatchStatus::Closed,
            created_at: Utc::now(),
        };

        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let segment_ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM segments
                     WHERE consumed = 0 AND start_time >= ?1 AND end_time <= ?2
                     ORDER BY start_time ASC",
                )?;
                let ids = stmt
                    .query_map(
                        params![
                            batch.window_start.to_rfc3339(),
                            batch.window_end.to_rfc3339()
                        ],
                        |row| row.get::<_, String>(0),
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            };

            if segment_ids.is_empty() {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO batches (id, day, window_start, window_end, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    batch.id,
                    batch.day,
                    batch.window_start.to_rfc3339(),
                    batch.window_end.to_rfc3339(),
                    batch.status.as_str(),
                    batch.created_at.to_rfc3339(),
                ],
            )?;

            for segment_id in &segment_ids {
                tx.execute(
                    "UPDATE segments SET consumed = 1, batch_id = ?1
                     WHERE id = ?2 AND consumed = 0",
                    params![batch.id, segment_id],
                )?;
            }

            tx.commit()?;
            Ok(Some(batch))
        })
        .await
    }

    /// Compare-and-swap claim of a batch for analysis. Returns false when
    /// another worker already moved the batch out of `closed`.
    pub async fn try_claim_batch(&self, batch_id: &str) -> Result<bool> {
        let batch_id = batch_id.to_string();
        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE batches SET status = 'analyzing'
                 WHERE id = ?1 AND status = 'closed'",
                params![batch_id],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    /// Conditional reset back to `closed` for reprocess. Refuses to touch a
    /// batch that is currently `analyzing`: the worker that claimed it still
    /// owns it, and reprocess must not destroy that claim. Returns false
    /// when the batch was skipped for that reason (or does not exist).
    pub async fn reset_batch_for_reprocess(&self, batch_id: &str) -> Result<bool> {
        let batch_id = batch_id.to_string();
        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE batches SET status = 'closed'
                 WHERE id = ?1 AND status != 'analyzing'",
                params![batch_id],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    pub async fn set_batch_status(&self, batch_id: &str, status: BatchStatus) -> Result<()> {
        let batch_id = batch_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE batches SET status = ?1 WHERE id = ?2",
                params![status.as_str(), batch_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Batches awaiting analysis, oldest window first.
    pub async fn closed_batches(&self) -> Result<Vec<Batch>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BATCH_COLUMNS} FROM batches
                 WHERE status = 'closed'
                 ORDER BY window_start ASC"
            ))?;
            let batches = stmt
                .query_map([], row_to_batch)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(batches)
        })
        .await
    }

    pub async fn batches_by_day(&self, day: &str) -> Result<Vec<Batch>> {
        let day = day.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BATCH_COLUMNS} FROM batches
                 WHERE day = ?1
                 ORDER BY window_start ASC"
            ))?;
            let batches = stmt
                .query_map(params![day], row_to_batch)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(batches)
        })
        .await
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        let batch_id = batch_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"
            ))?;
            let batch = stmt
                .query_row(params![batch_id], row_to_batch)
                .optional()?;
            Ok(batch)
        })
        .await
    }

    /// Delete batches whose window ended before `cutoff`. Observations and
    /// timeline cards go with them via cascade. Returns the number of
    /// batches removed.
    pub async fn delete_batches_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM batches WHERE window_end < ?1",
                params![cutoff.to_rfc3339()],
            )?;
            Ok(deleted)
        })
        .await
    }
}
