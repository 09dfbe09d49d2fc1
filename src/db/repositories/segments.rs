use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_sql_error},
    models::Segment,
};
use crate::error::PipelineError;

/// Fields reported by the capture collaborator for a finished segment file.
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub file_path: String,
}

fn row_to_segment(row: &Row) -> Result<Segment, rusqlite::Error> {
    let start_time_str: String = row.get("start_time")?;
    let end_time_str: String = row.get("end_time")?;
    let created_at_str: String = row.get("created_at")?;

    Ok(Segment {
        id: row.get("id")?,
        start_time: parse_datetime(&start_time_str, "start_time").map_err(to_sql_error)?,
        end_time: parse_datetime(&end_time_str, "end_time").map_err(to_sql_error)?,
        file_path: row.get("file_path")?,
        consumed: row.get::<_, i64>("consumed")? != 0,
        batch_id: row.get("batch_id")?,
        created_at: parse_datetime(&created_at_str, "created_at").map_err(to_sql_error)?,
    })
}

const SEGMENT_COLUMNS: &str =
    "id, start_time, end_time, file_path, consumed, batch_id, created_at";

impl Database {
    /// Append a new unconsumed segment to the ledger. A segment whose exact
    /// time range is already recorded is rejected with `DuplicateSegment`.
    pub async fn record_segment(&self, new: NewSegment) -> Result<Segment, PipelineError> {
        let segment = Segment {
            id: format!("seg_{}", Uuid::new_v4()),
            start_time: new.start_time,
            end_time: new.end_time,
            file_path: new.file_path,
            consumed: false,
            batch_id: None,
            created_at: Utc::now(),
        };
        let start_str = segment.start_time.to_rfc3339();
        let end_str = segment.end_time.to_rfc3339();

        let inserted = self
            .execute({
                let segment = segment.clone();
                move |conn| {
                    let exists: bool = conn.query_row(
                        "SELECT EXISTS(
                            SELECT 1 FROM segments WHERE start_time = ?1 AND end_time = ?2
                         )",
                        params![
                            segment.start_time.to_rfc3339(),
                            segment.end_time.to_rfc3339()
                        ],
                        |row| row.get(0),
                    )?;
                    if exists {
                        return Ok(false);
                    }

                    conn.execute(
                        "INSERT INTO segments
                            (id, start_time, end_time, file_path, consumed, batch_id, created_at)
                         VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5)",
                        params![
                            segment.id,
                            segment.start_time.to_rfc3339(),
                            segment.end_time.to_rfc3339(),
                            segment.file_path,
                            segment.created_at.to_rfc3339(),
                        ],
                    )?;
                    Ok(true)
                }
            })
            .await?;

        if inserted {
            Ok(segment)
        } else {
            Err(PipelineError::DuplicateSegment {
                start: start_str,
                end: end_str,
            })
        }
    }

    /// Unconsumed segments whose end time is at or before `cutoff`, oldest
    /// first. The ordering is load-bearing: windows must close in
    /// chronological order.
    pub async fn unconsumed_segments_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Segment>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEGMENT_COLUMNS} FROM segments
                 WHERE consumed = 0 AND end_time <= ?1
                 ORDER BY start_time ASC"
            ))?;

            let segments = stmt
                .query_map(params![cutoff.to_rfc3339()], row_to_segment)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(segments)
        })
        .await
    }

    /// Segments consumed by a batch, in chronological order.
    pub async fn segments_for_batch(&self, batch_id: &str) -> Result<Vec<Segment>> {
        let batch_id = batch_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEGMENT_COLUMNS} FROM segments
                 WHERE batch_id = ?1
                 ORDER BY start_time ASC"
            ))?;

            let segments = stmt
                .query_map(params![batch_id], row_to_segment)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(segments)
        })
        .await
    }

    /// Delete segment rows older than `cutoff` and return the file paths
    /// that backed them so the caller can remove the files.
    pub async fn delete_segments_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        self.execute(move |conn| {
            let cutoff_str = cutoff.to_rfc3339();
            let mut stmt = conn.prepare(
                "SELECT file_path FROM segments WHERE end_time < ?1",
            )?;
            let paths = stmt
                .query_map(params![cutoff_str], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            conn.execute(
                "DELETE FROM segments WHERE end_time < ?1",
                params![cutoff_str],
            )?;
            Ok(paths)
        })
        .await
    }

    /// Every recorded segment file path. Used by the administrative clear.
    pub async fn all_segment_file_paths(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare("SELECT file_path FROM segments")?;
            let paths = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(paths)
        })
        .await
    }
}
