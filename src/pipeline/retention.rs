//! Retention sweeper: drops raw segments, their media files and expired
//! batches past the configured horizon. Derived timeline cards are kept
//! only as long as their batch; the timeline a user sees is bounded by the
//! same horizon as the media backing it.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::ConfigStore;
use crate::db::Database;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub batches_deleted: usize,
    pub segments_deleted: usize,
    pub files_deleted: usize,
    pub failed_files: Vec<String>,
}

/// Remove everything that ended before `now - retention.days`. Rows go
/// first, then files; a file that fails to delete is reported and retried
/// implicitly on the next sweep only if its row still exists, so failures
/// are surfaced rather than silently retried forever.
pub async fn sweep(
    db: &Database,
    config: &Arc<ConfigStore>,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let horizon_days = config.int("retention.days").max(1);
    let cutoff = now - Duration::days(horizon_days);

    let batches_deleted = db.delete_batches_before(cutoff).await?;
    let file_paths = db.delete_segments_before(cutoff).await?;
    let segments_deleted = file_paths.len();

    let mut files_deleted = 0;
    let mut failed_files = Vec::new();
    for path in file_paths {
        match std::fs::remove_file(Path::new(&path)) {
            Ok(()) => files_deleted += 1,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                log_warn!("Retention sweep could not delete {path}: {err}");
                failed_files.push(path);
            }
        }
    }

    if batches_deleted > 0 || segments_deleted > 0 {
        log_info!(
            "Retention sweep removed {batches_deleted} batches, {segments_deleted} segments, {files_deleted} files"
        );
    }

    Ok(SweepReport {
        batches_deleted,
        segments_deleted,
        files_deleted,
        failed_files,
    })
}
