//! Window batcher: groups unconsumed segments into time-aligned analysis
//! windows and closes every window that has fully elapsed.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::config::ConfigStore;
use crate::db::{models::Batch, Database};

const ENABLE_LOGS: bool = true;
use crate::log_info;

/// Floor a timestamp onto the window grid. Windows are aligned to the Unix
/// epoch, which puts a 15-minute window on :00/:15/:30/:45 marks.
pub fn floor_to_window(ts: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window_secs = window.num_seconds().max(1);
    let floored = ts.timestamp() - ts.timestamp().rem_euclid(window_secs);
    match Utc.timestamp_opt(floored, 0) {
        chrono::LocalResult::Single(aligned) => aligned,
        _ => ts,
    }
}

/// Close every aligned window that has fully elapsed as of `now` and holds
/// at least one unconsumed segment. Windows close oldest first, so batches
/// are created in chronological order.
pub async fn close_due_windows(
    db: &Database,
    config: &Arc<ConfigStore>,
    now: DateTime<Utc>,
) -> Result<Vec<Batch>> {
    let window = Duration::minutes(config.int("analysis.batch_duration").max(1));

    let segments = db.unconsumed_segments_before(now).await?;
    if segments.is_empty() {
        return Ok(Vec::new());
    }

    // Segments arrive sorted by start, so the derived window starts are
    // sorted too; dedup keeps one entry per window.
    let mut window_starts: Vec<DateTime<Utc>> = segments
        .iter()
        .map(|segment| floor_to_window(segment.start_time, window))
        .collect();
    window_starts.dedup();

    let mut closed = Vec::new();
    for window_start in window_starts {
        let window_end = window_start + window;
        if window_end > now {
            break;
        }
        if let Some(batch) = db.close_window(window_start, window_end).await? {
            log_info!(
                "Closed batch {} for window {} - {}",
                batch.id,
                batch.window_start.to_rfc3339(),
                batch.window_end.to_rfc3339()
            );
            closed.push(batch);
        }
    }
    Ok(closed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_align_to_quarter_hours() {
        let window = Duration::minutes(15);
        let ts = Utc.with_ymd_and_hms(2025, 3, 9, 13, 7, 42).unwrap();
        assert_eq!(
            floor_to_window(ts, window),
            Utc.with_ymd_and_hms(2025, 3, 9, 13, 0, 0).unwrap()
        );

        let boundary = Utc.with_ymd_and_hms(2025, 3, 9, 13, 15, 0).unwrap();
        assert_eq!(floor_to_window(boundary, window), boundary);
    }

    #[test]
    fn window_alignment_handles_other_sizes() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 9, 13, 59, 59).unwrap();
        assert_eq!(
            floor_to_window(ts, Duration::minutes(30)),
            Utc.with_ymd_and_hms(2025, 3, 9, 13, 30, 0).unwrap()
        );
    }
}
