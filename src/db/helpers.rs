use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::db::models::BatchStatus;

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field} from '{value}'"))
}

pub fn parse_batch_status(value: &str) -> Result<BatchStatus> {
    match value {
        "closed" => Ok(BatchStatus::Closed),
        "analyzing" => Ok(BatchStatus::Analyzing),
        "done" => Ok(BatchStatus::Done),
        "failed" => Ok(BatchStatus::Failed),
        other => Err(anyhow!("unknown batch status '{other}'")),
    }
}

/// UTC bounds of a `YYYY-MM-DD` day string: `[00:00:00, next day 00:00:00)`.
pub fn day_bounds(day: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .with_context(|| format!("invalid day '{day}', expected YYYY-MM-DD"))?;
    let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).ok_or_else(|| {
        anyhow!("failed to build midnight for day '{day}'")
    })?);
    let end = start + chrono::Duration::days(1);
    Ok((start, end))
}

/// Calendar day string of a timestamp, UTC.
pub fn day_of(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

/// Wrap an anyhow error so it can cross a `rusqlite` row-mapping boundary.
pub fn to_sql_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_bounds_cover_exactly_one_day() {
        let (start, end) = day_bounds("2025-03-09").unwrap();
        assert_eq!(start.to_rfc3339(), "2025-03-09T00:00:00+00:00");
        assert_eq!((end - start).num_hours(), 24);
    }

    #[test]
    fn day_bounds_reject_garbage() {
        assert!(day_bounds("not-a-day").is_err());
        assert!(day_bounds("2025-13-40").is_err());
    }
}
