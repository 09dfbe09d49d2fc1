//! Parsers for the two stages' JSON replies. Model output is hostile input:
//! fenced code blocks, out-of-range timestamps and invented categories all
//! show up in practice, so everything is clamped or folded rather than
//! trusted.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Deserialize;

use crate::db::models::CardCategory;
use crate::error::InferenceError;

/// Parsed stage-1 item: offsets are seconds from the batch window start.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationDraft {
    pub start_offset_secs: i64,
    pub end_offset_secs: i64,
    pub text: String,
}

/// Parsed stage-2 item, anchored to absolute time.
#[derive(Debug, Clone)]
pub struct CardDraft {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub category: CardCategory,
    pub title: String,
    pub description: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObservationWire {
    start_timestamp: String,
    end_timestamp: String,
    description: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardWire {
    start_time: String,
    end_time: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    detailed_summary: String,
}

/// Strip a surrounding markdown code fence (```json ... ``` or ``` ... ```)
/// if present.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let Some(rest) = trimmed.strip_suffix("```") else {
        return trimmed;
    };
    let after_open = &rest[3..];
    match after_open.find('\n') {
        Some(newline) => after_open[newline + 1..].trim(),
        None => after_open.trim(),
    }
}

/// Parse a `MM:SS` offset into seconds. Malformed values become 0 so one
/// bad timestamp does not fail the batch; clamping happens at the caller.
pub fn parse_clock_offset(value: &str) -> i64 {
    let mut parts = value.trim().split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(minutes), Some(seconds), None) => {
            let minutes: i64 = minutes.parse().unwrap_or(0);
            let seconds: i64 = seconds.parse().unwrap_or(0);
            minutes * 60 + seconds
        }
        _ => 0,
    }
}

/// Parse a `h:mm AM/PM` wall-clock string onto a given date (UTC).
pub fn parse_wall_clock(value: &str, date: NaiveDate) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(value.trim(), "%I:%M %p").ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

/// Format a timestamp as the `h:mm AM/PM` form the stage-2 prompt uses.
pub fn format_wall_clock(ts: DateTime<Utc>) -> String {
    let formatted = ts.format("%I:%M %p").to_string();
    formatted.trim_start_matches('0').to_string()
}

/// Parse the stage-1 reply. An empty or non-array reply is malformed: a
/// batch with no observations cannot proceed to stage 2.
pub fn parse_observations(content: &str) -> Result<Vec<ObservationDraft>, InferenceError> {
    let cleaned = strip_code_fence(content);
    let items: Vec<ObservationWire> = serde_json::from_str(cleaned)
        .map_err(|err| InferenceError::MalformedResponse(format!("stage-1 JSON: {err}")))?;

    if items.is_empty() {
        return Err(InferenceError::MalformedResponse(
            "stage-1 reply contained no observations".into(),
        ));
    }

    Ok(items
        .into_iter()
        .map(|item| ObservationDraft {
            start_offset_secs: parse_clock_offset(&item.start_timestamp),
            end_offset_secs: parse_clock_offset(&item.end_timestamp),
            text: item.description,
        })
        .collect())
}

/// Parse the stage-2 reply against the batch's calendar date.
pub fn parse_cards(content: &str, date: NaiveDate) -> Result<Vec<CardDraft>, InferenceError> {
    let cleaned = strip_code_fence(content);
    let items: Vec<CardWire> = serde_json::from_str(cleaned)
        .map_err(|err| InferenceError::MalformedResponse(format!("stage-2 JSON: {err}")))?;

    if items.is_empty() {
        return Err(InferenceError::MalformedResponse(
            "stage-2 reply contained no cards".into(),
        ));
    }

    let mut cards = Vec::with_capacity(items.len());
    for item in items {
        let start_time = parse_wall_clock(&item.start_time, date).ok_or_else(|| {
            InferenceError::MalformedResponse(format!("bad startTime '{}'", item.start_time))
        })?;
        let end_time = parse_wall_clock(&item.end_time, date).ok_or_else(|| {
            InferenceError::MalformedResponse(format!("bad endTime '{}'", item.end_time))
        })?;

        let description = if item.detailed_summary.is_empty() {
            item.summary.clone()
        } else {
            item.detailed_summary.clone()
        };

        cards.push(CardDraft {
            start_time,
            end_time,
            category: CardCategory::from_label(&item.category),
            title: if item.title.is_empty() {
                "Unknown activity".to_string()
            } else {
                item.title
            },
            description,
        });
    }
    Ok(cards)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_stripping_handles_all_variants() {
        assert_eq!(strip_code_fence("[1]"), "[1]");
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  ```json\n{\"a\": 1}\n```  "), "{\"a\": 1}");
    }

    #[test]
    fn clock_offsets_parse_and_tolerate_garbage() {
        assert_eq!(parse_clock_offset("00:00"), 0);
        assert_eq!(parse_clock_offset("14:58"), 898);
        assert_eq!(parse_clock_offset("garbage"), 0);
    }

    #[test]
    fn wall_clock_round_trips() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let ts = parse_wall_clock("1:12 PM", date).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-09T13:12:00+00:00");
        assert_eq!(format_wall_clock(ts), "1:12 PM");
    }

    #[test]
    fn observations_parse_from_fenced_reply() {
        let reply = r#"```json
[
  {"startTimestamp": "00:00", "endTimestamp": "06:45", "description": "Trip planning"},
  {"startTimestamp": "06:45", "endTimestamp": "15:00", "description": "Spanish course"}
]
```"#;
        let drafts = parse_observations(reply).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].start_offset_secs, 0);
        assert_eq!(drafts[1].end_offset_secs, 900);
    }

    #[test]
    fn empty_observation_list_is_malformed() {
        assert!(matches!(
            parse_observations("[]"),
            Err(InferenceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn cards_parse_with_unknown_category_folding() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let reply = r#"[
  {"startTime": "1:00 PM", "endTime": "1:15 PM", "category": "冥想",
   "title": "Something", "summary": "s", "detailedSummary": "d"}
]"#;
        let cards = parse_cards(reply, date).unwrap();
        assert_eq!(cards[0].category, CardCategory::Other);
        assert_eq!(cards[0].description, "d");
    }
}
