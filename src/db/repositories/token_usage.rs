use anyhow::{anyhow, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_sql_error},
    models::{RequestKind, TokenUsageRecord, TokenUsageSummary},
};

fn parse_request_kind(value: &str) -> Result<RequestKind> {
    match value {
        "transcribe" => Ok(RequestKind::Transcribe),
        "generate_cards" => Ok(RequestKind::GenerateCards),
        other => Err(anyhow!("unknown request kind '{other}'")),
    }
}

fn row_to_usage_record(row: &Row) -> Result<TokenUsageRecord, rusqlite::Error> {
    let kind_str: String = row.get("request_kind")?;
    let created_at_str: String = row.get("created_at")?;

    Ok(TokenUsageRecord {
        id: row.get("id")?,
        request_kind: parse_request_kind(&kind_str).map_err(to_sql_error)?,
        model: row.get("model")?,
        prompt_tokens: row.get("prompt_tokens")?,
        completion_tokens: row.get("completion_tokens")?,
        total_tokens: row.get("total_tokens")?,
        batch_id: row.get("batch_id")?,
        created_at: parse_datetime(&created_at_str, "created_at").map_err(to_sql_error)?,
    })
}

impl Database {
    /// Append one audit row. Rows are never updated afterwards.
    pub async fn append_token_usage(&self, record: &TokenUsageRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO token_usage
                    (id, request_kind, model, prompt_tokens, completion_tokens,
                     total_tokens, batch_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.request_kind.as_str(),
                    record.model,
                    record.prompt_tokens,
                    record.completion_tokens,
                    record.total_tokens,
                    record.batch_id,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Raw usage rows, newest first, optionally filtered to one day.
    pub async fn token_usage_records(
        &self,
        day: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TokenUsageRecord>> {
        self.execute(move |conn| {
            let records = match &day {
                Some(day) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, request_kind, model, prompt_tokens, completion_tokens,
                                total_tokens, batch_id, created_at
                         FROM token_usage
                         WHERE substr(created_at, 1, 10) = ?1
                         ORDER BY created_at DESC
                         LIMIT ?2 OFFSET ?3",
                    )?;
                    let rows = stmt
                        .query_map(params![day, limit, offset], row_to_usage_record)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, request_kind, model, prompt_tokens, completion_tokens,
                                total_tokens, batch_id, created_at
                         FROM token_usage
                         ORDER BY created_at DESC
                         LIMIT ?1 OFFSET ?2",
                    )?;
                    let rows = stmt
                        .query_map(params![limit, offset], row_to_usage_record)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            };
            Ok(records)
        })
        .await
    }

    pub async fn token_usage_count(&self, day: Option<String>) -> Result<i64> {
        self.execute(move |conn| {
            let count: i64 = match &day {
                Some(day) => conn.query_row(
                    "SELECT COUNT(*) FROM token_usage WHERE substr(created_at, 1, 10) = ?1",
                    params![day],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM token_usage", [], |row| row.get(0))?,
            };
            Ok(count)
        })
        .await
    }

    /// One-day rollup of token counts.
    pub async fn token_usage_by_day(&self, day: &str) -> Result<TokenUsageSummary> {
        let day = day.to_string();
        self.execute(move |conn| {
            let summary = conn.query_row(
                "SELECT COALESCE(SUM(prompt_tokens), 0),
                        COALESCE(SUM(completion_tokens), 0),
                        COALESCE(SUM(total_tokens), 0),
                        COUNT(*)
                 FROM token_usage
                 WHERE substr(created_at, 1, 10) = ?1",
                params![day.clone()],
                |row| {
                    Ok(TokenUsageSummary {
                        day: day.clone(),
                        prompt_tokens: row.get(0)?,
                        completion_tokens: row.get(1)?,
                        total_tokens: row.get(2)?,
                        request_count: row.get(3)?,
                    })
                },
            )?;
            Ok(summary)
        })
        .await
    }

    /// Per-day rollups over an inclusive `YYYY-MM-DD` range, ascending.
    pub async fn token_usage_daily(
        &self,
        start_day: &str,
        end_day: &str,
    ) -> Result<Vec<TokenUsageSummary>> {
        let start_day = start_day.to_string();
        let end_day = end_day.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT substr(created_at, 1, 10) AS day,
                        COALESCE(SUM(prompt_tokens), 0),
                        COALESCE(SUM(completion_tokens), 0),
                        COALESCE(SUM(total_tokens), 0),
                        COUNT(*)
                 FROM token_usage
                 WHERE substr(created_at, 1, 10) BETWEEN ?1 AND ?2
                 GROUP BY day
                 ORDER BY day ASC",
            )?;
            let summaries = stmt
                .query_map(params![start_day, end_day], |row| {
                    Ok(TokenUsageSummary {
                        day: row.get(0)?,
                        prompt_tokens: row.get(1)?,
                        completion_tokens: row.get(2)?,
                        total_tokens: row.get(3)?,
                        request_count: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(summaries)
        })
        .await
    }
}
