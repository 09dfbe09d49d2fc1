use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{day_bounds, parse_datetime, to_sql_error},
    models::{CardCategory, TimelineCard},
};

fn row_to_card(row: &Row) -> Result<TimelineCard, rusqlite::Error> {
    let start_time_str: String = row.get("start_time")?;
    let end_time_str: String = row.get("end_time")?;
    let category_str: String = row.get("category")?;
    let created_at_str: String = row.get("created_at")?;

    Ok(TimelineCard {
        id: row.get("id")?,
        batch_id: row.get("batch_id")?,
        start_time: parse_datetime(&start_time_str, "start_time").map_err(to_sql_error)?,
        end_time: parse_datetime(&end_time_str, "end_time").map_err(to_sql_error)?,
        category: CardCategory::from_label(&category_str),
        title: row.get("title")?,
        description: row.get("description")?,
        video_path: row.get("video_path")?,
        created_at: parse_datetime(&created_at_str, "created_at").map_err(to_sql_error)?,
    })
}

const CARD_COLUMNS: &str =
    "id, batch_id, start_time, end_time, category, title, description, video_path, created_at";

impl Database {
    /// Replace the timeline cards of a batch in one transaction, so a reader
    /// never observes a half-deleted timeline during reprocess.
    pub async fn replace_timeline_cards(
        &self,
        batch_id: &str,
        cards: &[TimelineCard],
    ) -> Result<()> {
        let batch_id = batch_id.to_string();
        let cards = cards.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM timeline_cards WHERE batch_id = ?1",
                params![batch_id],
            )?;

            for card in &cards {
                tx.execute(
                    "INSERT INTO timeline_cards
                        (id, batch_id, start_time, end_time, category, title,
                         description, video_path, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        card.id,
                        card.batch_id,
                        card.start_time.to_rfc3339(),
                        card.end_time.to_rfc3339(),
                        card.category.as_str(),
                        card.title,
                        card.description,
                        card.video_path,
                        card.created_at.to_rfc3339(),
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Cards whose start falls inside `[start, end)`, chronological. The
    /// timeline queries by window, never by completion order.
    pub async fn timeline_cards_by_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimelineCard>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CARD_COLUMNS} FROM timeline_cards
                 WHERE start_time >= ?1 AND start_time < ?2
                 ORDER BY start_time ASC"
            ))?;
            let cards = stmt
                .query_map(
                    params![start.to_rfc3339(), end.to_rfc3339()],
                    row_to_card,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(cards)
        })
        .await
    }

    pub async fn timeline_cards_by_day(&self, day: &str) -> Result<Vec<TimelineCard>> {
        let (start, end) = day_bounds(day)?;
        self.timeline_cards_by_range(start, end).await
    }

    pub async fn timeline_cards_for_batch(&self, batch_id: &str) -> Result<Vec<TimelineCard>> {
        let batch_id = batch_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CARD_COLUMNS} FROM timeline_cards
                 WHERE batch_id = ?1
                 ORDER BY start_time ASC"
            ))?;
            let cards = stmt
                .query_map(params![batch_id], row_to_card)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(cards)
        })
        .await
    }
}
