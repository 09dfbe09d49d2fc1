use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_sql_error},
    models::Observation,
};

fn row_to_observation(row: &Row) -> Result<Observation, rusqlite::Error> {
    let start_time_str: String = row.get("start_time")?;
    let end_time_str: String = row.get("end_time")?;
    let created_at_str: String = row.get("created_at")?;

    Ok(Observation {
        id: row.get("id")?,
        batch_id: row.get("batch_id")?,
        start_time: parse_datetime(&start_time_str, "start_time").map_err(to_sql_error)?,
        end_time: parse_datetime(&end_time_str, "end_time").map_err(to_sql_error)?,
        text: row.get("text")?,
        created_at: parse_datetime(&created_at_str, "created_at").map_err(to_sql_error)?,
    })
}

impl Database {
    /// Replace the observations of a batch in one transaction. The delete
    /// only matters during reprocess; for a first run it is a no-op.
    pub async fn replace_observations(
        &self,
        batch_id: &str,
        observations: &[Observation],
    ) -> Result<()> {
        let batch_id = batch_id.to_string();
        let observations = observations.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM observations WHERE batch_id = ?1",
                params![batch_id],
            )?;

            for obs in &observations {
                tx.execute(
                    "INSERT INTO observations
                        (id, batch_id, start_time, end_time, text, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        obs.id,
                        obs.batch_id,
                        obs.start_time.to_rfc3339(),
                        obs.end_time.to_rfc3339(),
                        obs.text,
                        obs.created_at.to_rfc3339(),
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn observations_for_batch(&self, batch_id: &str) -> Result<Vec<Observation>> {
        let batch_id = batch_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, batch_id, start_time, end_time, text, created_at
                 FROM observations
                 WHERE batch_id = ?1
                 ORDER BY start_time ASC",
            )?;
            let observations = stmt
                .query_map(params![batch_id], row_to_observation)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(observations)
        })
        .await
    }
}
