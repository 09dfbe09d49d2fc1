//! Analysis orchestrator: drives closed batches through the two-stage
//! pipeline (video transcription, then card generation) and owns the batch
//! status transitions.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::ConfigStore;
use crate::db::{
    models::{Batch, BatchStatus, CardCategory, Observation, TimelineCard},
    Database,
};
use crate::error::{AnalysisStage, PipelineError};
use crate::inference::{
    parse::{format_wall_clock, CardDraft, ObservationDraft},
    InferenceGateway,
};
use crate::pipeline::merge::merge_short_cards;

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

const MAX_CONCURRENT_BATCHES: usize = 2;

pub struct AnalysisOrchestrator {
    db: Database,
    config: Arc<ConfigStore>,
    gateway: Arc<InferenceGateway>,
    // Serializes passes so a manual trigger never interleaves with the
    // scheduled one. Claiming is still CAS-guarded per batch.
    pass_lock: Mutex<()>,
}

impl AnalysisOrchestrator {
    pub fn new(db: Database, config: Arc<ConfigStore>, gateway: Arc<InferenceGateway>) -> Self {
        Self {
            db,
            config,
            gateway,
            pass_lock: Mutex::new(()),
        }
    }

    /// Process every batch currently awaiting analysis. Batches are offered
    /// to the worker pool oldest window first; completion order is
    /// unconstrained, and the CAS claim keeps any batch from being analyzed
    /// twice even when triggers overlap a scheduled pass. Returns the number
    /// of batches that reached `done`.
    pub async fn run_pass(self: Arc<Self>) -> Result<usize> {
        // Best-effort guard against stacking full sweeps.
        let _guard = self.pass_lock.lock().await;
        Self::execute_pass(&self).await
    }

    async fn execute_pass(this: &Arc<Self>) -> Result<usize> {
        let batches = this.db.closed_batches().await?;
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_BATCHES));
        let mut workers = JoinSet::new();

        for batch in batches {
            // Acquiring before spawning preserves the chronological offer.
            let permit = semaphore.clone().acquire_owned().await?;
            let worker = this.clone();
            workers.spawn(async move {
                let _permit = permit;
                worker.process_one(batch).await
            });
        }

        let mut completed = 0;
        while let Some(outcome) = workers.join_next().await {
            if matches!(outcome, Ok(true)) {
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// Claim and analyze one batch. Returns true only when the batch reached
    /// `done`. Runs inside a worker task, so failures are logged rather than
    /// propagated.
    async fn process_one(&self, batch: Batch) -> bool {
        match self.db.try_claim_batch(&batch.id).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(err) => {
                log_error!("Could not claim batch {}: {err:?}", batch.id);
                return false;
            }
        }

        let (status, done) = match self.analyze_batch(&batch).await {
            Ok(()) => {
                log_info!("Batch {} analyzed", batch.id);
                (BatchStatus::Done, true)
            }
            Err(err) => {
                log_error!("Batch {} failed: {err}", batch.id);
                (BatchStatus::Failed, false)
            }
        };

        if let Err(err) = self.db.set_batch_status(&batch.id, status).await {
            log_error!("Could not update status of batch {}: {err:?}", batch.id);
            return false;
        }
        done
    }

    /// Reset every batch of a day and run the pipeline over them again.
    ///
    /// The pass lock is held for the entire delete-and-regenerate span, so
    /// reprocess waits out an in-flight pass instead of interleaving with
    /// it. The reset itself is conditional: a batch some other owner still
    /// holds in `analyzing` is skipped, never forcibly reclaimed. Each
    /// reset batch goes back to `closed` before its derived rows are
    /// dropped, so a reader never observes a `done` batch with a
    /// half-deleted timeline.
    pub async fn reprocess_day(self: Arc<Self>, day: &str) -> Result<usize> {
        let _guard = self.pass_lock.lock().await;

        let batches = self.db.batches_by_day(day).await?;
        log_info!("Reprocessing {} batches for {day}", batches.len());

        for batch in &batches {
            if !self.db.reset_batch_for_reprocess(&batch.id).await? {
                log_warn!("Batch {} is still being analyzed, skipping reset", batch.id);
                continue;
            }
            self.db.replace_timeline_cards(&batch.id, &[]).await?;
            self.db.replace_observations(&batch.id, &[]).await?;
        }

        Self::execute_pass(&self).await
    }

    async fn analyze_batch(&self, batch: &Batch) -> Result<(), PipelineError> {
        if self.config.bool("analysis.debug_mode") {
            return self.fill_debug_placeholders(batch).await;
        }

        let segments = self.db.segments_for_batch(&batch.id).await?;
        let video_path = segments.first().map(|segment| segment.file_path.clone());

        let observations = self.run_transcription(batch, &segments).await?;
        self.db
            .replace_observations(&batch.id, &observations)
            .await?;

        let cards = self.run_card_generation(batch, &observations, video_path).await?;
        self.db.replace_timeline_cards(&batch.id, &cards).await?;
        Ok(())
    }

    /// Stage 1: concatenate the window's segment files and turn them into
    /// observations anchored to absolute time.
    async fn run_transcription(
        &self,
        batch: &Batch,
        segments: &[crate::db::models::Segment],
    ) -> Result<Vec<Observation>, PipelineError> {
        let stage_failure = |cause: String| PipelineError::StageFailure {
            stage: AnalysisStage::Transcription,
            batch_id: batch.id.clone(),
            cause,
        };

        if segments.is_empty() {
            return Err(stage_failure("batch has no segments".into()));
        }

        let mut video = Vec::new();
        for segment in segments {
            let bytes = tokio::fs::read(&segment.file_path)
                .await
                .map_err(|err| stage_failure(format!("read {}: {err}", segment.file_path)))?;
            video.extend_from_slice(&bytes);
        }

        let window_secs = (batch.window_end - batch.window_start).num_seconds();
        let drafts = self
            .gateway
            .transcribe(&video, window_secs, Some(&batch.id))
            .await?;

        let now = Utc::now();
        Ok(drafts
            .into_iter()
            .map(|draft| draft_to_observation(draft, batch, window_secs, now))
            .collect())
    }

    /// Stage 2: synthesize the observations (plus the day's existing cards
    /// as context) into timeline cards, clamped to the batch window and with
    /// short slivers merged away.
    async fn run_card_generation(
        &self,
        batch: &Batch,
        observations: &[Observation],
        video_path: Option<String>,
    ) -> Result<Vec<TimelineCard>, PipelineError> {
        let existing: Vec<TimelineCard> = self
            .db
            .timeline_cards_by_day(&batch.day)
            .await?
            .into_iter()
            .filter(|card| card.batch_id != batch.id)
            .collect();

        let existing_json = serde_json::to_string(
            &existing
                .iter()
                .map(|card| {
                    json!({
                        "startTime": format_wall_clock(card.start_time),
                        "endTime": format_wall_clock(card.end_time),
                        "category": card.category.as_str(),
                        "title": card.title,
                        "summary": card.description,
                    })
                })
                .collect::<Vec<_>>(),
        )
        .map_err(|err| PipelineError::StageFailure {
            stage: AnalysisStage::CardGeneration,
            batch_id: batch.id.clone(),
            cause: err.to_string(),
        })?;

        let observations_text = observations
            .iter()
            .map(|obs| {
                format!(
                    "{} - {}: {}",
                    format_wall_clock(obs.start_time),
                    format_wall_clock(obs.end_time),
                    obs.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let drafts = self
            .gateway
            .generate_cards(
                &observations_text,
                &existing_json,
                batch.window_start.date_naive(),
                Some(&batch.id),
            )
            .await?;

        let min_duration = Duration::minutes(self.config.int("analysis.min_card_minutes").max(0));
        let drafts = merge_short_cards(
            drafts
                .into_iter()
                .map(|draft| clamp_draft_to_window(draft, batch))
                .collect(),
            min_duration,
        );

        let now = Utc::now();
        Ok(drafts
            .into_iter()
            .map(|draft| TimelineCard {
                id: format!("card_{}", Uuid::new_v4()),
                batch_id: batch.id.clone(),
                start_time: draft.start_time,
                end_time: draft.end_time,
                category: draft.category,
                title: draft.title,
                description: draft.description,
                video_path: video_path.clone(),
                created_at: now,
            })
            .collect())
    }

    /// Debug mode: deterministic placeholders spanning the whole window.
    /// Never touches the gateway, so no tokens are spent and no usage rows
    /// are written.
    async fn fill_debug_placeholders(&self, batch: &Batch) -> Result<(), PipelineError> {
        let now = Utc::now();
        let video_path = self
            .db
            .segments_for_batch(&batch.id)
            .await?
            .first()
            .map(|segment| segment.file_path.clone());

        let observation = Observation {
            id: format!("obs_{}", Uuid::new_v4()),
            batch_id: batch.id.clone(),
            start_time: batch.window_start,
            end_time: batch.window_end,
            text: "Debug placeholder: screen activity was recorded but not analyzed.".to_string(),
            created_at: now,
        };
        self.db
            .replace_observations(&batch.id, std::slice::from_ref(&observation))
            .await?;

        let card = TimelineCard {
            id: format!("card_{}", Uuid::new_v4()),
            batch_id: batch.id.clone(),
            start_time: batch.window_start,
            end_time: batch.window_end,
            category: CardCategory::Other,
            title: "Debug session".to_string(),
            description: "Placeholder card generated in debug mode.".to_string(),
            video_path,
            created_at: now,
        };
        self.db
            .replace_timeline_cards(&batch.id, std::slice::from_ref(&card))
            .await?;
        Ok(())
    }
}

fn draft_to_observation(
    draft: ObservationDraft,
    batch: &Batch,
    window_secs: i64,
    now: chrono::DateTime<Utc>,
) -> Observation {
    let start_offset = draft.start_offset_secs.clamp(0, window_secs);
    let end_offset = draft.end_offset_secs.clamp(start_offset, window_secs);
    Observation {
        id: format!("obs_{}", Uuid::new_v4()),
        batch_id: batch.id.clone(),
        start_time: batch.window_start + Duration::seconds(start_offset),
        end_time: batch.window_start + Duration::seconds(end_offset),
        text: draft.text,
        created_at: now,
    }
}

/// Clamp a card draft into the batch window. A draft that degenerates under
/// clamping (model hallucinated times outside the window) falls back to
/// spanning the whole window.
fn clamp_draft_to_window(mut draft: CardDraft, batch: &Batch) -> CardDraft {
    draft.start_time = draft.start_time.clamp(batch.window_start, batch.window_end);
    draft.end_time = draft.end_time.clamp(batch.window_start, batch.window_end);
    if draft.end_time <= draft.start_time {
        draft.start_time = batch.window_start;
        draft.end_time = batch.window_end;
    }
    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_batch() -> Batch {
        Batch {
            id: "bat_test".to_string(),
            day: "2025-03-09".to_string(),
            window_start: Utc.with_ymd_and_hms(2025, 3, 9, 13, 0, 0).unwrap(),
            window_end: Utc.with_ymd_and_hms(2025, 3, 9, 13, 15, 0).unwrap(),
            status: BatchStatus::Analyzing,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn observation_offsets_clamp_into_window() {
        let batch = test_batch();
        let draft = ObservationDraft {
            start_offset_secs: -30,
            end_offset_secs: 4000,
            text: "t".to_string(),
        };
        let obs = draft_to_observation(draft, &batch, 900, Utc::now());
        assert_eq!(obs.start_time, batch.window_start);
        assert_eq!(obs.end_time, batch.window_end);
    }

    #[test]
    fn degenerate_card_falls_back_to_window() {
        let batch = test_batch();
        let draft = CardDraft {
            start_time: Utc.with_ymd_and_hms(2025, 3, 9, 18, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2025, 3, 9, 18, 30, 0).unwrap(),
            category: CardCategory::Work,
            title: "t".to_string(),
            description: "d".to_string(),
        };
        let clamped = clamp_draft_to_window(draft, &batch);
        assert_eq!(clamped.start_time, batch.window_start);
        assert_eq!(clamped.end_time, batch.window_end);
    }

    #[test]
    fn in_window_card_is_untouched() {
        let batch = test_batch();
        let draft = CardDraft {
            start_time: Utc.with_ymd_and_hms(2025, 3, 9, 13, 2, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2025, 3, 9, 13, 14, 0).unwrap(),
            category: CardCategory::Work,
            title: "t".to_string(),
            description: "d".to_string(),
        };
        let clamped = clamp_draft_to_window(draft.clone(), &batch);
        assert_eq!(clamped.start_time, draft.start_time);
        assert_eq!(clamped.end_time, draft.end_time);
    }
}
