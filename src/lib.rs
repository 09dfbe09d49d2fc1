//! Dayline turns a stream of short screen-recording segments into a daily
//! activity timeline.
//!
//! An external capture process deposits fixed-length video chunks and
//! reports them via [`Dayline::segment_ready`]. From there the pipeline is
//! fully internal: a batcher groups segments into aligned analysis windows,
//! an orchestrator drives each closed window through two inference stages
//! (video transcription, then card generation), and a retention sweeper
//! bounds how much raw media survives. Everything is keyed off a single
//! SQLite database and a hot-reloadable config store.

pub mod config;
pub mod db;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::warn;

use crate::config::ConfigStore;
use crate::db::{
    models::{Batch, ConfigEntry, Observation, Segment, TimelineCard, TokenUsageRecord,
        TokenUsageSummary},
    ClearReport, Database, NewSegment, TableCounts,
};
use crate::error::PipelineError;
use crate::inference::{InferenceGateway, TransportFactory};
use crate::pipeline::{batcher, retention, AnalysisOrchestrator, Scheduler, SweepReport};

/// Facade over the whole pipeline: one of these per database.
pub struct Dayline {
    db: Database,
    config: Arc<ConfigStore>,
    orchestrator: Arc<AnalysisOrchestrator>,
    scheduler: tokio::sync::Mutex<Option<Scheduler>>,
}

impl Dayline {
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        Self::build(db_path, None).await
    }

    /// Open with a custom inference transport. Integration tests use this to
    /// script the service without a network.
    pub async fn open_with_transport_factory(
        db_path: PathBuf,
        factory: TransportFactory,
    ) -> Result<Self> {
        Self::build(db_path, Some(factory)).await
    }

    async fn build(db_path: PathBuf, factory: Option<TransportFactory>) -> Result<Self> {
        let db = Database::open(db_path)?;
        let config = Arc::new(ConfigStore::load(db.clone()).await?);
        let gateway = Arc::new(match factory {
            Some(factory) => InferenceGateway::with_factory(db.clone(), config.clone(), factory),
            None => InferenceGateway::new(db.clone(), config.clone()),
        });
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            db.clone(),
            config.clone(),
            gateway,
        ));

        Ok(Self {
            db,
            config,
            orchestrator,
            scheduler: tokio::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Start the background loops. Idempotent: a second call while running
    /// is a no-op.
    pub async fn start(&self) {
        let mut guard = self.scheduler.lock().await;
        if guard.is_none() {
            *guard = Some(Scheduler::start(
                self.db.clone(),
                self.config.clone(),
                self.orchestrator.clone(),
            ));
        }
    }

    /// Stop the background loops and wait for them to drain.
    pub async fn stop(&self) {
        let scheduler = self.scheduler.lock().await.take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
    }

    /// Report a finished capture segment. A duplicate report for the same
    /// time range is logged and swallowed; the capture process retries
    /// blindly after crashes, so duplicates are expected.
    pub async fn segment_ready(&self, new: NewSegment) -> Result<Option<Segment>> {
        match self.db.record_segment(new).await {
            Ok(segment) => Ok(Some(segment)),
            Err(PipelineError::DuplicateSegment { start, end }) => {
                warn!("Ignoring duplicate segment {start} - {end}");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Close all elapsed windows and run an analysis pass immediately,
    /// without waiting for the next scheduled ticks.
    pub async fn trigger_analysis_now(&self) -> Result<usize> {
        batcher::close_due_windows(&self.db, &self.config, Utc::now()).await?;
        self.orchestrator.clone().run_pass().await
    }

    /// Drop a day's derived data and regenerate it from the stored segments.
    pub async fn reprocess_day(&self, day: &str) -> Result<usize> {
        self.orchestrator.clone().reprocess_day(day).await
    }

    /// Run one retention sweep immediately.
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        retention::sweep(&self.db, &self.config, Utc::now()).await
    }

    pub async fn timeline_for_day(&self, day: &str) -> Result<Vec<TimelineCard>> {
        self.db.timeline_cards_by_day(day).await
    }

    pub async fn timeline_for_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimelineCard>> {
        self.db.timeline_cards_by_range(start, end).await
    }

    pub async fn batches_for_day(&self, day: &str) -> Result<Vec<Batch>> {
        self.db.batches_by_day(day).await
    }

    pub async fn batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        self.db.get_batch(batch_id).await
    }

    pub async fn observations_for_batch(&self, batch_id: &str) -> Result<Vec<Observation>> {
        self.db.observations_for_batch(batch_id).await
    }

    pub async fn cards_for_batch(&self, batch_id: &str) -> Result<Vec<TimelineCard>> {
        self.db.timeline_cards_for_batch(batch_id).await
    }

    pub async fn token_usage_for_day(&self, day: &str) -> Result<TokenUsageSummary> {
        self.db.token_usage_by_day(day).await
    }

    /// One page of raw usage rows plus the total row count for the same
    /// filter, so callers can paginate.
    pub async fn token_usage_page(
        &self,
        day: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TokenUsageRecord>, i64)> {
        let total = self.db.token_usage_count(day.clone()).await?;
        let records = self.db.token_usage_records(day, limit, offset).await?;
        Ok((records, total))
    }

    pub async fn token_usage_daily(
        &self,
        start_day: &str,
        end_day: &str,
    ) -> Result<Vec<TokenUsageSummary>> {
        self.db.token_usage_daily(start_day, end_day).await
    }

    pub async fn stats(&self) -> Result<TableCounts> {
        self.db.table_counts().await
    }

    pub fn config_snapshot(&self, mask_sensitive: bool) -> Vec<ConfigEntry> {
        self.config.snapshot(mask_sensitive)
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.config.set(key, value).await
    }

    pub async fn set_config_many(
        &self,
        pairs: &[(String, String)],
    ) -> (Vec<String>, Vec<(String, String)>) {
        self.config.set_many(pairs).await
    }

    /// Wipe all recorded and derived data, keeping configuration.
    pub async fn clear_all_data(&self, keep_files: bool) -> Result<ClearReport> {
        self.db.clear_all_data(keep_files).await
    }
}
