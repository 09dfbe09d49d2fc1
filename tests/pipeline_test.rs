//! End-to-end pipeline tests against a real SQLite database in a temp dir,
//! with the inference service either bypassed (debug mode) or replaced by a
//! scripted transport.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use dayline::db::models::{BatchStatus, CardCategory};
use dayline::db::NewSegment;
use dayline::error::InferenceError;
use dayline::inference::transport::{ChatCompletion, ChatTransport, TokenCounts};
use dayline::inference::{GatewayKey, TransportFactory};
use dayline::Dayline;

const TEST_DAY: &str = "2025-06-01";

fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap()
}

async fn open_debug_app(dir: &TempDir) -> Dayline {
    let app = Dayline::open(dir.path().join("dayline.db"))
        .await
        .expect("open database");
    app.set_config("analysis.debug_mode", "true")
        .await
        .expect("enable debug mode");
    app
}

/// Report one 15-minute window's worth of 15-second segments starting at
/// `window_start`. File paths point into `dir` but are only created on disk
/// when `write_files` is set.
async fn report_window_segments(
    app: &Dayline,
    dir: &TempDir,
    window_start: DateTime<Utc>,
    write_files: bool,
) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for i in 0..60 {
        let start = window_start + Duration::seconds(i * 15);
        let path = dir
            .path()
            .join(format!("seg-{}-{i}.mp4", window_start.timestamp()));
        if write_files {
            std::fs::write(&path, b"video-bytes").expect("write segment file");
        }
        let recorded = app
            .segment_ready(NewSegment {
                start_time: start,
                end_time: start + Duration::seconds(15),
                file_path: path.to_string_lossy().into_owned(),
            })
            .await
            .expect("record segment");
        assert!(recorded.is_some());
        paths.push(path);
    }
    paths
}

#[tokio::test]
async fn debug_mode_produces_placeholder_timeline() {
    let dir = TempDir::new().unwrap();
    let app = open_debug_app(&dir).await;

    report_window_segments(&app, &dir, day_start(), false).await;
    let completed = app.trigger_analysis_now().await.unwrap();
    assert_eq!(completed, 1);

    let batches = app.batches_for_day(TEST_DAY).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Done);
    assert_eq!(batches[0].window_start, day_start());
    assert_eq!(batches[0].window_end, day_start() + Duration::minutes(15));

    let observations = app.observations_for_batch(&batches[0].id).await.unwrap();
    assert_eq!(observations.len(), 1);

    let cards = app.timeline_for_day(TEST_DAY).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].category, CardCategory::Other);
    assert_eq!(cards[0].start_time, day_start());
    assert_eq!(cards[0].end_time, day_start() + Duration::minutes(15));

    // Debug mode never reaches the service, so no usage is metered.
    let (records, total) = app.token_usage_page(None, 10, 0).await.unwrap();
    assert!(records.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn triggering_twice_does_not_duplicate_batches() {
    let dir = TempDir::new().unwrap();
    let app = open_debug_app(&dir).await;

    report_window_segments(&app, &dir, day_start(), false).await;
    app.trigger_analysis_now().await.unwrap();
    let second = app.trigger_analysis_now().await.unwrap();
    assert_eq!(second, 0);

    let batches = app.batches_for_day(TEST_DAY).await.unwrap();
    assert_eq!(batches.len(), 1);
    let cards = app.timeline_for_day(TEST_DAY).await.unwrap();
    assert_eq!(cards.len(), 1);
}

#[tokio::test]
async fn duplicate_segment_reports_are_swallowed() {
    let dir = TempDir::new().unwrap();
    let app = open_debug_app(&dir).await;

    let new = NewSegment {
        start_time: day_start(),
        end_time: day_start() + Duration::seconds(15),
        file_path: "/tmp/does-not-matter.mp4".to_string(),
    };
    assert!(app.segment_ready(new.clone()).await.unwrap().is_some());
    assert!(app.segment_ready(new.clone()).await.unwrap().is_none());

    // The repository itself surfaces the typed error.
    let err = app.database().record_segment(new).await.unwrap_err();
    assert!(matches!(
        err,
        dayline::error::PipelineError::DuplicateSegment { .. }
    ));

    let stats = app.stats().await.unwrap();
    assert_eq!(stats.segments, 1);
}

#[tokio::test]
async fn batch_claim_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let app = open_debug_app(&dir).await;

    report_window_segments(&app, &dir, day_start(), false).await;
    let db = app.database();
    let batches = dayline::pipeline::batcher::close_due_windows(db, app.config(), Utc::now())
        .await
        .unwrap();
    assert_eq!(batches.len(), 1);

    assert!(db.try_claim_batch(&batches[0].id).await.unwrap());
    assert!(!db.try_claim_batch(&batches[0].id).await.unwrap());
}

#[tokio::test]
async fn reprocess_day_regenerates_identical_debug_cards() {
    let dir = TempDir::new().unwrap();
    let app = open_debug_app(&dir).await;

    report_window_segments(&app, &dir, day_start(), false).await;
    app.trigger_analysis_now().await.unwrap();
    let before = app.timeline_for_day(TEST_DAY).await.unwrap();

    let reprocessed = app.reprocess_day(TEST_DAY).await.unwrap();
    assert_eq!(reprocessed, 1);

    let after = app.timeline_for_day(TEST_DAY).await.unwrap();
    assert_eq!(before.len(), after.len());
    assert_eq!(before[0].start_time, after[0].start_time);
    assert_eq!(before[0].end_time, after[0].end_time);
    assert_eq!(before[0].title, after[0].title);
    // Regenerated rows, not the old ones.
    assert_ne!(before[0].id, after[0].id);
}

#[tokio::test]
async fn reprocess_leaves_claimed_batches_alone() {
    let dir = TempDir::new().unwrap();
    let app = open_debug_app(&dir).await;

    report_window_segments(&app, &dir, day_start(), false).await;
    app.trigger_analysis_now().await.unwrap();
    let batches = app.batches_for_day(TEST_DAY).await.unwrap();
    assert_eq!(batches[0].status, BatchStatus::Done);

    // Another worker holds the batch mid-analysis.
    app.database()
        .set_batch_status(&batches[0].id, BatchStatus::Analyzing)
        .await
        .unwrap();

    let reprocessed = app.reprocess_day(TEST_DAY).await.unwrap();
    assert_eq!(reprocessed, 0);

    // The claim survives and the derived data was not torn down.
    let batch = app.batch(&batches[0].id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Analyzing);
    assert_eq!(app.timeline_for_day(TEST_DAY).await.unwrap().len(), 1);
    assert_eq!(
        app.observations_for_batch(&batches[0].id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn retention_sweep_keeps_recent_data() {
    let dir = TempDir::new().unwrap();
    let app = open_debug_app(&dir).await;

    let old_start = (Utc::now() - Duration::days(4))
        .date_naive()
        .and_hms_opt(10, 0, 0)
        .unwrap()
        .and_utc();
    let recent_start = (Utc::now() - Duration::days(1))
        .date_naive()
        .and_hms_opt(10, 0, 0)
        .unwrap()
        .and_utc();
    let old_day = old_start.format("%Y-%m-%d").to_string();
    let recent_day = recent_start.format("%Y-%m-%d").to_string();

    let old_files = report_window_segments(&app, &dir, old_start, true).await;
    let recent_files = report_window_segments(&app, &dir, recent_start, true).await;
    app.trigger_analysis_now().await.unwrap();

    let report = app.sweep_now().await.unwrap();
    assert_eq!(report.batches_deleted, 1);
    assert_eq!(report.segments_deleted, 60);
    assert!(report.failed_files.is_empty());

    assert!(app.batches_for_day(&old_day).await.unwrap().is_empty());
    assert!(app.timeline_for_day(&old_day).await.unwrap().is_empty());
    assert_eq!(app.batches_for_day(&recent_day).await.unwrap().len(), 1);
    assert_eq!(app.timeline_for_day(&recent_day).await.unwrap().len(), 1);

    assert!(old_files.iter().all(|path| !path.exists()));
    assert!(recent_files.iter().all(|path| path.exists()));
}

#[tokio::test]
async fn clear_all_data_keeps_config() {
    let dir = TempDir::new().unwrap();
    let app = open_debug_app(&dir).await;

    report_window_segments(&app, &dir, day_start(), true).await;
    app.trigger_analysis_now().await.unwrap();

    let report = app.clear_all_data(false).await.unwrap();
    assert_eq!(report.deleted.segments, 60);
    assert_eq!(report.deleted.batches, 1);
    assert_eq!(report.deleted_files, 60);

    let stats = app.stats().await.unwrap();
    assert_eq!(stats.segments, 0);
    assert_eq!(stats.batches, 0);
    assert_eq!(stats.timeline_cards, 0);

    // Configuration survives the wipe.
    assert!(app.config().bool("analysis.debug_mode"));
}

// Scripted transport for tests that exercise the real two-stage path.
struct ScriptedTransport;

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn chat_video(
        &self,
        _video: &[u8],
        _prompt: &str,
        _model: &str,
    ) -> Result<ChatCompletion, InferenceError> {
        Ok(ChatCompletion {
            content: r#"```json
[{"startTimestamp": "00:00", "endTimestamp": "15:00", "description": "Editing Rust code in an IDE"}]
```"#
                .to_string(),
            usage: Some(TokenCounts {
                prompt_tokens: 1000,
                completion_tokens: 50,
                total_tokens: 1050,
            }),
        })
    }

    async fn chat_text(
        &self,
        _prompt: &str,
        _model: &str,
    ) -> Result<ChatCompletion, InferenceError> {
        Ok(ChatCompletion {
            content: r#"[{"startTime": "1:00 PM", "endTime": "1:15 PM", "category": "工作",
                "title": "Writing Rust code", "summary": "Edited code",
                "detailedSummary": "Edited Rust modules in an IDE."}]"#
                .to_string(),
            usage: Some(TokenCounts {
                prompt_tokens: 200,
                completion_tokens: 80,
                total_tokens: 280,
            }),
        })
    }
}

fn counting_factory() -> (TransportFactory, Arc<AtomicUsize>) {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let factory: TransportFactory = Arc::new(move |_key: &GatewayKey| {
        counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(ScriptedTransport) as Arc<dyn ChatTransport>
    });
    (factory, builds)
}

#[tokio::test]
async fn scripted_service_yields_cards_and_usage() {
    let dir = TempDir::new().unwrap();
    let (factory, _builds) = counting_factory();
    let app = Dayline::open_with_transport_factory(dir.path().join("dayline.db"), factory)
        .await
        .unwrap();

    report_window_segments(&app, &dir, day_start(), true).await;
    let completed = app.trigger_analysis_now().await.unwrap();
    assert_eq!(completed, 1);

    let cards = app.timeline_for_day(TEST_DAY).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].category, CardCategory::Work);
    assert_eq!(cards[0].title, "Writing Rust code");
    assert_eq!(cards[0].start_time, day_start());
    assert_eq!(cards[0].end_time, day_start() + Duration::minutes(15));
    assert!(cards[0].video_path.is_some());

    let batches = app.batches_for_day(TEST_DAY).await.unwrap();
    let observations = app.observations_for_batch(&batches[0].id).await.unwrap();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].start_time, day_start());
    assert_eq!(observations[0].end_time, day_start() + Duration::minutes(15));

    let by_batch = app.cards_for_batch(&batches[0].id).await.unwrap();
    assert_eq!(by_batch.len(), 1);

    // One usage row per stage, stamped with the call time, not the window.
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let usage = app.token_usage_for_day(&today).await.unwrap();
    assert_eq!(usage.request_count, 2);
    assert_eq!(usage.total_tokens, 1330);
    let (records, total) = app.token_usage_page(None, 10, 0).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn credential_change_rebuilds_transport_once() {
    let dir = TempDir::new().unwrap();
    let (factory, builds) = counting_factory();
    let app = Dayline::open_with_transport_factory(dir.path().join("dayline.db"), factory)
        .await
        .unwrap();

    report_window_segments(&app, &dir, day_start(), true).await;
    app.trigger_analysis_now().await.unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    // Same key: the cached transport is reused for the next window.
    report_window_segments(&app, &dir, day_start() + Duration::minutes(15), true).await;
    app.trigger_analysis_now().await.unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    app.set_config("secrets.api_key", "sk-rotated-credential")
        .await
        .unwrap();

    report_window_segments(&app, &dir, day_start() + Duration::minutes(30), true).await;
    app.trigger_analysis_now().await.unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

// Transport that always fails the same way, counting how often it is hit.
#[derive(Clone, Copy)]
enum FailureMode {
    AuthRejected,
    RateLimited,
}

struct FailingTransport {
    mode: FailureMode,
    calls: Arc<AtomicUsize>,
}

impl FailingTransport {
    fn fail(&self) -> InferenceError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            FailureMode::AuthRejected => InferenceError::AuthRejected("bad credential".into()),
            FailureMode::RateLimited => InferenceError::RateLimited,
        }
    }
}

#[async_trait]
impl ChatTransport for FailingTransport {
    async fn chat_video(
        &self,
        _video: &[u8],
        _prompt: &str,
        _model: &str,
    ) -> Result<ChatCompletion, InferenceError> {
        Err(self.fail())
    }

    async fn chat_text(
        &self,
        _prompt: &str,
        _model: &str,
    ) -> Result<ChatCompletion, InferenceError> {
        Err(self.fail())
    }
}

fn failing_factory(mode: FailureMode) -> (TransportFactory, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let factory: TransportFactory = Arc::new(move |_key: &GatewayKey| {
        Arc::new(FailingTransport {
            mode,
            calls: counter.clone(),
        }) as Arc<dyn ChatTransport>
    });
    (factory, calls)
}

#[tokio::test]
async fn auth_rejection_fails_batch_without_retry() {
    let dir = TempDir::new().unwrap();
    let (factory, calls) = failing_factory(FailureMode::AuthRejected);
    let app = Dayline::open_with_transport_factory(dir.path().join("dayline.db"), factory)
        .await
        .unwrap();

    report_window_segments(&app, &dir, day_start(), true).await;
    let completed = app.trigger_analysis_now().await.unwrap();
    assert_eq!(completed, 0);

    // Permanent failure: exactly one attempt, batch failed, nothing on the
    // timeline.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let batches = app.batches_for_day(TEST_DAY).await.unwrap();
    assert_eq!(batches[0].status, BatchStatus::Failed);
    assert!(app.timeline_for_day(TEST_DAY).await.unwrap().is_empty());
    assert!(app
        .observations_for_batch(&batches[0].id)
        .await
        .unwrap()
        .is_empty());

    // The service saw the request, so the attempt is metered with zero
    // counts.
    let (records, total) = app.token_usage_page(None, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(records[0].total_tokens, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limiting_retries_up_to_the_bound() {
    let dir = TempDir::new().unwrap();
    let (factory, calls) = failing_factory(FailureMode::RateLimited);
    let app = Dayline::open_with_transport_factory(dir.path().join("dayline.db"), factory)
        .await
        .unwrap();

    report_window_segments(&app, &dir, day_start(), true).await;
    let completed = app.trigger_analysis_now().await.unwrap();
    assert_eq!(completed, 0);

    // Transient failure: retried up to the bound, one usage row per attempt,
    // then the batch fails.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let batches = app.batches_for_day(TEST_DAY).await.unwrap();
    assert_eq!(batches[0].status, BatchStatus::Failed);
    assert!(app.timeline_for_day(TEST_DAY).await.unwrap().is_empty());

    let (_, total) = app.token_usage_page(None, 10, 0).await.unwrap();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn masked_secret_writes_are_rejected() {
    let dir = TempDir::new().unwrap();
    let app = open_debug_app(&dir).await;

    app.set_config("secrets.api_key", "sk-real-key-12345")
        .await
        .unwrap();

    // Round-tripping a masked snapshot must not clobber the stored secret.
    let snapshot = app.config_snapshot(true);
    let masked = snapshot
        .iter()
        .find(|entry| entry.key == "secrets.api_key")
        .unwrap();
    assert!(masked.value.contains('*'));
    assert!(app.set_config("secrets.api_key", &masked.value).await.is_err());
    assert_eq!(
        app.config().string("secrets.api_key"),
        "sk-real-key-12345"
    );
}
