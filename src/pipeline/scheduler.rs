//! Background scheduler: three cadenced loops (batcher, analysis, retention)
//! plus cooperative shutdown. Each loop runs on a `tokio::time::interval`
//! with `MissedTickBehavior::Delay`; the cadence is re-read from config
//! after every tick and the interval rebuilt when it changed, so interval
//! edits take effect without a restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::db::Database;
use crate::pipeline::{batcher, orchestrator::AnalysisOrchestrator, retention};

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

const BATCHER_TICK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const RETENTION_TICK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

fn cadence_interval(cadence: Duration) -> Interval {
    let mut ticker = interval(cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(
        db: Database,
        config: Arc<ConfigStore>,
        orchestrator: Arc<AnalysisOrchestrator>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        {
            let db = db.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                log_info!("Batcher loop started");
                let mut cadence = Duration::from_secs(config.int("batcher.interval").max(1) as u64);
                let mut ticker = cadence_interval(cadence);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    match timeout(
                        BATCHER_TICK_TIMEOUT,
                        batcher::close_due_windows(&db, &config, Utc::now()),
                    )
                    .await
                    {
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => log_error!("Batcher tick failed: {err:?}"),
                        Err(_) => log_warn!("Batcher tick timed out"),
                    }

                    let desired =
                        Duration::from_secs(config.int("batcher.interval").max(1) as u64);
                    if desired != cadence {
                        cadence = desired;
                        ticker = cadence_interval(cadence);
                    }
                }
                log_info!("Batcher loop stopped");
            }));
        }

        {
            let config = config.clone();
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                log_info!("Analysis loop started");
                let mut cadence =
                    Duration::from_secs(config.int("analysis.interval").max(1) as u64 * 60);
                let mut ticker = cadence_interval(cadence);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    // No tick timeout here: aborting an analysis mid-flight
                    // would leave its claimed batch stuck in `analyzing`.
                    // Each external call is already bounded by the transport
                    // timeout and the retry cap.
                    if let Err(err) = orchestrator.clone().run_pass().await {
                        log_error!("Analysis pass failed: {err:?}");
                    }

                    let desired =
                        Duration::from_secs(config.int("analysis.interval").max(1) as u64 * 60);
                    if desired != cadence {
                        cadence = desired;
                        ticker = cadence_interval(cadence);
                    }
                }
                log_info!("Analysis loop stopped");
            }));
        }

        {
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                log_info!("Retention loop started");
                let mut cadence = Duration::from_secs(
                    config.int("retention.sweep_interval").max(1) as u64 * 60,
                );
                let mut ticker = cadence_interval(cadence);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    match timeout(
                        RETENTION_TICK_TIMEOUT,
                        retention::sweep(&db, &config, Utc::now()),
                    )
                    .await
                    {
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => log_error!("Retention sweep failed: {err:?}"),
                        Err(_) => log_warn!("Retention sweep timed out"),
                    }

                    let desired = Duration::from_secs(
                        config.int("retention.sweep_interval").max(1) as u64 * 60,
                    );
                    if desired != cadence {
                        cadence = desired;
                        ticker = cadence_interval(cadence);
                    }
                }
                log_info!("Retention loop stopped");
            }));
        }

        Self { cancel, handles }
    }

    /// Cancel the loops and wait for them to drain. In-flight work finishes;
    /// only the waits between ticks are interrupted.
    pub async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                log_error!("Scheduler task panicked: {err}");
            }
        }
        log_info!("Scheduler stopped");
    }
}
