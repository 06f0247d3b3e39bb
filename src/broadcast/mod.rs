//! Mass delivery of one payload to every recipient.
//!
//! - `sender`: one attempt against the gateway, classified into an outcome.
//! - `dispatcher`: admission gate, per-recipient retry/redirect loop, join.
//! - `tracker`: shared counters and throughput of a run.
//! - `reporter`: throttled live status message.
//!
//! [`Broadcaster`] ties them together and keeps track of running broadcasts
//! so they can be cancelled.

pub mod dispatcher;
pub mod reporter;
pub mod sender;
pub mod tracker;

use crate::config;
use crate::gateway::{Gateway, RecipientSource, StatusSink};
use crate::model::Payload;
use chrono::{DateTime, Utc};
use dispatcher::DispatchOptions;
use reporter::{ProgressReporter, ReportPolicy};
use sender::RateAwareSender;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, instrument};
use tracker::{FailureBreakdown, ThroughputTracker};
use uuid::Uuid;

pub use tracker::ProgressSnapshot;

/// Cooperative cancellation flag shared by every task of a run.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunHandle {
    id: Uuid,
    cancel: CancelToken,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    SourceUnavailable { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub failures: FailureBreakdown,
    /// Recipients that never reached a terminal outcome (cancelled runs only).
    pub abandoned: usize,
    pub elapsed: Duration,
    pub average_rate: f64,
    pub peak_in_flight: usize,
    pub outcome: RunOutcome,
}

impl FinalSummary {
    fn from_snapshot(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        snap: &ProgressSnapshot,
        outcome: RunOutcome,
    ) -> Self {
        let secs = snap.elapsed.as_secs_f64();
        Self {
            run_id,
            started_at,
            total: snap.total,
            success: snap.success,
            failed: snap.failed,
            failures: snap.failures,
            abandoned: snap.abandoned,
            elapsed: snap.elapsed,
            average_rate: if secs > 0.0 {
                snap.processed as f64 / secs
            } else {
                0.0
            },
            peak_in_flight: snap.peak_in_flight,
            outcome,
        }
    }

    fn aborted(run_id: Uuid, started_at: DateTime<Utc>, reason: String) -> Self {
        Self {
            run_id,
            started_at,
            total: 0,
            success: 0,
            failed: 0,
            failures: FailureBreakdown::default(),
            abandoned: 0,
            elapsed: Duration::ZERO,
            average_rate: 0.0,
            peak_in_flight: 0,
            outcome: RunOutcome::SourceUnavailable { reason },
        }
    }

    pub fn processed(&self) -> usize {
        self.success + self.failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == RunOutcome::Cancelled
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    pub concurrency: usize,
    pub max_redirects: u32,
    pub rate_window: usize,
    pub report: ReportPolicy,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            concurrency: 25,
            max_redirects: 3,
            rate_window: tracker::DEFAULT_WINDOW,
            report: ReportPolicy::default(),
        }
    }
}

impl From<&config::Broadcast> for BroadcastSettings {
    fn from(cfg: &config::Broadcast) -> Self {
        Self {
            concurrency: cfg.concurrency,
            max_redirects: cfg.max_redirects,
            rate_window: cfg.rate_window,
            report: ReportPolicy {
                min_interval: Duration::from_millis(cfg.report_interval_ms),
                steps: cfg.report_steps,
            },
        }
    }
}

/// Entry point for broadcasts and registry of the ones in progress.
pub struct Broadcaster {
    sender: RateAwareSender,
    settings: BroadcastSettings,
    runs: Mutex<HashMap<Uuid, RunHandle>>,
}

impl Broadcaster {
    pub fn new(gateway: Arc<dyn Gateway>, settings: BroadcastSettings) -> Self {
        Self {
            sender: RateAwareSender::new(gateway),
            settings,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &BroadcastSettings {
        &self.settings
    }

    /// Registers a run so it can be cancelled before and while it executes.
    pub async fn new_run(&self) -> RunHandle {
        let run = RunHandle {
            id: Uuid::new_v4(),
            cancel: CancelToken::new(),
        };
        self.runs.lock().await.insert(run.id, run.clone());
        run
    }

    /// Runs a broadcast to completion (or cancellation) and returns its
    /// summary. Recipient-level failures only show up as counters.
    #[instrument(skip_all, fields(run_id = %run.id))]
    pub async fn start_broadcast(
        &self,
        run: &RunHandle,
        source: &dyn RecipientSource,
        payload: Payload,
        concurrency: usize,
        sink: Arc<dyn StatusSink>,
    ) -> FinalSummary {
        let started_at = Utc::now();
        let recipients = match source.list_recipients().await {
            Ok(recipients) => recipients,
            Err(err) => {
                error!(%err, "cannot list recipients; broadcast aborted");
                self.runs.lock().await.remove(&run.id);
                let summary = FinalSummary::aborted(run.id, started_at, err.to_string());
                let reporter = ProgressReporter::start(sink, 0, self.settings.report).await;
                reporter.finish(&summary).await;
                return summary;
            }
        };

        let total = recipients.len();
        info!(total, concurrency, "broadcast started");
        let tracker = Arc::new(ThroughputTracker::new(total, self.settings.rate_window));
        let reporter = Arc::new(ProgressReporter::start(sink, total, self.settings.report).await);
        let opts = DispatchOptions {
            concurrency,
            max_redirects: self.settings.max_redirects,
        };

        dispatcher::dispatch(
            &self.sender,
            recipients,
            Arc::new(payload),
            opts,
            tracker.clone(),
            reporter.clone(),
            &run.cancel,
        )
        .await;

        let snap = tracker.snapshot().await;
        // a cancel that arrives after every recipient finished changes nothing
        let outcome = if snap.abandoned > 0 {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        };
        let summary = FinalSummary::from_snapshot(run.id, started_at, &snap, outcome);
        reporter.finish(&summary).await;
        self.runs.lock().await.remove(&run.id);

        info!(
            total = summary.total,
            success = summary.success,
            failed = summary.failed,
            abandoned = summary.abandoned,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            average_rate = summary.average_rate,
            outcome = ?summary.outcome,
            "broadcast finished"
        );
        summary
    }

    /// Registers and runs a broadcast with the configured concurrency.
    pub async fn broadcast(
        &self,
        source: &dyn RecipientSource,
        payload: Payload,
        sink: Arc<dyn StatusSink>,
    ) -> FinalSummary {
        let run = self.new_run().await;
        self.start_broadcast(&run, source, payload, self.settings.concurrency, sink)
            .await
    }

    pub async fn cancel_broadcast(&self, run_id: Uuid) -> bool {
        match self.runs.lock().await.get(&run_id) {
            Some(run) => {
                info!(%run_id, "broadcast cancellation requested");
                run.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) -> usize {
        let runs = self.runs.lock().await;
        for run in runs.values() {
            run.cancel();
        }
        runs.len()
    }

    pub async fn active_runs(&self) -> Vec<Uuid> {
        self.runs.lock().await.keys().copied().collect()
    }
}
