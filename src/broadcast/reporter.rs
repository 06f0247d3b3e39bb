use super::tracker::ProgressSnapshot;
use super::FinalSummary;
use crate::gateway::{StatusHandle, StatusSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

const BAR_CELLS: usize = 10;

/// When to push a progress update.
#[derive(Debug, Clone, Copy)]
pub struct ReportPolicy {
    pub min_interval: Duration,
    /// The cadence is `max(1, total / steps)` processed items.
    pub steps: usize,
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            steps: 20,
        }
    }
}

impl ReportPolicy {
    pub fn step_for(&self, total: usize) -> usize {
        (total / self.steps.max(1)).max(1)
    }
}

#[derive(Debug)]
struct Cadence {
    last_push: Instant,
    last_processed: usize,
}

/// Throttled writer of the live status message.
///
/// The decision to push is made under a short lock; the push itself runs
/// outside of it and outside the tracker lock. Sink failures are logged and
/// dropped.
pub struct ProgressReporter {
    sink: Arc<dyn StatusSink>,
    handle: Option<StatusHandle>,
    policy: ReportPolicy,
    step: usize,
    cadence: Mutex<Cadence>,
}

impl ProgressReporter {
    /// Creates the status message. A sink that cannot create one leaves the
    /// reporter silent for the rest of the run.
    pub async fn start(sink: Arc<dyn StatusSink>, total: usize, policy: ReportPolicy) -> Self {
        let handle = match sink.create_status(&render_initial(total)).await {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(%err, "failed to create status message; progress will not be shown");
                None
            }
        };
        Self {
            sink,
            handle,
            policy,
            step: policy.step_for(total),
            cadence: Mutex::new(Cadence {
                last_push: Instant::now(),
                last_processed: 0,
            }),
        }
    }

    async fn should_report(&self, snap: &ProgressSnapshot) -> bool {
        let now = Instant::now();
        let mut cadence = self.cadence.lock().await;
        let due = snap.processed == snap.total
            || snap.processed >= cadence.last_processed + self.step
            || now.duration_since(cadence.last_push) >= self.policy.min_interval;
        if !due || snap.processed <= cadence.last_processed {
            return false;
        }
        cadence.last_processed = snap.processed;
        cadence.last_push = now;
        true
    }

    /// Pushes `snap` if the throttling policy allows it. Returns whether an
    /// update was attempted.
    pub async fn maybe_report(&self, snap: &ProgressSnapshot) -> bool {
        let Some(handle) = &self.handle else {
            return false;
        };
        if !self.should_report(snap).await {
            return false;
        }
        if let Err(err) = self.sink.update_status(handle, &render_progress(snap)).await {
            warn!(%err, processed = snap.processed, "failed to update status message");
        }
        true
    }

    /// Unconditional closing update.
    pub async fn finish(&self, summary: &FinalSummary) {
        let Some(handle) = &self.handle else {
            return;
        };
        if let Err(err) = self.sink.update_status(handle, &render_summary(summary)).await {
            warn!(%err, "failed to write final status");
        }
    }
}

fn progress_bar(percent: f64) -> String {
    let filled = ((percent / 100.0) * BAR_CELLS as f64).floor() as usize;
    let filled = filled.min(BAR_CELLS);
    format!("{}{}", "🟩".repeat(filled), "⬜".repeat(BAR_CELLS - filled))
}

pub fn render_initial(total: usize) -> String {
    format!(
        "<b>📢 Broadcast status:</b>\n\n\
         Progress: <code>{}</code> <b>0%</b>\n\
         Processed: <b>0</b>/<b>{}</b>\n\
         ✅ Delivered: <b>0</b>\n\
         ⚡ Active tasks: <b>0</b>\n\
         📊 Rate: <b>0.0</b> msg/s (<b>0.0</b> msg/min)\n\
         📉 Average rate: <b>0.0</b> msg/s (<b>0.0</b> msg/min)",
        progress_bar(0.0),
        total
    )
}

pub fn render_progress(snap: &ProgressSnapshot) -> String {
    let percent = snap.percent();
    format!(
        "<b>📢 Broadcast status:</b>\n\n\
         Progress: <code>{}</code> <b>{:.1}%</b>\n\
         Processed: <b>{}</b>/<b>{}</b>\n\
         ✅ Delivered: <b>{}</b>\n\
         ⚡ Active tasks: <b>{}</b>\n\
         📊 Rate: <b>{:.1}</b> msg/s (<b>{:.1}</b> msg/min)\n\
         📉 Average rate: <b>{:.1}</b> msg/s (<b>{:.1}</b> msg/min)",
        progress_bar(percent),
        percent,
        snap.processed,
        snap.total,
        snap.success,
        snap.in_flight,
        snap.current_rate,
        snap.current_rate * 60.0,
        snap.average_rate,
        snap.average_rate * 60.0,
    )
}

pub fn render_summary(summary: &FinalSummary) -> String {
    let header = match &summary.outcome {
        super::RunOutcome::Completed => "<b>✅ Broadcast finished!</b>".to_string(),
        super::RunOutcome::Cancelled => "<b>⛔ Broadcast cancelled.</b>".to_string(),
        super::RunOutcome::SourceUnavailable { reason } => format!(
            "<b>❌ Broadcast aborted:</b> recipient list unavailable ({})",
            crate::format::escape(reason)
        ),
    };
    let delivered_pct = if summary.total > 0 {
        summary.success as f64 * 100.0 / summary.total as f64
    } else {
        0.0
    };
    let mut out = format!(
        "{header}\n\n\
         📨 Delivered: <b>{}</b>/<b>{}</b> (<b>{:.1}%</b>)\n\
         🚫 Failed: <b>{}</b>\n\
         ⏳ Elapsed: <b>{:.1}</b> s\n\
         🚀 Average rate: <b>{:.1}</b> msg/s (<b>{:.1}</b> msg/min)",
        summary.success,
        summary.total,
        delivered_pct,
        summary.failed,
        summary.elapsed.as_secs_f64(),
        summary.average_rate,
        summary.average_rate * 60.0,
    );
    if summary.abandoned > 0 {
        out.push_str(&format!("\n⏸ Not sent: <b>{}</b>", summary.abandoned));
    }
    out
}
