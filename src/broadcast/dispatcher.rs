use super::reporter::ProgressReporter;
use super::sender::RateAwareSender;
use super::tracker::ThroughputTracker;
use super::CancelToken;
use crate::model::{DeliveryOutcome, FailureKind, Payload, Recipient, Terminal};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub concurrency: usize,
    pub max_redirects: u32,
}

/// Delivers `payload` to every recipient with at most `concurrency` of them
/// in flight, and returns once each admitted recipient reached a terminal
/// outcome. Recipients not admitted before cancellation are counted as
/// abandoned.
pub async fn dispatch(
    sender: &RateAwareSender,
    recipients: Vec<Recipient>,
    payload: Arc<Payload>,
    opts: DispatchOptions,
    tracker: Arc<ThroughputTracker>,
    reporter: Arc<ProgressReporter>,
    cancel: &CancelToken,
) {
    let total = recipients.len();
    let gate = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut admitted = 0usize;

    for to in recipients {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = gate.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        if cancel.is_cancelled() {
            break;
        }
        admitted += 1;
        tracker.admit().await;

        let sender = sender.clone();
        let payload = payload.clone();
        let tracker = tracker.clone();
        let reporter = reporter.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            match resolve(&sender, to, &payload, opts.max_redirects, &cancel).await {
                Some(terminal) => {
                    let snap = tracker.record_completion(terminal).await;
                    drop(permit);
                    reporter.maybe_report(&snap).await;
                }
                None => {
                    tracker.record_abandoned(1, true).await;
                    drop(permit);
                }
            }
        });
        reap(&mut tasks);
    }

    if admitted < total {
        debug!(skipped = total - admitted, "run cancelled before all recipients were admitted");
        tracker.record_abandoned(total - admitted, false).await;
    }

    while let Some(res) = tasks.join_next().await {
        if let Err(err) = res {
            error!(?err, "recipient task failed");
        }
    }
}

/// Collects recipient tasks that already finished so the set only holds
/// the ones still running.
fn reap(tasks: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(res) = tasks.try_join_next() {
        if let Err(err) = res {
            error!(?err, "recipient task failed");
        }
        reaped += 1;
    }
    reaped
}

/// Drives one recipient to a terminal outcome. Returns `None` when the run
/// is cancelled before the chain finishes.
pub async fn resolve(
    sender: &RateAwareSender,
    recipient: Recipient,
    payload: &Payload,
    max_redirects: u32,
    cancel: &CancelToken,
) -> Option<Terminal> {
    let mut to = recipient;
    let mut redirects = 0u32;
    loop {
        match sender.send(to, payload).await {
            DeliveryOutcome::Delivered => return Some(Terminal::Delivered),
            DeliveryOutcome::PermanentlyFailed { kind, .. } => return Some(Terminal::Failed(kind)),
            DeliveryOutcome::Retryable { wait } => {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => return None,
                }
            }
            DeliveryOutcome::Redirected { new_recipient } => {
                redirects += 1;
                if redirects > max_redirects {
                    warn!(%recipient, redirects, "redirect chain too long; giving up");
                    return Some(Terminal::Failed(FailureKind::RedirectLimit));
                }
                to = new_recipient;
            }
        }
        if cancel.is_cancelled() {
            return None;
        }
    }
}
