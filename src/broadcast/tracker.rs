//! Shared accumulator of counters and delivery rate for one run.
use crate::model::{FailureKind, Terminal};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_WINDOW: usize = 100;

/// Per-kind failure counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct FailureBreakdown {
    pub blocked: usize,
    pub not_found: usize,
    pub redirect_limit: usize,
    pub unclassified: usize,
}

impl FailureBreakdown {
    fn bump(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::Blocked => self.blocked += 1,
            FailureKind::NotFound => self.not_found += 1,
            FailureKind::RedirectLimit => self.redirect_limit += 1,
            FailureKind::Unclassified => self.unclassified += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.blocked + self.not_found + self.redirect_limit + self.unclassified
    }
}

#[derive(Debug)]
struct RunState {
    total: usize,
    processed: usize,
    success: usize,
    failures: FailureBreakdown,
    abandoned: usize,
    window: VecDeque<Instant>,
    window_capacity: usize,
    started: Instant,
    in_flight: usize,
    peak_in_flight: usize,
}

impl RunState {
    fn snapshot(&self, now: Instant) -> ProgressSnapshot {
        let current_rate = match (self.window.front(), self.window.back()) {
            (Some(oldest), Some(newest)) if self.window.len() >= 2 => {
                let span = newest.duration_since(*oldest).as_secs_f64();
                if span > 0.0 {
                    (self.window.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        let elapsed = now.duration_since(self.started);
        let average_rate = if elapsed.as_secs_f64() > 0.0 {
            self.processed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        ProgressSnapshot {
            total: self.total,
            processed: self.processed,
            success: self.success,
            failed: self.failures.total(),
            failures: self.failures,
            abandoned: self.abandoned,
            in_flight: self.in_flight,
            peak_in_flight: self.peak_in_flight,
            current_rate,
            average_rate,
            elapsed,
        }
    }
}

/// Read-only view of a run at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub failures: FailureBreakdown,
    pub abandoned: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    /// Messages per second over the rolling window.
    pub current_rate: f64,
    /// Messages per second since the run started.
    pub average_rate: f64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }

    pub fn is_last(&self) -> bool {
        self.processed + self.abandoned >= self.total
    }
}

/// All fields live behind one lock; nothing reads or writes them without it.
#[derive(Debug)]
pub struct ThroughputTracker {
    state: Mutex<RunState>,
}

impl ThroughputTracker {
    pub fn new(total: usize, window_capacity: usize) -> Self {
        let window_capacity = window_capacity.max(2);
        Self {
            state: Mutex::new(RunState {
                total,
                processed: 0,
                success: 0,
                failures: FailureBreakdown::default(),
                abandoned: 0,
                window: VecDeque::with_capacity(window_capacity),
                window_capacity,
                started: Instant::now(),
                in_flight: 0,
                peak_in_flight: 0,
            }),
        }
    }

    pub async fn admit(&self) {
        let mut st = self.state.lock().await;
        st.in_flight += 1;
        st.peak_in_flight = st.peak_in_flight.max(st.in_flight);
    }

    /// Records a terminal outcome for one admitted recipient and returns the
    /// snapshot taken under the same lock.
    pub async fn record_completion(&self, outcome: Terminal) -> ProgressSnapshot {
        let now = Instant::now();
        let mut st = self.state.lock().await;
        st.processed += 1;
        match outcome {
            Terminal::Delivered => st.success += 1,
            Terminal::Failed(kind) => st.failures.bump(kind),
        }
        if st.window.len() == st.window_capacity {
            st.window.pop_front();
        }
        st.window.push_back(now);
        st.in_flight = st.in_flight.saturating_sub(1);
        st.snapshot(now)
    }

    /// Recipients that never reached a terminal outcome because the run was
    /// cancelled. `was_admitted` releases an in-flight slot as well.
    pub async fn record_abandoned(&self, count: usize, was_admitted: bool) {
        let mut st = self.state.lock().await;
        st.abandoned += count;
        if was_admitted {
            st.in_flight = st.in_flight.saturating_sub(1);
        }
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        let now = Instant::now();
        self.state.lock().await.snapshot(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn empty_tracker_reports_zero_rates() {
        let tracker = ThroughputTracker::new(10, DEFAULT_WINDOW);
        let snap = tracker.snapshot().await;
        assert_eq!(snap.processed, 0);
        assert_eq!(snap.current_rate, 0.0);
        assert_eq!(snap.average_rate, 0.0);
        assert_eq!(snap.percent(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn rates_follow_completion_timestamps() {
        let tracker = ThroughputTracker::new(10, DEFAULT_WINDOW);
        for _ in 0..5 {
            tracker.admit().await;
            tokio::time::advance(Duration::from_millis(500)).await;
            tracker.record_completion(Terminal::Delivered).await;
        }
        let snap = tracker.snapshot().await;
        assert_eq!(snap.processed, 5);
        assert_eq!(snap.success, 5);
        assert_eq!(snap.in_flight, 0);
        // 4 intervals over 2 seconds
        assert!((snap.current_rate - 2.0).abs() < 1e-9);
        // 5 items over 2.5 seconds
        assert!((snap.average_rate - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn window_evicts_oldest_timestamp() {
        let tracker = ThroughputTracker::new(10, 3);
        // slow start, then a fast burst; only the burst stays in the window
        tracker.record_completion(Terminal::Delivered).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        tracker.record_completion(Terminal::Delivered).await;
        tokio::time::advance(Duration::from_millis(100)).await;
        tracker.record_completion(Terminal::Delivered).await;
        tokio::time::advance(Duration::from_millis(100)).await;
        let snap = tracker.record_completion(Terminal::Delivered).await;
        assert!((snap.current_rate - 10.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_bucketed_and_peak_tracked() {
        let tracker = ThroughputTracker::new(4, DEFAULT_WINDOW);
        tracker.admit().await;
        tracker.admit().await;
        tracker.admit().await;
        tracker
            .record_completion(Terminal::Failed(FailureKind::Blocked))
            .await;
        tracker
            .record_completion(Terminal::Failed(FailureKind::Unclassified))
            .await;
        tracker.record_completion(Terminal::Delivered).await;
        tracker.record_abandoned(1, false).await;
        let snap = tracker.snapshot().await;
        assert_eq!(snap.peak_in_flight, 3);
        assert_eq!(snap.failed, 2);
        assert_eq!(snap.failures.blocked, 1);
        assert_eq!(snap.failures.unclassified, 1);
        assert_eq!(snap.processed, snap.success + snap.failed);
        assert!(snap.is_last());
    }
}
