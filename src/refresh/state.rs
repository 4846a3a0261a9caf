use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::error;

pub const BUSY_MESSAGE: &str = "Refresh already in progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPhase {
    Idle,
    FetchingEvents,
    RunningModels,
    Done,
    Error,
}

/// Point-in-time view of the refresh progress, as served to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub is_running: bool,
    pub phase: RefreshPhase,
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Debug)]
struct Detail {
    phase: RefreshPhase,
    started_at: Option<DateTime<Utc>>,
    message: String,
}

/// Shared progress record for the single in-flight refresh.
///
/// `running` is the mutual-exclusion gate: it is claimed with a
/// compare-and-swap in [`RefreshState::try_begin`] and released only when
/// the returned [`RunGuard`] drops. `phase` may rest at `Done` or `Error`
/// long after the gate has been released.
#[derive(Debug)]
pub struct RefreshState {
    running: AtomicBool,
    total: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    detail: Mutex<Detail>,
}

/// Holds the refresh gate; dropping it lets the next refresh start.
#[derive(Debug)]
pub struct RunGuard {
    state: Arc<RefreshState>,
}

/// Message left behind when a refresh ends without reaching a final phase
pub const ABORTED_MESSAGE: &str = "Error: refresh aborted unexpectedly";

impl Drop for RunGuard {
    fn drop(&mut self) {
        {
            let mut detail = self.state.detail.lock();
            if !matches!(detail.phase, RefreshPhase::Done | RefreshPhase::Error) {
                error!("Refresh ended in phase {:?} without settling", detail.phase);
                detail.phase = RefreshPhase::Error;
                detail.message = ABORTED_MESSAGE.to_string();
            }
        }
        self.state.running.store(false, Ordering::Release);
    }
}

impl RefreshState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            detail: Mutex::new(Detail {
                phase: RefreshPhase::Idle,
                started_at: None,
                message: "Ready".to_string(),
            }),
        }
    }

    /// Claim the gate and reset progress, or `None` if a refresh is running.
    pub fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        self.total.store(0, Ordering::Release);
        self.completed.store(0, Ordering::Release);
        self.errors.store(0, Ordering::Release);
        {
            let mut detail = self.detail.lock();
            detail.phase = RefreshPhase::FetchingEvents;
            detail.started_at = Some(Utc::now());
            detail.message = "Starting...".to_string();
        }

        Some(RunGuard { state: Arc::clone(self) })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_phase(&self, phase: RefreshPhase, message: impl Into<String>) {
        let mut detail = self.detail.lock();
        detail.phase = phase;
        detail.message = message.into();
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Release);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> RefreshStatus {
        let detail = self.detail.lock();
        RefreshStatus {
            is_running: self.is_running(),
            phase: detail.phase,
            total: self.total.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
            started_at: detail.started_at,
            message: detail.message.clone(),
        }
    }

    /// Snapshot returned to a caller whose refresh request was refused
    pub fn busy_snapshot(&self) -> RefreshStatus {
        RefreshStatus {
            message: BUSY_MESSAGE.to_string(),
            ..self.snapshot()
        }
    }
}

impl Default for RefreshState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot() {
        let state = RefreshState::new();
        let status = state.snapshot();

        assert!(!status.is_running);
        assert_eq!(status.phase, RefreshPhase::Idle);
        assert_eq!(status.message, "Ready");
        assert!(status.started_at.is_none());
    }

    #[test]
    fn test_gate_admits_one_run() {
        let state = Arc::new(RefreshState::new());

        let guard = state.try_begin().unwrap();
        assert!(state.try_begin().is_none());
        assert!(state.snapshot().is_running);

        drop(guard);
        assert!(!state.is_running());
        assert!(state.try_begin().is_some());
    }

    #[test]
    fn test_begin_resets_counters() {
        let state = Arc::new(RefreshState::new());
        {
            let _guard = state.try_begin().unwrap();
            state.set_total(4);
            state.record_completed();
            state.record_completed();
            state.record_error();
            state.set_phase(RefreshPhase::Done, "Complete!");
        }

        let resting = state.snapshot();
        assert!(!resting.is_running);
        assert_eq!(resting.phase, RefreshPhase::Done);
        assert_eq!((resting.total, resting.completed, resting.errors), (4, 2, 1));

        let _guard = state.try_begin().unwrap();
        let status = state.snapshot();
        assert_eq!(status.phase, RefreshPhase::FetchingEvents);
        assert_eq!((status.total, status.completed, status.errors), (0, 0, 0));
        assert_eq!(status.message, "Starting...");
        assert!(status.started_at.is_some());
    }

    #[test]
    fn test_unsettled_guard_drop_marks_error() {
        let state = Arc::new(RefreshState::new());
        let guard = state.try_begin().unwrap();
        state.set_total(3);
        state.record_completed();
        state.set_phase(RefreshPhase::RunningModels, "Running 3 estimates...");

        drop(guard);

        let status = state.snapshot();
        assert!(!status.is_running);
        assert_eq!(status.phase, RefreshPhase::Error);
        assert_eq!(status.message, ABORTED_MESSAGE);
        assert_eq!((status.total, status.completed), (3, 1));
    }

    #[test]
    fn test_busy_snapshot_keeps_progress() {
        let state = Arc::new(RefreshState::new());
        let _guard = state.try_begin().unwrap();
        state.set_total(10);
        state.record_completed();

        let busy = state.busy_snapshot();
        assert!(busy.is_running);
        assert_eq!(busy.message, BUSY_MESSAGE);
        assert_eq!(busy.completed, 1);
        assert_eq!(busy.total, 10);
    }

    #[test]
    fn test_concurrent_claims_admit_exactly_one() {
        let state = Arc::new(RefreshState::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || state.try_begin().map(std::mem::forget).is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(state.is_running());
    }

    #[test]
    fn test_status_serializes_like_the_api() {
        let state = RefreshState::new();
        let json = serde_json::to_value(state.snapshot()).unwrap();

        assert_eq!(json["isRunning"], false);
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["startedAt"], serde_json::Value::Null);
        assert_eq!(serde_json::to_value(RefreshPhase::FetchingEvents).unwrap(), "fetching-events");
        assert_eq!(serde_json::to_value(RefreshPhase::RunningModels).unwrap(), "running-models");
    }
}
