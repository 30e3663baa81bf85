//! Thread-safe control surface of a run.
//!
//! The worker owns the engine; every other thread talks to it through a shared
//! [`ProcessControl`]: cancel, pause, resume, and read the latest progress
//! snapshot and lifecycle state.

use std::path::PathBuf;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    #[default]
    Idle,
    LoadingPaths,
    Checking,
    Executing,
    Paused,
    Completed,
    Aborted,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Which piece of work progress currently refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    Main,
    ExtraWork,
    Rollback,
}

/// Point-in-time view of a run's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stage: Stage,
    pub total_bytes: u64,
    pub written_bytes: u64,
    pub total_items: usize,
    pub done_items: usize,
    pub current_item_percent: u8,
    pub overall_percent: u8,
    pub current_path: Option<PathBuf>,
}

impl ProgressSnapshot {
    /// Overall percentage: by bytes when the stage has a byte total, by item
    /// count otherwise. A stage with nothing to do is complete.
    pub fn compute_overall(&self) -> u8 {
        if self.total_bytes > 0 {
            percent(self.written_bytes, self.total_bytes)
        } else if self.total_items > 0 {
            percent(self.done_items as u64, self.total_items as u64)
        } else {
            100
        }
    }
}

pub(crate) fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (done.min(total) as u128 * 100 / total as u128) as u8
}

const PAUSE_POLL: Duration = Duration::from_millis(50);

/// Shared handle to cancel, pause, and observe a run.
#[derive(Debug, Default)]
pub struct ProcessControl {
    cancel: CancellationToken,
    paused: Mutex<bool>,
    resumed: Condvar,
    snapshot: Mutex<ProgressSnapshot>,
    state: Mutex<ProcessState>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Also wakes a paused worker.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.resumed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ask the worker to stop at the next item boundary.
    pub fn pause(&self) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn resume(&self) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until resumed or cancelled. Returns `false` if cancelled.
    pub fn wait_while_paused(&self) -> bool {
        let mut paused = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        while *paused && !self.is_cancelled() {
            // Time out regularly: cancel does not take the pause lock
            paused = self
                .resumed
                .wait_timeout(paused, PAUSE_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        !self.is_cancelled()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, snapshot: &ProgressSnapshot) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_percent_by_bytes_then_items() {
        let mut snapshot = ProgressSnapshot {
            total_bytes: 200,
            written_bytes: 50,
            total_items: 4,
            done_items: 3,
            ..Default::default()
        };
        assert_eq!(snapshot.compute_overall(), 25);

        snapshot.total_bytes = 0;
        assert_eq!(snapshot.compute_overall(), 75);

        snapshot.total_items = 0;
        assert_eq!(snapshot.compute_overall(), 100);
    }

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(percent(150, 100), 100);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
        assert_eq!(percent(1, 0), 0);
    }

    #[test]
    fn test_cancel_wakes_paused_waiter() {
        let control = Arc::new(ProcessControl::new());
        control.pause();

        let waiter = {
            let control = Arc::clone(&control);
            std::thread::spawn(move || control.wait_while_paused())
        };
        control.cancel();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_resume_releases_waiter() {
        let control = Arc::new(ProcessControl::new());
        control.pause();
        assert!(control.is_paused());

        let waiter = {
            let control = Arc::clone(&control);
            std::thread::spawn(move || control.wait_while_paused())
        };
        control.resume();
        assert!(waiter.join().unwrap());
        assert!(!control.is_paused());
    }
}
