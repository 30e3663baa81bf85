//! Running an engine on a blocking worker thread.

use std::sync::Arc;

use filestage_core::ProcessError;
use tokio::task::JoinHandle;

use crate::control::{ProcessControl, ProcessState, ProgressSnapshot};
use crate::engine::ProcessEngine;
use crate::report::ProcessReport;

/// Handle to a run started with [`start_process`].
#[derive(Debug)]
pub struct ProcessHandle {
    control: Arc<ProcessControl>,
    task: JoinHandle<ProcessReport>,
}

impl ProcessHandle {
    pub fn control(&self) -> &Arc<ProcessControl> {
        &self.control
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn state(&self) -> ProcessState {
        self.control.state()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.control.snapshot()
    }

    /// Wait for the run to end and return its report.
    pub async fn join(self) -> Result<ProcessReport, ProcessError> {
        self.task
            .await
            .map_err(|err| ProcessError::unexpected(format!("Worker thread failed: {err}")))
    }
}

/// Start `engine` on tokio's blocking pool. Must be called from within a
/// runtime.
pub fn start_process(mut engine: ProcessEngine) -> ProcessHandle {
    let control = Arc::clone(engine.control());
    let task = tokio::task::spawn_blocking(move || engine.run_to_completion());
    ProcessHandle { control, task }
}
