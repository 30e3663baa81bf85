//! Mutable state of a run, shared between the engine and the operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use filestage_core::{
    EngineConfig, EnumerationError, ErrorQueue, PathInfo, PathQueue, ProcessError, Severity,
};

use crate::control::{percent, ProcessControl, ProgressSnapshot, Stage};
use crate::rollback::RollbackLedger;
use crate::sink::{Decision, DecisionProvider, DecisionRequest, ProgressSink};

/// Byte position that a failed attempt is rewound to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProgressMark {
    written_bytes: u64,
    item_written: u64,
}

/// Everything an operation may touch while it runs: the queues, the rollback
/// ledger, progress accounting, and the log.
pub struct RunContext {
    roots: Vec<PathBuf>,
    config: EngineConfig,
    /// Paths still to be processed, in processing order.
    pub queue: PathQueue,
    /// Items that failed permanently.
    pub errors: ErrorQueue,
    /// Undo actions for the side effects of this run.
    pub ledger: RollbackLedger,
    control: Arc<ProcessControl>,
    sink: Box<dyn ProgressSink>,
    decider: Box<dyn DecisionProvider>,
    severity: Severity,
    cause: Option<ProcessError>,
    progress: ProgressSnapshot,
    item_start: u64,
    item_total: u64,
    item_written: u64,
    items_processed: usize,
    bytes_processed: u64,
}

impl RunContext {
    pub(crate) fn new(
        roots: Vec<PathBuf>,
        config: EngineConfig,
        control: Arc<ProcessControl>,
        sink: Box<dyn ProgressSink>,
        decider: Box<dyn DecisionProvider>,
    ) -> Self {
        Self {
            roots,
            config,
            queue: PathQueue::new(),
            errors: ErrorQueue::new(),
            ledger: RollbackLedger::new(),
            control,
            sink,
            decider,
            severity: Severity::None,
            cause: None,
            progress: ProgressSnapshot::default(),
            item_start: 0,
            item_total: 0,
            item_written: 0,
            items_processed: 0,
            bytes_processed: 0,
        }
    }

    pub(crate) fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub(crate) fn set_control(&mut self, control: Arc<ProcessControl>) {
        self.control = control;
    }

    pub(crate) fn set_sink(&mut self, sink: Box<dyn ProgressSink>) {
        self.sink = sink;
    }

    pub(crate) fn set_decider(&mut self, decider: Box<dyn DecisionProvider>) {
        self.decider = decider;
    }

    /// The paths the run was started with.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn control(&self) -> &Arc<ProcessControl> {
        &self.control
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Fail with [`ErrorKind::AbortedByUser`](filestage_core::ErrorKind) if
    /// the run was cancelled.
    pub fn checkpoint(&self) -> Result<(), ProcessError> {
        if self.is_cancelled() {
            return Err(ProcessError::aborted());
        }
        Ok(())
    }

    // Severity

    /// Current aggregate error state.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// The error that aborted the run, if any.
    pub fn cause(&self) -> Option<&ProcessError> {
        self.cause.as_ref()
    }

    /// Raise the aggregate to at least `severity`.
    pub fn escalate(&mut self, severity: Severity) {
        self.severity = self.severity.max(severity);
    }

    /// Lower a pessimistic escalation after a successful retry. Only done when
    /// the aggregate before the failure was still clean.
    pub(crate) fn recover(&mut self, before_failure: Severity) {
        if before_failure <= Severity::RecoveredError {
            self.severity = Severity::RecoveredError;
        }
    }

    /// Keep every change on the ledger. Leftover backups are only warned
    /// about.
    pub(crate) fn commit_changes(&mut self) {
        for (path, err) in self.ledger.commit() {
            self.warn(&format!(
                "Could not remove the backup of {}: {err}",
                path.display()
            ));
        }
    }

    pub(crate) fn settle(&mut self) {
        if self.severity < Severity::Succeeded {
            self.severity = Severity::Succeeded;
        }
    }

    pub(crate) fn set_cause(&mut self, error: ProcessError) {
        self.escalate(error.severity.max(Severity::FatalError));
        if self.cause.is_none() {
            self.cause = Some(error);
        }
    }

    /// Record a permanent failure against `target`.
    pub fn record_failure(&mut self, target: PathInfo, error: ProcessError) {
        self.escalate(error.severity);
        self.errors.push(target, error);
    }

    pub(crate) fn record_enumeration_error(&mut self, error: EnumerationError) {
        self.warn(&error.to_string());
        let target = PathInfo::directory(error.path.clone());
        self.record_failure(target, error.into());
    }

    // Log

    /// Write a line to the run log.
    pub fn log(&self, message: &str) {
        tracing::info!("{message}");
        self.sink.on_log(message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!("{message}");
        self.sink.on_log(message);
    }

    pub(crate) fn ask(&self, request: &DecisionRequest) -> Decision {
        self.decider.ask(request)
    }

    // Progress

    pub fn progress(&self) -> &ProgressSnapshot {
        &self.progress
    }

    pub fn items_processed(&self) -> usize {
        self.items_processed
    }

    /// Bytes processed in the main stage.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Reset progress for a new stage with the given totals.
    pub(crate) fn begin_stage(&mut self, stage: Stage, total_bytes: u64, total_items: usize) {
        tracing::debug!(?stage, total_bytes, total_items, "Entering stage");
        self.progress = ProgressSnapshot {
            stage,
            total_bytes,
            total_items,
            ..Default::default()
        };
        self.item_start = 0;
        self.item_total = 0;
        self.item_written = 0;
        self.publish();
    }

    pub(crate) fn begin_item(&mut self, path: &Path, bytes: u64) {
        self.item_start = self.progress.written_bytes;
        self.item_total = bytes;
        self.item_written = 0;
        self.progress.current_path = Some(path.to_path_buf());
        self.progress.current_item_percent = 0;
        self.publish();
    }

    /// Account for `bytes` just processed on the current item.
    ///
    /// This is the chunk checkpoint: in the main stage it fails once the run
    /// is cancelled. Rollback never stops here.
    pub fn advance(&mut self, bytes: u64) -> Result<(), ProcessError> {
        self.progress.written_bytes += bytes;
        self.item_written += bytes;
        self.progress.current_item_percent = percent(self.item_written, self.item_total);
        self.publish();

        if self.progress.stage == Stage::Main {
            self.checkpoint()?;
        }
        Ok(())
    }

    pub(crate) fn mark(&self) -> ProgressMark {
        ProgressMark {
            written_bytes: self.progress.written_bytes,
            item_written: self.item_written,
        }
    }

    /// Forget the bytes counted since `mark`.
    pub(crate) fn rewind(&mut self, mark: ProgressMark) {
        self.progress.written_bytes = mark.written_bytes;
        self.item_written = mark.item_written;
        self.progress.current_item_percent = percent(self.item_written, self.item_total);
        self.publish();
    }

    /// Count the current item as done. Bytes not streamed through
    /// [`advance`](Self::advance) are added in one step.
    pub(crate) fn complete_item(&mut self, succeeded: bool) {
        let item_end = self.item_start + self.item_written.max(self.item_total);
        if self.progress.stage == Stage::Main && succeeded {
            self.items_processed += 1;
            self.bytes_processed += item_end - self.item_start;
        }
        self.progress.written_bytes = self.progress.written_bytes.max(item_end);
        self.progress.done_items += 1;
        self.progress.current_item_percent = 100;
        self.publish();
    }

    fn publish(&mut self) {
        self.progress.overall_percent = self.progress.compute_overall();
        self.control.publish(&self.progress);
        self.sink.on_progress(
            self.progress.overall_percent,
            self.progress.current_item_percent,
        );
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("roots", &self.roots)
            .field("queue", &self.queue.len())
            .field("errors", &self.errors.len())
            .field("ledger", &self.ledger.len())
            .field("severity", &self.severity)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}
