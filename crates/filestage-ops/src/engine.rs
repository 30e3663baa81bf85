//! The process engine: drives one operation through load, check, execute,
//! finish, and extra work, and rolls back on abort.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use filestage_core::{EngineConfig, PathInfo, ProcessError, Severity};

use crate::classify::classify_io;
use crate::context::RunContext;
use crate::control::{ProcessControl, ProcessState, Stage};
use crate::operation::{failure_target, CustomAction, Operation};
use crate::report::{OperationOutput, ProcessReport};
use crate::retry::{run_with_retry, RetryOutcome};
use crate::sink::{
    CompletionSink, Decision, DecisionProvider, FixedDecision, ProgressSink, TracingSink,
};

/// Result of one call to [`ProcessEngine::run`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Stopped at an item boundary; call `run` again to continue.
    Paused,
    /// Reached `Completed` or `Aborted`.
    Finished(ProcessReport),
}

enum ExecuteStep {
    Drained,
    Paused,
    Aborted(ProcessError),
}

/// Runs a single operation over a set of roots.
///
/// The engine is driven on one worker thread. Other threads interact with it
/// only through the shared [`ProcessControl`].
pub struct ProcessEngine {
    operation: Box<dyn Operation>,
    extra_work: Vec<Box<dyn CustomAction>>,
    ctx: RunContext,
    completion: Box<dyn CompletionSink>,
    state: ProcessState,
    main_stage_started: bool,
    started_at: Option<DateTime<Utc>>,
    report: Option<ProcessReport>,
}

impl ProcessEngine {
    /// Create an engine with the default configuration, logging sinks and a
    /// provider that skips every failing item.
    pub fn new(operation: Box<dyn Operation>, roots: Vec<PathBuf>) -> Self {
        Self {
            operation,
            extra_work: Vec::new(),
            ctx: RunContext::new(
                roots,
                EngineConfig::default(),
                Arc::new(ProcessControl::new()),
                Box::new(TracingSink),
                Box::new(FixedDecision(Decision::Skip)),
            ),
            completion: Box::new(TracingSink),
            state: ProcessState::Idle,
            main_stage_started: false,
            started_at: None,
            report: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.ctx.set_config(config);
        self
    }

    /// Share a control created by the caller, e.g. to cancel from a signal
    /// handler.
    pub fn with_control(mut self, control: Arc<ProcessControl>) -> Self {
        self.ctx.set_control(control);
        self
    }

    pub fn with_decider(mut self, decider: impl DecisionProvider + 'static) -> Self {
        self.ctx.set_decider(Box::new(decider));
        self
    }

    pub fn with_progress_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.ctx.set_sink(Box::new(sink));
        self
    }

    pub fn with_completion_sink(mut self, sink: impl CompletionSink + 'static) -> Self {
        self.completion = Box::new(sink);
        self
    }

    /// Append work to run after the operation finished.
    pub fn with_extra_work(mut self, action: impl CustomAction + 'static) -> Self {
        self.extra_work.push(Box::new(action));
        self
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn severity(&self) -> Severity {
        self.ctx.severity()
    }

    pub fn control(&self) -> &Arc<ProcessControl> {
        self.ctx.control()
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Advance the run until it pauses or reaches a terminal state.
    ///
    /// Calling `run` again after a pause resumes with the next queued item.
    /// Calling it on a finished engine returns the same report again.
    pub fn run(&mut self) -> RunOutcome {
        loop {
            match self.state {
                ProcessState::Idle => {
                    self.started_at = Some(Utc::now());
                    self.transition(ProcessState::LoadingPaths);
                }
                ProcessState::LoadingPaths => {
                    let loaded = self
                        .ctx
                        .checkpoint()
                        .and_then(|()| self.operation.load(&mut self.ctx));
                    match loaded {
                        Ok(()) => {
                            self.ctx.log(&format!(
                                "Loaded {} item(s), {} byte(s)",
                                self.ctx.queue.len(),
                                self.ctx.queue.total_bytes()
                            ));
                            self.transition(ProcessState::Checking);
                        }
                        Err(err) => self.abort(err),
                    }
                }
                ProcessState::Checking => {
                    let checked = self
                        .ctx
                        .checkpoint()
                        .and_then(|()| self.operation.check(&mut self.ctx));
                    match checked {
                        Ok(()) => self.transition(ProcessState::Executing),
                        Err(err) => self.abort(err),
                    }
                }
                ProcessState::Executing | ProcessState::Paused => match self.execute() {
                    ExecuteStep::Drained => self.complete(),
                    ExecuteStep::Paused => {
                        self.transition(ProcessState::Paused);
                        self.ctx.log("Paused");
                        return RunOutcome::Paused;
                    }
                    ExecuteStep::Aborted(err) => self.abort(err),
                },
                ProcessState::Completed | ProcessState::Aborted => {
                    if let Some(report) = &self.report {
                        return RunOutcome::Finished(report.clone());
                    }
                    return RunOutcome::Finished(self.build_report());
                }
            }
        }
    }

    /// Run to the end, blocking through pauses until resumed or cancelled.
    pub fn run_to_completion(&mut self) -> ProcessReport {
        loop {
            match self.run() {
                RunOutcome::Finished(report) => return report,
                RunOutcome::Paused => {
                    self.ctx.control().wait_while_paused();
                }
            }
        }
    }

    fn transition(&mut self, state: ProcessState) {
        tracing::debug!(from = ?self.state, to = ?state, "State transition");
        self.state = state;
        self.ctx.control().set_state(state);
    }

    fn execute(&mut self) -> ExecuteStep {
        if !self.main_stage_started {
            self.main_stage_started = true;
            let total_bytes = self.ctx.queue.total_bytes();
            let total_items = self.ctx.queue.len();
            self.ctx.begin_stage(Stage::Main, total_bytes, total_items);
        }
        if self.state == ProcessState::Paused && !self.ctx.control().is_paused() {
            self.ctx.log("Resumed");
        }
        self.transition(ProcessState::Executing);

        let caption = self.operation.kind().to_string();
        loop {
            if self.ctx.is_cancelled() {
                return ExecuteStep::Aborted(ProcessError::aborted());
            }
            if self.ctx.control().is_paused() {
                return ExecuteStep::Paused;
            }
            let Some(item) = self.ctx.queue.peek().cloned() else {
                return ExecuteStep::Drained;
            };

            self.ctx.begin_item(item.path(), item.byte_len());
            let operation = &mut self.operation;
            let outcome = run_with_retry(&mut self.ctx, &caption, |ctx| {
                operation.execute_item(&item, ctx)
            });
            self.ctx.queue.pop();

            match outcome {
                RetryOutcome::Completed(()) => self.ctx.complete_item(true),
                RetryOutcome::Skipped(err) => {
                    let err = err.with_severity(Severity::NotRecoveredError);
                    self.ctx.record_failure(item.clone(), err);
                    self.operation.discard_item(&item, &mut self.ctx);
                    self.ctx.complete_item(false);
                }
                RetryOutcome::Aborted(err) => {
                    self.ctx.record_failure(item, err.clone());
                    return ExecuteStep::Aborted(err);
                }
            }
        }
    }

    fn complete(&mut self) {
        let caption = format!("Finish {}", self.operation.kind());
        let operation = &mut self.operation;
        match run_with_retry(&mut self.ctx, &caption, |ctx| operation.finish(ctx)) {
            RetryOutcome::Completed(()) => {}
            RetryOutcome::Skipped(err) => {
                let err = err.with_severity(Severity::NotRecoveredError);
                self.operation.finish_skipped(err, &mut self.ctx);
            }
            RetryOutcome::Aborted(err) => return self.abort(err),
        }

        if !self.extra_work.is_empty() {
            self.ctx
                .begin_stage(Stage::ExtraWork, 0, self.extra_work.len());
        }
        for index in 0..self.extra_work.len() {
            if self.ctx.is_cancelled() {
                return self.abort(ProcessError::aborted());
            }
            let action = &mut self.extra_work[index];
            let name = action.name().to_string();
            self.ctx.log(&format!("Entering extra work: {name}"));
            self.ctx.begin_item(&PathBuf::from(&name), 0);

            let outcome = run_with_retry(&mut self.ctx, &name, |ctx| action.run(ctx));
            self.ctx.log(&format!("Leaving extra work: {name}"));
            match outcome {
                RetryOutcome::Completed(()) => self.ctx.complete_item(true),
                RetryOutcome::Skipped(err) => {
                    let err = err.with_severity(Severity::NotRecoveredError);
                    self.ctx.record_failure(failure_target(&err), err);
                    self.ctx.complete_item(false);
                }
                RetryOutcome::Aborted(err) => return self.abort(err),
            }
        }

        self.ctx.commit_changes();
        self.ctx.settle();
        self.transition(ProcessState::Completed);
        self.finish_run();
    }

    fn abort(&mut self, err: ProcessError) {
        self.ctx.warn(&format!("Aborting: {err}"));
        self.ctx.set_cause(err);
        self.transition(ProcessState::Aborted);
        self.ctx.queue.clear();
        self.operation.on_abort(&mut self.ctx);
        self.rollback();
        self.finish_run();
    }

    fn rollback(&mut self) {
        if self.ctx.ledger.is_empty() {
            return;
        }
        let total_bytes = self.ctx.ledger.total_bytes();
        let total_items = self.ctx.ledger.len();
        self.ctx.begin_stage(Stage::Rollback, total_bytes, total_items);
        self.ctx
            .log(&format!("Rolling back {total_items} change(s)"));

        while let Some(mut entry) = self.ctx.ledger.pop() {
            self.ctx.begin_item(entry.path(), entry.bytes());
            let caption = entry.label().to_string();
            let outcome = run_with_retry(&mut self.ctx, &caption, |_| {
                entry
                    .undo()
                    .map_err(|err| classify_io(entry.path(), &err))
            });

            match outcome {
                RetryOutcome::Completed(()) => self.ctx.complete_item(true),
                RetryOutcome::Skipped(err) => {
                    self.undo_failed(entry.target().clone(), err);
                    self.ctx.complete_item(false);
                }
                RetryOutcome::Aborted(err) => {
                    self.undo_failed(entry.target().clone(), err);
                    let left = self.ctx.ledger.len();
                    if left > 0 {
                        self.ctx
                            .warn(&format!("Rollback stopped, {left} change(s) left in place"));
                    }
                    self.ctx.ledger.clear();
                    return;
                }
            }
        }
    }

    fn undo_failed(&mut self, target: PathInfo, err: ProcessError) {
        let err = err.with_severity(Severity::SuperFatalError);
        self.ctx.warn(&format!("Rollback failed: {err}"));
        self.ctx.record_failure(target, err);
    }

    fn finish_run(&mut self) {
        let report = self.build_report();
        self.ctx.log(&report.summary());
        self.completion.on_completed(&report);
        self.report = Some(report);
    }

    fn build_report(&mut self) -> ProcessReport {
        let output = if self.state == ProcessState::Completed {
            self.operation.output()
        } else {
            OperationOutput::None
        };
        let finished_at = Utc::now();
        ProcessReport {
            kind: self.operation.kind(),
            state: self.state,
            final_error: self.ctx.severity(),
            cause: self.ctx.cause().cloned(),
            errors: self.ctx.errors.iter().cloned().collect(),
            items_processed: self.ctx.items_processed(),
            bytes_processed: self.ctx.bytes_processed(),
            started_at: self.started_at.unwrap_or(finished_at),
            finished_at,
            output,
        }
    }
}

impl std::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("kind", &self.operation.kind())
            .field("state", &self.state)
            .field("extra_work", &self.extra_work.len())
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}
