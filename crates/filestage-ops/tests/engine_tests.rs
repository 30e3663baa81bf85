use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use filestage_core::EngineConfig;
use filestage_ops::{
    start_process, ChannelDecider, ChannelSink, Decision, DecisionProvider, DecisionRequest,
    ErrorKind, FixedDecision, FnAction, Operation, OperationKind, PathInfo, ProcessControl,
    ProcessError, ProcessEvent, ProcessState, RollbackEntry, RunContext, RunOutcome, Severity,
};
use filestage_scan::TraversalOrder;

const ITEM_BYTES: u64 = 10;

/// Processes virtual items, failing on demand and recording an undo per item.
struct ScriptedOperation {
    names: Vec<String>,
    failures: HashMap<String, VecDeque<ErrorKind>>,
    processed: Arc<Mutex<Vec<String>>>,
    undone: Arc<Mutex<Vec<String>>>,
    broken_undo: Option<String>,
}

impl ScriptedOperation {
    fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            failures: HashMap::new(),
            processed: Arc::default(),
            undone: Arc::default(),
            broken_undo: None,
        }
    }

    /// Fail the next attempts on `name` with the given kinds, in order.
    fn failing(mut self, name: &str, kinds: &[ErrorKind]) -> Self {
        self.failures
            .insert(name.to_string(), kinds.iter().copied().collect());
        self
    }

    fn with_broken_undo(mut self, name: &str) -> Self {
        self.broken_undo = Some(name.to_string());
        self
    }
}

impl Operation for ScriptedOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Copy
    }

    fn traversal_order(&self) -> TraversalOrder {
        TraversalOrder::ParentFirst
    }

    fn load(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        for name in &self.names {
            ctx.queue
                .push(PathInfo::file(format!("/virtual/{name}"), ITEM_BYTES));
        }
        Ok(())
    }

    fn execute_item(&mut self, item: &PathInfo, ctx: &mut RunContext) -> Result<(), ProcessError> {
        let name = item.file_name();

        // Half the item is written before a failure
        ctx.advance(ITEM_BYTES / 2)?;
        if let Some(kind) = self.failures.get_mut(&name).and_then(VecDeque::pop_front) {
            return Err(ProcessError::new(kind, format!("{name} failed")).with_path(item.path()));
        }
        ctx.advance(ITEM_BYTES / 2)?;

        self.processed.lock().unwrap().push(name.clone());
        let undone = Arc::clone(&self.undone);
        let broken = self.broken_undo.as_deref() == Some(name.as_str());
        let label = format!("u-{name}");
        ctx.ledger.push(RollbackEntry::new(label.clone(), item.clone(), move || {
            if broken {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            undone.lock().unwrap().push(label.clone());
            Ok(())
        }));
        Ok(())
    }
}

/// Answers from a script, then with a fallback.
struct ScriptedDecider {
    answers: Mutex<VecDeque<Decision>>,
    fallback: Decision,
    asked: Arc<AtomicUsize>,
}

impl ScriptedDecider {
    fn new(answers: &[Decision], fallback: Decision) -> (Self, Arc<AtomicUsize>) {
        let asked = Arc::new(AtomicUsize::new(0));
        let decider = Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            fallback,
            asked: Arc::clone(&asked),
        };
        (decider, asked)
    }
}

impl DecisionProvider for ScriptedDecider {
    fn ask(&self, _request: &DecisionRequest) -> Decision {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

fn engine(op: ScriptedOperation) -> filestage_ops::ProcessEngine {
    filestage_ops::ProcessEngine::new(Box::new(op), vec![PathBuf::from("/virtual")])
}

fn finished(outcome: RunOutcome) -> filestage_ops::ProcessReport {
    match outcome {
        RunOutcome::Finished(report) => report,
        RunOutcome::Paused => panic!("run paused unexpectedly"),
    }
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProcessEvent>) -> Vec<ProcessEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_clean_run_reaches_full_progress() {
    let (sink, mut rx) = ChannelSink::new();
    let op = ScriptedOperation::new(&["a", "b", "c"]);
    let processed = Arc::clone(&op.processed);

    let mut engine = engine(op)
        .with_progress_sink(sink.clone())
        .with_completion_sink(sink);
    let report = finished(engine.run());

    assert_eq!(report.state, ProcessState::Completed);
    assert_eq!(report.final_error, Severity::Succeeded);
    assert_eq!(report.items_processed, 3);
    assert_eq!(report.bytes_processed, 3 * ITEM_BYTES);
    assert!(report.errors.is_empty());
    assert_eq!(*processed.lock().unwrap(), vec!["a", "b", "c"]);

    let events = drain(&mut rx);
    let last_progress = events
        .iter()
        .rev()
        .find_map(|e| match e {
            ProcessEvent::Progress {
                overall_percent, ..
            } => Some(*overall_percent),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_progress, 100);
    assert!(matches!(events.last(), Some(ProcessEvent::Completed(_))));
    assert_eq!(engine.control().snapshot().overall_percent, 100);
}

#[test]
fn test_skip_always_records_failures_and_continues() {
    let op = ScriptedOperation::new(&["a", "b", "c"]).failing("b", &[ErrorKind::AccessDenied]);
    let processed = Arc::clone(&op.processed);

    let mut engine = engine(op).with_decider(FixedDecision(Decision::Skip));
    let report = finished(engine.run());

    assert_eq!(report.state, ProcessState::Completed);
    assert_eq!(report.final_error, Severity::NotRecoveredError);
    assert_eq!(*processed.lock().unwrap(), vec!["a", "c"]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path.file_name(), "b");
    assert_eq!(report.errors[0].error.severity, Severity::NotRecoveredError);
    assert_eq!(report.items_processed, 2);
    assert_eq!(engine.control().snapshot().overall_percent, 100);
}

#[test]
fn test_cancel_all_unwinds_ledger_newest_first() {
    let op = ScriptedOperation::new(&["1", "2", "3", "4"])
        .failing("4", &[ErrorKind::SharingViolation]);
    let undone = Arc::clone(&op.undone);

    let mut engine = engine(op).with_decider(FixedDecision(Decision::CancelAll));
    let report = finished(engine.run());

    assert_eq!(report.state, ProcessState::Aborted);
    assert_eq!(report.final_error, Severity::FatalError);
    assert_eq!(*undone.lock().unwrap(), vec!["u-3", "u-2", "u-1"]);
    assert_eq!(report.cause.unwrap().kind, ErrorKind::SharingViolation);
    assert!(engine.context().ledger.is_empty());
}

#[test]
fn test_retry_then_success_is_recovered() {
    let op = ScriptedOperation::new(&["a", "b", "c"])
        .failing("b", &[ErrorKind::SharingViolation, ErrorKind::SharingViolation]);
    let (decider, asked) = ScriptedDecider::new(&[Decision::Retry, Decision::Retry], Decision::Skip);

    let mut engine = engine(op).with_decider(decider);
    let report = finished(engine.run());

    assert_eq!(asked.load(Ordering::SeqCst), 2);
    assert_eq!(report.final_error, Severity::RecoveredError);
    assert!(report.errors.is_empty());
    // Bytes of the failed attempts were rewound
    assert_eq!(report.bytes_processed, 3 * ITEM_BYTES);
}

#[test]
fn test_recovery_never_demotes_earlier_skip() {
    let op = ScriptedOperation::new(&["a", "b"])
        .failing("a", &[ErrorKind::AccessDenied])
        .failing("b", &[ErrorKind::AccessDenied]);
    let (decider, _) = ScriptedDecider::new(&[Decision::Skip, Decision::Retry], Decision::Skip);

    let mut engine = engine(op).with_decider(decider);
    let report = finished(engine.run());

    assert_eq!(report.state, ProcessState::Completed);
    assert_eq!(report.final_error, Severity::NotRecoveredError);
    assert_eq!(report.errors.len(), 1);
}

#[test]
fn test_unexpected_failure_aborts_without_asking() {
    let op = ScriptedOperation::new(&["a", "b"]).failing("b", &[ErrorKind::Unexpected]);
    let undone = Arc::clone(&op.undone);
    let (decider, asked) = ScriptedDecider::new(&[], Decision::Retry);

    let mut engine = engine(op).with_decider(decider);
    let report = finished(engine.run());

    assert_eq!(asked.load(Ordering::SeqCst), 0);
    assert_eq!(report.state, ProcessState::Aborted);
    assert_eq!(report.final_error, Severity::FatalError);
    assert_eq!(*undone.lock().unwrap(), vec!["u-a"]);
}

#[test]
fn test_max_retries_skips_without_asking_again() {
    let op = ScriptedOperation::new(&["a"]).failing(
        "a",
        &[ErrorKind::DriveNotReady, ErrorKind::DriveNotReady, ErrorKind::DriveNotReady],
    );
    let (decider, asked) = ScriptedDecider::new(&[], Decision::Retry);
    let config = EngineConfig::builder()
        .max_retries(Some(2u32))
        .build()
        .unwrap();

    let mut engine = engine(op).with_config(config).with_decider(decider);
    let report = finished(engine.run());

    assert_eq!(asked.load(Ordering::SeqCst), 2);
    assert_eq!(report.final_error, Severity::NotRecoveredError);
    assert_eq!(report.errors.len(), 1);
}

#[test]
fn test_failed_undo_is_super_fatal() {
    let op = ScriptedOperation::new(&["a", "b"])
        .with_broken_undo("a")
        .failing("b", &[ErrorKind::Unexpected]);

    let mut engine = engine(op).with_decider(FixedDecision(Decision::Skip));
    let report = finished(engine.run());

    assert_eq!(report.state, ProcessState::Aborted);
    assert_eq!(report.final_error, Severity::SuperFatalError);
    let undo_failure = report
        .errors
        .iter()
        .find(|e| e.error.severity == Severity::SuperFatalError)
        .unwrap();
    assert_eq!(undo_failure.path.file_name(), "a");
}

#[test]
fn test_pause_and_resume() {
    let control = Arc::new(ProcessControl::new());
    let op = ScriptedOperation::new(&["a", "b"]);
    let processed = Arc::clone(&op.processed);

    let mut engine = engine(op).with_control(Arc::clone(&control));
    control.pause();

    assert!(matches!(engine.run(), RunOutcome::Paused));
    assert_eq!(engine.state(), ProcessState::Paused);
    assert_eq!(control.state(), ProcessState::Paused);
    assert_eq!(engine.context().queue.len(), 2);
    assert!(processed.lock().unwrap().is_empty());

    control.resume();
    let report = finished(engine.run());
    assert_eq!(report.state, ProcessState::Completed);
    assert_eq!(*processed.lock().unwrap(), vec!["a", "b"]);

    // A finished engine keeps returning its report
    let again = finished(engine.run());
    assert_eq!(again.items_processed, 2);
}

#[test]
fn test_cancel_before_run() {
    let control = Arc::new(ProcessControl::new());
    control.cancel();
    let op = ScriptedOperation::new(&["a"]);
    let processed = Arc::clone(&op.processed);

    let mut engine = engine(op).with_control(control);
    let report = finished(engine.run());

    assert_eq!(report.state, ProcessState::Aborted);
    assert_eq!(report.cause.unwrap().kind, ErrorKind::AbortedByUser);
    assert!(processed.lock().unwrap().is_empty());
}

#[test]
fn test_extra_work_runs_after_finish() {
    let (sink, mut rx) = ChannelSink::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);

    let mut engine = engine(ScriptedOperation::new(&["a"]))
        .with_progress_sink(sink)
        .with_extra_work(FnAction::new("refresh index", move |_ctx: &mut RunContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
    let report = finished(engine.run());

    assert_eq!(report.state, ProcessState::Completed);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    let logs: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ProcessEvent::Log(line) => Some(line),
            _ => None,
        })
        .collect();
    assert!(logs.iter().any(|l| l == "Entering extra work: refresh index"));
    assert!(logs.iter().any(|l| l == "Leaving extra work: refresh index"));
}

#[test]
fn test_fatal_extra_work_rolls_back() {
    let op = ScriptedOperation::new(&["a", "b"]);
    let undone = Arc::clone(&op.undone);

    let mut engine = engine(op).with_extra_work(FnAction::new(
        "publish",
        |_ctx: &mut RunContext| Err(ProcessError::unexpected("publish failed")),
    ));
    let report = finished(engine.run());

    assert_eq!(report.state, ProcessState::Aborted);
    assert_eq!(*undone.lock().unwrap(), vec!["u-b", "u-a"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_process_with_channel_decider() {
    let (decider, mut requests) = ChannelDecider::new();
    let (sink, mut events) = ChannelSink::new();
    let op = ScriptedOperation::new(&["a", "b"]).failing("a", &[ErrorKind::SharingViolation]);

    let engine = engine(op)
        .with_decider(decider)
        .with_progress_sink(sink.clone())
        .with_completion_sink(sink);
    let handle = start_process(engine);

    let pending = requests.recv().await.unwrap();
    assert_eq!(pending.request.path, Some(PathBuf::from("/virtual/a")));
    pending.respond(Decision::Retry);

    let report = handle.join().await.unwrap();
    assert_eq!(report.state, ProcessState::Completed);
    assert_eq!(report.final_error, Severity::RecoveredError);

    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        if let ProcessEvent::Completed(report) = event {
            assert_eq!(report.items_processed, 2);
            completed = true;
        }
    }
    assert!(completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_through_handle_rolls_back() {
    let (decider, mut requests) = ChannelDecider::new();
    let op = ScriptedOperation::new(&["a", "b", "c"]).failing("b", &[ErrorKind::SharingViolation]);
    let undone = Arc::clone(&op.undone);
    let handle = start_process(engine(op).with_decider(decider));

    // Cancelled from the async side while the worker waits on a prompt
    let pending = requests.recv().await.unwrap();
    handle.cancel();
    pending.respond(Decision::Retry);

    let report = handle.join().await.unwrap();
    assert_eq!(report.state, ProcessState::Aborted);
    assert_eq!(report.cause.unwrap().kind, ErrorKind::AbortedByUser);
    assert_eq!(*undone.lock().unwrap(), vec!["u-a"]);
}
