//! Process engine for long-running filesystem operations.
//!
//! A run enumerates its roots into a queue, validates preconditions, then
//! processes the queue item by item on a single worker thread. Recoverable
//! failures are offered to a [`DecisionProvider`] (retry, skip, or cancel
//! everything); an abort unwinds the [`RollbackLedger`] newest first. Progress
//! and log lines go to a [`ProgressSink`] and the final [`ProcessReport`] to a
//! [`CompletionSink`].
//!
//! Built-in operations: delete and recycle, copy and move, zip/tar
//! compression, zip extraction, and duplicate scanning.

mod classify;
mod compress;
mod context;
mod control;
mod copy;
mod delete;
mod duplicates;
mod engine;
mod extract;
mod move_op;
mod operation;
mod registry;
mod report;
mod retry;
mod rollback;
mod sink;
mod stream;
mod worker;

pub use classify::{classify_io, processes_holding};
pub use compress::{ArchiveFormat, CompressOperation};
pub use context::RunContext;
pub use control::{ProcessControl, ProcessState, ProgressSnapshot, Stage};
pub use copy::{CopyOperation, CopyOptions};
pub use delete::{DeleteMode, DeleteOperation};
pub use duplicates::DuplicateScanOperation;
pub use engine::{ProcessEngine, RunOutcome};
pub use extract::ExtractOperation;
pub use move_op::MoveOperation;
pub use operation::{CustomAction, FnAction, LoadFallback, Operation, OperationKind};
pub use registry::{OperationRegistry, OperationRequest, RegistryError};
pub use report::{OperationOutput, ProcessReport};
pub use rollback::{RollbackEntry, RollbackLedger};
pub use sink::{
    ChannelDecider, ChannelSink, CompletionSink, Decision, DecisionProvider, DecisionRequest,
    FixedDecision, PendingDecision, ProcessEvent, ProgressSink, TracingSink,
};
pub use worker::{start_process, ProcessHandle};

pub use filestage_core::{ErrorKind, PathInfo, ProcessError, Severity};
