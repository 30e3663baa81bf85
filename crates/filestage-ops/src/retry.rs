//! Retry protocol wrapped around every recoverable action.
//!
//! A failed attempt raises the aggregate severity to
//! [`Severity::NotRecoveredError`] while the decision provider is consulted.
//! If a later attempt succeeds, the aggregate drops back to
//! [`Severity::RecoveredError`], but only when it was clean before the first
//! failure.

use filestage_core::{ProcessError, Severity};

use crate::context::RunContext;
use crate::sink::{Decision, DecisionRequest};

/// Bookkeeping for one guarded action.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RetryState {
    /// Attempts made so far, including the running one.
    attempts: u32,
    /// Failed attempts so far.
    failures: u32,
    /// Aggregate severity before the first failure.
    before_failure: Option<Severity>,
}

/// How a guarded action ended.
#[derive(Debug)]
pub(crate) enum RetryOutcome<T> {
    /// An attempt succeeded.
    Completed(T),
    /// The item was given up on; the run continues.
    Skipped(ProcessError),
    /// The run must abort. The error is already raised to fatal severity.
    Aborted(ProcessError),
}

/// Run `action` until it succeeds, the provider answers Skip or CancelAll, or
/// the failure is not recoverable.
pub(crate) fn run_with_retry<T>(
    ctx: &mut RunContext,
    caption: &str,
    mut action: impl FnMut(&mut RunContext) -> Result<T, ProcessError>,
) -> RetryOutcome<T> {
    let mut state = RetryState::default();

    loop {
        state.attempts += 1;
        let mark = ctx.mark();

        let err = match action(ctx) {
            Ok(value) => {
                if let Some(before) = state.before_failure {
                    ctx.recover(before);
                    ctx.log(&format!(
                        "{caption}: succeeded after {} failed attempt(s)",
                        state.failures
                    ));
                }
                return RetryOutcome::Completed(value);
            }
            Err(err) => err,
        };

        // Cancellations and unexpected failures are never offered for retry
        if !err.is_recoverable() {
            ctx.warn(&format!("{caption}: {err}"));
            return RetryOutcome::Aborted(fatal(err));
        }

        ctx.warn(&err.to_string());
        if state.before_failure.is_none() {
            state.before_failure = Some(ctx.severity());
        }
        state.failures += 1;
        ctx.escalate(Severity::NotRecoveredError);
        ctx.rewind(mark);

        if ctx
            .config()
            .max_retries
            .is_some_and(|max| state.failures > max)
        {
            ctx.warn(&format!(
                "{caption}: giving up after {} attempt(s)",
                state.attempts
            ));
            return RetryOutcome::Skipped(err);
        }

        let request = DecisionRequest::for_error(caption, &err);
        let decision = ctx.ask(&request);
        tracing::debug!(caption, %decision, attempt = state.attempts, "Decision received");

        match decision {
            Decision::Retry => continue,
            Decision::Skip => return RetryOutcome::Skipped(err),
            Decision::CancelAll => {
                ctx.warn(&format!("{caption}: cancelled by user"));
                return RetryOutcome::Aborted(fatal(err));
            }
        }
    }
}

fn fatal(err: ProcessError) -> ProcessError {
    let severity = err.severity.max(Severity::FatalError);
    err.with_severity(severity)
}
