//! Collaborators a run reports to: the decision provider consulted on
//! recoverable failures, the progress sink, and the completion sink.
//!
//! All three are called from the worker thread only. Implementations that
//! talk to an async front end do so through the channel adapters below.

use std::path::PathBuf;

use filestage_core::ProcessError;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::report::ProcessReport;

/// Answer to a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// Run the same action again.
    Retry,
    /// Give up on this item and continue with the next one.
    Skip,
    /// Abort the whole run and roll back.
    CancelAll,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry => write!(f, "Retry"),
            Self::Skip => write!(f, "Skip"),
            Self::CancelAll => write!(f, "Cancel all"),
        }
    }
}

/// What the decision provider is asked.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub message: String,
    pub caption: String,
    pub options: Vec<Decision>,
    pub path: Option<PathBuf>,
    pub error: ProcessError,
}

impl DecisionRequest {
    pub fn for_error(caption: impl Into<String>, error: &ProcessError) -> Self {
        Self {
            message: error.to_string(),
            caption: caption.into(),
            options: vec![Decision::Retry, Decision::Skip, Decision::CancelAll],
            path: error.path.clone(),
            error: error.clone(),
        }
    }
}

/// Consulted on every recoverable failure. Blocks until an answer exists.
pub trait DecisionProvider: Send {
    fn ask(&self, request: &DecisionRequest) -> Decision;
}

/// Receives progress percentages and log lines.
pub trait ProgressSink: Send {
    fn on_progress(&self, overall_percent: u8, current_item_percent: u8);

    fn on_log(&self, message: &str);
}

/// Receives the final report exactly once per run.
pub trait CompletionSink: Send {
    fn on_completed(&self, report: &ProcessReport);
}

/// Answers every request with the same decision.
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub Decision);

impl DecisionProvider for FixedDecision {
    fn ask(&self, request: &DecisionRequest) -> Decision {
        tracing::debug!(caption = %request.caption, decision = %self.0, "Automatic decision");
        self.0
    }
}

/// A decision request waiting for an answer on the front-end side.
#[derive(Debug)]
pub struct PendingDecision {
    pub request: DecisionRequest,
    reply: oneshot::Sender<Decision>,
}

impl PendingDecision {
    pub fn respond(self, decision: Decision) {
        // The worker may already be gone
        let _ = self.reply.send(decision);
    }
}

/// Forwards requests over a channel and blocks the worker for the answer.
///
/// A dropped request or a closed channel is answered with
/// [`Decision::CancelAll`].
#[derive(Debug, Clone)]
pub struct ChannelDecider {
    tx: mpsc::UnboundedSender<PendingDecision>,
}

impl ChannelDecider {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingDecision>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DecisionProvider for ChannelDecider {
    fn ask(&self, request: &DecisionRequest) -> Decision {
        let (reply, answer) = oneshot::channel();
        let pending = PendingDecision {
            request: request.clone(),
            reply,
        };
        if self.tx.send(pending).is_err() {
            return Decision::CancelAll;
        }
        answer.blocking_recv().unwrap_or(Decision::CancelAll)
    }
}

/// Event emitted by a [`ChannelSink`].
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Progress {
        overall_percent: u8,
        current_item_percent: u8,
    },
    Log(String),
    Completed(Box<ProcessReport>),
}

/// Progress and completion sink backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, overall_percent: u8, current_item_percent: u8) {
        let _ = self.tx.send(ProcessEvent::Progress {
            overall_percent,
            current_item_percent,
        });
    }

    fn on_log(&self, message: &str) {
        let _ = self.tx.send(ProcessEvent::Log(message.to_string()));
    }
}

impl CompletionSink for ChannelSink {
    fn on_completed(&self, report: &ProcessReport) {
        let _ = self
            .tx
            .send(ProcessEvent::Completed(Box::new(report.clone())));
    }
}

/// Sink that only writes to `tracing`. Used when no front end is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_progress(&self, overall_percent: u8, current_item_percent: u8) {
        tracing::trace!(overall_percent, current_item_percent, "Progress");
    }

    fn on_log(&self, message: &str) {
        tracing::debug!(target: "filestage_ops::log", "{message}");
    }
}

impl CompletionSink for TracingSink {
    fn on_completed(&self, report: &ProcessReport) {
        tracing::info!(
            kind = %report.kind,
            state = ?report.state,
            final_error = %report.final_error,
            "{}",
            report.summary()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filestage_core::ErrorKind;

    #[test]
    fn test_request_lists_all_options() {
        let err = ProcessError::new(ErrorKind::AccessDenied, "denied").with_path("/x");
        let request = DecisionRequest::for_error("Delete", &err);
        assert_eq!(request.options.len(), 3);
        assert_eq!(request.path, Some(PathBuf::from("/x")));
        assert_eq!(FixedDecision(Decision::Skip).ask(&request), Decision::Skip);
    }

    #[test]
    fn test_channel_decider_closed_channel_cancels() {
        let (decider, rx) = ChannelDecider::new();
        drop(rx);
        let err = ProcessError::new(ErrorKind::AccessDenied, "denied");
        let request = DecisionRequest::for_error("Delete", &err);
        assert_eq!(decider.ask(&request), Decision::CancelAll);
    }

    #[test]
    fn test_channel_decider_round_trip() {
        let (decider, mut rx) = ChannelDecider::new();
        let responder = std::thread::spawn(move || {
            let pending = rx.blocking_recv().unwrap();
            assert_eq!(pending.request.caption, "Copy");
            pending.respond(Decision::Retry);
        });

        let err = ProcessError::new(ErrorKind::SharingViolation, "busy");
        let request = DecisionRequest::for_error("Copy", &err);
        assert_eq!(decider.ask(&request), Decision::Retry);
        responder.join().unwrap();
    }
}
