//! Final report of a run.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use filestage_analyze::DuplicateReport;
use filestage_core::{ErrorEntry, ProcessError, Severity};
use serde::{Deserialize, Serialize};

use crate::control::ProcessState;
use crate::operation::OperationKind;

/// Operation-specific result carried by the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationOutput {
    #[default]
    None,
    /// Items moved to the platform trash.
    Recycled { count: usize },
    /// Archive written by a compression run.
    Archive { path: PathBuf, entries: usize },
    /// Entries written by an extraction run.
    Extracted { destination: PathBuf, entries: usize },
    /// Duplicate groups found by a scan.
    Duplicates(DuplicateReport),
}

/// Outcome of a finished run, delivered to the completion sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessReport {
    pub kind: OperationKind,
    /// `Completed` or `Aborted`.
    pub state: ProcessState,
    /// Aggregate error state at the end of the run.
    pub final_error: Severity,
    /// The failure that aborted the run.
    pub cause: Option<ProcessError>,
    /// Items that failed permanently, in the order they failed.
    pub errors: Vec<ErrorEntry>,
    pub items_processed: usize,
    pub bytes_processed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output: OperationOutput,
}

impl ProcessReport {
    /// Whether the run completed without a permanent failure.
    pub fn is_success(&self) -> bool {
        self.state == ProcessState::Completed && self.final_error.is_success()
    }

    /// Wall-clock duration of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let outcome = match self.state {
            ProcessState::Aborted => "aborted",
            _ if self.errors.is_empty() => "completed",
            _ => "completed with errors",
        };
        let mut summary = format!(
            "{} {outcome}: {} item(s), {} byte(s)",
            self.kind, self.items_processed, self.bytes_processed
        );
        if !self.errors.is_empty() {
            summary.push_str(&format!(", {} failed", self.errors.len()));
        }
        if let Some(cause) = &self.cause {
            summary.push_str(&format!(" ({cause})"));
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filestage_core::{ErrorKind, PathInfo};

    fn report(state: ProcessState, final_error: Severity) -> ProcessReport {
        let now = Utc::now();
        ProcessReport {
            kind: OperationKind::Delete,
            state,
            final_error,
            cause: None,
            errors: Vec::new(),
            items_processed: 3,
            bytes_processed: 12,
            started_at: now,
            finished_at: now,
            output: OperationOutput::None,
        }
    }

    #[test]
    fn test_summary_mentions_failures() {
        let mut report = report(ProcessState::Completed, Severity::NotRecoveredError);
        report.errors.push(ErrorEntry {
            path: PathInfo::file("/a", 1),
            error: ProcessError::new(ErrorKind::AccessDenied, "denied"),
        });

        assert!(!report.is_success());
        assert_eq!(
            report.summary(),
            "delete completed with errors: 3 item(s), 12 byte(s), 1 failed"
        );
    }

    #[test]
    fn test_report_serializes() {
        let report = report(ProcessState::Completed, Severity::Succeeded);
        assert!(report.is_success());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["final_error"], "Succeeded");
        assert_eq!(json["output"]["type"], "none");
    }
}
