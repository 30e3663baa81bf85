//! Error taxonomy for process runs.
//!
//! [`Severity`] is a totally ordered ladder; the engine compares severities
//! rather than matching on error types to decide whether a run is still
//! recoverable. [`ErrorKind`] names the leaf cause of a single failure and
//! [`ProcessError`] carries both, plus the message and platform error code.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Aggregate error state of a run, ordered from best to worst.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// Nothing has happened yet.
    #[default]
    None,
    /// Work finished without any problem.
    Succeeded,
    /// At least one action failed but succeeded on retry.
    RecoveredError,
    /// At least one item was permanently skipped.
    NotRecoveredError,
    /// The run was aborted; rollback was attempted.
    FatalError,
    /// Rollback itself failed.
    SuperFatalError,
}

impl Severity {
    /// Whether a run with this severity still counts as clean.
    pub fn is_success(&self) -> bool {
        *self <= Severity::RecoveredError
    }

    /// Whether this severity ends the run.
    pub fn is_fatal(&self) -> bool {
        *self >= Severity::FatalError
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::RecoveredError => write!(f, "recovered error"),
            Self::NotRecoveredError => write!(f, "not recovered error"),
            Self::FatalError => write!(f, "fatal error"),
            Self::SuperFatalError => write!(f, "super fatal error"),
        }
    }
}

/// Leaf cause of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    AccessDenied,
    /// Another process holds the file open.
    SharingViolation,
    FileReadOnly,
    PathNotFound,
    FileSystemEntryAlreadyExists,
    DriveNotReady,
    DiskFull,
    /// A directory could not be enumerated; its subtree was abandoned.
    EnumerationFailed,
    /// The platform primitive reported a user cancellation.
    CancelledByUser,
    /// The run was cancelled through the process control.
    AbortedByUser,
    /// An I/O failure without a more specific classification.
    UnknownError,
    /// A failure outside the I/O taxonomy (format errors, broken invariants).
    Unexpected,
}

impl ErrorKind {
    /// Map an I/O error to the closest leaf cause.
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => Self::AccessDenied,
            io::ErrorKind::NotFound => Self::PathNotFound,
            io::ErrorKind::AlreadyExists => Self::FileSystemEntryAlreadyExists,
            io::ErrorKind::ResourceBusy | io::ErrorKind::ExecutableFileBusy => {
                Self::SharingViolation
            }
            io::ErrorKind::ReadOnlyFilesystem => Self::FileReadOnly,
            io::ErrorKind::StorageFull => Self::DiskFull,
            _ => Self::UnknownError,
        }
    }

    /// Whether retrying the same action may succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Unexpected | Self::CancelledByUser | Self::AbortedByUser
        )
    }

    /// Whether this kind stands for a user cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::CancelledByUser | Self::AbortedByUser)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessDenied => write!(f, "Access denied"),
            Self::SharingViolation => write!(f, "File is in use by another process"),
            Self::FileReadOnly => write!(f, "File is read-only"),
            Self::PathNotFound => write!(f, "Path not found"),
            Self::FileSystemEntryAlreadyExists => write!(f, "Entry already exists"),
            Self::DriveNotReady => write!(f, "Drive is not ready"),
            Self::DiskFull => write!(f, "Disk is full"),
            Self::EnumerationFailed => write!(f, "Enumeration failed"),
            Self::CancelledByUser => write!(f, "Cancelled by user"),
            Self::AbortedByUser => write!(f, "Aborted by user"),
            Self::UnknownError => write!(f, "Unknown error"),
            Self::Unexpected => write!(f, "Unexpected error"),
        }
    }
}

/// A classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ProcessError {
    /// Severity this failure contributes to the run.
    pub severity: Severity,
    /// Leaf cause.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Platform error code, if the failure came from the OS.
    pub os_code: Option<i32>,
    /// Path the failure relates to.
    pub path: Option<PathBuf>,
}

impl ProcessError {
    /// Create an error with the default severity for its kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let severity = if kind.is_recoverable() {
            Severity::NotRecoveredError
        } else {
            Severity::FatalError
        };
        Self {
            severity,
            kind,
            message: message.into(),
            os_code: None,
            path: None,
        }
    }

    /// Classify an I/O error that happened on `path`.
    pub fn io(path: impl Into<PathBuf>, error: &io::Error) -> Self {
        let path = path.into();
        Self::new(
            ErrorKind::from_io(error),
            format!("{}: {error}", path.display()),
        )
        .with_os_code(error.raw_os_error())
        .with_path(path)
    }

    /// A failure outside the I/O taxonomy. Always fatal.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    /// The run was cancelled through the process control.
    pub fn aborted() -> Self {
        Self::new(ErrorKind::AbortedByUser, "Operation aborted by user")
    }

    /// The platform primitive reported a cancellation.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CancelledByUser, message)
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_os_code(mut self, code: Option<i32>) -> Self {
        self.os_code = code;
        self
    }

    /// Append a diagnostic to the message.
    pub fn with_detail(mut self, detail: impl AsRef<str>) -> Self {
        self.message.push_str(" (");
        self.message.push_str(detail.as_ref());
        self.message.push(')');
        self
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind.is_cancellation()
    }
}

/// A directory walk failed; the subtree below `path` was abandoned.
#[derive(Debug, Error)]
#[error("Failed to enumerate {}: {message}", .path.display())]
pub struct EnumerationError {
    /// Path whose enumeration failed.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Underlying I/O error, when there is one.
    #[source]
    pub source: Option<io::Error>,
}

impl EnumerationError {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }
}

impl From<EnumerationError> for ProcessError {
    fn from(err: EnumerationError) -> Self {
        let os_code = err.source.as_ref().and_then(|e| e.raw_os_error());
        ProcessError::new(ErrorKind::EnumerationFailed, err.to_string())
            .with_os_code(os_code)
            .with_path(err.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::None < Severity::Succeeded);
        assert!(Severity::Succeeded < Severity::RecoveredError);
        assert!(Severity::RecoveredError < Severity::NotRecoveredError);
        assert!(Severity::NotRecoveredError < Severity::FatalError);
        assert!(Severity::FatalError < Severity::SuperFatalError);
        assert_eq!(
            Severity::RecoveredError.max(Severity::NotRecoveredError),
            Severity::NotRecoveredError
        );
    }

    #[test]
    fn test_io_classification() {
        let err = ProcessError::io(
            "/test/path",
            &io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind, ErrorKind::AccessDenied);
        assert_eq!(err.severity, Severity::NotRecoveredError);
        assert!(err.is_recoverable());
        assert!(err.message.contains("/test/path"));
    }

    #[test]
    fn test_unexpected_is_fatal() {
        let err = ProcessError::unexpected("bad archive");
        assert_eq!(err.severity, Severity::FatalError);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_enumeration_error_conversion() {
        let err = EnumerationError::io(
            "/root/locked",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let process: ProcessError = err.into();
        assert_eq!(process.kind, ErrorKind::EnumerationFailed);
        assert_eq!(process.path.as_deref(), Some(std::path::Path::new("/root/locked")));
    }
}
