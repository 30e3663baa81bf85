use filestage_core::{
    EngineConfig, ErrorKind, ErrorQueue, FileAttributes, PathInfo, PathQueue, ProcessError,
    Severity,
};
use std::path::Path;

#[test]
fn test_path_info_constructors() {
    let file = PathInfo::file("/data/report.pdf", 2048);
    assert!(!file.is_directory());
    assert_eq!(file.size(), Some(2048));
    assert_eq!(file.file_name(), "report.pdf");
    assert_eq!(file.attributes(), FileAttributes::default());

    let dir = PathInfo::directory("/data");
    assert!(dir.is_directory());
    assert_eq!(dir.size(), None);
    assert_eq!(dir.to_string(), "/data");
}

#[test]
fn test_path_info_serialization() {
    let info = PathInfo::file("/data/a.txt", 12).with_attributes(FileAttributes {
        hidden: true,
        ..Default::default()
    });

    let json = serde_json::to_string(&info).unwrap();
    let back: PathInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(info, back);
}

#[test]
fn test_severity_escalation_is_max() {
    let mut aggregate = Severity::None;
    for next in [
        Severity::Succeeded,
        Severity::NotRecoveredError,
        Severity::RecoveredError,
        Severity::Succeeded,
    ] {
        aggregate = aggregate.max(next);
    }
    assert_eq!(aggregate, Severity::NotRecoveredError);
    assert!(!aggregate.is_success());
    assert!(!aggregate.is_fatal());
    assert!(Severity::SuperFatalError.is_fatal());
}

#[test]
fn test_cancellation_kinds_are_not_recoverable() {
    assert!(ProcessError::aborted().is_cancellation());
    assert!(!ProcessError::aborted().is_recoverable());
    assert!(ProcessError::cancelled("trash dialog closed").is_cancellation());
    assert!(ProcessError::new(ErrorKind::SharingViolation, "busy").is_recoverable());
}

#[test]
fn test_error_detail_and_display() {
    let err = ProcessError::new(ErrorKind::SharingViolation, "/tmp/locked.db")
        .with_detail("held open by pid 42");
    assert_eq!(
        err.to_string(),
        "File is in use by another process: /tmp/locked.db (held open by pid 42)"
    );
}

#[test]
fn test_queues_work_together() {
    let mut queue = PathQueue::new();
    queue.extend([PathInfo::file("/x", 1), PathInfo::file("/y", 2)]);

    let mut errors = ErrorQueue::new();
    let failed = queue.pop().unwrap();
    errors.push(failed, ProcessError::new(ErrorKind::AccessDenied, "denied"));

    assert_eq!(queue.len(), 1);
    assert_eq!(errors.len(), 1);
    assert!(errors.contains(Path::new("/x")));
    assert_eq!(errors.worst_severity(), Severity::NotRecoveredError);
}

#[test]
fn test_engine_config_from_toml_like_json() {
    let config: EngineConfig = serde_json::from_str(r#"{"follow_symlinks": true}"#).unwrap();
    assert_eq!(config.chunk_size, 4096);
    assert!(config.follow_symlinks);
    assert_eq!(config.max_retries, None);
}
