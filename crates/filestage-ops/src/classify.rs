//! Classification of platform failures into [`ProcessError`]s.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filestage_core::{ErrorKind, ProcessError, Severity};

/// Classify an I/O error on `path`, refining the kind with what can still be
/// observed on disk.
pub fn classify_io(path: &Path, error: &io::Error) -> ProcessError {
    let mut classified = ProcessError::io(path, error);

    match classified.kind {
        ErrorKind::AccessDenied => match fs::symlink_metadata(path) {
            Err(_) => {
                classified.kind = ErrorKind::PathNotFound;
                classified = classified.with_detail("vanished during the operation");
            }
            Ok(metadata) if metadata.permissions().readonly() => {
                classified.kind = ErrorKind::FileReadOnly;
            }
            Ok(_) => {}
        },
        ErrorKind::SharingViolation => {
            let holders = processes_holding(path);
            if !holders.is_empty() {
                classified = classified.with_detail(format!("held open by {}", holders.join(", ")));
            }
        }
        _ => {}
    }

    classified
}

/// Classify a zip error. Anything but an I/O failure means the archive is
/// malformed and is not worth retrying.
pub(crate) fn classify_zip(path: &Path, error: zip::result::ZipError) -> ProcessError {
    match error {
        zip::result::ZipError::Io(err) => classify_io(path, &err),
        other => ProcessError::unexpected(format!("{}: {other}", path.display())).with_path(path),
    }
}

/// Classify a failure of the platform trash for the batch `staged`.
pub(crate) fn classify_trash(error: trash::Error, staged: &[PathBuf]) -> ProcessError {
    let first = staged.first().cloned().unwrap_or_default();
    let classified = match error {
        #[cfg(all(
            unix,
            not(target_os = "macos"),
            not(target_os = "ios"),
            not(target_os = "android")
        ))]
        trash::Error::FileSystem { path, source } => classify_io(&path, &source),
        trash::Error::Os { code, description } => {
            classify_io(&first, &io::Error::from_raw_os_error(code)).with_detail(description)
        }
        trash::Error::CouldNotAccess { target } => {
            let path = PathBuf::from(target);
            let kind = if fs::symlink_metadata(&path).is_ok() {
                ErrorKind::AccessDenied
            } else {
                ErrorKind::PathNotFound
            };
            ProcessError::new(kind, format!("Cannot access {}", path.display())).with_path(path)
        }
        trash::Error::CanonicalizePath { original } => ProcessError::new(
            ErrorKind::PathNotFound,
            format!("Cannot resolve {}", original.display()),
        )
        .with_path(original),
        trash::Error::TargetedRoot => {
            ProcessError::unexpected("A filesystem root cannot be moved to the trash")
                .with_path(&first)
                .with_severity(Severity::FatalError)
        }
        trash::Error::ConvertOsString { original } => ProcessError::unexpected(format!(
            "{} is not valid Unicode",
            original.to_string_lossy()
        )),
        trash::Error::Unknown { description } => {
            ProcessError::new(ErrorKind::UnknownError, description).with_path(&first)
        }
        // Only returned when restoring from the trash
        trash::Error::RestoreCollision { path, .. } | trash::Error::RestoreTwins { path, .. } => {
            ProcessError::unexpected(format!("Unexpected restore failure on {}", path.display()))
                .with_path(path)
        }
    };

    classified.with_detail(format!("moving {} item(s) to the trash", staged.len()))
}

/// Names of processes with `path` open, as `name (pid N)`.
#[cfg(target_os = "linux")]
pub fn processes_holding(path: &Path) -> Vec<String> {
    let Ok(target) = fs::canonicalize(path) else {
        return Vec::new();
    };
    let Ok(processes) = fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut holders = Vec::new();
    for process in processes.flatten() {
        let name = process.file_name();
        let Some(pid) = name.to_str().filter(|n| n.bytes().all(|b| b.is_ascii_digit())) else {
            continue;
        };
        let Ok(descriptors) = fs::read_dir(process.path().join("fd")) else {
            continue;
        };
        let holds = descriptors
            .flatten()
            .any(|fd| fs::read_link(fd.path()).is_ok_and(|link| link == target));
        if holds {
            let command = fs::read_to_string(process.path().join("comm")).unwrap_or_default();
            holders.push(format!("{} (pid {pid})", command.trim()));
        }
    }
    holders
}

#[cfg(not(target_os = "linux"))]
pub fn processes_holding(_path: &Path) -> Vec<String> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_not_found() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing");
        let err = fs::remove_file(&path).unwrap_err();

        let classified = classify_io(&path, &err);
        assert_eq!(classified.kind, ErrorKind::PathNotFound);
        assert_eq!(classified.path.as_deref(), Some(path.as_path()));
        assert!(classified.os_code.is_some());
    }

    #[test]
    fn test_vanished_path_after_access_denied() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gone");
        let err = io::Error::from(io::ErrorKind::PermissionDenied);

        let classified = classify_io(&path, &err);
        assert_eq!(classified.kind, ErrorKind::PathNotFound);
        assert!(classified.message.contains("vanished"));
    }

    #[test]
    fn test_zip_format_error_is_unexpected() {
        let err = zip::result::ZipError::InvalidArchive("bad header".into());
        let classified = classify_zip(Path::new("/a.zip"), err);
        assert_eq!(classified.kind, ErrorKind::Unexpected);
        assert!(!classified.is_recoverable());
    }

    #[test]
    fn test_trash_errors_by_variant() {
        let temp = TempDir::new().unwrap();
        let present = temp.path().join("present");
        fs::write(&present, "x").unwrap();
        let missing = temp.path().join("missing");
        let staged = vec![present.clone(), missing.clone()];

        let err = classify_trash(
            trash::Error::CouldNotAccess {
                target: missing.display().to_string(),
            },
            &staged,
        );
        assert_eq!(err.kind, ErrorKind::PathNotFound);
        assert_eq!(err.path.as_deref(), Some(missing.as_path()));
        assert!(err.message.contains("2 item(s)"));

        let err = classify_trash(
            trash::Error::CouldNotAccess {
                target: present.display().to_string(),
            },
            &staged,
        );
        assert_eq!(err.kind, ErrorKind::AccessDenied);

        let err = classify_trash(trash::Error::TargetedRoot, &staged);
        assert_eq!(err.kind, ErrorKind::Unexpected);
        assert_eq!(err.severity, Severity::FatalError);

        let err = classify_trash(
            trash::Error::Unknown {
                description: "no trash can".into(),
            },
            &staged,
        );
        assert_eq!(err.kind, ErrorKind::UnknownError);
        assert_eq!(err.path.as_deref(), Some(present.as_path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_trash_os_error_uses_errno() {
        let temp = TempDir::new().unwrap();
        let staged = vec![temp.path().join("gone")];
        let err = classify_trash(
            trash::Error::Os {
                code: 2,
                description: "No such file or directory".into(),
            },
            &staged,
        );
        assert_eq!(err.kind, ErrorKind::PathNotFound);
        assert_eq!(err.os_code, Some(2));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_current_process_holds_open_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("held");
        let _file = fs::File::create(&path).unwrap();

        let holders = processes_holding(&path);
        let me = format!("(pid {})", std::process::id());
        assert!(holders.iter().any(|h| h.ends_with(&me)));
    }
}
