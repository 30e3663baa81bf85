//! Rollback ledger for aborted runs.
//!
//! Operations record an undo closure for every side effect they cause on the
//! filesystem. When a run aborts, the engine pops the entries in reverse
//! registration order and runs each undo. When it completes, the ledger is
//! committed: entries holding on to replaced content release it.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filestage_core::PathInfo;

type UndoFn = Box<dyn FnMut() -> io::Result<()> + Send>;
type CommitFn = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// One reversible side effect.
pub struct RollbackEntry {
    label: String,
    target: PathInfo,
    undo: UndoFn,
    commit: Option<CommitFn>,
}

impl RollbackEntry {
    /// Create an entry. `target` is the path the side effect produced; its
    /// byte length is the weight of this entry in rollback progress.
    pub fn new(
        label: impl Into<String>,
        target: PathInfo,
        undo: impl FnMut() -> io::Result<()> + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            target,
            undo: Box::new(undo),
            commit: None,
        }
    }

    /// Action to run when the change is kept.
    pub fn on_commit(mut self, commit: impl FnOnce() -> io::Result<()> + Send + 'static) -> Self {
        self.commit = Some(Box::new(commit));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn target(&self) -> &PathInfo {
        &self.target
    }

    pub fn path(&self) -> &Path {
        self.target.path()
    }

    pub fn bytes(&self) -> u64 {
        self.target.byte_len()
    }

    /// Run the undo action. May be called again after a failure.
    pub fn undo(&mut self) -> io::Result<()> {
        (self.undo)()
    }
}

impl fmt::Debug for RollbackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackEntry")
            .field("label", &self.label)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// LIFO ledger of undo actions.
#[derive(Debug, Default)]
pub struct RollbackLedger {
    entries: Vec<RollbackEntry>,
}

impl RollbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: RollbackEntry) {
        tracing::trace!(label = %entry.label, path = %entry.path().display(), "Recorded undo");
        self.entries.push(entry);
    }

    /// Take the most recently recorded entry.
    pub fn pop(&mut self) -> Option<RollbackEntry> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the byte weights of all entries.
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(RollbackEntry::bytes).sum()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.path() == path)
    }

    /// Remove the latest entry for `path` without running it.
    pub fn forget(&mut self, path: &Path) -> Option<RollbackEntry> {
        let index = self.entries.iter().rposition(|e| e.path() == path)?;
        Some(self.entries.remove(index))
    }

    /// Drop every entry without running anything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keep every recorded change: run the commit actions, oldest first, and
    /// empty the ledger. Returns the paths whose commit failed.
    pub fn commit(&mut self) -> Vec<(PathBuf, io::Error)> {
        let mut failures = Vec::new();
        for entry in self.entries.drain(..) {
            if let Some(commit) = entry.commit {
                if let Err(err) = commit() {
                    failures.push((entry.target.path().to_path_buf(), err));
                }
            }
        }
        failures
    }

    /// Record a file this run created. Undo removes it.
    pub fn record_created_file(&mut self, path: impl Into<PathBuf>, bytes: u64) {
        let path = path.into();
        if self.contains(&path) {
            return;
        }
        let target = path.clone();
        self.push(RollbackEntry::new(
            format!("Remove {}", path.display()),
            PathInfo::file(path, bytes),
            move || ignore_missing(fs::remove_file(&target)),
        ));
    }

    /// Record a directory this run created. Undo removes it if empty.
    pub fn record_created_dir(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.contains(&path) {
            return;
        }
        let target = path.clone();
        self.push(RollbackEntry::new(
            format!("Remove directory {}", path.display()),
            PathInfo::directory(path),
            move || ignore_missing(fs::remove_dir(&target)),
        ));
    }

    /// Record that the existing file at `path` was moved to `backup` to make
    /// way for new content. Undo removes whatever is at `path` and puts the
    /// backup back; committing deletes the backup.
    pub fn record_replaced_file(
        &mut self,
        path: impl Into<PathBuf>,
        backup: impl Into<PathBuf>,
        bytes: u64,
    ) {
        let path = path.into();
        let backup = backup.into();
        let target = path.clone();
        let original = backup.clone();
        self.push(
            RollbackEntry::new(
                format!("Restore {}", path.display()),
                PathInfo::file(path, bytes),
                move || {
                    ignore_missing(fs::remove_file(&target))?;
                    fs::rename(&original, &target)
                },
            )
            .on_commit(move || ignore_missing(fs::remove_file(&backup))),
        );
    }

    /// Record a rename. Undo renames `to` back to `from`.
    pub fn record_rename(&mut self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) {
        let from = from.into();
        let to = to.into();
        let target = PathInfo::stat(&to).unwrap_or_else(|_| PathInfo::file(&to, 0));
        self.push(RollbackEntry::new(
            format!("Rename {} back to {}", to.display(), from.display()),
            target,
            move || fs::rename(&to, &from),
        ));
    }

    /// Undo everything without a retry protocol, newest first. Returns the
    /// entries whose undo failed along with their errors.
    #[cfg(test)]
    pub(crate) fn unwind(&mut self) -> Vec<(RollbackEntry, io::Error)> {
        let mut failures = Vec::new();
        while let Some(mut entry) = self.pop() {
            if let Err(err) = entry.undo() {
                failures.push((entry, err));
            }
        }
        failures
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
