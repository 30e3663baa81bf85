//! Staging queues for pending and failed paths.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{PathInfo, ProcessError, Severity};

/// FIFO of paths waiting to be processed.
///
/// An item leaves the queue only once its operation completed or it was moved
/// to the [`ErrorQueue`].
#[derive(Debug, Clone, Default)]
pub struct PathQueue {
    items: VecDeque<PathInfo>,
}

impl PathQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, info: PathInfo) {
        self.items.push_back(info);
    }

    /// Look at the next item without removing it.
    pub fn peek(&self) -> Option<&PathInfo> {
        self.items.front()
    }

    pub fn pop(&mut self) -> Option<PathInfo> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Keep only the items matching the predicate, preserving order.
    pub fn retain(&mut self, f: impl FnMut(&PathInfo) -> bool) {
        self.items.retain(f);
    }

    /// Sum of the sizes of everything currently queued.
    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(PathInfo::byte_len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathInfo> {
        self.items.iter()
    }
}

impl Extend<PathInfo> for PathQueue {
    fn extend<T: IntoIterator<Item = PathInfo>>(&mut self, iter: T) {
        self.items.extend(iter);
    }
}

impl FromIterator<PathInfo> for PathQueue {
    fn from_iter<T: IntoIterator<Item = PathInfo>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// A path that could not be processed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub path: PathInfo,
    pub error: ProcessError,
}

/// Ordered record of failed paths, read by the caller after (or during) a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorQueue {
    entries: Vec<ErrorEntry>,
}

impl ErrorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: PathInfo, error: ProcessError) {
        self.entries.push(ErrorEntry { path, error });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.entries.iter()
    }

    /// Worst severity recorded, or [`Severity::None`] when empty.
    pub fn worst_severity(&self) -> Severity {
        self.entries
            .iter()
            .map(|e| e.error.severity)
            .max()
            .unwrap_or_default()
    }

    /// Whether a path has an entry.
    pub fn contains(&self, path: &std::path::Path) -> bool {
        self.entries.iter().any(|e| e.path.path() == path)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = ErrorEntry> + '_ {
        self.entries.drain(..)
    }
}
