//! Lazy, ordered directory traversal built on walkdir.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use filestage_core::{EnumerationError, PathInfo};
use walkdir::WalkDir;

/// Relative order of a directory and its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraversalOrder {
    /// Every ancestor precedes its descendants.
    ParentFirst,
    /// Every descendant precedes its ancestors.
    ChildrenFirst,
}

/// Depth-first walk over a set of roots.
///
/// Roots are walked one after another in the order given, entries within a
/// directory sorted by file name. The sequence is finite and never yields the
/// same node twice. When a directory cannot be read, an [`EnumerationError`]
/// is yielded in its place and its subtree is abandoned; in children-first
/// order the failing directory itself is not yielded afterwards.
pub struct Traversal {
    roots: VecDeque<PathBuf>,
    order: TraversalOrder,
    follow_symlinks: bool,
    current: Option<walkdir::IntoIter>,
    abandoned: Vec<PathBuf>,
}

impl Traversal {
    /// Create a traversal over `roots`.
    pub fn new(roots: Vec<PathBuf>, order: TraversalOrder) -> Self {
        Self {
            roots: roots.into(),
            order,
            follow_symlinks: false,
            current: None,
            abandoned: Vec::new(),
        }
    }

    /// Follow symbolic links to directories.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn order(&self) -> TraversalOrder {
        self.order
    }

    fn open(&self, root: &Path) -> walkdir::IntoIter {
        WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .contents_first(self.order == TraversalOrder::ChildrenFirst)
            .sort_by_file_name()
            .into_iter()
    }

    fn convert_error(err: walkdir::Error) -> EnumerationError {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();

        if let Some(ancestor) = err.loop_ancestor() {
            let message = format!("filesystem loop back to {}", ancestor.display());
            return EnumerationError::new(path, message);
        }

        match err.into_io_error() {
            Some(source) => EnumerationError::io(path, source),
            None => EnumerationError::new(path, "directory walk failed"),
        }
    }
}

impl Iterator for Traversal {
    type Item = Result<PathInfo, EnumerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let root = self.roots.pop_front()?;
                tracing::debug!(root = %root.display(), order = ?self.order, "Walking root");
                self.current = Some(self.open(&root));
            }

            let next = self.current.as_mut().and_then(Iterator::next);

            match next {
                None => {
                    self.current = None;
                }
                Some(Ok(entry)) => {
                    if self.abandoned.iter().any(|p| p == entry.path()) {
                        continue;
                    }
                    return Some(
                        entry
                            .metadata()
                            .map(|metadata| PathInfo::from_metadata(entry.path(), &metadata))
                            .map_err(Self::convert_error),
                    );
                }
                Some(Err(err)) => {
                    let err = Self::convert_error(err);
                    tracing::warn!(path = %err.path.display(), "Abandoning subtree: {}", err.message);
                    if self.order == TraversalOrder::ChildrenFirst {
                        self.abandoned.push(err.path.clone());
                    }
                    return Some(Err(err));
                }
            }
        }
    }
}
