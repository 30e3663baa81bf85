//! Permanent deletion and moving to the platform trash.

use std::fs;
use std::path::PathBuf;

use filestage_core::{EnumerationError, PathInfo, ProcessError};
use filestage_scan::TraversalOrder;
use serde::{Deserialize, Serialize};

use crate::classify::{classify_io, classify_trash};
use crate::context::RunContext;
use crate::operation::{LoadFallback, Operation, OperationKind};
use crate::report::OperationOutput;

/// How removed items are disposed of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteMode {
    /// Remove permanently.
    #[default]
    Delete,
    /// Move to the platform trash.
    Recycle,
}

/// Deletes the roots and everything below them, children first.
///
/// In [`DeleteMode::Recycle`] only the roots are staged and handed to the
/// trash in one batch when the queue drained; the trash moves whole subtrees.
#[derive(Debug)]
pub struct DeleteOperation {
    mode: DeleteMode,
    staged: Vec<PathBuf>,
    recycled: usize,
}

impl DeleteOperation {
    pub fn new(mode: DeleteMode) -> Self {
        Self {
            mode,
            staged: Vec::new(),
            recycled: 0,
        }
    }

    pub fn delete() -> Self {
        Self::new(DeleteMode::Delete)
    }

    pub fn recycle() -> Self {
        Self::new(DeleteMode::Recycle)
    }

    pub fn mode(&self) -> DeleteMode {
        self.mode
    }

    fn remove(item: &PathInfo) -> Result<(), ProcessError> {
        let result = if item.is_directory() {
            fs::remove_dir(item.path())
        } else {
            fs::remove_file(item.path())
        };
        result.map_err(|err| classify_io(item.path(), &err))
    }
}

impl Operation for DeleteOperation {
    fn kind(&self) -> OperationKind {
        match self.mode {
            DeleteMode::Delete => OperationKind::Delete,
            DeleteMode::Recycle => OperationKind::Recycle,
        }
    }

    fn traversal_order(&self) -> TraversalOrder {
        TraversalOrder::ChildrenFirst
    }

    fn on_enumeration_error(
        &mut self,
        _error: &EnumerationError,
        _ctx: &mut RunContext,
    ) -> LoadFallback {
        match self.mode {
            DeleteMode::Delete => LoadFallback::Continue,
            DeleteMode::Recycle => LoadFallback::RootsOnly,
        }
    }

    fn check(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        self.staged.clear();
        match self.mode {
            DeleteMode::Delete => ctx.log(&format!("Deleting {} item(s) permanently", ctx.queue.len())),
            DeleteMode::Recycle => ctx.log(&format!(
                "Moving {} root(s) to the trash",
                ctx.roots().len()
            )),
        }
        Ok(())
    }

    fn execute_item(&mut self, item: &PathInfo, ctx: &mut RunContext) -> Result<(), ProcessError> {
        match self.mode {
            DeleteMode::Delete => Self::remove(item),
            DeleteMode::Recycle => {
                let is_root = ctx.roots().iter().any(|root| root == item.path());
                if is_root && !self.staged.iter().any(|p| p == item.path()) {
                    self.staged.push(item.path().to_path_buf());
                }
                Ok(())
            }
        }
    }

    fn finish(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        if self.mode != DeleteMode::Recycle || self.staged.is_empty() {
            return Ok(());
        }
        ctx.checkpoint()?;

        trash::delete_all(&self.staged).map_err(|err| classify_trash(err, &self.staged))?;
        self.recycled = self.staged.len();
        ctx.log(&format!("Moved {} item(s) to the trash", self.recycled));
        Ok(())
    }

    fn finish_skipped(&mut self, error: ProcessError, ctx: &mut RunContext) {
        for path in std::mem::take(&mut self.staged) {
            let target = PathInfo::stat(&path).unwrap_or_else(|_| PathInfo::file(&path, 0));
            let error = error.clone().with_path(&path);
            ctx.record_failure(target, error);
        }
    }

    fn output(&mut self) -> OperationOutput {
        match self.mode {
            DeleteMode::Delete => OperationOutput::None,
            DeleteMode::Recycle => OperationOutput::Recycled {
                count: self.recycled,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use filestage_core::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_remove_file_and_empty_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("d");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("f"), "x").unwrap();

        let mut op = DeleteOperation::delete();
        let mut ctx = context(vec![dir.clone()]);
        op.execute_item(&PathInfo::stat(dir.join("f")).unwrap(), &mut ctx)
            .unwrap();
        op.execute_item(&PathInfo::stat(&dir).unwrap(), &mut ctx)
            .unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_remove_missing_is_path_not_found() {
        let temp = TempDir::new().unwrap();
        let mut op = DeleteOperation::delete();
        let mut ctx = context(Vec::new());

        let err = op
            .execute_item(&PathInfo::file(temp.path().join("nope"), 1), &mut ctx)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathNotFound);
    }

    #[test]
    fn test_recycle_stages_roots_only() {
        let mut op = DeleteOperation::recycle();
        let mut ctx = context(vec![PathBuf::from("/r")]);

        op.execute_item(&PathInfo::file("/r/child", 1), &mut ctx)
            .unwrap();
        op.execute_item(&PathInfo::directory("/r"), &mut ctx).unwrap();
        op.execute_item(&PathInfo::directory("/r"), &mut ctx).unwrap();
        assert_eq!(op.staged, vec![PathBuf::from("/r")]);
        assert_eq!(op.kind(), OperationKind::Recycle);
    }

    #[test]
    fn test_recycle_skip_records_each_root() {
        let mut op = DeleteOperation::recycle();
        let mut ctx = context(vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        op.staged = vec![PathBuf::from("/a"), PathBuf::from("/b")];

        let err = ProcessError::new(ErrorKind::AccessDenied, "no trash");
        op.finish_skipped(err, &mut ctx);
        assert_eq!(ctx.errors.len(), 2);
        assert!(ctx.errors.contains(std::path::Path::new("/b")));
    }
}
