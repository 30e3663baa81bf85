//! Move operation: rename where possible, copy and remove otherwise.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filestage_core::{PathInfo, ProcessError};
use filestage_scan::TraversalOrder;

use crate::classify::classify_io;
use crate::context::RunContext;
use crate::copy::{CopyOperation, CopyOptions};
use crate::operation::{Operation, OperationKind};

/// Moves every root into a destination directory.
///
/// During the check each root is first renamed into place; this only fails
/// across filesystems or when the target exists, in which case the subtree is
/// copied item by item and the sources are removed once the queue drained.
#[derive(Debug)]
pub struct MoveOperation {
    copy: CopyOperation,
    renamed: Vec<PathBuf>,
    copied: Vec<PathInfo>,
}

impl MoveOperation {
    pub fn new(destination: impl Into<PathBuf>, options: CopyOptions) -> Self {
        Self {
            copy: CopyOperation::new(destination, options),
            renamed: Vec::new(),
            copied: Vec::new(),
        }
    }

    pub fn destination(&self) -> &Path {
        self.copy.destination()
    }

    fn remove_source(item: &PathInfo) -> Result<(), ProcessError> {
        let result = if item.is_directory() && !item.attributes().symlink {
            fs::remove_dir(item.path())
        } else {
            fs::remove_file(item.path())
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            // A skipped child is still inside
            Err(err) if err.kind() == io::ErrorKind::DirectoryNotEmpty => {
                tracing::debug!(path = %item.path().display(), "Keeping non-empty source directory");
                Ok(())
            }
            Err(err) => Err(classify_io(item.path(), &err)),
        }
    }
}

impl Operation for MoveOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Move
    }

    fn traversal_order(&self) -> TraversalOrder {
        TraversalOrder::ParentFirst
    }

    fn check(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        self.copy.check(ctx)?;

        let roots: Vec<PathBuf> = ctx.roots().to_vec();
        for root in roots {
            let target = self.copy.target_for(&root)?;
            if fs::symlink_metadata(&target).is_ok() {
                continue;
            }
            match fs::rename(&root, &target) {
                Ok(()) => {
                    ctx.ledger.record_rename(&root, &target);
                    ctx.log(&format!(
                        "Moved {} to {}",
                        root.display(),
                        target.display()
                    ));
                    self.renamed.push(root);
                }
                Err(err) => {
                    tracing::debug!(root = %root.display(), %err, "Rename failed, copying instead");
                }
            }
        }

        if !self.renamed.is_empty() {
            let renamed = &self.renamed;
            ctx.queue
                .retain(|item| !renamed.iter().any(|root| item.path().starts_with(root)));
        }
        Ok(())
    }

    fn execute_item(&mut self, item: &PathInfo, ctx: &mut RunContext) -> Result<(), ProcessError> {
        self.copy.execute_item(item, ctx)?;
        self.copied.push(item.clone());
        Ok(())
    }

    fn discard_item(&mut self, item: &PathInfo, ctx: &mut RunContext) {
        self.copy.discard_item(item, ctx);
    }

    fn finish(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        if self.copied.is_empty() {
            return Ok(());
        }

        // Every copy is complete; from here on the sources are removed and
        // the copies must survive a later abort.
        if !ctx.ledger.is_empty() {
            ctx.log("Move committed");
            ctx.commit_changes();
        }

        while let Some(item) = self.copied.last() {
            Self::remove_source(item)?;
            self.copied.pop();
        }
        Ok(())
    }
}
