//! Copy operation: recreates each root below a destination directory.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use filestage_core::{ErrorKind, PathInfo, ProcessError, Severity};
use filestage_scan::TraversalOrder;

use crate::classify::classify_io;
use crate::context::RunContext;
use crate::operation::{Operation, OperationKind};
use crate::stream::{create_dir_tracked, discard_partial, set_aside, stream_chunks};

/// Options for copy and move operations.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Replace existing destination files instead of failing on them.
    pub overwrite: bool,
    /// Copy permission bits to the new file.
    pub preserve_permissions: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            preserve_permissions: true,
        }
    }
}

/// Maps source paths to their place below the destination. Each root `r`
/// lands at `destination/<file name of r>`.
#[derive(Debug, Clone, Default)]
pub(crate) struct DestinationMap {
    destination: PathBuf,
    roots: Vec<PathBuf>,
}

impl DestinationMap {
    pub(crate) fn new(destination: &Path, roots: &[PathBuf]) -> Result<Self, ProcessError> {
        let destination_abs = absolute(destination);
        for root in roots {
            if root.file_name().is_none() {
                return Err(fatal_unexpected(format!(
                    "Cannot copy {}: path has no file name",
                    root.display()
                )));
            }
            if destination_abs.starts_with(absolute(root)) {
                return Err(fatal_unexpected(format!(
                    "Cannot copy {} into itself",
                    root.display()
                )));
            }
        }

        Ok(Self {
            destination: destination.to_path_buf(),
            roots: roots.to_vec(),
        })
    }

    pub(crate) fn target_for(&self, source: &Path) -> Option<PathBuf> {
        let root = self
            .roots
            .iter()
            .filter(|root| source.starts_with(root))
            .max_by_key(|root| root.components().count())?;
        let relative = source.strip_prefix(root).ok()?;
        let name = root.file_name()?;
        let target = self.destination.join(name);
        if relative.as_os_str().is_empty() {
            Some(target)
        } else {
            Some(target.join(relative))
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn fatal_unexpected(message: String) -> ProcessError {
    ProcessError::unexpected(message).with_severity(Severity::FatalError)
}

/// Copies every root into a destination directory, parents first.
#[derive(Debug)]
pub struct CopyOperation {
    destination: PathBuf,
    options: CopyOptions,
    map: DestinationMap,
}

impl CopyOperation {
    pub fn new(destination: impl Into<PathBuf>, options: CopyOptions) -> Self {
        Self {
            destination: destination.into(),
            options,
            map: DestinationMap::default(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub(crate) fn target_for(&self, source: &Path) -> Result<PathBuf, ProcessError> {
        self.map.target_for(source).ok_or_else(|| {
            ProcessError::unexpected(format!("{} is outside every root", source.display()))
        })
    }

    fn copy_directory(&self, target: &Path, ctx: &mut RunContext) -> Result<(), ProcessError> {
        if target.is_dir() {
            return Ok(());
        }
        if target.exists() {
            return Err(already_exists(target));
        }
        create_dir_tracked(target, ctx)
    }

    fn copy_file(
        &self,
        item: &PathInfo,
        target: &Path,
        ctx: &mut RunContext,
    ) -> Result<(), ProcessError> {
        // A partial file from an earlier attempt is ours to overwrite
        let existed = target.exists() && !ctx.ledger.contains(target);
        if existed && (!self.options.overwrite || target.is_dir()) {
            return Err(already_exists(target));
        }
        if let Some(parent) = target.parent() {
            create_dir_tracked(parent, ctx)?;
        }

        let mut reader = File::open(item.path()).map_err(|err| classify_io(item.path(), &err))?;
        if existed {
            set_aside(target, item.byte_len(), ctx)?;
        }
        let mut writer = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(target)
            .map_err(|err| classify_io(target, &err))?;
        ctx.ledger.record_created_file(target, item.byte_len());

        stream_chunks(&mut reader, &mut writer, ctx, item.path(), target)?;

        if self.options.preserve_permissions {
            let permissions = reader
                .metadata()
                .map_err(|err| classify_io(item.path(), &err))?
                .permissions();
            fs::set_permissions(target, permissions).map_err(|err| classify_io(target, &err))?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn copy_symlink(
        &self,
        item: &PathInfo,
        target: &Path,
        ctx: &mut RunContext,
    ) -> Result<(), ProcessError> {
        if fs::symlink_metadata(target).is_ok() {
            if !self.options.overwrite {
                return Err(already_exists(target));
            }
            set_aside(target, 0, ctx)?;
        }
        let link = fs::read_link(item.path()).map_err(|err| classify_io(item.path(), &err))?;
        std::os::unix::fs::symlink(&link, target).map_err(|err| classify_io(target, &err))?;
        ctx.ledger.record_created_file(target, 0);
        Ok(())
    }

    #[cfg(not(unix))]
    fn copy_symlink(
        &self,
        item: &PathInfo,
        target: &Path,
        ctx: &mut RunContext,
    ) -> Result<(), ProcessError> {
        self.copy_file(item, target, ctx)
    }
}

fn already_exists(target: &Path) -> ProcessError {
    ProcessError::new(
        ErrorKind::FileSystemEntryAlreadyExists,
        format!("{} already exists", target.display()),
    )
    .with_path(target)
}

impl Operation for CopyOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Copy
    }

    fn traversal_order(&self) -> TraversalOrder {
        TraversalOrder::ParentFirst
    }

    fn check(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        self.map = DestinationMap::new(&self.destination, ctx.roots())?;

        if self.destination.exists() && !self.destination.is_dir() {
            return Err(already_exists(&self.destination).with_severity(Severity::FatalError));
        }
        create_dir_tracked(&self.destination, ctx)?;

        ctx.log(&format!(
            "Copying {} item(s) to {}",
            ctx.queue.len(),
            self.destination.display()
        ));
        Ok(())
    }

    fn execute_item(&mut self, item: &PathInfo, ctx: &mut RunContext) -> Result<(), ProcessError> {
        let target = self.target_for(item.path())?;

        if item.attributes().symlink && !ctx.config().follow_symlinks {
            self.copy_symlink(item, &target, ctx)
        } else if item.is_directory() {
            self.copy_directory(&target, ctx)
        } else {
            self.copy_file(item, &target, ctx)
        }
    }

    fn discard_item(&mut self, item: &PathInfo, ctx: &mut RunContext) {
        if item.is_directory() {
            return;
        }
        if let Ok(target) = self.target_for(item.path()) {
            discard_partial(&target, ctx);
        }
    }
}
