//! Zip extraction.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use filestage_core::{ErrorKind, PathInfo, ProcessError, Severity};
use filestage_scan::TraversalOrder;
use zip::ZipArchive;

use crate::classify::{classify_io, classify_zip};
use crate::context::RunContext;
use crate::operation::{Operation, OperationKind};
use crate::report::OperationOutput;
use crate::stream::{create_dir_tracked, discard_partial, set_aside, stream_chunks};

/// Extracts a zip archive into a destination directory.
///
/// The queue holds one entry per archive member, keyed by its target path and
/// sorted so every directory precedes its contents. Members whose names would
/// escape the destination abort the run while loading.
pub struct ExtractOperation {
    archive_path: PathBuf,
    destination: PathBuf,
    overwrite: bool,
    archive: Option<ZipArchive<File>>,
    members: HashMap<PathBuf, usize>,
    extracted: usize,
}

impl ExtractOperation {
    pub fn new(archive_path: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            destination: destination.into(),
            overwrite: false,
            archive: None,
            members: HashMap::new(),
            extracted: 0,
        }
    }

    /// Replace existing files instead of failing on them.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    fn zip_error(&self, err: zip::result::ZipError) -> ProcessError {
        classify_zip(&self.archive_path, err)
    }

    fn extract_file(
        &mut self,
        item: &PathInfo,
        index: usize,
        ctx: &mut RunContext,
    ) -> Result<(), ProcessError> {
        let target = item.path();
        // A partial file from an earlier attempt is ours to overwrite
        let existed = fs::symlink_metadata(target).is_ok() && !ctx.ledger.contains(target);
        if existed && (!self.overwrite || target.is_dir()) {
            return Err(ProcessError::new(
                ErrorKind::FileSystemEntryAlreadyExists,
                format!("{} already exists", target.display()),
            )
            .with_path(target));
        }
        if let Some(parent) = target.parent() {
            create_dir_tracked(parent, ctx)?;
        }

        let archive_path = self.archive_path.clone();
        let archive = self
            .archive
            .as_mut()
            .ok_or_else(|| ProcessError::unexpected("Archive is not open"))?;
        let mut member = archive
            .by_index(index)
            .map_err(|err| classify_zip(&archive_path, err))?;
        let mode = member.unix_mode();

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

        stream_chunks(&mut member, &mut writer, ctx, &archive_path, target)?;

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|err| classify_io(target, &err))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(())
    }
}

impl Operation for ExtractOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Extract
    }

    fn traversal_order(&self) -> TraversalOrder {
        TraversalOrder::ParentFirst
    }

    fn load(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        let file = File::open(&self.archive_path)
            .map_err(|err| classify_io(&self.archive_path, &err))?;
        let mut archive = ZipArchive::new(file).map_err(|err| self.zip_error(err))?;

        let mut items = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            ctx.checkpoint()?;
            let member = archive.by_index(index).map_err(|err| self.zip_error(err))?;
            let Some(relative) = member.enclosed_name() else {
                return Err(ProcessError::unexpected(format!(
                    "{}: unsafe entry name {}",
                    self.archive_path.display(),
                    member.name()
                ))
                .with_path(&self.archive_path));
            };
            let target = self.destination.join(relative);
            let info = if member.is_dir() {
                PathInfo::directory(&target)
            } else {
                PathInfo::file(&target, member.size())
            };
            self.members.insert(target, index);
            items.push(info);
        }

        // Component-wise order puts every directory before its contents
        items.sort_by(|a, b| a.path().components().cmp(b.path().components()));
        items.dedup_by(|a, b| a.path() == b.path());
        ctx.queue.extend(items);

        self.archive = Some(archive);
        Ok(())
    }

    fn check(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        if self.destination.exists() && !self.destination.is_dir() {
            return Err(ProcessError::new(
                ErrorKind::FileSystemEntryAlreadyExists,
                format!("{} is not a directory", self.destination.display()),
            )
            .with_path(&self.destination)
            .with_severity(Severity::FatalError));
        }
        create_dir_tracked(&self.destination, ctx)?;

        ctx.log(&format!(
            "Extracting {} entries from {} to {}",
            ctx.queue.len(),
            self.archive_path.display(),
            self.destination.display()
        ));
        Ok(())
    }

    fn execute_item(&mut self, item: &PathInfo, ctx: &mut RunContext) -> Result<(), ProcessError> {
        let index = *self.members.get(item.path()).ok_or_else(|| {
            ProcessError::unexpected(format!("{} is not an archive member", item.path().display()))
        })?;

        if item.is_directory() {
            if fs::symlink_metadata(item.path()).is_ok() && !item.path().is_dir() {
                return Err(ProcessError::new(
                    ErrorKind::FileSystemEntryAlreadyExists,
                    format!("{} already exists", item.path().display()),
                )
                .with_path(item.path()));
            }
            create_dir_tracked(item.path(), ctx)?;
        } else {
            self.extract_file(item, index, ctx)?;
        }

        self.extracted += 1;
        Ok(())
    }

    fn discard_item(&mut self, item: &PathInfo, ctx: &mut RunContext) {
        if !item.is_directory() {
            discard_partial(item.path(), ctx);
        }
    }

    fn on_abort(&mut self, _ctx: &mut RunContext) {
        self.archive = None;
    }

    fn output(&mut self) -> OperationOutput {
        OperationOutput::Extracted {
            destination: self.destination.clone(),
            entries: self.extracted,
        }
    }
}

impl std::fmt::Debug for ExtractOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractOperation")
            .field("archive_path", &self.archive_path)
            .field("destination", &self.destination)
            .field("overwrite", &self.overwrite)
            .field("extracted", &self.extracted)
            .finish_non_exhaustive()
    }
}
