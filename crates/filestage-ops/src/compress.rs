//! Archive creation: zip and compressed tarballs.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use filestage_core::{ErrorKind, PathInfo, ProcessError, Severity};
use filestage_scan::TraversalOrder;
use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::classify::{classify_io, classify_zip};
use crate::context::RunContext;
use crate::operation::{Operation, OperationKind};
use crate::report::OperationOutput;
use crate::stream::{create_dir_tracked, stream_chunks};

/// Supported archive formats.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarXz,
    TarBz2,
}

impl ArchiveFormat {
    /// Infer the format from the file name of an archive.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else {
            None
        }
    }
}

enum TarStream {
    Gz(flate2::write::GzEncoder<File>),
    Xz(xz2::write::XzEncoder<File>),
    Bz2(bzip2::write::BzEncoder<File>),
}

impl TarStream {
    fn finish(self) -> io::Result<File> {
        match self {
            Self::Gz(encoder) => encoder.finish(),
            Self::Xz(encoder) => encoder.finish(),
            Self::Bz2(encoder) => encoder.finish(),
        }
    }
}

impl Write for TarStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Gz(encoder) => encoder.write(buf),
            Self::Xz(encoder) => encoder.write(buf),
            Self::Bz2(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Gz(encoder) => encoder.flush(),
            Self::Xz(encoder) => encoder.flush(),
            Self::Bz2(encoder) => encoder.flush(),
        }
    }
}

enum ArchiveWriter {
    Zip(ZipWriter<File>),
    Tar(tar::Builder<TarStream>),
}

/// Counts every chunk read by the tar builder as progress.
struct ProgressReader<'a, R> {
    inner: R,
    ctx: &'a mut RunContext,
    failure: Option<ProcessError>,
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = buf.len().min(self.ctx.config().chunk_size.max(1));
        let read = self.inner.read(&mut buf[..limit])?;
        if let Err(err) = self.ctx.advance(read as u64) {
            self.failure = Some(err);
            return Err(io::Error::other("archive entry interrupted"));
        }
        Ok(read)
    }
}

/// Writes every enumerated item into a new archive.
///
/// Entry names are relative to the parent of the root they belong to, so
/// compressing `/data/photos` yields entries under `photos/`.
pub struct CompressOperation {
    destination: PathBuf,
    format: ArchiveFormat,
    writer: Option<ArchiveWriter>,
    entries: usize,
}

impl CompressOperation {
    pub fn new(destination: impl Into<PathBuf>, format: ArchiveFormat) -> Self {
        Self {
            destination: destination.into(),
            format,
            writer: None,
            entries: 0,
        }
    }

    /// Create with the format inferred from the destination name.
    pub fn infer(destination: impl Into<PathBuf>) -> Option<Self> {
        let destination = destination.into();
        let format = ArchiveFormat::from_path(&destination)?;
        Some(Self::new(destination, format))
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn entry_name(item: &Path, roots: &[PathBuf]) -> Option<String> {
        let root = roots
            .iter()
            .filter(|root| item.starts_with(root))
            .max_by_key(|root| root.components().count())?;
        let base = root.parent().unwrap_or(root);
        let relative = item.strip_prefix(base).ok()?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        (!name.is_empty()).then_some(name)
    }

    fn open_writer(&self, file: File) -> ArchiveWriter {
        match self.format {
            ArchiveFormat::Zip => ArchiveWriter::Zip(ZipWriter::new(file)),
            ArchiveFormat::TarGz => ArchiveWriter::Tar(tar::Builder::new(TarStream::Gz(
                flate2::write::GzEncoder::new(file, flate2::Compression::default()),
            ))),
            ArchiveFormat::TarXz => ArchiveWriter::Tar(tar::Builder::new(TarStream::Xz(
                xz2::write::XzEncoder::new(file, 6),
            ))),
            ArchiveFormat::TarBz2 => ArchiveWriter::Tar(tar::Builder::new(TarStream::Bz2(
                bzip2::write::BzEncoder::new(file, bzip2::Compression::default()),
            ))),
        }
    }

    fn archive_error(&self, err: &io::Error) -> ProcessError {
        classify_io(&self.destination, err)
    }
}

/// Once an entry has started, a failure leaves the archive unusable.
fn incomplete_entry(name: &str, cause: ProcessError) -> ProcessError {
    if cause.is_cancellation() {
        return cause;
    }
    ProcessError::unexpected(format!("Archive entry {name} left incomplete: {cause}"))
        .with_severity(Severity::FatalError)
        .with_os_code(cause.os_code)
}

impl Operation for CompressOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Compress
    }

    fn traversal_order(&self) -> TraversalOrder {
        TraversalOrder::ParentFirst
    }

    fn check(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        if fs::symlink_metadata(&self.destination).is_ok() {
            return Err(ProcessError::new(
                ErrorKind::FileSystemEntryAlreadyExists,
                format!("Archive {} already exists", self.destination.display()),
            )
            .with_path(&self.destination)
            .with_severity(Severity::FatalError));
        }

        let destination = std::path::absolute(&self.destination)
            .unwrap_or_else(|_| self.destination.clone());
        for root in ctx.roots() {
            let root = std::path::absolute(root).unwrap_or_else(|_| root.clone());
            if destination.starts_with(&root) {
                return Err(ProcessError::unexpected(format!(
                    "Archive {} would be written inside {}",
                    self.destination.display(),
                    root.display()
                ))
                .with_severity(Severity::FatalError));
            }
        }

        if let Some(parent) = self.destination.parent() {
            create_dir_tracked(parent, ctx)?;
        }
        let file = File::create_new(&self.destination).map_err(|err| self.archive_error(&err))?;
        ctx.ledger.record_created_file(&self.destination, 0);
        self.writer = Some(self.open_writer(file));

        ctx.log(&format!(
            "Compressing {} item(s) into {} ({})",
            ctx.queue.len(),
            self.destination.display(),
            self.format
        ));
        Ok(())
    }

    fn execute_item(&mut self, item: &PathInfo, ctx: &mut RunContext) -> Result<(), ProcessError> {
        let Some(name) = Self::entry_name(item.path(), ctx.roots()) else {
            return Ok(());
        };
        let destination = self.destination.clone();
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ProcessError::unexpected("Archive is not open"))?;
        let options = SimpleFileOptions::default();

        if item.attributes().symlink && !ctx.config().follow_symlinks {
            let link = fs::read_link(item.path()).map_err(|err| classify_io(item.path(), &err))?;
            match writer {
                ArchiveWriter::Zip(zip) => zip
                    .add_symlink(name.as_str(), link.to_string_lossy(), options)
                    .map_err(|err| classify_zip(&destination, err))?,
                ArchiveWriter::Tar(builder) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    builder
                        .append_link(&mut header, &name, &link)
                        .map_err(|err| classify_io(&destination, &err))?;
                }
            }
        } else if item.is_directory() {
            match writer {
                ArchiveWriter::Zip(zip) => zip
                    .add_directory(name.as_str(), options)
                    .map_err(|err| classify_zip(&destination, err))?,
                ArchiveWriter::Tar(builder) => builder
                    .append_dir(&name, item.path())
                    .map_err(|err| classify_io(item.path(), &err))?,
            }
        } else {
            // Open before the entry starts: failures up to here can be retried
            let mut file = File::open(item.path()).map_err(|err| classify_io(item.path(), &err))?;
            let metadata = file
                .metadata()
                .map_err(|err| classify_io(item.path(), &err))?;

            match writer {
                ArchiveWriter::Zip(zip) => {
                    zip.start_file(name.as_str(), options)
                        .map_err(|err| classify_zip(&destination, err))?;
                    stream_chunks(&mut file, zip, ctx, item.path(), &destination)
                        .map_err(|err| incomplete_entry(&name, err))?;
                }
                ArchiveWriter::Tar(builder) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_metadata(&metadata);
                    let mut reader = ProgressReader {
                        inner: file,
                        ctx: &mut *ctx,
                        failure: None,
                    };
                    let result = builder.append_data(&mut header, &name, &mut reader);
                    if let Some(failure) = reader.failure.take() {
                        return Err(incomplete_entry(&name, failure));
                    }
                    result.map_err(|err| incomplete_entry(&name, classify_io(item.path(), &err)))?;
                }
            }
        }

        self.entries += 1;
        Ok(())
    }

    fn finish(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let file = match writer {
            ArchiveWriter::Zip(zip) => zip
                .finish()
                .map_err(|err| classify_zip(&self.destination, err))?,
            ArchiveWriter::Tar(builder) => builder
                .into_inner()
                .and_then(TarStream::finish)
                .map_err(|err| self.archive_error(&err))?,
        };
        file.sync_all().map_err(|err| self.archive_error(&err))?;

        ctx.log(&format!(
            "Wrote {} entries to {}",
            self.entries,
            self.destination.display()
        ));
        Ok(())
    }

    fn on_abort(&mut self, _ctx: &mut RunContext) {
        self.writer = None;
    }

    fn output(&mut self) -> OperationOutput {
        OperationOutput::Archive {
            path: self.destination.clone(),
            entries: self.entries,
        }
    }
}

impl std::fmt::Debug for CompressOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressOperation")
            .field("destination", &self.destination)
            .field("format", &self.format)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context_with_config;
    use filestage_core::EngineConfig;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ArchiveFormat::from_path(Path::new("/out/a.ZIP")),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(
            ArchiveFormat::from_path(Path::new("b.tar.gz")),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_path(Path::new("c.txz")),
            Some(ArchiveFormat::TarXz)
        );
        assert_eq!(
            ArchiveFormat::from_path(Path::new("d.tbz2")),
            Some(ArchiveFormat::TarBz2)
        );
        assert_eq!(ArchiveFormat::from_path(Path::new("e.tar")), None);
    }

    #[test]
    fn test_entry_names_relative_to_root_parent() {
        let roots = vec![PathBuf::from("/data/photos"), PathBuf::from("/notes.txt")];
        assert_eq!(
            CompressOperation::entry_name(Path::new("/data/photos/2024/x.jpg"), &roots),
            Some("photos/2024/x.jpg".to_string())
        );
        assert_eq!(
            CompressOperation::entry_name(Path::new("/data/photos"), &roots),
            Some("photos".to_string())
        );
        assert_eq!(
            CompressOperation::entry_name(Path::new("/notes.txt"), &roots),
            Some("notes.txt".to_string())
        );
    }

    #[test]
    fn test_progress_reader_survives_zero_chunk_size() {
        let config = EngineConfig {
            chunk_size: 0,
            ..Default::default()
        };
        let mut ctx = context_with_config(config);
        let source: &[u8] = b"take one";
        let mut reader = ProgressReader {
            inner: source,
            ctx: &mut ctx,
            failure: None,
        };

        let mut copied = Vec::new();
        reader.read_to_end(&mut copied).unwrap();
        assert_eq!(copied, b"take one");
        assert!(reader.failure.is_none());
        assert_eq!(ctx.progress().written_bytes, 8);
    }
}
