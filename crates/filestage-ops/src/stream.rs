//! Chunked I/O helpers shared by the operations.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use filestage_core::ProcessError;

use crate::classify::classify_io;
use crate::context::RunContext;

/// Copy `reader` into `writer` one chunk at a time, accounting every chunk as
/// progress. Fails at the first chunk after cancellation.
pub(crate) fn stream_chunks<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    ctx: &mut RunContext,
    source: &Path,
    destination: &Path,
) -> Result<u64, ProcessError> {
    let mut buffer = vec![0u8; ctx.config().chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(classify_io(source, &err)),
        };
        writer
            .write_all(&buffer[..read])
            .map_err(|err| classify_io(destination, &err))?;
        total += read as u64;
        ctx.advance(read as u64)?;
    }

    writer.flush().map_err(|err| classify_io(destination, &err))?;
    Ok(total)
}

/// Create `path` and any missing ancestors, recording each directory that did
/// not exist on the rollback ledger.
pub(crate) fn create_dir_tracked(path: &Path, ctx: &mut RunContext) -> Result<(), ProcessError> {
    let missing: Vec<&Path> = path.ancestors().take_while(|p| !p.exists()).collect();

    for dir in missing.into_iter().rev() {
        if dir.as_os_str().is_empty() {
            continue;
        }
        match fs::create_dir(dir) {
            Ok(()) => ctx.ledger.record_created_dir(dir),
            // Created concurrently, not ours to undo
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {}
            Err(err) => return Err(classify_io(dir, &err)),
        }
    }
    Ok(())
}

/// Move the existing file at `path` out of the way so new content can be
/// written in its place. Rollback puts it back, committing deletes it.
pub(crate) fn set_aside(path: &Path, bytes: u64, ctx: &mut RunContext) -> Result<(), ProcessError> {
    let backup = backup_path(path);
    fs::rename(path, &backup).map_err(|err| classify_io(path, &err))?;
    tracing::debug!(path = %path.display(), backup = %backup.display(), "Set aside");
    ctx.ledger.record_replaced_file(path, backup, bytes);
    Ok(())
}

/// A free sibling name for the backup of `path`.
fn backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pid = std::process::id();
    let mut attempt = 0u32;
    loop {
        let candidate = path.with_file_name(format!(".{name}.fstage-{pid}-{attempt}"));
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        attempt += 1;
    }
}

/// Undo the ledger entry of a partially written file: remove it, or restore
/// the file it replaced.
pub(crate) fn discard_partial(path: &Path, ctx: &mut RunContext) {
    if let Some(mut entry) = ctx.ledger.forget(path) {
        if let Err(err) = entry.undo() {
            ctx.warn(&format!(
                "Could not remove partial output {}: {err}",
                path.display()
            ));
        }
    }
}
