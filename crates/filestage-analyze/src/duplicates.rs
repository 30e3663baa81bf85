//! Content hashing and duplicate grouping.
//!
//! Files are hashed with BLAKE3 and indexed by hash; every hash shared by two
//! or more files becomes a [`DuplicateGroup`]. The index is filled one file at
//! a time so that the caller controls the I/O (chunking, progress,
//! cancellation).

use std::convert::Infallible;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use blake3::Hasher;
use filestage_core::ContentHash;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Incremental BLAKE3 hasher producing a [`ContentHash`].
#[derive(Debug, Default, Clone)]
pub struct ContentHasher {
    hasher: Hasher,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finalize(&self) -> ContentHash {
        ContentHash::new(*self.hasher.finalize().as_bytes())
    }
}

/// Failure of [`hash_file_with`].
#[derive(Debug, thiserror::Error)]
pub enum HashError<E> {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
    /// The chunk callback stopped the hash.
    #[error("hashing stopped")]
    Stopped(E),
}

/// Hash a whole file with a buffered read of `chunk_size` bytes.
pub fn hash_file(path: &Path, chunk_size: usize) -> io::Result<ContentHash> {
    hash_file_with(path, chunk_size, |_| Ok::<(), Infallible>(())).map_err(|err| match err {
        HashError::Io(err) => err,
        HashError::Stopped(never) => match never {},
    })
}

/// Hash a file chunk by chunk, handing the size of every chunk read to
/// `on_chunk`. An error from the callback stops the hash.
pub fn hash_file_with<E>(
    path: &Path,
    chunk_size: usize,
    mut on_chunk: impl FnMut(u64) -> Result<(), E>,
) -> Result<ContentHash, HashError<E>> {
    let mut file = File::open(path)?;
    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let bytes_read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        hasher.update(&buffer[..bytes_read]);
        on_chunk(bytes_read as u64).map_err(HashError::Stopped)?;
    }

    Ok(hasher.finalize())
}

/// A group of duplicate files sharing the same content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Content hash shared by all files in this group.
    pub hash: ContentHash,

    /// Size of each file in bytes.
    pub size: u64,

    /// Paths to all duplicate files, in the order they were indexed.
    pub paths: Vec<PathBuf>,

    /// Wasted space: size * (count - 1).
    pub wasted_bytes: u64,
}

impl DuplicateGroup {
    /// Get the number of duplicate files.
    pub fn count(&self) -> usize {
        self.paths.len()
    }

    /// Check if keeping one file, how many could be deleted.
    pub fn deletable_count(&self) -> usize {
        self.paths.len().saturating_sub(1)
    }
}

/// Results from duplicate analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateReport {
    /// Groups of duplicate files, sorted by wasted space descending.
    pub groups: Vec<DuplicateGroup>,

    /// Total size of all duplicate files.
    pub total_duplicate_size: u64,

    /// Total wasted space (could be reclaimed).
    pub total_wasted_space: u64,

    /// Number of files hashed.
    pub files_analyzed: u64,

    /// Number of files that have duplicates.
    pub files_with_duplicates: u64,
}

impl DuplicateReport {
    /// Check if any duplicates were found.
    pub fn has_duplicates(&self) -> bool {
        !self.groups.is_empty()
    }

    /// Number of duplicate groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[derive(Debug, Clone)]
struct Candidates {
    size: u64,
    paths: Vec<PathBuf>,
}

/// Index of hashed files, grouped by content.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    by_hash: IndexMap<ContentHash, Candidates>,
    files_analyzed: u64,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hashed file. Re-inserting the same path is ignored.
    pub fn insert(&mut self, path: PathBuf, size: u64, hash: ContentHash) {
        let candidates = self.by_hash.entry(hash).or_insert_with(|| Candidates {
            size,
            paths: Vec::new(),
        });
        if candidates.paths.contains(&path) {
            return;
        }
        candidates.paths.push(path);
        self.files_analyzed += 1;
    }

    pub fn files_analyzed(&self) -> u64 {
        self.files_analyzed
    }

    /// Build the report: every hash with two or more files, largest waste first.
    pub fn into_report(self) -> DuplicateReport {
        let mut groups: Vec<DuplicateGroup> = self
            .by_hash
            .into_iter()
            .filter(|(_, c)| c.paths.len() >= 2)
            .map(|(hash, c)| DuplicateGroup {
                hash,
                size: c.size,
                wasted_bytes: c.size * (c.paths.len() as u64 - 1),
                paths: c.paths,
            })
            .collect();

        // Stable sort keeps discovery order among equal waste
        groups.sort_by(|a, b| b.wasted_bytes.cmp(&a.wasted_bytes));

        let total_duplicate_size = groups.iter().map(|g| g.size * g.paths.len() as u64).sum();
        let total_wasted_space = groups.iter().map(|g| g.wasted_bytes).sum();
        let files_with_duplicates = groups.iter().map(|g| g.paths.len() as u64).sum();

        tracing::debug!(groups = groups.len(), "Built duplicate report");

        DuplicateReport {
            groups,
            total_duplicate_size,
            total_wasted_space,
            files_analyzed: self.files_analyzed,
            files_with_duplicates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_hash_file_matches_content() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), "duplicate content here").unwrap();
        fs::write(temp.path().join("b"), "duplicate content here").unwrap();
        fs::write(temp.path().join("c"), "unique content").unwrap();

        let a = hash_file(&temp.path().join("a"), 4).unwrap();
        let b = hash_file(&temp.path().join("b"), 4096).unwrap();
        let c = hash_file(&temp.path().join("c"), 4096).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_index_groups_and_sorts() {
        let mut index = DuplicateIndex::new();
        let small = ContentHash::new([1; 32]);
        let large = ContentHash::new([2; 32]);
        let unique = ContentHash::new([3; 32]);

        index.insert("/s1".into(), 10, small);
        index.insert("/s2".into(), 10, small);
        index.insert("/l1".into(), 1000, large);
        index.insert("/l2".into(), 1000, large);
        index.insert("/l2".into(), 1000, large);
        index.insert("/u".into(), 5, unique);

        let report = index.into_report();
        assert_eq!(report.files_analyzed, 5);
        assert_eq!(report.group_count(), 2);
        assert_eq!(report.groups[0].size, 1000);
        assert_eq!(report.groups[0].count(), 2);
        assert_eq!(report.total_wasted_space, 1010);
        assert_eq!(report.files_with_duplicates, 4);
    }
}
