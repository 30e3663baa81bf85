//! Path descriptors.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// BLAKE3 content hash for duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the hash as a hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Attributes captured when an entry is enumerated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileAttributes {
    /// Name starts with a dot.
    pub hidden: bool,
    /// Not a regular file, directory or symlink (socket, FIFO, device node).
    pub system: bool,
    /// Write permission is not granted.
    pub read_only: bool,
    /// The entry itself is a symbolic link.
    pub symlink: bool,
}

impl FileAttributes {
    /// Derive attributes from a path and its (non-followed) metadata.
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.') && n != "." && n != "..");

        Self {
            hidden,
            system: !(file_type.is_file() || file_type.is_dir() || file_type.is_symlink()),
            read_only: metadata.permissions().readonly(),
            symlink: file_type.is_symlink(),
        }
    }
}

/// Immutable descriptor of one filesystem entry.
///
/// Created during traversal and never mutated afterwards. Directories carry
/// no size; files always do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathInfo {
    path: PathBuf,
    is_directory: bool,
    size: Option<u64>,
    #[serde(default)]
    attributes: FileAttributes,
}

impl PathInfo {
    /// Describe a file of a known size.
    pub fn file(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            size: Some(size),
            attributes: FileAttributes::default(),
        }
    }

    /// Describe a directory.
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            size: None,
            attributes: FileAttributes::default(),
        }
    }

    /// Attach enumeration-time attributes.
    pub fn with_attributes(mut self, attributes: FileAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Build a descriptor from metadata obtained without following links.
    pub fn from_metadata(path: impl Into<PathBuf>, metadata: &Metadata) -> Self {
        let path = path.into();
        let attributes = FileAttributes::from_metadata(&path, metadata);
        let info = if metadata.is_dir() {
            Self::directory(path)
        } else {
            Self::file(path, metadata.len())
        };
        info.with_attributes(attributes)
    }

    /// Stat a path (without following a final symlink) and describe it.
    pub fn stat(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = fs::symlink_metadata(&path)?;
        Ok(Self::from_metadata(path, &metadata))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Size used for progress accounting (0 for directories).
    pub fn byte_len(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    pub fn attributes(&self) -> FileAttributes {
        self.attributes
    }

    /// File name as UTF-8, lossily converted.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for PathInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
