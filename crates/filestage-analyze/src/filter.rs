//! Ignore predicates deciding which paths take part in a duplicate scan.
//!
//! Each predicate is a pure function of the [`PathInfo`] (including the
//! attributes captured at enumeration time) and its own options, so running
//! the chain twice on the same input always gives the same answer.

use std::collections::HashSet;
use std::path::PathBuf;

use derive_builder::Builder;
use filestage_core::PathInfo;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building an ignore chain.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A file name pattern is not a valid glob.
    #[error("Invalid file name pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The size range is empty.
    #[error("Minimum size {min} exceeds maximum size {max}")]
    InvalidSizeRange { min: u64, max: u64 },
}

/// Options for the duplicate-scan ignore chain.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(setter(into))]
pub struct IgnoreOptions {
    /// Skip sockets, FIFOs and device nodes.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub skip_system: bool,

    /// Skip dot-files.
    #[builder(default = "false")]
    #[serde(default)]
    pub skip_hidden: bool,

    /// Skip empty files.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub skip_zero_byte: bool,

    /// Smallest size considered, inclusive.
    #[builder(default)]
    #[serde(default)]
    pub min_size: Option<u64>,

    /// Largest size considered, inclusive.
    #[builder(default)]
    #[serde(default)]
    pub max_size: Option<u64>,

    /// Paths below any of these prefixes are skipped.
    #[builder(default)]
    #[serde(default)]
    pub ignored_prefixes: Vec<PathBuf>,

    /// File name globs to skip (e.g. `*.tmp`, `Thumbs.db`).
    #[builder(default)]
    #[serde(default)]
    pub ignored_names: Vec<String>,

    /// Extensions to skip, with or without the leading dot. Case-insensitive.
    #[builder(default)]
    #[serde(default)]
    pub ignored_extensions: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for IgnoreOptions {
    fn default() -> Self {
        Self {
            skip_system: true,
            skip_hidden: false,
            skip_zero_byte: true,
            min_size: None,
            max_size: None,
            ignored_prefixes: Vec::new(),
            ignored_names: Vec::new(),
            ignored_extensions: Vec::new(),
        }
    }
}

impl IgnoreOptions {
    /// Create a new options builder.
    pub fn builder() -> IgnoreOptionsBuilder {
        IgnoreOptionsBuilder::default()
    }
}

/// One link of the ignore chain.
pub trait IgnorePredicate: Send + Sync {
    /// Short name reported when this predicate rejects a path.
    fn name(&self) -> &'static str;

    /// Whether the path must be dropped from the comparison.
    fn rejects(&self, info: &PathInfo) -> bool;
}

struct AttributeFilter {
    system: bool,
    hidden: bool,
}

impl IgnorePredicate for AttributeFilter {
    fn name(&self) -> &'static str {
        "attributes"
    }

    fn rejects(&self, info: &PathInfo) -> bool {
        let attributes = info.attributes();
        (self.system && attributes.system) || (self.hidden && attributes.hidden)
    }
}

struct ZeroByteFilter;

impl IgnorePredicate for ZeroByteFilter {
    fn name(&self) -> &'static str {
        "zero-byte"
    }

    fn rejects(&self, info: &PathInfo) -> bool {
        info.size() == Some(0)
    }
}

struct SizeRangeFilter {
    min: u64,
    max: u64,
}

impl IgnorePredicate for SizeRangeFilter {
    fn name(&self) -> &'static str {
        "size-range"
    }

    fn rejects(&self, info: &PathInfo) -> bool {
        let size = info.byte_len();
        size < self.min || size > self.max
    }
}

struct PrefixFilter {
    prefixes: Vec<PathBuf>,
}

impl IgnorePredicate for PrefixFilter {
    fn name(&self) -> &'static str {
        "path-prefix"
    }

    fn rejects(&self, info: &PathInfo) -> bool {
        self.prefixes.iter().any(|p| info.path().starts_with(p))
    }
}

struct NameFilter {
    globs: GlobSet,
}

impl IgnorePredicate for NameFilter {
    fn name(&self) -> &'static str {
        "file-name"
    }

    fn rejects(&self, info: &PathInfo) -> bool {
        info.path()
            .file_name()
            .is_some_and(|name| self.globs.is_match(name))
    }
}

struct ExtensionFilter {
    extensions: HashSet<String>,
}

impl IgnorePredicate for ExtensionFilter {
    fn name(&self) -> &'static str {
        "extension"
    }

    fn rejects(&self, info: &PathInfo) -> bool {
        info.path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_ascii_lowercase()))
    }
}

/// Outcome of running the chain on one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected { predicate: &'static str },
}

/// Ordered chain of ignore predicates. A path is admitted only if no
/// predicate rejects it; evaluation stops at the first rejection.
pub struct IgnoreChain {
    predicates: Vec<Box<dyn IgnorePredicate>>,
}

impl IgnoreChain {
    /// A chain that admits every file.
    pub fn empty() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    /// Build the chain from options. Disabled predicates are left out.
    pub fn from_options(options: &IgnoreOptions) -> Result<Self, FilterError> {
        let mut chain = Self::empty();

        if options.skip_system || options.skip_hidden {
            chain.push(AttributeFilter {
                system: options.skip_system,
                hidden: options.skip_hidden,
            });
        }

        if options.skip_zero_byte {
            chain.push(ZeroByteFilter);
        }

        if options.min_size.is_some() || options.max_size.is_some() {
            let min = options.min_size.unwrap_or(0);
            let max = options.max_size.unwrap_or(u64::MAX);
            if min > max {
                return Err(FilterError::InvalidSizeRange { min, max });
            }
            chain.push(SizeRangeFilter { min, max });
        }

        if !options.ignored_prefixes.is_empty() {
            chain.push(PrefixFilter {
                prefixes: options.ignored_prefixes.clone(),
            });
        }

        if !options.ignored_names.is_empty() {
            let mut builder = GlobSetBuilder::new();
            for pattern in &options.ignored_names {
                let glob = Glob::new(pattern).map_err(|source| FilterError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                builder.add(glob);
            }
            let globs = builder.build().map_err(|source| FilterError::InvalidPattern {
                pattern: options.ignored_names.join(", "),
                source,
            })?;
            chain.push(NameFilter { globs });
        }

        if !options.ignored_extensions.is_empty() {
            let extensions = options
                .ignored_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect();
            chain.push(ExtensionFilter { extensions });
        }

        Ok(chain)
    }

    /// Append a custom predicate to the end of the chain.
    pub fn push(&mut self, predicate: impl IgnorePredicate + 'static) {
        self.predicates.push(Box::new(predicate));
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Run the chain on a path. Directories are never admitted.
    pub fn evaluate(&self, info: &PathInfo) -> Admission {
        if info.is_directory() {
            return Admission::Rejected {
                predicate: "directory",
            };
        }

        self.predicates
            .iter()
            .find(|p| p.rejects(info))
            .map_or(Admission::Admitted, |p| Admission::Rejected {
                predicate: p.name(),
            })
    }

    pub fn admits(&self, info: &PathInfo) -> bool {
        self.evaluate(info) == Admission::Admitted
    }
}

impl std::fmt::Debug for IgnoreChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.predicates.iter().map(|p| p.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filestage_core::FileAttributes;

    #[test]
    fn test_default_chain_rejects_empty_and_system() {
        let chain = IgnoreChain::from_options(&IgnoreOptions::default()).unwrap();

        assert!(chain.admits(&PathInfo::file("/a.txt", 10)));
        assert_eq!(
            chain.evaluate(&PathInfo::file("/empty", 0)),
            Admission::Rejected {
                predicate: "zero-byte"
            }
        );

        let fifo = PathInfo::file("/run/pipe", 10).with_attributes(FileAttributes {
            system: true,
            ..Default::default()
        });
        assert!(!chain.admits(&fifo));
    }

    #[test]
    fn test_directories_never_admitted() {
        let chain = IgnoreChain::empty();
        assert!(!chain.admits(&PathInfo::directory("/data")));
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let options = IgnoreOptions::builder()
            .ignored_extensions(vec![".LOG".to_string(), "tmp".to_string()])
            .build()
            .unwrap();
        let chain = IgnoreChain::from_options(&options).unwrap();

        assert!(!chain.admits(&PathInfo::file("/var/app.log", 10)));
        assert!(!chain.admits(&PathInfo::file("/var/x.TMP", 10)));
        assert!(chain.admits(&PathInfo::file("/var/x.txt", 10)));
    }

    #[test]
    fn test_invalid_size_range() {
        let options = IgnoreOptions::builder()
            .min_size(Some(100u64))
            .max_size(Some(10u64))
            .build()
            .unwrap();
        assert!(matches!(
            IgnoreChain::from_options(&options),
            Err(FilterError::InvalidSizeRange { min: 100, max: 10 })
        ));
    }
}
