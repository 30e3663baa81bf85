//! Duplicate-scan support for filestage.
//!
//! This crate provides the two pure building blocks of the duplicate scan:
//!
//! - **Ignore chain** - an ordered list of predicates (system/hidden
//!   attribute, zero-byte, size range, path prefix, file name, extension)
//!   deciding whether a path takes part in the comparison at all
//! - **Duplicate index** - BLAKE3 content hashing and grouping of identical
//!   files into a report
//!
//! ```rust,ignore
//! use filestage_analyze::{IgnoreChain, IgnoreOptions, DuplicateIndex, hash_file};
//!
//! let chain = IgnoreChain::from_options(&IgnoreOptions::default())?;
//! let mut index = DuplicateIndex::new();
//! for info in paths {
//!     if chain.admits(&info) {
//!         let hash = hash_file(info.path(), 4096)?;
//!         index.insert(info.path().to_path_buf(), info.byte_len(), hash);
//!     }
//! }
//! let report = index.into_report();
//! println!("Wasted space: {} bytes", report.total_wasted_space);
//! ```

mod duplicates;
mod filter;

pub use duplicates::{
    hash_file, hash_file_with, ContentHasher, DuplicateGroup, DuplicateIndex, DuplicateReport,
    HashError,
};
pub use filter::{
    Admission, FilterError, IgnoreChain, IgnoreOptions, IgnoreOptionsBuilder, IgnorePredicate,
};

// Re-export core types
pub use filestage_core::{ContentHash, PathInfo};
