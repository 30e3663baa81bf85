//! Filesystem traversal for filestage.
//!
//! This crate turns a set of root paths into a lazy sequence of
//! [`PathInfo`] values in one of two orders:
//!
//! - **Parent first** - a directory is yielded before its contents. Used by
//!   operations that must create a directory (or its archive entry) before
//!   writing anything inside it.
//! - **Children first** - every descendant is yielded before its directory.
//!   Used by deletion, where a directory can only be removed once empty.
//!
//! # Example
//!
//! ```rust,no_run
//! use filestage_scan::{Traversal, TraversalOrder};
//!
//! for entry in Traversal::new(vec!["/tmp/build".into()], TraversalOrder::ChildrenFirst) {
//!     match entry {
//!         Ok(info) => println!("{}", info.path().display()),
//!         Err(err) => eprintln!("{err}"),
//!     }
//! }
//! ```

mod traversal;

pub use traversal::{Traversal, TraversalOrder};

// Re-export core types for convenience
pub use filestage_core::{EnumerationError, PathInfo};
