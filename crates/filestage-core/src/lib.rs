//! Core types for filestage.
//!
//! This crate provides the value types shared by the traversal, analysis and
//! process-engine crates: path descriptors, the ordered error taxonomy, the
//! staging queues and the engine configuration.

mod config;
mod error;
mod path;
mod queue;

pub use config::{EngineConfig, EngineConfigBuilder, DEFAULT_CHUNK_SIZE};
pub use error::{EnumerationError, ErrorKind, ProcessError, Severity};
pub use path::{ContentHash, FileAttributes, PathInfo};
pub use queue::{ErrorEntry, ErrorQueue, PathQueue};
