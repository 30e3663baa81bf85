//! Registry mapping operation kinds to factories.

use std::collections::HashMap;
use std::path::PathBuf;

use filestage_analyze::{FilterError, IgnoreOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compress::{ArchiveFormat, CompressOperation};
use crate::copy::{CopyOperation, CopyOptions};
use crate::delete::DeleteOperation;
use crate::duplicates::DuplicateScanOperation;
use crate::engine::ProcessEngine;
use crate::extract::ExtractOperation;
use crate::move_op::MoveOperation;
use crate::operation::{Operation, OperationKind};

/// Everything needed to build an operation, independent of its kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub roots: Vec<PathBuf>,
    /// Target directory (copy, move, extract) or archive file (compress).
    #[serde(default)]
    pub destination: Option<PathBuf>,
    #[serde(default)]
    pub overwrite: bool,
    /// Archive format; inferred from the destination when absent.
    #[serde(default)]
    pub archive_format: Option<ArchiveFormat>,
    #[serde(default)]
    pub ignore: IgnoreOptions,
}

impl OperationRequest {
    pub fn new(kind: OperationKind, roots: Vec<PathBuf>) -> Self {
        Self {
            kind,
            roots,
            destination: None,
            overwrite: false,
            archive_format: None,
            ignore: IgnoreOptions::default(),
        }
    }

    pub fn destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn archive_format(mut self, format: ArchiveFormat) -> Self {
        self.archive_format = Some(format);
        self
    }

    pub fn ignore(mut self, ignore: IgnoreOptions) -> Self {
        self.ignore = ignore;
        self
    }

    fn require_destination(&self) -> Result<PathBuf, RegistryError> {
        self.destination
            .clone()
            .ok_or(RegistryError::MissingDestination(self.kind))
    }
}

/// Errors raised while building an operation from a request.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No operation registered for {0}")]
    NotRegistered(OperationKind),

    #[error("{0} needs at least one path")]
    NoRoots(OperationKind),

    #[error("{0} needs a destination")]
    MissingDestination(OperationKind),

    #[error("Extraction takes exactly one archive, got {0}")]
    ArchiveCount(usize),

    #[error("Cannot infer the archive format of {}", .0.display())]
    UnknownArchiveFormat(PathBuf),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

type Factory = fn(&OperationRequest) -> Result<Box<dyn Operation>, RegistryError>;

/// Maps each [`OperationKind`] to the factory that builds it.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    factories: HashMap<OperationKind, Factory>,
}

impl OperationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in operation.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(OperationKind::Delete, |_| Ok(Box::new(DeleteOperation::delete())));
        registry.register(OperationKind::Recycle, |_| {
            Ok(Box::new(DeleteOperation::recycle()))
        });
        registry.register(OperationKind::Copy, |request| {
            let options = CopyOptions {
                overwrite: request.overwrite,
                ..Default::default()
            };
            Ok(Box::new(CopyOperation::new(
                request.require_destination()?,
                options,
            )))
        });
        registry.register(OperationKind::Move, |request| {
            let options = CopyOptions {
                overwrite: request.overwrite,
                ..Default::default()
            };
            Ok(Box::new(MoveOperation::new(
                request.require_destination()?,
                options,
            )))
        });
        registry.register(OperationKind::Compress, |request| {
            let destination = request.require_destination()?;
            let format = match request.archive_format {
                Some(format) => format,
                None => ArchiveFormat::from_path(&destination)
                    .ok_or_else(|| RegistryError::UnknownArchiveFormat(destination.clone()))?,
            };
            Ok(Box::new(CompressOperation::new(destination, format)))
        });
        registry.register(OperationKind::Extract, |request| {
            let [archive] = request.roots.as_slice() else {
                return Err(RegistryError::ArchiveCount(request.roots.len()));
            };
            let operation = ExtractOperation::new(archive, request.require_destination()?)
                .overwrite(request.overwrite);
            Ok(Box::new(operation))
        });
        registry.register(OperationKind::DuplicateScan, |request| {
            Ok(Box::new(DuplicateScanOperation::new(&request.ignore)?))
        });
        registry
    }

    /// Register or replace the factory for `kind`.
    pub fn register(&mut self, kind: OperationKind, factory: Factory) {
        self.factories.insert(kind, factory);
    }

    pub fn contains(&self, kind: OperationKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Build the operation for `request`.
    pub fn create(&self, request: &OperationRequest) -> Result<Box<dyn Operation>, RegistryError> {
        if request.roots.is_empty() {
            return Err(RegistryError::NoRoots(request.kind));
        }
        let factory = self
            .factories
            .get(&request.kind)
            .ok_or(RegistryError::NotRegistered(request.kind))?;
        factory(request)
    }

    /// Build an engine running the operation for `request` over its roots.
    pub fn build_engine(&self, request: &OperationRequest) -> Result<ProcessEngine, RegistryError> {
        let operation = self.create(request)?;
        Ok(ProcessEngine::new(operation, request.roots.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_standard_registers_every_kind() {
        let registry = OperationRegistry::standard();
        for kind in OperationKind::iter() {
            assert!(registry.contains(kind), "{kind}");
        }
    }

    #[test]
    fn test_created_operation_matches_kind() {
        let registry = OperationRegistry::standard();
        let request = OperationRequest::new(OperationKind::Recycle, vec!["/tmp/x".into()]);
        assert_eq!(registry.create(&request).unwrap().kind(), OperationKind::Recycle);

        let request = OperationRequest::new(OperationKind::Compress, vec!["/tmp/x".into()])
            .destination("/tmp/out.tar.xz");
        assert_eq!(registry.create(&request).unwrap().kind(), OperationKind::Compress);
    }

    #[test]
    fn test_request_validation() {
        let registry = OperationRegistry::standard();

        let request = OperationRequest::new(OperationKind::Copy, vec!["/a".into()]);
        assert!(matches!(
            registry.create(&request),
            Err(RegistryError::MissingDestination(OperationKind::Copy))
        ));

        let request = OperationRequest::new(OperationKind::Delete, Vec::new());
        assert!(matches!(
            registry.create(&request),
            Err(RegistryError::NoRoots(OperationKind::Delete))
        ));

        let request = OperationRequest::new(OperationKind::Compress, vec!["/a".into()])
            .destination("/out.rar");
        assert!(matches!(
            registry.create(&request),
            Err(RegistryError::UnknownArchiveFormat(_))
        ));

        let request =
            OperationRequest::new(OperationKind::Extract, vec!["/a.zip".into(), "/b.zip".into()])
                .destination("/out");
        assert!(matches!(
            registry.create(&request),
            Err(RegistryError::ArchiveCount(2))
        ));
    }

    #[test]
    fn test_empty_registry() {
        let registry = OperationRegistry::new();
        let request = OperationRequest::new(OperationKind::Delete, vec!["/a".into()]);
        assert!(matches!(
            registry.create(&request),
            Err(RegistryError::NotRegistered(OperationKind::Delete))
        ));
    }
}
