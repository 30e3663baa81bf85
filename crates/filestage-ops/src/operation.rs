//! The contract every operation implements.

use std::path::PathBuf;

use filestage_core::{EnumerationError, PathInfo, ProcessError};
use filestage_scan::{Traversal, TraversalOrder};
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::report::OperationOutput;

/// Kind of operation a run performs.
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
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
    Recycle,
    Compress,
    Extract,
    DuplicateScan,
}

/// What to do after a directory could not be enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFallback {
    /// Record the error and keep walking.
    Continue,
    /// Discard everything loaded so far and stage only the roots themselves.
    RootsOnly,
}

/// A filesystem operation driven by the process engine.
///
/// The engine calls [`load`](Operation::load) once, then
/// [`check`](Operation::check) once, then
/// [`execute_item`](Operation::execute_item) for each queued path, and
/// [`finish`](Operation::finish) after the queue drained. `execute_item` and
/// `finish` run under the retry protocol and may be called again for the same
/// work after a failure.
pub trait Operation: Send {
    fn kind(&self) -> OperationKind;

    /// Order in which the default loader walks the roots.
    fn traversal_order(&self) -> TraversalOrder;

    /// Fill the queue. The default walks every root in
    /// [`traversal_order`](Operation::traversal_order).
    fn load(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        let traversal = Traversal::new(ctx.roots().to_vec(), self.traversal_order())
            .follow_symlinks(ctx.config().follow_symlinks);

        for entry in traversal {
            ctx.checkpoint()?;
            match entry {
                Ok(info) => ctx.queue.push(info),
                Err(err) => match self.on_enumeration_error(&err, ctx) {
                    LoadFallback::Continue => ctx.record_enumeration_error(err),
                    LoadFallback::RootsOnly => {
                        ctx.warn(&format!("{err}; staging the roots only"));
                        return load_roots_only(ctx);
                    }
                },
            }
        }
        Ok(())
    }

    fn on_enumeration_error(
        &mut self,
        _error: &EnumerationError,
        _ctx: &mut RunContext,
    ) -> LoadFallback {
        LoadFallback::Continue
    }

    /// Validate preconditions before any item is processed. An error here
    /// aborts the run.
    fn check(&mut self, _ctx: &mut RunContext) -> Result<(), ProcessError> {
        Ok(())
    }

    fn execute_item(&mut self, item: &PathInfo, ctx: &mut RunContext) -> Result<(), ProcessError>;

    /// Called after an item was skipped, to drop any partial output.
    fn discard_item(&mut self, _item: &PathInfo, _ctx: &mut RunContext) {}

    fn finish(&mut self, _ctx: &mut RunContext) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Called when the user skipped a failing [`finish`](Operation::finish).
    fn finish_skipped(&mut self, error: ProcessError, ctx: &mut RunContext) {
        ctx.record_failure(failure_target(&error), error);
    }

    /// Called before rollback so the operation can release open handles.
    fn on_abort(&mut self, _ctx: &mut RunContext) {}

    fn output(&mut self) -> OperationOutput {
        OperationOutput::None
    }
}

/// Work run after the operation finished and before the run completes.
pub trait CustomAction: Send {
    fn name(&self) -> &str;

    fn run(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError>;
}

/// A [`CustomAction`] backed by a closure.
pub struct FnAction<F> {
    name: String,
    action: F,
}

impl<F> FnAction<F>
where
    F: FnMut(&mut RunContext) -> Result<(), ProcessError> + Send,
{
    pub fn new(name: impl Into<String>, action: F) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }
}

impl<F> CustomAction for FnAction<F>
where
    F: FnMut(&mut RunContext) -> Result<(), ProcessError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        (self.action)(ctx)
    }
}

/// Replace the queue with the roots themselves.
fn load_roots_only(ctx: &mut RunContext) -> Result<(), ProcessError> {
    ctx.queue.clear();
    let roots: Vec<PathBuf> = ctx.roots().to_vec();
    for root in roots {
        match PathInfo::stat(&root) {
            Ok(info) => ctx.queue.push(info),
            Err(err) => {
                let error = ProcessError::io(&root, &err);
                ctx.warn(&error.to_string());
                ctx.record_failure(PathInfo::file(root, 0), error);
            }
        }
    }
    Ok(())
}

/// Best-effort path entry for a failure that is not tied to a queued item.
pub(crate) fn failure_target(error: &ProcessError) -> PathInfo {
    match &error.path {
        Some(path) => PathInfo::stat(path).unwrap_or_else(|_| PathInfo::file(path, 0)),
        None => PathInfo::file(PathBuf::new(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_kind_names() {
        assert_eq!(OperationKind::DuplicateScan.to_string(), "duplicate-scan");
        assert_eq!(
            OperationKind::from_str("recycle").unwrap(),
            OperationKind::Recycle
        );
        assert_eq!(OperationKind::iter().count(), 7);
    }
}
