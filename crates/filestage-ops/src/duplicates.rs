//! Duplicate scan: hashes every admitted file and groups equal content.

use filestage_analyze::{
    hash_file_with, Admission, DuplicateIndex, DuplicateReport, FilterError, HashError,
    IgnoreChain, IgnoreOptions,
};
use filestage_core::{ContentHash, PathInfo, ProcessError};
use filestage_scan::TraversalOrder;

use crate::classify::classify_io;
use crate::context::RunContext;
use crate::operation::{Operation, OperationKind};
use crate::report::OperationOutput;

/// Finds files with identical content below the roots. Read-only.
#[derive(Debug)]
pub struct DuplicateScanOperation {
    chain: IgnoreChain,
    index: DuplicateIndex,
    report: Option<DuplicateReport>,
    rejected: usize,
}

impl DuplicateScanOperation {
    pub fn new(options: &IgnoreOptions) -> Result<Self, FilterError> {
        Ok(Self::with_chain(IgnoreChain::from_options(options)?))
    }

    pub fn with_chain(chain: IgnoreChain) -> Self {
        Self {
            chain,
            index: DuplicateIndex::new(),
            report: None,
            rejected: 0,
        }
    }

    fn hash(item: &PathInfo, ctx: &mut RunContext) -> Result<ContentHash, ProcessError> {
        let chunk_size = ctx.config().chunk_size;
        hash_file_with(item.path(), chunk_size, |read| ctx.advance(read)).map_err(|err| match err {
            HashError::Io(err) => classify_io(item.path(), &err),
            HashError::Stopped(err) => err,
        })
    }
}

impl Operation for DuplicateScanOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::DuplicateScan
    }

    fn traversal_order(&self) -> TraversalOrder {
        TraversalOrder::ParentFirst
    }

    fn check(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        tracing::debug!(chain = ?self.chain, "Ignore chain");
        ctx.log(&format!(
            "Scanning {} item(s) for duplicates",
            ctx.queue.len()
        ));
        Ok(())
    }

    fn execute_item(&mut self, item: &PathInfo, ctx: &mut RunContext) -> Result<(), ProcessError> {
        if let Admission::Rejected { predicate } = self.chain.evaluate(item) {
            if !item.is_directory() {
                tracing::trace!(path = %item.path().display(), predicate, "Ignored");
                self.rejected += 1;
            }
            return Ok(());
        }

        let hash = Self::hash(item, ctx)?;
        self.index
            .insert(item.path().to_path_buf(), item.byte_len(), hash);
        Ok(())
    }

    fn finish(&mut self, ctx: &mut RunContext) -> Result<(), ProcessError> {
        let report = std::mem::take(&mut self.index).into_report();
        ctx.log(&format!(
            "Hashed {} file(s), ignored {}, found {} duplicate group(s)",
            report.files_analyzed,
            self.rejected,
            report.group_count()
        ));
        self.report = Some(report);
        Ok(())
    }

    fn output(&mut self) -> OperationOutput {
        self.report
            .take()
            .map_or(OperationOutput::None, OperationOutput::Duplicates)
    }
}
