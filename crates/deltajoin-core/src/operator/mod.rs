//! # Operator Module
//!
//! Pull-based, resumable plan nodes.
//!
//! ## Operator Types
//!
//! - **Incremental**: [`DeltaScan`], [`ChannelScan`], [`MergeJoinOperator`].
//!   These track their own batch progress and take part in per-batch reset.
//! - **Wrappers**: [`Sort`], [`Materialize`]. They buffer their single child
//!   and are transparent to incremental orchestration: a join resets the
//!   nearest incremental node below them and merely rescans the wrapper.
//!
//! Every `next()` call yields one [`Output`]. A node signals the end of the
//! current batch with [`Output::EndOfBatch`] and the end of all input with
//! [`Output::Complete`]. A consumer that stops pulling before a batch ends
//! calls [`Operator::finish_batch`] so the unread rows stay in that batch.

use crate::channel::ChannelError;
use crate::row::{CodecError, Row, RowSchema};

pub mod materialize;
pub mod merge_join;
pub mod predicate;
pub mod scan;
pub mod sort;

pub use materialize::Materialize;
pub use merge_join::MergeJoinOperator;
pub use predicate::{CmpOp, Operand, Predicate};
pub use scan::{ChannelScan, DeltaScan, ScanMode};
pub use sort::Sort;

/// Output from one pull on an operator
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// A result row
    Row(Row),
    /// No more rows in the current batch; more batches may follow
    EndOfBatch,
    /// All input has been consumed; terminal
    Complete,
}

impl Output {
    /// Returns the row, if this is one.
    #[must_use]
    pub fn into_row(self) -> Option<Row> {
        match self {
            Output::Row(row) => Some(row),
            Output::EndOfBatch | Output::Complete => None,
        }
    }

    /// True for [`Output::Complete`].
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Output::Complete)
    }
}

/// Kind of plan node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    /// In-memory delta batch source
    DeltaScan,
    /// Row channel source
    ChannelScan,
    /// Blocking sort
    Sort,
    /// Rewindable row buffer
    Materialize,
    /// Incremental merge join
    MergeJoin,
}

impl OperatorKind {
    /// True for nodes that only buffer their child.
    #[must_use]
    pub fn is_wrapper(self) -> bool {
        matches!(self, OperatorKind::Sort | OperatorKind::Materialize)
    }
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperatorKind::DeltaScan => "DeltaScan",
            OperatorKind::ChannelScan => "ChannelScan",
            OperatorKind::Sort => "Sort",
            OperatorKind::Materialize => "Materialize",
            OperatorKind::MergeJoin => "MergeJoin",
        };
        f.write_str(name)
    }
}

/// Trait implemented by all plan nodes
pub trait Operator: Send {
    /// Shape of the rows this node produces
    fn schema(&self) -> &RowSchema;

    /// Kind of this node
    fn kind(&self) -> OperatorKind;

    /// Pulls the next output.
    ///
    /// # Errors
    ///
    /// Returns an error if an input fails or the node is driven past a
    /// terminal state.
    fn next(&mut self) -> Result<Output, OperatorError>;

    /// Restarts the current batch from its first row.
    ///
    /// # Errors
    ///
    /// Returns an error if a child cannot be rescanned.
    fn rescan(&mut self) -> Result<(), OperatorError>;

    /// One-time setup for incremental execution.
    fn init_incremental(&mut self) {}

    /// Discards per-batch state so the next pull starts the next batch.
    ///
    /// # Errors
    ///
    /// Returns an error if a child cannot be reset.
    fn reset_state(&mut self) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Consumes whatever is left of the current batch without returning it.
    ///
    /// Rows a consumer stopped short of still belong to the batch that is
    /// ending. Wrappers forward to their child.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the rest of the batch fails.
    fn finish_batch(&mut self) -> Result<(), OperatorError> {
        match self.child_mut() {
            Some(child) => child.finish_batch(),
            None => Ok(()),
        }
    }

    /// Switches from full-input to delta-only mode.
    ///
    /// # Errors
    ///
    /// Returns an error if a child cannot be switched.
    fn init_delta(&mut self) -> Result<(), OperatorError> {
        Ok(())
    }

    /// True if [`mark_position`](Self::mark_position) and
    /// [`restore_position`](Self::restore_position) are supported.
    fn supports_mark_restore(&self) -> bool {
        false
    }

    /// Remembers the position of the row most recently returned.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::MarkRestoreUnsupported`] unless overridden.
    fn mark_position(&mut self) -> Result<(), OperatorError> {
        Err(OperatorError::MarkRestoreUnsupported(self.kind()))
    }

    /// Repositions so the next pull returns the row after the marked one.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::MarkRestoreUnsupported`] unless overridden.
    fn restore_position(&mut self) -> Result<(), OperatorError> {
        Err(OperatorError::MarkRestoreUnsupported(self.kind()))
    }

    /// The single child of a wrapper node.
    fn child_mut(&mut self) -> Option<&mut dyn Operator> {
        None
    }

    /// True for nodes that take part in per-batch reset themselves.
    fn is_incremental(&self) -> bool {
        !self.kind().is_wrapper()
    }
}

/// Finds the nearest node at or below `op` that is not a wrapper.
///
/// Descends through [`Sort`] and [`Materialize`] nodes. Returns `None` if a
/// wrapper has no child to descend into.
pub fn nearest_incremental_mut(op: &mut dyn Operator) -> Option<&mut dyn Operator> {
    if op.is_incremental() {
        return Some(op);
    }
    op.child_mut().and_then(nearest_incremental_mut)
}

/// Errors that can occur in operators
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// The node was pulled again after reporting completion
    #[error("{0} advanced past completion")]
    AdvancedPastCompletion(OperatorKind),

    /// A join state code outside the known set
    #[error("Unrecognized merge join state: {0}")]
    UnknownJoinState(u8),

    /// Mark/restore requested on a node that cannot rewind
    #[error("{0} does not support mark/restore")]
    MarkRestoreUnsupported(OperatorKind),

    /// Restore requested with no mark set
    #[error("No marked position to restore")]
    NoMarkedPosition,

    /// Plan rejected at construction
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Column reference outside a row
    #[error("Column {index} out of range for width {width}")]
    ColumnOutOfRange {
        /// Referenced column
        index: usize,
        /// Row width
        width: usize,
    },

    /// Broken internal invariant
    #[error("Internal error: {0}")]
    Internal(&'static str),

    /// Row channel failure
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Row codec failure
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}
