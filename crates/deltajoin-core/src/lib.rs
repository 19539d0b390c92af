//! # `deltajoin` Core
//!
//! Incremental, batch-segmented join execution for a streaming query engine.
//!
//! The engine re-executes a fixed plan against small delta batches instead of
//! recomputing from scratch. Operators in this crate are therefore resumable:
//! they signal the end of each batch, reset deterministically, and are pulled
//! again for the next batch without re-planning.
//!
//! This crate provides:
//! - **Row channel**: a single-writer/single-reader byte queue in shared memory
//!   that ferries serialized rows between cooperating processes
//! - **Merge join**: a resumable sort-merge join automaton with batch-completion
//!   tracking and per-batch reset
//! - **Operators**: the pull contract shared by the join and its children, plus
//!   the scan and wrapper nodes a join is planned over
//! - **Driver**: a minimal delta orchestration loop
//!
//! ## Example
//!
//! ```rust
//! use deltajoin_core::operator::merge_join::{JoinType, MergeClause, MergeJoinConfig, MergeJoinOperator};
//! use deltajoin_core::operator::{DeltaScan, Materialize};
//! use deltajoin_core::driver::DeltaDriver;
//! use deltajoin_core::row::{ColumnType, Datum, Row, RowSchema};
//!
//! let schema = RowSchema::new(vec![("k", ColumnType::Int64)]);
//! let mut outer = DeltaScan::new(schema.clone());
//! outer.push_batch(vec![Row::new(vec![Datum::Int64(1)]), Row::new(vec![Datum::Int64(2)])]);
//! outer.finish();
//! let mut inner = DeltaScan::new(schema);
//! inner.push_batch(vec![Row::new(vec![Datum::Int64(2)])]);
//! inner.finish();
//!
//! let config = MergeJoinConfig::builder()
//!     .join_type(JoinType::Inner)
//!     .clause(MergeClause::new(0, 0))
//!     .build();
//! let join = MergeJoinOperator::try_new(
//!     Box::new(outer),
//!     Box::new(Materialize::new(Box::new(inner))),
//!     config,
//! )
//! .unwrap();
//!
//! let mut driver = DeltaDriver::new(Box::new(join));
//! let batch = driver.run_batch().unwrap();
//! assert_eq!(batch.rows.len(), 1);
//! assert!(batch.complete);
//! ```

#![deny(unsafe_code)] // Selectively allowed in the shared segment header accessors
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod driver;
pub mod operator;
pub mod row;

pub use channel::{ChannelConfig, ChannelError, ChannelReader, ChannelWriter, TupleChannel};
pub use driver::{BatchResult, DeltaDriver};
pub use operator::{Operator, OperatorError, Output};
pub use row::{CodecError, Datum, Row, RowCodec, RowSchema};

/// Result type for deltajoin-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for deltajoin-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Row channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] channel::ChannelError),

    /// Operator errors
    #[error("Operator error: {0}")]
    Operator(#[from] operator::OperatorError),

    /// Row encoding errors
    #[error("Codec error: {0}")]
    Codec(#[from] row::CodecError),
}
