//! # Row Channel
//!
//! A fixed-capacity, single-writer/single-reader byte queue in shared memory
//! that moves serialized rows between two cooperating processes.
//!
//! ## Protocol
//!
//! - The consumer creates the segment ([`TupleChannel::open_reader`]); creation
//!   is exclusive and zeroes the row count and both cursors.
//! - The producer attaches ([`TupleChannel::open_writer`]). Until the consumer
//!   has created the segment this fails with [`ChannelError::NotFound`], which
//!   callers treat as "not ready yet" and retry.
//! - Writes append `[u32 big-endian length][payload]` frames at the write
//!   cursor. There is no wraparound: a write that would reach the end of the
//!   data region fails with [`ChannelError::CapacityExceeded`].
//! - Reads consume frames in order. A read that finds no buffered rows resets
//!   both cursors to zero and reports "done"; that full drain is the only point
//!   where buffer space is recycled.
//!
//! Neither side blocks. A full buffer is an error, an empty one is "done";
//! any waiting is layered on top by the caller.
//!
//! ## Participants
//!
//! The one-writer/one-reader discipline is expressed as two handle types:
//! [`ChannelReader`] can only read and [`ChannelWriter`] can only write. A
//! second concurrent writer is detected through a header flag and refused.
//!
//! ```rust,no_run
//! use deltajoin_core::channel::{ChannelConfig, RelationId, TupleChannel};
//! use deltajoin_core::row::{ColumnType, Datum, Row, RowSchema};
//!
//! let schema = RowSchema::new(vec![("id", ColumnType::Int64)]);
//! let channel = TupleChannel::new(RelationId(16384), schema, ChannelConfig::default());
//!
//! // Consumer process
//! let mut reader = channel.open_reader().unwrap();
//!
//! // Producer process
//! let mut writer = channel.open_writer().unwrap();
//! writer.write(&Row::new(vec![Datum::Int64(1)])).unwrap();
//!
//! assert_eq!(reader.read().unwrap(), Some(Row::new(vec![Datum::Int64(1)])));
//! assert_eq!(reader.read().unwrap(), None);
//! reader.close().unwrap();
//! ```

mod config;
mod error;
pub mod frame;
mod reader;
mod segment;
mod writer;

use std::fmt;
use std::path::PathBuf;

pub use config::{ChannelConfig, ChannelConfigBuilder, DEFAULT_CAPACITY, MAX_CAPACITY, MIN_CAPACITY};
pub use error::ChannelError;
pub use frame::FrameError;
pub use reader::ChannelReader;
pub use writer::ChannelWriter;

use crate::row::{RowCodec, RowSchema};

/// Identity of a relation whose changed rows a channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared memory key of a channel.
///
/// Derived from the relation identity alone, so both processes compute the
/// same key without a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey(u32);

impl ChannelKey {
    /// Key for the channel carrying `relation`'s rows.
    #[must_use]
    pub const fn for_relation(relation: RelationId) -> Self {
        Self(relation.0)
    }

    /// Raw key value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Segment file name for this key.
    #[must_use]
    pub fn segment_name(self) -> String {
        format!("deltajoin-tq-{:08x}", self.0)
    }
}

/// Descriptor of a row channel for one relation.
///
/// Construction allocates nothing; it records the key and the row shape
/// needed to rebuild rows on read. Either side then opens its handle.
#[derive(Debug, Clone)]
pub struct TupleChannel {
    key: ChannelKey,
    codec: RowCodec,
    config: ChannelConfig,
}

impl TupleChannel {
    /// Describes the channel for `relation`, carrying rows shaped like `schema`.
    #[must_use]
    pub fn new(relation: RelationId, schema: RowSchema, config: ChannelConfig) -> Self {
        Self {
            key: ChannelKey::for_relation(relation),
            codec: RowCodec::new(schema),
            config,
        }
    }

    /// The channel key.
    #[must_use]
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    /// The row schema.
    #[must_use]
    pub fn schema(&self) -> &RowSchema {
        self.codec.schema()
    }

    /// Path of the shared segment file.
    #[must_use]
    pub fn segment_path(&self) -> PathBuf {
        self.config.segment_dir.join(self.key.segment_name())
    }

    /// Creates the shared segment and returns the consumer handle.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::AlreadyExists`] if a segment under this key
    /// exists, or [`ChannelError::AllocationFailed`] on any other failure.
    pub fn open_reader(&self) -> Result<ChannelReader, ChannelError> {
        let segment = segment::Segment::create(&self.segment_path(), self.config.effective_capacity())?;
        Ok(ChannelReader::new(segment, self.codec.clone()))
    }

    /// Attaches to the shared segment and returns the producer handle.
    ///
    /// Does not touch the cursors or the row count.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotFound`] if the consumer has not created the
    /// segment yet, [`ChannelError::WriterAlreadyAttached`] if another writer
    /// holds it, or [`ChannelError::AttachFailed`] on any other failure.
    pub fn open_writer(&self) -> Result<ChannelWriter, ChannelError> {
        let segment = segment::Segment::attach(&self.segment_path())?;
        ChannelWriter::attach(segment, self.codec.clone())
    }
}
