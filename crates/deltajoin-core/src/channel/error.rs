//! Row channel error types.
//!
//! Errors fall in three groups: capacity errors (the write does not fit),
//! resource errors (segment missing, already present, or unusable) and framing
//! corruption. All of them are local to one channel operation.

use std::io;
use std::path::PathBuf;

use crate::row::CodecError;

use super::frame::FrameError;

/// Error type for row channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A segment under this key already exists (reader side).
    #[error("channel segment {} already exists", path.display())]
    AlreadyExists {
        /// Segment path.
        path: PathBuf,
    },

    /// Creating or mapping a new segment failed (reader side).
    #[error("failed to allocate channel segment {}: {source}", path.display())]
    AllocationFailed {
        /// Segment path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// No initialized segment exists yet (writer side).
    ///
    /// This is the expected "reader not ready" condition; callers poll.
    #[error("channel segment {} not found", path.display())]
    NotFound {
        /// Segment path.
        path: PathBuf,
    },

    /// Attaching to an existing segment failed (writer side).
    #[error("failed to attach channel segment {}: {source}", path.display())]
    AttachFailed {
        /// Segment path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Another writer is already attached to the segment.
    #[error("channel segment {} already has a writer attached", path.display())]
    WriterAlreadyAttached {
        /// Segment path.
        path: PathBuf,
    },

    /// The segment header has an unknown magic number or format version.
    #[error("channel segment {} is incompatible: {reason}", path.display())]
    IncompatibleSegment {
        /// Segment path.
        path: PathBuf,
        /// What did not match.
        reason: String,
    },

    /// The frame does not fit in the remaining buffer space.
    #[error("channel capacity exceeded: frame ends at byte {needed}, capacity is {capacity}")]
    CapacityExceeded {
        /// Offset the frame would end at.
        needed: usize,
        /// Data region capacity.
        capacity: usize,
    },

    /// A frame header is inconsistent with the written extent.
    #[error("corrupt channel frame: {0}")]
    FrameCorrupt(#[from] FrameError),

    /// Row payload could not be encoded or decoded.
    #[error("row codec error: {0}")]
    Codec(#[from] CodecError),

    /// The handle has already released its segment.
    #[error("channel handle is closed")]
    Closed,

    /// Removing the segment on close failed.
    #[error("failed to remove channel segment {}: {source}", path.display())]
    RemoveFailed {
        /// Segment path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    /// Returns true for the recoverable "segment not created yet" condition.
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the write failed for lack of space.
    #[must_use]
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}
