//! Producer handle of the row channel.

use std::sync::atomic::Ordering;

use crate::row::{Row, RowCodec};

use super::error::ChannelError;
use super::frame;
use super::segment::{Counter, Flag, Segment};

/// Producer side of a row channel.
///
/// Closing (or dropping) the writer only detaches; the segment and its
/// buffered rows stay for the reader.
pub struct ChannelWriter {
    segment: Option<Segment>,
    codec: RowCodec,
}

impl ChannelWriter {
    /// Claims the writer slot of an attached segment.
    pub(super) fn attach(mut segment: Segment, codec: RowCodec) -> Result<Self, ChannelError> {
        if segment
            .flag(Flag::WriterAttached)
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ChannelError::WriterAlreadyAttached {
                path: segment.path().to_path_buf(),
            });
        }
        Ok(Self {
            segment: Some(segment),
            codec,
        })
    }

    fn segment(&mut self) -> Result<&mut Segment, ChannelError> {
        self.segment.as_mut().ok_or(ChannelError::Closed)
    }

    /// Encodes and appends one row.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Codec`] if the row does not fit the channel's
    /// schema, or [`ChannelError::CapacityExceeded`] if the frame does not
    /// fit. A failed write leaves cursors and row count untouched.
    pub fn write(&mut self, row: &Row) -> Result<(), ChannelError> {
        let payload = self.codec.encode(row)?;
        self.write_payload(&payload)
    }

    /// Appends one raw payload as a frame.
    ///
    /// Fails if `write_cursor + 4 + len >= capacity`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::CapacityExceeded`] if the frame does not fit.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let segment = self.segment()?;
        let capacity = segment.capacity();
        loop {
            let current = segment.counter(Counter::WriteCursor).load(Ordering::Acquire);
            // Cursors never exceed the data region capacity, which fits in usize.
            #[allow(clippy::cast_possible_truncation)]
            let write = current as usize;

            let needed = write + frame::encoded_len(payload.len());
            if needed >= capacity {
                return Err(ChannelError::CapacityExceeded { needed, capacity });
            }

            let next = frame::encode_frame(segment.data_mut(), write, payload)?;
            // The swap fails only if the reader recycled a fully read buffer
            // meanwhile; the frame is then written again at the origin.
            if segment
                .counter(Counter::WriteCursor)
                .compare_exchange(current, next as u64, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            // Count the row only after its bytes and the cursor are in place.
            // Until then the reader sees read != write and does not recycle.
            segment.counter(Counter::RowCount).fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
    }

    /// Declares that no more rows will be written.
    pub fn finish(&mut self) {
        if let Some(segment) = self.segment.as_mut() {
            segment.flag(Flag::ProducerFinished).store(1, Ordering::Release);
            tracing::debug!(path = %segment.path().display(), "channel producer finished");
        }
    }

    /// Bytes still free in the current fill cycle.
    #[must_use]
    pub fn remaining(&mut self) -> usize {
        let Some(segment) = self.segment.as_mut() else {
            return 0;
        };
        #[allow(clippy::cast_possible_truncation)]
        let write = segment.counter(Counter::WriteCursor).load(Ordering::Acquire) as usize;
        segment.capacity().saturating_sub(write)
    }

    /// Capacity of the data region.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.segment.as_ref().map_or(0, Segment::capacity)
    }

    /// Detaches from the segment, leaving it and its contents in place.
    pub fn close(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(mut segment) = self.segment.take() {
            segment.flag(Flag::WriterAttached).store(0, Ordering::Release);
            tracing::debug!(path = %segment.path().display(), "detached channel writer");
        }
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("path", &self.segment.as_ref().map(Segment::path))
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
