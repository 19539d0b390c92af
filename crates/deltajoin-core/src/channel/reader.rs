//! Consumer handle of the row channel.

use std::sync::atomic::Ordering;

use bytes::Bytes;

use crate::row::{Row, RowCodec};

use super::error::ChannelError;
use super::frame;
use super::segment::{Counter, Flag, Segment};

/// Consumer side of a row channel.
///
/// Owns the shared segment: closing (or dropping) the reader removes it.
pub struct ChannelReader {
    segment: Option<Segment>,
    codec: RowCodec,
}

impl ChannelReader {
    pub(super) fn new(segment: Segment, codec: RowCodec) -> Self {
        Self {
            segment: Some(segment),
            codec,
        }
    }

    fn segment(&mut self) -> Result<&mut Segment, ChannelError> {
        self.segment.as_mut().ok_or(ChannelError::Closed)
    }

    /// Reads and decodes the next row.
    ///
    /// Returns `Ok(None)` ("done") when no rows are buffered; if everything
    /// written so far has been read, that call also resets both cursors to
    /// the origin.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::FrameCorrupt`] if the next frame is inconsistent
    /// with the written extent, or [`ChannelError::Codec`] if its payload is
    /// not a row of this channel's schema. Neither modifies the channel.
    pub fn read(&mut self) -> Result<Option<Row>, ChannelError> {
        let Some((payload, next)) = self.peek_frame()? else {
            return Ok(None);
        };
        let row = self.codec.decode(&payload)?;
        self.consume_frame(next)?;
        Ok(Some(row))
    }

    /// Reads the next raw payload without decoding it.
    ///
    /// Same "done" and recycling behavior as [`read`](Self::read).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::FrameCorrupt`] if the next frame is inconsistent
    /// with the written extent.
    pub fn read_payload(&mut self) -> Result<Option<Bytes>, ChannelError> {
        let Some((payload, next)) = self.peek_frame()? else {
            return Ok(None);
        };
        self.consume_frame(next)?;
        Ok(Some(payload))
    }

    /// Copies out the frame at the read cursor, or recycles an empty buffer.
    fn peek_frame(&mut self) -> Result<Option<(Bytes, usize)>, ChannelError> {
        let segment = self.segment()?;
        if segment.counter(Counter::RowCount).load(Ordering::Acquire) == 0 {
            // Recycle only when every written byte has been read. A writer
            // that has moved the write cursor but not yet counted its frame
            // makes the swap fail, and the frame is read on a later call.
            let read = segment.counter(Counter::ReadCursor).load(Ordering::Acquire);
            if read != 0
                && segment
                    .counter(Counter::WriteCursor)
                    .compare_exchange(read, 0, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                segment.counter(Counter::ReadCursor).store(0, Ordering::Release);
                tracing::debug!(path = %segment.path().display(), "channel drained, cursors reset");
            }
            return Ok(None);
        }

        let read = load_cursor(segment, Counter::ReadCursor);
        // Counted frames all end at or below the current write cursor.
        let write = load_cursor(segment, Counter::WriteCursor);
        let (payload, next) = frame::decode_frame(segment.data(), read, write)?;
        Ok(Some((Bytes::copy_from_slice(payload), next)))
    }

    fn consume_frame(&mut self, next: usize) -> Result<(), ChannelError> {
        let segment = self.segment()?;
        segment
            .counter(Counter::ReadCursor)
            .store(next as u64, Ordering::Release);
        segment.counter(Counter::RowCount).fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Number of rows written but not yet read.
    #[must_use]
    pub fn pending_rows(&mut self) -> u64 {
        self.segment
            .as_mut()
            .map_or(0, |segment| segment.counter(Counter::RowCount).load(Ordering::Acquire))
    }

    /// Returns true once the producer has declared that no more rows follow.
    ///
    /// Rows may still be buffered; the stream is over when this is true and
    /// a read reports "done".
    #[must_use]
    pub fn is_finished(&mut self) -> bool {
        self.segment.as_mut().map_or(true, |segment| {
            segment.flag(Flag::ProducerFinished).load(Ordering::Acquire) != 0
        })
    }

    /// Capacity of the data region.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.segment.as_ref().map_or(0, Segment::capacity)
    }

    /// The codec used to decode rows.
    #[must_use]
    pub fn codec(&self) -> &RowCodec {
        &self.codec
    }

    /// Detaches and removes the shared segment.
    ///
    /// Destructive: the writer must no longer be using it.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::RemoveFailed`] if the backing file cannot be
    /// deleted.
    pub fn close(mut self) -> Result<(), ChannelError> {
        match self.segment.take() {
            Some(segment) => segment.remove(),
            None => Ok(()),
        }
    }
}

fn load_cursor(segment: &mut Segment, counter: Counter) -> usize {
    // Cursors never exceed the data region capacity, which fits in usize.
    #[allow(clippy::cast_possible_truncation)]
    let cursor = segment.counter(counter).load(Ordering::Acquire) as usize;
    cursor
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        if let Some(segment) = self.segment.take() {
            if let Err(e) = segment.remove() {
                tracing::warn!("Failed to remove channel segment on drop: {e}");
            }
        }
    }
}

impl std::fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReader")
            .field("path", &self.segment.as_ref().map(Segment::path))
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
