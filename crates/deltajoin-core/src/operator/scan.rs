//! Batch sources.
//!
//! [`DeltaScan`] replays in-memory delta batches; [`ChannelScan`] reads rows a
//! producer process pushes through a row channel. Both are incremental
//! nodes: each batch ends with [`Output::EndOfBatch`], the last one with
//! [`Output::Complete`], and `reset_state` moves them to the next batch.

use std::collections::VecDeque;

use crate::channel::ChannelReader;
use crate::row::{Row, RowSchema};

use super::{Operator, OperatorError, OperatorKind, Output};

/// What a [`DeltaScan`] returns for each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Every row seen so far, followed by the current batch
    #[default]
    Full,
    /// Only the current batch
    Delta,
}

/// In-memory source of delta batches.
#[derive(Debug)]
pub struct DeltaScan {
    schema: RowSchema,
    pending: VecDeque<Vec<Row>>,
    /// The batch being scanned, once loaded.
    current: Option<Vec<Row>>,
    position: usize,
    /// Rows of all batches already consumed.
    history: Vec<Row>,
    mode: ScanMode,
    finished: bool,
    batches_loaded: u64,
}

impl DeltaScan {
    /// Creates an empty scan in [`ScanMode::Full`].
    #[must_use]
    pub fn new(schema: RowSchema) -> Self {
        Self {
            schema,
            pending: VecDeque::new(),
            current: None,
            position: 0,
            history: Vec::new(),
            mode: ScanMode::default(),
            finished: false,
            batches_loaded: 0,
        }
    }

    /// Queues one batch of changed rows.
    pub fn push_batch(&mut self, rows: Vec<Row>) {
        self.pending.push_back(rows);
    }

    /// Declares that no further batches will be pushed.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Returns true once [`finish`](Self::finish) has been called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Current scan mode.
    #[must_use]
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Rows of all fully consumed batches.
    #[must_use]
    pub fn history(&self) -> &[Row] {
        &self.history
    }

    /// Number of batches queued but not yet loaded.
    #[must_use]
    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    fn load_next(&mut self) {
        if let Some(rows) = self.pending.pop_front() {
            self.batches_loaded += 1;
            tracing::trace!(
                batch = self.batches_loaded,
                rows = rows.len(),
                mode = ?self.mode,
                "delta scan loaded batch"
            );
            self.current = Some(rows);
            self.position = 0;
        }
    }

    fn row_at(&self, index: usize) -> Option<&Row> {
        // Once the queue runs dry a full scan still serves its history.
        let delta = self.current.as_deref().unwrap_or_default();
        match self.mode {
            ScanMode::Delta => delta.get(index),
            ScanMode::Full if index < self.history.len() => self.history.get(index),
            ScanMode::Full => delta.get(index - self.history.len()),
        }
    }
}

impl Operator for DeltaScan {
    fn schema(&self) -> &RowSchema {
        &self.schema
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::DeltaScan
    }

    fn next(&mut self) -> Result<Output, OperatorError> {
        if self.current.is_none() {
            self.load_next();
        }
        if let Some(row) = self.row_at(self.position).cloned() {
            self.position += 1;
            return Ok(Output::Row(row));
        }
        if self.finished && self.pending.is_empty() {
            Ok(Output::Complete)
        } else {
            Ok(Output::EndOfBatch)
        }
    }

    fn rescan(&mut self) -> Result<(), OperatorError> {
        self.position = 0;
        Ok(())
    }

    fn reset_state(&mut self) -> Result<(), OperatorError> {
        // A batch this side never pulled still belongs to the round just
        // finished.
        if self.current.is_none() {
            self.load_next();
        }
        if let Some(rows) = self.current.take() {
            self.history.extend(rows);
        }
        self.position = 0;
        Ok(())
    }

    fn init_delta(&mut self) -> Result<(), OperatorError> {
        self.mode = ScanMode::Delta;
        tracing::debug!("delta scan switched to delta mode");
        Ok(())
    }
}

/// Source reading rows from the consumer end of a row channel.
///
/// A batch is everything read until the channel reports "done". Rows of the
/// current batch are retained so the scan can be rescanned.
#[derive(Debug)]
pub struct ChannelScan {
    reader: ChannelReader,
    schema: RowSchema,
    batch: Vec<Row>,
    /// Replay position into `batch` after a rescan.
    replay: Option<usize>,
    batch_ended: bool,
    complete: bool,
}

impl ChannelScan {
    /// Wraps a channel reader.
    #[must_use]
    pub fn new(reader: ChannelReader) -> Self {
        let schema = reader.codec().schema().clone();
        Self {
            reader,
            schema,
            batch: Vec::new(),
            replay: None,
            batch_ended: false,
            complete: false,
        }
    }

    /// Rows read in the current batch so far.
    #[must_use]
    pub fn batch_rows(&self) -> usize {
        self.batch.len()
    }

    /// Gives back the channel reader.
    #[must_use]
    pub fn into_reader(self) -> ChannelReader {
        self.reader
    }

    fn end_output(&self) -> Output {
        if self.complete {
            Output::Complete
        } else {
            Output::EndOfBatch
        }
    }
}

impl Operator for ChannelScan {
    fn schema(&self) -> &RowSchema {
        &self.schema
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::ChannelScan
    }

    fn next(&mut self) -> Result<Output, OperatorError> {
        if let Some(position) = self.replay {
            if let Some(row) = self.batch.get(position) {
                self.replay = Some(position + 1);
                return Ok(Output::Row(row.clone()));
            }
            self.replay = None;
            if self.batch_ended {
                return Ok(self.end_output());
            }
        }
        if self.batch_ended {
            return Ok(self.end_output());
        }

        // Sample the flag before reading: rows written before `finish` are
        // then guaranteed to be seen by this read.
        let finished = self.reader.is_finished();
        match self.reader.read()? {
            Some(row) => {
                self.batch.push(row.clone());
                Ok(Output::Row(row))
            }
            None => {
                self.batch_ended = true;
                self.complete = finished;
                tracing::trace!(rows = self.batch.len(), finished, "channel scan batch ended");
                Ok(self.end_output())
            }
        }
    }

    fn rescan(&mut self) -> Result<(), OperatorError> {
        self.replay = Some(0);
        Ok(())
    }

    fn finish_batch(&mut self) -> Result<(), OperatorError> {
        let mut unread = 0usize;
        while !self.batch_ended {
            let finished = self.reader.is_finished();
            match self.reader.read()? {
                Some(row) => {
                    self.batch.push(row);
                    unread += 1;
                }
                None => {
                    self.batch_ended = true;
                    self.complete = finished;
                }
            }
        }
        if unread > 0 {
            tracing::debug!(unread, "channel scan consumed unread rows of the batch");
        }
        Ok(())
    }

    fn reset_state(&mut self) -> Result<(), OperatorError> {
        self.finish_batch()?;
        self.batch.clear();
        self.replay = None;
        self.batch_ended = false;
        Ok(())
    }
}
