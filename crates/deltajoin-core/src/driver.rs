//! # Delta Driver
//!
//! Runs an incremental plan one batch at a time.
//!
//! The driver owns the root operator. Each [`DeltaDriver::run_batch`] call
//! resets the plan (except before the first batch), pulls rows until the
//! root reports the end of the batch or completion, and returns them. After
//! a batch ends with [`Output::Complete`] the driver refuses to run again.

use std::time::{Duration, Instant};

use crate::operator::{Operator, OperatorError, Output};
use crate::row::Row;

/// Rows produced by one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// Batch sequence number, starting at 1
    pub batch: u64,
    /// Rows emitted during the batch
    pub rows: Vec<Row>,
    /// The plan reported completion at the end of this batch
    pub complete: bool,
    /// Wall time spent pulling the batch
    pub elapsed: Duration,
}

/// Batch-at-a-time executor for an incremental plan
pub struct DeltaDriver {
    plan: Box<dyn Operator>,
    batches_run: u64,
    rows_emitted: u64,
    complete: bool,
}

impl DeltaDriver {
    /// Takes ownership of `plan` and prepares it for incremental execution.
    #[must_use]
    pub fn new(mut plan: Box<dyn Operator>) -> Self {
        plan.init_incremental();
        Self {
            plan,
            batches_run: 0,
            rows_emitted: 0,
            complete: false,
        }
    }

    /// Switches the plan's sources to delta-only mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan cannot be switched.
    pub fn init_delta(&mut self) -> Result<(), OperatorError> {
        self.plan.init_delta()
    }

    /// Runs the plan for one batch.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::AdvancedPastCompletion`] if the plan already
    /// completed, or any error the plan raises.
    pub fn run_batch(&mut self) -> Result<BatchResult, OperatorError> {
        if self.complete {
            return Err(OperatorError::AdvancedPastCompletion(self.plan.kind()));
        }
        if self.batches_run > 0 {
            self.plan.reset_state()?;
        }

        let start = Instant::now();
        let mut rows = Vec::new();
        let complete = loop {
            match self.plan.next()? {
                Output::Row(row) => rows.push(row),
                Output::EndOfBatch => break false,
                Output::Complete => break true,
            }
        };

        self.batches_run += 1;
        self.rows_emitted += rows.len() as u64;
        self.complete = complete;
        let elapsed = start.elapsed();
        tracing::info!(
            batch = self.batches_run,
            rows = rows.len(),
            complete,
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "batch finished"
        );

        Ok(BatchResult {
            batch: self.batches_run,
            rows,
            complete,
            elapsed,
        })
    }

    /// Runs batches until the plan completes or `max_batches` have run.
    ///
    /// # Errors
    ///
    /// Returns the first error a batch raises.
    pub fn run_until_complete(&mut self, max_batches: usize) -> Result<Vec<BatchResult>, OperatorError> {
        let mut results = Vec::new();
        while !self.complete && results.len() < max_batches {
            results.push(self.run_batch()?);
        }
        if !self.complete {
            tracing::warn!(max_batches, "plan did not complete within the batch limit");
        }
        Ok(results)
    }

    /// Batches run so far.
    #[must_use]
    pub fn batches_run(&self) -> u64 {
        self.batches_run
    }

    /// Rows emitted over all batches.
    #[must_use]
    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    /// Returns true once the plan has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The root operator.
    #[must_use]
    pub fn plan(&self) -> &dyn Operator {
        &*self.plan
    }
}
