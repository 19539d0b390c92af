//! Rewindable buffer over one batch of its child.
//!
//! A merge join needs to re-read runs of equal inner keys. [`Materialize`]
//! keeps every row it has returned for the current batch so a marked
//! position can be restored, which plain scans do not support.

use crate::row::{Row, RowSchema};

use super::{Operator, OperatorError, OperatorKind, Output};

/// Buffers its child's rows and supports mark/restore.
pub struct Materialize {
    child: Box<dyn Operator>,
    buffer: Vec<Row>,
    /// Index into `buffer` of the next row to return.
    position: usize,
    /// Value of `position` when the mark was taken.
    mark: Option<usize>,
    /// End marker the child reported, once seen.
    child_end: Option<Output>,
    trim_on_mark: bool,
    trimmed: usize,
}

impl Materialize {
    /// Wraps `child`.
    #[must_use]
    pub fn new(child: Box<dyn Operator>) -> Self {
        Self {
            child,
            buffer: Vec::new(),
            position: 0,
            mark: None,
            child_end: None,
            trim_on_mark: false,
            trimmed: 0,
        }
    }

    /// Drops buffered rows before each new mark.
    ///
    /// Only rows at or after the mark can be restored afterwards; a rescan
    /// re-reads the child instead of the buffer either way.
    #[must_use]
    pub fn trim_on_mark(mut self, enabled: bool) -> Self {
        self.trim_on_mark = enabled;
        self
    }

    /// Rows currently held.
    #[must_use]
    pub fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }

    /// Rows discarded by trimming in this batch.
    #[must_use]
    pub fn trimmed_rows(&self) -> usize {
        self.trimmed
    }
}

impl Operator for Materialize {
    fn schema(&self) -> &RowSchema {
        self.child.schema()
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Materialize
    }

    fn next(&mut self) -> Result<Output, OperatorError> {
        if let Some(row) = self.buffer.get(self.position) {
            self.position += 1;
            return Ok(Output::Row(row.clone()));
        }
        if let Some(end) = &self.child_end {
            return Ok(end.clone());
        }
        match self.child.next()? {
            Output::Row(row) => {
                self.buffer.push(row.clone());
                self.position += 1;
                Ok(Output::Row(row))
            }
            end => {
                self.child_end = Some(end.clone());
                Ok(end)
            }
        }
    }

    fn rescan(&mut self) -> Result<(), OperatorError> {
        self.buffer.clear();
        self.position = 0;
        self.mark = None;
        self.child_end = None;
        self.trimmed = 0;
        self.child.rescan()
    }

    fn init_incremental(&mut self) {
        self.child.init_incremental();
    }

    fn supports_mark_restore(&self) -> bool {
        true
    }

    fn mark_position(&mut self) -> Result<(), OperatorError> {
        if self.trim_on_mark && self.position > 0 {
            self.buffer.drain(..self.position);
            self.trimmed += self.position;
            self.position = 0;
        }
        self.mark = Some(self.position);
        Ok(())
    }

    fn restore_position(&mut self) -> Result<(), OperatorError> {
        self.position = self.mark.ok_or(OperatorError::NoMarkedPosition)?;
        Ok(())
    }

    fn child_mut(&mut self) -> Option<&mut dyn Operator> {
        Some(&mut *self.child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::DeltaScan;
    use crate::row::{ColumnType, Datum};

    fn materialized(keys: &[i64]) -> Materialize {
        let mut scan = DeltaScan::new(RowSchema::new(vec![("k", ColumnType::Int64)]));
        scan.push_batch(keys.iter().map(|k| Row::new(vec![Datum::Int64(*k)])).collect());
        Materialize::new(Box::new(scan))
    }

    fn key(output: Output) -> Option<i64> {
        match output.into_row()?.get(0) {
            Some(Datum::Int64(v)) => Some(*v),
            _ => None,
        }
    }

    #[test]
    fn test_restore_returns_row_after_mark() {
        let mut mat = materialized(&[1, 2, 3, 4]);
        assert_eq!(key(mat.next().unwrap()), Some(1));
        assert_eq!(key(mat.next().unwrap()), Some(2));
        mat.mark_position().unwrap();
        assert_eq!(key(mat.next().unwrap()), Some(3));
        assert_eq!(key(mat.next().unwrap()), Some(4));
        assert_eq!(mat.next().unwrap(), Output::EndOfBatch);

        mat.restore_position().unwrap();
        assert_eq!(key(mat.next().unwrap()), Some(3));
    }

    #[test]
    fn test_restore_without_mark_fails() {
        let mut mat = materialized(&[1]);
        assert!(matches!(
            mat.restore_position(),
            Err(OperatorError::NoMarkedPosition)
        ));
    }

    #[test]
    fn test_trim_on_mark_drops_prefix() {
        let mut mat = materialized(&[1, 2, 3]).trim_on_mark(true);
        mat.next().unwrap();
        mat.next().unwrap();
        mat.mark_position().unwrap();
        assert_eq!(mat.trimmed_rows(), 2);
        assert_eq!(mat.buffered_rows(), 0);
        assert_eq!(key(mat.next().unwrap()), Some(3));
        mat.restore_position().unwrap();
        assert_eq!(key(mat.next().unwrap()), Some(3));
    }

    #[test]
    fn test_rescan_rereads_child() {
        let mut mat = materialized(&[7, 8]);
        mat.next().unwrap();
        mat.mark_position().unwrap();
        mat.rescan().unwrap();
        assert_eq!(mat.buffered_rows(), 0);
        assert!(matches!(
            mat.restore_position(),
            Err(OperatorError::NoMarkedPosition)
        ));
        assert_eq!(key(mat.next().unwrap()), Some(7));
    }
}
