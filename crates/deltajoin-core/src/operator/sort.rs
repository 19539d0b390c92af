//! Blocking sort over one batch of its child.

use crate::row::{compare_datums, Datum, Row, RowSchema, SortOrder};

use super::{Operator, OperatorError, OperatorKind, Output};

/// One sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    /// Column index in the child's rows
    pub column: usize,
    /// Direction and null placement
    pub order: SortOrder,
}

impl SortKey {
    /// Ascending, nulls last.
    #[must_use]
    pub fn asc(column: usize) -> Self {
        Self {
            column,
            order: SortOrder::ASC,
        }
    }
}

#[derive(Debug)]
enum SortState {
    Filling,
    Emitting { end: Output },
}

/// Reads the child's current batch to its end, then returns it sorted.
///
/// The batch end the child reported is passed through after the last row.
pub struct Sort {
    child: Box<dyn Operator>,
    keys: Vec<SortKey>,
    buffer: Vec<Row>,
    position: usize,
    state: SortState,
}

impl Sort {
    /// Sorts `child` by `keys` (stable; no keys keeps input order).
    #[must_use]
    pub fn new(child: Box<dyn Operator>, keys: Vec<SortKey>) -> Self {
        Self {
            child,
            keys,
            buffer: Vec::new(),
            position: 0,
            state: SortState::Filling,
        }
    }

    fn fill(&mut self) -> Result<Output, OperatorError> {
        loop {
            match self.child.next()? {
                Output::Row(row) => self.buffer.push(row),
                end => {
                    let keys = &self.keys;
                    self.buffer.sort_by(|a, b| {
                        keys.iter()
                            .map(|k| {
                                compare_datums(
                                    a.get(k.column).unwrap_or(&Datum::Null),
                                    b.get(k.column).unwrap_or(&Datum::Null),
                                    k.order,
                                )
                            })
                            .find(|ord| ord.is_ne())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    tracing::trace!(rows = self.buffer.len(), "sort buffered batch");
                    return Ok(end);
                }
            }
        }
    }
}

impl Operator for Sort {
    fn schema(&self) -> &RowSchema {
        self.child.schema()
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Sort
    }

    fn next(&mut self) -> Result<Output, OperatorError> {
        if let SortState::Filling = self.state {
            let end = self.fill()?;
            self.state = SortState::Emitting { end };
        }
        let SortState::Emitting { end } = &self.state else {
            return Err(OperatorError::Internal("sort left filling state"));
        };
        match self.buffer.get(self.position) {
            Some(row) => {
                self.position += 1;
                Ok(Output::Row(row.clone()))
            }
            None => Ok(end.clone()),
        }
    }

    fn rescan(&mut self) -> Result<(), OperatorError> {
        self.buffer.clear();
        self.position = 0;
        self.state = SortState::Filling;
        self.child.rescan()
    }

    fn init_incremental(&mut self) {
        self.child.init_incremental();
    }

    fn child_mut(&mut self) -> Option<&mut dyn Operator> {
        Some(&mut *self.child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::DeltaScan;
    use crate::row::ColumnType;

    fn scan(keys: &[Option<i64>]) -> DeltaScan {
        let mut scan = DeltaScan::new(RowSchema::new(vec![("k", ColumnType::Int64)]));
        scan.push_batch(
            keys.iter()
                .map(|k| Row::new(vec![k.map_or(Datum::Null, Datum::Int64)]))
                .collect(),
        );
        scan.finish();
        scan
    }

    fn keys(op: &mut dyn Operator) -> Vec<Option<i64>> {
        let mut out = Vec::new();
        while let Output::Row(row) = op.next().unwrap() {
            out.push(match row.get(0) {
                Some(Datum::Int64(v)) => Some(*v),
                _ => None,
            });
        }
        out
    }

    #[test]
    fn test_sorts_ascending_nulls_last() {
        let mut sort = Sort::new(
            Box::new(scan(&[Some(3), None, Some(1), Some(2)])),
            vec![SortKey::asc(0)],
        );
        assert_eq!(keys(&mut sort), vec![Some(1), Some(2), Some(3), None]);
        assert_eq!(sort.next().unwrap(), Output::Complete);
    }

    #[test]
    fn test_sorts_descending() {
        let mut sort = Sort::new(
            Box::new(scan(&[Some(1), Some(3), Some(2)])),
            vec![SortKey {
                column: 0,
                order: SortOrder::DESC,
            }],
        );
        assert_eq!(keys(&mut sort), vec![Some(3), Some(2), Some(1)]);
    }

    #[test]
    fn test_rescan_resorts_child_batch() {
        let mut sort = Sort::new(Box::new(scan(&[Some(2), Some(1)])), vec![SortKey::asc(0)]);
        assert_eq!(sort.next().unwrap().into_row().unwrap().get(0), Some(&Datum::Int64(1)));
        sort.rescan().unwrap();
        assert_eq!(keys(&mut sort), vec![Some(1), Some(2)]);
    }
}
