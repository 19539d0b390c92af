//! Join qualifiers.
//!
//! A [`Predicate`] is evaluated against the current outer/inner row pair with
//! SQL three-valued logic. A side that is being null-filled is passed as
//! `None` and every column on it reads as NULL.

use std::cmp::Ordering;

use crate::row::{compare_datums, Datum, Row, SortOrder};

use super::OperatorError;

/// A value referenced by a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Column of the outer (left) row.
    Outer(usize),
    /// Column of the inner (right) row.
    Inner(usize),
    /// A constant.
    Literal(Datum),
}

impl Operand {
    fn resolve<'a>(&'a self, outer: Option<&'a Row>, inner: Option<&'a Row>) -> &'a Datum {
        const NULL: &Datum = &Datum::Null;
        match self {
            Operand::Outer(i) => outer.and_then(|r| r.get(*i)).unwrap_or(NULL),
            Operand::Inner(i) => inner.and_then(|r| r.get(*i)).unwrap_or(NULL),
            Operand::Literal(d) => d,
        }
    }

    fn validate(&self, outer_width: usize, inner_width: usize) -> Result<(), OperatorError> {
        match *self {
            Operand::Outer(index) if index >= outer_width => Err(OperatorError::ColumnOutOfRange {
                index,
                width: outer_width,
            }),
            Operand::Inner(index) if index >= inner_width => Err(OperatorError::ColumnOutOfRange {
                index,
                width: inner_width,
            }),
            _ => Ok(()),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CmpOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::NotEq => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::LtEq => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::GtEq => ord != Ordering::Less,
        }
    }
}

/// A boolean qualifier over an outer/inner row pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Constant TRUE, FALSE or NULL (`None`).
    Const(Option<bool>),
    /// Binary comparison; NULL if either side is NULL.
    Compare {
        /// Left operand.
        left: Operand,
        /// Operator.
        op: CmpOp,
        /// Right operand.
        right: Operand,
    },
    /// `operand IS NULL`.
    IsNull(Operand),
    /// Negation.
    Not(Box<Predicate>),
    /// Conjunction; an empty list is TRUE.
    And(Vec<Predicate>),
    /// Disjunction; an empty list is FALSE.
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Shorthand for `outer[left] op inner[right]`.
    #[must_use]
    pub fn columns(left: usize, op: CmpOp, right: usize) -> Self {
        Predicate::Compare {
            left: Operand::Outer(left),
            op,
            right: Operand::Inner(right),
        }
    }

    /// Evaluates with three-valued logic.
    #[must_use]
    pub fn eval(&self, outer: Option<&Row>, inner: Option<&Row>) -> Option<bool> {
        match self {
            Predicate::Const(v) => *v,
            Predicate::Compare { left, op, right } => {
                let l = left.resolve(outer, inner);
                let r = right.resolve(outer, inner);
                if l.is_null() || r.is_null() {
                    None
                } else {
                    Some(op.holds(compare_datums(l, r, SortOrder::ASC)))
                }
            }
            Predicate::IsNull(operand) => Some(operand.resolve(outer, inner).is_null()),
            Predicate::Not(inner_pred) => inner_pred.eval(outer, inner).map(|b| !b),
            Predicate::And(list) => {
                let mut result = Some(true);
                for p in list {
                    match p.eval(outer, inner) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Predicate::Or(list) => {
                let mut result = Some(false);
                for p in list {
                    match p.eval(outer, inner) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
        }
    }

    /// True only if the predicate evaluates to TRUE (NULL fails).
    #[must_use]
    pub fn passes(&self, outer: Option<&Row>, inner: Option<&Row>) -> bool {
        self.eval(outer, inner) == Some(true)
    }

    /// Classifies a qualifier that is built only from constants.
    ///
    /// Returns `Some(true)` for constant TRUE, `Some(false)` for constant
    /// FALSE or NULL, and `None` if it references any column.
    #[must_use]
    pub fn constant_value(&self) -> Option<bool> {
        match self {
            Predicate::Const(v) => Some(*v == Some(true)),
            Predicate::And(list) => {
                let mut all_true = true;
                for p in list {
                    all_true &= p.constant_value()?;
                }
                Some(all_true)
            }
            _ => None,
        }
    }

    /// Checks every column reference against the input widths.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::ColumnOutOfRange`] for the first bad reference.
    pub fn validate(&self, outer_width: usize, inner_width: usize) -> Result<(), OperatorError> {
        match self {
            Predicate::Const(_) => Ok(()),
            Predicate::Compare { left, right, .. } => {
                left.validate(outer_width, inner_width)?;
                right.validate(outer_width, inner_width)
            }
            Predicate::IsNull(operand) => operand.validate(outer_width, inner_width),
            Predicate::Not(p) => p.validate(outer_width, inner_width),
            Predicate::And(list) | Predicate::Or(list) => list
                .iter()
                .try_for_each(|p| p.validate(outer_width, inner_width)),
        }
    }
}
