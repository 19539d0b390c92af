//! # Incremental Merge Join
//!
//! A sort-merge join that is re-executed once per delta batch.
//!
//! Both inputs must be sorted on the merge keys. The join walks them in
//! lockstep as a state machine ([`JoinState`]); one call to `next()` runs the
//! machine until it produces a row or runs out of input. When the current
//! batch is exhausted the operator rewinds itself and its inner input and
//! reports [`Output::EndOfBatch`]; once the outer input has reported
//! [`Output::Complete`] it reports `Complete` instead, and pulling again is an
//! error.
//!
//! ## Join Types
//!
//! - **Inner**: only matched pairs
//! - **Left** / **Right** / **Full**: unmatched rows of the preserved side(s)
//!   are emitted with the other side null-filled
//! - **Semi**: each outer row with at least one match, once
//! - **Anti**: each outer row with no match
//!
//! Semi and anti joins produce outer rows only; all others produce the
//! outer columns followed by the inner columns.
//!
//! ## Re-reading the inner input
//!
//! Runs of equal inner keys are re-read for every outer row with that key.
//! The join marks the first inner row of a run and restores to it, so the
//! inner input must support mark/restore (wrap it in
//! [`Materialize`](super::Materialize)). When each outer row can match at
//! most one inner row, `skip_mark_restore` avoids this.
//!
//! ## Example
//!
//! ```rust
//! use deltajoin_core::operator::merge_join::{JoinType, MergeClause, MergeJoinConfig};
//!
//! let config = MergeJoinConfig::builder()
//!     .join_type(JoinType::Left)
//!     .clause(MergeClause::new(0, 0))
//!     .operator_id("orders_payments")
//!     .build();
//! assert_eq!(config.clauses.len(), 1);
//! ```

use std::cmp::Ordering;
use std::fmt;

use crate::row::{compare_datums, Datum, Row, RowSchema, SortOrder};

use super::predicate::Predicate;
use super::{nearest_incremental_mut, Operator, OperatorError, OperatorKind, Output};

/// Join type for merge joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    /// Inner join - only emit matched pairs.
    #[default]
    Inner,
    /// Left outer join - emit all outer rows, null-filled if unmatched.
    Left,
    /// Right outer join - emit all inner rows, null-filled if unmatched.
    Right,
    /// Full outer join - emit all rows of both sides.
    Full,
    /// Semi join - emit each outer row that has a match, once.
    Semi,
    /// Anti join - emit each outer row that has no match.
    Anti,
}

impl JoinType {
    /// Returns true if unmatched outer rows are emitted.
    #[must_use]
    pub fn emits_unmatched_outer(&self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full | JoinType::Anti)
    }

    /// Returns true if unmatched inner rows are emitted.
    #[must_use]
    pub fn emits_unmatched_inner(&self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }

    /// Returns true if output rows carry only the outer columns.
    #[must_use]
    pub fn projects_outer_only(&self) -> bool {
        matches!(self, JoinType::Semi | JoinType::Anti)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "inner"),
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
            Self::Full => write!(f, "full"),
            Self::Semi => write!(f, "semi"),
            Self::Anti => write!(f, "anti"),
        }
    }
}

impl std::str::FromStr for JoinType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inner" => Ok(Self::Inner),
            "left" | "left_outer" => Ok(Self::Left),
            "right" | "right_outer" => Ok(Self::Right),
            "full" | "full_outer" => Ok(Self::Full),
            "semi" => Ok(Self::Semi),
            "anti" => Ok(Self::Anti),
            _ => Err(format!(
                "Unknown join type: {s}. Expected one of inner, left, right, full, semi, anti"
            )),
        }
    }
}

/// States of the merge join automaton.
///
/// The discriminants are stable and usable as a compact state code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum JoinState {
    /// Fetch the first outer row of the batch.
    #[default]
    InitOuter = 1,
    /// Fetch the first inner row of the batch.
    InitInner = 2,
    /// Current outer and inner rows have equal keys; try to emit them.
    JoinTuples = 3,
    /// Advance the outer input after a run of matches.
    NextOuter = 4,
    /// Compare a new outer row with the marked inner row.
    TestOuter = 5,
    /// Advance the inner input within a run of matches.
    NextInner = 6,
    /// Compare current keys and decide which side to advance.
    SkipTest = 7,
    /// Outer key is smaller; advance the outer input.
    SkipOuterAdvance = 8,
    /// Inner key is larger; advance the inner input.
    SkipInnerAdvance = 9,
    /// Outer input is exhausted; drain unmatched inner rows.
    EndOuter = 10,
    /// Inner input is exhausted; drain unmatched outer rows.
    EndInner = 11,
}

impl JoinState {
    /// Compact state code.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for JoinState {
    type Error = OperatorError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => Self::InitOuter,
            2 => Self::InitInner,
            3 => Self::JoinTuples,
            4 => Self::NextOuter,
            5 => Self::TestOuter,
            6 => Self::NextInner,
            7 => Self::SkipTest,
            8 => Self::SkipOuterAdvance,
            9 => Self::SkipInnerAdvance,
            10 => Self::EndOuter,
            11 => Self::EndInner,
            other => return Err(OperatorError::UnknownJoinState(other)),
        })
    }
}

impl fmt::Display for JoinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InitOuter => "INITIALIZE_OUTER",
            Self::InitInner => "INITIALIZE_INNER",
            Self::JoinTuples => "JOINTUPLES",
            Self::NextOuter => "NEXTOUTER",
            Self::TestOuter => "TESTOUTER",
            Self::NextInner => "NEXTINNER",
            Self::SkipTest => "SKIP_TEST",
            Self::SkipOuterAdvance => "SKIPOUTER_ADVANCE",
            Self::SkipInnerAdvance => "SKIPINNER_ADVANCE",
            Self::EndOuter => "ENDOUTER",
            Self::EndInner => "ENDINNER",
        };
        f.write_str(name)
    }
}

/// One equality condition the inputs are sorted and merged on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeClause {
    /// Key column in the outer rows.
    pub outer_key: usize,
    /// Key column in the inner rows.
    pub inner_key: usize,
    /// Sort order both inputs follow on this key.
    pub order: SortOrder,
}

impl MergeClause {
    /// Ascending, nulls-last clause on `outer_key = inner_key`.
    #[must_use]
    pub fn new(outer_key: usize, inner_key: usize) -> Self {
        Self {
            outer_key,
            inner_key,
            order: SortOrder::ASC,
        }
    }

    /// Sets the sort order.
    #[must_use]
    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }
}

/// Configuration for merge joins.
#[derive(Debug, Clone, Default)]
pub struct MergeJoinConfig {
    /// Type of join to perform.
    pub join_type: JoinType,
    /// Merge clauses, most significant first.
    pub clauses: Vec<MergeClause>,
    /// Extra conditions a key match must satisfy to count as a match.
    pub join_qual: Option<Predicate>,
    /// Filter applied to every candidate output row.
    pub other_qual: Option<Predicate>,
    /// Each outer row matches at most one inner row.
    pub inner_unique: bool,
    /// Do not mark/restore the inner input (requires single-match joins).
    pub skip_mark_restore: bool,
    /// Also mark the inner input while skipping unmatched inner rows.
    pub extra_marks: bool,
    /// Operator ID for logging.
    pub operator_id: Option<String>,
}

impl MergeJoinConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> MergeJoinConfigBuilder {
        MergeJoinConfigBuilder::default()
    }
}

/// Builder for `MergeJoinConfig`.
#[derive(Debug, Default)]
pub struct MergeJoinConfigBuilder {
    config: MergeJoinConfig,
}

impl MergeJoinConfigBuilder {
    /// Sets the join type.
    #[must_use]
    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.config.join_type = join_type;
        self
    }

    /// Appends a merge clause.
    #[must_use]
    pub fn clause(mut self, clause: MergeClause) -> Self {
        self.config.clauses.push(clause);
        self
    }

    /// Sets the extra join conditions.
    #[must_use]
    pub fn join_qual(mut self, qual: Predicate) -> Self {
        self.config.join_qual = Some(qual);
        self
    }

    /// Sets the output filter.
    #[must_use]
    pub fn other_qual(mut self, qual: Predicate) -> Self {
        self.config.other_qual = Some(qual);
        self
    }

    /// Declares the inner side unique on the merge keys.
    #[must_use]
    pub fn inner_unique(mut self, enabled: bool) -> Self {
        self.config.inner_unique = enabled;
        self
    }

    /// Skips inner mark/restore.
    #[must_use]
    pub fn skip_mark_restore(mut self, enabled: bool) -> Self {
        self.config.skip_mark_restore = enabled;
        self
    }

    /// Enables marking while skipping inner rows.
    #[must_use]
    pub fn extra_marks(mut self, enabled: bool) -> Self {
        self.config.extra_marks = enabled;
        self
    }

    /// Sets the operator ID.
    #[must_use]
    pub fn operator_id(mut self, id: impl Into<String>) -> Self {
        self.config.operator_id = Some(id.into());
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> MergeJoinConfig {
        self.config
    }
}

/// Metrics for tracking merge join execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinMetrics {
    /// Outer rows fetched.
    pub outer_rows: u64,
    /// Inner rows fetched (re-reads after a restore included).
    pub inner_rows: u64,
    /// Matched rows emitted.
    pub matches: u64,
    /// Null-filled outer rows emitted.
    pub unmatched_outer: u64,
    /// Null-filled inner rows emitted.
    pub unmatched_inner: u64,
    /// Key matches rejected by the join condition.
    pub join_qual_rejects: u64,
    /// Candidate rows rejected by the output filter.
    pub other_qual_rejects: u64,
    /// Batches finished without completing.
    pub batches: u64,
}

impl JoinMetrics {
    /// Creates new metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Classification of a row's merge key values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyEval {
    /// Keys are non-null; the row can match.
    Matchable,
    /// Some key is null; the row can never match.
    NonMatchable,
    /// No row, or no later row of this side can match.
    EndOfJoin,
}

/// Which inner row to evaluate keys for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InnerRow {
    Current,
    Marked,
}

/// Result of running one automaton state.
enum Step {
    Continue,
    Emit(Row),
    Done,
}

/// Per-batch execution state.
#[derive(Debug, Default)]
struct MergeState {
    join_state: JoinState,
    outer_row: Option<Row>,
    inner_row: Option<Row>,
    /// First inner row of the current run of equal keys.
    marked_row: Option<Row>,
    matched_outer: bool,
    matched_inner: bool,
    /// Key values of the current outer row, one per clause.
    outer_keys: Vec<Datum>,
    /// Key values of the last evaluated inner row, one per clause.
    inner_keys: Vec<Datum>,
}

impl MergeState {
    fn new(clauses: usize) -> Self {
        Self {
            outer_keys: vec![Datum::Null; clauses],
            inner_keys: vec![Datum::Null; clauses],
            ..Self::default()
        }
    }

    fn reset(&mut self) {
        self.join_state = JoinState::InitOuter;
        self.outer_row = None;
        self.inner_row = None;
        self.marked_row = None;
        self.matched_outer = false;
        self.matched_inner = false;
        self.outer_keys.fill(Datum::Null);
        self.inner_keys.fill(Datum::Null);
    }
}

/// Incremental merge join operator.
///
/// # Batch lifecycle
///
/// Within a batch, `next()` returns joined rows. When the batch runs dry the
/// join clears its state (including the marked inner row), rescans its inner
/// input and returns [`Output::EndOfBatch`]; further pulls keep returning it
/// until [`Operator::reset_state`] moves both inputs to the next batch. Once
/// the outer input reports [`Output::Complete`] the join finishes the batch
/// and returns `Complete`; any later pull fails with
/// [`OperatorError::AdvancedPastCompletion`].
pub struct MergeJoinOperator {
    outer: Box<dyn Operator>,
    inner: Box<dyn Operator>,
    operator_id: String,
    join_type: JoinType,
    clauses: Vec<MergeClause>,
    join_qual: Option<Predicate>,
    other_qual: Option<Predicate>,
    fill_outer: bool,
    fill_inner: bool,
    single_match: bool,
    skip_mark_restore: bool,
    extra_marks: bool,
    /// The join condition is constant FALSE: nothing ever matches.
    const_false_join: bool,
    schema: RowSchema,
    outer_width: usize,
    inner_width: usize,
    state: MergeState,
    /// The outer input has reported completion.
    complete: bool,
    /// `Complete` has been returned to the caller.
    complete_returned: bool,
    batch_ended: bool,
    metrics: JoinMetrics,
}

impl MergeJoinOperator {
    /// Plans a merge join of `outer` and `inner`.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidPlan`] if there is no merge clause, the
    /// inner input cannot mark/restore (and `skip_mark_restore` is off),
    /// `skip_mark_restore` is requested for a join that can match an outer row
    /// more than once, or a right/full join has a non-constant extra join
    /// condition. Returns [`OperatorError::ColumnOutOfRange`] for a key or
    /// qualifier column outside its input.
    pub fn try_new(
        outer: Box<dyn Operator>,
        inner: Box<dyn Operator>,
        config: MergeJoinConfig,
    ) -> Result<Self, OperatorError> {
        let MergeJoinConfig {
            join_type,
            clauses,
            mut join_qual,
            other_qual,
            inner_unique,
            skip_mark_restore,
            extra_marks,
            operator_id,
        } = config;

        if clauses.is_empty() {
            return Err(OperatorError::InvalidPlan(
                "merge join needs at least one merge clause".to_string(),
            ));
        }
        let outer_width = outer.schema().width();
        let inner_width = inner.schema().width();
        for clause in &clauses {
            if clause.outer_key >= outer_width {
                return Err(OperatorError::ColumnOutOfRange {
                    index: clause.outer_key,
                    width: outer_width,
                });
            }
            if clause.inner_key >= inner_width {
                return Err(OperatorError::ColumnOutOfRange {
                    index: clause.inner_key,
                    width: inner_width,
                });
            }
        }
        for qual in join_qual.iter().chain(other_qual.iter()) {
            qual.validate(outer_width, inner_width)?;
        }

        let fill_outer = join_type.emits_unmatched_outer();
        let fill_inner = join_type.emits_unmatched_inner();
        let single_match = inner_unique || join_type == JoinType::Semi;

        // Constant join conditions are folded; FALSE means no row pair ever
        // matches, which the key comparison then enforces.
        let mut const_false_join = false;
        if let Some(value) = join_qual.as_ref().and_then(Predicate::constant_value) {
            const_false_join = !value;
            join_qual = None;
        }
        if fill_inner && join_qual.is_some() {
            return Err(OperatorError::InvalidPlan(format!(
                "{join_type} merge join supports only merge-joinable join conditions"
            )));
        }
        if skip_mark_restore
            && !(single_match
                && join_qual.is_none()
                && matches!(join_type, JoinType::Inner | JoinType::Semi))
        {
            return Err(OperatorError::InvalidPlan(
                "inner mark/restore can only be skipped for single-match inner or semi joins \
                 without extra join conditions"
                    .to_string(),
            ));
        }
        if !skip_mark_restore && !inner.supports_mark_restore() {
            return Err(OperatorError::InvalidPlan(format!(
                "inner input {} does not support mark/restore; wrap it in Materialize",
                inner.kind()
            )));
        }

        let schema = if join_type.projects_outer_only() {
            outer.schema().clone()
        } else {
            outer.schema().concat(inner.schema())
        };
        let operator_id = operator_id.unwrap_or_else(|| "merge_join".to_string());
        tracing::debug!(
            operator_id = %operator_id,
            %join_type,
            clauses = clauses.len(),
            single_match,
            skip_mark_restore,
            const_false_join,
            "planned merge join"
        );

        Ok(Self {
            outer,
            inner,
            operator_id,
            join_type,
            state: MergeState::new(clauses.len()),
            clauses,
            join_qual,
            other_qual,
            fill_outer,
            fill_inner,
            single_match,
            skip_mark_restore,
            extra_marks,
            const_false_join,
            schema,
            outer_width,
            inner_width,
            complete: false,
            complete_returned: false,
            batch_ended: false,
            metrics: JoinMetrics::new(),
        })
    }

    /// Returns the join type.
    #[must_use]
    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    /// Returns the operator ID.
    #[must_use]
    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    /// Current automaton state.
    #[must_use]
    pub fn state(&self) -> JoinState {
        self.state.join_state
    }

    /// Returns true once the outer input has reported completion.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Returns true if each outer row is joined to at most one inner row.
    #[must_use]
    pub fn is_single_match(&self) -> bool {
        self.single_match
    }

    /// Returns true if the join condition folded to constant FALSE.
    #[must_use]
    pub fn is_const_false_join(&self) -> bool {
        self.const_false_join
    }

    /// Returns the join metrics.
    #[must_use]
    pub fn metrics(&self) -> &JoinMetrics {
        &self.metrics
    }

    /// Resets the join metrics.
    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }

    fn fetch_outer(&mut self) -> Result<(), OperatorError> {
        self.state.outer_row = match self.outer.next()? {
            Output::Row(row) => {
                self.metrics.outer_rows += 1;
                Some(row)
            }
            Output::EndOfBatch => None,
            Output::Complete => {
                if !self.complete {
                    tracing::debug!(operator_id = %self.operator_id, "outer input complete");
                }
                self.complete = true;
                None
            }
        };
        Ok(())
    }

    fn fetch_inner(&mut self) -> Result<(), OperatorError> {
        self.state.inner_row = match self.inner.next()? {
            Output::Row(row) => {
                self.metrics.inner_rows += 1;
                Some(row)
            }
            Output::EndOfBatch | Output::Complete => None,
        };
        Ok(())
    }

    /// Caches the current outer row's key values and classifies them.
    fn eval_outer_keys(&mut self) -> KeyEval {
        let Some(row) = &self.state.outer_row else {
            return KeyEval::EndOfJoin;
        };
        let mut result = KeyEval::Matchable;
        for (i, clause) in self.clauses.iter().enumerate() {
            let datum = row.get(clause.outer_key).cloned().unwrap_or(Datum::Null);
            if datum.is_null() {
                // Nulls sorting last on the leading key end the matchable
                // part of the input.
                if i == 0 && !clause.order.nulls_first && !self.fill_outer {
                    result = KeyEval::EndOfJoin;
                } else if result == KeyEval::Matchable {
                    result = KeyEval::NonMatchable;
                }
            }
            self.state.outer_keys[i] = datum;
        }
        result
    }

    /// Caches an inner row's key values and classifies them.
    fn eval_inner_keys(&mut self, which: InnerRow) -> KeyEval {
        let row = match which {
            InnerRow::Current => &self.state.inner_row,
            InnerRow::Marked => &self.state.marked_row,
        };
        let Some(row) = row else {
            return KeyEval::EndOfJoin;
        };
        let mut result = KeyEval::Matchable;
        for (i, clause) in self.clauses.iter().enumerate() {
            let datum = row.get(clause.inner_key).cloned().unwrap_or(Datum::Null);
            if datum.is_null() {
                if i == 0 && !clause.order.nulls_first && !self.fill_inner {
                    result = KeyEval::EndOfJoin;
                } else if result == KeyEval::Matchable {
                    result = KeyEval::NonMatchable;
                }
            }
            self.state.inner_keys[i] = datum;
        }
        result
    }

    /// Compares the cached outer and inner keys.
    ///
    /// Pairs of NULLs compare equal for ordering purposes, but a NULL never
    /// matches anything, so an otherwise-equal result involving them (or any
    /// equality under a constant-false join) is reported as "outer greater".
    fn compare_keys(&self) -> Ordering {
        let mut result = Ordering::Equal;
        let mut nulls_matched = false;
        for (i, clause) in self.clauses.iter().enumerate() {
            let outer = &self.state.outer_keys[i];
            let inner = &self.state.inner_keys[i];
            if outer.is_null() && inner.is_null() {
                nulls_matched = true;
                continue;
            }
            result = compare_datums(outer, inner, clause.order);
            if result != Ordering::Equal {
                break;
            }
        }
        if result == Ordering::Equal && (nulls_matched || self.const_false_join) {
            Ordering::Greater
        } else {
            result
        }
    }

    fn project(&self, outer: Option<&Row>, inner: Option<&Row>) -> Row {
        let outer = outer.cloned().unwrap_or_else(|| Row::nulls(self.outer_width));
        if self.join_type.projects_outer_only() {
            return outer;
        }
        let inner = inner.cloned().unwrap_or_else(|| Row::nulls(self.inner_width));
        Row::concat(&outer, &inner)
    }

    /// Null-fills the current outer row, if it passes the output filter.
    fn fill_outer_row(&mut self) -> Option<Row> {
        let outer = self.state.outer_row.as_ref()?;
        if self.other_qual.as_ref().map_or(true, |q| q.passes(Some(outer), None)) {
            let row = self.project(Some(outer), None);
            self.metrics.unmatched_outer += 1;
            Some(row)
        } else {
            self.metrics.other_qual_rejects += 1;
            None
        }
    }

    /// Null-fills the current inner row, if it passes the output filter.
    fn fill_inner_row(&mut self) -> Option<Row> {
        let inner = self.state.inner_row.as_ref()?;
        if self.other_qual.as_ref().map_or(true, |q| q.passes(None, Some(inner))) {
            let row = self.project(None, Some(inner));
            self.metrics.unmatched_inner += 1;
            Some(row)
        } else {
            self.metrics.other_qual_rejects += 1;
            None
        }
    }

    fn emit_unmatched_outer(&mut self) -> Option<Step> {
        if self.fill_outer && !self.state.matched_outer {
            self.state.matched_outer = true;
            return self.fill_outer_row().map(Step::Emit);
        }
        None
    }

    fn emit_unmatched_inner(&mut self) -> Option<Step> {
        if self.fill_inner && !self.state.matched_inner {
            self.state.matched_inner = true;
            return self.fill_inner_row().map(Step::Emit);
        }
        None
    }

    fn mark_inner(&mut self) -> Result<(), OperatorError> {
        self.inner.mark_position()
    }

    fn init_outer(&mut self) -> Result<Step, OperatorError> {
        self.fetch_outer()?;
        match self.eval_outer_keys() {
            KeyEval::Matchable => self.state.join_state = JoinState::InitInner,
            KeyEval::NonMatchable => {
                // Stay here and fetch the next outer row on the next step.
                if self.fill_outer {
                    if let Some(row) = self.fill_outer_row() {
                        return Ok(Step::Emit(row));
                    }
                }
            }
            KeyEval::EndOfJoin => {
                if !self.fill_inner {
                    return Ok(Step::Done);
                }
                // Every inner row is unmatched; none has been fetched yet.
                self.state.matched_inner = true;
                self.state.join_state = JoinState::EndOuter;
            }
        }
        Ok(Step::Continue)
    }

    fn init_inner(&mut self) -> Result<Step, OperatorError> {
        self.fetch_inner()?;
        match self.eval_inner_keys(InnerRow::Current) {
            KeyEval::Matchable => self.state.join_state = JoinState::SkipTest,
            KeyEval::NonMatchable => {
                if self.extra_marks {
                    self.mark_inner()?;
                }
                if self.fill_inner {
                    if let Some(row) = self.fill_inner_row() {
                        return Ok(Step::Emit(row));
                    }
                }
            }
            KeyEval::EndOfJoin => {
                if !self.fill_outer {
                    return Ok(Step::Done);
                }
                self.state.matched_outer = false;
                self.state.join_state = JoinState::EndInner;
            }
        }
        Ok(Step::Continue)
    }

    fn join_tuples(&mut self) -> Result<Step, OperatorError> {
        self.state.join_state = JoinState::NextInner;
        let (Some(outer), Some(inner)) = (&self.state.outer_row, &self.state.inner_row) else {
            return Err(OperatorError::Internal("joining without a current row pair"));
        };

        if !self
            .join_qual
            .as_ref()
            .map_or(true, |q| q.passes(Some(outer), Some(inner)))
        {
            self.metrics.join_qual_rejects += 1;
            return Ok(Step::Continue);
        }

        self.state.matched_outer = true;
        self.state.matched_inner = true;

        // An anti join is done with this outer row as soon as it matches.
        if self.join_type == JoinType::Anti {
            self.state.join_state = JoinState::NextOuter;
            return Ok(Step::Continue);
        }
        if self.single_match {
            self.state.join_state = JoinState::NextOuter;
        }

        if self
            .other_qual
            .as_ref()
            .map_or(true, |q| q.passes(Some(outer), Some(inner)))
        {
            let row = self.project(Some(outer), Some(inner));
            self.metrics.matches += 1;
            return Ok(Step::Emit(row));
        }
        self.metrics.other_qual_rejects += 1;
        Ok(Step::Continue)
    }

    fn next_inner(&mut self) -> Result<Step, OperatorError> {
        if let Some(step) = self.emit_unmatched_inner() {
            return Ok(step);
        }

        self.fetch_inner()?;
        self.state.matched_inner = false;

        self.state.join_state = match self.eval_inner_keys(InnerRow::Current) {
            // Inputs are sorted, so the new inner row is either still equal
            // to the outer row or past it.
            KeyEval::Matchable if self.compare_keys() == Ordering::Equal => JoinState::JoinTuples,
            KeyEval::Matchable | KeyEval::NonMatchable => JoinState::NextOuter,
            KeyEval::EndOfJoin => {
                // Drop the row so the end-of-outer path does not fill it.
                self.state.inner_row = None;
                JoinState::NextOuter
            }
        };
        Ok(Step::Continue)
    }

    fn next_outer(&mut self) -> Result<Step, OperatorError> {
        if let Some(step) = self.emit_unmatched_outer() {
            return Ok(step);
        }

        self.fetch_outer()?;
        self.state.matched_outer = false;

        match self.eval_outer_keys() {
            KeyEval::Matchable => self.state.join_state = JoinState::TestOuter,
            KeyEval::NonMatchable => {}
            KeyEval::EndOfJoin => {
                if !(self.fill_inner && self.state.inner_row.is_some()) {
                    return Ok(Step::Done);
                }
                self.state.join_state = JoinState::EndOuter;
            }
        }
        Ok(Step::Continue)
    }

    fn test_outer(&mut self) -> Result<Step, OperatorError> {
        if self.state.marked_row.is_none() {
            return Err(OperatorError::Internal("testing outer row without a marked inner row"));
        }
        self.eval_inner_keys(InnerRow::Marked);

        if self.compare_keys() == Ordering::Equal {
            // Same key as the previous outer row: rejoin the marked run.
            if !self.skip_mark_restore {
                self.inner.restore_position()?;
                self.state.inner_row = self.state.marked_row.clone();
            }
            self.state.join_state = JoinState::JoinTuples;
            return Ok(Step::Continue);
        }

        // The new outer key is past the marked run; resume from the inner
        // row that ended it.
        match self.eval_inner_keys(InnerRow::Current) {
            KeyEval::Matchable => self.state.join_state = JoinState::SkipTest,
            KeyEval::NonMatchable => self.state.join_state = JoinState::SkipInnerAdvance,
            KeyEval::EndOfJoin => {
                if !self.fill_outer {
                    return Ok(Step::Done);
                }
                self.state.join_state = JoinState::EndInner;
            }
        }
        Ok(Step::Continue)
    }

    fn skip_test(&mut self) -> Result<Step, OperatorError> {
        self.state.join_state = match self.compare_keys() {
            Ordering::Equal => {
                if !self.skip_mark_restore {
                    self.mark_inner()?;
                }
                self.state.marked_row = self.state.inner_row.clone();
                JoinState::JoinTuples
            }
            Ordering::Less => JoinState::SkipOuterAdvance,
            Ordering::Greater => JoinState::SkipInnerAdvance,
        };
        Ok(Step::Continue)
    }

    fn skip_outer_advance(&mut self) -> Result<Step, OperatorError> {
        if let Some(step) = self.emit_unmatched_outer() {
            return Ok(step);
        }

        self.fetch_outer()?;
        self.state.matched_outer = false;

        match self.eval_outer_keys() {
            KeyEval::Matchable => self.state.join_state = JoinState::SkipTest,
            KeyEval::NonMatchable => {}
            KeyEval::EndOfJoin => {
                if !(self.fill_inner && self.state.inner_row.is_some()) {
                    return Ok(Step::Done);
                }
                self.state.join_state = JoinState::EndOuter;
            }
        }
        Ok(Step::Continue)
    }

    fn skip_inner_advance(&mut self) -> Result<Step, OperatorError> {
        if let Some(step) = self.emit_unmatched_inner() {
            return Ok(step);
        }

        if self.extra_marks {
            self.mark_inner()?;
        }
        self.fetch_inner()?;
        self.state.matched_inner = false;

        match self.eval_inner_keys(InnerRow::Current) {
            KeyEval::Matchable => self.state.join_state = JoinState::SkipTest,
            KeyEval::NonMatchable => {}
            KeyEval::EndOfJoin => {
                if !(self.fill_outer && self.state.outer_row.is_some()) {
                    return Ok(Step::Done);
                }
                self.state.join_state = JoinState::EndInner;
            }
        }
        Ok(Step::Continue)
    }

    fn end_outer(&mut self) -> Result<Step, OperatorError> {
        if let Some(step) = self.emit_unmatched_inner() {
            return Ok(step);
        }

        if self.extra_marks {
            self.mark_inner()?;
        }
        self.fetch_inner()?;
        self.state.matched_inner = false;
        if self.state.inner_row.is_none() {
            return Ok(Step::Done);
        }
        Ok(Step::Continue)
    }

    fn end_inner(&mut self) -> Result<Step, OperatorError> {
        if let Some(step) = self.emit_unmatched_outer() {
            return Ok(step);
        }

        self.fetch_outer()?;
        self.state.matched_outer = false;
        if self.state.outer_row.is_none() {
            return Ok(Step::Done);
        }
        Ok(Step::Continue)
    }

    /// Runs the automaton until it emits a row or the batch is exhausted.
    fn exec_merge_join(&mut self) -> Result<Option<Row>, OperatorError> {
        loop {
            tracing::trace!(
                operator_id = %self.operator_id,
                state = %self.state.join_state,
                "merge join step"
            );
            let step = match self.state.join_state {
                JoinState::InitOuter => self.init_outer()?,
                JoinState::InitInner => self.init_inner()?,
                JoinState::JoinTuples => self.join_tuples()?,
                JoinState::NextInner => self.next_inner()?,
                JoinState::NextOuter => self.next_outer()?,
                JoinState::TestOuter => self.test_outer()?,
                JoinState::SkipTest => self.skip_test()?,
                JoinState::SkipOuterAdvance => self.skip_outer_advance()?,
                JoinState::SkipInnerAdvance => self.skip_inner_advance()?,
                JoinState::EndOuter => self.end_outer()?,
                JoinState::EndInner => self.end_inner()?,
            };
            match step {
                Step::Continue => {}
                Step::Emit(row) => return Ok(Some(row)),
                Step::Done => return Ok(None),
            }
        }
    }

    /// Forgets the finished batch and rewinds the inner input.
    fn end_batch(&mut self) -> Result<(), OperatorError> {
        self.state.reset();
        self.outer.finish_batch()?;
        self.inner.finish_batch()?;
        self.inner.rescan()?;
        self.batch_ended = true;
        self.metrics.batches += 1;
        tracing::debug!(
            operator_id = %self.operator_id,
            batch = self.metrics.batches,
            "merge join batch ended"
        );
        Ok(())
    }
}

impl Operator for MergeJoinOperator {
    fn schema(&self) -> &RowSchema {
        &self.schema
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::MergeJoin
    }

    fn next(&mut self) -> Result<Output, OperatorError> {
        if self.complete_returned {
            return Err(OperatorError::AdvancedPastCompletion(OperatorKind::MergeJoin));
        }
        if self.batch_ended {
            return Ok(Output::EndOfBatch);
        }
        if let Some(row) = self.exec_merge_join()? {
            return Ok(Output::Row(row));
        }
        if self.complete {
            self.complete_returned = true;
            tracing::debug!(
                operator_id = %self.operator_id,
                matches = self.metrics.matches,
                "merge join complete"
            );
            return Ok(Output::Complete);
        }
        self.end_batch()?;
        Ok(Output::EndOfBatch)
    }

    fn rescan(&mut self) -> Result<(), OperatorError> {
        self.state.reset();
        self.batch_ended = false;
        self.outer.rescan()?;
        self.inner.rescan()
    }

    fn init_incremental(&mut self) {
        self.complete = false;
        self.complete_returned = false;
        self.outer.init_incremental();
        self.inner.init_incremental();
    }

    fn reset_state(&mut self) -> Result<(), OperatorError> {
        self.rescan()?;
        if let Some(node) = nearest_incremental_mut(&mut *self.outer) {
            node.reset_state()?;
        }
        if let Some(node) = nearest_incremental_mut(&mut *self.inner) {
            node.reset_state()?;
        }
        tracing::trace!(operator_id = %self.operator_id, "merge join state reset");
        Ok(())
    }

    fn finish_batch(&mut self) -> Result<(), OperatorError> {
        self.outer.finish_batch()?;
        self.inner.finish_batch()
    }

    fn init_delta(&mut self) -> Result<(), OperatorError> {
        if let Some(node) = nearest_incremental_mut(&mut *self.outer) {
            node.init_delta()?;
        }
        if let Some(node) = nearest_incremental_mut(&mut *self.inner) {
            node.init_delta()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
