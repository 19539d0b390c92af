use super::*;
use crate::operator::predicate::{CmpOp, Operand};
use crate::operator::{DeltaScan, Materialize};
use crate::row::ColumnType;

fn rows(keys: &[i64]) -> Vec<Row> {
    keys.iter().map(|k| Row::new(vec![Datum::Int64(*k)])).collect()
}

fn nullable_rows(keys: &[Option<i64>]) -> Vec<Row> {
    keys.iter()
        .map(|k| Row::new(vec![k.map_or(Datum::Null, Datum::Int64)]))
        .collect()
}

fn scan(name: &str, batches: Vec<Vec<Row>>) -> DeltaScan {
    let width = batches.iter().flatten().map(Row::len).max().unwrap_or(1);
    let columns = (0..width).map(|i| (format!("{name}{i}"), ColumnType::Int64));
    let mut scan = DeltaScan::new(RowSchema::new(columns));
    scan.init_delta().unwrap();
    for batch in batches {
        scan.push_batch(batch);
    }
    scan.finish();
    scan
}

fn config(join_type: JoinType) -> MergeJoinConfig {
    MergeJoinConfig::builder()
        .join_type(join_type)
        .clause(MergeClause::new(0, 0))
        .build()
}

fn build(
    outer: Vec<Vec<Row>>,
    inner: Vec<Vec<Row>>,
    config: MergeJoinConfig,
) -> Result<MergeJoinOperator, OperatorError> {
    MergeJoinOperator::try_new(
        Box::new(scan("o", outer)),
        Box::new(Materialize::new(Box::new(scan("i", inner)))),
        config,
    )
}

fn join(outer: &[i64], inner: &[i64], join_type: JoinType) -> MergeJoinOperator {
    build(vec![rows(outer)], vec![rows(inner)], config(join_type)).unwrap()
}

fn drain(join: &mut MergeJoinOperator) -> (Vec<String>, Output) {
    let mut out = Vec::new();
    loop {
        match join.next().unwrap() {
            Output::Row(row) => out.push(row.to_string()),
            end => return (out, end),
        }
    }
}

#[test]
fn test_inner_join_duplicate_keys() {
    let mut join = join(&[1, 2, 2, 3], &[2, 2, 4], JoinType::Inner);
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(2,2)"; 4]);
    assert_eq!(end, Output::Complete);
    assert_eq!(join.metrics().matches, 4);
}

#[test]
fn test_left_join_fills_unmatched_outer() {
    let mut join = join(&[1, 2, 2, 3], &[2, 2, 4], JoinType::Left);
    let (out, end) = drain(&mut join);
    assert_eq!(
        out,
        vec!["(1,NULL)", "(2,2)", "(2,2)", "(2,2)", "(2,2)", "(3,NULL)"]
    );
    assert_eq!(end, Output::Complete);
    assert_eq!(join.metrics().unmatched_outer, 2);
}

#[test]
fn test_right_join_fills_unmatched_inner() {
    let mut join = join(&[1, 2, 2, 3], &[2, 2, 4], JoinType::Right);
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(2,2)", "(2,2)", "(2,2)", "(2,2)", "(NULL,4)"]);
    assert_eq!(end, Output::Complete);
}

#[test]
fn test_full_join() {
    let mut join = join(&[1, 2, 3], &[2, 4], JoinType::Full);
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(1,NULL)", "(2,2)", "(3,NULL)", "(NULL,4)"]);
    assert_eq!(end, Output::Complete);
}

#[test]
fn test_semi_join_emits_each_outer_row_once() {
    let mut join = join(&[1, 2, 2, 3], &[2, 2], JoinType::Semi);
    assert!(join.is_single_match());
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(2)", "(2)"]);
    // The inner side ran out before the outer input reported completion.
    assert_eq!(end, Output::EndOfBatch);

    join.reset_state().unwrap();
    assert_eq!(join.next().unwrap(), Output::Complete);
}

#[test]
fn test_anti_join_emits_unmatched_outer_rows() {
    let mut join = join(&[1, 2, 2, 3], &[2], JoinType::Anti);
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(1)", "(3)"]);
    assert_eq!(end, Output::Complete);
}

#[test]
fn test_output_schema() {
    let inner = join(&[1], &[1], JoinType::Inner);
    assert_eq!(inner.schema().width(), 2);
    let semi = join(&[1], &[1], JoinType::Semi);
    assert_eq!(semi.schema().width(), 1);
}

#[test]
fn test_null_keys_never_match() {
    let mut join = build(
        vec![nullable_rows(&[Some(1), None])],
        vec![nullable_rows(&[Some(1), None])],
        config(JoinType::Inner),
    )
    .unwrap();
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(1,1)"]);
    // Trailing nulls end the join early, before the outer input is exhausted.
    assert_eq!(end, Output::EndOfBatch);
}

#[test]
fn test_full_join_fills_null_keys_on_both_sides() {
    let mut join = build(
        vec![nullable_rows(&[Some(1), None])],
        vec![nullable_rows(&[Some(1), None])],
        config(JoinType::Full),
    )
    .unwrap();
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(1,1)", "(NULL,NULL)", "(NULL,NULL)"]);
    assert_eq!(end, Output::Complete);
    assert_eq!(join.metrics().unmatched_outer, 1);
    assert_eq!(join.metrics().unmatched_inner, 1);
}

#[test]
fn test_nulls_first_keys_are_skipped() {
    let nulls_first = SortOrder {
        descending: false,
        nulls_first: true,
    };
    let config = MergeJoinConfig::builder()
        .clause(MergeClause::new(0, 0).with_order(nulls_first))
        .build();
    let mut join = build(
        vec![nullable_rows(&[None, Some(1)])],
        vec![nullable_rows(&[None, Some(1)])],
        config,
    )
    .unwrap();
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(1,1)"]);
    assert_eq!(end, Output::Complete);
}

#[test]
fn test_descending_merge() {
    let config = MergeJoinConfig::builder()
        .clause(MergeClause::new(0, 0).with_order(SortOrder::DESC))
        .build();
    let mut join = build(vec![rows(&[3, 2, 1])], vec![rows(&[3, 1])], config).unwrap();
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(3,3)", "(1,1)"]);
    assert_eq!(end, Output::Complete);
}

#[test]
fn test_multi_key_merge() {
    let pairs = |values: &[(i64, i64)]| -> Vec<Row> {
        values
            .iter()
            .map(|(a, b)| Row::new(vec![Datum::Int64(*a), Datum::Int64(*b)]))
            .collect()
    };
    let config = MergeJoinConfig::builder()
        .clause(MergeClause::new(0, 0))
        .clause(MergeClause::new(1, 1))
        .build();
    let mut join = build(
        vec![pairs(&[(1, 1), (1, 2), (2, 1)])],
        vec![pairs(&[(1, 2), (2, 1), (2, 2)])],
        config,
    )
    .unwrap();
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(1,2,1,2)", "(2,1,2,1)"]);
    assert_eq!(end, Output::Complete);
}

#[test]
fn test_join_qual_rejection_counts_as_unmatched() {
    let config = MergeJoinConfig::builder()
        .join_type(JoinType::Left)
        .clause(MergeClause::new(0, 0))
        .join_qual(Predicate::Compare {
            left: Operand::Outer(0),
            op: CmpOp::NotEq,
            right: Operand::Literal(Datum::Int64(2)),
        })
        .build();
    let mut join = build(vec![rows(&[1, 2])], vec![rows(&[1, 2])], config).unwrap();
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(1,1)", "(2,NULL)"]);
    assert_eq!(end, Output::Complete);
    assert_eq!(join.metrics().join_qual_rejects, 1);
}

#[test]
fn test_other_qual_filters_output() {
    let config = MergeJoinConfig::builder()
        .clause(MergeClause::new(0, 0))
        .other_qual(Predicate::Compare {
            left: Operand::Outer(0),
            op: CmpOp::NotEq,
            right: Operand::Literal(Datum::Int64(1)),
        })
        .build();
    let mut join = build(vec![rows(&[1, 2])], vec![rows(&[1, 2])], config).unwrap();
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(2,2)"]);
    assert_eq!(end, Output::Complete);
    assert_eq!(join.metrics().other_qual_rejects, 1);
}

#[test]
fn test_constant_false_join_matches_nothing() {
    let config = MergeJoinConfig::builder()
        .join_type(JoinType::Left)
        .clause(MergeClause::new(0, 0))
        .join_qual(Predicate::Const(Some(false)))
        .build();
    let mut join = build(vec![rows(&[1, 2])], vec![rows(&[1, 2])], config).unwrap();
    assert!(join.is_const_false_join());
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(1,NULL)", "(2,NULL)"]);
    assert_eq!(end, Output::Complete);
}

#[test]
fn test_constant_false_full_join_is_accepted() {
    let config = MergeJoinConfig::builder()
        .join_type(JoinType::Full)
        .clause(MergeClause::new(0, 0))
        .join_qual(Predicate::Const(None))
        .build();
    let mut join = build(vec![rows(&[1])], vec![rows(&[1])], config).unwrap();
    let (out, _) = drain(&mut join);
    // The inner row is skipped (and filled) first because equal keys
    // compare as "outer greater".
    assert_eq!(out, vec!["(NULL,1)", "(1,NULL)"]);
}

#[test]
fn test_constant_true_join_qual_is_dropped() {
    let config = MergeJoinConfig::builder()
        .clause(MergeClause::new(0, 0))
        .join_qual(Predicate::And(vec![Predicate::Const(Some(true))]))
        .build();
    let mut join = build(vec![rows(&[1, 2])], vec![rows(&[2])], config).unwrap();
    assert!(!join.is_const_false_join());
    assert_eq!(drain(&mut join).0, vec!["(2,2)"]);
}

#[test]
fn test_skip_mark_restore_with_unique_inner() {
    let config = MergeJoinConfig::builder()
        .clause(MergeClause::new(0, 0))
        .inner_unique(true)
        .skip_mark_restore(true)
        .build();
    // No Materialize: the inner scan cannot mark/restore.
    let mut join = MergeJoinOperator::try_new(
        Box::new(scan("o", vec![rows(&[1, 2, 2])])),
        Box::new(scan("i", vec![rows(&[2])])),
        config,
    )
    .unwrap();
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(2,2)", "(2,2)"]);
    assert_eq!(end, Output::Complete);
}

#[test]
fn test_extra_marks_with_trimmed_inner() {
    let config = MergeJoinConfig::builder()
        .clause(MergeClause::new(0, 0))
        .extra_marks(true)
        .build();
    let inner = Materialize::new(Box::new(scan("i", vec![rows(&[0, 2, 2, 4])]))).trim_on_mark(true);
    let mut join = MergeJoinOperator::try_new(
        Box::new(scan("o", vec![rows(&[1, 2, 2, 3])])),
        Box::new(inner),
        config,
    )
    .unwrap();
    let (out, end) = drain(&mut join);
    assert_eq!(out, vec!["(2,2)"; 4]);
    assert_eq!(end, Output::Complete);
}

#[test]
fn test_batch_reset_and_completion() {
    let mut join = build(
        vec![rows(&[1, 2]), rows(&[2])],
        vec![rows(&[2]), rows(&[2])],
        config(JoinType::Inner),
    )
    .unwrap();

    assert_eq!(drain(&mut join), (vec!["(2,2)".to_string()], Output::EndOfBatch));
    assert_eq!(join.state(), JoinState::InitOuter);
    assert!(!join.is_complete());
    // End of batch repeats until the batch is reset.
    assert_eq!(join.next().unwrap(), Output::EndOfBatch);

    join.reset_state().unwrap();
    assert_eq!(drain(&mut join), (vec!["(2,2)".to_string()], Output::Complete));
    assert!(join.is_complete());
    assert_eq!(join.metrics().batches, 1);

    assert!(matches!(
        join.next(),
        Err(OperatorError::AdvancedPastCompletion(OperatorKind::MergeJoin))
    ));
    join.reset_state().unwrap();
    assert!(join.next().is_err());
}

#[test]
fn test_empty_batch_ends_immediately() {
    let mut join = build(
        vec![vec![], rows(&[1])],
        vec![rows(&[1]), rows(&[1])],
        config(JoinType::Inner),
    )
    .unwrap();
    assert_eq!(drain(&mut join), (vec![], Output::EndOfBatch));
    join.reset_state().unwrap();
    assert_eq!(drain(&mut join), (vec!["(1,1)".to_string()], Output::Complete));
}

#[test]
fn test_rejects_missing_merge_clause() {
    let result = build(vec![rows(&[1])], vec![rows(&[1])], MergeJoinConfig::default());
    assert!(matches!(result, Err(OperatorError::InvalidPlan(_))));
}

#[test]
fn test_rejects_key_out_of_range() {
    let config = MergeJoinConfig::builder()
        .clause(MergeClause::new(0, 3))
        .build();
    let result = build(vec![rows(&[1])], vec![rows(&[1])], config);
    assert!(matches!(
        result,
        Err(OperatorError::ColumnOutOfRange { index: 3, width: 1 })
    ));
}

#[test]
fn test_rejects_inner_without_mark_restore() {
    let result = MergeJoinOperator::try_new(
        Box::new(scan("o", vec![rows(&[1])])),
        Box::new(scan("i", vec![rows(&[1])])),
        config(JoinType::Inner),
    );
    assert!(matches!(result, Err(OperatorError::InvalidPlan(_))));
}

#[test]
fn test_rejects_non_constant_join_qual_for_right_join() {
    for join_type in [JoinType::Right, JoinType::Full] {
        let config = MergeJoinConfig::builder()
            .join_type(join_type)
            .clause(MergeClause::new(0, 0))
            .join_qual(Predicate::columns(0, CmpOp::Lt, 0))
            .build();
        let result = build(vec![rows(&[1])], vec![rows(&[1])], config);
        assert!(matches!(result, Err(OperatorError::InvalidPlan(_))));
    }
}

#[test]
fn test_rejects_skip_mark_restore_for_multi_match() {
    let config = MergeJoinConfig::builder()
        .clause(MergeClause::new(0, 0))
        .skip_mark_restore(true)
        .build();
    let result = build(vec![rows(&[1])], vec![rows(&[1])], config);
    assert!(matches!(result, Err(OperatorError::InvalidPlan(_))));
}

#[test]
fn test_join_state_codes() {
    assert_eq!(JoinState::try_from(5).unwrap(), JoinState::TestOuter);
    assert_eq!(JoinState::EndInner.code(), 11);
    for code in 1..=11 {
        assert_eq!(JoinState::try_from(code).unwrap().code(), code);
    }
    assert!(matches!(
        JoinState::try_from(0),
        Err(OperatorError::UnknownJoinState(0))
    ));
    assert!(matches!(
        JoinState::try_from(12),
        Err(OperatorError::UnknownJoinState(12))
    ));
    assert_eq!(JoinState::SkipTest.to_string(), "SKIP_TEST");
}

#[test]
fn test_join_type_parsing() {
    assert_eq!("LEFT".parse::<JoinType>().unwrap(), JoinType::Left);
    assert_eq!("full_outer".parse::<JoinType>().unwrap(), JoinType::Full);
    assert!("cross".parse::<JoinType>().is_err());
    assert!(JoinType::Anti.emits_unmatched_outer());
    assert!(!JoinType::Anti.emits_unmatched_inner());
}
