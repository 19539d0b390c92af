//! Merge join benchmarks
//!
//! Benchmarks single-batch join throughput per join type and the cost of
//! driving the same input through many small batches.
//!
//! Run with: cargo bench --bench merge_join_bench

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use deltajoin_core::operator::merge_join::{JoinType, MergeClause, MergeJoinConfig, MergeJoinOperator};
use deltajoin_core::operator::{DeltaScan, Materialize, Operator, Output};
use deltajoin_core::row::{ColumnType, Datum, Row, RowSchema};
use deltajoin_core::DeltaDriver;

fn schema() -> RowSchema {
    RowSchema::new(vec![("key", ColumnType::Int64), ("value", ColumnType::Int64)])
}

/// Sorted rows where every key repeats `dup` times.
fn sorted_rows(count: usize, dup: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            let key = i64::try_from(i / dup).unwrap();
            Row::new(vec![Datum::Int64(key), Datum::Int64(i64::try_from(i).unwrap())])
        })
        .collect()
}

fn scan_of(batches: Vec<Vec<Row>>) -> DeltaScan {
    let mut scan = DeltaScan::new(schema());
    for batch in batches {
        scan.push_batch(batch);
    }
    scan.finish();
    scan
}

fn build_join(outer: Vec<Vec<Row>>, inner: Vec<Vec<Row>>, join_type: JoinType) -> MergeJoinOperator {
    let config = MergeJoinConfig::builder()
        .join_type(join_type)
        .clause(MergeClause::new(0, 0))
        .build();
    MergeJoinOperator::try_new(
        Box::new(scan_of(outer)),
        Box::new(Materialize::new(Box::new(scan_of(inner)))),
        config,
    )
    .unwrap()
}

fn drain(op: &mut MergeJoinOperator) -> usize {
    let mut rows = 0;
    while let Output::Row(row) = op.next().unwrap() {
        black_box(row);
        rows += 1;
    }
    rows
}

/// Benchmark one batch per join type
fn bench_join_types(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_join_types");
    let size = 10_000;
    group.throughput(Throughput::Elements(size as u64 * 2));

    for join_type in [
        JoinType::Inner,
        JoinType::Left,
        JoinType::Full,
        JoinType::Semi,
        JoinType::Anti,
    ] {
        group.bench_with_input(
            BenchmarkId::new("join_type", join_type),
            &join_type,
            |b, &join_type| {
                b.iter_batched(
                    || build_join(vec![sorted_rows(size, 2)], vec![sorted_rows(size, 3)], join_type),
                    |mut op| black_box(drain(&mut op)),
                    criterion::BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

/// Benchmark the effect of duplicate inner keys (mark/restore traffic)
fn bench_duplicate_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_join_duplicates");

    for dup in [1, 8, 64] {
        let size = 4_096;
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("inner_dup", dup), &dup, |b, &dup| {
            b.iter_batched(
                || build_join(vec![sorted_rows(size, dup)], vec![sorted_rows(size, dup)], JoinType::Inner),
                |mut op| black_box(drain(&mut op)),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Benchmark splitting the same input into more, smaller batches
fn bench_batch_segmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_join_batches");
    let size = 8_192;
    group.throughput(Throughput::Elements(size as u64 * 2));

    for batches in [1, 16, 128] {
        group.bench_with_input(BenchmarkId::new("batches", batches), &batches, |b, &batches| {
            b.iter_batched(
                || {
                    let per_batch = size / batches;
                    let split = |rows: Vec<Row>| -> Vec<Vec<Row>> {
                        rows.chunks(per_batch).map(<[Row]>::to_vec).collect()
                    };
                    let join = build_join(
                        split(sorted_rows(size, 1)),
                        split(sorted_rows(size, 1)),
                        JoinType::Inner,
                    );
                    let mut driver = DeltaDriver::new(Box::new(join));
                    driver.init_delta().unwrap();
                    driver
                },
                |mut driver| black_box(driver.run_until_complete(batches + 1).unwrap()),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_join_types,
    bench_duplicate_keys,
    bench_batch_segmentation,
);
criterion_main!(benches);
