//! `deltajoin` command-line driver
//!
//! Runs the two ends of a row channel as separate processes, or a
//! batch-segmented merge join over delimited input files.

mod input;
mod schedule;

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use deltajoin_core::channel::{ChannelConfig, ChannelWriter, RelationId, TupleChannel};
use deltajoin_core::operator::merge_join::{JoinType, MergeClause, MergeJoinConfig, MergeJoinOperator};
use deltajoin_core::operator::sort::SortKey;
use deltajoin_core::operator::{DeltaScan, Materialize, Operator, Sort};
use deltajoin_core::row::Row;
use deltajoin_core::DeltaDriver;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::schedule::DeltaMode;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// deltajoin - incremental merge join and shared-memory row channel
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Field delimiter of input files
    #[arg(long, default_value_t = ',', global = true)]
    delimiter: char,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the rows of a file into a relation's channel
    Produce {
        /// Relation whose channel receives the rows
        #[arg(long)]
        relation: u32,

        /// Input file (header line of name:type columns, then rows)
        #[arg(long)]
        input: PathBuf,

        /// How long to wait for the consumer to create the channel
        #[arg(long, default_value_t = 10_000)]
        wait_ms: u64,

        #[command(flatten)]
        channel: ChannelArgs,
    },

    /// Create a relation's channel and print rows until the producer finishes
    Consume {
        /// Relation whose channel to read
        #[arg(long)]
        relation: u32,

        /// Row layout as name:type columns, e.g. `id:int,name:text`
        #[arg(long)]
        schema: String,

        #[command(flatten)]
        channel: ChannelArgs,
    },

    /// Merge join two files, feeding the left one in delta batches
    Join {
        /// Outer input file
        #[arg(long)]
        left: PathBuf,

        /// Inner input file
        #[arg(long)]
        right: PathBuf,

        /// Join column of the left input
        #[arg(long, default_value_t = 0)]
        left_key: usize,

        /// Join column of the right input
        #[arg(long, default_value_t = 0)]
        right_key: usize,

        /// inner, left, right, full, semi or anti
        #[arg(long, default_value = "inner")]
        join_type: JoinType,

        /// Number of delta batches the left input is cut into
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        batches: u32,

        /// How left rows are distributed over the batches
        #[arg(long, value_enum, default_value_t = DeltaMode::Uniform)]
        delta_mode: DeltaMode,
    },
}

#[derive(Args, Debug)]
struct ChannelArgs {
    /// Directory holding channel segments (defaults to /dev/shm when present)
    #[arg(long)]
    segment_dir: Option<PathBuf>,

    /// Data capacity of a channel segment in bytes
    #[arg(long)]
    capacity: Option<usize>,
}

impl ChannelArgs {
    fn config(&self) -> ChannelConfig {
        let mut builder = ChannelConfig::builder();
        if let Some(dir) = &self.segment_dir {
            builder = builder.segment_dir(dir);
        }
        if let Some(capacity) = self.capacity {
            builder = builder.capacity(capacity);
        }
        builder.build()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries rows.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("deltajoin={0},deltajoin_core={0}", cli.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    debug!("Version: {}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Command::Produce {
            relation,
            input,
            wait_ms,
            channel,
        } => produce(
            RelationId(*relation),
            input,
            cli.delimiter,
            Duration::from_millis(*wait_ms),
            channel.config(),
        ),
        Command::Consume {
            relation,
            schema,
            channel,
        } => consume(RelationId(*relation), schema, cli.delimiter, channel.config()),
        Command::Join {
            left,
            right,
            left_key,
            right_key,
            join_type,
            batches,
            delta_mode,
        } => {
            let plan = JoinPlan {
                left_key: *left_key,
                right_key: *right_key,
                join_type: *join_type,
                batches: usize::try_from(*batches)?,
                delta_mode: *delta_mode,
            };
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            join(left, right, cli.delimiter, &plan, &mut out)?;
            out.flush()?;
            Ok(())
        }
    }
}

fn produce(
    relation: RelationId,
    input: &Path,
    delimiter: char,
    wait: Duration,
    config: ChannelConfig,
) -> Result<()> {
    let data = input::read_relation(input, delimiter)?;
    let channel = TupleChannel::new(relation, data.schema, config);

    let deadline = Instant::now() + wait;
    let mut writer = loop {
        match channel.open_writer() {
            Ok(writer) => break writer,
            Err(e) if e.is_not_ready() && Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open channel for relation {relation}"))
            }
        }
    };
    info!(%relation, rows = data.rows.len(), "producer attached");

    for row in &data.rows {
        write_blocking(&mut writer, row)?;
    }
    writer.finish();
    writer.close();
    info!(%relation, "producer finished");
    Ok(())
}

/// Writes `row`, waiting for the consumer to drain a full channel.
fn write_blocking(writer: &mut ChannelWriter, row: &Row) -> Result<()> {
    loop {
        match writer.write(row) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_capacity_exceeded() => {
                // Nothing left to drain: the row can never fit.
                if writer.remaining() == writer.capacity() {
                    return Err(e).context("row is larger than the channel capacity");
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn consume(relation: RelationId, schema: &str, delimiter: char, config: ChannelConfig) -> Result<()> {
    let schema = input::parse_schema(schema, delimiter)?;
    let channel = TupleChannel::new(relation, schema, config);
    let mut reader = channel
        .open_reader()
        .with_context(|| format!("failed to create channel for relation {relation}"))?;
    info!(%relation, path = %channel.segment_path().display(), "consumer waiting for rows");

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut rows = 0u64;
    loop {
        let finished = reader.is_finished();
        match reader.read()? {
            Some(row) => {
                writeln!(out, "{row}")?;
                rows += 1;
            }
            None if finished => break,
            None => {
                out.flush()?;
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
    out.flush()?;
    reader.close()?;
    info!(%relation, rows, "consumer finished");
    Ok(())
}

/// Options of the `join` command.
#[derive(Debug, Clone)]
struct JoinPlan {
    left_key: usize,
    right_key: usize,
    join_type: JoinType,
    batches: usize,
    delta_mode: DeltaMode,
}

/// Joins each delta batch of `left` against all of `right`, writing every
/// batch's rows followed by a batch marker line.
fn join(left: &Path, right: &Path, delimiter: char, plan: &JoinPlan, out: &mut impl Write) -> Result<()> {
    let left = input::read_relation(left, delimiter)?;
    let right = input::read_relation(right, delimiter)?;
    ensure!(
        plan.left_key < left.schema.width(),
        "left key {} out of range for {} columns",
        plan.left_key,
        left.schema.width()
    );
    ensure!(
        plan.right_key < right.schema.width(),
        "right key {} out of range for {} columns",
        plan.right_key,
        right.schema.width()
    );
    if plan.batches == 0 {
        bail!("at least one batch is required");
    }

    let sizes = schedule::batch_sizes(plan.delta_mode, left.rows.len(), plan.batches);
    debug!(?sizes, mode = ?plan.delta_mode, "delta schedule");

    // The left side only sees each batch's new rows; the right side replays
    // everything it has, so each batch joins the delta against the full
    // right input.
    let mut outer = DeltaScan::new(left.schema);
    outer.init_delta()?;
    for batch in schedule::split(left.rows, &sizes) {
        outer.push_batch(batch);
    }
    outer.finish();

    let mut inner = DeltaScan::new(right.schema);
    inner.push_batch(right.rows);
    inner.finish();

    let config = MergeJoinConfig::builder()
        .join_type(plan.join_type)
        .clause(MergeClause::new(plan.left_key, plan.right_key))
        .operator_id("cli_join")
        .build();
    let join = MergeJoinOperator::try_new(
        Box::new(Sort::new(Box::new(outer), vec![SortKey::asc(plan.left_key)])),
        Box::new(Materialize::new(Box::new(Sort::new(
            Box::new(inner),
            vec![SortKey::asc(plan.right_key)],
        )))),
        config,
    )?;

    let mut driver = DeltaDriver::new(Box::new(join));
    while !driver.is_complete() {
        let batch = driver.run_batch()?;
        for row in &batch.rows {
            writeln!(out, "{row}")?;
        }
        writeln!(
            out,
            "-- batch {}: {} rows{}",
            batch.batch,
            batch.rows.len(),
            if batch.complete { ", complete" } else { "" }
        )?;
    }
    info!(
        batches = driver.batches_run(),
        rows = driver.rows_emitted(),
        "join finished"
    );
    Ok(())
}
