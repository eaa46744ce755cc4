//! Benchmarks migration-type escalation: escalates a carved pageblock
//! every round and checks that a sprayed page-table page was placed
//! inside it.
//!
//! Exits nonzero if the probe cannot be reached or no round reproduced
//! the escalated state.

use anyhow::Result;
use clap::Parser;
use log::info;
use serde::Serialize;

use buddybench_bin::scenarios::MigratetypeEscalation;
use buddybench_bin::{ProbeArgs, finish_run, init_logging_with_progress, open_probe};
use buddybench_core::bench::Harness;
use buddybench_noop::Noop;

/// CLI arguments for the `migratetype_escalation` binary.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    #[clap(flatten)]
    probe: ProbeArgs,
    /// Number of rounds to run.
    #[clap(long = "rounds", default_value_t = 100)]
    rounds: u64,
    /// Output file for results (JSON format).
    #[clap(long = "output")]
    output: Option<String>,
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;
    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);

    let probe = open_probe(&args.probe)?;
    let mut scenario = MigratetypeEscalation::new(probe, Noop);
    let stats = Harness::new(args.rounds)
        .with_progress(progress)
        .run(&mut scenario)?;

    finish_run(
        "migratetype_escalation",
        &args,
        args.output.as_deref(),
        &stats,
    )
}
