//! Benchmarks per-CPU page-cache eviction: evicts the current CPU's page
//! cache every round and checks that the watched free list is empty.
//!
//! Exits nonzero if the probe cannot be reached or no round reproduced
//! the drained state.

use anyhow::Result;
use clap::Parser;
use log::info;
use serde::Serialize;

use buddybench_bin::scenarios::PcpEvict;
use buddybench_bin::{ProbeArgs, finish_run, init_logging_with_progress, open_probe};
use buddybench_core::bench::Harness;
use buddybench_noop::Noop;

/// CLI arguments for the `pcp_evict` binary.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    #[clap(flatten)]
    probe: ProbeArgs,
    /// Number of rounds to run.
    #[clap(long = "rounds", default_value_t = 1000)]
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
    let mut scenario = PcpEvict::new(probe, Noop);
    let stats = Harness::new(args.rounds)
        .with_progress(progress)
        .run(&mut scenario)?;

    finish_run("pcp_evict", &args, args.output.as_deref(), &stats)
}
