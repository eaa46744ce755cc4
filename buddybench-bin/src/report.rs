//! JSON export of run results.

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::Result;
use serde::Serialize;

use buddybench_core::bench::RunStats;

/// Summary of one scenario run, written as pretty-printed JSON.
#[derive(Debug, Serialize)]
pub struct RunReport<A: Serialize> {
    /// ISO 8601 timestamp of when the run finished.
    date: String,
    /// Scenario name.
    scenario: String,
    /// CLI arguments the run was started with.
    args: A,
    /// Total rounds executed.
    rounds: u64,
    /// Rounds whose postcondition did not hold.
    failed_rounds: u64,
    /// Mean elapsed nanoseconds over passing rounds; absent if none passed.
    mean_pass_ns: Option<u128>,
}

impl<A: Serialize> RunReport<A> {
    /// Builds a report from the aggregated statistics.
    pub fn new(scenario: &str, args: A, stats: &RunStats) -> Self {
        RunReport {
            date: chrono::Local::now().to_rfc3339(),
            scenario: scenario.to_string(),
            args,
            rounds: stats.rounds(),
            failed_rounds: stats.failed_rounds(),
            mean_pass_ns: stats.mean_pass_time().map(|mean| mean.as_nanos()),
        }
    }

    /// Writes the report to `filename`.
    pub fn save_to_file(&self, filename: &str) -> Result<()> {
        let file = File::create(filename)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("results saved to {filename}");
        Ok(())
    }
}
