//! # Buddybench scenario programs
//!
//! This crate wires the buddybench probe, harness and allocator-state
//! primitives into runnable scenario programs. Each binary under
//! `src/bin/` drives one scenario:
//!
//! - `block_merge`: frees a targeted page and checks that a subsequent
//!   file page lands on the merged frame.
//! - `migratetype_escalation`: escalates a pageblock's migration type and
//!   checks that a sprayed file page ends up inside it.
//! - `pcp_evict`: evicts the per-CPU page cache and checks that the
//!   watched free list is empty.
//!
//! The binaries link the no-op primitives provider by default, which
//! exercises the full measurement path without touching the allocator;
//! substitute a real provider crate to reproduce the allocator states.

use clap::Args;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use serde::Serialize;

use buddybench_core::probe::{FreelistSelector, KernelProfile, Probe, ProbeConfig, proto};

pub mod report;
pub mod scenarios;

#[macro_use]
extern crate log;

/// Initializes env_logger behind an indicatif bridge so progress bars and
/// log lines interleave cleanly.
pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

/// Query backend selection.
#[derive(Clone, Copy, Debug, clap::ValueEnum, Serialize)]
pub enum Backend {
    /// The `buddyprobe` companion driver.
    Device,
    /// Privileged procfs interfaces (pagemap, /dev/mem, zoneinfo).
    Proc,
}

/// Probe-related CLI arguments shared by every scenario binary.
#[derive(Debug, Clone, Args, Serialize)]
pub struct ProbeArgs {
    /// Path of the probe device node.
    #[clap(long = "device", default_value = proto::DEVICE_PATH)]
    pub device: String,
    /// Per-CPU list layout of the host kernel.
    #[clap(long = "profile", default_value = "v6-8", value_parser = parse_profile)]
    pub profile: KernelProfile,
    /// Query backend to use.
    #[clap(long = "backend", value_enum, default_value = "device")]
    pub backend: Backend,
}

fn parse_profile(s: &str) -> Result<KernelProfile, String> {
    match s {
        "v5-15" | "5.15" => Ok(KernelProfile::V5_15),
        "v6-8" | "6.8" => Ok(KernelProfile::V6_8),
        _ => Err(format!(
            "unknown kernel profile '{s}' (expected v5-15 or v6-8)"
        )),
    }
}

/// Saves the optional JSON report and turns the aggregate outcome into
/// the process exit status.
///
/// A run that never reproduced the target state exits nonzero; partial
/// failure is informative output only.
///
/// # Errors
///
/// Fails if the report cannot be written or no round passed.
pub fn finish_run<A: Serialize>(
    scenario: &str,
    args: A,
    output: Option<&str>,
    stats: &buddybench_core::bench::RunStats,
) -> anyhow::Result<()> {
    if let Some(path) = output {
        report::RunReport::new(scenario, args, stats).save_to_file(path)?;
    }
    if stats.passing_rounds() == 0 {
        anyhow::bail!("scenario '{scenario}' never reproduced the target state");
    }
    Ok(())
}

/// Opens the probe selected by the CLI arguments.
///
/// # Errors
///
/// Fails if the selected backend cannot be reached; scenario programs
/// treat this as fatal.
pub fn open_probe(args: &ProbeArgs) -> anyhow::Result<Probe> {
    let config = ProbeConfig {
        device: args.device.clone().into(),
        profile: args.profile,
        selector: FreelistSelector::default(),
    };
    let probe = match args.backend {
        Backend::Device => Probe::open(&config)?,
        Backend::Proc => Probe::open_proc(&config)?,
    };
    info!("probe ready ({:?} backend)", args.backend);
    Ok(probe)
}
