//! # Buddybench Core
//!
//! `buddybench-core` is the foundational library for the buddybench
//! allocator-state microbenchmarking harness. It provides the building
//! blocks that scenario programs wire together:
//!
//! - [`probe`] module - The physical-memory query layer: the fixed-layout
//!   request protocol shared with the `buddyprobe` companion driver, the
//!   [`probe::QueryService`] trait with its backends (ioctl device,
//!   privileged procfs fallback, deterministic in-process model), and the
//!   single-owner [`probe::Probe`] handle.
//!
//! - [`bench`] module - The round-based benchmarking harness: the
//!   [`bench::Scenario`] lifecycle trait, the [`bench::Harness`] round
//!   loop, and the aggregated [`bench::RunStats`].
//!
//! - [`primitives`] module - The [`primitives::AllocPrimitives`] trait
//!   describing the opaque allocator-state primitives that scenario
//!   actions invoke. Concrete implementations live in separate crates.
//!
//! - [`util`] module - Page-granularity constants and thin memory-mapping
//!   helpers used by the scenario plumbing.
//!
//! ## Platform Support
//!
//! This crate targets x86_64 Linux. The device backend requires the
//! `buddyprobe` character device; the procfs backend requires root access
//! to `/proc/self/pagemap`, `/dev/mem` and `/proc/zoneinfo`.

#![warn(missing_docs)]

pub mod bench;
pub mod primitives;
pub mod probe;
pub mod util;

pub use bench::{FnScenario, Harness, RoundOutcome, RunStats, Scenario, run_rounds};
pub use primitives::AllocPrimitives;
pub use probe::{Probe, ProbeConfig, ProbeError};
