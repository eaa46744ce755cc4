//! # Buddybench
//!
//! Buddybench is a microbenchmarking harness for reproducing and measuring
//! physical-memory-allocator state transitions: buddy block merging,
//! migration-type escalation, and per-CPU page-cache eviction. It combines
//! a privileged introspection probe (virtual-to-physical translation, raw
//! physical reads, per-CPU free-list counting) with a round-based
//! benchmarking loop that times an action and validates its postcondition.
//!
//! ## Quickstart guide
//!
//! Build on a Linux x86-64 system with the `buddyprobe` companion driver
//! loaded (or run with `--backend proc` as root for the driverless mode):
//!
//! ```sh
//! cargo build --release
//!
//! # Run the per-CPU page-cache eviction scenario for 1000 rounds
//! target/release/pcp_evict --rounds 1000
//! ```
//!
//! Use `--help` on any scenario binary to see the available options.
//!
//! ## Modules
//!
//! - `probe`: request protocol, service backends, and the query handle.
//! - `bench`: the round-based benchmarking harness.
//! - `primitives`: the interface for allocator-state primitives.
//! - `util`: page constants and memory-mapping helpers.

pub use buddybench_core::bench;
pub use buddybench_core::primitives;
pub use buddybench_core::probe;
pub use buddybench_core::util;

#[cfg(feature = "noop")]
pub use buddybench_noop;
