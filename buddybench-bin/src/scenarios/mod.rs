//! Scenario glue: wires the probe, the harness and an allocator-state
//! primitives provider into the three measured scenarios.
//!
//! Each scenario owns the probe handle and its own resources (mappings,
//! spray files) for the life of the process and implements the
//! [`Scenario`](buddybench_core::bench::Scenario) lifecycle. Probe and
//! mapping failures abort the run; only a false postcondition fails a
//! round.

mod block_merge;
mod migratetype_escalation;
mod pcp_evict;

pub use block_merge::BlockMerge;
pub use migratetype_escalation::MigratetypeEscalation;
pub use pcp_evict::PcpEvict;

use buddybench_core::probe::ProbeError;
use thiserror::Error;

/// Infrastructure errors of the scenario phases.
#[derive(Debug, Error)]
pub enum ScenarioError<PE: std::error::Error> {
    /// A probe query failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// Mapping or file plumbing failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// An allocator-state primitive failed.
    #[error("allocator primitive failed: {0}")]
    Primitive(PE),
}
