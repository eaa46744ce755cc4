//! Utility types and functions used throughout buddybench.
//!
//! This module provides:
//! - Page-granularity constants ([`PAGE_SIZE`], [`PAGEBLOCK_SIZE`], ...)
//! - Thin `mmap`/`mlock` wrappers used by the scenario plumbing
//! - Progress reporting utilities ([`NamedProgress`])

mod constants;
mod mmap;
mod named_progress;

pub use self::constants::*;
pub use self::mmap::*;
pub use self::named_progress::NamedProgress;
