//! The query service abstraction behind the probe handle.
//!
//! A [`QueryService`] answers three privileged queries against the current
//! process's (or current CPU's) memory state. All three operations are
//! read-only with respect to the service's own state; a failed request
//! never leaves the service half-updated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Migration types tracked by the per-CPU page caches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrateType {
    /// Pages that cannot be moved or reclaimed.
    #[default]
    Unmovable = 0,
    /// Pages that can be migrated by compaction.
    Movable = 1,
    /// Pages that can be reclaimed but not moved.
    Reclaimable = 2,
}

/// Number of migration types cached per CPU.
pub const MIGRATE_PCPTYPES: u32 = 3;
/// Highest order the allocator considers cheap enough for per-CPU caching.
pub const PAGE_ALLOC_COSTLY_ORDER: u32 = 3;
/// Order of one pageblock (2 MiB), the only high order cached per CPU.
pub const PAGEBLOCK_ORDER: u32 = 9;
/// Index of the shared high-order list in profile-B kernels.
pub const NR_LOWORDER_PCP_LISTS: u32 = MIGRATE_PCPTYPES * (PAGE_ALLOC_COSTLY_ORDER + 1);

/// Per-CPU free-list layout of the host kernel.
///
/// The two supported kernel series index their per-CPU lists with
/// incompatible formulas. The profile is selected once when a service is
/// constructed and resolved to a concrete list index up front; no version
/// branching happens per query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelProfile {
    /// 5.15-series layout: the pageblock order aliases onto the slot right
    /// above the costly orders.
    V5_15,
    /// 6.8-series layout: all high-order pages share one trailing list.
    #[default]
    V6_8,
}

impl KernelProfile {
    /// Returns the per-CPU list index caching pages of `migratetype` and
    /// `order` under this profile.
    ///
    /// # Panics
    ///
    /// Panics if `order` is above [`PAGE_ALLOC_COSTLY_ORDER`] but is not
    /// the pageblock order; no kernel caches such pages per CPU.
    pub fn pcp_list_index(&self, migratetype: MigrateType, order: u32) -> u32 {
        if order > PAGE_ALLOC_COSTLY_ORDER {
            assert_eq!(
                order, PAGEBLOCK_ORDER,
                "only pageblock-order pages are cached above the costly orders"
            );
            return match self {
                KernelProfile::V5_15 => {
                    MIGRATE_PCPTYPES * (PAGE_ALLOC_COSTLY_ORDER + 1) + migratetype as u32
                }
                KernelProfile::V6_8 => NR_LOWORDER_PCP_LISTS,
            };
        }
        MIGRATE_PCPTYPES * order + migratetype as u32
    }

    /// Returns the number of per-CPU lists under this profile.
    pub fn pcp_list_count(&self) -> u32 {
        match self {
            KernelProfile::V5_15 => MIGRATE_PCPTYPES * (PAGE_ALLOC_COSTLY_ORDER + 2),
            KernelProfile::V6_8 => NR_LOWORDER_PCP_LISTS + 1,
        }
    }
}

/// Names the specific per-CPU free list snapshotted by the count query.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct FreelistSelector {
    /// Block order of the watched list.
    pub order: u32,
    /// Migration type of the watched list.
    pub migratetype: MigrateType,
}

/// Errors that can occur during pagemap operations.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct PagemapError(#[from] pagemap2::PageMapError);

/// Errors reported by a [`QueryService`].
///
/// Each operation reports a distinct failure kind; the caller decides
/// whether a kind is fatal (in this tool's model, all of them are).
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The virtual address has no resident backing page.
    #[error("virtual address {virt:#x} has no resident backing page")]
    NotResident {
        /// The queried virtual address.
        virt: u64,
    },
    /// The physical address cannot be mapped on this host.
    #[error("physical address {phys:#x} cannot be mapped on this host")]
    InvalidAddress {
        /// The queried physical address.
        phys: u64,
    },
    /// The service does not implement the requested command.
    #[error("command not supported by the probe service")]
    Unsupported,
    /// The request or response record could not be transferred.
    #[error("request transfer faulted")]
    Marshal,
    /// An error occurred while accessing the process pagemap.
    #[error(transparent)]
    Pagemap(#[from] PagemapError),
    /// An I/O error occurred while reaching the service's data source.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A privileged service answering physical-memory queries.
///
/// Implementations differ only in where the answers come from: the
/// `buddyprobe` driver ([`DeviceService`](crate::probe::DeviceService)),
/// privileged procfs interfaces ([`ProcService`](crate::probe::ProcService)),
/// or a deterministic in-process model ([`SimHandle`](crate::probe::SimHandle)).
pub trait QueryService {
    /// Counts the pages resident in the selected per-CPU free list on the
    /// CPU executing the call.
    ///
    /// The calling thread stays pinned to its CPU for the duration of the
    /// count and no longer. The value is a best-effort snapshot: the host
    /// allocator keeps mutating its lists concurrently, so the count may
    /// be stale by the time the caller observes it, but it is never a torn
    /// read across two different lists.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the snapshot cannot be taken.
    fn freelist_count(&mut self) -> Result<u64, ServiceError>;

    /// Resolves the physical address backing `virt` in the calling
    /// process's address space at the instant of the call.
    ///
    /// The backing page is pinned for the duration of the lookup so
    /// concurrent reclaim or migration cannot invalidate the result
    /// mid-call; the pin is released before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotResident`] if `virt` has no resident
    /// backing page.
    fn translate(&mut self, virt: u64) -> Result<u64, ServiceError>;

    /// Reads eight bytes starting at physical address `phys`, bypassing
    /// the virtual address space entirely.
    ///
    /// This deliberately sidesteps the host's memory-protection model and
    /// must never be exposed to an untrusted caller; its use is scoped to
    /// a trusted, single-tenant measurement environment.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidAddress`] if `phys` cannot be
    /// mapped.
    fn read_phys(&mut self, phys: u64) -> Result<u64, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_agree_below_costly_order() {
        for order in 0..=PAGE_ALLOC_COSTLY_ORDER {
            for mt in [
                MigrateType::Unmovable,
                MigrateType::Movable,
                MigrateType::Reclaimable,
            ] {
                assert_eq!(
                    KernelProfile::V5_15.pcp_list_index(mt, order),
                    KernelProfile::V6_8.pcp_list_index(mt, order),
                );
            }
        }
    }

    #[test]
    fn test_profiles_diverge_at_pageblock_order() {
        let a = KernelProfile::V5_15.pcp_list_index(MigrateType::Movable, PAGEBLOCK_ORDER);
        let b = KernelProfile::V6_8.pcp_list_index(MigrateType::Movable, PAGEBLOCK_ORDER);
        assert_eq!(a, 13);
        assert_eq!(b, NR_LOWORDER_PCP_LISTS);
        assert_ne!(a, b);
    }

    #[test]
    fn test_index_stays_within_list_count() {
        for profile in [KernelProfile::V5_15, KernelProfile::V6_8] {
            for mt in [
                MigrateType::Unmovable,
                MigrateType::Movable,
                MigrateType::Reclaimable,
            ] {
                for order in (0..=PAGE_ALLOC_COSTLY_ORDER).chain([PAGEBLOCK_ORDER]) {
                    assert!(profile.pcp_list_index(mt, order) < profile.pcp_list_count());
                }
            }
        }
    }

    #[test]
    fn test_default_selector_maps_to_first_list() {
        let selector = FreelistSelector::default();
        for profile in [KernelProfile::V5_15, KernelProfile::V6_8] {
            assert_eq!(
                profile.pcp_list_index(selector.migratetype, selector.order),
                0
            );
        }
    }

    #[test]
    #[should_panic(expected = "pageblock-order")]
    fn test_uncached_high_order_panics() {
        KernelProfile::V6_8.pcp_list_index(MigrateType::Unmovable, PAGE_ALLOC_COSTLY_ORDER + 2);
    }
}
