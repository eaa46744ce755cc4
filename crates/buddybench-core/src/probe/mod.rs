//! The physical-memory query layer.
//!
//! A [`Probe`] is the single-owner handle a scenario program threads
//! through every query call site: it is acquired exactly once at process
//! start, shared by all rounds of a run, and released exactly once when it
//! goes out of scope at shutdown. Behind the handle sits a
//! [`QueryService`] backend:
//!
//! - [`DeviceService`] - the `buddyprobe` companion driver, spoken to via
//!   the fixed-layout [`proto`] records (production path).
//! - [`ProcService`] - privileged procfs interfaces, for hosts without the
//!   driver.
//! - [`SimHandle`] - a deterministic in-process model, for tests and dry
//!   runs.
//!
//! Every failure surfaced here is an infrastructure failure in this
//! tool's model: a broken measurement channel, never a scenario outcome.
//! Callers propagate it out of `main` and terminate rather than recording
//! a failed round.

mod device;
mod procfs;
pub mod proto;
mod service;
mod sim;

pub use self::device::DeviceService;
pub use self::procfs::ProcService;
pub use self::service::{
    FreelistSelector, KernelProfile, MIGRATE_PCPTYPES, MigrateType, NR_LOWORDER_PCP_LISTS,
    PAGE_ALLOC_COSTLY_ORDER, PAGEBLOCK_ORDER, PagemapError, QueryService, ServiceError,
};
pub use self::sim::{SimConfig, SimHandle};

use std::path::PathBuf;

use log::{debug, trace};
use thiserror::Error;

/// Configuration of a probe handle.
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// Path of the driver's device node.
    pub device: PathBuf,
    /// Per-CPU list layout of the host kernel.
    pub profile: KernelProfile,
    /// The free list watched by the count query.
    pub selector: FreelistSelector,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            device: proto::DEVICE_PATH.into(),
            profile: KernelProfile::default(),
            selector: FreelistSelector::default(),
        }
    }
}

/// Errors reported by [`Probe`] operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The query service could not be reached at startup.
    #[error("probe service unavailable at {path}: {source}")]
    ServiceUnavailable {
        /// Path of the device node that failed to open.
        path: PathBuf,
        /// The underlying open error.
        source: std::io::Error,
    },
    /// A query failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Single-owner handle onto a [`QueryService`].
///
/// Opening the handle is a startup precondition: if the service cannot be
/// reached the process cannot proceed. The handle is released when the
/// probe is dropped.
pub struct Probe {
    service: Box<dyn QueryService>,
}

impl Probe {
    /// Opens a probe backed by the `buddyprobe` driver.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::ServiceUnavailable`] if the device node
    /// cannot be opened.
    pub fn open(config: &ProbeConfig) -> Result<Self, ProbeError> {
        let service = DeviceService::open(&config.device, config.profile, config.selector)
            .map_err(|source| ProbeError::ServiceUnavailable {
                path: config.device.clone(),
                source,
            })?;
        Ok(Probe::with_service(Box::new(service)))
    }

    /// Opens a probe backed by privileged procfs interfaces instead of the
    /// driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the process pagemap cannot be opened.
    pub fn open_proc(config: &ProbeConfig) -> Result<Self, ProbeError> {
        let service = ProcService::new(config.profile, config.selector)?;
        Ok(Probe::with_service(Box::new(service)))
    }

    /// Wraps an already-constructed service backend.
    ///
    /// This is how tests and embedders hand a [`SimHandle`] (or any other
    /// backend) to code expecting a probe.
    pub fn with_service(service: Box<dyn QueryService>) -> Self {
        debug!("probe handle acquired");
        Probe { service }
    }

    /// Counts the pages resident in the watched per-CPU free list on the
    /// CPU executing the call. See [`QueryService::freelist_count`].
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] if the snapshot cannot be taken.
    pub fn freelist_count(&mut self) -> Result<u64, ProbeError> {
        let count = self.service.freelist_count()?;
        trace!("freelist count: {count}");
        Ok(count)
    }

    /// Resolves the physical address backing `virt`. See
    /// [`QueryService::translate`].
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] if the address has no resident backing page.
    pub fn translate(&mut self, virt: u64) -> Result<u64, ProbeError> {
        let phys = self.service.translate(virt)?;
        trace!("translate {virt:#x} -> {phys:#x}");
        Ok(phys)
    }

    /// Convenience wrapper resolving the physical address behind a
    /// pointer.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] if the pointed-to page is not resident.
    pub fn translate_ptr<T>(&mut self, ptr: *const T) -> Result<u64, ProbeError> {
        self.translate(ptr as u64)
    }

    /// Reads eight bytes of physical memory. See
    /// [`QueryService::read_phys`].
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] if the physical address cannot be mapped.
    pub fn read_phys(&mut self, phys: u64) -> Result<u64, ProbeError> {
        let data = self.service.read_phys(phys)?;
        trace!("read_phys {phys:#x} -> {data:#x}");
        Ok(data)
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        debug!("probe handle released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_without_device_is_service_unavailable() {
        let config = ProbeConfig {
            device: "/dev/buddyprobe-missing".into(),
            ..Default::default()
        };
        let err = Probe::open(&config).err().expect("open must fail");
        match err {
            ProbeError::ServiceUnavailable { path, .. } => assert_eq!(path, config.device),
            other => panic!("expected ServiceUnavailable, got {other}"),
        }
    }

    #[test]
    fn test_probe_forwards_to_backend() {
        let sim = SimHandle::new(SimConfig::default());
        sim.map_page(0xa000, 3);
        sim.write_frame(3, 0xdead_beef);

        let mut probe = Probe::with_service(Box::new(sim.clone()));
        let phys = probe.translate(0xa000).unwrap();
        assert_eq!(probe.read_phys(phys).unwrap(), 0xdead_beef);
        sim.free_frame(3, FreelistSelector::default());
        assert_eq!(probe.freelist_count().unwrap(), 1);
    }
}
