use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use itertools::Itertools;
use log::{debug, warn};
use nix::sched::{CpuSet, sched_getaffinity, sched_setaffinity};
use nix::unistd::Pid;
use pagemap2::VirtualMemoryArea;

use crate::probe::service::{
    FreelistSelector, KernelProfile, PagemapError, QueryService, ServiceError,
};
use crate::util::{PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};

/// Driverless query service backed by privileged procfs interfaces.
///
/// Translation reads `/proc/self/pagemap` with the page mlock-pinned for
/// the duration of the lookup; physical reads go through `/dev/mem`; the
/// free-list count parses the per-CPU pageset of `/proc/zoneinfo` with the
/// calling thread pinned to its CPU. Requires root privileges.
///
/// The zoneinfo pageset count covers every list of the CPU's page cache,
/// not just the selected one, so counts read through this backend are a
/// superset of what the driver reports. The driver remains the exact
/// single-list source.
pub struct ProcService {
    pagemap: pagemap2::PageMap,
}

impl ProcService {
    /// Opens the pagemap of the current process.
    ///
    /// # Errors
    ///
    /// Returns an error if `/proc/self/pagemap` cannot be opened.
    pub fn new(profile: KernelProfile, selector: FreelistSelector) -> Result<Self, ServiceError> {
        let pagemap =
            pagemap2::PageMap::new(std::process::id() as u64).map_err(PagemapError::from)?;
        debug!(
            "procfs probe backend: pageset count stands in for list index {}",
            profile.pcp_list_index(selector.migratetype, selector.order),
        );
        Ok(ProcService { pagemap })
    }

    fn lookup_pfn(&mut self, page: u64) -> Result<u64, ServiceError> {
        let region = VirtualMemoryArea::from((page, page + PAGE_SIZE as u64 - 1));
        let entries = self
            .pagemap
            .pagemap_vma(&region)
            .map_err(PagemapError::from)?;
        assert_eq!(
            entries.len(),
            1,
            "got {} pagemap entries for one page at {:#x}, expected exactly one",
            entries.len(),
            page
        );
        Ok(entries[0].pfn().map_err(PagemapError::from)?)
    }
}

impl QueryService for ProcService {
    fn freelist_count(&mut self) -> Result<u64, ServiceError> {
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu < 0 {
            return Err(ServiceError::Io(std::io::Error::last_os_error()));
        }

        // Stay on this CPU until the snapshot is read; restore the old
        // affinity afterwards even if the read failed.
        let pid = Pid::from_raw(0);
        let previous = sched_getaffinity(pid).map_err(errno_to_io)?;
        let mut pinned = CpuSet::new();
        pinned.set(cpu as usize).map_err(errno_to_io)?;
        sched_setaffinity(pid, &pinned).map_err(errno_to_io)?;

        let text = std::fs::read_to_string("/proc/zoneinfo");
        let restored = sched_setaffinity(pid, &previous);

        let text = text?;
        restored.map_err(errno_to_io)?;

        parse_pageset_count(&text, cpu as usize).ok_or(ServiceError::Unsupported)
    }

    fn translate(&mut self, virt: u64) -> Result<u64, ServiceError> {
        let page = virt & !(PAGE_MASK as u64);

        // Pin the page so reclaim or migration cannot invalidate the
        // lookup mid-query. mlock also rejects unmapped addresses, which
        // covers the not-resident case up front.
        if unsafe { libc::mlock(page as *const libc::c_void, PAGE_SIZE) } != 0 {
            let err = std::io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENOMEM) | Some(libc::EINVAL) => ServiceError::NotResident { virt },
                _ => ServiceError::Io(err),
            });
        }
        let pfn = self.lookup_pfn(page);
        if unsafe { libc::munlock(page as *const libc::c_void, PAGE_SIZE) } != 0 {
            warn!(
                "failed to unpin page {:#x}: {}",
                page,
                std::io::Error::last_os_error()
            );
        }

        let pfn = pfn?;
        if pfn == 0 {
            warn!("got PFN 0 for virtual address {virt:#x}. Are we root?");
            return Err(ServiceError::NotResident { virt });
        }
        Ok((pfn << PAGE_SHIFT) | (virt & PAGE_MASK as u64))
    }

    fn read_phys(&mut self, phys: u64) -> Result<u64, ServiceError> {
        let mut dev_mem = File::open("/dev/mem")?;
        let mut buf = [0u8; 8];
        let read = dev_mem
            .seek(SeekFrom::Start(phys))
            .and_then(|_| dev_mem.read_exact(&mut buf));
        match read {
            Ok(()) => Ok(u64::from_ne_bytes(buf)),
            // Any positioned-read failure means the address is not backed
            // by readable physical memory on this host.
            Err(_) => Err(ServiceError::InvalidAddress { phys }),
        }
    }
}

fn errno_to_io(errno: nix::errno::Errno) -> ServiceError {
    ServiceError::Io(std::io::Error::from_raw_os_error(errno as i32))
}

/// Extracts the per-CPU pageset count of `cpu` from the normal zone of
/// node 0 in `/proc/zoneinfo` text.
fn parse_pageset_count(zoneinfo: &str, cpu: usize) -> Option<u64> {
    let zone = zoneinfo
        .lines()
        .skip_while(|line| !(line.starts_with("Node 0,") && line.contains("Normal")))
        .skip(1)
        .take_while(|line| !line.starts_with("Node "))
        .collect_vec();

    let mut current_cpu = None;
    for line in zone {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("cpu:") {
            current_cpu = rest.trim().parse::<usize>().ok();
        } else if let Some(rest) = line.strip_prefix("count:") {
            if current_cpu == Some(cpu) {
                return rest.trim().parse().ok();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZONEINFO_SAMPLE: &str = "\
Node 0, zone      DMA
  per-node stats
      nr_inactive_anon 12994
  pages free     3840
  pagesets
    cpu: 0
              count: 0
              high:  0
              batch: 1
    cpu: 1
              count: 0
              high:  0
              batch: 1
Node 0, zone   Normal
  pages free     927491
        min      11074
        low      13842
  pagesets
    cpu: 0
              count: 227
              high:  378
              batch: 63
    cpu: 1
              count: 96
              high:  378
              batch: 63
  node_unreclaimable:  0
Node 1, zone   Normal
  pagesets
    cpu: 0
              count: 55
              high:  378
              batch: 63
";

    #[test]
    fn test_parse_pageset_count_per_cpu() {
        assert_eq!(parse_pageset_count(ZONEINFO_SAMPLE, 0), Some(227));
        assert_eq!(parse_pageset_count(ZONEINFO_SAMPLE, 1), Some(96));
    }

    #[test]
    fn test_parse_pageset_count_skips_other_zones_and_nodes() {
        // CPU 0 counts exist in the DMA zone and on node 1; neither may
        // shadow the node-0 normal zone.
        assert_ne!(parse_pageset_count(ZONEINFO_SAMPLE, 0), Some(0));
        assert_ne!(parse_pageset_count(ZONEINFO_SAMPLE, 0), Some(55));
    }

    #[test]
    fn test_parse_pageset_count_missing_cpu() {
        assert_eq!(parse_pageset_count(ZONEINFO_SAMPLE, 7), None);
        assert_eq!(parse_pageset_count("", 0), None);
    }
}
