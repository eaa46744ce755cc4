use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use itertools::Itertools;
use log::trace;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::probe::service::{FreelistSelector, KernelProfile, QueryService, ServiceError};
use crate::util::{PAGE_MASK, PAGE_SHIFT};

/// Configuration of the in-process service model.
#[derive(Clone, Copy, Debug)]
pub struct SimConfig {
    /// Per-CPU list layout of the modeled kernel.
    pub profile: KernelProfile,
    /// The list snapshotted by the count query.
    pub selector: FreelistSelector,
    /// Number of modeled physical frames.
    pub frames: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            profile: KernelProfile::default(),
            selector: FreelistSelector::default(),
            frames: 512,
        }
    }
}

struct SimState {
    profile: KernelProfile,
    watched_list: usize,
    lists: Vec<VecDeque<u64>>,
    // One 8-byte payload word per frame, mirroring the single-word
    // granularity of the physical-read query.
    frames: Vec<u64>,
    pages: HashMap<u64, u64>,
}

/// Shared handle onto a deterministic in-process query service.
///
/// Models a miniature allocator state: a page table, an array of physical
/// frames and the per-CPU free lists, indexed through the configured
/// [`KernelProfile`]. Cloned handles share one state, so test code can
/// play the role of an allocator-state primitive while a
/// [`Probe`](crate::probe::Probe) owns another handle onto the same model.
///
/// Everything is process-local and unprivileged; no driver, pagemap or
/// `/dev/mem` access is involved.
#[derive(Clone)]
pub struct SimHandle {
    state: Rc<RefCell<SimState>>,
}

impl SimHandle {
    /// Creates a fresh model from `config`.
    pub fn new(config: SimConfig) -> Self {
        let watched = config
            .profile
            .pcp_list_index(config.selector.migratetype, config.selector.order);
        let state = SimState {
            profile: config.profile,
            watched_list: watched as usize,
            lists: vec![VecDeque::new(); config.profile.pcp_list_count() as usize],
            frames: vec![0; config.frames],
            pages: HashMap::new(),
        };
        SimHandle {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Number of modeled physical frames.
    pub fn frame_count(&self) -> usize {
        self.state.borrow().frames.len()
    }

    /// Maps the page containing `virt` onto `frame`.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is outside the modeled physical range.
    pub fn map_page(&self, virt: u64, frame: u64) {
        let mut state = self.state.borrow_mut();
        assert!((frame as usize) < state.frames.len(), "frame out of range");
        state.pages.insert(virt >> PAGE_SHIFT, frame);
    }

    /// Removes the mapping of the page containing `virt`.
    pub fn unmap_page(&self, virt: u64) {
        self.state.borrow_mut().pages.remove(&(virt >> PAGE_SHIFT));
    }

    /// Writes the payload word of `frame`.
    pub fn write_frame(&self, frame: u64, value: u64) {
        self.state.borrow_mut().frames[frame as usize] = value;
    }

    /// Reads through the page table, like a load through `virt` would.
    pub fn read_virt(&self, virt: u64) -> Option<u64> {
        let state = self.state.borrow();
        let frame = *state.pages.get(&(virt >> PAGE_SHIFT))?;
        Some(state.frames[frame as usize])
    }

    /// Writes through the page table, like a store through `virt` would.
    ///
    /// # Panics
    ///
    /// Panics if the page is not mapped.
    pub fn write_virt(&self, virt: u64, value: u64) {
        let mut state = self.state.borrow_mut();
        let frame = *state
            .pages
            .get(&(virt >> PAGE_SHIFT))
            .expect("page not mapped");
        state.frames[frame as usize] = value;
    }

    /// Queues `frame` onto the per-CPU list caching `order`/`migratetype`
    /// pages under the modeled profile.
    pub fn free_frame(&self, frame: u64, selector: FreelistSelector) {
        let mut state = self.state.borrow_mut();
        let index = state
            .profile
            .pcp_list_index(selector.migratetype, selector.order) as usize;
        state.lists[index].push_back(frame);
    }

    /// Drains every per-CPU list, returning the number of evicted pages.
    pub fn drain_lists(&self) -> usize {
        let mut state = self.state.borrow_mut();
        let drained = state.lists.iter().map(VecDeque::len).sum();
        trace!(
            "draining per-CPU lists ({})",
            state.lists.iter().map(VecDeque::len).join(", ")
        );
        state.lists.iter_mut().for_each(VecDeque::clear);
        drained
    }

    /// Fills every frame payload from a seeded generator.
    pub fn scramble_frames(&self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for frame in self.state.borrow_mut().frames.iter_mut() {
            *frame = rng.random();
        }
    }

}

impl QueryService for SimHandle {
    fn freelist_count(&mut self) -> Result<u64, ServiceError> {
        let state = self.state.borrow();
        Ok(state.lists[state.watched_list].len() as u64)
    }

    fn translate(&mut self, virt: u64) -> Result<u64, ServiceError> {
        let state = self.state.borrow();
        match state.pages.get(&(virt >> PAGE_SHIFT)) {
            Some(frame) => Ok((*frame << PAGE_SHIFT) | (virt & PAGE_MASK as u64)),
            None => Err(ServiceError::NotResident { virt }),
        }
    }

    fn read_phys(&mut self, phys: u64) -> Result<u64, ServiceError> {
        let state = self.state.borrow();
        let frame = (phys >> PAGE_SHIFT) as usize;
        match state.frames.get(frame) {
            Some(value) => Ok(*value),
            None => Err(ServiceError::InvalidAddress { phys }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::service::MigrateType;

    #[test]
    fn test_translate_roundtrip_matches_virtual_read() {
        let sim = SimHandle::new(SimConfig::default());
        sim.scramble_frames(0x6cf2_18aa);
        let mut probe = sim.clone();

        let virt = 0x7f00_dead_b000u64;
        sim.map_page(virt, 42);

        let phys = probe.translate(virt).unwrap();
        assert_eq!(phys >> PAGE_SHIFT, 42);
        assert_eq!(probe.read_phys(phys).unwrap(), sim.read_virt(virt).unwrap());
    }

    #[test]
    fn test_translate_preserves_page_offset() {
        let sim = SimHandle::new(SimConfig::default());
        sim.map_page(0x5000, 7);
        let mut probe = sim.clone();
        assert_eq!(probe.translate(0x5123).unwrap(), (7 << PAGE_SHIFT) | 0x123);
    }

    #[test]
    fn test_unmapped_address_is_not_resident() {
        let mut sim = SimHandle::new(SimConfig::default());
        assert!(matches!(
            sim.translate(0x1000),
            Err(ServiceError::NotResident { virt: 0x1000 })
        ));
    }

    #[test]
    fn test_out_of_range_frame_is_invalid() {
        let mut sim = SimHandle::new(SimConfig::default());
        let phys = (sim.frame_count() as u64) << PAGE_SHIFT;
        assert!(matches!(
            sim.read_phys(phys),
            Err(ServiceError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_count_snapshots_only_the_watched_list() {
        let sim = SimHandle::new(SimConfig::default());
        sim.free_frame(1, FreelistSelector::default());
        sim.free_frame(2, FreelistSelector::default());
        // A neighboring list must not leak into the snapshot.
        sim.free_frame(
            3,
            FreelistSelector {
                order: 0,
                migratetype: MigrateType::Movable,
            },
        );

        let mut probe = sim.clone();
        assert_eq!(probe.freelist_count().unwrap(), 2);
        // No allocator activity in between: consecutive snapshots agree.
        assert_eq!(probe.freelist_count().unwrap(), 2);

        sim.drain_lists();
        assert_eq!(probe.freelist_count().unwrap(), 0);
    }
}
