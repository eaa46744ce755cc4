use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::ptr::null_mut;

use buddybench_core::bench::Scenario;
use buddybench_core::primitives::AllocPrimitives;
use buddybench_core::probe::Probe;
use buddybench_core::util::{PAGE_SIZE, map_populated, map_shared_file, shm_tmpfile, unmap};
use log::debug;

use crate::scenarios::ScenarioError;

/// Times the freeing of a targeted page and checks that the next file
/// page the host allocates lands on the merged frame.
///
/// Per round: setup maps and populates one anonymous page, records its
/// physical frame and opens an unnamed tmpfs file; the timed action frees
/// the page through the primitives provider and writes eight bytes to the
/// file; validate maps the file page and passes iff it was placed on the
/// freed frame. The file mapping and descriptor are released every round;
/// the target mapping is consumed by the primitive (and leaks under a
/// provider that leaves it in place).
pub struct BlockMerge<P: AllocPrimitives> {
    probe: Probe,
    primitives: P,
    target: *mut u8,
    target_phys: u64,
    file: Option<File>,
}

impl<P: AllocPrimitives> BlockMerge<P> {
    /// Creates the scenario around an open probe and a primitives
    /// provider.
    pub fn new(probe: Probe, primitives: P) -> Self {
        BlockMerge {
            probe,
            primitives,
            target: null_mut(),
            target_phys: 0,
            file: None,
        }
    }
}

impl<P: AllocPrimitives> Scenario for BlockMerge<P> {
    type Error = ScenarioError<P::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        self.target = map_populated(PAGE_SIZE)?;
        self.target_phys = self.probe.translate_ptr(self.target)?;
        self.file = Some(shm_tmpfile()?);
        Ok(())
    }

    fn action(&mut self) -> Result<(), Self::Error> {
        self.primitives
            .merge_block(self.target, 0)
            .map_err(ScenarioError::Primitive)?;
        let file = self.file.as_mut().expect("setup opens the round's file");
        file.write_all(b"ffffffff")?;
        Ok(())
    }

    fn validate(&mut self) -> Result<bool, Self::Error> {
        let file = self.file.take().expect("setup opens the round's file");
        let file_ptr = map_shared_file(file.as_raw_fd(), PAGE_SIZE)?;
        let file_phys = self.probe.translate_ptr(file_ptr)?;
        unsafe { unmap(file_ptr, PAGE_SIZE)? };
        drop(file);

        debug!(
            "target frame {:#x}, file frame {:#x}",
            self.target_phys, file_phys
        );
        Ok(file_phys == self.target_phys)
    }
}
