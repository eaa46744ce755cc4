use buddybench_core::primitives::AllocPrimitives;
use log::debug;
use thiserror::Error;

/// Error type that can never occur.
#[derive(Debug, Error)]
pub enum Never {}

/// Primitives provider that logs its calls and does nothing.
///
/// The spray callback of
/// [`escalate_migratetype`](AllocPrimitives::escalate_migratetype) is
/// still invoked once so the caller's spray plumbing runs.
#[derive(Default)]
pub struct Noop;

impl AllocPrimitives for Noop {
    type Error = Never;

    fn merge_block(&mut self, target: *mut u8, order: u32) -> Result<(), Self::Error> {
        debug!("merge_block({:#x}, order {order}): no-op", target as usize);
        Ok(())
    }

    fn escalate_migratetype(
        &mut self,
        bait: *mut u8,
        order: u32,
        spray: &mut dyn FnMut(),
    ) -> Result<(), Self::Error> {
        debug!(
            "escalate_migratetype({:#x}, order {order}): no-op",
            bait as usize
        );
        spray();
        Ok(())
    }

    fn evict_pcp(&mut self) -> Result<(), Self::Error> {
        debug!("evict_pcp: no-op");
        Ok(())
    }
}
