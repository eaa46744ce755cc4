use buddybench_core::bench::Scenario;
use buddybench_core::primitives::AllocPrimitives;
use buddybench_core::probe::Probe;
use log::info;

use crate::scenarios::ScenarioError;

/// Times the eviction of the current CPU's page cache and checks that the
/// watched free list ends up empty.
pub struct PcpEvict<P: AllocPrimitives> {
    probe: Probe,
    primitives: P,
}

impl<P: AllocPrimitives> PcpEvict<P> {
    /// Creates the scenario around an open probe and a primitives
    /// provider.
    pub fn new(probe: Probe, primitives: P) -> Self {
        PcpEvict { probe, primitives }
    }
}

impl<P: AllocPrimitives> Scenario for PcpEvict<P> {
    type Error = ScenarioError<P::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn action(&mut self) -> Result<(), Self::Error> {
        self.primitives
            .evict_pcp()
            .map_err(ScenarioError::Primitive)
    }

    fn validate(&mut self) -> Result<bool, Self::Error> {
        let count = self.probe.freelist_count()?;
        info!("pages left in the per-CPU cache: {count}");
        Ok(count == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buddybench_core::bench::Harness;
    use buddybench_core::probe::{FreelistSelector, SimConfig, SimHandle};
    use buddybench_noop::Noop;
    use std::convert::Infallible;

    /// Primitives provider that drains the modeled per-CPU lists.
    struct SimPrimitives {
        sim: SimHandle,
    }

    impl AllocPrimitives for SimPrimitives {
        type Error = Infallible;

        fn merge_block(&mut self, _target: *mut u8, _order: u32) -> Result<(), Infallible> {
            Ok(())
        }

        fn escalate_migratetype(
            &mut self,
            _bait: *mut u8,
            _order: u32,
            spray: &mut dyn FnMut(),
        ) -> Result<(), Infallible> {
            spray();
            Ok(())
        }

        fn evict_pcp(&mut self) -> Result<(), Infallible> {
            self.sim.drain_lists();
            Ok(())
        }
    }

    fn populated_sim() -> SimHandle {
        let sim = SimHandle::new(SimConfig::default());
        for frame in 0..8 {
            sim.free_frame(frame, FreelistSelector::default());
        }
        sim
    }

    #[test]
    fn test_draining_primitive_passes_every_round() {
        let sim = populated_sim();
        let probe = Probe::with_service(Box::new(sim.clone()));
        let mut scenario = PcpEvict::new(probe, SimPrimitives { sim });

        let stats = Harness::new(3).run(&mut scenario).unwrap();
        assert_eq!(stats.failed_rounds(), 0);
    }

    #[test]
    fn test_noop_primitive_fails_every_round() {
        let sim = populated_sim();
        let probe = Probe::with_service(Box::new(sim.clone()));
        let mut scenario = PcpEvict::new(probe, Noop);

        let stats = Harness::new(3).run(&mut scenario).unwrap();
        assert_eq!(stats.failed_rounds(), 3);
        assert_eq!(stats.mean_pass_time(), None);
    }
}
