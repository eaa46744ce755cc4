use std::cell::RefCell;

use buddybench::bench::run_rounds;
use buddybench::probe::{FreelistSelector, Probe, SimConfig, SimHandle};
use buddybench::util::PAGE_SHIFT;
use rand::{Rng, rng};

#[test]
fn test_translate_read_roundtrip_over_probe() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let sim = SimHandle::new(SimConfig::default());
    let mut probe = Probe::with_service(Box::new(sim.clone()));

    let mut rand = rng();
    for _ in 0..64 {
        let frame = rand.random_range(0..sim.frame_count() as u64);
        let virt = rand.random_range(0x1000u64..0x7fff_ffff) << PAGE_SHIFT;
        sim.map_page(virt, frame);
        sim.write_virt(virt, rand.random());

        // Reading the translated physical address must observe the same
        // bytes as a read through the virtual address.
        let phys = probe.translate(virt)?;
        assert_eq!(phys >> PAGE_SHIFT, frame);
        assert_eq!(probe.read_phys(phys)?, sim.read_virt(virt).unwrap());
    }
    Ok(())
}

#[test]
fn test_counts_are_stable_without_allocator_activity() -> anyhow::Result<()> {
    let sim = SimHandle::new(SimConfig::default());
    for frame in 0..17 {
        sim.free_frame(frame, FreelistSelector::default());
    }
    let mut probe = Probe::with_service(Box::new(sim.clone()));

    let first = probe.freelist_count()?;
    for _ in 0..10 {
        assert_eq!(probe.freelist_count()?, first);
    }
    Ok(())
}

#[test]
fn test_probe_backed_run_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();

    let sim = SimHandle::new(SimConfig::default());
    for frame in 0..4 {
        sim.free_frame(frame, FreelistSelector::default());
    }
    let probe = RefCell::new(Probe::with_service(Box::new(sim.clone())));

    let drainer = sim.clone();
    let stats = run_rounds(
        5,
        || {},
        || {
            drainer.drain_lists();
        },
        || probe.borrow_mut().freelist_count().unwrap() == 0,
    );
    assert_eq!(stats.failed_rounds(), 0);
    assert!(stats.mean_pass_time().is_some());
}
