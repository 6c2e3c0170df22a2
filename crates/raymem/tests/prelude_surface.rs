//! The prelude covers a full allocate/arena/walk/clean-up cycle.

use raymem::prelude::*;

#[test]
fn prelude_drives_a_full_lifecycle() {
    let registry = HeapRegistry::with_config(HeapConfig::default()).unwrap();
    registry.initialize().unwrap();

    let ptr: TrackedPtr = registry.allocate(100, HeapTag::Default).unwrap();
    let mut pool: ObjectArena<u64> =
        ObjectArena::tracked(ArenaConfig::new(2), &registry).unwrap();
    let slot: Slot = pool.try_construct(7).unwrap();
    assert_eq!(pool.get(slot), Some(&7));

    let stats: HeapStats = registry.stats(HeapId::Default).unwrap();
    assert_eq!(stats.live_objects, 1);
    let report: WalkReport = registry.walk(HeapId::Graphics).unwrap();
    assert_eq!(report.live_objects, 2);

    registry.free(ptr).unwrap();
    drop(pool);
    registry.clean_up().unwrap();
    assert!(matches!(
        registry.walk(HeapId::Default),
        Err(WalkError::ShutDown)
    ));
}

#[test]
fn errors_are_reachable_through_the_facade() {
    let registry = HeapRegistry::new();
    let ptr = registry.allocate(8, HeapTag::Default).unwrap();
    registry.free(ptr).unwrap();
    let err: HeapError = registry.free(ptr).unwrap_err();
    assert!(matches!(err, HeapError::DoubleFree { .. }));

    let err = ObjectArena::<u8>::new(ArenaConfig::new(0)).unwrap_err();
    assert!(matches!(err, ArenaError::InvalidConfig { .. }));
    let _ = raymem::heap::GUARD_OVERHEAD;
    let _ = raymem::pool::ArenaId::next();
}
