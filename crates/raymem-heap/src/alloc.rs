//! Tracked allocation: the allocate/free entry points.
//!
//! [`HeapRegistry::allocate`] reserves `size + GUARD_OVERHEAD` raw bytes,
//! stamps the header and footer around the payload and appends the record
//! to the owning heap's list. [`HeapRegistry::free`] reverses all of it.
//! Payload bytes are reached through the registry, never through a raw
//! pointer, so a handle cannot outlive the block it names.

use crate::error::HeapError;
use crate::guard::{self, GuardedRecord, HeapId, HeapTag, GUARD_OVERHEAD};
use crate::handle::TrackedPtr;
use crate::provider::RawProvider;
use crate::registry::HeapRegistry;

/// Reserve and stamp one guarded block for a `size`-byte payload.
///
/// This is also the bootstrap path for ledger sentinels, which are
/// stamped before any ledger exists to own them.
pub(crate) fn guarded_block(
    provider: &mut dyn RawProvider,
    size: usize,
    tag: HeapTag,
    index: u32,
) -> Result<Box<[u8]>, HeapError> {
    let requested = size
        .checked_add(GUARD_OVERHEAD)
        .ok_or(HeapError::TooLarge { requested: size })?;
    let mut block = provider
        .allocate(requested)
        .ok_or(HeapError::ProviderExhausted { requested })?;
    guard::stamp(&mut block, 0, size, tag, index);
    Ok(block)
}

impl HeapRegistry {
    /// Allocate a tracked `size`-byte payload in the heap named by `tag`.
    ///
    /// Initializes the registry on first use. [`HeapTag::Heap`] is reserved
    /// for ledger sentinels and rejected. Provider failure is reported as
    /// [`HeapError::ProviderExhausted`] and leaves the heap untouched.
    pub fn allocate(&self, size: usize, tag: HeapTag) -> Result<TrackedPtr, HeapError> {
        let heap = tag.heap_id().ok_or(HeapError::ReservedTag { tag })?;
        self.initialize()?;

        let mut guard = self.state_mut()?;
        let state = &mut *guard;
        let index = state.ledger(heap)?.next_index();
        let block = guarded_block(state.provider.as_mut(), size, tag, index)?;
        let record = GuardedRecord::new(size, block.len(), tag, Some(heap));
        let (index, generation) = state.ledger_mut(heap)?.append_block(record, block);

        let ptr = TrackedPtr {
            registry: self.id,
            heap,
            index,
            generation,
        };
        self.trace_op("allocate", &ptr, size);
        Ok(ptr)
    }

    /// Allocate a tracked payload in the default heap.
    pub fn allocate_default(&self, size: usize) -> Result<TrackedPtr, HeapError> {
        self.allocate(size, HeapTag::Default)
    }

    /// Detach a tracked allocation from its heap and release its block.
    ///
    /// Freeing the same allocation twice, or through a handle from another
    /// registry, is an error and leaves every heap unchanged.
    pub fn free(&self, ptr: TrackedPtr) -> Result<(), HeapError> {
        self.check_issuer(ptr.registry)?;
        let mut guard = self.state_mut()?;
        let state = &mut *guard;
        let check_guards = state.config.check_guards_on_free;
        let block = state
            .ledger_mut(ptr.heap)?
            .free_block(ptr.index, ptr.generation, check_guards)?;
        let size = block.len() - GUARD_OVERHEAD;
        state.provider.release(block);

        self.trace_op("free", &ptr, size);
        Ok(())
    }

    /// Run `f` over the payload of a live allocation.
    pub fn with_payload<R>(
        &self,
        ptr: TrackedPtr,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, HeapError> {
        self.check_issuer(ptr.registry)?;
        let state = self.state()?;
        let payload = state.ledger(ptr.heap)?.payload(ptr.index, ptr.generation)?;
        Ok(f(payload))
    }

    /// Run `f` over the mutable payload of a live allocation.
    pub fn with_payload_mut<R>(
        &self,
        ptr: TrackedPtr,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, HeapError> {
        self.check_issuer(ptr.registry)?;
        let mut state = self.state_mut()?;
        let payload = state
            .ledger_mut(ptr.heap)?
            .payload_mut(ptr.index, ptr.generation)?;
        Ok(f(payload))
    }

    /// Run `f` over the whole guarded block of a live allocation.
    ///
    /// The payload starts at [`HEADER_BYTES`](crate::guard::HEADER_BYTES).
    /// Writing outside it damages the guards; this is how overruns are
    /// simulated in tests.
    pub fn with_raw_block_mut<R>(
        &self,
        ptr: TrackedPtr,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, HeapError> {
        self.check_issuer(ptr.registry)?;
        let mut state = self.state_mut()?;
        let block = state
            .ledger_mut(ptr.heap)?
            .raw_block_mut(ptr.index, ptr.generation)?;
        Ok(f(block))
    }

    /// Address of a live allocation's payload, for diagnostics.
    pub fn payload_address(&self, ptr: TrackedPtr) -> Result<usize, HeapError> {
        self.with_payload(ptr, |payload| payload.as_ptr() as usize)
    }

    /// Heap a live allocation belongs to, after checking it is still live.
    pub fn heap_of(&self, ptr: TrackedPtr) -> Result<HeapId, HeapError> {
        self.with_payload(ptr, |_| ptr.heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::error::WalkError;
    use crate::guard::{GuardFault, FOOTER_BYTES, HEADER_BYTES};
    use crate::report::HeapStats;

    #[test]
    fn allocate_initializes_lazily() {
        let registry = HeapRegistry::new();
        assert!(!registry.is_initialized());
        registry.allocate_default(8).unwrap();
        assert!(registry.is_initialized());
    }

    #[test]
    fn allocate_accounts_payload_and_metadata() {
        let registry = HeapRegistry::new();
        registry.allocate(100, HeapTag::Default).unwrap();
        let stats = registry.stats(HeapId::Default).unwrap();
        assert_eq!(
            stats,
            HeapStats {
                live_objects: 1,
                live_bytes: 100,
                live_bytes_with_metadata: 100 + GUARD_OVERHEAD,
            }
        );
        assert_eq!(stats.metadata_bytes(), GUARD_OVERHEAD);
    }

    #[test]
    fn reserved_tag_is_rejected() {
        let registry = HeapRegistry::new();
        assert_eq!(
            registry.allocate(8, HeapTag::Heap),
            Err(HeapError::ReservedTag { tag: HeapTag::Heap })
        );
        assert!(!registry.is_initialized());
    }

    #[test]
    fn payload_is_zeroed_and_writable() {
        let registry = HeapRegistry::new();
        let ptr = registry.allocate_default(4).unwrap();
        registry
            .with_payload(ptr, |bytes| assert_eq!(bytes, &[0, 0, 0, 0]))
            .unwrap();
        registry
            .with_payload_mut(ptr, |bytes| bytes.copy_from_slice(b"ray!"))
            .unwrap();
        registry
            .with_payload(ptr, |bytes| assert_eq!(bytes, b"ray!"))
            .unwrap();
        assert!(registry.walk(HeapId::Default).is_ok());
    }

    #[test]
    fn raw_block_spans_guards() {
        let registry = HeapRegistry::new();
        let ptr = registry.allocate_default(10).unwrap();
        let len = registry.with_raw_block_mut(ptr, |block| block.len()).unwrap();
        assert_eq!(len, HEADER_BYTES + 10 + FOOTER_BYTES);
    }

    #[test]
    fn payload_address_matches_block_offset() {
        let registry = HeapRegistry::new();
        let ptr = registry.allocate_default(10).unwrap();
        let block_start = registry
            .with_raw_block_mut(ptr, |block| block.as_ptr() as usize)
            .unwrap();
        assert_eq!(registry.payload_address(ptr).unwrap(), block_start + HEADER_BYTES);
    }

    #[test]
    fn double_free_is_reported() {
        let registry = HeapRegistry::new();
        let ptr = registry.allocate_default(8).unwrap();
        registry.free(ptr).unwrap();
        assert_eq!(
            registry.free(ptr),
            Err(HeapError::DoubleFree {
                heap: HeapId::Default,
                index: ptr.index()
            })
        );
        assert_eq!(registry.stats(HeapId::Default).unwrap(), HeapStats::default());
    }

    #[test]
    fn stale_handle_cannot_touch_reused_slot() {
        let registry = HeapRegistry::new();
        let old = registry.allocate_default(8).unwrap();
        registry.free(old).unwrap();
        let new = registry.allocate_default(8).unwrap();
        assert_eq!(old.index(), new.index());

        assert!(registry.with_payload(old, |_| ()).is_err());
        assert!(matches!(registry.free(old), Err(HeapError::DoubleFree { .. })));
        assert!(registry.free(new).is_ok());
    }

    #[test]
    fn foreign_handle_is_reported() {
        let a = HeapRegistry::new();
        let b = HeapRegistry::new();
        let ptr = a.allocate_default(8).unwrap();
        b.initialize().unwrap();
        assert_eq!(
            b.free(ptr),
            Err(HeapError::ForeignHandle {
                issued_by: a.id(),
                presented_to: b.id()
            })
        );
        assert!(a.free(ptr).is_ok());
    }

    #[test]
    fn provider_exhaustion_propagates() {
        let config = HeapConfig {
            byte_budget: Some(HeapConfig::min_budget() + 64),
            ..HeapConfig::default()
        };
        let registry = HeapRegistry::with_config(config).unwrap();
        let ptr = registry.allocate_default(64 - GUARD_OVERHEAD).unwrap();
        assert_eq!(
            registry.allocate_default(1),
            Err(HeapError::ProviderExhausted {
                requested: 1 + GUARD_OVERHEAD
            })
        );
        assert_eq!(registry.stats(HeapId::Default).unwrap().live_objects, 1);
        registry.free(ptr).unwrap();
        assert!(registry.allocate_default(1).is_ok());
    }

    #[test]
    fn oversized_request_is_too_large() {
        let registry = HeapRegistry::new();
        assert_eq!(
            registry.allocate_default(usize::MAX),
            Err(HeapError::TooLarge {
                requested: usize::MAX
            })
        );
    }

    #[test]
    fn overrun_is_caught_by_walk_not_free() {
        let registry = HeapRegistry::new();
        let ptr = registry.allocate_default(16).unwrap();
        registry
            .with_raw_block_mut(ptr, |block| block[HEADER_BYTES + 16] = 0xAB)
            .unwrap();
        assert!(matches!(
            registry.walk(HeapId::Default),
            Err(WalkError::Corrupted { position: 1, .. })
        ));
        assert!(registry.free(ptr).is_ok());
    }

    #[test]
    fn checked_free_refuses_damaged_record() {
        let config = HeapConfig {
            check_guards_on_free: true,
            ..HeapConfig::default()
        };
        let registry = HeapRegistry::with_config(config).unwrap();
        let ptr = registry.allocate_default(16).unwrap();
        registry
            .with_raw_block_mut(ptr, |block| block[HEADER_BYTES + 16] = 0xAB)
            .unwrap();
        assert!(matches!(
            registry.free(ptr),
            Err(HeapError::GuardFault {
                fault: GuardFault::FooterCanary { .. },
                ..
            })
        ));
        assert_eq!(registry.stats(HeapId::Default).unwrap().live_objects, 1);
    }

    #[test]
    fn payload_closures_cannot_reenter() {
        let registry = HeapRegistry::new();
        let ptr = registry.allocate_default(8).unwrap();
        let other = registry.allocate_default(8).unwrap();

        let inner = registry
            .with_payload_mut(ptr, |_| {
                (
                    registry.allocate_default(4),
                    registry.free(other),
                    registry.with_payload(other, |_| ()),
                    registry.clean_up(),
                )
            })
            .unwrap();
        assert_eq!(inner.0, Err(HeapError::Reentrant));
        assert_eq!(inner.1, Err(HeapError::Reentrant));
        assert_eq!(inner.2, Err(HeapError::Reentrant));
        assert_eq!(inner.3, Err(HeapError::Reentrant));

        // Shared access nests.
        let nested = registry
            .with_payload(ptr, |_| registry.with_payload(other, |bytes| bytes.len()))
            .unwrap();
        assert_eq!(nested, Ok(8));
        assert_eq!(registry.stats(HeapId::Default).unwrap().live_objects, 2);
        assert!(registry.walk(HeapId::Default).is_ok());
    }

    #[test]
    fn heap_of_reports_owner() {
        let registry = HeapRegistry::new();
        let ptr = registry.allocate(8, HeapTag::Graphics).unwrap();
        assert_eq!(registry.heap_of(ptr), Ok(HeapId::Graphics));
        registry.free(ptr).unwrap();
        assert!(registry.heap_of(ptr).is_err());
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Op {
            Alloc(usize, bool),
            Free(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0usize..256, any::<bool>()).prop_map(|(size, gfx)| Op::Alloc(size, gfx)),
                (0usize..64).prop_map(Op::Free),
            ]
        }

        proptest! {
            #[test]
            fn walk_matches_model(ops in prop::collection::vec(op(), 0..64)) {
                let registry = HeapRegistry::new();
                registry.initialize().unwrap();
                // Model: live allocations in append order, per heap.
                let mut live: Vec<(TrackedPtr, usize)> = Vec::new();

                for op in ops {
                    match op {
                        Op::Alloc(size, gfx) => {
                            let tag = if gfx { HeapTag::Graphics } else { HeapTag::Default };
                            let ptr = registry.allocate(size, tag).unwrap();
                            live.push((ptr, size));
                        }
                        Op::Free(pick) => {
                            if !live.is_empty() {
                                let (ptr, _) = live.remove(pick % live.len());
                                registry.free(ptr).unwrap();
                            }
                        }
                    }
                }

                for heap in HeapId::ALL {
                    let expected: Vec<usize> = live
                        .iter()
                        .filter(|(ptr, _)| ptr.heap() == heap)
                        .map(|&(_, size)| size)
                        .collect();
                    let report = registry.walk(heap).unwrap();
                    prop_assert_eq!(report.live_objects, expected.len());
                    prop_assert_eq!(report.payload_bytes, expected.iter().sum::<usize>());
                    prop_assert_eq!(
                        report.total_bytes,
                        report.payload_bytes + expected.len() * GUARD_OVERHEAD
                    );

                    let order: Vec<usize> = registry
                        .records(heap)
                        .unwrap()
                        .iter()
                        .skip(1)
                        .map(|r| r.payload_size())
                        .collect();
                    prop_assert_eq!(order, expected);
                }
            }

            #[test]
            fn canaries_survive_payload_writes(size in 1usize..128, fill in any::<u8>()) {
                let registry = HeapRegistry::new();
                let ptr = registry.allocate_default(size).unwrap();
                registry.with_payload_mut(ptr, |bytes| bytes.fill(fill)).unwrap();
                prop_assert!(registry.walk(HeapId::Default).is_ok());
            }
        }
    }
}
