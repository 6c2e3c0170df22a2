//! Fixed-capacity object arena.
//!
//! An [`ObjectArena<T>`] owns one contiguous block of `capacity` slots for
//! a single element type. Objects are constructed into free slots and
//! released in place; nothing is ever moved, so an object's address is
//! stable for its whole life and a refilled slot reuses the same address.
//!
//! # Slot policy
//!
//! Construction always takes the lowest free slot. With LIFO releases
//! ([`release_last`](ObjectArena::release_last)) that is slot `live_count`,
//! so slots fill strictly front to back and the slot just vacated is the
//! next one filled. Releasing out of order ([`release`](ObjectArena::release),
//! [`release_at`](ObjectArena::release_at)) leaves a hole that the next
//! construction fills before any higher slot.
//!
//! # Tracking
//!
//! A tracked arena ([`ObjectArena::tracked`]) takes its block from a heap
//! of a [`HeapRegistry`] as a region of guarded slots. Each object lives in
//! its slot's payload, between that slot's header and footer, so an
//! overrun out of an object lands on a guard the heap walk checks. All
//! `capacity` slots are stamped and accounted when the arena is created and
//! unlinked again when it is dropped.
//!
//! ```text
//! block_start
//! ├─ slot 0 ─────────────────────────┼─ slot 1 ───────── ...
//! │ header │ object │ footer │ pad   │ header │ object │
//!          └ slot_address(0)                  └ slot_address(1)
//! ```
//!
//! An untracked arena packs objects `size_of::<T>()` apart with no guards.

use std::alloc::Layout;
use std::mem;

use raymem_heap::{HeapId, HeapRegistry};
use tracing::{debug, trace, warn};

use crate::config::ArenaConfig;
use crate::error::ArenaError;
use crate::handle::{ArenaId, Slot};
use crate::raw::SlotStorage;

/// Fixed-capacity arena of `T` slots.
pub struct ObjectArena<T> {
    id: ArenaId,
    storage: SlotStorage<T>,
    generations: Box<[u32]>,
    live_count: usize,
    registry: Option<HeapRegistry>,
}

impl<T> ObjectArena<T> {
    /// Create an untracked arena.
    pub fn new(config: ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let arena = Self::with_storage(SlotStorage::owned(config.capacity), None);
        debug!(
            arena = %arena.id,
            capacity = config.capacity,
            slot_size = arena.slot_size(),
            "arena created"
        );
        Ok(arena)
    }

    /// Create an arena whose slots are linked into `config.heap` of `registry`.
    ///
    /// Initializes the registry if needed. The heap is charged
    /// `capacity * slot_size` bytes immediately, where a slot holds the
    /// object, its guards and any padding `T`'s alignment needs.
    pub fn tracked(config: ArenaConfig, registry: &HeapRegistry) -> Result<Self, ArenaError> {
        config.validate()?;
        let lease = registry.link_region(config.heap, Layout::new::<T>(), config.capacity)?;
        let storage = match SlotStorage::in_region(lease) {
            Ok(storage) => storage,
            Err(lease) => {
                let slot_payload = lease.slot_payload();
                registry.unlink_region(lease)?;
                return Err(ArenaError::SizeMismatch {
                    requested: mem::size_of::<T>(),
                    slot_payload,
                });
            }
        };
        let arena = Self::with_storage(storage, Some(registry.clone()));
        debug!(
            arena = %arena.id,
            heap = %config.heap,
            capacity = config.capacity,
            slot_size = arena.slot_size(),
            bytes = arena.block_bytes(),
            "tracked arena created"
        );
        Ok(arena)
    }

    fn with_storage(storage: SlotStorage<T>, registry: Option<HeapRegistry>) -> Self {
        Self {
            id: ArenaId::next(),
            generations: vec![0; storage.capacity()].into_boxed_slice(),
            storage,
            live_count: 0,
            registry,
        }
    }

    /// This arena's unique id.
    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Maximum number of live objects.
    pub fn capacity(&self) -> usize {
        self.generations.len()
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Whether no object is live.
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Whether every slot is live.
    pub fn is_full(&self) -> bool {
        self.live_count == self.capacity()
    }

    /// Distance between consecutive objects.
    ///
    /// `size_of::<T>()` when untracked. A tracked slot adds its guards and
    /// rounds up to `T`'s alignment.
    pub fn slot_size(&self) -> usize {
        self.storage.stride()
    }

    /// Payload bytes per slot: the element size.
    pub fn slot_payload(&self) -> usize {
        mem::size_of::<T>()
    }

    /// Size of the arena's block: `capacity * slot_size`.
    pub fn block_bytes(&self) -> usize {
        self.capacity() * self.slot_size()
    }

    /// Address of the start of the block, the first byte of slot 0.
    pub fn block_start(&self) -> usize {
        self.storage.block_start()
    }

    /// Byte offset of slot `index` from the start of the block.
    pub fn slot_offset(&self, index: usize) -> usize {
        index * self.slot_size()
    }

    /// Offset of the object within its slot: past the header when tracked.
    pub fn payload_offset(&self) -> usize {
        self.storage.payload_offset()
    }

    /// Whether the arena's slots are linked into a heap.
    pub fn is_tracked(&self) -> bool {
        self.storage.lease().is_some()
    }

    /// The heap a tracked arena is linked into.
    pub fn heap(&self) -> Option<HeapId> {
        self.storage.lease().map(|lease| lease.heap())
    }

    /// Construct `value` in the lowest free slot.
    pub fn try_construct(&mut self, value: T) -> Result<Slot, ArenaError> {
        self.try_construct_with(mem::size_of::<T>(), || value)
    }

    /// Construct an object built by `init` in the lowest free slot.
    ///
    /// `requested` is the payload size the caller expects a slot to hold;
    /// it must equal the element size. Both the capacity and size checks
    /// happen before `init` runs.
    pub fn try_construct_with(
        &mut self,
        requested: usize,
        init: impl FnOnce() -> T,
    ) -> Result<Slot, ArenaError> {
        let capacity = self.capacity();
        if self.live_count == capacity {
            return Err(ArenaError::Exhausted { capacity });
        }
        let slot_payload = mem::size_of::<T>();
        if requested != slot_payload {
            return Err(ArenaError::SizeMismatch {
                requested,
                slot_payload,
            });
        }

        let index = (0..capacity)
            .find(|&index| !self.storage.is_occupied(index))
            .ok_or(ArenaError::Exhausted { capacity })?;
        self.storage
            .put(index, init())
            .map_err(|_| ArenaError::Exhausted { capacity })?;
        self.live_count += 1;

        trace!(arena = %self.id, index, live = self.live_count, "construct");
        Ok(Slot {
            arena: self.id,
            index: index as u32,
            generation: self.generations[index],
        })
    }

    fn take(&mut self, index: usize) -> Result<T, ArenaError> {
        let value = self
            .storage
            .take(index)
            .ok_or(ArenaError::NotLive { index })?;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.live_count -= 1;
        trace!(arena = %self.id, index, live = self.live_count, "release");
        Ok(value)
    }

    fn check_index(&self, index: usize) -> Result<(), ArenaError> {
        if index >= self.capacity() {
            return Err(ArenaError::OutOfBounds {
                index,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    fn check_slot(&self, slot: Slot) -> Result<usize, ArenaError> {
        if slot.arena != self.id {
            return Err(ArenaError::WrongArena {
                expected: self.id,
                found: slot.arena,
            });
        }
        let index = slot.index();
        self.check_index(index)?;
        if !self.storage.is_occupied(index) || self.generations[index] != slot.generation {
            return Err(ArenaError::NotLive { index });
        }
        Ok(index)
    }

    /// Release the object in the highest occupied slot.
    pub fn release_last(&mut self) -> Result<T, ArenaError> {
        let index = (0..self.capacity())
            .rev()
            .find(|&index| self.storage.is_occupied(index))
            .ok_or(ArenaError::Empty)?;
        self.take(index)
    }

    /// Release the object named by `slot`.
    pub fn release(&mut self, slot: Slot) -> Result<T, ArenaError> {
        let index = self.check_slot(slot)?;
        self.take(index)
    }

    /// Release the object at `index`, whatever handle it was issued under.
    pub fn release_at(&mut self, index: usize) -> Result<T, ArenaError> {
        self.check_index(index)?;
        self.take(index)
    }

    /// Drop every live object, highest slot first. Returns how many were dropped.
    pub fn release_objects(&mut self) -> usize {
        let mut released = 0;
        for index in (0..self.capacity()).rev() {
            if self.storage.is_occupied(index) && self.take(index).is_ok() {
                released += 1;
            }
        }
        released
    }

    /// The object named by `slot`, if it is still live.
    pub fn get(&self, slot: Slot) -> Option<&T> {
        let index = self.check_slot(slot).ok()?;
        self.storage.get(index)
    }

    /// Mutable access to the object named by `slot`, if it is still live.
    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        let index = self.check_slot(slot).ok()?;
        self.storage.get_mut(index)
    }

    /// The object at `index`, if that slot is live.
    pub fn get_at(&self, index: usize) -> Option<&T> {
        self.storage.get(index)
    }

    /// Live objects in slot order, with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &T)> + '_ {
        let arena = self.id;
        (0..self.capacity()).filter_map(move |index| {
            self.storage.get(index).map(|value| {
                (
                    Slot {
                        arena,
                        index: index as u32,
                        generation: self.generations[index],
                    },
                    value,
                )
            })
        })
    }

    /// Address of slot `index`'s object, live or not.
    ///
    /// Equal to `block_start + slot_offset(index) + payload_offset`, and to
    /// the address of the object [`get_at`](Self::get_at) returns there.
    pub fn slot_address(&self, index: usize) -> Result<usize, ArenaError> {
        self.check_index(index)?;
        Ok(self.storage.address(index))
    }

    /// Run `f` over copies of slot `index`'s header and footer, then write
    /// them back into the slot.
    ///
    /// Tracked arenas only. Damaged guards are reported by the next heap
    /// walk; the object between them is not touched.
    pub fn with_slot_guards_mut<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut [u8], &mut [u8]) -> R,
    ) -> Result<R, ArenaError> {
        self.check_index(index)?;
        match (&self.registry, self.storage.lease()) {
            (Some(registry), Some(lease)) => Ok(registry.with_region_guards_mut(lease, index, f)?),
            _ => Err(ArenaError::Untracked),
        }
    }
}

impl<T> Drop for ObjectArena<T> {
    fn drop(&mut self) {
        let released = self.release_objects();
        let (Some(registry), Some(lease)) = (self.registry.take(), self.storage.take_lease())
        else {
            debug!(arena = %self.id, released, "arena dropped");
            return;
        };

        let heap = lease.heap();
        let bytes = lease.block_bytes();
        match registry.unlink_region(lease) {
            Ok(()) => debug!(arena = %self.id, %heap, released, bytes, "tracked arena dropped"),
            Err(e) => warn!(
                arena = %self.id,
                %heap,
                error = %e,
                "tracked arena dropped without unlinking its region"
            ),
        }
    }
}

impl<T> std::fmt::Debug for ObjectArena<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectArena")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("live_count", &self.live_count)
            .field("slot_size", &self.slot_size())
            .field("heap", &self.heap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raymem_heap::guard::{FOOTER_BYTES, HEADER_BYTES};
    use raymem_heap::{HeapError, HeapStats, HeapTag, WalkError};
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, PartialEq)]
    struct Body {
        id: u32,
        mass: f64,
    }

    fn body(id: u32) -> Body {
        Body {
            id,
            mass: id as f64,
        }
    }

    fn arena(capacity: usize) -> ObjectArena<Body> {
        ObjectArena::new(ArenaConfig::new(capacity)).unwrap()
    }

    fn addr<T>(value: &T) -> usize {
        value as *const T as usize
    }

    #[test]
    fn slots_fill_front_to_back() {
        let mut a = arena(4);
        let indices: Vec<usize> = (0..3)
            .map(|i| a.try_construct(body(i)).unwrap().index())
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(a.live_count(), 3);
    }

    #[test]
    fn exhaustion_leaves_count_at_capacity() {
        let mut a = arena(2);
        a.try_construct(body(0)).unwrap();
        a.try_construct(body(1)).unwrap();
        assert_eq!(
            a.try_construct(body(2)),
            Err(ArenaError::Exhausted { capacity: 2 })
        );
        assert_eq!(a.live_count(), 2);
    }

    #[test]
    fn size_mismatch_skips_init() {
        let mut a = arena(2);
        let ran = Cell::new(false);
        let result = a.try_construct_with(1, || {
            ran.set(true);
            body(0)
        });
        assert_eq!(
            result,
            Err(ArenaError::SizeMismatch {
                requested: 1,
                slot_payload: mem::size_of::<Body>()
            })
        );
        assert!(!ran.get());
        assert_eq!(a.live_count(), 0);
    }

    #[test]
    fn release_last_reuses_same_slot() {
        let mut a = arena(4);
        for i in 0..3 {
            a.try_construct(body(i)).unwrap();
        }
        assert_eq!(a.release_last(), Ok(body(2)));
        assert_eq!(a.live_count(), 2);
        let vacated = a.slot_address(2).unwrap();
        let slot = a.try_construct(body(9)).unwrap();
        assert_eq!(slot.index(), 2);
        assert_eq!(addr(a.get(slot).unwrap()), vacated);
        assert_eq!(vacated - addr(a.get_at(0).unwrap()), 2 * a.slot_size());
    }

    #[test]
    fn release_last_on_empty_arena() {
        let mut a = arena(1);
        assert_eq!(a.release_last(), Err(ArenaError::Empty));
    }

    #[test]
    fn hole_is_filled_first() {
        let mut a = arena(4);
        let slots: Vec<Slot> = (0..4).map(|i| a.try_construct(body(i)).unwrap()).collect();
        assert_eq!(a.release(slots[1]), Ok(body(1)));
        assert_eq!(a.get_at(2), Some(&body(2)));

        let refill = a.try_construct(body(7)).unwrap();
        assert_eq!(refill.index(), 1);
        assert_eq!(a.get(refill), Some(&body(7)));
    }

    #[test]
    fn release_last_takes_highest_after_hole() {
        let mut a = arena(4);
        for i in 0..3 {
            a.try_construct(body(i)).unwrap();
        }
        a.release_at(0).unwrap();
        assert_eq!(a.release_last(), Ok(body(2)));
        assert_eq!(a.live_count(), 1);
    }

    #[test]
    fn stale_slot_is_not_live() {
        let mut a = arena(2);
        let old = a.try_construct(body(0)).unwrap();
        a.release(old).unwrap();
        let new = a.try_construct(body(1)).unwrap();
        assert_eq!(old.index(), new.index());
        assert_eq!(a.release(old), Err(ArenaError::NotLive { index: 0 }));
        assert_eq!(a.get(old), None);
        assert_eq!(a.get(new), Some(&body(1)));
    }

    #[test]
    fn wrong_arena_is_rejected() {
        let mut a = arena(2);
        let mut b = arena(2);
        let slot = a.try_construct(body(0)).unwrap();
        b.try_construct(body(1)).unwrap();
        assert_eq!(
            b.release(slot),
            Err(ArenaError::WrongArena {
                expected: b.id(),
                found: a.id()
            })
        );
        assert_eq!(b.live_count(), 1);
    }

    #[test]
    fn release_at_checks_bounds_and_liveness() {
        let mut a = arena(2);
        assert_eq!(
            a.release_at(5),
            Err(ArenaError::OutOfBounds {
                index: 5,
                capacity: 2
            })
        );
        assert_eq!(a.release_at(1), Err(ArenaError::NotLive { index: 1 }));
    }

    #[test]
    fn release_objects_drops_highest_first() {
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        struct Tracer(u32, Rc<std::cell::RefCell<Vec<u32>>>);
        impl Drop for Tracer {
            fn drop(&mut self) {
                self.1.borrow_mut().push(self.0);
            }
        }

        let mut a = ObjectArena::new(ArenaConfig::new(3)).unwrap();
        for i in 0..3 {
            a.try_construct(Tracer(i, Rc::clone(&order))).unwrap();
        }
        assert_eq!(a.release_objects(), 3);
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
        assert!(a.is_empty());
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut a = arena(1);
        let slot = a.try_construct(body(1)).unwrap();
        a.get_mut(slot).unwrap().mass = 42.0;
        assert_eq!(a.get(slot).unwrap().mass, 42.0);
    }

    #[test]
    fn iter_yields_live_in_slot_order() {
        let mut a = arena(4);
        for i in 0..4 {
            a.try_construct(body(i)).unwrap();
        }
        a.release_at(1).unwrap();
        let ids: Vec<u32> = a.iter().map(|(_, b)| b.id).collect();
        assert_eq!(ids, vec![0, 2, 3]);
        let (slot, _) = a.iter().nth(1).unwrap();
        assert_eq!(a.get(slot), Some(&body(2)));
    }

    #[test]
    fn untracked_objects_are_packed_in_the_block() {
        let mut a = arena(3);
        assert!(!a.is_tracked());
        assert_eq!(a.slot_size(), mem::size_of::<Body>());
        assert_eq!(a.payload_offset(), 0);
        assert_eq!(a.with_slot_guards_mut(0, |_, _| ()), Err(ArenaError::Untracked));

        let slots: Vec<Slot> = (0..3).map(|i| a.try_construct(body(i)).unwrap()).collect();
        for (index, slot) in slots.iter().enumerate() {
            let object = addr(a.get(*slot).unwrap());
            assert_eq!(object, a.block_start() + a.slot_offset(index));
            assert_eq!(object, a.slot_address(index).unwrap());
        }
        assert_eq!(
            a.slot_address(3),
            Err(ArenaError::OutOfBounds {
                index: 3,
                capacity: 3
            })
        );
    }

    #[test]
    fn tracked_arena_charges_heap_up_front() {
        let registry = HeapRegistry::new();
        let a: ObjectArena<Body> = ObjectArena::tracked(ArenaConfig::new(4), &registry).unwrap();
        // Header 24, body 16, footer 4, rounded up to the body's 8-byte alignment.
        assert_eq!(a.slot_size(), 48);
        assert_eq!(a.payload_offset(), HEADER_BYTES);

        let stats = registry.stats(HeapId::Graphics).unwrap();
        assert_eq!(stats.live_objects, 4);
        assert_eq!(stats.live_bytes_with_metadata, a.block_bytes());
        assert!(registry.walk(HeapId::Graphics).is_ok());

        drop(a);
        assert_eq!(registry.stats(HeapId::Graphics).unwrap(), HeapStats::default());
    }

    #[test]
    fn tracked_objects_live_between_their_guards() {
        let registry = HeapRegistry::new();
        let mut a: ObjectArena<u64> = ObjectArena::tracked(ArenaConfig::new(3), &registry).unwrap();
        let slots: Vec<Slot> = [0xAAAA_BBBB_CCCC_DDDD, 1, 2]
            .into_iter()
            .map(|v| a.try_construct(v).unwrap())
            .collect();

        let start = a.block_start();
        for (index, slot) in slots.iter().enumerate() {
            let object = addr(a.get(*slot).unwrap());
            let slot_start = start + a.slot_offset(index);
            assert_eq!(object, slot_start + HEADER_BYTES);
            assert_eq!(object, a.slot_address(index).unwrap());
            assert_eq!(object % mem::align_of::<u64>(), 0);
            // Footer follows the object inside the same slot.
            assert!(object + mem::size_of::<u64>() + FOOTER_BYTES <= slot_start + a.slot_size());
            assert!(object + mem::size_of::<u64>() <= start + a.block_bytes());
        }
        assert_eq!(a.get(slots[0]), Some(&0xAAAA_BBBB_CCCC_DDDD));
        assert!(registry.walk(HeapId::Graphics).is_ok());
    }

    #[test]
    fn tracked_addresses_match_the_heap_records() {
        let registry = HeapRegistry::new();
        let mut a: ObjectArena<Body> = ObjectArena::tracked(ArenaConfig::new(2), &registry).unwrap();
        let slot = a.try_construct(body(1)).unwrap();
        let object = addr(a.get(slot).unwrap());

        a.with_slot_guards_mut(0, |header, _| header[0] ^= 0xFF).unwrap();
        match registry.walk(HeapId::Graphics) {
            Err(WalkError::Corrupted {
                position: 1,
                address,
                ..
            }) => assert_eq!(address, object),
            other => panic!("expected corruption at the object, got {other:?}"),
        }
        a.with_slot_guards_mut(0, |header, _| header[0] ^= 0xFF).unwrap();
        assert!(registry.walk(HeapId::Graphics).is_ok());
    }

    #[test]
    fn over_aligned_objects_stay_aligned() {
        #[repr(align(32))]
        struct Wide([u8; 40]);

        let registry = HeapRegistry::new();
        let mut a: ObjectArena<Wide> = ObjectArena::tracked(ArenaConfig::new(3), &registry).unwrap();
        // Header padded to 32, 64 payload bytes, footer, rounded up to 32.
        assert_eq!(a.payload_offset(), 32);
        assert_eq!(a.slot_size(), 128);
        for fill in 0..3u8 {
            let slot = a.try_construct(Wide([fill; 40])).unwrap();
            assert_eq!(addr(a.get(slot).unwrap()) % 32, 0);
        }
        assert!(registry.walk(HeapId::Graphics).is_ok());
    }

    #[test]
    fn object_writes_leave_guards_intact() {
        let registry = HeapRegistry::new();
        let mut a: ObjectArena<[u8; 13]> =
            ObjectArena::tracked(ArenaConfig::new(4), &registry).unwrap();
        assert_eq!(a.slot_size(), 13 + HEADER_BYTES + FOOTER_BYTES);
        for _ in 0..4 {
            let slot = a.try_construct([0; 13]).unwrap();
            a.get_mut(slot).unwrap().fill(0xFF);
        }
        assert!(registry.walk(HeapId::Graphics).is_ok());
    }

    #[test]
    fn tracked_slot_overrun_is_walk_visible() {
        let registry = HeapRegistry::new();
        let a: ObjectArena<Body> = ObjectArena::tracked(ArenaConfig::new(2), &registry).unwrap();
        a.with_slot_guards_mut(1, |_, footer| footer[0] = 0).unwrap();
        assert!(matches!(
            registry.walk(HeapId::Graphics),
            Err(WalkError::Corrupted { position: 2, .. })
        ));
        assert!(matches!(
            a.with_slot_guards_mut(2, |_, _| ()),
            Err(ArenaError::OutOfBounds { index: 2, .. })
        ));
    }

    #[test]
    fn tracked_arena_in_default_heap() {
        let registry = HeapRegistry::new();
        let config = ArenaConfig::new(2).in_heap(HeapId::Default);
        let a: ObjectArena<u64> = ObjectArena::tracked(config, &registry).unwrap();
        assert_eq!(a.heap(), Some(HeapId::Default));
        assert_eq!(registry.stats(HeapId::Default).unwrap().live_objects, 2);
        assert_eq!(registry.stats(HeapId::Graphics).unwrap().live_objects, 0);
    }

    #[test]
    fn arena_outliving_registry_cleanup_still_drops() {
        let registry = HeapRegistry::new();
        let drops = Rc::new(Cell::new(0));
        struct Counted(Rc<Cell<u32>>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let mut a = ObjectArena::tracked(ArenaConfig::new(2), &registry).unwrap();
        a.try_construct(Counted(Rc::clone(&drops))).unwrap();
        let report = registry.clean_up().unwrap();
        assert_eq!(report.orphaned_regions[&HeapId::Graphics], 1);
        assert_eq!(registry.provider_bytes().unwrap(), a.block_bytes() + 7);

        drop(a);
        assert_eq!(drops.get(), 1);
        assert_eq!(registry.provider_bytes().unwrap(), 0);
    }

    #[test]
    fn dropping_inside_a_payload_closure_does_not_panic() {
        let registry = HeapRegistry::new();
        let ptr = registry.allocate(8, HeapTag::Graphics).unwrap();
        let mut a: ObjectArena<Body> = ObjectArena::tracked(ArenaConfig::new(2), &registry).unwrap();
        a.try_construct(body(1)).unwrap();

        let reentered = registry
            .with_payload_mut(ptr, |_| {
                drop(a);
                ObjectArena::<Body>::tracked(ArenaConfig::new(1), &registry).err()
            })
            .unwrap();
        assert_eq!(reentered, Some(ArenaError::Heap(HeapError::Reentrant)));

        // The region could not be unlinked and is reclaimed at clean-up.
        assert_eq!(registry.stats(HeapId::Graphics).unwrap().live_objects, 3);
        let report = registry.clean_up().unwrap();
        assert_eq!(report.orphaned_regions[&HeapId::Graphics], 1);
        assert_eq!(registry.provider_bytes().unwrap(), 0);
    }

    #[test]
    fn tracked_creation_after_shutdown_fails() {
        let registry = HeapRegistry::new();
        registry.clean_up().unwrap();
        let result: Result<ObjectArena<u8>, _> = ObjectArena::tracked(ArenaConfig::new(1), &registry);
        assert!(matches!(
            result,
            Err(ArenaError::Heap(raymem_heap::HeapError::ShutDown))
        ));
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn live_count_never_exceeds_capacity(
                capacity in 1usize..16,
                ops in prop::collection::vec(any::<(bool, u8)>(), 0..64),
            ) {
                let mut a: ObjectArena<u32> = ObjectArena::new(ArenaConfig::new(capacity)).unwrap();
                let mut live = 0usize;
                for (construct, pick) in ops {
                    if construct {
                        match a.try_construct(pick as u32) {
                            Ok(_) => live += 1,
                            Err(e) => {
                                prop_assert_eq!(e, ArenaError::Exhausted { capacity });
                                prop_assert_eq!(live, capacity);
                            }
                        }
                    } else if a.release_at(pick as usize % capacity).is_ok() {
                        live -= 1;
                    }
                    prop_assert_eq!(a.live_count(), live);
                    prop_assert!(a.live_count() <= a.capacity());
                    prop_assert_eq!(a.iter().count(), live);
                }
            }

            #[test]
            fn lifo_construct_release_is_identity(
                prefill in 0usize..7,
                value in any::<u32>(),
            ) {
                let mut a: ObjectArena<u32> = ObjectArena::new(ArenaConfig::new(8)).unwrap();
                for i in 0..prefill {
                    a.try_construct(i as u32).unwrap();
                }
                let first = a.try_construct(value).unwrap();
                prop_assert_eq!(a.release_last(), Ok(value));
                prop_assert_eq!(a.live_count(), prefill);
                let second = a.try_construct(value).unwrap();
                prop_assert_eq!(first.index(), second.index());
                prop_assert_eq!(second.index(), prefill);
            }

            #[test]
            fn constructed_objects_are_spaced_by_slot_size(
                k in 1usize..12,
                tracked in any::<bool>(),
            ) {
                let registry = HeapRegistry::new();
                let config = ArenaConfig::new(12);
                let mut a: ObjectArena<[u8; 24]> = if tracked {
                    ObjectArena::tracked(config, &registry).unwrap()
                } else {
                    ObjectArena::new(config).unwrap()
                };
                let slots: Vec<Slot> = (0..k)
                    .map(|i| a.try_construct([i as u8; 24]).unwrap())
                    .collect();
                let addresses: Vec<usize> = slots
                    .iter()
                    .map(|s| addr(a.get(*s).unwrap()))
                    .collect();
                for pair in addresses.windows(2) {
                    prop_assert_eq!(pair[1] - pair[0], a.slot_size());
                }
                for &address in &addresses {
                    prop_assert!(address >= a.block_start());
                    prop_assert!(address + 24 <= a.block_start() + a.block_bytes());
                }
            }
        }
    }
}
