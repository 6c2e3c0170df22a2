//! Handles issued by a [`HeapRegistry`](crate::HeapRegistry).
//!
//! Handles name a ledger slot plus the generation it was issued at, so a
//! handle that outlives its record is detected instead of aliasing
//! whatever reuses the slot.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::guard::{HeapId, SlotLayout};
use crate::raw::RegionBlock;

/// Monotonic counter for [`RegistryId`] allocation.
static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a registry, stamped into every handle it issues.
///
/// Allocated from a process-wide atomic counter, so two registries never
/// share an id even when one is dropped before the other is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistryId(pub u64);

impl RegistryId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-side handle to a tracked allocation.
///
/// Returned by [`HeapRegistry::allocate`](crate::HeapRegistry::allocate).
/// Copying the handle does not copy the allocation; freeing through any
/// copy invalidates all of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrackedPtr {
    pub(crate) registry: RegistryId,
    pub(crate) heap: HeapId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TrackedPtr {
    /// Heap the allocation is linked into.
    pub fn heap(&self) -> HeapId {
        self.heap
    }

    /// Ledger slot index of the allocation.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation at the time of allocation.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Registry that issued this handle.
    pub fn registry(&self) -> RegistryId {
        self.registry
    }
}

impl fmt::Display for TrackedPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.heap, self.index, self.generation)
    }
}

/// Ownership token for a contiguous block of guarded slots linked into a heap.
///
/// Obtained from [`HeapRegistry::link_region`](crate::HeapRegistry::link_region)
/// and surrendered to [`HeapRegistry::unlink_region`](crate::HeapRegistry::unlink_region).
/// Not `Clone`: exactly one party is responsible for unlinking.
///
/// The lease shares ownership of the region's block, so the payload
/// pointers it hands out stay valid for as long as the lease lives, even
/// past [`HeapRegistry::clean_up`](crate::HeapRegistry::clean_up).
#[derive(Debug)]
pub struct RegionLease {
    pub(crate) registry: RegistryId,
    pub(crate) heap: HeapId,
    pub(crate) region: u32,
    pub(crate) generation: u32,
    pub(crate) layout: SlotLayout,
    pub(crate) capacity: usize,
    pub(crate) block: Rc<RegionBlock>,
    /// Offset of slot 0 in `block`, chosen to align every payload.
    pub(crate) base: usize,
}

impl RegionLease {
    /// Heap the region's slots are linked into.
    pub fn heap(&self) -> HeapId {
        self.heap
    }

    /// Registry that owns the region's block.
    pub fn registry(&self) -> RegistryId {
        self.registry
    }

    /// Geometry shared by every slot.
    pub fn slot_layout(&self) -> SlotLayout {
        self.layout
    }

    /// Payload bytes per slot.
    pub fn slot_payload(&self) -> usize {
        self.layout.payload_size()
    }

    /// Bytes per slot: payload, guards and alignment padding.
    pub fn slot_size(&self) -> usize {
        self.layout.stride()
    }

    /// Number of slots in the region.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes spanned by the slots, `capacity * slot_size`.
    pub fn block_bytes(&self) -> usize {
        self.slot_size() * self.capacity
    }

    /// Address of the start of slot 0.
    pub fn block_address(&self) -> usize {
        self.block.addr() + self.base
    }

    /// Pointer to the payload of `slot`, aligned to the region's element
    /// alignment.
    ///
    /// The pointer is only meaningful for `slot < capacity`. Writing
    /// through it outside the payload damages guards the next walk checks.
    pub fn payload_ptr(&self, slot: usize) -> *mut u8 {
        self.block
            .ptr_at(self.base + slot * self.layout.stride() + self.layout.payload_offset())
    }

    /// Address of the payload of `slot`.
    pub fn payload_address(&self, slot: usize) -> usize {
        self.payload_ptr(slot) as usize
    }
}
