//! Typed slot storage placed in raw memory.
//!
//! [`SlotStorage<T>`] keeps `capacity` objects at a fixed stride from one
//! base pointer. The memory is either an owned `MaybeUninit<T>` slice
//! (untracked arenas, stride `size_of::<T>()`) or the payloads of a
//! guarded heap region (tracked arenas, stride the region's slot size).
//! An occupancy flag per slot says which payloads hold an initialized `T`.
//!
//! All `unsafe` in the crate lives here, each block with a `// SAFETY:`
//! comment. Everything else goes through the safe methods below.

#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};

use raymem_heap::RegionLease;

enum Backing<T> {
    Owned(NonNull<[MaybeUninit<T>]>),
    /// The lease shares ownership of the region block, keeping `base` valid.
    Region(RegionLease),
    /// The region was surrendered; no slot is reachable any more.
    Detached,
}

/// `capacity` slots of `T` spaced `stride` bytes apart.
pub(crate) struct SlotStorage<T> {
    /// Payload of slot 0. Aligned for `T`.
    base: NonNull<u8>,
    stride: usize,
    occupied: Box<[bool]>,
    backing: Backing<T>,
    _marker: PhantomData<T>,
}

impl<T> SlotStorage<T> {
    /// Untracked storage in a fresh `MaybeUninit<T>` slice.
    pub(crate) fn owned(capacity: usize) -> Self {
        let slots = NonNull::from(Box::leak(Box::<[T]>::new_uninit_slice(capacity)));
        Self {
            base: slots.cast::<u8>(),
            stride: mem::size_of::<T>(),
            occupied: vec![false; capacity].into_boxed_slice(),
            backing: Backing::Owned(slots),
            _marker: PhantomData,
        }
    }

    /// Storage in the payloads of a region leased for `T`.
    ///
    /// Gives the lease back if its payloads cannot hold a `T`.
    pub(crate) fn in_region(lease: RegionLease) -> Result<Self, RegionLease> {
        let align = mem::align_of::<T>();
        let fits = lease.slot_payload() == mem::size_of::<T>()
            && lease.payload_address(0) % align == 0
            && lease.slot_size() % align == 0;
        let Some(base) = NonNull::new(lease.payload_ptr(0)).filter(|_| fits) else {
            return Err(lease);
        };
        Ok(Self {
            base,
            stride: lease.slot_size(),
            occupied: vec![false; lease.capacity()].into_boxed_slice(),
            backing: Backing::Region(lease),
            _marker: PhantomData,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.occupied.len()
    }

    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    pub(crate) fn lease(&self) -> Option<&RegionLease> {
        match &self.backing {
            Backing::Region(lease) => Some(lease),
            _ => None,
        }
    }

    pub(crate) fn is_occupied(&self, index: usize) -> bool {
        self.occupied.get(index).copied().unwrap_or(false)
    }

    /// Address where slot `index`'s object lives.
    pub(crate) fn address(&self, index: usize) -> usize {
        self.slot_ptr(index) as usize
    }

    /// Address of the start of slot 0, guards included.
    pub(crate) fn block_start(&self) -> usize {
        match &self.backing {
            Backing::Region(lease) => lease.block_address(),
            _ => self.address(0),
        }
    }

    /// Offset of the object from the start of its slot.
    pub(crate) fn payload_offset(&self) -> usize {
        match &self.backing {
            Backing::Region(lease) => lease.slot_layout().payload_offset(),
            _ => 0,
        }
    }

    fn slot_ptr(&self, index: usize) -> *mut T {
        self.base
            .as_ptr()
            .wrapping_add(index * self.stride)
            .cast::<T>()
    }

    /// Move `value` into free slot `index`. Hands it back if the slot is
    /// taken or out of range.
    pub(crate) fn put(&mut self, index: usize, value: T) -> Result<(), T> {
        let slot = self.slot_ptr(index);
        match self.occupied.get_mut(index) {
            Some(flag) if !*flag => {
                // SAFETY: `index < capacity`, so the pointer is in bounds of
                // the backing memory, which the owned slice or the lease keeps
                // alive, and aligned for `T` (checked at construction). The
                // slot is unoccupied, so nothing is overwritten without drop.
                unsafe { ptr::write(slot, value) };
                *flag = true;
                Ok(())
            }
            _ => Err(value),
        }
    }

    /// Move the object out of slot `index`, leaving it free.
    pub(crate) fn take(&mut self, index: usize) -> Option<T> {
        let flag = self.occupied.get_mut(index).filter(|flag| **flag)?;
        *flag = false;
        // SAFETY: the slot was occupied, so it holds an initialized `T`
        // written by `put`. Clearing the flag first hands ownership to the
        // caller exactly once.
        Some(unsafe { ptr::read(self.slot_ptr(index)) })
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        if !self.is_occupied(index) {
            return None;
        }
        // SAFETY: occupied slots hold an initialized, aligned `T`. The
        // shared borrow of `self` keeps `put`, `take` and `get_mut` away
        // for the reference's lifetime. Guard bytes around the slot are
        // only ever copied, never borrowed, so no other reference overlaps.
        Some(unsafe { &*self.slot_ptr(index) })
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if !self.is_occupied(index) {
            return None;
        }
        // SAFETY: as in `get`; the exclusive borrow of `self` makes this the
        // only reference into the slot.
        Some(unsafe { &mut *self.slot_ptr(index) })
    }

    /// Drop every stored object, highest slot first.
    pub(crate) fn clear(&mut self) -> usize {
        let mut dropped = 0;
        for index in (0..self.capacity()).rev() {
            if self.take(index).is_some() {
                dropped += 1;
            }
        }
        dropped
    }

    /// Drop every stored object and give up the region lease, if any.
    ///
    /// Afterwards the storage has no slots.
    pub(crate) fn take_lease(&mut self) -> Option<RegionLease> {
        if !matches!(self.backing, Backing::Region(_)) {
            return None;
        }
        self.clear();
        self.occupied = Box::default();
        match mem::replace(&mut self.backing, Backing::Detached) {
            Backing::Region(lease) => Some(lease),
            _ => None,
        }
    }
}

impl<T> Drop for SlotStorage<T> {
    fn drop(&mut self) {
        self.clear();
        if let Backing::Owned(slots) = self.backing {
            // SAFETY: `slots` came from `Box::leak` in `owned` and is
            // reclaimed only here. Every `T` in it was dropped by `clear`,
            // and `MaybeUninit` runs no destructors of its own.
            drop(unsafe { Box::from_raw(slots.as_ptr()) });
        }
    }
}
