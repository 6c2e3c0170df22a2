//! Shared ownership of region blocks.
//!
//! A region block is used from two sides at once. The ledger stamps and
//! reads the guard bytes of every slot; the arena holding the lease places
//! objects in the payloads between them. Both sides work through raw
//! pointers derived from the one allocation, and guard bytes are only ever
//! copied in or out, so no reference spans bytes the other side owns.
//!
//! Every `unsafe` block here carries a `// SAFETY:` comment.

#![allow(unsafe_code)]

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

/// A raw-provider block shared between a ledger and a region lease.
pub(crate) struct RegionBlock {
    ptr: NonNull<[u8]>,
}

impl RegionBlock {
    /// Take ownership of `block`.
    pub(crate) fn new(block: Box<[u8]>) -> Self {
        Self {
            ptr: NonNull::from(Box::leak(block)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.ptr.len()
    }

    /// Address of the first byte.
    pub(crate) fn addr(&self) -> usize {
        self.ptr.cast::<u8>().as_ptr() as usize
    }

    /// Pointer to byte `offset`. Not dereferenced here.
    pub(crate) fn ptr_at(&self, offset: usize) -> *mut u8 {
        self.ptr.cast::<u8>().as_ptr().wrapping_add(offset)
    }

    fn check_range(&self, offset: usize, len: usize) {
        let in_bounds = offset
            .checked_add(len)
            .is_some_and(|end| end <= self.len());
        assert!(
            in_bounds,
            "range {offset}+{len} outside region block of {} bytes",
            self.len()
        );
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub(crate) fn read(&self, offset: usize, dst: &mut [u8]) {
        self.check_range(offset, dst.len());
        // SAFETY: the range is in bounds of the live allocation (checked
        // above) and holds initialized guard bytes that no object overlaps.
        // `dst` is caller memory and cannot alias the block.
        unsafe { ptr::copy_nonoverlapping(self.ptr_at(offset), dst.as_mut_ptr(), dst.len()) }
    }

    /// Copy `src` into the block starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub(crate) fn write(&self, offset: usize, src: &[u8]) {
        self.check_range(offset, src.len());
        // SAFETY: as in `read`; the target range holds guard bytes only and
        // the block's provenance permits writes (it came from `Box::leak`).
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.ptr_at(offset), src.len()) }
    }

    /// Give the block back as the box the provider handed out.
    pub(crate) fn into_box(self) -> Box<[u8]> {
        let this = ManuallyDrop::new(self);
        // SAFETY: `ptr` came from `Box::leak` in `new`. `ManuallyDrop`
        // keeps `Drop` from reclaiming it a second time.
        unsafe { Box::from_raw(this.ptr.as_ptr()) }
    }
}

impl Drop for RegionBlock {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `Box::leak` in `new` and is reclaimed
        // only here or in `into_box`, which skips this destructor.
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
}

impl fmt::Debug for RegionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionBlock")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len())
            .finish()
    }
}
