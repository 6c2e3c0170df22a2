//! Slot handles and arena identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter for [`ArenaId`] allocation.
static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of an arena instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaId(pub u64);

impl ArenaId {
    /// Allocate a fresh id from a process-wide atomic counter.
    pub fn next() -> Self {
        Self(NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one constructed object in an arena.
///
/// Carries the issuing arena and the slot generation, so releasing
/// through the wrong arena or after the slot was reused is an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    pub(crate) arena: ArenaId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Slot {
    /// Slot index within the arena's block.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Slot generation at construction time.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Arena that issued this handle.
    pub fn arena(&self) -> ArenaId {
        self.arena
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Slot(arena={}, idx={}, gen={})",
            self.arena, self.index, self.generation
        )
    }
}
