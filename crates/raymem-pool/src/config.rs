//! Arena configuration parameters.

use raymem_heap::HeapId;

use crate::error::ArenaError;

/// Configuration for an [`ObjectArena`](crate::ObjectArena).
///
/// Validated at construction; all values are immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Maximum number of live elements.
    ///
    /// Default: 4. Must be at least 1 and fit in a `u32`.
    pub capacity: usize,

    /// Heap a tracked arena links its slots into.
    ///
    /// Default: [`HeapId::Graphics`]. Ignored by untracked arenas.
    pub heap: HeapId,
}

impl ArenaConfig {
    /// Default capacity: one frame's worth of scene spheres.
    pub const DEFAULT_CAPACITY: usize = 4;

    /// Default heap for tracked arenas.
    pub const DEFAULT_HEAP: HeapId = HeapId::Graphics;

    /// Create a config for `capacity` elements in the default heap.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: Self::DEFAULT_HEAP,
        }
    }

    /// Same config, tracked in `heap` instead.
    pub fn in_heap(mut self, heap: HeapId) -> Self {
        self.heap = heap;
        self
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.capacity == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "capacity must be at least 1".into(),
            });
        }
        if u32::try_from(self.capacity).is_err() {
            return Err(ArenaError::InvalidConfig {
                reason: format!("capacity must fit in u32 (got {})", self.capacity),
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
