//! Arena-specific error types.

use std::error::Error;
use std::fmt;

use raymem_heap::HeapError;

use crate::handle::ArenaId;

/// Errors that can occur during arena operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// Every slot is occupied.
    Exhausted {
        /// The arena's fixed capacity.
        capacity: usize,
    },
    /// The requested payload size is not the arena's element size.
    SizeMismatch {
        /// Bytes requested by the caller.
        requested: usize,
        /// Payload bytes of one slot.
        slot_payload: usize,
    },
    /// The slot holds no live object, or a newer one than the handle names.
    NotLive {
        /// Slot index.
        index: usize,
    },
    /// The index is past the end of the arena.
    OutOfBounds {
        /// Slot index.
        index: usize,
        /// The arena's fixed capacity.
        capacity: usize,
    },
    /// The handle was issued by a different arena.
    WrongArena {
        /// This arena.
        expected: ArenaId,
        /// Arena that issued the handle.
        found: ArenaId,
    },
    /// There is no live object to release.
    Empty,
    /// The operation needs a tracked arena.
    Untracked,
    /// Invalid arena configuration.
    InvalidConfig {
        /// Description of the violated constraint.
        reason: String,
    },
    /// The heap registry refused a request.
    Heap(HeapError),
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { capacity } => {
                write!(f, "arena exhausted: all {capacity} slots are live")
            }
            Self::SizeMismatch {
                requested,
                slot_payload,
            } => {
                write!(
                    f,
                    "size mismatch: requested {requested} bytes, slots hold {slot_payload} bytes"
                )
            }
            Self::NotLive { index } => write!(f, "slot {index} is not live"),
            Self::OutOfBounds { index, capacity } => {
                write!(f, "slot {index} out of bounds (capacity {capacity})")
            }
            Self::WrongArena { expected, found } => {
                write!(f, "slot belongs to arena {found}, not arena {expected}")
            }
            Self::Empty => write!(f, "arena has no live objects"),
            Self::Untracked => write!(f, "arena is not tracked in a heap"),
            Self::InvalidConfig { reason } => write!(f, "invalid arena config: {reason}"),
            Self::Heap(e) => write!(f, "heap error: {e}"),
        }
    }
}

impl Error for ArenaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Heap(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HeapError> for ArenaError {
    fn from(e: HeapError) -> Self {
        Self::Heap(e)
    }
}
