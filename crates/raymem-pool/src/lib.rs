//! Fixed-capacity object arenas for raymem.
//!
//! An [`ObjectArena<T>`] pre-allocates `capacity` slots for one element
//! type and hands them out on construction without touching the general
//! allocator again. Arenas can optionally be tracked: their slots are then
//! stamped with guards and linked into a heap of a
//! [`HeapRegistry`](raymem_heap::HeapRegistry) for the lifetime of the arena.
//!
//! Misuse is reported, not undefined: releasing an empty slot, a stale
//! handle or another arena's handle returns an [`ArenaError`].
//!
//! # Safety
//!
//! Objects are placed directly in the arena's block, between the guards
//! of a tracked slot. The bounded `unsafe` this takes lives in the private
//! `raw` module; the rest of the crate is safe code.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod arena;
pub mod config;
pub mod error;
pub mod handle;
mod raw;

// Public re-exports for the primary API surface.
pub use arena::ObjectArena;
pub use config::ArenaConfig;
pub use error::ArenaError;
pub use handle::{ArenaId, Slot};
