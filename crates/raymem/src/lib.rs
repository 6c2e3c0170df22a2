//! raymem: instrumented memory for a ray tracer.
//!
//! This is the top-level facade crate that re-exports the public API of the
//! raymem sub-crates. Adding `raymem` as a single dependency is usually
//! enough.
//!
//! # Quick start
//!
//! ```rust
//! use raymem::prelude::*;
//!
//! let registry = HeapRegistry::new();
//!
//! // Tracked allocations in two heaps.
//! let scene = registry.allocate(100, HeapTag::Default).unwrap();
//! let texture = registry.allocate(50, HeapTag::Graphics).unwrap();
//!
//! // An arena of four slots, linked into the graphics heap.
//! let mut spheres: ObjectArena<[f32; 4]> =
//!     ObjectArena::tracked(ArenaConfig::new(4), &registry).unwrap();
//! spheres.try_construct([0.0, -10004.0, -20.0, 10000.0]).unwrap();
//!
//! let report = registry.walk(HeapId::Graphics).unwrap();
//! assert_eq!(report.live_objects, 1 + 4);
//!
//! registry.free(scene).unwrap();
//! registry.free(texture).unwrap();
//! drop(spheres);
//! registry.clean_up().unwrap();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`heap`] | `raymem-heap` | Guards, providers, heap registry, allocate/free, heap walk |
//! | [`pool`] | `raymem-pool` | `ObjectArena<T>`, slot handles, arena config |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Guarded heap tracking (`raymem-heap`).
///
/// [`heap::HeapRegistry`] owns the heaps; [`heap::HeapRegistry::walk`]
/// validates every guard in one of them.
pub use raymem_heap as heap;

/// Fixed-capacity object arenas (`raymem-pool`).
///
/// [`pool::ObjectArena`] hands out slots from one pre-allocated block and
/// can link them into a heap for the walk.
pub use raymem_pool as pool;

/// Common imports for typical raymem usage.
///
/// ```rust
/// use raymem::prelude::*;
/// ```
pub mod prelude {
    // Heaps
    pub use raymem_heap::{
        HeapConfig, HeapId, HeapRegistry, HeapStats, HeapTag, TrackedPtr, WalkReport,
    };

    // Arenas
    pub use raymem_pool::{ArenaConfig, ObjectArena, Slot};

    // Errors
    pub use raymem_heap::{HeapError, WalkError};
    pub use raymem_pool::ArenaError;
}
