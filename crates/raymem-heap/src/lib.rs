//! Guarded heap tracking for the raymem memory subsystem.
//!
//! Every tracked allocation is wrapped in a header/footer pair carrying
//! canary values and linked into the list of the heap that owns it. The
//! lists can be walked at any time to prove that no guard has been
//! overwritten and that the byte counters agree with what is linked.
//!
//! # Architecture
//!
//! ```text
//! HeapRegistry (Rc handle, one per program)
//! ├── RawProvider (SystemProvider, optionally behind a BudgetProvider)
//! └── ledger × 2 (Default, Graphics)
//!     ├── slot 0: self-describing sentinel record
//!     ├── record slots (slab + free list, generation-checked)
//!     └── regions (contiguous slot blocks owned by tracked arenas)
//! ```
//!
//! Guards live in-band in each block ([`guard`]); list linkage lives
//! out-of-band in the ledger slab, so corrupted bytes can fail a walk but
//! never redirect it.
//!
//! # Safety
//!
//! The crate denies `unsafe` except in one private module that owns region
//! blocks. A region is shared with the arena that leased it, so its bytes
//! are reached through raw pointers and guard bytes are copied, never
//! borrowed.
//!
//! # Threading
//!
//! [`HeapRegistry`] is `!Send`. All allocation through one registry stays
//! on one thread; give each thread its own registry if several need one.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

mod alloc;
pub mod config;
pub mod error;
pub mod guard;
pub mod handle;
mod ledger;
pub mod provider;
mod raw;
pub mod registry;
pub mod report;

// Public re-exports for the primary API surface.
pub use config::HeapConfig;
pub use error::{HeapError, WalkError};
pub use guard::{GuardFault, GuardedRecord, HeapId, HeapTag, SlotLayout, GUARD_OVERHEAD};
pub use handle::{RegionLease, RegistryId, TrackedPtr};
pub use provider::{BudgetProvider, RawProvider, SystemProvider};
pub use registry::HeapRegistry;
pub use report::{ByteSize, CleanupReport, HeapStats, WalkReport};
