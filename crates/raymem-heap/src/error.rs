//! Heap-specific error types.

use std::error::Error;
use std::fmt;

use crate::guard::{GuardFault, HeapId, HeapTag};
use crate::handle::RegistryId;
use crate::report::HeapStats;

/// Errors returned by allocation, free and registry lifecycle calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeapError {
    /// The raw provider could not supply a block.
    ProviderExhausted {
        /// Raw bytes requested, guard overhead included.
        requested: usize,
    },
    /// The payload size overflows once guard overhead is added.
    TooLarge {
        /// Payload bytes requested.
        requested: usize,
    },
    /// The tag cannot be used for external allocations.
    ReservedTag {
        /// The rejected tag.
        tag: HeapTag,
    },
    /// The handle does not name a slot of this heap.
    InvalidHandle {
        /// Heap named by the handle.
        heap: HeapId,
        /// Slot index named by the handle.
        index: u32,
    },
    /// The handle's record was already freed.
    DoubleFree {
        /// Heap named by the handle.
        heap: HeapId,
        /// Slot index named by the handle.
        index: u32,
    },
    /// The handle was issued by a different registry.
    ForeignHandle {
        /// Registry that issued the handle.
        issued_by: RegistryId,
        /// Registry the handle was presented to.
        presented_to: RegistryId,
    },
    /// The record belongs to an arena region and is released with it.
    ArenaOwned {
        /// Heap the region is linked into.
        heap: HeapId,
        /// Slot index of the record.
        index: u32,
    },
    /// The ledger's own sentinel cannot be freed through the allocator.
    SentinelRecord {
        /// Heap whose sentinel was targeted.
        heap: HeapId,
    },
    /// On-free guard checking found damage; the record was left linked.
    GuardFault {
        /// Heap the record is linked into.
        heap: HeapId,
        /// What the inspection found.
        fault: GuardFault,
    },
    /// The registry has been cleaned up; no further requests are served.
    ShutDown,
    /// The registry was called from inside one of its own `with_*` closures.
    Reentrant,
    /// Invalid registry configuration.
    InvalidConfig {
        /// Description of the violated constraint.
        reason: String,
    },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderExhausted { requested } => {
                write!(f, "raw provider exhausted: requested {requested} bytes")
            }
            Self::TooLarge { requested } => {
                write!(f, "allocation of {requested} bytes overflows guard layout")
            }
            Self::ReservedTag { tag } => {
                write!(f, "tag '{tag}' is reserved for ledger bootstrap")
            }
            Self::InvalidHandle { heap, index } => {
                write!(f, "invalid handle: {heap} heap has no slot {index}")
            }
            Self::DoubleFree { heap, index } => {
                write!(f, "double free: {heap} heap slot {index} is not live")
            }
            Self::ForeignHandle {
                issued_by,
                presented_to,
            } => {
                write!(
                    f,
                    "handle issued by registry {issued_by} presented to registry {presented_to}"
                )
            }
            Self::ArenaOwned { heap, index } => {
                write!(
                    f,
                    "{heap} heap slot {index} belongs to an arena region and cannot be freed alone"
                )
            }
            Self::SentinelRecord { heap } => {
                write!(f, "the {heap} heap sentinel cannot be freed")
            }
            Self::GuardFault { heap, fault } => {
                write!(f, "guard fault in {heap} heap: {fault}")
            }
            Self::ShutDown => write!(f, "heap registry has been cleaned up"),
            Self::Reentrant => {
                write!(f, "heap registry called re-entrantly from a payload closure")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid heap config: {reason}")
            }
        }
    }
}

impl Error for HeapError {}

/// Errors reported by a heap walk.
///
/// Positions count records in list order: the ledger's sentinel is position
/// 0 and live allocations are numbered from 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalkError {
    /// A record's guards are damaged. The walk stops at the first one.
    Corrupted {
        /// Heap being walked.
        heap: HeapId,
        /// Position of the damaged record.
        position: usize,
        /// Payload address of the damaged record.
        address: usize,
        /// What the inspection found.
        fault: GuardFault,
    },
    /// The linkage does not form a single chain from the sentinel to the tail.
    ListBroken {
        /// Heap being walked.
        heap: HeapId,
        /// Position at which the chain went wrong.
        position: usize,
    },
    /// The chain is intact but disagrees with the ledger's counters.
    CounterDrift {
        /// Heap being walked.
        heap: HeapId,
        /// Counters held by the ledger.
        tracked: HeapStats,
        /// Totals observed along the chain.
        observed: HeapStats,
    },
    /// No heap exists yet; nothing has been allocated.
    NotInitialized,
    /// The registry has been cleaned up.
    ShutDown,
    /// The walk was requested from inside a `with_*` closure.
    Reentrant,
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted {
                heap,
                position,
                address,
                fault,
            } => {
                write!(
                    f,
                    "{heap} heap corrupted at position {position} (address {address:#x}): {fault}"
                )
            }
            Self::ListBroken { heap, position } => {
                write!(f, "{heap} heap list broken at position {position}")
            }
            Self::CounterDrift {
                heap,
                tracked,
                observed,
            } => {
                write!(
                    f,
                    "{heap} heap counters drifted: tracked {tracked}, observed {observed}"
                )
            }
            Self::NotInitialized => write!(f, "heap registry is not initialized"),
            Self::ShutDown => write!(f, "heap registry has been cleaned up"),
            Self::Reentrant => write!(f, "heap walk requested from a payload closure"),
        }
    }
}

impl Error for WalkError {}
