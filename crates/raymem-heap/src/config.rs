//! Heap registry configuration parameters.

use crate::error::HeapError;
use crate::guard::{HeapId, GUARD_OVERHEAD};
use crate::ledger::SENTINEL_PAYLOAD;

/// Configuration for a [`HeapRegistry`](crate::HeapRegistry).
///
/// Validated at construction; all values are immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// Upper bound on the raw bytes the default provider may hand out,
    /// guard overhead and ledger sentinels included.
    ///
    /// Default: `None` (only bounded by the system allocator). When set it
    /// must leave room for every ledger's sentinel block, see
    /// [`HeapConfig::min_budget`].
    pub byte_budget: Option<usize>,

    /// Verify a record's canaries before freeing it.
    ///
    /// Default: `false`. Validation normally belongs to the heap walk; with
    /// this enabled `free` refuses to release a record whose guards are
    /// damaged and reports [`HeapError::GuardFault`] instead.
    pub check_guards_on_free: bool,
}

impl HeapConfig {
    /// Default byte budget: unbounded.
    pub const DEFAULT_BYTE_BUDGET: Option<usize> = None;

    /// Default on-free guard checking: off.
    pub const DEFAULT_CHECK_GUARDS_ON_FREE: bool = false;

    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            byte_budget: Self::DEFAULT_BYTE_BUDGET,
            check_guards_on_free: Self::DEFAULT_CHECK_GUARDS_ON_FREE,
        }
    }

    /// Smallest byte budget that can still bootstrap every ledger.
    pub fn min_budget() -> usize {
        HeapId::ALL.len() * (SENTINEL_PAYLOAD + GUARD_OVERHEAD)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), HeapError> {
        if let Some(budget) = self.byte_budget {
            if budget < Self::min_budget() {
                return Err(HeapError::InvalidConfig {
                    reason: format!(
                        "byte_budget must be >= {} to hold the ledger sentinels (got {budget})",
                        Self::min_budget(),
                    ),
                });
            }
        }
        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}
