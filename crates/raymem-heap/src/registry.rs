//! The heap registry: lifecycle owner of every ledger.
//!
//! A [`HeapRegistry`] holds one ledger per [`HeapId`] and the raw
//! provider all tracked blocks come from. It moves through three phases:
//!
//! | Phase | Entered by | Serves requests |
//! |-------|-----------|-----------------|
//! | uninitialized | construction | yes, initializes on first allocation |
//! | live | [`initialize`](HeapRegistry::initialize) or first allocation | yes |
//! | shut down | [`clean_up`](HeapRegistry::clean_up) | no, every request fails |
//!
//! The registry is a cheap, cloneable handle to shared single-threaded
//! state. It is `!Send` and `!Sync`: all allocation through one registry
//! happens on the thread that created it.

use std::alloc::Layout;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, error, info, trace, warn};

use crate::config::HeapConfig;
use crate::error::{HeapError, WalkError};
use crate::guard::{GuardedRecord, HeapId, SlotLayout};
use crate::handle::{RegionLease, RegistryId, TrackedPtr};
use crate::ledger::HeapLedger;
use crate::provider::{BudgetProvider, RawProvider, SystemProvider};
use crate::report::{CleanupReport, HeapStats, WalkReport};

pub(crate) enum Phase {
    Uninitialized,
    Live([HeapLedger; 2]),
    ShutDown,
}

pub(crate) struct RegistryState {
    pub(crate) config: HeapConfig,
    pub(crate) provider: Box<dyn RawProvider>,
    pub(crate) phase: Phase,
}

impl RegistryState {
    /// The ledger for `heap`, or why there is none.
    pub(crate) fn ledger(&self, heap: HeapId) -> Result<&HeapLedger, HeapError> {
        match &self.phase {
            Phase::Live(ledgers) => Ok(&ledgers[heap.index()]),
            Phase::Uninitialized => Err(HeapError::InvalidHandle { heap, index: 0 }),
            Phase::ShutDown => Err(HeapError::ShutDown),
        }
    }

    pub(crate) fn ledger_mut(&mut self, heap: HeapId) -> Result<&mut HeapLedger, HeapError> {
        match &mut self.phase {
            Phase::Live(ledgers) => Ok(&mut ledgers[heap.index()]),
            Phase::Uninitialized => Err(HeapError::InvalidHandle { heap, index: 0 }),
            Phase::ShutDown => Err(HeapError::ShutDown),
        }
    }
}

/// Table of named heaps sharing one raw provider.
///
/// Constructed explicitly and passed to every call site that allocates;
/// there is no process-wide instance. Clones share the same heaps.
///
/// Closures passed to the `with_*` accessors run while the registry is
/// borrowed. Calls made back into the registry from inside one fail with
/// [`HeapError::Reentrant`] instead of touching the borrowed state.
#[derive(Clone)]
pub struct HeapRegistry {
    pub(crate) id: RegistryId,
    pub(crate) inner: Rc<RefCell<RegistryState>>,
}

impl HeapRegistry {
    /// Create an uninitialized registry with the default config.
    pub fn new() -> Self {
        Self::from_parts(HeapConfig::default(), Box::new(SystemProvider::new()))
    }

    /// Create an uninitialized registry from a validated config.
    ///
    /// A `byte_budget` wraps the system provider in a [`BudgetProvider`].
    pub fn with_config(config: HeapConfig) -> Result<Self, HeapError> {
        config.validate()?;
        let provider: Box<dyn RawProvider> = match config.byte_budget {
            Some(budget) => Box::new(BudgetProvider::new(SystemProvider::new(), budget)),
            None => Box::new(SystemProvider::new()),
        };
        Ok(Self::from_parts(config, provider))
    }

    /// Create an uninitialized registry drawing raw blocks from `provider`.
    ///
    /// `config.byte_budget` is ignored; budget the provider itself instead.
    pub fn with_provider<P: RawProvider + 'static>(
        config: HeapConfig,
        provider: P,
    ) -> Result<Self, HeapError> {
        config.validate()?;
        Ok(Self::from_parts(config, Box::new(provider)))
    }

    fn from_parts(config: HeapConfig, provider: Box<dyn RawProvider>) -> Self {
        Self {
            id: RegistryId::next(),
            inner: Rc::new(RefCell::new(RegistryState {
                config,
                provider,
                phase: Phase::Uninitialized,
            })),
        }
    }

    /// This registry's unique id.
    pub fn id(&self) -> RegistryId {
        self.id
    }

    pub(crate) fn state(&self) -> Result<Ref<'_, RegistryState>, HeapError> {
        self.inner.try_borrow().map_err(|_| HeapError::Reentrant)
    }

    pub(crate) fn state_mut(&self) -> Result<RefMut<'_, RegistryState>, HeapError> {
        self.inner.try_borrow_mut().map_err(|_| HeapError::Reentrant)
    }

    /// Bootstrap every ledger. Does nothing if already initialized.
    ///
    /// Each ledger's sentinel block is drawn from the provider before the
    /// ledger exists. If any bootstrap fails the sentinels obtained so far
    /// are returned and the registry stays uninitialized.
    pub fn initialize(&self) -> Result<(), HeapError> {
        let mut guard = self.state_mut()?;
        let state = &mut *guard;
        match state.phase {
            Phase::Live(_) => return Ok(()),
            Phase::ShutDown => return Err(HeapError::ShutDown),
            Phase::Uninitialized => {}
        }

        let default = HeapLedger::bootstrap(HeapId::Default, state.provider.as_mut())?;
        let graphics = match HeapLedger::bootstrap(HeapId::Graphics, state.provider.as_mut()) {
            Ok(ledger) => ledger,
            Err(e) => {
                for block in default.into_blocks() {
                    state.provider.release(block);
                }
                return Err(e);
            }
        };
        state.phase = Phase::Live([default, graphics]);
        debug!(registry = %self.id, "heap registry initialized");
        Ok(())
    }

    /// Whether the ledgers have been bootstrapped and not yet torn down.
    pub fn is_initialized(&self) -> bool {
        // Only payload closures hold the state mutably, and only while live.
        self.inner
            .try_borrow()
            .map_or(true, |state| matches!(state.phase, Phase::Live(_)))
    }

    /// Whether [`clean_up`](Self::clean_up) has run.
    pub fn is_shut_down(&self) -> bool {
        self.inner
            .try_borrow()
            .map_or(false, |state| matches!(state.phase, Phase::ShutDown))
    }

    /// Free every allocation owned by `heap`, newest first.
    ///
    /// The ledger's sentinel stays, as do arena regions; an arena unlinks
    /// its own region. Returns the number of allocations freed.
    pub fn clear(&self, heap: HeapId) -> Result<usize, HeapError> {
        let mut guard = self.state_mut()?;
        let state = &mut *guard;
        let ledger = match &mut state.phase {
            Phase::Live(ledgers) => &mut ledgers[heap.index()],
            Phase::Uninitialized => return Ok(0),
            Phase::ShutDown => return Err(HeapError::ShutDown),
        };
        let drained = ledger.drain_owned();
        let count = drained.len();
        for block in drained {
            state.provider.release(block);
        }
        debug!(registry = %self.id, %heap, freed = count, "heap cleared");
        Ok(count)
    }

    /// Tear down every heap. Succeeds exactly once.
    ///
    /// Each heap is cleared, then its sentinel is returned to the provider.
    /// Regions still linked are counted as orphans; a region's block goes
    /// back once its lease is gone too, here or in
    /// [`unlink_region`](Self::unlink_region). Every later request fails
    /// with [`HeapError::ShutDown`].
    pub fn clean_up(&self) -> Result<CleanupReport, HeapError> {
        let mut guard = self.state_mut()?;
        let state = &mut *guard;
        let ledgers = match std::mem::replace(&mut state.phase, Phase::ShutDown) {
            Phase::Live(ledgers) => Some(ledgers),
            Phase::Uninitialized => None,
            Phase::ShutDown => return Err(HeapError::ShutDown),
        };

        let mut report = CleanupReport::default();
        for heap in HeapId::ALL {
            report.drained.insert(heap, 0);
            report.orphaned_regions.insert(heap, 0);
        }

        for mut ledger in ledgers.into_iter().flatten() {
            let heap = ledger.id();
            let drained = ledger.drain_owned();
            report.drained.insert(heap, drained.len());
            for block in drained {
                state.provider.release(block);
            }

            let orphans = ledger.region_count();
            if orphans > 0 {
                warn!(
                    registry = %self.id,
                    %heap,
                    regions = orphans,
                    "arena regions still linked at clean-up"
                );
            }
            report.orphaned_regions.insert(heap, orphans);
            for block in ledger.into_blocks() {
                state.provider.release(block);
            }
        }

        debug!(
            registry = %self.id,
            drained = report.total_drained(),
            "heap registry cleaned up"
        );
        Ok(report)
    }

    /// Validate every record of `heap` and total up its contents.
    ///
    /// A damaged record is logged at error level and aborts the walk.
    pub fn walk(&self, heap: HeapId) -> Result<WalkReport, WalkError> {
        let state = self.inner.try_borrow().map_err(|_| WalkError::Reentrant)?;
        let ledger = match &state.phase {
            Phase::Live(ledgers) => &ledgers[heap.index()],
            Phase::Uninitialized => return Err(WalkError::NotInitialized),
            Phase::ShutDown => return Err(WalkError::ShutDown),
        };

        match ledger.walk() {
            Ok(report) => {
                info!(
                    %heap,
                    objects = report.live_objects,
                    payload_bytes = report.payload_bytes,
                    total_bytes = report.total_bytes,
                    metadata_bytes = report.metadata_bytes(),
                    "{report}"
                );
                Ok(report)
            }
            Err(e) => {
                if let WalkError::Corrupted {
                    position, address, ..
                } = e
                {
                    error!(%heap, position, address, "{e}");
                } else {
                    error!(%heap, "{e}");
                }
                Err(e)
            }
        }
    }

    /// Walk every heap in registry order, stopping at the first failure.
    pub fn walk_all(&self) -> Result<IndexMap<HeapId, WalkReport>, WalkError> {
        let mut reports = IndexMap::with_capacity(HeapId::ALL.len());
        for heap in HeapId::ALL {
            reports.insert(heap, self.walk(heap)?);
        }
        Ok(reports)
    }

    /// Running counters of `heap`. All zero before initialization.
    pub fn stats(&self, heap: HeapId) -> Result<HeapStats, HeapError> {
        let state = self.state()?;
        match &state.phase {
            Phase::Live(ledgers) => Ok(ledgers[heap.index()].stats()),
            Phase::Uninitialized => Ok(HeapStats::default()),
            Phase::ShutDown => Err(HeapError::ShutDown),
        }
    }

    /// Snapshot of `heap`'s records in list order, sentinel first.
    pub fn records(&self, heap: HeapId) -> Result<Vec<GuardedRecord>, HeapError> {
        let state = self.state()?;
        match &state.phase {
            Phase::Live(ledgers) => Ok(ledgers[heap.index()].records()),
            Phase::Uninitialized => Ok(Vec::new()),
            Phase::ShutDown => Err(HeapError::ShutDown),
        }
    }

    /// Raw bytes the provider currently has handed out, sentinels included.
    pub fn provider_bytes(&self) -> Result<usize, HeapError> {
        Ok(self.state()?.provider.bytes_in_use())
    }

    pub(crate) fn check_issuer(&self, issued_by: RegistryId) -> Result<(), HeapError> {
        if issued_by != self.id {
            return Err(HeapError::ForeignHandle {
                issued_by,
                presented_to: self.id,
            });
        }
        Ok(())
    }

    /// Allocate one contiguous block of `capacity` guarded slots for
    /// elements of `layout` and link every slot into `heap` as its own
    /// record.
    ///
    /// Every payload is aligned to `layout.align()`. All
    /// `capacity * slot_size` bytes are accounted against the heap
    /// immediately. Initializes the registry if needed.
    pub fn link_region(
        &self,
        heap: HeapId,
        layout: Layout,
        capacity: usize,
    ) -> Result<RegionLease, HeapError> {
        self.initialize()?;
        let too_large = HeapError::TooLarge {
            requested: layout.size(),
        };
        let slot = SlotLayout::for_layout(layout).ok_or_else(|| too_large.clone())?;
        let requested = slot
            .stride()
            .checked_mul(capacity)
            .and_then(|bytes| bytes.checked_add(slot.align() - 1))
            .ok_or(too_large)?;

        let mut guard = self.state_mut()?;
        let state = &mut *guard;
        let block = state
            .provider
            .allocate(requested)
            .ok_or(HeapError::ProviderExhausted { requested })?;
        let base = block.as_ptr().align_offset(slot.align());
        if base >= slot.align() {
            state.provider.release(block);
            return Err(HeapError::ProviderExhausted { requested });
        }
        let ledger = match state.ledger_mut(heap) {
            Ok(ledger) => ledger,
            Err(e) => {
                state.provider.release(block);
                return Err(e);
            }
        };
        let lease = ledger.link_region(self.id, block, base, slot, capacity);
        debug!(
            registry = %self.id,
            %heap,
            capacity,
            slot_size = slot.stride(),
            align = slot.align(),
            bytes = requested,
            "region linked"
        );
        Ok(lease)
    }

    /// Detach every slot record of a region and release its block.
    ///
    /// After [`clean_up`](Self::clean_up) the records are already gone;
    /// the block is still released but the call reports
    /// [`HeapError::ShutDown`].
    pub fn unlink_region(&self, lease: RegionLease) -> Result<(), HeapError> {
        self.check_issuer(lease.registry)?;
        let mut guard = self.state_mut()?;
        let state = &mut *guard;
        let heap = lease.heap;
        let shared = match state.ledger_mut(heap) {
            Ok(ledger) => ledger.unlink_region(lease)?,
            Err(e) => {
                if let Ok(block) = Rc::try_unwrap(lease.block) {
                    state.provider.release(block.into_box());
                }
                return Err(e);
            }
        };
        let bytes = shared.len();
        if let Ok(block) = Rc::try_unwrap(shared) {
            state.provider.release(block.into_box());
        }
        debug!(registry = %self.id, %heap, bytes, "region unlinked");
        Ok(())
    }

    /// Run `f` over copies of one region slot's header and footer, then
    /// write them back.
    ///
    /// Diagnostic access: damaged guards are reported by the next walk.
    pub fn with_region_guards_mut<R>(
        &self,
        lease: &RegionLease,
        slot: usize,
        f: impl FnOnce(&mut [u8], &mut [u8]) -> R,
    ) -> Result<R, HeapError> {
        self.check_issuer(lease.registry)?;
        let mut state = self.state_mut()?;
        let out = state
            .ledger_mut(lease.heap)?
            .with_region_guards_mut(lease, slot, f)?;
        Ok(out)
    }

    /// Payload address of a region slot, as the ledger records it.
    pub fn region_slot_address(&self, lease: &RegionLease, slot: usize) -> Result<usize, HeapError> {
        self.check_issuer(lease.registry)?;
        let state = self.state()?;
        let address = state.ledger(lease.heap)?.region_payload_address(lease, slot)?;
        Ok(address)
    }

    pub(crate) fn trace_op(&self, op: &str, ptr: &TrackedPtr, size: usize) {
        trace!(registry = %self.id, heap = %ptr.heap, index = ptr.index, size, "{op}");
    }
}

impl Default for HeapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HeapRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.inner.try_borrow() {
            Ok(state) => match state.phase {
                Phase::Uninitialized => "uninitialized",
                Phase::Live(_) => "live",
                Phase::ShutDown => "shut down",
            },
            Err(_) => "borrowed",
        };
        f.debug_struct("HeapRegistry")
            .field("id", &self.id)
            .field("phase", &phase)
            .finish()
    }
}
