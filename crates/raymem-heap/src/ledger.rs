//! Per-heap allocation ledger.
//!
//! [`HeapLedger`] indexes every live allocation of one heap in a slab of
//! record slots. The doubly-linked allocation list is threaded through the
//! slab by index: appending links at `tail`, detaching splices the two
//! neighbours together, both in O(1). Freed slots go on a free list and are
//! reused with a bumped generation so stale handles are caught.
//!
//! Slot 0 always holds the ledger's own sentinel record. Its block is
//! obtained through the bootstrap path before the ledger exists, stamped
//! with [`HeapTag::Heap`], and then patched to name this ledger as owner.
//!
//! Besides individually allocated blocks, a ledger can hold *regions*:
//! single contiguous blocks carved into equally sized guarded slots, each
//! slot linked as its own record. Regions back tracked object arenas and
//! are only ever linked and unlinked as a whole.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::alloc::guarded_block;
use crate::error::{HeapError, WalkError};
use crate::guard::{
    self, GuardFault, GuardedRecord, HeapId, HeapTag, SlotLayout, FOOTER_BYTES, HEADER_BYTES,
};
use crate::handle::{RegionLease, RegistryId};
use crate::provider::RawProvider;
use crate::raw::RegionBlock;
use crate::report::{HeapStats, WalkReport};

/// Ledger slot index of the sentinel record.
pub(crate) const SENTINEL: u32 = 0;

/// Payload size of a ledger's sentinel block.
pub(crate) const SENTINEL_PAYLOAD: usize = std::mem::size_of::<HeapLedger>();

/// Where a record's guarded bytes live.
#[derive(Debug)]
enum Storage {
    /// A block of exactly `payload + GUARD_OVERHEAD` bytes.
    Block(Box<[u8]>),
    /// Slot `slot` of region `region`.
    Region { region: u32, slot: u32 },
}

#[derive(Debug)]
struct Entry {
    record: GuardedRecord,
    storage: Storage,
}

#[derive(Debug, Default)]
struct RecordSlot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug)]
struct Region {
    block: Rc<RegionBlock>,
    /// Offset of slot 0 in `block`.
    base: usize,
    layout: SlotLayout,
    /// Ledger index of each slot's record, in slot order.
    records: SmallVec<[u32; 8]>,
}

impl Region {
    fn header_at(&self, slot: usize) -> usize {
        self.base + slot * self.layout.stride() + self.layout.header_offset()
    }

    fn footer_at(&self, slot: usize) -> usize {
        self.base + slot * self.layout.stride() + self.layout.footer_offset()
    }

    fn read_guards(&self, slot: usize) -> ([u8; HEADER_BYTES], [u8; FOOTER_BYTES]) {
        let mut header = [0u8; HEADER_BYTES];
        let mut footer = [0u8; FOOTER_BYTES];
        self.block.read(self.header_at(slot), &mut header);
        self.block.read(self.footer_at(slot), &mut footer);
        (header, footer)
    }

    fn payload_address(&self, slot: usize) -> usize {
        self.block.addr() + self.header_at(slot) + HEADER_BYTES
    }
}

#[derive(Debug, Default)]
struct RegionSlot {
    generation: u32,
    region: Option<Region>,
}

/// Where the walk finds one record's guards.
enum GuardSite<'a> {
    Block(&'a [u8]),
    Region { region: &'a Region, slot: usize },
}

impl GuardSite<'_> {
    fn inspect(&self, record: &GuardedRecord, index: u32) -> Result<(), GuardFault> {
        match self {
            GuardSite::Block(block) => {
                guard::inspect(block, 0, record.payload_size, record.tag, index)
            }
            GuardSite::Region { region, slot } => {
                let (header, footer) = region.read_guards(*slot);
                guard::inspect_parts(&header, &footer, record.payload_size, record.tag, index)
            }
        }
    }

    fn payload_address(&self) -> usize {
        match self {
            GuardSite::Block(block) => block.as_ptr() as usize + HEADER_BYTES,
            GuardSite::Region { region, slot } => region.payload_address(*slot),
        }
    }
}

/// Allocation list and byte accounting for one heap.
#[derive(Debug)]
pub(crate) struct HeapLedger {
    id: HeapId,
    slots: Vec<RecordSlot>,
    free_list: Vec<u32>,
    regions: Vec<RegionSlot>,
    free_regions: Vec<u32>,
    tail: u32,
    stats: HeapStats,
}

impl HeapLedger {
    /// Create a ledger whose sentinel block comes from `provider`.
    ///
    /// The sentinel is stamped before the ledger exists, so its record
    /// starts without an owner and is patched to this ledger afterwards.
    pub(crate) fn bootstrap(
        id: HeapId,
        provider: &mut dyn RawProvider,
    ) -> Result<Self, HeapError> {
        let block = guarded_block(provider, SENTINEL_PAYLOAD, HeapTag::Heap, SENTINEL)?;
        let record = GuardedRecord::new(SENTINEL_PAYLOAD, block.len(), HeapTag::Heap, None);

        let mut ledger = Self {
            id,
            slots: vec![RecordSlot {
                generation: 0,
                entry: Some(Entry {
                    record,
                    storage: Storage::Block(block),
                }),
            }],
            free_list: Vec::new(),
            regions: Vec::new(),
            free_regions: Vec::new(),
            tail: SENTINEL,
            stats: HeapStats::default(),
        };
        if let Some(sentinel) = ledger.slots[SENTINEL as usize].entry.as_mut() {
            sentinel.record.owner = Some(id);
        }
        Ok(ledger)
    }

    /// The heap this ledger accounts for.
    pub(crate) fn id(&self) -> HeapId {
        self.id
    }

    /// Running counters, sentinel excluded.
    pub(crate) fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Number of regions currently linked.
    pub(crate) fn region_count(&self) -> usize {
        self.regions.iter().filter(|r| r.region.is_some()).count()
    }

    /// The slot index the next append will use.
    ///
    /// Guards carry the index of their record, so it must be known before
    /// the block is stamped.
    pub(crate) fn next_index(&self) -> u32 {
        match self.free_list.last() {
            Some(&index) => index,
            None => self.slots.len() as u32,
        }
    }

    /// Link an individually allocated block at the tail of the list.
    ///
    /// Returns the record's slot index and generation.
    pub(crate) fn append_block(&mut self, record: GuardedRecord, block: Box<[u8]>) -> (u32, u32) {
        self.append(record, Storage::Block(block))
    }

    fn append(&mut self, mut record: GuardedRecord, storage: Storage) -> (u32, u32) {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                self.slots.push(RecordSlot::default());
                (self.slots.len() - 1) as u32
            }
        };

        record.owner = Some(self.id);
        record.previous = Some(self.tail);
        record.next = None;
        if let Some(prev) = self.slots[self.tail as usize].entry.as_mut() {
            prev.record.next = Some(index);
        }
        self.tail = index;

        self.stats.live_objects += 1;
        self.stats.live_bytes += record.payload_size;
        self.stats.live_bytes_with_metadata += record.total_size;

        let slot = &mut self.slots[index as usize];
        slot.entry = Some(Entry { record, storage });
        (index, slot.generation)
    }

    /// Splice a live record out of the list and retire its slot.
    fn detach(&mut self, index: u32) -> Option<Entry> {
        let slot = &mut self.slots[index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);

        let GuardedRecord { previous, next, .. } = entry.record;
        if let Some(next) = next {
            if let Some(succ) = self.slots[next as usize].entry.as_mut() {
                succ.record.previous = previous;
            }
        }
        if let Some(previous) = previous {
            if let Some(pred) = self.slots[previous as usize].entry.as_mut() {
                pred.record.next = next;
            }
        }
        if next.is_none() {
            self.tail = previous.unwrap_or(SENTINEL);
        }

        self.stats.live_objects -= 1;
        self.stats.live_bytes -= entry.record.payload_size;
        self.stats.live_bytes_with_metadata -= entry.record.total_size;

        self.free_list.push(index);
        Some(entry)
    }

    /// Resolve a handle to a live, individually allocated record.
    fn owned_entry(&self, index: u32, generation: u32) -> Result<&Entry, HeapError> {
        let heap = self.id;
        if index == SENTINEL {
            return Err(HeapError::SentinelRecord { heap });
        }
        let entry = self
            .slots
            .get(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(HeapError::InvalidHandle { heap, index })?;
        match entry.storage {
            Storage::Block(_) => Ok(entry),
            Storage::Region { .. } => Err(HeapError::ArenaOwned { heap, index }),
        }
    }

    fn owned_block_mut(&mut self, index: u32, generation: u32) -> Result<&mut [u8], HeapError> {
        self.owned_entry(index, generation)?;
        match self.slots[index as usize].entry.as_mut() {
            Some(Entry {
                storage: Storage::Block(block),
                ..
            }) => Ok(&mut block[..]),
            _ => Err(HeapError::InvalidHandle {
                heap: self.id,
                index,
            }),
        }
    }

    /// Payload bytes of a live block.
    pub(crate) fn payload(&self, index: u32, generation: u32) -> Result<&[u8], HeapError> {
        let entry = self.owned_entry(index, generation)?;
        let size = entry.record.payload_size;
        match &entry.storage {
            Storage::Block(block) => Ok(&block[HEADER_BYTES..HEADER_BYTES + size]),
            Storage::Region { .. } => Err(HeapError::ArenaOwned {
                heap: self.id,
                index,
            }),
        }
    }

    /// Mutable payload bytes of a live block.
    pub(crate) fn payload_mut(
        &mut self,
        index: u32,
        generation: u32,
    ) -> Result<&mut [u8], HeapError> {
        let size = self.owned_entry(index, generation)?.record.payload_size;
        let block = self.owned_block_mut(index, generation)?;
        Ok(&mut block[HEADER_BYTES..HEADER_BYTES + size])
    }

    /// The whole guarded block of a live allocation, header and footer included.
    pub(crate) fn raw_block_mut(
        &mut self,
        index: u32,
        generation: u32,
    ) -> Result<&mut [u8], HeapError> {
        self.owned_block_mut(index, generation)
    }

    /// Detach a live block and hand it back for release.
    ///
    /// With `check_guards` set, a block whose guards are damaged is left
    /// linked and reported instead.
    pub(crate) fn free_block(
        &mut self,
        index: u32,
        generation: u32,
        check_guards: bool,
    ) -> Result<Box<[u8]>, HeapError> {
        let heap = self.id;
        match self.owned_entry(index, generation) {
            Ok(entry) => {
                if check_guards {
                    if let Storage::Block(block) = &entry.storage {
                        guard::inspect(block, 0, entry.record.payload_size, entry.record.tag, index)
                            .map_err(|fault| HeapError::GuardFault { heap, fault })?;
                    }
                }
            }
            // A handle to an in-range slot that no longer matches was freed
            // already, whether or not the slot has been reused since.
            Err(HeapError::InvalidHandle { .. }) if (index as usize) < self.slots.len() => {
                return Err(HeapError::DoubleFree { heap, index });
            }
            Err(e) => return Err(e),
        }

        match self.detach(index) {
            Some(Entry {
                storage: Storage::Block(block),
                ..
            }) => Ok(block),
            _ => Err(HeapError::InvalidHandle { heap, index }),
        }
    }

    /// Detach every individually allocated block, newest first.
    ///
    /// Region records are skipped; they stay linked until their region is
    /// unlinked. The sentinel is never drained.
    pub(crate) fn drain_owned(&mut self) -> Vec<Box<[u8]>> {
        let mut drained = Vec::new();
        let mut cursor = self.tail;
        while cursor != SENTINEL {
            let Some(entry) = self.slots[cursor as usize].entry.as_ref() else {
                break;
            };
            let previous = entry.record.previous.unwrap_or(SENTINEL);
            if matches!(entry.storage, Storage::Block(_)) {
                if let Some(Entry {
                    storage: Storage::Block(block),
                    ..
                }) = self.detach(cursor)
                {
                    drained.push(block);
                }
            }
            cursor = previous;
        }
        drained
    }

    /// Carve `block` into `capacity` guarded slots and link each one.
    ///
    /// Slot 0 starts `base` bytes into `block`. Every slot is stamped and
    /// accounted up front, before any object is placed in it.
    pub(crate) fn link_region(
        &mut self,
        registry: RegistryId,
        mut block: Box<[u8]>,
        base: usize,
        layout: SlotLayout,
        capacity: usize,
    ) -> RegionLease {
        let region = match self.free_regions.pop() {
            Some(region) => region,
            None => {
                self.regions.push(RegionSlot::default());
                (self.regions.len() - 1) as u32
            }
        };

        let tag = self.id.tag();
        let payload = layout.payload_size();
        let mut records = SmallVec::with_capacity(capacity);
        for slot in 0..capacity {
            let record = GuardedRecord::new(payload, layout.stride(), tag, Some(self.id));
            let (index, _) = self.append(
                record,
                Storage::Region {
                    region,
                    slot: slot as u32,
                },
            );
            let header_at = base + slot * layout.stride() + layout.header_offset();
            guard::stamp(&mut block, header_at, payload, tag, index);
            records.push(index);
        }

        let block = Rc::new(RegionBlock::new(block));
        let entry = &mut self.regions[region as usize];
        entry.region = Some(Region {
            block: Rc::clone(&block),
            base,
            layout,
            records,
        });
        RegionLease {
            registry,
            heap: self.id,
            region,
            generation: entry.generation,
            layout,
            capacity,
            block,
            base,
        }
    }

    fn region(&self, lease: &RegionLease) -> Result<&Region, HeapError> {
        self.regions
            .get(lease.region as usize)
            .filter(|slot| slot.generation == lease.generation)
            .and_then(|slot| slot.region.as_ref())
            .ok_or(HeapError::InvalidHandle {
                heap: self.id,
                index: lease.region,
            })
    }

    fn region_slot(&self, lease: &RegionLease, slot: usize) -> Result<&Region, HeapError> {
        let region = self.region(lease)?;
        if slot >= region.records.len() {
            return Err(HeapError::InvalidHandle {
                heap: self.id,
                index: slot as u32,
            });
        }
        Ok(region)
    }

    /// Detach every slot record of a region and return the ledger's share
    /// of its block. The lease's share is dropped here.
    pub(crate) fn unlink_region(
        &mut self,
        lease: RegionLease,
    ) -> Result<Rc<RegionBlock>, HeapError> {
        self.region(&lease)?;
        let entry = &mut self.regions[lease.region as usize];
        let region = entry.region.take().ok_or(HeapError::InvalidHandle {
            heap: self.id,
            index: lease.region,
        })?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_regions.push(lease.region);

        for &index in &region.records {
            self.detach(index);
        }
        drop(lease);
        Ok(region.block)
    }

    /// Run `f` over copies of one region slot's header and footer, then
    /// write them back.
    pub(crate) fn with_region_guards_mut<R>(
        &mut self,
        lease: &RegionLease,
        slot: usize,
        f: impl FnOnce(&mut [u8], &mut [u8]) -> R,
    ) -> Result<R, HeapError> {
        let region = self.region_slot(lease, slot)?;
        let (mut header, mut footer) = region.read_guards(slot);
        let out = f(&mut header, &mut footer);
        region.block.write(region.header_at(slot), &header);
        region.block.write(region.footer_at(slot), &footer);
        Ok(out)
    }

    /// Payload address of one region slot.
    pub(crate) fn region_payload_address(
        &self,
        lease: &RegionLease,
        slot: usize,
    ) -> Result<usize, HeapError> {
        Ok(self.region_slot(lease, slot)?.payload_address(slot))
    }

    /// Records in list order, sentinel first.
    pub(crate) fn records(&self) -> Vec<GuardedRecord> {
        let mut out = Vec::new();
        let mut cursor = Some(SENTINEL);
        while let Some(index) = cursor {
            let Some(entry) = self.slots.get(index as usize).and_then(|s| s.entry.as_ref()) else {
                break;
            };
            out.push(entry.record);
            cursor = entry.record.next;
            if out.len() > self.slots.len() {
                break;
            }
        }
        out
    }

    fn guard_site<'a>(&'a self, entry: &'a Entry) -> Option<GuardSite<'a>> {
        match entry.storage {
            Storage::Block(ref block) => Some(GuardSite::Block(block)),
            Storage::Region { region, slot } => {
                let region = self.regions.get(region as usize)?.region.as_ref()?;
                Some(GuardSite::Region {
                    region,
                    slot: slot as usize,
                })
            }
        }
    }

    /// Walk the list from the sentinel, validating every record.
    ///
    /// Stops at the first damaged record. On success the observed totals
    /// have been checked against the running counters.
    pub(crate) fn walk(&self) -> Result<WalkReport, WalkError> {
        let heap = self.id;
        let mut observed = HeapStats::default();
        let mut sentinel_bytes = 0;
        let mut expected_previous = None;
        let mut last = SENTINEL;
        let mut cursor = Some(SENTINEL);
        let mut position = 0usize;

        while let Some(index) = cursor {
            if position >= self.slots.len() {
                return Err(WalkError::ListBroken { heap, position });
            }
            let entry = self
                .slots
                .get(index as usize)
                .and_then(|slot| slot.entry.as_ref())
                .ok_or(WalkError::ListBroken { heap, position })?;
            if entry.record.previous != expected_previous || entry.record.owner != Some(heap) {
                return Err(WalkError::ListBroken { heap, position });
            }
            let site = self
                .guard_site(entry)
                .ok_or(WalkError::ListBroken { heap, position })?;

            let record = &entry.record;
            site
                .inspect(record, index)
                .map_err(|fault| WalkError::Corrupted {
                    heap,
                    position,
                    address: site.payload_address(),
                    fault,
                })?;

            if position == 0 {
                sentinel_bytes = record.total_size;
            } else {
                observed.live_objects += 1;
                observed.live_bytes += record.payload_size;
                observed.live_bytes_with_metadata += record.total_size;
            }

            last = index;
            expected_previous = Some(index);
            cursor = record.next;
            position += 1;
        }

        if last != self.tail {
            return Err(WalkError::ListBroken { heap, position });
        }
        if observed != self.stats {
            return Err(WalkError::CounterDrift {
                heap,
                tracked: self.stats,
                observed,
            });
        }

        Ok(WalkReport {
            heap,
            live_objects: observed.live_objects,
            payload_bytes: observed.live_bytes,
            total_bytes: observed.live_bytes_with_metadata,
            sentinel_bytes,
        })
    }

    /// Consume the ledger, returning every block it still holds alone.
    ///
    /// Call after [`drain_owned`](Self::drain_owned); what remains is the
    /// sentinel block and the blocks of regions nobody unlinked. A region
    /// whose lease is still alive stays with the lease and is not returned.
    pub(crate) fn into_blocks(self) -> Vec<Box<[u8]>> {
        let mut blocks = Vec::new();
        for slot in self.slots {
            if let Some(Entry {
                storage: Storage::Block(block),
                ..
            }) = slot.entry
            {
                blocks.push(block);
            }
        }
        for slot in self.regions {
            if let Some(region) = slot.region {
                if let Ok(block) = Rc::try_unwrap(region.block) {
                    blocks.push(block.into_box());
                }
            }
        }
        blocks
    }

    #[cfg(test)]
    fn raw_block_at(&mut self, index: u32) -> &mut [u8] {
        match self.slots[index as usize].entry.as_mut() {
            Some(Entry {
                storage: Storage::Block(block),
                ..
            }) => &mut block[..],
            _ => panic!("slot {index} holds no block"),
        }
    }
}
