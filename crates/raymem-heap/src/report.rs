//! Heap statistics and walk reports.

use std::fmt;

use indexmap::IndexMap;

use crate::guard::HeapId;

/// Running counters of one heap, sentinel excluded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of live records.
    pub live_objects: usize,
    /// Sum of payload sizes.
    pub live_bytes: usize,
    /// Sum of payload sizes plus guard overhead.
    pub live_bytes_with_metadata: usize,
}

impl HeapStats {
    /// Bytes spent on headers and footers.
    pub fn metadata_bytes(&self) -> usize {
        self.live_bytes_with_metadata - self.live_bytes
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} objects / {} payload bytes / {} bytes with metadata",
            self.live_objects, self.live_bytes, self.live_bytes_with_metadata
        )
    }
}

/// Result of a successful heap walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalkReport {
    /// Heap that was walked.
    pub heap: HeapId,
    /// Live records visited, sentinel excluded.
    pub live_objects: usize,
    /// Sum of payload sizes over the visited records.
    pub payload_bytes: usize,
    /// Sum of payload plus guard sizes over the visited records.
    pub total_bytes: usize,
    /// Total size of the ledger's own sentinel block.
    pub sentinel_bytes: usize,
}

impl WalkReport {
    /// Bytes occupied by headers and footers.
    pub fn metadata_bytes(&self) -> usize {
        self.total_bytes - self.payload_bytes
    }
}

impl fmt::Display for WalkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} heap is intact: {} allocated to {} objects, {} of which are header/footer data; \
             without guards {} would be allocated",
            self.heap,
            ByteSize(self.total_bytes),
            self.live_objects,
            ByteSize(self.metadata_bytes()),
            ByteSize(self.payload_bytes),
        )
    }
}

/// What [`HeapRegistry::clean_up`](crate::HeapRegistry::clean_up) released.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Owned allocations drained from each heap.
    pub drained: IndexMap<HeapId, usize>,
    /// Arena regions still linked into each heap at teardown.
    pub orphaned_regions: IndexMap<HeapId, usize>,
}

impl CleanupReport {
    /// Owned allocations drained across all heaps.
    pub fn total_drained(&self) -> usize {
        self.drained.values().sum()
    }
}

/// A byte count that displays in the largest binary unit it fills.
///
/// Counts under 1 KB print exactly; larger ones print to one decimal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub usize);

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SCALED: [&str; 4] = ["KB", "MB", "GB", "TB"];
        if self.0 < 1024 {
            return write!(f, "{} B", self.0);
        }
        let mut value = self.0 as f64 / 1024.0;
        let mut unit = SCALED[0];
        for next in &SCALED[1..] {
            if value < 1024.0 {
                break;
            }
            value /= 1024.0;
            unit = next;
        }
        write!(f, "{value:.1} {unit}")
    }
}
