//! Guard records: the header/footer pair stamped around every tracked payload.
//!
//! Every tracked block carries its guards in-band so that an overrun or a
//! stray write lands on a canary the heap walk can see:
//!
//! ```text
//! offset 0                 24                  24 + n      28 + n
//! ├── header (24 B) ───────┼── payload (n B) ──┼── footer ──┤
//! │ 0xDEED tag idx n total │                   │ 0xFEED tag │
//! ```
//!
//! The list linkage itself is kept out-of-band in the owning ledger
//! ([`GuardedRecord`]), so a corrupted header can never send a walk into
//! arbitrary memory.

use std::alloc::Layout;
use std::fmt;

/// Canary written at the start of every header.
pub const HEADER_CANARY: u16 = 0xDEED;

/// Canary written at the start of every footer.
pub const FOOTER_CANARY: u16 = 0xFEED;

/// Encoded header length in bytes.
pub const HEADER_BYTES: usize = 24;

/// Encoded footer length in bytes.
pub const FOOTER_BYTES: usize = 4;

/// Metadata bytes added to every tracked payload.
pub const GUARD_OVERHEAD: usize = HEADER_BYTES + FOOTER_BYTES;

/// Identifies one of the registry's heaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeapId {
    /// General scene allocations.
    Default,
    /// Graphics data and object arenas.
    Graphics,
}

impl HeapId {
    /// Every heap, in registry order.
    pub const ALL: [HeapId; 2] = [HeapId::Default, HeapId::Graphics];

    /// Position of this heap in the registry table.
    pub fn index(self) -> usize {
        match self {
            HeapId::Default => 0,
            HeapId::Graphics => 1,
        }
    }

    /// The tag stamped on records owned by this heap.
    pub fn tag(self) -> HeapTag {
        match self {
            HeapId::Default => HeapTag::Default,
            HeapId::Graphics => HeapTag::Graphics,
        }
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapId::Default => write!(f, "default"),
            HeapId::Graphics => write!(f, "graphics"),
        }
    }
}

/// Tag recorded in a block's header and footer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapTag {
    /// Owned by [`HeapId::Default`].
    Default,
    /// Owned by [`HeapId::Graphics`].
    Graphics,
    /// The block is a ledger's own self-describing sentinel.
    Heap,
}

impl HeapTag {
    /// The heap a record with this tag is linked into, if any.
    ///
    /// Sentinel blocks describe a heap rather than live in one.
    pub fn heap_id(self) -> Option<HeapId> {
        match self {
            HeapTag::Default => Some(HeapId::Default),
            HeapTag::Graphics => Some(HeapId::Graphics),
            HeapTag::Heap => None,
        }
    }

    // Zero is left unused so a zeroed block never decodes as a valid tag.
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            HeapTag::Default => 1,
            HeapTag::Graphics => 2,
            HeapTag::Heap => 3,
        }
    }
}

impl fmt::Display for HeapTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapTag::Default => write!(f, "default"),
            HeapTag::Graphics => write!(f, "graphics"),
            HeapTag::Heap => write!(f, "heap"),
        }
    }
}

/// Out-of-band metadata for one tracked block.
///
/// `previous`/`next` are ledger slot indices. The list head is the ledger's
/// sentinel (slot 0, no `previous`); the tail has no `next`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardedRecord {
    pub(crate) payload_size: usize,
    pub(crate) total_size: usize,
    pub(crate) tag: HeapTag,
    pub(crate) owner: Option<HeapId>,
    pub(crate) previous: Option<u32>,
    pub(crate) next: Option<u32>,
}

impl GuardedRecord {
    /// An unlinked record for a payload of `payload_size` bytes.
    pub(crate) fn new(
        payload_size: usize,
        total_size: usize,
        tag: HeapTag,
        owner: Option<HeapId>,
    ) -> Self {
        Self {
            payload_size,
            total_size,
            tag,
            owner,
            previous: None,
            next: None,
        }
    }

    /// Requested payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Payload plus guard overhead in bytes.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Tag stamped in the record's guards.
    pub fn tag(&self) -> HeapTag {
        self.tag
    }

    /// The heap that owns this record. `None` only while a sentinel is
    /// being bootstrapped.
    pub fn owner(&self) -> Option<HeapId> {
        self.owner
    }

    /// Ledger index of the predecessor.
    pub fn previous(&self) -> Option<u32> {
        self.previous
    }

    /// Ledger index of the successor.
    pub fn next(&self) -> Option<u32> {
        self.next
    }
}

/// What a guard inspection found wrong with a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardFault {
    /// The header canary no longer reads [`HEADER_CANARY`].
    HeaderCanary {
        /// Value found in the header.
        found: u16,
    },
    /// The footer canary no longer reads [`FOOTER_CANARY`].
    FooterCanary {
        /// Value found in the footer.
        found: u16,
    },
    /// The header's payload size disagrees with the ledger.
    SizeMismatch {
        /// Size held by the ledger.
        recorded: usize,
        /// Size decoded from the header.
        found: u64,
    },
    /// The header's back-reference points at a different ledger slot.
    IndexMismatch {
        /// Slot the record lives in.
        expected: u32,
        /// Slot decoded from the header.
        found: u32,
    },
    /// A header or footer tag byte disagrees with the owning heap.
    TagMismatch {
        /// Tag the record was stamped with.
        expected: HeapTag,
        /// Raw tag byte found in the block.
        found: u8,
    },
}

impl fmt::Display for GuardFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeaderCanary { found } => {
                write!(
                    f,
                    "header canary {found:#06x}, expected {HEADER_CANARY:#06x}"
                )
            }
            Self::FooterCanary { found } => {
                write!(
                    f,
                    "footer canary {found:#06x}, expected {FOOTER_CANARY:#06x}"
                )
            }
            Self::SizeMismatch { recorded, found } => {
                write!(f, "header size {found}, ledger size {recorded}")
            }
            Self::IndexMismatch { expected, found } => {
                write!(f, "header back-reference {found}, expected {expected}")
            }
            Self::TagMismatch { expected, found } => {
                write!(f, "tag byte {found}, expected {expected}")
            }
        }
    }
}

/// Decoded header fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) check_value: u16,
    pub(crate) tag: u8,
    pub(crate) index: u32,
    pub(crate) payload_size: u64,
    pub(crate) total_size: u64,
}

impl Header {
    fn encode(&self, dst: &mut [u8]) {
        dst[0..2].copy_from_slice(&self.check_value.to_le_bytes());
        dst[2] = self.tag;
        dst[3] = 0;
        dst[4..8].copy_from_slice(&self.index.to_le_bytes());
        dst[8..16].copy_from_slice(&self.payload_size.to_le_bytes());
        dst[16..24].copy_from_slice(&self.total_size.to_le_bytes());
    }

    pub(crate) fn decode(src: &[u8]) -> Self {
        Self {
            check_value: read_u16_le(&src[0..2]),
            tag: src[2],
            index: read_u32_le(&src[4..8]),
            payload_size: read_u64_le(&src[8..16]),
            total_size: read_u64_le(&src[16..24]),
        }
    }
}

/// Decoded footer fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Footer {
    pub(crate) check_value: u16,
    pub(crate) tag: u8,
}

impl Footer {
    fn encode(&self, dst: &mut [u8]) {
        dst[0..2].copy_from_slice(&self.check_value.to_le_bytes());
        dst[2] = self.tag;
        dst[3] = 0;
    }

    pub(crate) fn decode(src: &[u8]) -> Self {
        Self {
            check_value: read_u16_le(&src[0..2]),
            tag: src[2],
        }
    }
}

fn read_u16_le(src: &[u8]) -> u16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(src);
    u16::from_le_bytes(buf)
}

fn read_u32_le(src: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(src);
    u32::from_le_bytes(buf)
}

fn read_u64_le(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(src);
    u64::from_le_bytes(buf)
}

/// Write a header at `offset` and the matching footer right after the payload.
///
/// # Panics
///
/// Panics if `block` is shorter than `offset + payload_size + GUARD_OVERHEAD`.
pub(crate) fn stamp(
    block: &mut [u8],
    offset: usize,
    payload_size: usize,
    tag: HeapTag,
    index: u32,
) {
    let header = Header {
        check_value: HEADER_CANARY,
        tag: tag.to_byte(),
        index,
        payload_size: payload_size as u64,
        total_size: (payload_size + GUARD_OVERHEAD) as u64,
    };
    header.encode(&mut block[offset..offset + HEADER_BYTES]);

    let footer_at = offset + HEADER_BYTES + payload_size;
    let footer = Footer {
        check_value: FOOTER_CANARY,
        tag: tag.to_byte(),
    };
    footer.encode(&mut block[footer_at..footer_at + FOOTER_BYTES]);
}

/// Check the guards of the block stamped at `offset`.
///
/// The footer is located from the ledger's payload size, not the header's,
/// so a smashed size field cannot move the footer check.
///
/// # Panics
///
/// Panics if `block` is shorter than `offset + payload_size + GUARD_OVERHEAD`.
pub(crate) fn inspect(
    block: &[u8],
    offset: usize,
    payload_size: usize,
    tag: HeapTag,
    index: u32,
) -> Result<(), GuardFault> {
    let footer_at = offset + HEADER_BYTES + payload_size;
    inspect_parts(
        &block[offset..offset + HEADER_BYTES],
        &block[footer_at..footer_at + FOOTER_BYTES],
        payload_size,
        tag,
        index,
    )
}

/// Check an encoded header and footer read out of a block separately.
pub(crate) fn inspect_parts(
    header: &[u8],
    footer: &[u8],
    payload_size: usize,
    tag: HeapTag,
    index: u32,
) -> Result<(), GuardFault> {
    let header = Header::decode(header);
    if header.check_value != HEADER_CANARY {
        return Err(GuardFault::HeaderCanary {
            found: header.check_value,
        });
    }
    if header.payload_size != payload_size as u64 {
        return Err(GuardFault::SizeMismatch {
            recorded: payload_size,
            found: header.payload_size,
        });
    }
    if header.index != index {
        return Err(GuardFault::IndexMismatch {
            expected: index,
            found: header.index,
        });
    }

    let footer = Footer::decode(footer);
    if footer.check_value != FOOTER_CANARY {
        return Err(GuardFault::FooterCanary {
            found: footer.check_value,
        });
    }

    for found in [header.tag, footer.tag] {
        if found != tag.to_byte() {
            return Err(GuardFault::TagMismatch {
                expected: tag,
                found,
            });
        }
    }
    Ok(())
}

/// Geometry of one guarded slot in a region.
///
/// The payload is placed at the first offset past the header that meets the
/// element's alignment, and the footer follows the payload immediately. The
/// stride is rounded up to the alignment so every slot's payload is aligned:
///
/// ```text
/// ├─ pad ─┼── header ──┼── payload ──┼─ footer ─┼─ pad ─┤
///         header_offset payload_offset                    stride
/// ```
///
/// For elements aligned to 8 bytes or less there is no leading pad.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotLayout {
    payload_size: usize,
    payload_offset: usize,
    stride: usize,
    align: usize,
}

impl SlotLayout {
    /// Slot geometry for elements of `layout`. `None` on arithmetic overflow.
    pub fn for_layout(layout: Layout) -> Option<Self> {
        let align = layout.align();
        let payload_offset = HEADER_BYTES.checked_next_multiple_of(align)?;
        let stride = payload_offset
            .checked_add(layout.size())?
            .checked_add(FOOTER_BYTES)?
            .checked_next_multiple_of(align)?;
        Some(Self {
            payload_size: layout.size(),
            payload_offset,
            stride,
            align,
        })
    }

    /// Payload bytes per slot.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Offset of the header from the start of the slot.
    pub fn header_offset(&self) -> usize {
        self.payload_offset - HEADER_BYTES
    }

    /// Offset of the payload from the start of the slot.
    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    /// Offset of the footer from the start of the slot.
    pub fn footer_offset(&self) -> usize {
        self.payload_offset + self.payload_size
    }

    /// Distance between consecutive slots.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Alignment of every payload.
    pub fn align(&self) -> usize {
        self.align
    }
}
