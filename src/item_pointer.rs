/*! Item pointers: the 64-bit words following a packet header.

Each item pointer either carries its value inline (an "immediate") or
names an offset into the heap's shared payload buffer (an "addressed"
item). The parser only classifies pointers; resolving an addressed
pointer's byte range is the assembler's job, since that requires knowing
where the *next* pointer's offset falls (see [`crate::assembler`]).
*/

/// A SPEAD item id.
pub type ItemId = u64;

/// Heap count: every packet belonging to the same heap carries the same
/// value, always as an immediate.
pub const HEAP_CNT: ItemId = 0x01;
/// Heap length: the total size of the heap's payload. May grow across
/// packets of the same heap.
pub const HEAP_LENGTH: ItemId = 0x02;
/// Payload offset: where in the heap buffer this packet's payload goes.
pub const PAYLOAD_OFFSET: ItemId = 0x03;
/// Payload length: length of this packet's contribution to the payload.
pub const PAYLOAD_LENGTH: ItemId = 0x04;
/// Descriptor: an addressed item whose payload is itself a sub-heap
/// describing another item.
pub const DESCRIPTOR: ItemId = 0x05;
/// Stream control: carries a sub-value, of which `0` means "end of stream".
pub const STREAM_CTRL: ItemId = 0x06;

/// Sub-value of `STREAM_CTRL` that requests the stream be closed once
/// drained.
pub const STREAM_CTRL_STOP_VAL: u64 = 0;

/// Descriptor sub-heap item id: item name (UTF-8/ASCII bytes).
pub const DESCRIPTOR_NAME: ItemId = 0x10;
/// Descriptor sub-heap item id: human-readable description.
pub const DESCRIPTOR_DESCRIPTION: ItemId = 0x11;
/// Descriptor sub-heap item id: SHAPE field.
pub const DESCRIPTOR_SHAPE: ItemId = 0x12;
/// Descriptor sub-heap item id: FORMAT field.
pub const DESCRIPTOR_FORMAT: ItemId = 0x13;
/// Descriptor sub-heap item id: the id of the item this descriptor describes.
pub const DESCRIPTOR_ID: ItemId = 0x14;
/// Descriptor sub-heap item id: numeric-array header (numpy-style), used
/// instead of FORMAT/SHAPE when present.
pub const DESCRIPTOR_DTYPE: ItemId = 0x15;

/// The four immediates that must appear on every data-bearing packet.
pub const MANDATORY_IMMEDIATES: [ItemId; 4] =
    [HEAP_CNT, PAYLOAD_OFFSET, PAYLOAD_LENGTH, HEAP_LENGTH];

/// One decoded item pointer from a packet, before the assembler resolves
/// addressed values into payload byte ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPointer {
    /// MSB set: the value is carried inline, in the low `heap_address_bits`
    /// bits of the pointer.
    Immediate { id: ItemId, value: u64 },
    /// MSB clear: the value lives in the heap payload at `offset`.
    Addressed { id: ItemId, offset: u64 },
}

impl ItemPointer {
    /// Decode one 64-bit big-endian item pointer word.
    #[must_use]
    pub fn decode(word: u64, heap_address_bits: u8) -> Self {
        let id = (word & 0x7fff_ffff_ffff_ffff) >> heap_address_bits;
        let low = word & ((1u64 << heap_address_bits) - 1);
        if word & (1 << 63) != 0 {
            ItemPointer::Immediate { id, value: low }
        } else {
            ItemPointer::Addressed { id, offset: low }
        }
    }

    /// Encode this pointer back to a 64-bit big-endian word, the inverse of
    /// [`Self::decode`]. Used by tests and by anything re-emitting packets.
    #[must_use]
    pub fn encode(&self, heap_address_bits: u8) -> u64 {
        match *self {
            ItemPointer::Immediate { id, value } => {
                (1u64 << 63) | (id << heap_address_bits) | value
            }
            ItemPointer::Addressed { id, offset } => (id << heap_address_bits) | offset,
        }
    }

    /// This pointer's item id, regardless of immediate/addressed.
    #[must_use]
    pub fn id(&self) -> ItemId {
        match *self {
            ItemPointer::Immediate { id, .. } | ItemPointer::Addressed { id, .. } => id,
        }
    }
}

/// Resolve every addressed pointer's byte range within a payload buffer.
///
/// An addressed item carries only its start offset; its length is implied
/// by the next addressed item's offset in ascending order, or by the end of
/// the payload for whichever item has the highest offset. This applies
/// uniformly to a heap's top-level items and to a descriptor's sub-heap
/// items, so both [`crate::heap::Heap`] and [`crate::descriptor`] call this
/// same function rather than duplicating the logic.
#[must_use]
pub fn resolve_addressed_ranges(
    items: &[ItemPointer],
    payload_len: usize,
) -> std::collections::HashMap<ItemId, std::ops::Range<usize>> {
    let mut addressed: Vec<(ItemId, usize)> = items
        .iter()
        .filter_map(|p| match *p {
            ItemPointer::Addressed { id, offset } => Some((id, offset as usize)),
            ItemPointer::Immediate { .. } => None,
        })
        .collect();
    addressed.sort_by_key(|&(_, offset)| offset);

    let mut ranges = std::collections::HashMap::with_capacity(addressed.len());
    for i in 0..addressed.len() {
        let (id, start) = addressed[i];
        let end = addressed.get(i + 1).map_or(payload_len, |&(_, next)| next);
        ranges.insert(id, start..end.max(start));
    }
    ranges
}
