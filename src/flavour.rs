/*! Flavour: the pair of wire-format knobs that parameterize everything else.

`heap_address_bits` picks the split point inside a 64-bit item pointer
between the item id and the immediate-value-or-offset. `bug_compat` selects
compatibility with known wire-format quirks of older SPEAD senders (see
[`BugCompat`]). Both travel together on every [`crate::stream::Stream`] and
every emitted [`crate::heap::Heap`], rather than living in global state.
*/
use crate::error::ParseError;

bitflags::bitflags! {
    /// Compatibility flags for known wire-format bugs in older SPEAD senders.
    ///
    /// OR-combinable; preserved unchanged from the `Flavour` a [`crate::stream::Stream`]
    /// was created with onto every [`crate::heap::Heap`] it emits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct BugCompat: u32 {
        /// Descriptor FORMAT/SHAPE fields use fixed 7/8-byte widths instead
        /// of widths derived from `heap_address_bits`.
        const DESCRIPTOR_WIDTHS = 1 << 0;
        /// The shape field's variable-dimension marker byte is `2` instead
        /// of `1`.
        const SHAPE_BIT_1 = 1 << 1;
        /// A numeric-array header's native-byte-order dtype must be
        /// byte-swapped relative to what it claims.
        const SWAP_ENDIAN = 1 << 2;
    }
}

/// The two wire-format knobs shared by a stream and all heaps it emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Flavour {
    /// Number of bits of a 64-bit item pointer given to the
    /// immediate-value-or-offset, with the rest (minus the MSB) going to the
    /// item id. Must be 40 or 48.
    pub heap_address_bits: u8,
    /// Compatibility flags for known sender bugs.
    pub bug_compat: BugCompat,
}

impl Default for Flavour {
    fn default() -> Self {
        Self {
            heap_address_bits: 48,
            bug_compat: BugCompat::empty(),
        }
    }
}

impl Flavour {
    /// Create a new flavour, validating `heap_address_bits`.
    pub fn new(heap_address_bits: u8, bug_compat: BugCompat) -> Result<Self, ParseError> {
        if heap_address_bits != 40 && heap_address_bits != 48 {
            return Err(ParseError::BadAddressWidths {
                item_pointer_bytes: ((64 - heap_address_bits as u16) / 8) as u8,
                heap_address_bytes: heap_address_bits / 8,
            });
        }
        Ok(Self {
            heap_address_bits,
            bug_compat,
        })
    }

    /// Bytes used by the item-id portion of an item pointer on the wire.
    #[must_use]
    pub fn item_pointer_bytes(&self) -> u8 {
        ((64 - self.heap_address_bits as u16) / 8) as u8
    }

    /// Bytes used by the heap-address (immediate/offset) portion of an item
    /// pointer on the wire.
    #[must_use]
    pub fn heap_address_bytes(&self) -> u8 {
        self.heap_address_bits / 8
    }

    /// Mask selecting the low `heap_address_bits` bits of a 64-bit word.
    #[must_use]
    pub fn address_mask(&self) -> u64 {
        (1u64 << self.heap_address_bits) - 1
    }

    /// Width, in bytes, of one descriptor SHAPE field on the wire.
    #[must_use]
    pub fn shape_field_width(&self) -> usize {
        if self.bug_compat.contains(BugCompat::DESCRIPTOR_WIDTHS) {
            8
        } else {
            self.heap_address_bits as usize / 8 + 1
        }
    }

    /// Byte value marking a variable dimension in a SHAPE field.
    #[must_use]
    pub fn shape_variable_marker(&self) -> u8 {
        if self.bug_compat.contains(BugCompat::SHAPE_BIT_1) {
            2
        } else {
            1
        }
    }

    /// Width, in bytes, of one descriptor FORMAT field's length-in-bits value.
    #[must_use]
    pub fn format_field_width(&self) -> usize {
        if self.bug_compat.contains(BugCompat::DESCRIPTOR_WIDTHS) {
            7
        } else {
            (64 - self.heap_address_bits as usize) / 8
        }
    }
}
