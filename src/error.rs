/*! Error types returned across the public API.

Producer-side failures (a malformed packet, a heap that can never complete)
are never returned to a caller: they are logged at the point of decision and
the offending packet or heap is dropped (see [`crate::assembler`] and
[`crate::packet`]). Only consumer-side decode failures -- the descriptor text
was garbage, or an item's payload doesn't fit its declared shape -- are
surfaced as a [`Error`] from [`crate::item_group::ItemGroup::update`].
*/
use thiserror::Error;

/// Failures while parsing a single packet's header and item pointers.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer is shorter than the fixed 8-byte header.
    #[error("packet too short for header: {0} bytes")]
    Truncated(usize),

    /// First header byte was not the SPEAD magic (0x53).
    #[error("bad magic byte: {0:#04x}")]
    BadMagic(u8),

    /// Second header byte was not the supported version (0x04).
    #[error("unsupported SPEAD version: {0}")]
    BadVersion(u8),

    /// Item-pointer-width and heap-address-width bytes didn't sum to 8,
    /// or didn't correspond to a supported `heap_address_bits`.
    #[error(
        "unsupported address widths: item pointer {item_pointer_bytes}B, heap address {heap_address_bytes}B"
    )]
    BadAddressWidths {
        /// Bytes claimed for the item pointer id portion.
        item_pointer_bytes: u8,
        /// Bytes claimed for the heap address/immediate portion.
        heap_address_bytes: u8,
    },

    /// The declared number of item pointers does not fit in the remaining buffer.
    #[error("{n_items} item pointers don't fit in {remaining} remaining bytes")]
    TooManyItems {
        /// Number of item pointers claimed by the header.
        n_items: u16,
        /// Bytes left in the buffer after the header.
        remaining: usize,
    },
}

/// Failures while folding a packet into a live heap.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssembleError {
    /// One of HEAP_CNT, PAYLOAD_OFFSET, PAYLOAD_LENGTH or HEAP_LENGTH was
    /// missing from the packet's immediates.
    #[error("packet is missing a mandatory immediate item: {0:#x}")]
    MissingMandatoryImmediate(u64),

    /// `payload_offset + payload_length` ran past the heap's `total_length`.
    #[error(
        "payload of {payload_length} bytes at offset {payload_offset} overflows heap of length {total_length}"
    )]
    PayloadOverflow {
        /// Offset this packet claimed to write at.
        payload_offset: u64,
        /// Length of this packet's payload.
        payload_length: u64,
        /// The heap's current total length.
        total_length: u64,
    },
}

/// Failures while turning a descriptor sub-heap into a [`crate::descriptor::Descriptor`],
/// or while decoding a raw item against one. Roughly corresponds to Python's
/// `ValueError` (malformed descriptor text) and `TypeError` (shape/dtype
/// mismatch) as commonly distinguished by a descriptor-decoding consumer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// The DTYPE item's payload was not valid descriptor-header text.
    #[error("cannot parse numeric-array header: {0}")]
    InvalidNumpyHeader(String),

    /// A DESCRIPTOR item's payload did not parse as the single-packet
    /// sub-heap it's wire-encoded as.
    #[error("descriptor sub-heap is malformed: {0}")]
    MalformedSubHeap(String),

    /// The numeric-array header's top-level value was not a mapping.
    #[error("numeric-array header is not a mapping: {0}")]
    NotAMapping(String),

    /// The numeric-array header didn't have exactly {descr, fortran_order, shape}.
    #[error("numeric-array header has wrong key set: {0:?}")]
    WrongKeySet(Vec<String>),

    /// `shape` wasn't a tuple of non-negative integers.
    #[error("numeric-array header shape is not valid: {0}")]
    InvalidShape(String),

    /// `fortran_order` wasn't a bool literal.
    #[error("numeric-array header fortran_order is not a bool: {0}")]
    InvalidFortranOrder(String),

    /// `descr` did not parse as a supported dtype string.
    #[error("invalid dtype descriptor string: {0}")]
    InvalidDtypeString(String),

    /// The dtype (plain or structured) contains a field SPEAD cannot carry.
    #[error("dtype contains an object/pointer field, which SPEAD cannot carry")]
    ObjectDtype,

    /// `dynamic_shape` found more than one unknown (-1) dimension.
    #[error("shape has multiple unknown dimensions")]
    MultipleUnknownDimensions,

    /// The item's payload has fewer elements than its declared shape requires.
    #[error("item has too few elements for shape ({available} < {required})")]
    TooFewElements {
        /// Elements actually available in the payload.
        available: usize,
        /// Elements required by the declared shape.
        required: usize,
    },
}

/// Crate-wide error type returned from fallible public entry points.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A packet failed to parse. Only returned by [`crate::packet::parse_packet`]
    /// directly; the assembler and stream swallow this and log instead.
    #[error("malformed packet: {0}")]
    Parse(#[from] ParseError),

    /// A packet could not be folded into its heap. Only returned by
    /// [`crate::assembler::Assembler::add_packet`] directly; the stream
    /// swallows this and logs instead.
    #[error("bad heap: {0}")]
    Assemble(#[from] AssembleError),

    /// Descriptor or item decode failure, surfaced to the consumer from
    /// [`crate::item_group::ItemGroup::update`].
    #[error("descriptor decode failed: {0}")]
    Descriptor(#[from] DescriptorError),

    /// A ring or assembler mutex was poisoned by a panicking thread.
    #[error("internal lock poisoned: {0}")]
    Poisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned(e.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
