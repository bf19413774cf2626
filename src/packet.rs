/*! The packet parser (spec §4.1).

Takes one contiguous byte span -- exactly one UDP datagram's worth, in the
in-memory [`crate::reader::BufferReader`] case -- and either decodes it into
a [`Packet`] or reports why it's malformed. The parser never interprets item
*values*; it only classifies each item pointer as immediate or addressed.
Resolving an addressed pointer's byte range, and making sense of the
mandatory immediates, is the assembler's job (see [`crate::assembler`]).
*/
use crate::error::ParseError;
use crate::item_pointer::ItemPointer;

const MAGIC: u8 = 0x53;
const VERSION: u8 = 0x04;
/// Fixed header length in bytes, the same for every flavour.
pub(crate) const HEADER_LEN: usize = 8;

/// One decoded SPEAD packet.
#[derive(Debug, Clone)]
pub struct Packet<'a> {
    /// `heap_address_bits` derived from this packet's header, needed to
    /// reinterpret its item pointers.
    pub heap_address_bits: u8,
    /// Item pointers in on-wire order.
    pub pointers: Vec<ItemPointer>,
    /// The payload bytes following the header and item pointers.
    pub payload: &'a [u8],
}

/// Parse one packet out of `data`.
///
/// `data` must be exactly one packet's worth of bytes (the in-memory
/// [`crate::reader::BufferReader`] slices a buffer into a sequence of
/// these; a UDP reader would pass one recvfrom'd datagram).
pub fn parse_packet(data: &[u8]) -> Result<Packet<'_>, ParseError> {
    if data.len() < HEADER_LEN {
        return Err(ParseError::Truncated(data.len()));
    }
    if data[0] != MAGIC {
        return Err(ParseError::BadMagic(data[0]));
    }
    if data[1] != VERSION {
        return Err(ParseError::BadVersion(data[1]));
    }
    let item_pointer_bytes = data[2];
    let heap_address_bytes = data[3];
    if item_pointer_bytes as u16 + heap_address_bytes as u16 != 8 {
        return Err(ParseError::BadAddressWidths {
            item_pointer_bytes,
            heap_address_bytes,
        });
    }
    let heap_address_bits = heap_address_bytes * 8;
    if heap_address_bits != 40 && heap_address_bits != 48 {
        return Err(ParseError::BadAddressWidths {
            item_pointer_bytes,
            heap_address_bytes,
        });
    }
    // data[4..6] is reserved, ignored.
    let n_items = u16::from_be_bytes([data[6], data[7]]);
    let remaining = data.len() - HEADER_LEN;
    let pointers_len = 8usize * n_items as usize;
    if pointers_len > remaining {
        return Err(ParseError::TooManyItems { n_items, remaining });
    }

    let mut pointers = Vec::with_capacity(n_items as usize);
    for i in 0..n_items as usize {
        let start = HEADER_LEN + 8 * i;
        let word = u64::from_be_bytes(data[start..start + 8].try_into().unwrap());
        pointers.push(ItemPointer::decode(word, heap_address_bits));
    }
    let payload = &data[HEADER_LEN + pointers_len..];

    Ok(Packet {
        heap_address_bits,
        pointers,
        payload,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::make_packet;
    use super::*;

    #[test]
    fn parses_minimal_packet() {
        let data = make_packet(48, 1, &[], b"hi");
        let p = parse_packet(&data).unwrap();
        assert_eq!(p.heap_address_bits, 48);
        assert_eq!(p.pointers.len(), 4);
        assert_eq!(p.payload, b"hi");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = make_packet(48, 1, &[], b"");
        data[0] = 0x00;
        assert_eq!(parse_packet(&data), Err(ParseError::BadMagic(0x00)));
    }

    #[test]
    fn rejects_bad_version() {
        let mut data = make_packet(48, 1, &[], b"");
        data[1] = 0x03;
        assert_eq!(parse_packet(&data), Err(ParseError::BadVersion(0x03)));
    }

    #[test]
    fn rejects_truncated_header() {
        let data = vec![MAGIC, VERSION, 2, 6];
        assert_eq!(parse_packet(&data), Err(ParseError::Truncated(4)));
    }

    #[test]
    fn rejects_unsupported_address_widths() {
        let mut data = make_packet(48, 1, &[], b"");
        // Claim 32-bit heap addressing, which this crate doesn't support.
        data[2] = 4;
        data[3] = 4;
        assert!(matches!(
            parse_packet(&data),
            Err(ParseError::BadAddressWidths { .. })
        ));
    }

    #[test]
    fn rejects_item_count_overflowing_buffer() {
        let mut data = make_packet(48, 1, &[], b"");
        data[6..8].copy_from_slice(&100u16.to_be_bytes());
        assert!(matches!(
            parse_packet(&data),
            Err(ParseError::TooManyItems { n_items: 100, .. })
        ));
    }

    #[test]
    fn heap_address_bits_40_also_supported() {
        let data = make_packet(40, 1, &[], b"x");
        let p = parse_packet(&data).unwrap();
        assert_eq!(p.heap_address_bits, 40);
    }
}
