/*! Descriptors: the metadata that turns a raw item's bytes into a typed
[`crate::value::Value`].

A descriptor arrives as the payload of a `DESCRIPTOR` item: a single-packet
sub-heap of its own, wire-encoded exactly like any other packet (full
8-byte header, mandatory immediates, item pointers, payload). Its sub-items
name the item being described (`NAME`/`DESCRIPTION`/`ID`) and its layout,
either as a numpy-style header (`DTYPE`) or as separate `SHAPE` and
`FORMAT` fields.
*/
use crate::dtype::{self, Dtype};
use crate::error::DescriptorError;
use crate::flavour::Flavour;
use crate::item_pointer::{self, ItemId, ItemPointer};
use crate::numpy_header::{self, DescrSpec};
use crate::packet;

/// One dimension of a descriptor's declared shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShapeDim {
    Fixed(u64),
    /// The `-1` placeholder: resolved against the item's actual payload
    /// size at decode time (see [`crate::value::dynamic_shape`]).
    Variable,
}

/// A fully decoded item descriptor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Descriptor {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    pub shape: Vec<ShapeDim>,
    /// `None` when no (code, length) pair in FORMAT maps onto a fast-path
    /// scalar: the item still decodes, but as an undecoded byte span rather
    /// than a typed array (see [`crate::value::decode_item`]). A numpy-style
    /// `DTYPE` header always yields `Some`, since an unparseable header is a
    /// hard decode failure rather than a fallback.
    pub dtype: Option<Dtype>,
    pub fortran_order: bool,
}

/// Decode a `DESCRIPTOR` item's sub-heap payload into a [`Descriptor`].
///
/// `data` is itself a complete single-packet heap, exactly as
/// [`packet::parse_packet`] expects: its own 8-byte header and mandatory
/// immediates, followed by the NAME/DESCRIPTION/SHAPE/FORMAT/DTYPE/ID item
/// pointers and their shared payload. `flavour`'s `bug_compat` (but not its
/// `heap_address_bits`, which the sub-packet's own header carries) governs
/// how the SHAPE and FORMAT fields are laid out.
pub fn parse(data: &[u8], flavour: &Flavour) -> Result<Descriptor, DescriptorError> {
    let packet = packet::parse_packet(data)
        .map_err(|e| DescriptorError::MalformedSubHeap(e.to_string()))?;
    let sub_flavour = Flavour {
        heap_address_bits: packet.heap_address_bits,
        bug_compat: flavour.bug_compat,
    };
    let pointers = packet.pointers;
    let payload = packet.payload;
    let ranges = item_pointer::resolve_addressed_ranges(&pointers, payload.len());
    let flavour = &sub_flavour;

    let text_field = |id: ItemId| -> Option<String> {
        ranges
            .get(&id)
            .map(|r| String::from_utf8_lossy(&payload[r.clone()]).into_owned())
    };

    let name = text_field(item_pointer::DESCRIPTOR_NAME).unwrap_or_default();
    let description = text_field(item_pointer::DESCRIPTOR_DESCRIPTION).unwrap_or_default();

    let id = pointers
        .iter()
        .find_map(|p| match *p {
            ItemPointer::Immediate {
                id: item_pointer::DESCRIPTOR_ID,
                value,
            } => Some(value),
            ItemPointer::Addressed {
                id: item_pointer::DESCRIPTOR_ID,
                ..
            } => ranges.get(&item_pointer::DESCRIPTOR_ID).and_then(|r| {
                let bytes = &payload[r.clone()];
                let mut buf = [0u8; 8];
                buf[8 - bytes.len()..].copy_from_slice(bytes);
                Some(u64::from_be_bytes(buf))
            }),
            _ => None,
        })
        .ok_or_else(|| DescriptorError::InvalidNumpyHeader("missing descriptor id".to_string()))?;

    if let Some(dtype_text) = text_field(item_pointer::DESCRIPTOR_DTYPE) {
        let header = numpy_header::parse(&dtype_text)?;
        let mut dtype = match &header.descr {
            DescrSpec::Scalar(s) => Dtype::from_descr_str(s)?,
            DescrSpec::Fields(fields) => Dtype::from_descr_list(fields)?,
        };
        if flavour
            .bug_compat
            .contains(crate::flavour::BugCompat::SWAP_ENDIAN)
        {
            dtype = dtype.swap_byte_order();
        }
        if !dtype.is_plain() {
            return Err(DescriptorError::ObjectDtype);
        }
        let shape = header
            .shape
            .into_iter()
            .map(|d| {
                if d < 0 {
                    ShapeDim::Variable
                } else {
                    ShapeDim::Fixed(d as u64)
                }
            })
            .collect();
        return Ok(Descriptor {
            id,
            name,
            description,
            shape,
            dtype: Some(dtype),
            fortran_order: header.fortran_order,
        });
    }

    let shape_range = ranges.get(&item_pointer::DESCRIPTOR_SHAPE);
    let format_range = ranges.get(&item_pointer::DESCRIPTOR_FORMAT);

    let shape = match shape_range {
        Some(r) => decode_shape(&payload[r.clone()], flavour)?,
        None => Vec::new(),
    };
    let dtype: Option<Dtype> = match format_range {
        Some(r) => decode_format(&payload[r.clone()], flavour)?,
        None => {
            return Err(DescriptorError::InvalidDtypeString(
                "descriptor has neither DTYPE nor FORMAT".to_string(),
            ));
        }
    };

    Ok(Descriptor {
        id,
        name,
        description,
        shape,
        dtype,
        fortran_order: false,
    })
}

fn decode_shape(bytes: &[u8], flavour: &Flavour) -> Result<Vec<ShapeDim>, DescriptorError> {
    let width = flavour.shape_field_width();
    if bytes.len() % width != 0 {
        return Err(DescriptorError::InvalidShape(format!(
            "{} bytes is not a multiple of field width {width}",
            bytes.len()
        )));
    }
    let marker = flavour.shape_variable_marker();
    let mut dims = Vec::with_capacity(bytes.len() / width);
    for chunk in bytes.chunks(width) {
        if chunk[0] == marker && chunk[1..].iter().all(|&b| b == 0) {
            dims.push(ShapeDim::Variable);
        } else {
            let mut buf = [0u8; 8];
            buf[8 - chunk.len()..].copy_from_slice(chunk);
            dims.push(ShapeDim::Fixed(u64::from_be_bytes(buf)));
        }
    }
    Ok(dims)
}

fn decode_format(bytes: &[u8], flavour: &Flavour) -> Result<Option<Dtype>, DescriptorError> {
    let width = flavour.format_field_width();
    if bytes.is_empty() || bytes.len() % width != 0 {
        return Err(DescriptorError::InvalidDtypeString(format!(
            "{} bytes is not a positive multiple of field width {width}",
            bytes.len()
        )));
    }
    let mut entries = Vec::with_capacity(bytes.len() / width);
    for chunk in bytes.chunks(width) {
        let code = chunk[0] as char;
        let mut buf = [0u8; 8];
        buf[8 - (width - 1)..].copy_from_slice(&chunk[1..]);
        let bits = u64::from_be_bytes(buf);
        entries.push((code, bits));
    }
    dtype::parse_format(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flavour::BugCompat;

    /// Build a DESCRIPTOR item's wire payload for tests: a complete
    /// single-packet sub-heap (heap_cnt hardcoded to 1), carrying the NAME
    /// plus whichever of FORMAT/SHAPE/DTYPE are supplied.
    fn make_descriptor_bytes(
        flavour: &Flavour,
        id: ItemId,
        name: &[u8],
        format: Option<&[u8]>,
        shape: Option<&[u8]>,
        dtype_text: Option<&[u8]>,
    ) -> Vec<u8> {
        let mut fields: Vec<(ItemId, &[u8])> = vec![(item_pointer::DESCRIPTOR_NAME, name)];
        if let Some(f) = format {
            fields.push((item_pointer::DESCRIPTOR_FORMAT, f));
        }
        if let Some(s) = shape {
            fields.push((item_pointer::DESCRIPTOR_SHAPE, s));
        }
        if let Some(d) = dtype_text {
            fields.push((item_pointer::DESCRIPTOR_DTYPE, d));
        }

        let mut payload = Vec::new();
        let mut pointers = vec![ItemPointer::Immediate {
            id: item_pointer::DESCRIPTOR_ID,
            value: id,
        }];
        for (field_id, bytes) in &fields {
            pointers.push(ItemPointer::Addressed {
                id: *field_id,
                offset: payload.len() as u64,
            });
            payload.extend_from_slice(bytes);
        }

        crate::packet::test_support::make_packet(flavour.heap_address_bits, 1, &pointers, &payload)
    }

    #[test]
    fn parses_descriptor_with_format_and_shape() {
        let flavour = Flavour::default();
        let format_bytes: Vec<u8> = {
            let mut b = vec![b'u'];
            b.extend_from_slice(&32u64.to_be_bytes()[8 - flavour.format_field_width() + 1..]);
            b
        };
        let shape_bytes: Vec<u8> = {
            let width = flavour.shape_field_width();
            let mut b = vec![0u8; width];
            b[width - 1] = 3;
            b
        };
        let data = make_descriptor_bytes(
            &flavour,
            42,
            b"my_item",
            Some(&format_bytes),
            Some(&shape_bytes),
            None,
        );
        let d = parse(&data, &flavour).unwrap();
        assert_eq!(d.id, 42);
        assert_eq!(d.name, "my_item");
        assert_eq!(d.shape, vec![ShapeDim::Fixed(3)]);
        assert_eq!(
            d.dtype,
            Some(Dtype::Scalar {
                kind: crate::dtype::ScalarKind::U32,
                byte_order: crate::dtype::ByteOrder::Big
            })
        );
    }

    #[test]
    fn format_with_unmapped_code_yields_null_dtype() {
        let flavour = Flavour::default();
        // u24 has no fast-path scalar mapping.
        let format_bytes: Vec<u8> = {
            let mut b = vec![b'u'];
            b.extend_from_slice(&24u64.to_be_bytes()[8 - flavour.format_field_width() + 1..]);
            b
        };
        let data = make_descriptor_bytes(&flavour, 1, b"x", Some(&format_bytes), None, None);
        let d = parse(&data, &flavour).unwrap();
        assert_eq!(d.dtype, None);
    }

    #[test]
    fn object_field_in_numpy_header_is_rejected() {
        let flavour = Flavour::default();
        let header = b"{'descr': [('f0', '<f4'), ('f1', '|O')], 'fortran_order': False, 'shape': (2,), }";
        let data = make_descriptor_bytes(&flavour, 1, b"x", None, None, Some(header));
        assert!(matches!(
            parse(&data, &flavour),
            Err(DescriptorError::ObjectDtype)
        ));
    }

    #[test]
    fn parses_descriptor_with_numpy_header() {
        let flavour = Flavour::default();
        let header = b"{'descr': '<f8', 'fortran_order': False, 'shape': (2, 3), }";
        let data = make_descriptor_bytes(&flavour, 7, b"arr", None, None, Some(header));
        let d = parse(&data, &flavour).unwrap();
        assert_eq!(d.shape, vec![ShapeDim::Fixed(2), ShapeDim::Fixed(3)]);
        assert!(!d.fortran_order);
    }

    #[test]
    fn variable_shape_marker_decodes_as_variable() {
        let flavour = Flavour::new(48, BugCompat::empty()).unwrap();
        let width = flavour.shape_field_width();
        let mut shape_bytes = vec![0u8; width];
        shape_bytes[0] = flavour.shape_variable_marker();
        let data = make_descriptor_bytes(
            &flavour,
            1,
            b"x",
            Some(&{
                let mut b = vec![b'u'];
                b.extend_from_slice(&32u64.to_be_bytes()[8 - flavour.format_field_width() + 1..]);
                b
            }),
            Some(&shape_bytes),
            None,
        );
        let d = parse(&data, &flavour).unwrap();
        assert_eq!(d.shape, vec![ShapeDim::Variable]);
    }

    #[test]
    fn descriptor_missing_format_and_dtype_is_rejected() {
        let flavour = Flavour::default();
        let data = make_descriptor_bytes(&flavour, 1, b"x", None, None, None);
        assert!(parse(&data, &flavour).is_err());
    }
}
