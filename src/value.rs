/*! Decoding a raw item's bytes against its descriptor into a typed [`Value`].

Resolves the
single dynamic (`-1`) dimension against how many elements the payload
actually holds, reject a payload too small for the declared shape, and
special-case the all-too-common "array of shape `[-1]`, dtype `c8`" pattern
as a string rather than a `Vec` of single-byte chars.
*/
use crate::descriptor::{Descriptor, ShapeDim};
use crate::dtype::{ByteOrder, Dtype, ScalarKind};
use crate::error::DescriptorError;

/// One decoded scalar, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Char(u8),
}

/// One element of an array whose dtype is structured: a record of named
/// scalar fields, in declaration order.
pub type Record = Vec<(String, ScalarValue)>;

/// One array element: either a bare scalar or a structured record,
/// depending on the descriptor's dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Scalar(ScalarValue),
    Record(Record),
}

/// An item's fully decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A scalar (addressed or immediate) item whose descriptor names a
    /// known dtype, decoded to the declared kind.
    Scalar(Element),
    /// An addressed item whose declared shape is one-dimensional and whose
    /// dtype is a single `c8`/`S1` field, decoded as text.
    Str(String),
    /// Any other addressed item: a dense row-major array of elements.
    Array {
        shape: Vec<u64>,
        elements: Vec<Element>,
    },
    /// An addressed item whose descriptor has no dtype (a FORMAT code
    /// outside the fast path): its raw payload bytes, passed through
    /// unchanged per the wire format's slow-path fallback.
    Bytes(Vec<u8>),
    /// An immediate item's raw inline bits, passed through unchanged
    /// because its descriptor has no dtype.
    Immediate(u64),
}

/// Resolve a shape with at most one `-1` placeholder against the number of
/// elements actually available.
pub fn dynamic_shape(shape: &[ShapeDim], max_elements: u64) -> Result<Vec<u64>, DescriptorError> {
    let unknowns = shape.iter().filter(|d| **d == ShapeDim::Variable).count();
    if unknowns > 1 {
        return Err(DescriptorError::MultipleUnknownDimensions);
    }
    if unknowns == 0 {
        return Ok(shape
            .iter()
            .map(|d| match d {
                ShapeDim::Fixed(n) => *n,
                ShapeDim::Variable => unreachable!(),
            })
            .collect());
    }
    let known_product: u64 = shape
        .iter()
        .filter_map(|d| match d {
            ShapeDim::Fixed(n) => Some(*n),
            ShapeDim::Variable => None,
        })
        .product();
    let resolved = if known_product == 0 {
        0
    } else {
        max_elements / known_product
    };
    Ok(shape
        .iter()
        .map(|d| match d {
            ShapeDim::Fixed(n) => *n,
            ShapeDim::Variable => resolved,
        })
        .collect())
}

/// Decode `raw` -- the bytes an addressed item's payload range pointed at --
/// against its `descriptor`.
///
/// A `None` dtype (a FORMAT code this crate doesn't fast-path) passes the
/// bytes through unchanged, per the wire format's slow-path fallback: "if
/// dtype is null ... value = raw value unchanged".
pub fn decode_item(raw: &[u8], descriptor: &Descriptor) -> Result<Value, DescriptorError> {
    let Some(dtype) = &descriptor.dtype else {
        return Ok(Value::Bytes(raw.to_vec()));
    };

    let itemsize = dtype.itemsize();
    if itemsize == 0 {
        return Err(DescriptorError::InvalidDtypeString(
            "zero-size dtype".to_string(),
        ));
    }
    let max_elements = (raw.len() / itemsize) as u64;
    let shape = dynamic_shape(&descriptor.shape, max_elements)?;
    // An empty shape (a scalar item) needs exactly one element; `product()`
    // of an empty iterator is already 1, which gives us that for free.
    let required: u64 = shape.iter().product();
    if required > max_elements {
        return Err(DescriptorError::TooFewElements {
            available: max_elements as usize,
            required: required as usize,
        });
    }

    if shape.is_empty() {
        let element = decode_element(&raw[..itemsize], dtype)?;
        return Ok(Value::Scalar(element));
    }

    if shape.len() == 1 {
        if let Dtype::Scalar {
            kind: ScalarKind::Char8,
            ..
        } = dtype
        {
            let n = shape[0] as usize;
            let bytes = &raw[..n];
            if bytes.is_ascii() {
                return Ok(Value::Str(
                    String::from_utf8(bytes.to_vec()).expect("ascii is valid utf8"),
                ));
            }
            // Not ASCII: fall back to a plain byte array instead of
            // failing the whole decode.
            let elements = bytes
                .iter()
                .map(|&b| Element::Scalar(ScalarValue::Char(b)))
                .collect();
            return Ok(Value::Array {
                shape: shape.clone(),
                elements,
            });
        }
    }

    let mut elements = Vec::with_capacity(required as usize);
    for chunk in raw.chunks(itemsize).take(required as usize) {
        elements.push(decode_element(chunk, dtype)?);
    }
    Ok(Value::Array { shape, elements })
}

/// Decode an immediate item's raw inline bits against its `descriptor`.
///
/// A value narrower than `heap_address_bits` is left-justified within the
/// pointer's low bits on the wire (the low bits are zero padding), so
/// recovering it requires shifting right by `heap_address_bits - declared_width`.
/// A `None` dtype passes the bits through unchanged, same as [`decode_item`].
pub fn decode_immediate(
    raw: u64,
    heap_address_bits: u8,
    descriptor: &Descriptor,
) -> Result<Value, DescriptorError> {
    let Some(dtype) = &descriptor.dtype else {
        return Ok(Value::Immediate(raw));
    };
    let Dtype::Scalar { kind, .. } = dtype else {
        return Err(DescriptorError::InvalidDtypeString(
            "a structured dtype cannot be carried as an immediate item".to_string(),
        ));
    };
    let width_bits = (kind.itemsize() as u32) * 8;
    let shift = (heap_address_bits as u32).saturating_sub(width_bits);
    let shifted = if width_bits >= 64 { raw } else { raw >> shift };
    let mask = if width_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << width_bits) - 1
    };
    Ok(Value::Scalar(Element::Scalar(scalar_from_bits(
        shifted & mask,
        *kind,
    ))))
}

fn scalar_from_bits(bits: u64, kind: ScalarKind) -> ScalarValue {
    match kind {
        ScalarKind::U8 => ScalarValue::U8(bits as u8),
        ScalarKind::U16 => ScalarValue::U16(bits as u16),
        ScalarKind::U32 => ScalarValue::U32(bits as u32),
        ScalarKind::U64 => ScalarValue::U64(bits),
        ScalarKind::I8 => ScalarValue::I8(bits as u8 as i8),
        ScalarKind::I16 => ScalarValue::I16(bits as u16 as i16),
        ScalarKind::I32 => ScalarValue::I32(bits as u32 as i32),
        ScalarKind::I64 => ScalarValue::I64(bits as i64),
        ScalarKind::F32 => ScalarValue::F32(f32::from_bits(bits as u32)),
        ScalarKind::F64 => ScalarValue::F64(f64::from_bits(bits)),
        ScalarKind::Bool8 => ScalarValue::Bool(bits != 0),
        ScalarKind::Char8 => ScalarValue::Char(bits as u8),
        // Rejected by `Dtype::is_plain` at descriptor-parse time; a
        // descriptor can never reach here carrying an object field.
        ScalarKind::Object => unreachable!("object dtype rejected during descriptor parse"),
    }
}

fn decode_element(bytes: &[u8], dtype: &Dtype) -> Result<Element, DescriptorError> {
    match dtype {
        Dtype::Scalar { kind, byte_order } => Ok(Element::Scalar(decode_scalar(
            bytes,
            *kind,
            *byte_order,
        )?)),
        Dtype::Structured(fields) => {
            let mut record = Vec::with_capacity(fields.len());
            let mut offset = 0;
            for (name, field_dtype) in fields {
                let size = field_dtype.itemsize();
                let Element::Scalar(v) = decode_element(&bytes[offset..offset + size], field_dtype)?
                else {
                    return Err(DescriptorError::ObjectDtype);
                };
                record.push((name.clone(), v));
                offset += size;
            }
            Ok(Element::Record(record))
        }
    }
}

fn decode_scalar(
    bytes: &[u8],
    kind: ScalarKind,
    byte_order: ByteOrder,
) -> Result<ScalarValue, DescriptorError> {
    macro_rules! prim {
        ($ty:ty, $variant:ident) => {{
            let arr: [u8; std::mem::size_of::<$ty>()] = bytes
                .try_into()
                .map_err(|_| DescriptorError::InvalidDtypeString("short element".to_string()))?;
            let v = match byte_order {
                ByteOrder::Little => <$ty>::from_le_bytes(arr),
                ByteOrder::Big => <$ty>::from_be_bytes(arr),
                ByteOrder::NotApplicable => <$ty>::from_ne_bytes(arr),
            };
            ScalarValue::$variant(v)
        }};
    }
    Ok(match kind {
        ScalarKind::U8 => ScalarValue::U8(bytes[0]),
        ScalarKind::I8 => ScalarValue::I8(bytes[0] as i8),
        ScalarKind::Bool8 => ScalarValue::Bool(bytes[0] != 0),
        ScalarKind::Char8 => ScalarValue::Char(bytes[0]),
        ScalarKind::U16 => prim!(u16, U16),
        ScalarKind::U32 => prim!(u32, U32),
        ScalarKind::U64 => prim!(u64, U64),
        ScalarKind::I16 => prim!(i16, I16),
        ScalarKind::I32 => prim!(i32, I32),
        ScalarKind::I64 => prim!(i64, I64),
        ScalarKind::F32 => prim!(f32, F32),
        ScalarKind::F64 => prim!(f64, F64),
        ScalarKind::Object => unreachable!("object dtype rejected during descriptor parse"),
    })
}
