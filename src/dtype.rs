/*! Scalar and structured dtypes: the vocabulary shared by the FORMAT field
and the numeric-array header's `descr` string.

A descriptor names the bit-layout of one item's elements in one of two wire
forms (see [`crate::descriptor`]): a SPEAD `FORMAT` field (a list of
`(code, bit length)` pairs) or a numpy-style header whose `descr` is a
dtype string. Both resolve to the same [`Dtype`] here, so the rest of the
decode path ([`crate::value`]) doesn't care which form a given item used.
*/
use crate::error::DescriptorError;

/// Byte order a scalar field's bytes are stored in on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    Little,
    Big,
    /// `|` in numpy dtype strings: the field is single-byte, so byte order
    /// is moot.
    NotApplicable,
}

impl ByteOrder {
    #[must_use]
    pub fn is_native(self) -> bool {
        matches!(self, ByteOrder::Little) == cfg!(target_endian = "little")
            || self == ByteOrder::NotApplicable
    }
}

/// One scalar element kind, independent of byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScalarKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// `b1`: a single byte, 0 or nonzero.
    Bool8,
    /// `S1`/`c8`: a single ASCII character byte.
    Char8,
    /// `O`: a numpy object (pointer) field. SPEAD cannot carry Python
    /// objects over the wire; any dtype containing this kind is rejected by
    /// [`Dtype::is_plain`] before a single byte of the item is decoded.
    Object,
}

impl ScalarKind {
    #[must_use]
    pub fn itemsize(self) -> usize {
        match self {
            ScalarKind::U8 | ScalarKind::I8 | ScalarKind::Bool8 | ScalarKind::Char8 => 1,
            ScalarKind::U16 | ScalarKind::I16 => 2,
            ScalarKind::U32 | ScalarKind::I32 | ScalarKind::F32 => 4,
            ScalarKind::U64 | ScalarKind::I64 | ScalarKind::F64 => 8,
            ScalarKind::Object => std::mem::size_of::<usize>(),
        }
    }
}

/// One item's full element layout: either a single scalar repeated, or a
/// structured record of named scalar fields (numpy "compound dtype").
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dtype {
    Scalar {
        kind: ScalarKind,
        byte_order: ByteOrder,
    },
    /// Named fields in declaration order, e.g. `f0`, `f1`, ... for a
    /// structured array built from a SPEAD FORMAT list, or whatever names
    /// the numpy header's `descr` list itself carried.
    Structured(Vec<(String, Dtype)>),
}

impl Dtype {
    /// Total bytes of one element (one record, for a structured dtype).
    #[must_use]
    pub fn itemsize(&self) -> usize {
        match self {
            Dtype::Scalar { kind, .. } => kind.itemsize(),
            Dtype::Structured(fields) => fields.iter().map(|(_, d)| d.itemsize()).sum(),
        }
    }

    /// Flip every scalar field's byte order, for `BUG_COMPAT_SWAP_ENDIAN`
    /// senders whose numpy header claims the wrong endianness.
    #[must_use]
    pub fn swap_byte_order(&self) -> Dtype {
        match self {
            Dtype::Scalar { kind, byte_order } => Dtype::Scalar {
                kind: *kind,
                byte_order: match byte_order {
                    ByteOrder::Little => ByteOrder::Big,
                    ByteOrder::Big => ByteOrder::Little,
                    ByteOrder::NotApplicable => ByteOrder::NotApplicable,
                },
            },
            Dtype::Structured(fields) => Dtype::Structured(
                fields
                    .iter()
                    .map(|(name, d)| (name.clone(), d.swap_byte_order()))
                    .collect(),
            ),
        }
    }

    /// Whether any field of this dtype (recursively) is something SPEAD
    /// cannot carry, i.e. was built from an `object`/pointer numpy dtype.
    /// Structured and scalar dtypes built from FORMAT or a well-formed
    /// `descr` string never reach this state; it exists only to give
    /// [`crate::descriptor`] a place to reject descriptors explicitly.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        match self {
            Dtype::Scalar { kind, .. } => !matches!(kind, ScalarKind::Object),
            Dtype::Structured(fields) => fields.iter().all(|(_, d)| d.is_plain()),
        }
    }

    /// Parse a single numpy dtype descriptor string such as `<u4`, `>f8`,
    /// `|b1`, `|S1` or `|c8`.
    pub fn from_descr_str(s: &str) -> Result<Self, DescriptorError> {
        let mut chars = s.chars();
        let order_char = chars
            .next()
            .ok_or_else(|| DescriptorError::InvalidDtypeString(s.to_string()))?;
        let byte_order = match order_char {
            '<' => ByteOrder::Little,
            '>' => ByteOrder::Big,
            '|' | '=' => ByteOrder::NotApplicable,
            _ => return Err(DescriptorError::InvalidDtypeString(s.to_string())),
        };
        let code = chars
            .next()
            .ok_or_else(|| DescriptorError::InvalidDtypeString(s.to_string()))?;
        let bits_str: String = chars.collect();
        let kind = match (code, bits_str.as_str()) {
            ('u', "1") => ScalarKind::U8,
            ('u', "2") => ScalarKind::U16,
            ('u', "4") => ScalarKind::U32,
            ('u', "8") => ScalarKind::U64,
            ('i', "1") => ScalarKind::I8,
            ('i', "2") => ScalarKind::I16,
            ('i', "4") => ScalarKind::I32,
            ('i', "8") => ScalarKind::I64,
            ('f', "4") => ScalarKind::F32,
            ('f', "8") => ScalarKind::F64,
            ('b', "1") => ScalarKind::Bool8,
            ('S', "1") | ('c', "8") => ScalarKind::Char8,
            ('O', _) => ScalarKind::Object,
            _ => return Err(DescriptorError::InvalidDtypeString(s.to_string())),
        };
        Ok(Dtype::Scalar { kind, byte_order })
    }

    /// Build a structured [`Dtype`] from a compound numpy header `descr`,
    /// e.g. `[('f0', '<f4'), ('f1', '|O')]` -- a list of (field name, dtype
    /// string) pairs, field names preserved as given rather than renumbered.
    pub fn from_descr_list(fields: &[(String, String)]) -> Result<Self, DescriptorError> {
        if fields.is_empty() {
            return Err(DescriptorError::InvalidDtypeString(String::new()));
        }
        let fields = fields
            .iter()
            .map(|(name, descr)| Ok((name.clone(), Dtype::from_descr_str(descr)?)))
            .collect::<Result<Vec<_>, DescriptorError>>()?;
        Ok(Dtype::Structured(fields))
    }
}

/// Decode a SPEAD `FORMAT` field, a list of `(code, bit length)` pairs, into
/// a [`Dtype`]. Multiple entries become a structured dtype with fields
/// named `f0`, `f1`, ...; a single entry becomes a bare scalar. FORMAT
/// fields are always big-endian on the wire (a FORMAT field never declares
/// little-endian elements).
///
/// Returns `Ok(None)` rather than an error when a field's `(code, length)`
/// doesn't map onto a fast-path scalar: a code outside `{u, i, f, b, c}`, or
/// one of those with a bit width this crate doesn't zero-copy-decode (e.g.
/// `u24`). Per the wire format's slow-path fallback, such an item still
/// decodes -- just as an undecoded byte span rather than a typed array (see
/// [`crate::value::decode_item`]) -- so a null dtype is not itself an error.
pub fn parse_format(entries: &[(char, u64)]) -> Result<Option<Dtype>, DescriptorError> {
    if entries.is_empty() {
        return Err(DescriptorError::InvalidDtypeString(String::new()));
    }
    let mut scalars = Vec::with_capacity(entries.len());
    for &(code, bits) in entries {
        match format_entry_to_scalar(code, bits) {
            Some(s) => scalars.push(s),
            None => return Ok(None),
        }
    }
    if scalars.len() == 1 {
        let (kind, byte_order) = scalars.into_iter().next().unwrap();
        return Ok(Some(Dtype::Scalar { kind, byte_order }));
    }
    let fields = scalars
        .into_iter()
        .enumerate()
        .map(|(i, (kind, byte_order))| (format!("f{i}"), Dtype::Scalar { kind, byte_order }))
        .collect();
    Ok(Some(Dtype::Structured(fields)))
}

fn format_entry_to_scalar(code: char, bits: u64) -> Option<(ScalarKind, ByteOrder)> {
    let kind = match (code, bits) {
        ('u', 8) => ScalarKind::U8,
        ('u', 16) => ScalarKind::U16,
        ('u', 32) => ScalarKind::U32,
        ('u', 64) => ScalarKind::U64,
        ('i', 8) => ScalarKind::I8,
        ('i', 16) => ScalarKind::I16,
        ('i', 32) => ScalarKind::I32,
        ('i', 64) => ScalarKind::I64,
        ('f', 32) => ScalarKind::F32,
        ('f', 64) => ScalarKind::F64,
        ('b', 8) => ScalarKind::Bool8,
        ('c', 8) => ScalarKind::Char8,
        _ => return None,
    };
    // FORMAT fields are always big-endian; single-byte kinds don't care.
    Some((kind, ByteOrder::Big))
}
