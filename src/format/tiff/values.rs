//! TIFF tag value decoding.
//!
//! This module turns the raw bytes of a tag into a typed [`TagValue`]. The
//! bytes may come from the value slot of an IFD entry (small values) or from
//! a separate read at the entry's offset (larger values such as arrays).
//!
//! All values are little-endian; big-endian files are rejected when the
//! header is parsed.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::{read_u16_le, read_u32_le, read_u64_le};

use super::tags::{FieldType, TiffTag};

// =============================================================================
// TagValue
// =============================================================================

/// A decoded tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// BYTE or UNDEFINED data, kept opaque
    Bytes(Bytes),

    /// ASCII text, trimmed of surrounding whitespace and NUL bytes
    Ascii(String),

    /// SHORT, LONG, LONG8, IFD or IFD8 values
    Unsigned(Vec<u64>),

    /// SBYTE, SSHORT, SLONG or SLONG8 values
    Signed(Vec<i64>),

    /// RATIONAL values as `[numerator, denominator]`
    Rational(Vec<[u32; 2]>),

    /// SRATIONAL values as `[numerator, denominator]`
    SRational(Vec<[i32; 2]>),

    /// FLOAT or DOUBLE values
    Float(Vec<f64>),
}

impl TagValue {
    /// Number of elements held (characters for ASCII).
    pub fn len(&self) -> usize {
        match self {
            TagValue::Bytes(b) => b.len(),
            TagValue::Ascii(s) => s.chars().count(),
            TagValue::Unsigned(v) => v.len(),
            TagValue::Signed(v) => v.len(),
            TagValue::Rational(v) => v.len(),
            TagValue::SRational(v) => v.len(),
            TagValue::Float(v) => v.len(),
        }
    }

    /// Whether no elements are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First value as an unsigned integer.
    ///
    /// Works for BYTE, unsigned and non-negative signed values.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            TagValue::Bytes(b) => b.first().map(|&v| v as u64),
            TagValue::Unsigned(v) => v.first().copied(),
            TagValue::Signed(v) => v.first().and_then(|&v| u64::try_from(v).ok()),
            _ => None,
        }
    }

    /// All values as unsigned integers.
    pub fn to_u64_vec(&self) -> Option<Vec<u64>> {
        match self {
            TagValue::Bytes(b) => Some(b.iter().map(|&v| v as u64).collect()),
            TagValue::Unsigned(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Element `index` as an unsigned integer, for BYTE and unsigned values.
    pub fn unsigned_at(&self, index: usize) -> Option<u64> {
        match self {
            TagValue::Bytes(b) => b.get(index).map(|&v| v as u64),
            TagValue::Unsigned(v) => v.get(index).copied(),
            _ => None,
        }
    }

    /// Unsigned values, without copying.
    pub fn as_unsigned(&self) -> Option<&[u64]> {
        match self {
            TagValue::Unsigned(v) => Some(v),
            _ => None,
        }
    }

    /// All numeric values converted to f64.
    ///
    /// Rationals are divided out. Returns `None` for ASCII and opaque bytes.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            TagValue::Float(v) => Some(v.clone()),
            TagValue::Unsigned(v) => Some(v.iter().map(|&v| v as f64).collect()),
            TagValue::Signed(v) => Some(v.iter().map(|&v| v as f64).collect()),
            TagValue::Rational(v) => Some(v.iter().map(|[n, d]| *n as f64 / *d as f64).collect()),
            TagValue::SRational(v) => {
                Some(v.iter().map(|[n, d]| *n as f64 / *d as f64).collect())
            }
            TagValue::Bytes(_) | TagValue::Ascii(_) => None,
        }
    }

    /// Float values, without copying.
    pub fn as_f64_slice(&self) -> Option<&[f64]> {
        match self {
            TagValue::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Text of an ASCII value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// Raw bytes of a BYTE or UNDEFINED value.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            TagValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Name used for a tag id in error messages.
pub(crate) fn tag_name(tag: u16) -> &'static str {
    TiffTag::from_u16(tag).map_or("unknown", TiffTag::name)
}

/// Total byte length of `count` values of `field_type`.
pub(crate) fn value_byte_len(tag: u16, field_type: FieldType, count: u64) -> Result<usize, TiffError> {
    (field_type.size_in_bytes() as u64)
        .checked_mul(count)
        .and_then(|len| usize::try_from(len).ok())
        .ok_or_else(|| TiffError::InvalidTagValue {
            tag: tag_name(tag),
            message: format!("{} values of {:?} do not fit in memory", count, field_type),
        })
}

/// Decode `count` values of `field_type` from `bytes`.
///
/// `bytes` must hold at least `count * field_type.size_in_bytes()` bytes;
/// anything after that is ignored.
pub fn decode_value(
    tag: u16,
    field_type: FieldType,
    count: u64,
    bytes: &[u8],
) -> Result<TagValue, TiffError> {
    let len = value_byte_len(tag, field_type, count)?;
    if bytes.len() < len {
        return Err(TiffError::InvalidTagValue {
            tag: tag_name(tag),
            message: format!("expected {} bytes, got {}", len, bytes.len()),
        });
    }
    let bytes = &bytes[..len];
    let size = field_type.size_in_bytes();
    let elements = bytes.chunks_exact(size);

    let value = match field_type {
        FieldType::Byte | FieldType::Undefined => TagValue::Bytes(Bytes::copy_from_slice(bytes)),
        FieldType::Ascii => {
            // Every byte maps to one character
            let text: String = bytes.iter().map(|&b| b as char).collect();
            let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
            TagValue::Ascii(trimmed.to_string())
        }
        FieldType::Short => TagValue::Unsigned(elements.map(|b| read_u16_le(b) as u64).collect()),
        FieldType::Long | FieldType::Ifd => {
            TagValue::Unsigned(elements.map(|b| read_u32_le(b) as u64).collect())
        }
        FieldType::Long8 | FieldType::Ifd8 => TagValue::Unsigned(elements.map(read_u64_le).collect()),
        FieldType::SByte => TagValue::Signed(bytes.iter().map(|&b| b as i8 as i64).collect()),
        FieldType::SShort => {
            TagValue::Signed(elements.map(|b| read_u16_le(b) as i16 as i64).collect())
        }
        FieldType::SLong => {
            TagValue::Signed(elements.map(|b| read_u32_le(b) as i32 as i64).collect())
        }
        FieldType::SLong8 => TagValue::Signed(elements.map(|b| read_u64_le(b) as i64).collect()),
        FieldType::Rational => TagValue::Rational(
            elements
                .map(|b| [read_u32_le(b), read_u32_le(&b[4..])])
                .collect(),
        ),
        FieldType::SRational => TagValue::SRational(
            elements
                .map(|b| [read_u32_le(b) as i32, read_u32_le(&b[4..]) as i32])
                .collect(),
        ),
        FieldType::Float => TagValue::Float(
            elements
                .map(|b| f32::from_bits(read_u32_le(b)) as f64)
                .collect(),
        ),
        FieldType::Double => TagValue::Float(
            elements
                .map(|b| f64::from_bits(read_u64_le(b)))
                .collect(),
        ),
    };

    Ok(value)
}

/// Decode one unsigned element of an offset array.
///
/// Returns `None` if `field_type` is not an unsigned integer type or `bytes`
/// is too short.
pub fn decode_unsigned(field_type: FieldType, bytes: &[u8]) -> Option<u64> {
    if bytes.len() < field_type.size_in_bytes() {
        return None;
    }
    match field_type {
        FieldType::Byte => Some(bytes[0] as u64),
        FieldType::Short => Some(read_u16_le(bytes) as u64),
        FieldType::Long | FieldType::Ifd => Some(read_u32_le(bytes) as u64),
        FieldType::Long8 | FieldType::Ifd8 => Some(read_u64_le(bytes)),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
