//! GeoKey directory unpacking.
//!
//! The GeoKeyDirectory tag is an array of SHORTs:
//!
//! ```text
//! [KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys]
//! then NumberOfKeys x [KeyID, TIFFTagLocation, Count, Value_Offset]
//! ```
//!
//! A location of 0 means `Value_Offset` is the value itself. Otherwise the
//! value is `Count` elements starting at `Value_Offset` inside the tag named
//! by the location: GeoDoubleParams, GeoAsciiParams or the directory itself.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::error::TiffError;

use super::tags::TiffTag;

/// Placeholder code for "user-defined" in GeoTIFF.
pub const USER_DEFINED: u16 = 32767;

// =============================================================================
// GeoKey ids
// =============================================================================

/// GeoKey ids understood by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum GeoKey {
    ModelType = 1024,
    RasterType = 1025,
    Citation = 1026,
    GeographicType = 2048,
    GeogCitation = 2049,
    GeogGeodeticDatum = 2050,
    GeogAngularUnits = 2054,
    ProjectedCSType = 3072,
    PCSCitation = 3073,
    Projection = 3074,
    ProjLinearUnits = 3076,
    VerticalCSType = 4096,
    VerticalUnits = 4099,
}

impl GeoKey {
    /// Create a GeoKey from its numeric id.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1024 => Some(GeoKey::ModelType),
            1025 => Some(GeoKey::RasterType),
            1026 => Some(GeoKey::Citation),
            2048 => Some(GeoKey::GeographicType),
            2049 => Some(GeoKey::GeogCitation),
            2050 => Some(GeoKey::GeogGeodeticDatum),
            2054 => Some(GeoKey::GeogAngularUnits),
            3072 => Some(GeoKey::ProjectedCSType),
            3073 => Some(GeoKey::PCSCitation),
            3074 => Some(GeoKey::Projection),
            3076 => Some(GeoKey::ProjLinearUnits),
            4096 => Some(GeoKey::VerticalCSType),
            4099 => Some(GeoKey::VerticalUnits),
            _ => None,
        }
    }

    /// Get the numeric key id.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// GeoKey values
// =============================================================================

/// The value of one GeoKey.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GeoKeyValue {
    /// Value stored directly in the key entry
    Short(u16),
    /// Values sliced from the directory itself
    Shorts(Vec<u16>),
    /// Values sliced from GeoDoubleParams
    Doubles(Vec<f64>),
    /// Text sliced from GeoAsciiParams, without its `|` terminator
    Ascii(String),
}

impl GeoKeyValue {
    /// The value as a single SHORT.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            GeoKeyValue::Short(v) => Some(*v),
            GeoKeyValue::Shorts(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// The value as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GeoKeyValue::Ascii(s) => Some(s),
            _ => None,
        }
    }
}

/// All GeoKeys of an image, keyed by numeric id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeoKeys {
    keys: BTreeMap<u16, GeoKeyValue>,
}

impl GeoKeys {
    /// Value of a known key.
    pub fn get(&self, key: GeoKey) -> Option<&GeoKeyValue> {
        self.keys.get(&key.as_u16())
    }

    /// Value of any key by numeric id.
    pub fn get_raw(&self, id: u16) -> Option<&GeoKeyValue> {
        self.keys.get(&id)
    }

    /// Iterate over all keys in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &GeoKeyValue)> {
        self.keys.iter().map(|(id, value)| (*id, value))
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether there are no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// =============================================================================
// Unpacking
// =============================================================================

fn invalid(message: String) -> TiffError {
    TiffError::InvalidTagValue {
        tag: TiffTag::GeoKeyDirectory.name(),
        message,
    }
}

fn slice<T>(values: &[T], offset: usize, count: usize, source: TiffTag) -> Result<&[T], TiffError> {
    offset
        .checked_add(count)
        .and_then(|end| values.get(offset..end))
        .ok_or_else(|| {
            invalid(format!(
                "{} values at {} exceed {} ({} values)",
                count,
                offset,
                source.name(),
                values.len()
            ))
        })
}

/// Unpack a GeoKey directory.
///
/// # Arguments
/// * `directory` - The GeoKeyDirectory values
/// * `doubles` - The GeoDoubleParams values, if the tag is present
/// * `ascii` - The GeoAsciiParams text, if the tag is present
///
/// # Errors
/// `InvalidTagValue` if the directory is truncated or a key points outside
/// the referenced tag. Keys stored in other tags are skipped with a warning.
pub fn unpack_geo_keys(
    directory: &[u64],
    doubles: Option<&[f64]>,
    ascii: Option<&str>,
) -> Result<GeoKeys, TiffError> {
    if directory.len() < 4 {
        return Err(invalid(format!(
            "header needs 4 values, got {}",
            directory.len()
        )));
    }

    let key_count = directory[3] as usize;
    let entries = slice(directory, 4, key_count * 4, TiffTag::GeoKeyDirectory)?;
    let ascii_chars: Option<Vec<char>> = ascii.map(|s| s.chars().collect());

    let mut keys = BTreeMap::new();
    for entry in entries.chunks_exact(4) {
        let id = entry[0] as u16;
        let location = entry[1] as u16;
        let count = entry[2] as usize;
        let offset = entry[3] as usize;

        let value = match TiffTag::from_u16(location) {
            _ if location == 0 => GeoKeyValue::Short(entry[3] as u16),
            Some(TiffTag::GeoDoubleParams) => {
                let doubles = doubles.ok_or(TiffError::MissingTag("GeoDoubleParams"))?;
                let values = slice(doubles, offset, count, TiffTag::GeoDoubleParams)?;
                GeoKeyValue::Doubles(values.to_vec())
            }
            Some(TiffTag::GeoAsciiParams) => {
                let chars = ascii_chars
                    .as_deref()
                    .ok_or(TiffError::MissingTag("GeoAsciiParams"))?;
                let text: String = slice(chars, offset, count, TiffTag::GeoAsciiParams)?
                    .iter()
                    .collect();
                let text = text.strip_suffix('|').unwrap_or(&text);
                GeoKeyValue::Ascii(text.to_string())
            }
            Some(TiffTag::GeoKeyDirectory) => {
                let values = slice(directory, offset, count, TiffTag::GeoKeyDirectory)?;
                GeoKeyValue::Shorts(values.iter().map(|&v| v as u16).collect())
            }
            _ => {
                warn!(key = id, location, "Skipping GeoKey stored in an unsupported tag");
                continue;
            }
        };
        keys.insert(id, value);
    }

    Ok(GeoKeys { keys })
}
