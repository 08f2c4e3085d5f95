//! IFD entries and their values.
//!
//! Each entry of an IFD becomes a [`Tag`] in one of three states:
//!
//! - **Inline**: the value was decoded while parsing the directory, either
//!   from the entry's own value slot or from bytes already fetched alongside
//!   the directory.
//! - **Lazy**: the value lives elsewhere in the file and is fetched on the
//!   first call to [`Tag::fetch`]. The result is memoized.
//! - **Offset**: a per-tile or per-strip array (TileOffsets, TileByteCounts,
//!   StripOffsets, StripByteCounts). Single elements can be read without
//!   fetching the whole array, and [`OffsetTag::load`] reads it in one go.
//!
//! # Inline Values
//!
//! When `count * type_size` fits in the pointer slot (4 bytes for TIFF, 8 for
//! BigTIFF) the slot holds the value itself, not an offset. Getting this
//! backwards silently produces garbage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::trace;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::TiffHeader;
use super::tags::{FieldType, TiffTag};
use super::values::{decode_unsigned, decode_value, value_byte_len, TagValue};

// =============================================================================
// TagInfo
// =============================================================================

/// The fixed part of an IFD entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo {
    /// Numeric tag id
    pub id: u16,
    /// Declared field type
    pub field_type: FieldType,
    /// Number of values
    pub count: u64,
    /// File offset of the value bytes (the value slot itself for inline values)
    pub data_offset: u64,
}

impl TagInfo {
    /// Total byte length of the value.
    pub fn byte_len(&self) -> Result<usize, TiffError> {
        value_byte_len(self.id, self.field_type, self.count)
    }

    /// The tag this entry describes, if it is a known one.
    pub fn tag(&self) -> Option<TiffTag> {
        TiffTag::from_u16(self.id)
    }
}

/// Read exactly the bytes of a value at `info.data_offset` and decode them.
async fn read_value<R: RangeReader + ?Sized>(
    info: &TagInfo,
    source: &R,
) -> Result<TagValue, TiffError> {
    let len = info.byte_len()?;
    trace!(
        source = source.identifier(),
        tag = info.id,
        offset = info.data_offset,
        len,
        "Fetching tag value"
    );
    let bytes = source.read_at(info.data_offset, len).await?;
    decode_value(info.id, info.field_type, info.count, &bytes)
}

// =============================================================================
// Tag
// =============================================================================

/// One IFD entry.
pub enum Tag {
    Inline(InlineTag),
    Lazy(LazyTag),
    Offset(OffsetTag),
}

/// A value decoded at parse time.
pub struct InlineTag {
    info: TagInfo,
    value: TagValue,
}

/// A value fetched on first use.
pub struct LazyTag {
    info: TagInfo,
    value: OnceCell<TagValue>,
}

/// A per-tile or per-strip array with per-index access.
pub struct OffsetTag {
    info: TagInfo,
    /// The whole array, once loaded
    loaded: OnceCell<TagValue>,
    /// Individually read elements
    elements: Mutex<HashMap<u64, Arc<OnceCell<u64>>>>,
}

impl Tag {
    /// Build a tag from one raw IFD entry.
    ///
    /// # Arguments
    /// * `entry` - The entry bytes (12 for TIFF, 20 for BigTIFF)
    /// * `entry_offset` - File offset of the entry
    /// * `header` - The file header, for field widths
    /// * `window_start` - File offset of `window`
    /// * `window` - Bytes already fetched around the directory
    ///
    /// # Errors
    /// - `UnknownFieldType` if the entry's type is not a TIFF type
    /// - `InvalidTagValue` if the entry is truncated or its size overflows
    pub fn from_entry(
        entry: &[u8],
        entry_offset: u64,
        header: &TiffHeader,
        window_start: u64,
        window: &[u8],
    ) -> Result<Self, TiffError> {
        let pointer = header.pointer_size();
        // The count field is as wide as a pointer in both flavours
        let count_size = pointer;
        if entry.len() < 4 + count_size + pointer {
            return Err(TiffError::InvalidTagValue {
                tag: "IFD entry",
                message: format!("entry at offset {} is truncated", entry_offset),
            });
        }

        let id = u16::from_le_bytes([entry[0], entry[1]]);
        let raw_type = u16::from_le_bytes([entry[2], entry[3]]);
        let field_type = FieldType::from_u16(raw_type).ok_or(TiffError::UnknownFieldType(raw_type))?;
        let count = header.read_pointer(&entry[4..]);
        let slot_start = 4 + count_size;
        let slot = &entry[slot_start..slot_start + pointer];

        let len = value_byte_len(id, field_type, count)?;
        let is_offset_array = TiffTag::from_u16(id).is_some_and(TiffTag::is_offset_array);

        if field_type.fits_inline(count, header.is_bigtiff()) {
            let info = TagInfo {
                id,
                field_type,
                count,
                data_offset: entry_offset + slot_start as u64,
            };
            let value = decode_value(id, field_type, count, slot)?;
            return Ok(if is_offset_array {
                Tag::Offset(OffsetTag::loaded(info, value))
            } else {
                Tag::Inline(InlineTag { info, value })
            });
        }

        let info = TagInfo {
            id,
            field_type,
            count,
            data_offset: header.read_pointer(slot),
        };

        // Use the value right away if the directory fetch already covered it
        let resident = info
            .data_offset
            .checked_sub(window_start)
            .and_then(|start| usize::try_from(start).ok())
            .and_then(|start| window.get(start..start.checked_add(len)?));

        Ok(match (resident, is_offset_array) {
            (Some(bytes), true) => {
                let value = decode_value(id, field_type, count, bytes)?;
                Tag::Offset(OffsetTag::loaded(info, value))
            }
            (Some(bytes), false) => {
                let value = decode_value(id, field_type, count, bytes)?;
                Tag::Inline(InlineTag { info, value })
            }
            (None, true) => Tag::Offset(OffsetTag::new(info)),
            (None, false) => Tag::Lazy(LazyTag {
                info,
                value: OnceCell::new(),
            }),
        })
    }

    /// The fixed part of the entry.
    pub fn info(&self) -> &TagInfo {
        match self {
            Tag::Inline(tag) => &tag.info,
            Tag::Lazy(tag) => &tag.info,
            Tag::Offset(tag) => &tag.info,
        }
    }

    /// Numeric tag id.
    pub fn id(&self) -> u16 {
        self.info().id
    }

    /// Number of values.
    pub fn count(&self) -> u64 {
        self.info().count
    }

    /// The value, if it is resident. Never performs I/O.
    ///
    /// For offset tags this is only available after a full load.
    pub fn value(&self) -> Option<&TagValue> {
        match self {
            Tag::Inline(tag) => Some(&tag.value),
            Tag::Lazy(tag) => tag.value.get(),
            Tag::Offset(tag) => tag.loaded.get(),
        }
    }

    /// Whether [`Tag::value`] would return a value.
    pub fn is_loaded(&self) -> bool {
        self.value().is_some()
    }

    /// The value, fetching it if needed.
    ///
    /// Concurrent callers share one fetch; later callers get the memoized
    /// value without I/O.
    pub async fn fetch<R: RangeReader + ?Sized>(&self, source: &R) -> Result<&TagValue, TiffError> {
        match self {
            Tag::Inline(tag) => Ok(&tag.value),
            Tag::Lazy(tag) => {
                tag.value
                    .get_or_try_init(|| read_value(&tag.info, source))
                    .await
            }
            Tag::Offset(tag) => tag.load(source).await,
        }
    }

    /// The offset-array view of this tag, if it is one.
    pub fn as_offset(&self) -> Option<&OffsetTag> {
        match self {
            Tag::Offset(tag) => Some(tag),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Tag::Inline(_) => "Inline",
            Tag::Lazy(_) => "Lazy",
            Tag::Offset(_) => "Offset",
        };
        f.debug_struct(kind)
            .field("info", self.info())
            .field("value", &self.value())
            .finish()
    }
}

// =============================================================================
// OffsetTag
// =============================================================================

impl OffsetTag {
    fn new(info: TagInfo) -> Self {
        Self {
            info,
            loaded: OnceCell::new(),
            elements: Mutex::new(HashMap::new()),
        }
    }

    fn loaded(info: TagInfo, value: TagValue) -> Self {
        Self {
            info,
            loaded: OnceCell::new_with(Some(value)),
            elements: Mutex::new(HashMap::new()),
        }
    }

    /// The fixed part of the entry.
    pub fn info(&self) -> &TagInfo {
        &self.info
    }

    /// Whether the whole array is resident.
    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    /// Read the whole array in a single request.
    pub async fn load<R: RangeReader + ?Sized>(&self, source: &R) -> Result<&TagValue, TiffError> {
        self.loaded
            .get_or_try_init(|| read_value(&self.info, source))
            .await
    }

    fn check_index(&self, index: u64) -> Result<(), TiffError> {
        if index >= self.info.count {
            return Err(TiffError::TagIndexOutOfBounds {
                tag: self.info.id,
                index,
                count: self.info.count,
            });
        }
        Ok(())
    }

    fn element_cell(&self, index: u64) -> Arc<OnceCell<u64>> {
        let mut elements = self.elements.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(elements.entry(index).or_default())
    }

    fn loaded_element(&self, index: u64) -> Result<Option<u64>, TiffError> {
        let Some(value) = self.loaded.get() else {
            return Ok(None);
        };
        // Same types as the per-element path: BYTE and the unsigned integers
        let element = match self.info.field_type {
            FieldType::Undefined => None,
            _ => value.unsigned_at(index as usize),
        };
        element
            .map(Some)
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: super::values::tag_name(self.info.id),
                message: format!("expected unsigned values, got {:?}", self.info.field_type),
            })
    }

    /// Element `index`, if it is resident. Never performs I/O.
    ///
    /// # Errors
    /// `TagIndexOutOfBounds` if `index` is past the end of the array.
    pub fn value_at_sync(&self, index: u64) -> Result<Option<u64>, TiffError> {
        self.check_index(index)?;
        if let Some(value) = self.loaded_element(index)? {
            return Ok(Some(value));
        }
        let elements = self.elements.lock().unwrap_or_else(|e| e.into_inner());
        Ok(elements.get(&index).and_then(|cell| cell.get().copied()))
    }

    /// Element `index`, reading just that element if the array is not loaded.
    ///
    /// # Errors
    /// `TagIndexOutOfBounds` if `index` is past the end of the array.
    pub async fn value_at<R: RangeReader + ?Sized>(
        &self,
        index: u64,
        source: &R,
    ) -> Result<u64, TiffError> {
        self.check_index(index)?;
        if let Some(value) = self.loaded_element(index)? {
            return Ok(value);
        }

        let cell = self.element_cell(index);
        let value = cell
            .get_or_try_init(|| async {
                let size = self.info.field_type.size_in_bytes();
                let offset = self.info.data_offset + index * size as u64;
                trace!(
                    source = source.identifier(),
                    tag = self.info.id,
                    index,
                    "Fetching offset array element"
                );
                let bytes = source.read_at(offset, size).await?;
                decode_unsigned(self.info.field_type, &bytes).ok_or_else(|| {
                    TiffError::InvalidTagValue {
                        tag: super::values::tag_name(self.info.id),
                        message: format!(
                            "cannot read element {} as {:?}",
                            index, self.info.field_type
                        ),
                    }
                })
            })
            .await?;
        Ok(*value)
    }
}

// =============================================================================
// Tests
// =============================================================================
