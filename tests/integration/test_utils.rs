//! Test utilities for integration tests.
//!
//! This module provides a request-tracking reader and a builder for
//! little-endian TIFF/BigTIFF files laid out the way GDAL writes COGs:
//! header, optional ghost block, every IFD with its out-of-line values, then
//! the tile or strip data.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cog_streamer::error::IoError;
use cog_streamer::io::{clamp_read, RangeReader};

// =============================================================================
// Mock Range Reader with Request Tracking
// =============================================================================

/// A mock range reader that tracks all read requests.
///
/// Clones share their counters, so a clone can be handed to a `Tiff` or a
/// `ChunkedSource` while the test keeps watching.
#[derive(Clone)]
pub struct TrackingMockReader {
    data: Bytes,
    identifier: String,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(u64, usize)>>>,
}

impl TrackingMockReader {
    pub fn new(data: Vec<u8>, identifier: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(data),
            identifier: identifier.into(),
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn get_requests(&self) -> Vec<(u64, usize)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn reset_tracking(&self) {
        self.request_count.store(0, Ordering::SeqCst);
        self.requests.lock().unwrap().clear();
    }
}

#[async_trait]
impl RangeReader for TrackingMockReader {
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((offset, len));

        let len = clamp_read(offset, len, self.data.len() as u64)?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Tile Payloads
// =============================================================================

/// Deterministic, distinct bytes for block `index` of a `width` x `height` image.
pub fn block_payload(width: u32, height: u32, index: usize) -> Vec<u8> {
    let mut payload = format!("{}x{}:{}|", width, height, index).into_bytes();
    payload.extend((0..index % 13).map(|i| i as u8));
    payload
}

/// Minimal JPEGTables: SOI, a DQT segment, EOI.
pub fn test_jpeg_tables() -> Vec<u8> {
    vec![
        0xFF, 0xD8, // SOI
        0xFF, 0xDB, 0x00, 0x05, 0x00, 0x10, 0x20, // DQT
        0xFF, 0xD9, // EOI
    ]
}

/// Minimal abbreviated JPEG tile: SOI, a SOS segment with data, EOI.
pub fn test_jpeg_tile(fill: u8) -> Vec<u8> {
    vec![
        0xFF, 0xD8, // SOI
        0xFF, 0xDA, 0x00, 0x04, fill, fill, // SOS
        0xFF, 0xD9, // EOI
    ]
}

/// Standard GDAL ghost block for a COG with tile leaders.
pub const COG_GHOST: &str = "GDAL_STRUCTURAL_METADATA_SIZE=000140 bytes\n\
                             LAYOUT=IFDS_BEFORE_DATA\n\
                             BLOCK_ORDER=ROW_MAJOR\n\
                             BLOCK_LEADER=SIZE_AS_UINT4\n\
                             BLOCK_TRAILER=LAST_4_BYTES_REPEATED\n\
                             KNOWN_INCOMPATIBLE_EDITION=NO\n";

// =============================================================================
// Image Builder
// =============================================================================

/// Georeferencing written into an image.
#[derive(Clone)]
pub struct GeoReference {
    pub pixel_scale: [f64; 3],
    pub tie_point: [f64; 6],
    pub epsg: u16,
    pub citation: Option<String>,
}

/// Description of one IFD.
#[derive(Clone)]
pub struct ImageBuilder {
    width: u32,
    height: u32,
    tile_size: Option<u32>,
    rows_per_strip: u32,
    compression: u16,
    subfile_type: u32,
    blocks: Vec<Option<Vec<u8>>>,
    jpeg_tables: Option<Vec<u8>>,
    geo: Option<GeoReference>,
    no_data: Option<String>,
}

impl ImageBuilder {
    /// A tiled image with one generated payload per tile.
    pub fn tiled(width: u32, height: u32, tile_size: u32) -> Self {
        let count = (width.div_ceil(tile_size) * height.div_ceil(tile_size)) as usize;
        Self {
            width,
            height,
            tile_size: Some(tile_size),
            rows_per_strip: 0,
            compression: 1,
            subfile_type: 0,
            blocks: (0..count)
                .map(|i| Some(block_payload(width, height, i)))
                .collect(),
            jpeg_tables: None,
            geo: None,
            no_data: None,
        }
    }

    /// A striped image with one generated payload per strip.
    pub fn striped(width: u32, height: u32, rows_per_strip: u32) -> Self {
        let count = height.div_ceil(rows_per_strip) as usize;
        Self {
            tile_size: None,
            rows_per_strip,
            blocks: (0..count)
                .map(|i| Some(block_payload(width, height, i)))
                .collect(),
            ..Self::tiled(width, height, 16)
        }
    }

    /// Mark this image as a reduced-resolution overview.
    pub fn reduced(mut self) -> Self {
        self.subfile_type = 1;
        self
    }

    pub fn with_compression(mut self, compression: u16) -> Self {
        self.compression = compression;
        self
    }

    /// Replace the payload of block `index`; `None` makes it sparse.
    pub fn with_block(mut self, index: usize, data: Option<Vec<u8>>) -> Self {
        self.blocks[index] = data;
        self
    }

    /// Keep only the first `count` entries of the offset arrays.
    pub fn truncate_blocks(mut self, count: usize) -> Self {
        self.blocks.truncate(count);
        self
    }

    pub fn with_jpeg_tables(mut self, tables: Vec<u8>) -> Self {
        self.jpeg_tables = Some(tables);
        self
    }

    pub fn with_geo(mut self, geo: GeoReference) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_no_data(mut self, no_data: &str) -> Self {
        self.no_data = Some(no_data.to_string());
        self
    }

    fn entries(&self, bigtiff: bool) -> Vec<Entry> {
        let mut entries = vec![
            Entry::long(254, &[self.subfile_type]),
            Entry::long(256, &[self.width]),
            Entry::long(257, &[self.height]),
            Entry::short(258, &[8]),
            Entry::short(259, &[self.compression]),
            Entry::short(262, &[1]),
            Entry::short(277, &[1]),
        ];

        let count = self.blocks.len();
        let (offsets_tag, counts_tag) = match self.tile_size {
            Some(tile) => {
                entries.push(Entry::long(322, &[tile]));
                entries.push(Entry::long(323, &[tile]));
                (324, 325)
            }
            None => {
                entries.push(Entry::long(278, &[self.rows_per_strip]));
                (273, 279)
            }
        };
        // Filled in once the data layout is known
        entries.push(if bigtiff {
            Entry::long8(offsets_tag, &vec![0; count])
        } else {
            Entry::long(offsets_tag, &vec![0; count])
        });
        entries.push(Entry::long(counts_tag, &vec![0; count]));

        if let Some(ref tables) = self.jpeg_tables {
            entries.push(Entry::undefined(347, tables));
        }

        if let Some(ref geo) = self.geo {
            entries.push(Entry::double(33550, &geo.pixel_scale));
            entries.push(Entry::double(33922, &geo.tie_point));

            let mut keys = vec![1, 1, 0, 0, 1024, 0, 1, 1, 1025, 0, 1, 1];
            if let Some(ref citation) = geo.citation {
                let len = citation.chars().count() as u16 + 1;
                keys.extend_from_slice(&[1026, 34737, len, 0]);
                entries.push(Entry::ascii(34737, &format!("{}|", citation)));
            }
            keys.extend_from_slice(&[3072, 0, 1, geo.epsg]);
            keys[3] = (keys.len() as u16 - 4) / 4;
            entries.push(Entry::short(34735, &keys));
        }

        if let Some(ref no_data) = self.no_data {
            entries.push(Entry::ascii(42113, no_data));
        }

        entries.sort_by_key(|e| e.tag);
        entries
    }
}

// =============================================================================
// IFD Entries
// =============================================================================

struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    value: Vec<u8>,
}

impl Entry {
    fn short(tag: u16, values: &[u16]) -> Self {
        Self {
            tag,
            field_type: 3,
            count: values.len() as u64,
            value: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn long(tag: u16, values: &[u32]) -> Self {
        Self {
            tag,
            field_type: 4,
            count: values.len() as u64,
            value: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn long8(tag: u16, values: &[u64]) -> Self {
        Self {
            tag,
            field_type: 16,
            count: values.len() as u64,
            value: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn double(tag: u16, values: &[f64]) -> Self {
        Self {
            tag,
            field_type: 12,
            count: values.len() as u64,
            value: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn ascii(tag: u16, text: &str) -> Self {
        let mut value = text.as_bytes().to_vec();
        value.push(0);
        Self {
            tag,
            field_type: 2,
            count: value.len() as u64,
            value,
        }
    }

    fn undefined(tag: u16, bytes: &[u8]) -> Self {
        Self {
            tag,
            field_type: 7,
            count: bytes.len() as u64,
            value: bytes.to_vec(),
        }
    }
}

// =============================================================================
// TIFF File Builder
// =============================================================================

/// Builder for little-endian TIFF and BigTIFF test files.
#[derive(Default)]
pub struct TiffBuilder {
    bigtiff: bool,
    ghost: Option<String>,
    leaders: bool,
    images: Vec<ImageBuilder>,
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bigtiff(mut self, bigtiff: bool) -> Self {
        self.bigtiff = bigtiff;
        self
    }

    /// Write a ghost block between the header and the first IFD.
    pub fn with_ghost(mut self, ghost: &str) -> Self {
        self.ghost = Some(ghost.to_string());
        self
    }

    /// Precede every block with its byte count as a little-endian u32.
    pub fn with_leaders(mut self, leaders: bool) -> Self {
        self.leaders = leaders;
        self
    }

    pub fn add_image(mut self, image: ImageBuilder) -> Self {
        self.images.push(image);
        self
    }

    /// A 5-level pyramid from 1024x1024 down to 64x64 with 256x256 tiles.
    pub fn pyramid(bigtiff: bool) -> Self {
        let mut builder = Self::new().with_bigtiff(bigtiff);
        for level in 0..5 {
            let size = 1024 >> level;
            let image = ImageBuilder::tiled(size, size, 256);
            builder = builder.add_image(if level == 0 { image } else { image.reduced() });
        }
        builder
    }

    /// Build the file and return it with the file offset of every block.
    pub fn build_with_layout(self) -> (Vec<u8>, Vec<Vec<u64>>) {
        let header_size: u64 = if self.bigtiff { 16 } else { 8 };
        let pointer: u64 = if self.bigtiff { 8 } else { 4 };
        let count_size: u64 = if self.bigtiff { 8 } else { 2 };
        let entry_size: u64 = if self.bigtiff { 20 } else { 12 };
        let ghost = self.ghost.clone().unwrap_or_default().into_bytes();

        let mut images: Vec<Vec<Entry>> = self
            .images
            .iter()
            .map(|image| image.entries(self.bigtiff))
            .collect();

        // Directories and their out-of-line values
        let mut pos = header_size + ghost.len() as u64;
        let mut ifd_offsets = Vec::new();
        let mut value_offsets = Vec::new();
        for entries in &images {
            ifd_offsets.push(pos);
            pos += count_size + entries.len() as u64 * entry_size + pointer;
            let mut offsets = Vec::new();
            for entry in entries {
                if entry.value.len() as u64 > pointer {
                    offsets.push(Some(pos));
                    pos += entry.value.len() as u64;
                } else {
                    offsets.push(None);
                }
            }
            value_offsets.push(offsets);
        }

        // Block data
        let mut layout = Vec::new();
        for image in &self.images {
            let mut offsets = Vec::new();
            for block in &image.blocks {
                match block {
                    Some(data) => {
                        if self.leaders {
                            pos += 4;
                        }
                        offsets.push(pos);
                        pos += data.len() as u64;
                    }
                    None => offsets.push(0),
                }
            }
            layout.push(offsets);
        }

        for ((entries, image), offsets) in images.iter_mut().zip(&self.images).zip(&layout) {
            for entry in entries.iter_mut() {
                match entry.tag {
                    273 | 324 => {
                        entry.value = if self.bigtiff {
                            offsets.iter().flat_map(|v| v.to_le_bytes()).collect()
                        } else {
                            offsets.iter().flat_map(|&v| (v as u32).to_le_bytes()).collect()
                        };
                    }
                    279 | 325 => {
                        entry.value = image
                            .blocks
                            .iter()
                            .flat_map(|b| (b.as_ref().map_or(0, Vec::len) as u32).to_le_bytes())
                            .collect();
                    }
                    _ => {}
                }
            }
        }

        // Serialize
        let mut data = Vec::new();
        data.extend_from_slice(b"II");
        if self.bigtiff {
            data.extend_from_slice(&43u16.to_le_bytes());
            data.extend_from_slice(&8u16.to_le_bytes());
            data.extend_from_slice(&0u16.to_le_bytes());
        } else {
            data.extend_from_slice(&42u16.to_le_bytes());
        }
        let first_ifd = ifd_offsets.first().copied().unwrap_or(0);
        write_pointer(&mut data, first_ifd, self.bigtiff);
        data.extend_from_slice(&ghost);

        for (i, entries) in images.iter().enumerate() {
            assert_eq!(data.len() as u64, ifd_offsets[i]);
            write_pointer_sized(&mut data, entries.len() as u64, count_size);
            for (entry, value_offset) in entries.iter().zip(&value_offsets[i]) {
                data.extend_from_slice(&entry.tag.to_le_bytes());
                data.extend_from_slice(&entry.field_type.to_le_bytes());
                write_pointer(&mut data, entry.count, self.bigtiff);
                match value_offset {
                    Some(offset) => write_pointer(&mut data, *offset, self.bigtiff),
                    None => {
                        let mut slot = entry.value.clone();
                        slot.resize(pointer as usize, 0);
                        data.extend_from_slice(&slot);
                    }
                }
            }
            let next = ifd_offsets.get(i + 1).copied().unwrap_or(0);
            write_pointer(&mut data, next, self.bigtiff);

            for (entry, value_offset) in entries.iter().zip(&value_offsets[i]) {
                if value_offset.is_some() {
                    data.extend_from_slice(&entry.value);
                }
            }
        }

        for image in &self.images {
            for data_block in image.blocks.iter().flatten() {
                if self.leaders {
                    data.extend_from_slice(&(data_block.len() as u32).to_le_bytes());
                }
                data.extend_from_slice(data_block);
            }
        }

        (data, layout)
    }

    pub fn build(self) -> Vec<u8> {
        self.build_with_layout().0
    }
}

fn write_pointer(data: &mut Vec<u8>, value: u64, bigtiff: bool) {
    if bigtiff {
        data.extend_from_slice(&value.to_le_bytes());
    } else {
        data.extend_from_slice(&(value as u32).to_le_bytes());
    }
}

fn write_pointer_sized(data: &mut Vec<u8>, value: u64, size: u64) {
    if size == 8 {
        data.extend_from_slice(&value.to_le_bytes());
    } else {
        data.extend_from_slice(&(value as u16).to_le_bytes());
    }
}
