//! One image (IFD) of a TIFF file.
//!
//! A [`TiffImage`] owns the tags of its directory and answers questions about
//! the image: its size, its tile or strip layout, where it sits on the earth
//! and where each tile's bytes live in the file.
//!
//! # Tile Locations
//!
//! A tile is located by its entry in TileOffsets and TileByteCounts. Files
//! written by GDAL with `BLOCK_LEADER=SIZE_AS_UINT4` also store each tile's
//! byte count in the 4 bytes right before the tile, so a single offset
//! lookup plus one small read replaces the TileByteCounts lookup when that
//! array is not resident. An offset or byte count of 0 marks a sparse tile
//! that was never written.
//!
//! # Georeferencing
//!
//! Origin and resolution come from ModelTiePoint with ModelPixelScale, or
//! from ModelTransformation. Overviews (reduced-resolution images) usually
//! carry neither and inherit the values of image 0, scaled by the size ratio.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::error::{IoError, TiffError};
use crate::format::jpeg::reattach_jpeg_tables;
use crate::io::{read_u32_le, RangeReader};

use super::geokeys::{unpack_geo_keys, GeoKey, GeoKeys, USER_DEFINED};
use super::tag::{OffsetTag, Tag};
use super::tags::{Compression, TiffTag, SUBFILE_REDUCED_IMAGE};
use super::values::TagValue;

// =============================================================================
// Value Types
// =============================================================================

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageSize {
    pub width: u64,
    pub height: u64,
}

/// Number of tiles along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridSize {
    pub x: u64,
    pub y: u64,
}

/// Pixel rectangle covered by one tile, clipped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileBounds {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

/// Where a tile or strip lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLocation {
    pub offset: u64,
    pub byte_count: u64,
}

/// Encoded bytes of one tile or strip.
#[derive(Debug, Clone, PartialEq)]
pub struct TileBytes {
    /// Mime type derived from the image compression
    pub mime_type: &'static str,
    /// The encoded data, with JPEG tables reattached when needed
    pub bytes: Bytes,
}

/// Georeferencing of image 0, inherited by reduced-resolution images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RootGeo {
    origin: [f64; 3],
    resolution: [f64; 3],
    size: ImageSize,
    epsg: Option<u16>,
}

// =============================================================================
// TiffImage
// =============================================================================

/// A single image of a TIFF file.
pub struct TiffImage<R: ?Sized> {
    id: usize,
    source: Arc<R>,
    tags: HashMap<u16, Tag>,
    /// Size of the byte-count leader before each tile, when it can be trusted
    tile_leader: Option<usize>,
    root: Option<RootGeo>,
    geo_keys: OnceLock<GeoKeys>,
}

impl<R: RangeReader + ?Sized> TiffImage<R> {
    /// Create an image from the tags of one directory.
    pub(crate) fn new(
        id: usize,
        source: Arc<R>,
        tags: HashMap<u16, Tag>,
        tile_leader: Option<usize>,
    ) -> Self {
        Self {
            id,
            source,
            tags,
            tile_leader,
            root: None,
            geo_keys: OnceLock::new(),
        }
    }

    /// Fetch the tags most accessors need.
    ///
    /// All fetches run concurrently, so over a chunked source they usually
    /// collapse into one or two requests. With `load_geo_tags` the GeoKey
    /// directory is fetched and unpacked as well.
    pub async fn init(&self, load_geo_tags: bool) -> Result<(), TiffError> {
        let (_, _, _, _, _, _, _, _, directory, ascii, doubles) = tokio::try_join!(
            self.fetch(TiffTag::Compression),
            self.fetch(TiffTag::ImageWidth),
            self.fetch(TiffTag::ImageLength),
            self.fetch(TiffTag::ModelPixelScale),
            self.fetch(TiffTag::ModelTiePoint),
            self.fetch(TiffTag::ModelTransformation),
            self.fetch(TiffTag::TileWidth),
            self.fetch(TiffTag::TileLength),
            self.fetch_if(load_geo_tags, TiffTag::GeoKeyDirectory),
            self.fetch_if(load_geo_tags, TiffTag::GeoAsciiParams),
            self.fetch_if(load_geo_tags, TiffTag::GeoDoubleParams),
        )?;

        if let Some(directory) = directory {
            let directory = directory
                .as_unsigned()
                .ok_or_else(|| TiffError::InvalidTagValue {
                    tag: TiffTag::GeoKeyDirectory.name(),
                    message: "expected SHORT values".to_string(),
                })?;
            let keys = unpack_geo_keys(
                directory,
                doubles.and_then(TagValue::as_f64_slice),
                ascii.and_then(TagValue::as_str),
            )?;
            debug!(image = self.id, keys = keys.len(), "Unpacked GeoKeys");
            // A second init keeps the first result
            let _ = self.geo_keys.set(keys);
        }

        Ok(())
    }

    async fn fetch_if(&self, enabled: bool, tag: TiffTag) -> Result<Option<&TagValue>, TiffError> {
        if enabled {
            self.fetch(tag).await
        } else {
            Ok(None)
        }
    }

    pub(crate) fn set_root(&mut self, root: Option<RootGeo>) {
        self.root = root;
    }

    // -------------------------------------------------------------------------
    // Tags
    // -------------------------------------------------------------------------

    /// Zero-based index of this image in the file.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The source the image reads from.
    pub fn source(&self) -> &Arc<R> {
        &self.source
    }

    /// Raw tag by numeric id.
    pub fn tag(&self, id: u16) -> Option<&Tag> {
        self.tags.get(&id)
    }

    /// Iterate over all tags of the image.
    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    /// Whether the directory contains `tag`.
    pub fn has_tag(&self, tag: TiffTag) -> bool {
        self.tags.contains_key(&tag.as_u16())
    }

    /// Resident value of a tag, without I/O.
    ///
    /// Returns `Ok(None)` if the image has no such tag.
    ///
    /// # Errors
    /// `TagNotLoaded` if the tag exists but its value has not been fetched.
    pub fn tag_value(&self, tag: TiffTag) -> Result<Option<&TagValue>, TiffError> {
        match self.tags.get(&tag.as_u16()) {
            None => Ok(None),
            Some(entry) => entry
                .value()
                .map(Some)
                .ok_or(TiffError::TagNotLoaded(tag.as_u16())),
        }
    }

    /// Value of a tag, fetching it if needed.
    pub async fn fetch(&self, tag: TiffTag) -> Result<Option<&TagValue>, TiffError> {
        match self.tags.get(&tag.as_u16()) {
            None => Ok(None),
            Some(entry) => entry.fetch(self.source.as_ref()).await.map(Some),
        }
    }

    fn required_u64(&self, tag: TiffTag) -> Result<u64, TiffError> {
        self.tag_value(tag)?
            .ok_or(TiffError::MissingTag(tag.name()))?
            .as_u64()
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: tag.name(),
                message: "expected an unsigned integer".to_string(),
            })
    }

    fn f64_values(&self, tag: TiffTag) -> Result<Option<Vec<f64>>, TiffError> {
        Ok(self.tag_value(tag)?.and_then(TagValue::to_f64_vec))
    }

    fn offset_tag(&self, tag: TiffTag) -> Result<&OffsetTag, TiffError> {
        let entry = self
            .tags
            .get(&tag.as_u16())
            .ok_or(TiffError::MissingTag(tag.name()))?;
        entry.as_offset().ok_or_else(|| TiffError::InvalidTagValue {
            tag: tag.name(),
            message: "not an offset array".to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Geometry
    // -------------------------------------------------------------------------

    /// Image dimensions in pixels.
    pub fn size(&self) -> Result<ImageSize, TiffError> {
        Ok(ImageSize {
            width: self.required_u64(TiffTag::ImageWidth)?,
            height: self.required_u64(TiffTag::ImageLength)?,
        })
    }

    /// Whether the image is organized in tiles rather than strips.
    pub fn is_tiled(&self) -> bool {
        self.has_tag(TiffTag::TileWidth) && self.has_tag(TiffTag::TileOffsets)
    }

    /// Tile dimensions in pixels.
    ///
    /// # Errors
    /// `NotTiled` for striped images.
    pub fn tile_size(&self) -> Result<ImageSize, TiffError> {
        if !self.is_tiled() {
            return Err(TiffError::NotTiled(self.id));
        }
        let width = self.required_u64(TiffTag::TileWidth)?;
        let height = self.required_u64(TiffTag::TileLength)?;
        if width == 0 || height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::TileWidth.name(),
                message: format!("tile size {}x{} is empty", width, height),
            });
        }
        Ok(ImageSize { width, height })
    }

    /// Number of tiles along each axis, counting partial edge tiles.
    pub fn tile_count(&self) -> Result<GridSize, TiffError> {
        let size = self.size()?;
        let tile = self.tile_size()?;
        Ok(GridSize {
            x: size.width.div_ceil(tile.width),
            y: size.height.div_ceil(tile.height),
        })
    }

    /// Pixel rectangle of tile (x, y), clipped to the image edge.
    pub fn tile_bounds(&self, x: u64, y: u64) -> Result<TileBounds, TiffError> {
        self.check_tile(x, y)?;
        let size = self.size()?;
        let tile = self.tile_size()?;

        let left = x * tile.width;
        let top = y * tile.height;
        Ok(TileBounds {
            x: left,
            y: top,
            width: tile.width.min(size.width - left),
            height: tile.height.min(size.height - top),
        })
    }

    /// Number of strips declared by StripOffsets, 0 for tiled images.
    pub fn strip_count(&self) -> u64 {
        self.tags
            .get(&TiffTag::StripOffsets.as_u16())
            .map(Tag::count)
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    /// Compression scheme; `None` if the code is not a known one.
    ///
    /// A missing Compression tag means uncompressed.
    pub fn compression(&self) -> Result<Option<Compression>, TiffError> {
        let code = match self.tag_value(TiffTag::Compression)? {
            Some(value) => value.as_u64().unwrap_or(0),
            None => Compression::None as u64,
        };
        Ok(u16::try_from(code).ok().and_then(Compression::from_u16))
    }

    /// Mime type of the encoded tiles.
    pub fn mime_type(&self) -> Result<&'static str, TiffError> {
        Ok(self
            .compression()?
            .map(Compression::mime_type)
            .unwrap_or("application/octet-stream"))
    }

    /// NewSubfileType bits, 0 if absent.
    pub fn subfile_type(&self) -> Result<u64, TiffError> {
        Ok(self
            .tag_value(TiffTag::SubFileType)?
            .and_then(TagValue::as_u64)
            .unwrap_or(0))
    }

    /// Whether this is a reduced-resolution version of image 0.
    ///
    /// Only the reduced-image bit is tested, so mask overviews (5) count too.
    pub fn is_reduced_image(&self) -> bool {
        self.id > 0
            && self
                .subfile_type()
                .is_ok_and(|bits| bits & SUBFILE_REDUCED_IMAGE != 0)
    }

    /// GDAL no-data value, if set.
    pub async fn no_data(&self) -> Result<Option<f64>, TiffError> {
        let Some(value) = self.fetch(TiffTag::GdalNoData).await? else {
            return Ok(None);
        };
        let text = value.as_str().unwrap_or_default();
        match text.parse::<f64>() {
            Ok(v) => Ok(Some(v)),
            Err(_) if text.eq_ignore_ascii_case("nan") => Ok(Some(f64::NAN)),
            Err(e) => Err(TiffError::InvalidTagValue {
                tag: TiffTag::GdalNoData.name(),
                message: format!("{:?}: {}", text, e),
            }),
        }
    }

    /// GDAL metadata XML, if present.
    pub async fn gdal_metadata(&self) -> Result<Option<String>, TiffError> {
        Ok(self
            .fetch(TiffTag::GdalMetadata)
            .await?
            .and_then(TagValue::as_str)
            .map(str::to_string))
    }

    // -------------------------------------------------------------------------
    // Georeferencing
    // -------------------------------------------------------------------------

    /// Unpacked GeoKeys, if the image has a GeoKey directory and geo tags
    /// were loaded.
    pub fn geo_keys(&self) -> Option<&GeoKeys> {
        self.geo_keys.get()
    }

    /// Model coordinates of the top-left corner of the image.
    ///
    /// # Errors
    /// `MissingGeoTransform` if neither the image nor, for overviews, image 0
    /// is georeferenced.
    pub fn origin(&self) -> Result<[f64; 3], TiffError> {
        if let Some(tie) = self.f64_values(TiffTag::ModelTiePoint)? {
            if tie.len() >= 6 {
                return Ok([tie[3], tie[4], tie[5]]);
            }
        }
        if let Some(matrix) = self.f64_values(TiffTag::ModelTransformation)? {
            if matrix.len() >= 16 {
                return Ok([matrix[3], matrix[7], matrix[11]]);
            }
        }
        match self.inherited_root() {
            Some(root) => Ok(root.origin),
            None => Err(TiffError::MissingGeoTransform(self.id)),
        }
    }

    /// Size of one pixel in model units. Y is negative for north-up images.
    pub fn resolution(&self) -> Result<[f64; 3], TiffError> {
        if let Some(scale) = self.f64_values(TiffTag::ModelPixelScale)? {
            if scale.len() >= 3 {
                return Ok([scale[0], -scale[1], scale[2]]);
            }
        }
        if let Some(matrix) = self.f64_values(TiffTag::ModelTransformation)? {
            if matrix.len() >= 16 {
                return Ok([matrix[0], matrix[5], matrix[10]]);
            }
        }
        let Some(root) = self.inherited_root() else {
            return Err(TiffError::MissingGeoTransform(self.id));
        };
        let size = self.size()?;
        if size.width == 0 || size.height == 0 {
            return Err(TiffError::MissingGeoTransform(self.id));
        }
        Ok([
            root.resolution[0] * root.size.width as f64 / size.width as f64,
            root.resolution[1] * root.size.height as f64 / size.height as f64,
            root.resolution[2],
        ])
    }

    /// Bounding box as `[min_x, min_y, max_x, max_y]`.
    pub fn bbox(&self) -> Result<[f64; 4], TiffError> {
        let origin = self.origin()?;
        let resolution = self.resolution()?;
        let size = self.size()?;

        let x1 = origin[0];
        let y1 = origin[1];
        let x2 = x1 + resolution[0] * size.width as f64;
        let y2 = y1 + resolution[1] * size.height as f64;
        Ok([x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)])
    }

    /// EPSG code of the projected or geographic CRS.
    ///
    /// User-defined (32767) codes give `None`.
    pub fn epsg(&self) -> Option<u16> {
        let own = self.geo_keys().and_then(|keys| {
            keys.get(GeoKey::ProjectedCSType)
                .or_else(|| keys.get(GeoKey::GeographicType))
                .and_then(|value| value.as_u16())
        });
        match own {
            Some(USER_DEFINED) => None,
            Some(code) => Some(code),
            None => self.inherited_root().and_then(|root| root.epsg),
        }
    }

    /// Whether origin and resolution can be resolved.
    pub fn is_geo_located(&self) -> bool {
        self.origin().is_ok() && self.resolution().is_ok()
    }

    fn inherited_root(&self) -> Option<&RootGeo> {
        if self.is_reduced_image() {
            self.root.as_ref()
        } else {
            None
        }
    }

    /// Snapshot of this image's georeferencing for its overviews.
    pub(crate) fn root_geo(&self) -> Option<RootGeo> {
        Some(RootGeo {
            origin: self.origin().ok()?,
            resolution: self.resolution().ok()?,
            size: self.size().ok()?,
            epsg: self.epsg(),
        })
    }

    // -------------------------------------------------------------------------
    // Tiles and Strips
    // -------------------------------------------------------------------------

    fn check_tile(&self, x: u64, y: u64) -> Result<GridSize, TiffError> {
        let grid = self.tile_count()?;
        if x >= grid.x || y >= grid.y {
            return Err(TiffError::TileOutOfBounds {
                x,
                y,
                tiles_x: grid.x,
                tiles_y: grid.y,
            });
        }
        Ok(grid)
    }

    fn tile_index(&self, x: u64, y: u64) -> Result<u64, TiffError> {
        let grid = self.check_tile(x, y)?;
        let index = y * grid.x + x;
        let count = self.offset_tag(TiffTag::TileOffsets)?.info().count;
        if index >= count {
            return Err(TiffError::TileIndexOutOfBounds { index, count });
        }
        Ok(index)
    }

    /// Byte location of the tile with linear index `index`.
    ///
    /// Resident TileOffsets and TileByteCounts entries are used directly.
    /// Otherwise the tile leader is read if the file has one, or the two
    /// entries are fetched. Returns `None` for sparse tiles.
    pub async fn get_tile_size(&self, index: u64) -> Result<Option<TileLocation>, TiffError> {
        let offsets = self.offset_tag(TiffTag::TileOffsets)?;
        let counts = self.offset_tag(TiffTag::TileByteCounts);

        // Resident arrays answer without I/O, leader or not
        if let Ok(counts) = counts {
            if let (Some(offset), Some(byte_count)) =
                (offsets.value_at_sync(index)?, counts.value_at_sync(index)?)
            {
                return Ok(located(offset, byte_count));
            }
        }

        if let Some(leader) = self.tile_leader {
            let offset = offsets.value_at(index, self.source.as_ref()).await?;
            if offset == 0 {
                return Ok(None);
            }
            if offset < leader as u64 {
                return Err(TiffError::InvalidTagValue {
                    tag: TiffTag::TileOffsets.name(),
                    message: format!("tile {} at offset {} has no room for a leader", index, offset),
                });
            }
            let bytes = self.source.read_at(offset - leader as u64, leader).await?;
            if bytes.len() < 4 {
                return Err(IoError::RangeOutOfBounds {
                    offset: offset - leader as u64,
                    requested: leader as u64,
                    size: offset - leader as u64 + bytes.len() as u64,
                }
                .into());
            }
            return Ok(located(offset, read_u32_le(&bytes) as u64));
        }

        locate(offsets, counts?, index, self.source.as_ref()).await
    }

    /// Whether tile (x, y) holds data. Reads no pixel data.
    pub async fn has_tile(&self, x: u64, y: u64) -> Result<bool, TiffError> {
        let index = self.tile_index(x, y)?;
        Ok(self.get_tile_size(index).await?.is_some())
    }

    /// Encoded bytes of tile (x, y), or `None` for a sparse tile.
    ///
    /// JPEG tiles come back as complete streams with the shared tables
    /// reattached.
    ///
    /// # Errors
    /// - `TileOutOfBounds` if (x, y) is outside the tile grid
    /// - `TileIndexOutOfBounds` if the grid is larger than TileOffsets
    pub async fn get_tile(&self, x: u64, y: u64) -> Result<Option<TileBytes>, TiffError> {
        let index = self.tile_index(x, y)?;
        let Some(location) = self.get_tile_size(index).await? else {
            debug!(image = self.id, x, y, "Sparse tile");
            return Ok(None);
        };
        self.read_block(location).await.map(Some)
    }

    /// Encoded bytes of strip `index`, or `None` for an empty strip.
    ///
    /// # Errors
    /// `StripOutOfBounds` if `index` is past the end of StripOffsets.
    pub async fn get_strip(&self, index: u64) -> Result<Option<TileBytes>, TiffError> {
        let offsets = self.offset_tag(TiffTag::StripOffsets)?;
        let count = offsets.info().count;
        if index >= count {
            return Err(TiffError::StripOutOfBounds { index, count });
        }
        let counts = self.offset_tag(TiffTag::StripByteCounts)?;
        match locate(offsets, counts, index, self.source.as_ref()).await? {
            Some(location) => self.read_block(location).await.map(Some),
            None => Ok(None),
        }
    }

    async fn read_block(&self, location: TileLocation) -> Result<TileBytes, TiffError> {
        let TileLocation { offset, byte_count } = location;
        let len = usize::try_from(byte_count).map_err(|_| TiffError::InvalidTagValue {
            tag: TiffTag::TileByteCounts.name(),
            message: format!("byte count {} does not fit in memory", byte_count),
        })?;

        let bytes = self.source.read_at(offset, len).await?;
        if bytes.len() < len {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: byte_count,
                size: self
                    .source
                    .size()
                    .unwrap_or(offset + bytes.len() as u64),
            }
            .into());
        }

        let compression = self.compression()?;
        let bytes = match (compression, self.tags.get(&TiffTag::JpegTables.as_u16())) {
            (Some(Compression::Jpeg), Some(tables)) => {
                let tables = tables.fetch(self.source.as_ref()).await?;
                match tables.as_bytes() {
                    Some(tables) => reattach_jpeg_tables(tables, &bytes),
                    None => bytes,
                }
            }
            _ => bytes,
        };

        Ok(TileBytes {
            mime_type: compression
                .map(Compression::mime_type)
                .unwrap_or("application/octet-stream"),
            bytes,
        })
    }
}

/// Look up entry `index` of an offsets/byte-counts pair.
///
/// Uses resident values when both are available, otherwise reads the two
/// elements concurrently.
async fn locate<R: RangeReader + ?Sized>(
    offsets: &OffsetTag,
    counts: &OffsetTag,
    index: u64,
    source: &R,
) -> Result<Option<TileLocation>, TiffError> {
    let (offset, byte_count) = match (offsets.value_at_sync(index)?, counts.value_at_sync(index)?) {
        (Some(offset), Some(byte_count)) => (offset, byte_count),
        _ => tokio::try_join!(
            offsets.value_at(index, source),
            counts.value_at(index, source)
        )?,
    };

    Ok(located(offset, byte_count))
}

/// A zero offset or byte count marks a sparse block.
fn located(offset: u64, byte_count: u64) -> Option<TileLocation> {
    (offset != 0 && byte_count != 0).then_some(TileLocation { offset, byte_count })
}

impl<R: ?Sized> std::fmt::Debug for TiffImage<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffImage")
            .field("id", &self.id)
            .field("tags", &self.tags.len())
            .field("tile_leader", &self.tile_leader)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
