//! TIFF and BigTIFF parsing for Cloud-Optimized GeoTIFFs.
//!
//! # Key Concepts
//!
//! - **Classic TIFF vs BigTIFF**: Classic TIFF uses 32-bit offsets and 2-byte
//!   entry counts, BigTIFF uses 64-bit offsets and counts. Both are handled
//!   transparently. Only little-endian files are supported.
//!
//! - **IFD (Image File Directory)**: One per image. A COG has the full
//!   resolution image first, followed by its overviews and masks.
//!
//! - **Lazy tags**: Values too large for an entry's value slot are only read
//!   when first needed, unless the bytes were already fetched alongside the
//!   directory.
//!
//! - **Ghost options**: GDAL writes layout hints between the header and the
//!   first IFD. When it promises a size leader before every tile, tile sizes
//!   are read from the leader instead of TileByteCounts.

mod directory;
mod geokeys;
mod ghost;
mod image;
mod parser;
mod tag;
mod tags;
mod values;

pub use directory::{Tiff, TiffOptions, DEFAULT_INITIAL_READ_SIZE, MAX_IFDS};
pub use geokeys::{unpack_geo_keys, GeoKey, GeoKeyValue, GeoKeys, USER_DEFINED};
pub use ghost::{GhostOptions, MAX_GHOST_SIZE};
pub use image::{GridSize, ImageSize, TileBounds, TileBytes, TileLocation, TiffImage};
pub use parser::{ByteOrder, TiffHeader, TiffVersion, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use tag::{InlineTag, LazyTag, OffsetTag, Tag, TagInfo};
pub use tags::{Compression, FieldType, TiffTag, SUBFILE_REDUCED_IMAGE};
pub use values::{decode_unsigned, decode_value, TagValue};
