//! # COG Streamer
//!
//! A reader for Cloud-Optimized GeoTIFFs stored locally or in S3-compatible
//! object storage.
//!
//! Only the bytes that are needed are fetched: the start of the file for the
//! directory structure, then exactly the byte range of each requested tile.
//! Small scattered reads are batched into a few coalesced range requests by a
//! chunk cache.
//!
//! ## Architecture
//!
//! - [`io`] - Byte sources (memory, file, S3) and the coalescing chunk cache
//! - [`mod@format`] - TIFF/BigTIFF parser, GeoTIFF keys and JPEG handling
//! - [`config`] - CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cog_streamer::{ChunkedSource, FileSource, Tiff};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = FileSource::open("ortho.tif").await?;
//!     let tiff = Tiff::open(Arc::new(ChunkedSource::new(file))).await?;
//!
//!     let image = &tiff.images()[0];
//!     println!("{:?} at EPSG:{:?}", image.size()?, image.epsg());
//!
//!     if let Some(tile) = image.get_tile(0, 0).await? {
//!         println!("{} bytes of {}", tile.bytes.len(), tile.mime_type);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod io;

// Re-export commonly used types
pub use config::{Cli, Command};
pub use error::{IoError, TiffError};
pub use format::reattach_jpeg_tables;
pub use format::tiff::{
    unpack_geo_keys, ByteOrder, Compression, FieldType, GeoKey, GeoKeyValue, GeoKeys,
    GhostOptions, GridSize, ImageSize, Tag, TagInfo, TagValue, TiffHeader, TiffImage, TiffOptions,
    TiffTag, TiffVersion, TileBounds, TileBytes, TileLocation, Tiff, BIGTIFF_HEADER_SIZE,
    TIFF_HEADER_SIZE,
};
pub use io::{
    create_s3_client, get_byte_ranges, parse_s3_url, ByteRanges, ChunkConfig, ChunkedSource,
    FileSource, MemorySource, RangeReader, S3RangeReader,
};
