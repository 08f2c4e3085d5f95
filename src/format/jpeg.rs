//! JPEG table reattachment.
//!
//! JPEG-compressed TIFFs usually store the quantization (DQT) and Huffman
//! (DHT) tables once, in the `JPEGTables` tag, and leave every tile as an
//! abbreviated stream without them. Before a tile can be handed to a regular
//! JPEG decoder the two have to be spliced back together.
//!
//! # Splicing
//!
//! 1. JPEGTables starts with SOI (FFD8) and ends with EOI (FFD9)
//! 2. Tile data also starts with SOI and ends with EOI
//! 3. Drop the last two bytes of the tables and the first two of the tile,
//!    then concatenate
//!
//! Result: SOI + tables_content + tile_content + EOI

use bytes::{Bytes, BytesMut};

// =============================================================================
// JPEG Markers
// =============================================================================

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Splice `tables` in front of the entropy-coded data of `tile`.
///
/// The trailing two bytes of `tables` (its EOI) and the leading two bytes of
/// `tile` (its SOI) are always removed, so the output is exactly
/// `tables.len() - 2 + tile.len() - 2` bytes long. Inputs shorter than two
/// bytes contribute nothing.
pub fn reattach_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    let tables = &tables[..tables.len().saturating_sub(2)];
    let tile = tile.get(2..).unwrap_or(&[]);

    let mut result = BytesMut::with_capacity(tables.len() + tile.len());
    result.extend_from_slice(tables);
    result.extend_from_slice(tile);
    result.freeze()
}

// =============================================================================
// Tests
// =============================================================================
