//! GDAL structural metadata ("ghost" options).
//!
//! GDAL writes a small `KEY=VALUE` text block between the TIFF header and the
//! first IFD of a Cloud-Optimized GeoTIFF. It describes how the file was laid
//! out, for example:
//!
//! ```text
//! GDAL_STRUCTURAL_METADATA_SIZE=000140 bytes
//! LAYOUT=IFDS_BEFORE_DATA
//! BLOCK_ORDER=ROW_MAJOR
//! BLOCK_LEADER=SIZE_AS_UINT4
//! BLOCK_TRAILER=LAST_4_BYTES_REPEATED
//! KNOWN_INCOMPATIBLE_EDITION=NO
//! ```
//!
//! `BLOCK_LEADER=SIZE_AS_UINT4` means every tile is preceded by its byte
//! count as a little-endian u32, so tile sizes can be read without touching
//! TileByteCounts.

use std::collections::BTreeMap;

/// Ghost blocks larger than this are not structural metadata.
pub const MAX_GHOST_SIZE: u64 = 16 * 1024;

/// Known keys.
pub const KEY_LAYOUT: &str = "LAYOUT";
pub const KEY_BLOCK_ORDER: &str = "BLOCK_ORDER";
pub const KEY_BLOCK_LEADER: &str = "BLOCK_LEADER";
pub const KEY_BLOCK_TRAILER: &str = "BLOCK_TRAILER";
pub const KEY_KNOWN_INCOMPATIBLE_EDITION: &str = "KNOWN_INCOMPATIBLE_EDITION";
pub const KEY_MASK_INTERLEAVED_WITH_IMAGERY: &str = "MASK_INTERLEAVED_WITH_IMAGERY";

const LAYOUT_IFDS_BEFORE_DATA: &str = "IFDS_BEFORE_DATA";
const BLOCK_LEADER_SIZE_AS_UINT4: &str = "SIZE_AS_UINT4";

/// Parsed GDAL structural metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GhostOptions {
    options: BTreeMap<String, String>,
}

impl GhostOptions {
    /// Parse a ghost block.
    ///
    /// NUL bytes are dropped, the text is split on newlines and each line on
    /// its first `=`. Keys and values are trimmed. Lines without `=` are
    /// ignored.
    pub fn parse(bytes: &[u8]) -> Self {
        let text: String = bytes
            .iter()
            .filter(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();

        let options = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();

        Self { options }
    }

    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Iterate over all options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of options.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether no options were found.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// `LAYOUT`, usually `IFDS_BEFORE_DATA`.
    pub fn layout(&self) -> Option<&str> {
        self.get(KEY_LAYOUT)
    }

    /// `BLOCK_ORDER`, usually `ROW_MAJOR`.
    pub fn block_order(&self) -> Option<&str> {
        self.get(KEY_BLOCK_ORDER)
    }

    /// `BLOCK_LEADER`, usually `SIZE_AS_UINT4`.
    pub fn block_leader(&self) -> Option<&str> {
        self.get(KEY_BLOCK_LEADER)
    }

    /// `BLOCK_TRAILER`, usually `LAST_4_BYTES_REPEATED`.
    pub fn block_trailer(&self) -> Option<&str> {
        self.get(KEY_BLOCK_TRAILER)
    }

    /// Whether masks are stored next to the imagery blocks.
    pub fn is_mask_interleaved(&self) -> bool {
        self.get(KEY_MASK_INTERLEAVED_WITH_IMAGERY) == Some("YES")
    }

    /// The file was modified after GDAL wrote it, so the layout hints no
    /// longer hold.
    pub fn is_broken(&self) -> bool {
        self.get(KEY_KNOWN_INCOMPATIBLE_EDITION) == Some("YES")
    }

    /// Whether the layout hints can be trusted.
    pub fn is_cog_optimized(&self) -> bool {
        !self.is_broken() && self.layout() == Some(LAYOUT_IFDS_BEFORE_DATA)
    }

    /// Size of the byte-count leader in front of each tile, if any.
    pub fn tile_leader_byte_size(&self) -> Option<usize> {
        match self.block_leader() {
            Some(BLOCK_LEADER_SIZE_AS_UINT4) => Some(4),
            _ => None,
        }
    }
}
