//! TIFF header parsing.
//!
//! This module handles parsing of TIFF and BigTIFF file headers,
//! which is the foundation for all subsequent parsing operations.
//!
//! # TIFF Header Structure
//!
//! ## Classic TIFF (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42 = 0x002A)
//! Bytes 4-7: Offset to first IFD (4 bytes)
//! ```
//!
//! ## BigTIFF (16 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (43 = 0x002B)
//! Bytes 4-5: Offset byte size (must be 8)
//! Bytes 6-7: Reserved (must be 0)
//! Bytes 8-15: Offset to first IFD (8 bytes)
//! ```
//!
//! Only little-endian files are accepted. A big-endian marker is recognized
//! but reported as [`TiffError::UnsupportedByteOrder`].

use serde::Serialize;

use crate::error::TiffError;
use crate::io::{read_u16_le, read_u32_le, read_u64_le};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes indicating little-endian byte order ("II" for Intel)
const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Magic bytes indicating big-endian byte order ("MM" for Motorola)
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

/// Version number for classic TIFF
const VERSION_TIFF: u16 = 42;

/// Version number for BigTIFF
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

// =============================================================================
// ByteOrder / TiffVersion
// =============================================================================

/// Byte order (endianness) of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

/// TIFF flavour, which decides pointer and count widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TiffVersion {
    /// Classic TIFF: 4-byte pointers, 2-byte entry counts
    Tiff,
    /// BigTIFF: 8-byte pointers and entry counts
    BigTiff,
}

impl TiffVersion {
    /// The version number stored in the header.
    pub const fn as_u16(self) -> u16 {
        match self {
            TiffVersion::Tiff => VERSION_TIFF,
            TiffVersion::BigTiff => VERSION_BIGTIFF,
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
///
/// Contains the essential information needed to begin parsing IFDs:
/// - Whether this is classic TIFF or BigTIFF (affects entry sizes and offset widths)
/// - Location of the first IFD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Classic TIFF or BigTIFF
    pub version: TiffVersion,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// # Arguments
    /// * `bytes` - Raw header bytes (at least 8 bytes, 16 for BigTIFF)
    /// * `file_size` - Total file size if known (used to validate the IFD offset)
    ///
    /// # Errors
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `UnsupportedByteOrder` for big-endian (MM) files
    /// - `InvalidVersion` if version is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if BigTIFF offset size is not 8
    /// - `InvalidBigTiffReserved` if the BigTIFF reserved field is not 0
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidIfdOffset` if the first IFD offset is inside the header or past the file
    pub fn parse(bytes: &[u8], file_size: Option<u64>) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = read_u16_le(&bytes[0..2]);
        match magic {
            BYTE_ORDER_LITTLE_ENDIAN => {}
            BYTE_ORDER_BIG_ENDIAN => return Err(TiffError::UnsupportedByteOrder),
            _ => return Err(TiffError::InvalidMagic(magic)),
        }

        let version = read_u16_le(&bytes[2..4]);
        let (version, first_ifd_offset) = match version {
            VERSION_TIFF => (TiffVersion::Tiff, read_u32_le(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }

                let offset_size = read_u16_le(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }

                let reserved = read_u16_le(&bytes[6..8]);
                if reserved != 0 {
                    return Err(TiffError::InvalidBigTiffReserved(reserved));
                }

                (TiffVersion::BigTiff, read_u64_le(&bytes[8..16]))
            }
            _ => return Err(TiffError::InvalidVersion(version)),
        };

        let header = TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            version,
            first_ifd_offset,
        };

        if first_ifd_offset < header.header_size() as u64 {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }
        if let Some(size) = file_size {
            if first_ifd_offset >= size {
                return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
            }
        }

        Ok(header)
    }

    /// Whether this is a BigTIFF file (64-bit offsets).
    #[inline]
    pub const fn is_bigtiff(&self) -> bool {
        matches!(self.version, TiffVersion::BigTiff)
    }

    /// Size of the header itself.
    #[inline]
    pub const fn header_size(&self) -> usize {
        if self.is_bigtiff() {
            BIGTIFF_HEADER_SIZE
        } else {
            TIFF_HEADER_SIZE
        }
    }

    /// Size of an IFD entry in bytes.
    ///
    /// Classic TIFF: 12 bytes (2 tag + 2 type + 4 count + 4 value/offset)
    /// BigTIFF: 20 bytes (2 tag + 2 type + 8 count + 8 value/offset)
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff() {
            20
        } else {
            12
        }
    }

    /// Size of the entry count field at the start of an IFD.
    ///
    /// Classic TIFF: 2 bytes (u16)
    /// BigTIFF: 8 bytes (u64)
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff() {
            8
        } else {
            2
        }
    }

    /// Width of a pointer: the next-IFD offset and the entry value slot.
    ///
    /// This is also the inline value threshold:
    /// Classic TIFF: 4 bytes
    /// BigTIFF: 8 bytes
    #[inline]
    pub const fn pointer_size(&self) -> usize {
        if self.is_bigtiff() {
            8
        } else {
            4
        }
    }

    /// Read a pointer-sized value (u32 or u64) from the start of `bytes`.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than [`Self::pointer_size`].
    #[inline]
    pub fn read_pointer(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff() {
            read_u64_le(bytes)
        } else {
            read_u32_le(bytes) as u64
        }
    }

    /// Read an IFD entry count (u16 or u64) from the start of `bytes`.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than [`Self::ifd_count_size`].
    #[inline]
    pub fn read_count(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff() {
            read_u64_le(bytes)
        } else {
            read_u16_le(bytes) as u64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
