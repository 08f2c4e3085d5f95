use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from a local or remote resource.
///
/// This abstraction allows the TIFF parser and rest of the system to work
/// with files without downloading them entirely. Implementations must be
/// thread-safe.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Implementations return exactly `len` bytes unless the read runs past
    /// the end of the resource, in which case the available tail is returned.
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Total size of the resource in bytes, if known.
    fn size(&self) -> Option<u64>;

    /// Get a unique identifier for this resource (for logging).
    ///
    /// For S3, this would typically be `s3://bucket/key`.
    fn identifier(&self) -> &str;
}

#[async_trait]
impl<T: RangeReader + ?Sized> RangeReader for Box<T> {
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        (**self).read_at(offset, len).await
    }

    fn size(&self) -> Option<u64> {
        (**self).size()
    }

    fn identifier(&self) -> &str {
        (**self).identifier()
    }
}

#[async_trait]
impl<T: RangeReader + ?Sized> RangeReader for Arc<T> {
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        (**self).read_at(offset, len).await
    }

    fn size(&self) -> Option<u64> {
        (**self).size()
    }

    fn identifier(&self) -> &str {
        (**self).identifier()
    }
}

/// Clamp a request of `len` bytes at `offset` to a resource of `size` bytes.
///
/// Returns the number of bytes that can be served, or an error if `offset`
/// itself lies past the end of the resource.
pub fn clamp_read(offset: u64, len: usize, size: u64) -> Result<usize, IoError> {
    if offset > size {
        return Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        });
    }
    Ok(len.min((size - offset) as usize))
}

// =============================================================================
// Endian Helper Functions
// =============================================================================
//
// Only little-endian files are supported, so only little-endian readers are
// provided. Callers are responsible for bounds checking.

/// Read a little-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read a little-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
