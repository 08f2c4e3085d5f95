use async_trait::async_trait;
use bytes::Bytes;

use super::range_reader::clamp_read;
use super::RangeReader;
use crate::error::IoError;

/// In-memory implementation of RangeReader.
///
/// Serves reads from a buffer that is already fully resident. Cloning is
/// cheap since the buffer is reference counted.
#[derive(Clone)]
pub struct MemorySource {
    data: Bytes,
    identifier: String,
}

impl MemorySource {
    /// Create a source over `data`, named `identifier` in logs.
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }

    /// The underlying buffer.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

#[async_trait]
impl RangeReader for MemorySource {
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
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
