use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;

use super::range_reader::clamp_read;
use super::RangeReader;
use crate::error::IoError;

/// Local filesystem implementation of RangeReader.
///
/// The file handle is shared behind an async mutex so that a seek and the
/// following read are never interleaved with another request.
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl FileSource {
    /// Open the file at `path` and record its size.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let identifier = format!("file://{}", path.display());

        let file = File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IoError::NotFound(identifier.clone())
            } else {
                IoError::File(format!("{}: {}", identifier, e))
            }
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| IoError::File(format!("{}: {}", identifier, e)))?
            .len();

        Ok(Self {
            file: Mutex::new(file),
            size,
            identifier,
        })
    }
}

#[async_trait]
impl RangeReader for FileSource {
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let len = clamp_read(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::File(format!("{}: {}", self.identifier, e)))?;

        let mut buf = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            let n = file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| IoError::File(format!("{}: {}", self.identifier, e)))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        Ok(buf.freeze())
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
