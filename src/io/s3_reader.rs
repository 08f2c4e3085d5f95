use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use super::range_reader::clamp_read;
use super::RangeReader;
use crate::error::IoError;

/// S3-backed implementation of RangeReader.
///
/// Reads byte ranges from objects in S3 or S3-compatible storage (MinIO, GCS, etc.)
/// using HTTP range requests. The object size is fetched once on creation via HEAD;
/// when the store does not report a length the size is left unknown.
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: Option<u64>,
    identifier: String,
}

impl S3RangeReader {
    /// Create a new S3RangeReader for the given bucket and key.
    ///
    /// This performs a HEAD request to determine the object size.
    /// Returns an error if the object does not exist or is inaccessible.
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let identifier = format!("s3://{}/{}", bucket, key);
        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| head_error(e, &identifier))?;

        let size = head
            .content_length()
            .and_then(|len| u64::try_from(len).ok());
        debug!(source = %identifier, size = ?size, "Opened S3 object");

        Ok(Self {
            client,
            bucket,
            key,
            size,
            identifier,
        })
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the object key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let len = match self.size {
            Some(size) => clamp_read(offset, len, size)?,
            None => len,
        };

        if len == 0 {
            return Ok(Bytes::new());
        }

        // Build range header: "bytes=start-end" (inclusive on both ends)
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);
        debug!(source = %self.identifier, offset, len, "S3 range request");

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .send()
            .await
            .map_err(|e| IoError::S3(e.to_string()))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        Ok(data)
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Map a failed HEAD to `NotFound` when the object is missing.
///
/// Some S3-compatible stores answer a missing key without a typed error, so
/// the raw status and message are checked as well.
fn head_error(
    err: SdkError<HeadObjectError, HttpResponse>,
    identifier: &str,
) -> IoError {
    let typed = err
        .as_service_error()
        .is_some_and(HeadObjectError::is_not_found);
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = err.to_string();

    if typed || status == Some(404) || message.contains("NoSuchKey") {
        IoError::NotFound(identifier.to_string())
    } else {
        IoError::S3(message)
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
///
/// For AWS S3, pass `None` to use the default endpoint:
/// ```ignore
/// let client = create_s3_client(None, "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // MinIO and most self-hosted stores only support path-style addressing
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}

/// Split an `s3://bucket/key` URL into its bucket and key.
///
/// Returns `None` for other schemes or when either part is empty.
pub fn parse_s3_url(input: &str) -> Option<(String, String)> {
    let url = url::Url::parse(input).ok()?;
    if url.scheme() != "s3" {
        return None;
    }
    let bucket = url.host_str()?.to_string();
    let key = url.path().trim_start_matches('/').to_string();
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}
