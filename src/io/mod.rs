mod chunked;
mod file;
mod memory;
mod range_reader;
mod s3_reader;

pub use chunked::{
    get_byte_ranges, ByteRanges, ChunkConfig, ChunkedSource, DEFAULT_BLANK_FILL_COUNT,
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNKS_PER_RANGE, DEFAULT_MAX_PENDING_CHUNKS,
};
pub use file::FileSource;
pub use memory::MemorySource;
pub use range_reader::{clamp_read, read_u16_le, read_u32_le, read_u64_le, RangeReader};
pub use s3_reader::{create_s3_client, parse_s3_url, S3RangeReader};
