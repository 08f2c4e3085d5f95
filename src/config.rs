//! Command-line configuration for COG Streamer.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `COG_` prefix:
//!
//! - `COG_CHUNK_SIZE` - Chunk size in bytes (default: 64KB)
//! - `COG_MAX_CHUNKS_PER_RANGE` - Chunks merged into one request (default: 10)
//! - `COG_BLANK_FILL_COUNT` - Gap below which chunks are bridged (default: 16)
//! - `COG_MAX_PENDING_CHUNKS` - Chunks allowed to wait for a flush (default: 50)
//! - `COG_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `COG_S3_REGION` - AWS region (default: us-east-1)
//!
//! # Example
//!
//! ```text
//! cog-streamer info s3://bucket/dem.tif --json
//! cog-streamer tile ./ortho.tif --image 2 --x 3 --y 1 --output tile.jpg
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::io::{
    ChunkConfig, DEFAULT_BLANK_FILL_COUNT, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNKS_PER_RANGE,
    DEFAULT_MAX_PENDING_CHUNKS,
};

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Largest accepted chunk size.
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// COG Streamer - range-based reader for Cloud-Optimized GeoTIFFs.
///
/// Reads TIFF structure and individual tiles from local files or S3 without
/// downloading the whole file.
#[derive(Parser, Debug, Clone)]
#[command(name = "cog-streamer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    // =========================================================================
    // Chunk Cache
    // =========================================================================
    /// Chunk size in bytes. Every read is rounded out to whole chunks.
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_SIZE, env = "COG_CHUNK_SIZE")]
    pub chunk_size: usize,

    /// Maximum number of chunks merged into one request.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CHUNKS_PER_RANGE, env = "COG_MAX_CHUNKS_PER_RANGE")]
    pub max_chunks_per_range: usize,

    /// Gaps shorter than this many chunks are fetched to merge two requests.
    #[arg(long, global = true, default_value_t = DEFAULT_BLANK_FILL_COUNT, env = "COG_BLANK_FILL_COUNT")]
    pub blank_fill_count: u64,

    /// Maximum number of chunks waiting for a flush.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_PENDING_CHUNKS, env = "COG_MAX_PENDING_CHUNKS")]
    pub max_pending_chunks: usize,

    // =========================================================================
    // S3 Configuration
    // =========================================================================
    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, global = true, env = "COG_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, global = true, default_value = DEFAULT_REGION, env = "COG_S3_REGION")]
    pub s3_region: String,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the structure and georeferencing of a file.
    Info {
        /// Local path or s3://bucket/key URL
        source: String,

        /// Print JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Extract the encoded bytes of one tile.
    Tile {
        /// Local path or s3://bucket/key URL
        source: String,

        /// Image (IFD) index
        #[arg(long, default_value_t = 0)]
        image: usize,

        /// Tile column
        #[arg(long)]
        x: u64,

        /// Tile row
        #[arg(long)]
        y: u64,

        /// File to write the tile to
        #[arg(short, long)]
        output: PathBuf,
    },
}

impl Cli {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err("chunk_size must be at most 16MB".to_string());
        }
        self.chunk_config().validate()?;

        if let Some(ref endpoint) = self.s3_endpoint {
            if url::Url::parse(endpoint).is_err() {
                return Err(format!("s3_endpoint is not a valid URL: {}", endpoint));
            }
        }

        Ok(())
    }

    /// Chunk cache settings.
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            chunk_size: self.chunk_size,
            max_chunks_per_range: self.max_chunks_per_range,
            blank_fill_count: self.blank_fill_count,
            max_pending_chunks: self.max_pending_chunks,
        }
    }

    /// The source argument of the subcommand.
    pub fn source(&self) -> &str {
        match &self.command {
            Command::Info { source, .. } | Command::Tile { source, .. } => source,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
