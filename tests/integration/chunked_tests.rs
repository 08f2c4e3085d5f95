//! Chunked source integration tests.
//!
//! Tests verify:
//! - Opening a COG through the chunk cache costs one request
//! - Concurrent tile reads are coalesced without ever fetching a chunk twice
//! - Cached chunks serve later reads without I/O

use std::sync::Arc;

use tokio::task::JoinSet;

use cog_streamer::{ChunkConfig, ChunkedSource, RangeReader, Tiff, TiffOptions};

use super::test_utils::{block_payload, ImageBuilder, TiffBuilder, TrackingMockReader};

fn chunked(
    data: Vec<u8>,
    config: ChunkConfig,
) -> (TrackingMockReader, Arc<ChunkedSource<TrackingMockReader>>) {
    let reader = TrackingMockReader::new(data, "chunked.tif");
    let source = Arc::new(ChunkedSource::with_config(reader.clone(), config));
    (reader, source)
}

#[tokio::test]
async fn test_open_through_chunk_cache() {
    let (reader, source) = chunked(TiffBuilder::pyramid(false).build(), ChunkConfig::default());

    let tiff = Tiff::open(Arc::clone(&source)).await.unwrap();
    assert_eq!(tiff.images().len(), 5);
    assert_eq!(reader.request_count(), 1);
    assert!(source.is_cached(0));

    // Tile data lives in the same chunk
    let tile = tiff.image(0).unwrap().get_tile(3, 3).await.unwrap().unwrap();
    assert_eq!(tile.bytes.as_ref(), block_payload(1024, 1024, 15).as_slice());
    assert_eq!(reader.request_count(), 1);
}

#[tokio::test]
async fn test_concurrent_tiles_fetch_each_chunk_once() {
    let data = TiffBuilder::new()
        .add_image(ImageBuilder::tiled(2048, 2048, 128))
        .build();
    let file_len = data.len();
    let config = ChunkConfig {
        chunk_size: 256,
        max_chunks_per_range: 4,
        blank_fill_count: 2,
        max_pending_chunks: 1024,
    };
    let (reader, source) = chunked(data, config);

    // Leave the offset arrays and tile data to the concurrent reads
    let options = TiffOptions {
        initial_read_size: 256,
        ..TiffOptions::default()
    };
    let tiff = Arc::new(Tiff::with_options(Arc::clone(&source), options));
    tiff.init().await.unwrap();
    let grid = tiff.image(0).unwrap().tile_count().unwrap();
    assert_eq!((grid.x, grid.y), (16, 16));

    let mut tasks = JoinSet::new();
    for y in 0..grid.y {
        for x in 0..grid.x {
            let tiff = Arc::clone(&tiff);
            tasks.spawn(async move {
                let tile = tiff.image(0).unwrap().get_tile(x, y).await.unwrap().unwrap();
                (y * 16 + x, tile.bytes)
            });
        }
    }

    while let Some(result) = tasks.join_next().await {
        let (index, bytes) = result.unwrap();
        assert_eq!(
            bytes.as_ref(),
            block_payload(2048, 2048, index as usize).as_slice(),
            "tile {} has wrong bytes",
            index
        );
    }

    let chunk_count = file_len.div_ceil(256);
    assert!(reader.request_count() <= chunk_count);
    assert_eq!(source.cached_chunks(), chunk_count);

    // Every chunk is resident now
    reader.reset_tracking();
    let tile = tiff.image(0).unwrap().get_tile(0, 0).await.unwrap().unwrap();
    assert_eq!(tile.bytes.as_ref(), block_payload(2048, 2048, 0).as_slice());
    assert_eq!(reader.request_count(), 0);
}

#[tokio::test]
async fn test_unaligned_read_spans_chunks() {
    let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let config = ChunkConfig {
        chunk_size: 512,
        ..ChunkConfig::default()
    };
    let (reader, source) = chunked(data.clone(), config);

    let bytes = source.read_at(500, 1100).await.unwrap();
    assert_eq!(bytes.as_ref(), &data[500..1600]);

    // Chunks 0..=3 in one request
    assert_eq!(reader.get_requests(), vec![(0, 2048)]);
    assert_eq!(source.size(), Some(4096));
    assert_eq!(source.identifier(), "chunked.tif");
}
