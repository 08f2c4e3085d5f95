//! TIFF structure and tile access tests.
//!
//! Tests verify:
//! - Classic TIFF and BigTIFF pyramids are walked completely
//! - Initialization happens once, even when raced
//! - Tile offsets are read lazily, one element at a time
//! - GDAL tile leaders replace TileByteCounts lookups
//! - Gaps of 16KB or more before the first IFD are not ghost blocks
//! - JPEG tiles get their tables back
//! - Overviews inherit georeferencing from the full-resolution image

use std::sync::Arc;

use cog_streamer::{Tiff, TiffError, TiffOptions, TiffVersion};

use super::test_utils::{
    block_payload, test_jpeg_tables, test_jpeg_tile, GeoReference, ImageBuilder, TiffBuilder,
    TrackingMockReader, COG_GHOST,
};

fn open(data: Vec<u8>) -> (TrackingMockReader, Tiff<TrackingMockReader>) {
    let reader = TrackingMockReader::new(data, "test.tif");
    let tiff = Tiff::new(Arc::new(reader.clone()));
    (reader, tiff)
}

// =============================================================================
// IFD Chain Tests
// =============================================================================

async fn check_pyramid(bigtiff: bool) {
    let (reader, tiff) = open(TiffBuilder::pyramid(bigtiff).build());
    tiff.init().await.unwrap();

    let expected_version = if bigtiff {
        TiffVersion::BigTiff
    } else {
        TiffVersion::Tiff
    };
    assert_eq!(tiff.version(), Some(expected_version));
    assert_eq!(tiff.images().len(), 5);

    // Small files are covered by the initial read
    assert_eq!(reader.request_count(), 1);

    for (level, image) in tiff.images().iter().enumerate() {
        let size = 1024u32 >> level;
        assert_eq!(image.id(), level);
        assert_eq!(image.size().unwrap().width, size as u64);
        assert_eq!(image.size().unwrap().height, size as u64);
        assert_eq!(image.is_reduced_image(), level > 0);

        let grid = image.tile_count().unwrap();
        let expected = size.div_ceil(256) as u64;
        assert_eq!((grid.x, grid.y), (expected, expected));
    }

    let image = tiff.image(1).unwrap();
    let tile = image.get_tile(1, 1).await.unwrap().unwrap();
    assert_eq!(tile.bytes.as_ref(), block_payload(512, 512, 3).as_slice());
    assert_eq!(tile.mime_type, "application/octet-stream");
}

#[tokio::test]
async fn test_classic_tiff_pyramid() {
    check_pyramid(false).await;
}

#[tokio::test]
async fn test_bigtiff_pyramid() {
    check_pyramid(true).await;
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let (reader, tiff) = open(TiffBuilder::pyramid(false).build());
    assert!(!tiff.is_initialized());
    assert!(tiff.images().is_empty());

    tiff.init().await.unwrap();
    let after_first = reader.request_count();

    tiff.init().await.unwrap();
    assert!(tiff.is_initialized());
    assert_eq!(reader.request_count(), after_first);
}

#[tokio::test]
async fn test_concurrent_init_reads_once() {
    let (reader, tiff) = open(TiffBuilder::pyramid(true).build());

    let (a, b, c) = tokio::join!(tiff.init(), tiff.init(), tiff.init());
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(reader.request_count(), 1);
    assert_eq!(tiff.images().len(), 5);
}

#[tokio::test]
async fn test_big_endian_rejected() {
    let mut data = TiffBuilder::pyramid(false).build();
    data[0] = b'M';
    data[1] = b'M';

    let (_, tiff) = open(data);
    let result = tiff.init().await;
    assert!(matches!(result, Err(TiffError::UnsupportedByteOrder)));
    assert!(!tiff.is_initialized());
}

// =============================================================================
// Lazy Offset Tests
// =============================================================================

#[tokio::test]
async fn test_tile_offsets_read_per_element() {
    // 16x16 tiles: both offset arrays are 1KB and lie outside the IFD window
    let data = TiffBuilder::new()
        .add_image(ImageBuilder::tiled(4096, 4096, 256))
        .build();
    let reader = TrackingMockReader::new(data, "large.tif");
    let options = TiffOptions {
        initial_read_size: 16,
        load_geo_tags: true,
    };
    let tiff = Tiff::with_options(Arc::new(reader.clone()), options);
    tiff.init().await.unwrap();

    let image = tiff.image(0).unwrap();
    let offsets = image
        .tag(cog_streamer::TiffTag::TileOffsets.as_u16())
        .and_then(|tag| tag.as_offset())
        .unwrap();
    assert!(!offsets.is_loaded());
    assert_eq!(offsets.info().count, 256);

    reader.reset_tracking();
    let tile = image.get_tile(5, 7).await.unwrap().unwrap();
    assert_eq!(tile.bytes.as_ref(), block_payload(4096, 4096, 7 * 16 + 5).as_slice());

    // One element from each array, then the tile itself
    let requests = reader.get_requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests.iter().filter(|(_, len)| *len == 4).count(), 2);
    assert!(!offsets.is_loaded());

    // Elements are remembered
    reader.reset_tracking();
    image.get_tile(5, 7).await.unwrap().unwrap();
    assert_eq!(reader.request_count(), 1);
}

// =============================================================================
// Sparse and Out-of-Bounds Tests
// =============================================================================

#[tokio::test]
async fn test_sparse_tile() {
    let data = TiffBuilder::new()
        .add_image(ImageBuilder::tiled(512, 512, 256).with_block(1, None))
        .build();
    let (reader, tiff) = open(data);
    tiff.init().await.unwrap();
    let image = tiff.image(0).unwrap();

    reader.reset_tracking();
    assert!(!image.has_tile(1, 0).await.unwrap());
    assert!(image.get_tile(1, 0).await.unwrap().is_none());
    assert!(image.has_tile(0, 0).await.unwrap());
    assert_eq!(reader.request_count(), 0);
}

#[tokio::test]
async fn test_tile_out_of_bounds() {
    let (_, tiff) = open(TiffBuilder::pyramid(false).build());
    tiff.init().await.unwrap();
    let image = tiff.image(0).unwrap();

    let result = image.get_tile(4, 0).await;
    assert!(matches!(
        result,
        Err(TiffError::TileOutOfBounds {
            x: 4,
            y: 0,
            tiles_x: 4,
            tiles_y: 4
        })
    ));
    assert!(image.has_tile(0, 4).await.is_err());
}

#[tokio::test]
async fn test_tile_offsets_shorter_than_grid() {
    let data = TiffBuilder::new()
        .add_image(ImageBuilder::tiled(512, 512, 256).truncate_blocks(3))
        .build();
    let (_, tiff) = open(data);
    tiff.init().await.unwrap();
    let image = tiff.image(0).unwrap();

    assert!(image.get_tile(0, 1).await.unwrap().is_some());
    let result = image.get_tile(1, 1).await;
    assert!(matches!(
        result,
        Err(TiffError::TileIndexOutOfBounds { index: 3, count: 3 })
    ));
}

// =============================================================================
// Strip Tests
// =============================================================================

#[tokio::test]
async fn test_striped_image() {
    let data = TiffBuilder::new()
        .add_image(ImageBuilder::striped(100, 50, 16))
        .build();
    let (_, tiff) = open(data);
    tiff.init().await.unwrap();
    let image = tiff.image(0).unwrap();

    assert!(!image.is_tiled());
    assert_eq!(image.strip_count(), 4);
    assert!(matches!(image.tile_count(), Err(TiffError::NotTiled(0))));
    assert!(image.get_tile(0, 0).await.is_err());

    let strip = image.get_strip(3).await.unwrap().unwrap();
    assert_eq!(strip.bytes.as_ref(), block_payload(100, 50, 3).as_slice());

    let result = image.get_strip(4).await;
    assert!(matches!(
        result,
        Err(TiffError::StripOutOfBounds { index: 4, count: 4 })
    ));
}

// =============================================================================
// Ghost Options and Leader Tests
// =============================================================================

/// A 16x16 tile COG whose offset arrays lie outside the IFD window.
fn open_lazy_cog(ghost: &str) -> (TrackingMockReader, Tiff<TrackingMockReader>, Vec<u64>) {
    let (data, layout) = TiffBuilder::new()
        .with_ghost(ghost)
        .with_leaders(true)
        .add_image(ImageBuilder::tiled(4096, 4096, 256))
        .build_with_layout();
    let reader = TrackingMockReader::new(data, "leader.tif");
    let options = TiffOptions {
        initial_read_size: 16,
        ..TiffOptions::default()
    };
    let tiff = Tiff::with_options(Arc::new(reader.clone()), options);
    (reader, tiff, layout.into_iter().next().unwrap())
}

#[tokio::test]
async fn test_tile_leader_replaces_byte_counts() {
    let (reader, tiff, offsets) = open_lazy_cog(COG_GHOST);
    tiff.init().await.unwrap();

    assert!(tiff.is_cog_optimized());
    let ghost = tiff.ghost_options().unwrap();
    assert_eq!(ghost.layout(), Some("IFDS_BEFORE_DATA"));
    assert_eq!(ghost.tile_leader_byte_size(), Some(4));

    let image = tiff.image(0).unwrap();
    reader.reset_tracking();
    let tile = image.get_tile(5, 7).await.unwrap().unwrap();
    let expected = block_payload(4096, 4096, 117);
    assert_eq!(tile.bytes.as_ref(), expected.as_slice());

    // TileOffsets element, leader, tile; TileByteCounts is never read
    let offset = offsets[117];
    let requests = reader.get_requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].1, 4);
    assert_eq!(
        requests[1..],
        [(offset - 4, 4), (offset, expected.len())]
    );
}

#[tokio::test]
async fn test_resident_byte_counts_skip_leader() {
    let (data, layout) = TiffBuilder::new()
        .with_ghost(COG_GHOST)
        .with_leaders(true)
        .add_image(ImageBuilder::tiled(512, 512, 256))
        .build_with_layout();
    let (reader, tiff) = open(data);
    tiff.init().await.unwrap();
    assert!(tiff.is_cog_optimized());

    let image = tiff.image(0).unwrap();
    reader.reset_tracking();
    let tile = image.get_tile(1, 1).await.unwrap().unwrap();
    let expected = block_payload(512, 512, 3);
    assert_eq!(tile.bytes.as_ref(), expected.as_slice());

    // Both arrays came with the directory, so only the tile is read
    assert_eq!(reader.get_requests(), vec![(layout[0][3], expected.len())]);
    assert!(image.has_tile(0, 0).await.unwrap());
    assert_eq!(reader.request_count(), 1);
}

#[tokio::test]
async fn test_broken_ghost_ignores_leader() {
    let ghost = COG_GHOST.replace(
        "KNOWN_INCOMPATIBLE_EDITION=NO",
        "KNOWN_INCOMPATIBLE_EDITION=YES",
    );
    let (reader, tiff, offsets) = open_lazy_cog(&ghost);
    tiff.init().await.unwrap();

    assert!(!tiff.is_cog_optimized());
    assert!(tiff.ghost_options().unwrap().is_broken());

    let image = tiff.image(0).unwrap();
    reader.reset_tracking();
    let tile = image.get_tile(0, 1).await.unwrap().unwrap();
    let expected = block_payload(4096, 4096, 16);
    assert_eq!(tile.bytes.as_ref(), expected.as_slice());

    // One element from each array, then the tile; no leader read
    let offset = offsets[16];
    let requests = reader.get_requests();
    assert_eq!(requests.len(), 3);
    assert!(!requests.contains(&(offset - 4, 4)));
    assert_eq!(requests[2], (offset, expected.len()));
}

/// `COG_GHOST` padded with blanks to exactly `len` bytes.
fn padded_ghost(len: usize) -> String {
    format!("{:<len$}", COG_GHOST)
}

#[tokio::test]
async fn test_ghost_gap_at_limit_is_ignored() {
    let (reader, tiff, offsets) = open_lazy_cog(&padded_ghost(16 * 1024));
    tiff.init().await.unwrap();

    assert!(tiff.ghost_options().is_none());
    assert!(!tiff.is_cog_optimized());

    let image = tiff.image(0).unwrap();
    reader.reset_tracking();
    let tile = image.get_tile(5, 7).await.unwrap().unwrap();
    assert_eq!(tile.bytes.as_ref(), block_payload(4096, 4096, 117).as_slice());

    // Sizes come from TileByteCounts, not the leader
    let offset = offsets[117];
    let requests = reader.get_requests();
    assert_eq!(requests.len(), 3);
    assert!(!requests.contains(&(offset - 4, 4)));
}

#[tokio::test]
async fn test_ghost_gap_under_limit_is_parsed() {
    let (reader, tiff, offsets) = open_lazy_cog(&padded_ghost(16 * 1024 - 1));
    tiff.init().await.unwrap();

    let ghost = tiff.ghost_options().unwrap();
    assert_eq!(ghost.layout(), Some("IFDS_BEFORE_DATA"));
    assert!(tiff.is_cog_optimized());

    let image = tiff.image(0).unwrap();
    reader.reset_tracking();
    image.get_tile(5, 7).await.unwrap().unwrap();
    assert!(reader.get_requests().contains(&(offsets[117] - 4, 4)));
}

#[tokio::test]
async fn test_no_ghost_block() {
    let (_, tiff) = open(TiffBuilder::pyramid(false).build());
    tiff.init().await.unwrap();

    assert!(tiff.ghost_options().is_none());
    assert!(!tiff.is_cog_optimized());
}

// =============================================================================
// JPEG Tests
// =============================================================================

#[tokio::test]
async fn test_jpeg_tables_reattached() {
    let tables = test_jpeg_tables();
    let tile_data = test_jpeg_tile(0xAB);
    let data = TiffBuilder::new()
        .add_image(
            ImageBuilder::tiled(256, 256, 256)
                .with_compression(7)
                .with_jpeg_tables(tables.clone())
                .with_block(0, Some(tile_data.clone())),
        )
        .build();
    let (_, tiff) = open(data);
    tiff.init().await.unwrap();

    let tile = tiff.image(0).unwrap().get_tile(0, 0).await.unwrap().unwrap();
    assert_eq!(tile.mime_type, "image/jpeg");
    assert_eq!(tile.bytes.len(), tables.len() - 2 + tile_data.len() - 2);

    let mut expected = tables[..tables.len() - 2].to_vec();
    expected.extend_from_slice(&tile_data[2..]);
    assert_eq!(tile.bytes.as_ref(), expected.as_slice());
    assert_eq!(&tile.bytes[..2], &[0xFF, 0xD8]);
    assert_eq!(&tile.bytes[tile.bytes.len() - 2..], &[0xFF, 0xD9]);
}

#[tokio::test]
async fn test_jpeg_without_tables_unchanged() {
    let tile_data = test_jpeg_tile(0x42);
    let data = TiffBuilder::new()
        .add_image(
            ImageBuilder::tiled(256, 256, 256)
                .with_compression(7)
                .with_block(0, Some(tile_data.clone())),
        )
        .build();
    let (_, tiff) = open(data);
    tiff.init().await.unwrap();

    let tile = tiff.image(0).unwrap().get_tile(0, 0).await.unwrap().unwrap();
    assert_eq!(tile.bytes.as_ref(), tile_data.as_slice());
}

// =============================================================================
// Georeferencing Tests
// =============================================================================

fn utm_geo() -> GeoReference {
    GeoReference {
        pixel_scale: [10.0, 10.0, 0.0],
        tie_point: [0.0, 0.0, 0.0, 500_000.0, 4_000_000.0, 0.0],
        epsg: 32633,
        citation: Some("WGS 84 / UTM zone 33N".to_string()),
    }
}

#[tokio::test]
async fn test_overview_inherits_georeferencing() {
    let data = TiffBuilder::new()
        .add_image(ImageBuilder::tiled(1024, 1024, 256).with_geo(utm_geo()))
        .add_image(ImageBuilder::tiled(512, 512, 256).reduced())
        .build();
    let (_, tiff) = open(data);
    tiff.init().await.unwrap();

    let base = tiff.image(0).unwrap();
    assert_eq!(base.epsg(), Some(32633));
    assert_eq!(base.origin().unwrap(), [500_000.0, 4_000_000.0, 0.0]);
    assert_eq!(base.resolution().unwrap(), [10.0, -10.0, 0.0]);
    let bbox = [500_000.0, 3_989_760.0, 510_240.0, 4_000_000.0];
    assert_eq!(base.bbox().unwrap(), bbox);

    let citation = base
        .geo_keys()
        .and_then(|keys| keys.get(cog_streamer::GeoKey::Citation))
        .and_then(|value| value.as_str());
    assert_eq!(citation, Some("WGS 84 / UTM zone 33N"));

    let overview = tiff.image(1).unwrap();
    assert!(overview.geo_keys().is_none());
    assert_eq!(overview.epsg(), Some(32633));
    assert_eq!(overview.origin().unwrap(), [500_000.0, 4_000_000.0, 0.0]);
    assert_eq!(overview.resolution().unwrap(), [20.0, -20.0, 0.0]);
    assert_eq!(overview.bbox().unwrap(), bbox);
}

#[tokio::test]
async fn test_geo_tags_skipped_when_disabled() {
    let data = TiffBuilder::new()
        .add_image(ImageBuilder::tiled(256, 256, 256).with_geo(utm_geo()))
        .build();
    let reader = TrackingMockReader::new(data, "dem.tif");
    let options = TiffOptions {
        load_geo_tags: false,
        ..TiffOptions::default()
    };
    let tiff = Tiff::with_options(Arc::new(reader), options);
    tiff.init().await.unwrap();

    let image = tiff.image(0).unwrap();
    assert!(image.geo_keys().is_none());
    assert_eq!(image.epsg(), None);
    // The transform tags are still available
    assert_eq!(image.origin().unwrap(), [500_000.0, 4_000_000.0, 0.0]);
}

#[tokio::test]
async fn test_ungeoreferenced_image() {
    let (_, tiff) = open(TiffBuilder::pyramid(false).build());
    tiff.init().await.unwrap();

    let image = tiff.image(2).unwrap();
    assert!(!image.is_geo_located());
    assert!(matches!(
        image.origin(),
        Err(TiffError::MissingGeoTransform(2))
    ));
}

#[tokio::test]
async fn test_gdal_no_data() {
    let data = TiffBuilder::new()
        .add_image(ImageBuilder::tiled(256, 256, 256).with_no_data("-9999"))
        .build();
    let (_, tiff) = open(data);
    tiff.init().await.unwrap();

    let image = tiff.image(0).unwrap();
    assert_eq!(image.no_data().await.unwrap(), Some(-9999.0));
}
