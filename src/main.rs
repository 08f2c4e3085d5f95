//! COG Streamer - inspect Cloud-Optimized GeoTIFFs and extract tiles.
//!
//! This binary wires the chunked source, the TIFF parser and the CLI together.

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cog_streamer::{
    config::{Cli, Command},
    create_s3_client, parse_s3_url, ChunkedSource, FileSource, GridSize, ImageSize, IoError,
    RangeReader, S3RangeReader, Tiff, TiffError, TiffImage, TiffVersion,
};

/// Failures of a subcommand.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Tiff(#[from] TiffError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error("Image {index} does not exist, file has {count} images")]
    NoSuchImage { index: usize, count: usize },

    #[error("Failed to write {path}: {message}")]
    Write { path: String, message: String },

    #[error("Failed to serialize summary: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Command::Info { json, .. } => run_info(&cli, *json).await,
        Command::Tile {
            image, x, y, output, ..
        } => run_tile(&cli, *image, *x, *y, output).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "cog_streamer=debug"
    } else {
        "cog_streamer=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Open the local path or `s3://` URL given on the command line behind a
/// chunk cache.
async fn open_source(cli: &Cli) -> Result<Arc<dyn RangeReader>, IoError> {
    let source = cli.source();
    let config = cli.chunk_config();

    let reader: Arc<dyn RangeReader> = match parse_s3_url(source) {
        Some((bucket, key)) => {
            let client = create_s3_client(cli.s3_endpoint.as_deref(), &cli.s3_region).await;
            let reader = S3RangeReader::new(client, bucket, key).await?;
            Arc::new(ChunkedSource::with_config(reader, config))
        }
        None => {
            let reader = FileSource::open(source).await?;
            Arc::new(ChunkedSource::with_config(reader, config))
        }
    };

    info!(
        "Opened {} ({} bytes)",
        reader.identifier(),
        reader
            .size()
            .map_or_else(|| "unknown".to_string(), |s| s.to_string())
    );
    Ok(reader)
}

// =============================================================================
// Info Command
// =============================================================================

#[derive(Serialize)]
struct FileSummary {
    source: String,
    version: TiffVersion,
    cog_optimized: bool,
    ghost_options: BTreeMap<String, String>,
    images: Vec<ImageSummary>,
}

#[derive(Serialize)]
struct ImageSummary {
    id: usize,
    size: Option<ImageSize>,
    tile_size: Option<ImageSize>,
    tile_count: Option<GridSize>,
    strip_count: u64,
    compression: Option<&'static str>,
    mime_type: Option<&'static str>,
    reduced: bool,
    origin: Option<[f64; 3]>,
    resolution: Option<[f64; 3]>,
    bbox: Option<[f64; 4]>,
    epsg: Option<u16>,
    no_data: Option<f64>,
}

impl ImageSummary {
    async fn collect<R: RangeReader + ?Sized>(image: &TiffImage<R>) -> Result<Self, TiffError> {
        Ok(Self {
            id: image.id(),
            size: image.size().ok(),
            tile_size: image.tile_size().ok(),
            tile_count: image.tile_count().ok(),
            strip_count: image.strip_count(),
            compression: image.compression()?.map(|c| c.name()),
            mime_type: image.mime_type().ok(),
            reduced: image.is_reduced_image(),
            origin: image.origin().ok(),
            resolution: image.resolution().ok(),
            bbox: image.bbox().ok(),
            epsg: image.epsg(),
            no_data: image.no_data().await.ok().flatten(),
        })
    }
}

async fn run_info(cli: &Cli, json: bool) -> Result<(), CliError> {
    let reader = open_source(cli).await?;
    let tiff = Tiff::open(Arc::clone(&reader)).await?;

    let mut images = Vec::with_capacity(tiff.images().len());
    for image in tiff.images() {
        images.push(ImageSummary::collect(image).await?);
    }

    let summary = FileSummary {
        source: reader.identifier().to_string(),
        version: tiff.version().unwrap_or(TiffVersion::Tiff),
        cog_optimized: tiff.is_cog_optimized(),
        ghost_options: tiff
            .ghost_options()
            .map(|ghost| {
                ghost
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
        images,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &FileSummary) {
    println!("{}", summary.source);
    println!("  Format: {:?}", summary.version);
    println!("  COG optimized: {}", summary.cog_optimized);
    for (key, value) in &summary.ghost_options {
        println!("  {}={}", key, value);
    }

    for image in &summary.images {
        println!();
        print!("Image {}", image.id);
        if let Some(size) = image.size {
            print!(": {}x{}", size.width, size.height);
        }
        if image.reduced {
            print!(" (overview)");
        }
        println!();

        match (image.tile_size, image.tile_count) {
            (Some(tile), Some(count)) => println!(
                "  Tiles: {}x{} px, {}x{} grid",
                tile.width, tile.height, count.x, count.y
            ),
            _ => println!("  Strips: {}", image.strip_count),
        }
        if let Some(compression) = image.compression {
            println!("  Compression: {}", compression);
        }
        if let Some(epsg) = image.epsg {
            println!("  EPSG: {}", epsg);
        }
        if let Some(origin) = image.origin {
            println!("  Origin: {}, {}", origin[0], origin[1]);
        }
        if let Some(resolution) = image.resolution {
            println!("  Resolution: {}, {}", resolution[0], resolution[1]);
        }
        if let Some(bbox) = image.bbox {
            println!(
                "  Bounds: {}, {}, {}, {}",
                bbox[0], bbox[1], bbox[2], bbox[3]
            );
        }
        if let Some(no_data) = image.no_data {
            println!("  NoData: {}", no_data);
        }
    }
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(
    cli: &Cli,
    image: usize,
    x: u64,
    y: u64,
    output: &std::path::Path,
) -> Result<(), CliError> {
    let reader = open_source(cli).await?;
    let tiff = Tiff::open(reader).await?;

    let Some(tiff_image) = tiff.image(image) else {
        return Err(CliError::NoSuchImage {
            index: image,
            count: tiff.images().len(),
        });
    };

    let Some(tile) = tiff_image.get_tile(x, y).await? else {
        info!("Tile ({}, {}) of image {} is sparse, nothing written", x, y, image);
        return Ok(());
    };

    tokio::fs::write(output, &tile.bytes)
        .await
        .map_err(|e| CliError::Write {
            path: output.display().to_string(),
            message: e.to_string(),
        })?;

    info!(
        "Wrote {} bytes ({}) to {}",
        tile.bytes.len(),
        tile.mime_type,
        output.display()
    );
    Ok(())
}
