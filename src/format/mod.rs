//! File format support.
//!
//! - [`tiff`] - TIFF/BigTIFF structure, tags, GeoTIFF keys and tile access
//! - [`jpeg`] - Reattaching shared JPEG tables to abbreviated tile streams

pub mod jpeg;
pub mod tiff;

pub use jpeg::reattach_jpeg_tables;
