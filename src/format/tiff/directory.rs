//! TIFF file structure: header, ghost block and the chain of IFDs.
//!
//! [`Tiff::init`] reads the start of the file, walks every IFD and builds one
//! [`TiffImage`] per directory. Reads are kept to a minimum:
//!
//! 1. One initial read (16KB by default) usually covers the header, the GDAL
//!    ghost block and all IFDs of a Cloud-Optimized GeoTIFF.
//! 2. An IFD outside the bytes read so far triggers one more read at its
//!    offset.
//! 3. Tag values already covered by those reads are decoded immediately.
//!    Everything else is fetched lazily.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::ghost::{GhostOptions, MAX_GHOST_SIZE};
use super::image::TiffImage;
use super::parser::{ByteOrder, TiffHeader, TiffVersion};
use super::tag::Tag;

// =============================================================================
// Constants
// =============================================================================

/// Bytes read from the start of the file before parsing.
pub const DEFAULT_INITIAL_READ_SIZE: usize = 16 * 1024;

/// Upper bound on the number of IFDs in one file.
pub const MAX_IFDS: usize = 1024;

/// Bytes kept resident at an IFD offset before reading its entry count.
const MIN_IFD_WINDOW: u64 = 1024;

// =============================================================================
// Options
// =============================================================================

/// Options controlling how a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffOptions {
    /// Size of the first read from the start of the file
    pub initial_read_size: usize,
    /// Fetch and unpack GeoKeys while initializing
    pub load_geo_tags: bool,
}

impl Default for TiffOptions {
    fn default() -> Self {
        Self {
            initial_read_size: DEFAULT_INITIAL_READ_SIZE,
            load_geo_tags: true,
        }
    }
}

// =============================================================================
// Window
// =============================================================================

/// A contiguous run of file bytes read while walking directories.
struct Window {
    start: u64,
    data: Bytes,
}

impl Window {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn slice(&self, offset: u64, len: u64) -> Option<&[u8]> {
        let start = usize::try_from(offset.checked_sub(self.start)?).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        self.data.get(start..end)
    }
}

// =============================================================================
// Tiff
// =============================================================================

struct TiffContents<R: ?Sized> {
    header: TiffHeader,
    ghost: Option<GhostOptions>,
    images: Vec<TiffImage<R>>,
}

/// A TIFF or BigTIFF file read through a [`RangeReader`].
///
/// Nothing is read until [`Tiff::init`] is awaited. Initialization runs once;
/// concurrent and repeated calls share the first result.
pub struct Tiff<R: ?Sized> {
    source: Arc<R>,
    options: TiffOptions,
    contents: OnceCell<TiffContents<R>>,
}

impl<R: RangeReader + ?Sized> Tiff<R> {
    /// Create an uninitialized Tiff with default options.
    pub fn new(source: Arc<R>) -> Self {
        Self::with_options(source, TiffOptions::default())
    }

    /// Create an uninitialized Tiff with custom options.
    pub fn with_options(source: Arc<R>, options: TiffOptions) -> Self {
        Self {
            source,
            options,
            contents: OnceCell::new(),
        }
    }

    /// Create a Tiff and initialize it.
    pub async fn open(source: Arc<R>) -> Result<Self, TiffError> {
        let tiff = Self::new(source);
        tiff.init().await?;
        Ok(tiff)
    }

    /// Parse the header, ghost block and every IFD, then initialize each image.
    ///
    /// Calling this again after success is free and reads nothing. After a
    /// failure the next call starts over.
    pub async fn init(&self) -> Result<(), TiffError> {
        self.contents.get_or_try_init(|| self.load()).await?;
        Ok(())
    }

    async fn load(&self) -> Result<TiffContents<R>, TiffError> {
        let size = self.source.size();
        let initial = match size {
            Some(size) => (self.options.initial_read_size as u64).min(size) as usize,
            None => self.options.initial_read_size,
        };

        let data = self.source.read_at(0, initial).await?;
        let mut window = Window { start: 0, data };
        let header = TiffHeader::parse(&window.data, size)?;
        debug!(
            source = self.source.identifier(),
            version = ?header.version,
            first_ifd = header.first_ifd_offset,
            "Parsed TIFF header"
        );

        let ghost = self.read_ghost(&header, &window).await?;
        let leader = ghost
            .as_ref()
            .filter(|ghost| ghost.is_cog_optimized())
            .and_then(GhostOptions::tile_leader_byte_size);

        let mut images = Vec::new();
        let mut visited = HashSet::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 {
            if !visited.insert(offset) {
                return Err(TiffError::IfdLoop(offset));
            }
            if images.len() >= MAX_IFDS {
                return Err(TiffError::TooManyIfds(MAX_IFDS));
            }
            if size.is_some_and(|size| offset >= size) {
                return Err(TiffError::InvalidIfdOffset(offset));
            }

            let min_window = match size {
                Some(size) => MIN_IFD_WINDOW.min(size - offset),
                None => MIN_IFD_WINDOW,
            };
            window = self.ensure_resident(window, offset, min_window).await?;

            let count_size = header.ifd_count_size() as u64;
            let count_bytes = window
                .slice(offset, count_size)
                .ok_or_else(|| out_of_bounds(&window, offset, count_size))?;
            let entry_count = header.read_count(count_bytes);

            let entry_size = header.ifd_entry_size() as u64;
            let ifd_len = entry_count
                .checked_mul(entry_size)
                .and_then(|len| len.checked_add(count_size + header.pointer_size() as u64))
                .ok_or(TiffError::InvalidIfdOffset(offset))?;
            if let Some(size) = size.filter(|&size| offset.saturating_add(ifd_len) > size) {
                return Err(TiffError::IfdOutOfBounds {
                    offset,
                    required: ifd_len,
                    available: size - offset,
                });
            }
            window = self.ensure_resident(window, offset, ifd_len).await?;

            let directory = window
                .slice(offset, ifd_len)
                .ok_or_else(|| out_of_bounds(&window, offset, ifd_len))?;

            let mut tags = HashMap::new();
            let entries = &directory[count_size as usize..ifd_len as usize - header.pointer_size()];
            for (i, entry) in entries.chunks_exact(entry_size as usize).enumerate() {
                let entry_offset = offset + count_size + i as u64 * entry_size;
                let tag = Tag::from_entry(entry, entry_offset, &header, window.start, &window.data)?;
                tags.insert(tag.id(), tag);
            }

            let next = header.read_pointer(&directory[ifd_len as usize - header.pointer_size()..]);
            debug!(
                source = self.source.identifier(),
                image = images.len(),
                offset,
                entries = entry_count,
                next,
                "Parsed IFD"
            );

            images.push(TiffImage::new(
                images.len(),
                Arc::clone(&self.source),
                tags,
                leader,
            ));
            offset = next;
        }

        for image in &images {
            image.init(self.options.load_geo_tags).await?;
        }

        let root = images.first().and_then(TiffImage::root_geo);
        for image in images.iter_mut().skip(1) {
            image.set_root(root);
        }

        debug!(
            source = self.source.identifier(),
            images = images.len(),
            cog_optimized = ghost.as_ref().is_some_and(GhostOptions::is_cog_optimized),
            "Initialized TIFF"
        );

        Ok(TiffContents {
            header,
            ghost,
            images,
        })
    }

    /// Parse GDAL structural metadata between the header and the first IFD.
    async fn read_ghost(
        &self,
        header: &TiffHeader,
        window: &Window,
    ) -> Result<Option<GhostOptions>, TiffError> {
        let start = header.header_size() as u64;
        let gap = header.first_ifd_offset.saturating_sub(start);
        if gap == 0 || gap >= MAX_GHOST_SIZE {
            return Ok(None);
        }

        let ghost = match window.slice(start, gap) {
            Some(bytes) => GhostOptions::parse(bytes),
            None => GhostOptions::parse(&self.source.read_at(start, gap as usize).await?),
        };
        if ghost.is_empty() {
            return Ok(None);
        }

        debug!(
            source = self.source.identifier(),
            options = ghost.len(),
            cog_optimized = ghost.is_cog_optimized(),
            "Found ghost options"
        );
        Ok(Some(ghost))
    }

    /// Return a window holding `len` bytes at `offset`, reading if needed.
    async fn ensure_resident(&self, window: Window, offset: u64, len: u64) -> Result<Window, TiffError> {
        if window.slice(offset, len).is_some() {
            return Ok(window);
        }

        let read_len = usize::try_from(len)
            .map_err(|_| TiffError::InvalidIfdOffset(offset))?
            .max(self.options.initial_read_size);
        debug!(
            source = self.source.identifier(),
            offset,
            len = read_len,
            "Reading IFD window"
        );
        let data = self.source.read_at(offset, read_len).await?;
        Ok(Window {
            start: offset,
            data,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Whether [`Tiff::init`] has completed successfully.
    pub fn is_initialized(&self) -> bool {
        self.contents.initialized()
    }

    /// The byte source.
    pub fn source(&self) -> &Arc<R> {
        &self.source
    }

    /// The options the file was opened with.
    pub fn options(&self) -> &TiffOptions {
        &self.options
    }

    /// Parsed header, once initialized.
    pub fn header(&self) -> Option<&TiffHeader> {
        self.contents.get().map(|c| &c.header)
    }

    /// Classic TIFF or BigTIFF, once initialized.
    pub fn version(&self) -> Option<TiffVersion> {
        self.header().map(|h| h.version)
    }

    /// Byte order, once initialized.
    pub fn byte_order(&self) -> Option<ByteOrder> {
        self.header().map(|h| h.byte_order)
    }

    /// GDAL ghost options, if the file has them.
    pub fn ghost_options(&self) -> Option<&GhostOptions> {
        self.contents.get().and_then(|c| c.ghost.as_ref())
    }

    /// Whether the ghost options declare a trusted COG layout.
    pub fn is_cog_optimized(&self) -> bool {
        self.ghost_options()
            .is_some_and(GhostOptions::is_cog_optimized)
    }

    /// All images in file order. Empty before initialization.
    pub fn images(&self) -> &[TiffImage<R>] {
        self.contents
            .get()
            .map(|c| c.images.as_slice())
            .unwrap_or(&[])
    }

    /// Image by index.
    pub fn image(&self, index: usize) -> Option<&TiffImage<R>> {
        self.images().get(index)
    }
}

fn out_of_bounds(window: &Window, offset: u64, required: u64) -> TiffError {
    TiffError::IfdOutOfBounds {
        offset,
        required,
        available: window.end().saturating_sub(offset),
    }
}

impl<R: ?Sized> std::fmt::Debug for Tiff<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tiff")
            .field("options", &self.options)
            .field("initialized", &self.contents.initialized())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
