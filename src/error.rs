use thiserror::Error;

/// I/O errors that can occur when reading from a byte source
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Error from the local filesystem
    #[error("File error: {0}")]
    File(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Too many chunks are waiting to be fetched
    #[error("Too many outstanding chunk requests: {pending} pending, limit is {limit}")]
    TooManyChunks { pending: usize, limit: usize },

    /// The task performing a coalesced fetch was dropped before it finished
    #[error("Fetch for {0} was abandoned before completing")]
    FetchAbandoned(String),
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Big-endian files are not supported
    #[error("Unsupported byte order: only little-endian (II) files are supported")]
    UnsupportedByteOrder,

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// BigTIFF reserved header field must be zero
    #[error("Invalid BigTIFF header: reserved field must be 0, got {0}")]
    InvalidBigTiffReserved(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// IFD extends past the end of the file
    #[error("IFD at offset {offset} needs {required} bytes but only {available} are available")]
    IfdOutOfBounds {
        offset: u64,
        required: u64,
        available: u64,
    },

    /// The IFD chain points back to an already visited directory
    #[error("IFD chain loops back to offset {0}")]
    IfdLoop(u64),

    /// The IFD chain is longer than the supported maximum
    #[error("Too many IFDs: more than {0}")]
    TooManyIfds(usize),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// Tag exists but its value has not been fetched yet
    #[error("Tag {0} is present but has not been loaded")]
    TagNotLoaded(u16),

    /// Index past the end of an offset-array tag
    #[error("Index {index} out of bounds for tag {tag} with {count} values")]
    TagIndexOutOfBounds { tag: u16, index: u64, count: u64 },

    /// Image has no georeferencing and no usable fallback
    #[error("Image {0} has no geo transform (ModelTiePoint, ModelTransformation or reduced-image fallback)")]
    MissingGeoTransform(usize),

    /// Operation requires a tiled image
    #[error("Image {0} is not tiled")]
    NotTiled(usize),

    /// Tile coordinates outside of the tile grid
    #[error("Tile ({x}, {y}) out of bounds for {tiles_x}x{tiles_y} tile grid")]
    TileOutOfBounds {
        x: u64,
        y: u64,
        tiles_x: u64,
        tiles_y: u64,
    },

    /// Tile index past the declared number of tile offsets
    #[error("Tile index {index} out of bounds, image declares {count} tiles")]
    TileIndexOutOfBounds { index: u64, count: u64 },

    /// Strip index past the declared number of strip offsets
    #[error("Strip index {index} out of bounds, image declares {count} strips")]
    StripOutOfBounds { index: u64, count: u64 },
}
