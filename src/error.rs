//! Error types for the profile readers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FoxtrailError>;

#[derive(Error, Debug)]
pub enum FoxtrailError {
    /// Fewer bytes were available than a decoder needed.
    #[error("could not read all of the data starting at {offset}: wanted {wanted}, got {got}")]
    ShortRead { offset: u64, wanted: usize, got: usize },

    #[error("bad magic: {0}")]
    BadMagic(String),

    #[error("unsupported version: expected {expected}, got {got}")]
    BadVersion { expected: u32, got: u32 },

    #[error("malformed cache key: {0}")]
    MalformedKey(String),

    #[error("malformed cache entry metadata: {0}")]
    MalformedMetadata(String),

    /// A structured-clone or IndexedDB key tag this reader does not handle.
    #[error("unsupported tag: {0:#010x}")]
    UnsupportedTag(u32),

    /// A back-reference pointed past the end of the flattened-object table.
    #[error("back-reference {0} is out of range for the flattened-object table")]
    InvalidBackref(u32),

    #[error("typed array is not backed by an ArrayBuffer")]
    TypedArrayBackingMismatch,

    /// Raised by iterators in strict mode when nothing matched the query.
    #[error("no records matched the query: {0}")]
    NotFound(String),

    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snappy error: {0}")]
    Snappy(#[from] snap::Error),

    #[error("LZ4 error: {0}")]
    Lz4(#[from] lz4_flex::block::DecompressError),
}
